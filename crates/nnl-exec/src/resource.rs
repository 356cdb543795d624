//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use nix::unistd::{chown, Gid, Group, Uid, User};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Desired state of a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySpec {
    pub path: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
    /// Create missing parents as well.
    pub recursive: bool,
}

impl DirectorySpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
            mode: None,
            recursive: false,
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.group = Some(group.into());
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }
}

/// Where the bytes of a managed file come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Inline(Vec<u8>),
    /// Copy of a file shipped alongside the controller.
    Static(PathBuf),
}

impl FileContent {
    pub fn load(&self) -> Result<Vec<u8>, ResourceError> {
        match self {
            FileContent::Inline(bytes) => Ok(bytes.clone()),
            FileContent::Static(source) => fs::read(source).map_err(|err| ResourceError::io(source, err)),
        }
    }
}

impl From<String> for FileContent {
    fn from(value: String) -> Self {
        FileContent::Inline(value.into_bytes())
    }
}

impl From<&str> for FileContent {
    fn from(value: &str) -> Self {
        FileContent::Inline(value.as_bytes().to_vec())
    }
}

/// Desired state of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub content: FileContent,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<FileContent>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            owner: None,
            group: None,
            mode: None,
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.group = Some(group.into());
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unknown user `{0}`")]
    UnknownUser(String),
    #[error("unknown group `{0}`")]
    UnknownGroup(String),
    #[error("failed to look up `{name}`: {source}")]
    Lookup {
        name: String,
        #[source]
        source: nix::Error,
    },
    #[error("failed to change ownership of {path}: {source}")]
    Ownership {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("parent directory of {0} does not exist")]
    MissingParent(PathBuf),
}

impl ResourceError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        ResourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Path the error refers to, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResourceError::Io { path, .. }
            | ResourceError::Ownership { path, .. }
            | ResourceError::Lock { path, .. }
            | ResourceError::MissingParent(path) => Some(path),
            _ => None,
        }
    }
}

/// Local filesystem operations the controller performs.
pub trait ResourceProvider: Send + Sync {
    /// Create the directory if needed, then apply ownership and mode.
    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<(), ResourceError>;

    /// Replace the file's contents, then apply ownership and mode.
    fn write_file(&self, spec: &FileSpec) -> Result<(), ResourceError>;

    /// Take a non-blocking exclusive advisory lock on `path` and record `owner`
    /// in it. `false` when another holder has it. A holder that exits loses
    /// the lock without cleanup.
    fn try_lock(&self, path: &Path, owner: &[u8]) -> Result<bool, ResourceError>;

    /// Release a lock taken with [`ResourceProvider::try_lock`]. The file stays.
    fn unlock(&self, path: &Path) -> Result<(), ResourceError>;

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, ResourceError>;

    /// Remove a file; a missing file is not an error.
    fn remove_file(&self, path: &Path) -> Result<(), ResourceError>;

    fn directory_exists(&self, path: &Path) -> Result<bool, ResourceError>;

    /// A missing directory counts as empty.
    fn directory_is_empty(&self, path: &Path) -> Result<bool, ResourceError>;
}

/// [`ResourceProvider`] operating on the host filesystem.
///
/// Locks are `flock(2)` locks held through open descriptors kept in `held`.
#[derive(Debug, Default)]
pub struct LocalResources {
    held: Mutex<IndexMap<PathBuf, File>>,
}

impl LocalResources {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_attributes(
        &self,
        path: &Path,
        owner: Option<&str>,
        group: Option<&str>,
        mode: Option<u32>,
    ) -> Result<(), ResourceError> {
        if let Some(mode) = mode {
            fs::set_permissions(path, Permissions::from_mode(mode))
                .map_err(|err| ResourceError::io(path, err))?;
        }
        if owner.is_none() && group.is_none() {
            return Ok(());
        }
        let uid = owner.map(resolve_user).transpose()?;
        let gid = group.map(resolve_group).transpose()?;
        chown(path, uid, gid).map_err(|source| ResourceError::Ownership {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_user(name: &str) -> Result<Uid, ResourceError> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid),
        Ok(None) => Err(ResourceError::UnknownUser(name.to_owned())),
        Err(source) => Err(ResourceError::Lookup {
            name: name.to_owned(),
            source,
        }),
    }
}

fn resolve_group(name: &str) -> Result<Gid, ResourceError> {
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid),
        Ok(None) => Err(ResourceError::UnknownGroup(name.to_owned())),
        Err(source) => Err(ResourceError::Lookup {
            name: name.to_owned(),
            source,
        }),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.nnl-tmp", name))
}

impl ResourceProvider for LocalResources {
    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<(), ResourceError> {
        let path = spec.path.as_path();
        if !path.is_dir() {
            if spec.recursive {
                fs::create_dir_all(path).map_err(|err| ResourceError::io(path, err))?;
            } else {
                match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
                        return Err(ResourceError::MissingParent(path.to_path_buf()));
                    }
                    _ => {}
                }
                fs::create_dir(path).map_err(|err| ResourceError::io(path, err))?;
            }
            debug!(path = %path.display(), "created directory");
        }
        self.apply_attributes(path, spec.owner.as_deref(), spec.group.as_deref(), spec.mode)
    }

    fn write_file(&self, spec: &FileSpec) -> Result<(), ResourceError> {
        let path = spec.path.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(ResourceError::MissingParent(path.to_path_buf()));
            }
        }
        let bytes = spec.content.load()?;
        let staging = staging_path(path);
        fs::write(&staging, &bytes).map_err(|err| ResourceError::io(&staging, err))?;
        if let Err(err) = self.apply_attributes(
            &staging,
            spec.owner.as_deref(),
            spec.group.as_deref(),
            spec.mode,
        ) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(ResourceError::io(path, err));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }

    fn try_lock(&self, path: &Path, owner: &[u8]) -> Result<bool, ResourceError> {
        let mut held = self.held.lock();
        if held.contains_key(path) {
            return Ok(false);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| ResourceError::io(path, err))?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(Errno::EWOULDBLOCK) => return Ok(false),
            Err(source) => {
                return Err(ResourceError::Lock {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        file.set_len(0)
            .and_then(|_| file.write_all(owner))
            .and_then(|_| file.sync_all())
            .map_err(|err| ResourceError::io(path, err))?;
        held.insert(path.to_path_buf(), file);
        debug!(path = %path.display(), "lock acquired");
        Ok(true)
    }

    fn unlock(&self, path: &Path) -> Result<(), ResourceError> {
        // Closing the descriptor drops the flock.
        if self.held.lock().shift_remove(path).is_some() {
            debug!(path = %path.display(), "lock released");
        }
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, ResourceError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ResourceError::io(path, err)),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<(), ResourceError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ResourceError::io(path, err)),
        }
    }

    fn directory_exists(&self, path: &Path) -> Result<bool, ResourceError> {
        Ok(path.is_dir())
    }

    fn directory_is_empty(&self, path: &Path) -> Result<bool, ResourceError> {
        match fs::read_dir(path) {
            Ok(mut entries) => Ok(entries.next().is_none()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(ResourceError::io(path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_file_sits_next_to_target() {
        assert_eq!(
            staging_path(Path::new("/etc/hadoop/conf/dfs.exclude")),
            PathBuf::from("/etc/hadoop/conf/.dfs.exclude.nnl-tmp")
        );
    }

    #[test]
    fn inline_content_loads_verbatim() {
        let content = FileContent::from("dn1\n");
        assert_eq!(content.load().unwrap(), b"dn1\n".to_vec());
    }

    #[test]
    fn unknown_user_is_reported() {
        let err = resolve_user("nnl-no-such-user-xyz").unwrap_err();
        assert!(matches!(err, ResourceError::UnknownUser(_)));
    }

    #[test]
    fn failed_rename_removes_staging_file() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("dfs.exclude");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupant"), "x").unwrap();

        let err = LocalResources::new()
            .write_file(&FileSpec::new(&target, "dn1\n"))
            .unwrap_err();
        assert_eq!(err.path(), Some(target.as_path()));
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn second_handle_cannot_take_a_held_lock() {
        let temp = tempfile::tempdir().unwrap();
        let lock = temp.path().join("format.lock");
        let first = LocalResources::new();
        let second = LocalResources::new();

        assert!(first.try_lock(&lock, b"101").unwrap());
        assert!(!first.try_lock(&lock, b"101").unwrap());
        assert!(!second.try_lock(&lock, b"202").unwrap());
        assert_eq!(fs::read_to_string(&lock).unwrap(), "101");

        first.unlock(&lock).unwrap();
        assert!(second.try_lock(&lock, b"202").unwrap());
        assert_eq!(fs::read_to_string(&lock).unwrap(), "202");
    }
}
