//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! In-memory capability doubles used by the controller's tests.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::command::{CommandOutput, CommandRunner, ExecError, ExecRequest};
use crate::resource::{DirectorySpec, FileSpec, ResourceError, ResourceProvider};
use crate::service::{DaemonOutcome, DaemonSpec, ServiceError, ServiceManager};

/// One command seen by a [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub user: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, VecDeque<i32>)>,
    history: Vec<Invocation>,
    pauses: Vec<Duration>,
}

/// [`CommandRunner`] answering with scripted exit codes.
///
/// A rule matches any command containing its needle; the most recently added
/// matching rule wins. Codes are consumed in order and the last one repeats.
/// Unmatched commands exit zero. Pauses are recorded, never slept.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with `codes`.
    pub fn respond<I>(&self, needle: impl Into<String>, codes: I) -> &Self
    where
        I: IntoIterator<Item = i32>,
    {
        let mut codes: VecDeque<i32> = codes.into_iter().collect();
        if codes.is_empty() {
            codes.push_back(0);
        }
        self.script.lock().rules.push((needle.into(), codes));
        self
    }

    pub fn history(&self) -> Vec<Invocation> {
        self.script.lock().history.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.script
            .lock()
            .history
            .iter()
            .map(|invocation| invocation.command.clone())
            .collect()
    }

    /// Number of invocations whose command contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.script
            .lock()
            .history
            .iter()
            .filter(|invocation| invocation.command.contains(needle))
            .count()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.script.lock().pauses.clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn spawn(&self, request: &ExecRequest) -> Result<CommandOutput, ExecError> {
        let mut script = self.script.lock();
        script.history.push(Invocation {
            command: request.command().to_owned(),
            user: request.user().map(str::to_owned),
        });
        let code = script
            .rules
            .iter_mut()
            .rev()
            .find(|(needle, _)| request.command().contains(needle.as_str()))
            .map(|(_, codes)| {
                if codes.len() > 1 {
                    codes.pop_front().unwrap_or_default()
                } else {
                    codes.front().copied().unwrap_or_default()
                }
            })
            .unwrap_or(0);
        Ok(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("scripted exit {}", code)
            },
        })
    }

    fn pause(&self, duration: Duration) {
        self.script.lock().pauses.push(duration);
    }
}

/// Ownership and mode recorded for an in-memory directory or file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub contents: Vec<u8>,
    pub attributes: Attributes,
}

#[derive(Debug, Default)]
struct Filesystem {
    dirs: IndexMap<PathBuf, Attributes>,
    files: IndexMap<PathBuf, FileRecord>,
    failing: IndexSet<PathBuf>,
    locks: IndexSet<PathBuf>,
    directory_writes: usize,
}

impl Filesystem {
    fn has_children(&self, path: &Path) -> bool {
        self.dirs.keys().any(|dir| dir.parent() == Some(path))
            || self.files.keys().any(|file| file.parent() == Some(path))
    }

    fn check_failure(&self, path: &Path) -> Result<(), ResourceError> {
        if self.failing.contains(path) {
            return Err(ResourceError::io(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
            ));
        }
        Ok(())
    }
}

/// [`ResourceProvider`] keeping directories and files in memory.
#[derive(Debug, Default)]
pub struct MemoryResources {
    fs: Mutex<Filesystem>,
}

impl MemoryResources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_directory(&self, path: impl Into<PathBuf>) -> &Self {
        self.fs.lock().dirs.insert(path.into(), Attributes::default());
        self
    }

    pub fn seed_file(&self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> &Self {
        self.fs.lock().files.insert(
            path.into(),
            FileRecord {
                contents: contents.as_ref().to_vec(),
                attributes: Attributes::default(),
            },
        );
        self
    }

    /// Make every write or directory creation at `path` fail.
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) -> &Self {
        self.fs.lock().failing.insert(path.into());
        self
    }

    pub fn has_directory(&self, path: impl AsRef<Path>) -> bool {
        self.fs.lock().dirs.contains_key(path.as_ref())
    }

    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.fs.lock().files.contains_key(path.as_ref())
    }

    pub fn directory(&self, path: impl AsRef<Path>) -> Option<Attributes> {
        self.fs.lock().dirs.get(path.as_ref()).cloned()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<FileRecord> {
        self.fs.lock().files.get(path.as_ref()).cloned()
    }

    pub fn file_contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.fs
            .lock()
            .files
            .get(path.as_ref())
            .map(|record| String::from_utf8_lossy(&record.contents).into_owned())
    }

    /// Mark `path` as locked by another process that recorded `owner` in it.
    pub fn hold_lock(&self, path: impl Into<PathBuf>, owner: impl AsRef<[u8]>) -> &Self {
        let path = path.into();
        let mut fs = self.fs.lock();
        fs.files.insert(
            path.clone(),
            FileRecord {
                contents: owner.as_ref().to_vec(),
                attributes: Attributes::default(),
            },
        );
        fs.locks.insert(path);
        self
    }

    pub fn is_locked(&self, path: impl AsRef<Path>) -> bool {
        self.fs.lock().locks.contains(path.as_ref())
    }

    /// Number of `ensure_directory` calls that changed state.
    pub fn directory_writes(&self) -> usize {
        self.fs.lock().directory_writes
    }
}

impl ResourceProvider for MemoryResources {
    fn ensure_directory(&self, spec: &DirectorySpec) -> Result<(), ResourceError> {
        let mut fs = self.fs.lock();
        fs.check_failure(&spec.path)?;
        if spec.recursive {
            for ancestor in spec.path.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() || ancestor == Path::new("/") {
                    continue;
                }
                fs.dirs.entry(ancestor.to_path_buf()).or_default();
            }
        } else if let Some(parent) = spec.path.parent() {
            let rooted = parent == Path::new("/") || parent.as_os_str().is_empty();
            if !rooted && !fs.dirs.contains_key(parent) {
                return Err(ResourceError::MissingParent(spec.path.clone()));
            }
        }
        let desired = Attributes {
            owner: spec.owner.clone(),
            group: spec.group.clone(),
            mode: spec.mode,
        };
        let entry = fs.dirs.entry(spec.path.clone()).or_default();
        let mut changed = false;
        if desired.owner.is_some() && entry.owner != desired.owner {
            entry.owner = desired.owner;
            changed = true;
        }
        if desired.group.is_some() && entry.group != desired.group {
            entry.group = desired.group;
            changed = true;
        }
        if desired.mode.is_some() && entry.mode != desired.mode {
            entry.mode = desired.mode;
            changed = true;
        }
        if changed {
            fs.directory_writes += 1;
        }
        Ok(())
    }

    fn write_file(&self, spec: &FileSpec) -> Result<(), ResourceError> {
        let contents = spec.content.load()?;
        let mut fs = self.fs.lock();
        fs.check_failure(&spec.path)?;
        fs.files.insert(
            spec.path.clone(),
            FileRecord {
                contents,
                attributes: Attributes {
                    owner: spec.owner.clone(),
                    group: spec.group.clone(),
                    mode: spec.mode,
                },
            },
        );
        Ok(())
    }

    fn try_lock(&self, path: &Path, owner: &[u8]) -> Result<bool, ResourceError> {
        let mut fs = self.fs.lock();
        fs.check_failure(path)?;
        if !fs.locks.insert(path.to_path_buf()) {
            return Ok(false);
        }
        fs.files.insert(
            path.to_path_buf(),
            FileRecord {
                contents: owner.to_vec(),
                attributes: Attributes::default(),
            },
        );
        Ok(true)
    }

    fn unlock(&self, path: &Path) -> Result<(), ResourceError> {
        self.fs.lock().locks.shift_remove(path);
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, ResourceError> {
        Ok(self
            .fs
            .lock()
            .files
            .get(path)
            .map(|record| record.contents.clone()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ResourceError> {
        self.fs.lock().files.shift_remove(path);
        Ok(())
    }

    fn directory_exists(&self, path: &Path) -> Result<bool, ResourceError> {
        Ok(self.fs.lock().dirs.contains_key(path))
    }

    fn directory_is_empty(&self, path: &Path) -> Result<bool, ResourceError> {
        Ok(!self.fs.lock().has_children(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Start(String),
    Stop(String),
}

#[derive(Debug, Default)]
struct ServiceState {
    calls: Vec<ServiceCall>,
    running: IndexSet<String>,
    fail_start: bool,
}

/// [`ServiceManager`] that records calls and tracks running daemons by name.
#[derive(Debug, Default)]
pub struct RecordingServices {
    state: Mutex<ServiceState>,
}

impl RecordingServices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: impl Into<String>) -> &Self {
        self.state.lock().running.insert(name.into());
        self
    }

    pub fn fail_start(&self) -> &Self {
        self.state.lock().fail_start = true;
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state.lock().calls.clone()
    }

    pub fn running(&self, name: &str) -> bool {
        self.state.lock().running.contains(name)
    }
}

impl ServiceManager for RecordingServices {
    fn start(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError> {
        let mut state = self.state.lock();
        state.calls.push(ServiceCall::Start(spec.name.clone()));
        if state.fail_start {
            return Err(ServiceError::Command(ExecError::Failed {
                command: format!("start {}", spec.name),
                code: Some(1),
                attempts: 1,
                stderr: "injected failure".to_owned(),
            }));
        }
        if state.running.insert(spec.name.clone()) {
            Ok(DaemonOutcome::Started)
        } else {
            Ok(DaemonOutcome::AlreadyRunning)
        }
    }

    fn stop(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError> {
        let mut state = self.state.lock();
        state.calls.push(ServiceCall::Stop(spec.name.clone()));
        state.running.shift_remove(&spec.name);
        Ok(DaemonOutcome::Stopped)
    }

    fn is_running(&self, spec: &DaemonSpec) -> Result<bool, ServiceError> {
        Ok(self.state.lock().running.contains(&spec.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_codes_are_consumed_then_repeat() {
        let runner = ScriptedRunner::new();
        runner.respond("safemode", [1, 1, 0]);
        let request = ExecRequest::new("hdfs dfsadmin -safemode get")
            .with_tries(5)
            .with_try_sleep(Duration::from_secs(10));
        let outcome = runner.run(&request).unwrap();
        assert!(matches!(outcome, crate::ExecOutcome::Completed { attempts: 3, .. }));
        assert_eq!(runner.count("safemode"), 3);
        assert_eq!(runner.pauses(), vec![Duration::from_secs(10); 2]);
        assert!(runner.spawn(&request).unwrap().success());
    }

    #[test]
    fn guards_short_circuit_the_command() {
        let runner = ScriptedRunner::new();
        runner.respond("haadmin", [1]);
        let request = ExecRequest::new("provision")
            .only_if(ExecRequest::new("hdfs haadmin -getServiceState nn1"));
        assert_eq!(
            runner.run(&request).unwrap(),
            crate::ExecOutcome::Skipped(crate::SkipReason::OnlyIfFailed)
        );
        assert_eq!(runner.count("provision"), 0);
    }

    #[test]
    fn memory_directories_track_children() {
        let resources = MemoryResources::new();
        resources
            .ensure_directory(&DirectorySpec::new("/data/nn").recursive())
            .unwrap();
        assert!(resources.has_directory("/data"));
        assert!(resources.directory_is_empty(Path::new("/data/nn")).unwrap());
        resources.seed_file("/data/nn/VERSION", "x");
        assert!(!resources.directory_is_empty(Path::new("/data/nn")).unwrap());
        assert!(matches!(
            resources.ensure_directory(&DirectorySpec::new("/missing/child")),
            Err(ResourceError::MissingParent(_))
        ));
    }

    #[test]
    fn recording_services_report_already_running() {
        let services = RecordingServices::new();
        let spec = DaemonSpec::new("namenode", "hdfs", "/run", "/log");
        assert_eq!(services.start(&spec).unwrap(), DaemonOutcome::Started);
        assert_eq!(services.start(&spec).unwrap(), DaemonOutcome::AlreadyRunning);
        services.stop(&spec).unwrap();
        assert!(!services.is_running(&spec).unwrap());
    }
}
