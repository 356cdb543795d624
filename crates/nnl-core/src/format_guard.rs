//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! Initialises the name directories at most once per node lifetime.
//!
//! Non-forced runs follow check, lock, re-check, act: the markers are read
//! without the lock first so the common already-formatted path stays cheap,
//! then read again while holding the lock before anything destructive runs.

use std::path::{Path, PathBuf};

use nnl_common::NodeConfig;
use nnl_exec::{CommandRunner, DirectorySpec, ExecRequest, ResourceProvider};
use tracing::{info, warn};

use crate::action::Step;
use crate::commands::{HdfsCommands, FORMAT_SEARCH_PATH};
use crate::error::LifecycleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDecision {
    /// HA pairs are formatted through the HA bootstrap procedure instead.
    SkippedHa,
    AlreadyFormatted { marker: PathBuf, legacy: bool },
    Formatted { forced: bool },
}

impl FormatDecision {
    pub fn formatted(&self) -> bool {
        matches!(self, FormatDecision::Formatted { .. })
    }
}

pub struct FormattingGuard<'a> {
    node: &'a NodeConfig,
    runner: &'a dyn CommandRunner,
    resources: &'a dyn ResourceProvider,
    commands: &'a HdfsCommands,
}

impl<'a> FormattingGuard<'a> {
    pub fn new(
        node: &'a NodeConfig,
        runner: &'a dyn CommandRunner,
        resources: &'a dyn ResourceProvider,
        commands: &'a HdfsCommands,
    ) -> Self {
        Self {
            node,
            runner,
            resources,
            commands,
        }
    }

    pub fn ensure_formatted(&self, forced: bool) -> Result<FormatDecision, LifecycleError> {
        if self.node.ha.enabled {
            if forced {
                warn!("format override ignored: HA is enabled");
            }
            return Ok(FormatDecision::SkippedHa);
        }

        if !forced {
            if let Some(decision) = self.existing_marker()? {
                return Ok(decision);
            }
        }

        let _lock = FormatLock::acquire(self.resources, &self.node.format_lock_path())?;

        let command = if forced {
            warn!(name_dirs = ?self.node.name_dirs, "forced format requested; existing metadata will be destroyed");
            self.commands.forced_format()
        } else {
            if let Some(decision) = self.existing_marker()? {
                return Ok(decision);
            }
            self.require_empty_name_dirs()?;
            self.commands.format()
        };

        let request = ExecRequest::new(command)
            .as_user(self.node.user.clone())
            .with_search_path(FORMAT_SEARCH_PATH);
        self.runner
            .run(&request)
            .map_err(|source| LifecycleError::FormattingFailed {
                reason: format!("`{}` did not complete", request.command()),
                source: Some(source),
            })?;

        self.resources
            .ensure_directory(&DirectorySpec::new(&self.node.markers.current).recursive())
            .map_err(LifecycleError::resource(Step::Format))?;
        info!(marker = %self.node.markers.current.display(), forced, "name directories formatted");
        Ok(FormatDecision::Formatted { forced })
    }

    fn existing_marker(&self) -> Result<Option<FormatDecision>, LifecycleError> {
        let current = &self.node.markers.current;
        if self.marker_present(current)? {
            info!(marker = %current.display(), "already formatted; skipping");
            return Ok(Some(FormatDecision::AlreadyFormatted {
                marker: current.clone(),
                legacy: false,
            }));
        }
        if let Some(legacy) = &self.node.markers.legacy {
            if self.marker_present(legacy)? {
                warn!(
                    marker = %legacy.display(),
                    current = %current.display(),
                    "already formatted according to deprecated legacy marker; skipping"
                );
                return Ok(Some(FormatDecision::AlreadyFormatted {
                    marker: legacy.clone(),
                    legacy: true,
                }));
            }
        }
        Ok(None)
    }

    fn marker_present(&self, marker: &Path) -> Result<bool, LifecycleError> {
        self.resources
            .directory_exists(marker)
            .map_err(LifecycleError::resource(Step::Format))
    }

    fn require_empty_name_dirs(&self) -> Result<(), LifecycleError> {
        let mut occupied = Vec::new();
        for dir in &self.node.name_dirs {
            let empty = self
                .resources
                .directory_is_empty(dir)
                .map_err(LifecycleError::resource(Step::Format))?;
            if !empty {
                occupied.push(dir.display().to_string());
            }
        }
        if occupied.is_empty() {
            return Ok(());
        }
        Err(LifecycleError::FormattingFailed {
            reason: format!(
                "name directories are not empty but no format marker exists: {}",
                occupied.join(", ")
            ),
            source: None,
        })
    }
}

/// Advisory lock on the lock file, which records the holder's PID.
/// Released on drop, or by the kernel when the holder dies.
struct FormatLock<'a> {
    path: PathBuf,
    resources: &'a dyn ResourceProvider,
}

impl<'a> FormatLock<'a> {
    fn acquire(resources: &'a dyn ResourceProvider, path: &Path) -> Result<Self, LifecycleError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                resources
                    .ensure_directory(&DirectorySpec::new(parent).recursive())
                    .map_err(LifecycleError::resource(Step::Format))?;
            }
        }
        let pid = std::process::id().to_string();
        let acquired = resources
            .try_lock(path, pid.as_bytes())
            .map_err(LifecycleError::resource(Step::Format))?;
        if acquired {
            return Ok(Self {
                path: path.to_path_buf(),
                resources,
            });
        }
        let owner = resources
            .read_file(path)
            .map_err(LifecycleError::resource(Step::Format))?
            .and_then(|raw| parse_owner(&raw));
        let holder = match owner {
            Some(owner) => format!("process {owner}"),
            None => "another process".to_owned(),
        };
        Err(LifecycleError::FormattingFailed {
            reason: format!("format lock {} is held by {}", path.display(), holder),
            source: None,
        })
    }
}

impl Drop for FormatLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.resources.unlock(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "failed to release format lock");
        }
    }
}

fn parse_owner(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
}
