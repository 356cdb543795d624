//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::command::{shell_quote, CommandRunner, ExecError, ExecOutcome, ExecRequest};
use crate::resource::{DirectorySpec, ResourceError, ResourceProvider};

/// A daemon managed through its PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    pub name: String,
    pub user: String,
    pub pid_dir: PathBuf,
    pub log_dir: PathBuf,
    pub create_pid_dir: bool,
    pub create_log_dir: bool,
}

impl DaemonSpec {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        pid_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            pid_dir: pid_dir.into(),
            log_dir: log_dir.into(),
            create_pid_dir: false,
            create_log_dir: false,
        }
    }

    pub fn creating_dirs(mut self) -> Self {
        self.create_pid_dir = true;
        self.create_log_dir = true;
        self
    }

    /// `hadoop-<user>-<name>.pid` inside the PID directory.
    pub fn pid_file(&self) -> PathBuf {
        self.pid_dir
            .join(format!("hadoop-{}-{}.pid", self.user, self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonOutcome {
    Started,
    AlreadyRunning,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Command(#[from] ExecError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Starts and stops long-running daemons.
pub trait ServiceManager: Send + Sync {
    fn start(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError>;

    fn stop(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError>;

    fn is_running(&self, spec: &DaemonSpec) -> Result<bool, ServiceError>;
}

/// [`ServiceManager`] driving `hadoop-daemon.sh`.
pub struct HadoopDaemonManager {
    runner: Arc<dyn CommandRunner>,
    resources: Arc<dyn ResourceProvider>,
    daemon_script: PathBuf,
    conf_dir: PathBuf,
}

impl HadoopDaemonManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resources: Arc<dyn ResourceProvider>,
        daemon_script: impl Into<PathBuf>,
        conf_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            resources,
            daemon_script: daemon_script.into(),
            conf_dir: conf_dir.into(),
        }
    }

    fn daemon_command(&self, verb: &str, spec: &DaemonSpec) -> ExecRequest {
        ExecRequest::new(format!(
            "{} --config {} {} {}",
            shell_quote(&self.daemon_script.display().to_string()),
            shell_quote(&self.conf_dir.display().to_string()),
            verb,
            shell_quote(&spec.name)
        ))
        .as_user(spec.user.clone())
    }

    /// Exits zero while the PID file names a live process.
    pub fn process_check(spec: &DaemonSpec) -> ExecRequest {
        let pid_file = shell_quote(&spec.pid_file().display().to_string());
        ExecRequest::new(format!(
            "ls {pid} >/dev/null 2>&1 && ps -p `cat {pid}` >/dev/null 2>&1",
            pid = pid_file
        ))
    }

    fn ensure_dir(&self, dir: &Path, spec: &DaemonSpec) -> Result<(), ResourceError> {
        let mut dir_spec = DirectorySpec::new(dir).recursive();
        dir_spec.owner = Some(spec.user.clone());
        self.resources.ensure_directory(&dir_spec)
    }
}

impl ServiceManager for HadoopDaemonManager {
    fn start(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError> {
        if spec.create_pid_dir {
            self.ensure_dir(&spec.pid_dir, spec)?;
        }
        if spec.create_log_dir {
            self.ensure_dir(&spec.log_dir, spec)?;
        }
        let request = self
            .daemon_command("start", spec)
            .not_if(Self::process_check(spec));
        match self.runner.run(&request)? {
            ExecOutcome::Skipped(_) => {
                info!(daemon = %spec.name, pid_file = %spec.pid_file().display(), "daemon already running");
                Ok(DaemonOutcome::AlreadyRunning)
            }
            ExecOutcome::Completed { .. } => {
                info!(daemon = %spec.name, user = %spec.user, "daemon started");
                Ok(DaemonOutcome::Started)
            }
        }
    }

    fn stop(&self, spec: &DaemonSpec) -> Result<DaemonOutcome, ServiceError> {
        let result = self.runner.run(&self.daemon_command("stop", spec));
        let pid_file = spec.pid_file();
        if let Err(err) = self.resources.remove_file(&pid_file) {
            warn!(pid_file = %pid_file.display(), error = %err, "unable to remove pid file");
        }
        result?;
        info!(daemon = %spec.name, "daemon stopped");
        Ok(DaemonOutcome::Stopped)
    }

    fn is_running(&self, spec: &DaemonSpec) -> Result<bool, ServiceError> {
        Ok(self.runner.probe(&Self::process_check(spec))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_follows_hadoop_naming() {
        let spec = DaemonSpec::new("namenode", "hdfs", "/var/run/hadoop/hdfs", "/var/log/hadoop/hdfs");
        assert_eq!(
            spec.pid_file(),
            PathBuf::from("/var/run/hadoop/hdfs/hadoop-hdfs-namenode.pid")
        );
    }

    #[test]
    fn process_check_reads_pid_file() {
        let spec = DaemonSpec::new("namenode", "hdfs", "/run/h", "/log/h");
        let check = HadoopDaemonManager::process_check(&spec);
        assert_eq!(
            check.command(),
            "ls /run/h/hadoop-hdfs-namenode.pid >/dev/null 2>&1 && ps -p `cat /run/h/hadoop-hdfs-namenode.pid` >/dev/null 2>&1"
        );
    }
}
