//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::trace;

use crate::command::{CommandOutput, CommandRunner, ExecError, ExecRequest};

/// [`CommandRunner`] backed by `/bin/sh`, switching users through `su`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
    login_shell: PathBuf,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            login_shell: PathBuf::from("/bin/bash"),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the shell used for commands without a target user.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Override the login shell passed to `su -s`.
    pub fn with_login_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.login_shell = shell.into();
        self
    }

    fn build(&self, request: &ExecRequest) -> Command {
        let script = request.script();
        match request.user() {
            Some(user) => {
                let mut command = Command::new("su");
                command
                    .arg("-s")
                    .arg(&self.login_shell)
                    .arg("-")
                    .arg(user)
                    .arg("-c")
                    .arg(script);
                command
            }
            None => {
                let mut command = Command::new(&self.shell);
                command.arg("-c").arg(script);
                command
            }
        }
    }
}

impl CommandRunner for ShellRunner {
    fn spawn(&self, request: &ExecRequest) -> Result<CommandOutput, ExecError> {
        trace!(command = %request, "spawning");
        let output = self
            .build(request)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ExecError::Spawn {
                command: request.to_string(),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
