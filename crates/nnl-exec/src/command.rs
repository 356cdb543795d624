//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

/// A shell command plus the execution policy wrapped around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    command: String,
    user: Option<String>,
    tries: u32,
    try_sleep: Duration,
    only_if: Option<Box<ExecRequest>>,
    not_if: Option<Box<ExecRequest>>,
    search_path: Vec<PathBuf>,
    environment: IndexMap<String, String>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            user: None,
            tries: 1,
            try_sleep: Duration::ZERO,
            only_if: None,
            not_if: None,
            search_path: Vec::new(),
            environment: IndexMap::new(),
        }
    }

    /// Run through a login shell of `user`.
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    pub fn with_try_sleep(mut self, try_sleep: Duration) -> Self {
        self.try_sleep = try_sleep;
        self
    }

    /// Only run when `guard` exits zero.
    pub fn only_if(mut self, guard: ExecRequest) -> Self {
        self.only_if = Some(Box::new(guard));
        self
    }

    /// Skip when `guard` exits zero.
    pub fn not_if(mut self, guard: ExecRequest) -> Self {
        self.not_if = Some(Box::new(guard));
        self
    }

    /// Replace `PATH` with the given directories.
    pub fn with_search_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn try_sleep(&self) -> Duration {
        self.try_sleep
    }

    pub fn only_if_guard(&self) -> Option<&ExecRequest> {
        self.only_if.as_deref()
    }

    pub fn not_if_guard(&self) -> Option<&ExecRequest> {
        self.not_if.as_deref()
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn environment(&self) -> &IndexMap<String, String> {
        &self.environment
    }

    /// Shell text handed to `sh -c`, with `PATH` and environment exports prepended.
    pub fn script(&self) -> String {
        let mut script = String::new();
        if !self.search_path.is_empty() {
            let joined = self
                .search_path
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(":");
            script.push_str(&format!("export PATH={}; ", shell_quote(&joined)));
        }
        for (key, value) in &self.environment {
            script.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
        script.push_str(&self.command);
        script
    }
}

impl fmt::Display for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "[{}] {}", user, self.command),
            None => f.write_str(&self.command),
        }
    }
}

/// Quote `raw` for inclusion in a POSIX shell word.
pub fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=,@+".contains(c))
    {
        return raw.to_owned();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Captured result of a single command attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OnlyIfFailed,
    NotIfSatisfied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed { attempts: u32, output: CommandOutput },
    Skipped(SkipReason),
}

impl ExecOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ExecOutcome::Skipped(_))
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {} after {attempts} attempt(s): {}", describe_code(.code), trimmed(.stderr))]
    Failed {
        command: String,
        code: Option<i32>,
        attempts: u32,
        stderr: String,
    },
}

impl ExecError {
    /// Command text the error refers to.
    pub fn command(&self) -> &str {
        match self {
            ExecError::Spawn { command, .. } | ExecError::Failed { command, .. } => command,
        }
    }
}

fn trimmed(raw: &str) -> &str {
    raw.trim()
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_owned(),
    }
}

/// Runs shell commands on behalf of the controller.
///
/// Implementors only provide [`CommandRunner::spawn`]; guard evaluation and the
/// retry loop are shared.
pub trait CommandRunner: Send + Sync {
    /// Execute exactly one attempt of `request`, ignoring its guards and retry policy.
    fn spawn(&self, request: &ExecRequest) -> Result<CommandOutput, ExecError>;

    /// Block between attempts.
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    /// Evaluate a predicate command; a non-zero exit is `false`, not an error.
    fn probe(&self, predicate: &ExecRequest) -> Result<bool, ExecError> {
        Ok(self.spawn(predicate)?.success())
    }

    /// Execute `request` honouring `only_if`, `not_if`, `tries` and `try_sleep`.
    fn run(&self, request: &ExecRequest) -> Result<ExecOutcome, ExecError> {
        if let Some(guard) = request.only_if_guard() {
            if !self.probe(guard)? {
                debug!(command = %request, guard = %guard, "only_if guard failed; skipping");
                return Ok(ExecOutcome::Skipped(SkipReason::OnlyIfFailed));
            }
        }
        if let Some(guard) = request.not_if_guard() {
            if self.probe(guard)? {
                debug!(command = %request, guard = %guard, "not_if guard satisfied; skipping");
                return Ok(ExecOutcome::Skipped(SkipReason::NotIfSatisfied));
            }
        }

        let tries = request.tries().max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = self.spawn(request)?;
            if output.success() {
                return Ok(ExecOutcome::Completed {
                    attempts: attempt,
                    output,
                });
            }
            if attempt >= tries {
                return Err(ExecError::Failed {
                    command: request.to_string(),
                    code: output.code,
                    attempts: attempt,
                    stderr: output.stderr,
                });
            }
            warn!(command = %request, attempt, tries, code = ?output.code, "command failed; retrying");
            self.pause(request.try_sleep());
        }
    }
}
