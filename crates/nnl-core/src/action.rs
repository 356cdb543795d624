//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use crate::error::LifecycleError;

/// Lifecycle transition requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Configure,
    Start,
    Stop,
    Decommission,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Configure,
        Action::Start,
        Action::Stop,
        Action::Decommission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Configure => "configure",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Decommission => "decommission",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LifecycleError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| LifecycleError::UnsupportedAction(raw.to_owned()))
    }
}

/// Where the node sits in its lifecycle. Inferred on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Stopped,
    Starting,
    Active,
    Decommissioning,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configured => "configured",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Active => "active",
            LifecycleState::Decommissioning => "decommissioning",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual step of an action, used in reports and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    NameDirectories,
    Format,
    ExcludeFile,
    DaemonStart,
    DaemonStop,
    Authenticate,
    Readiness,
    ProvisionDfs,
    RefreshNodes,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::NameDirectories => "name-directories",
            Step::Format => "format",
            Step::ExcludeFile => "exclude-file",
            Step::DaemonStart => "daemon-start",
            Step::DaemonStop => "daemon-stop",
            Step::Authenticate => "authenticate",
            Step::Readiness => "readiness",
            Step::ProvisionDfs => "provision-dfs",
            Step::RefreshNodes => "refresh-nodes",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_actions() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert_eq!(" Start ".parse::<Action>().unwrap(), Action::Start);
    }

    #[test]
    fn rejects_unknown_action() {
        let err = "restart".parse::<Action>().unwrap_err();
        assert!(matches!(err, LifecycleError::UnsupportedAction(ref raw) if raw == "restart"));
        assert!(err.to_string().contains("restart"));
    }
}
