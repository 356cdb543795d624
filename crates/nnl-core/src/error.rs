//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use nnl_exec::{ExecError, ResourceError, ServiceError};
use thiserror::Error;

use crate::action::Step;

/// Every way an action can fail. Each failure aborts the remaining steps.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unsupported action `{0}`; expected configure, start, stop or decommission")]
    UnsupportedAction(String),
    #[error("formatting failed: {reason}")]
    FormattingFailed {
        reason: String,
        #[source]
        source: Option<ExecError>,
    },
    #[error("kinit for principal `{principal}` failed")]
    AuthenticationFailed {
        principal: String,
        #[source]
        source: ExecError,
    },
    #[error("node did not leave safe mode after {attempts} attempt(s) of `{command}`")]
    ReadinessTimeout { attempts: u32, command: String },
    #[error("refresh command `{command}` failed")]
    RefreshCommandFailed {
        command: String,
        #[source]
        source: ExecError,
    },
    #[error("step {step} cannot run: {reason}")]
    Misconfigured { step: Step, reason: String },
    #[error("step {step} failed")]
    Resource {
        step: Step,
        #[source]
        source: ResourceError,
    },
    #[error("step {step} failed")]
    Command {
        step: Step,
        #[source]
        source: ExecError,
    },
    #[error("step {step} failed")]
    Daemon {
        step: Step,
        #[source]
        source: ServiceError,
    },
    #[error("failed to render exclude file")]
    Render(#[from] askama::Error),
}

impl LifecycleError {
    pub(crate) fn resource(step: Step) -> impl FnOnce(ResourceError) -> Self {
        move |source| LifecycleError::Resource { step, source }
    }

    pub(crate) fn command(step: Step) -> impl FnOnce(ExecError) -> Self {
        move |source| LifecycleError::Command { step, source }
    }

    pub(crate) fn daemon(step: Step) -> impl FnOnce(ServiceError) -> Self {
        move |source| LifecycleError::Daemon { step, source }
    }

    /// Step the failure happened in, if it happened inside an action.
    pub fn step(&self) -> Option<Step> {
        match self {
            LifecycleError::UnsupportedAction(_) => None,
            LifecycleError::FormattingFailed { .. } => Some(Step::Format),
            LifecycleError::AuthenticationFailed { .. } => Some(Step::Authenticate),
            LifecycleError::ReadinessTimeout { .. } => Some(Step::Readiness),
            LifecycleError::RefreshCommandFailed { .. } => Some(Step::RefreshNodes),
            LifecycleError::Misconfigured { step, .. }
            | LifecycleError::Resource { step, .. }
            | LifecycleError::Command { step, .. }
            | LifecycleError::Daemon { step, .. } => Some(*step),
            LifecycleError::Render(_) => Some(Step::ExcludeFile),
        }
    }
}
