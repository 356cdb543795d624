//! ---
//! nnl_section: "03-logging"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Structured lifecycle logging adapters."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Context-carrying logging helpers shared by the controller and the CLI.

use tracing::Level;

pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Node identifier (HA namenode id or host).
    pub node: Option<&'a str>,
    /// Lifecycle action being applied.
    pub action: Option<&'a str>,
    /// Step within the action.
    pub step: Option<&'a str>,
    /// Attempt counter for retried steps.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node identifier.
    pub fn with_node(mut self, node: &'a str) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach the action name.
    pub fn with_action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach the step name.
    pub fn with_step(mut self, step: &'a str) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach an attempt counter.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    /// Label used for the `outcome` field and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized system event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    // `tracing::event!` needs a constant level.
    match outcome {
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            action = ctx.action.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
    }
}
