//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use nnl_common::ReadinessConfig;
use nnl_exec::{CommandRunner, ExecError, ExecOutcome, ExecRequest};
use tracing::{debug, info};

use crate::action::Step;
use crate::error::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    /// The gate reported this node is not the active HA member.
    SkippedNotActive,
}

/// Blocks until the node reports safe mode off, with bounded retries.
pub struct ReadinessPoller<'a> {
    runner: &'a dyn CommandRunner,
    check: ExecRequest,
}

impl<'a> ReadinessPoller<'a> {
    /// `check` is a single attempt of the health command; the policy adds retries.
    pub fn new(runner: &'a dyn CommandRunner, check: ExecRequest, policy: &ReadinessConfig) -> Self {
        Self {
            runner,
            check: check
                .with_tries(policy.tries)
                .with_try_sleep(policy.interval),
        }
    }

    pub fn check(&self) -> &ExecRequest {
        &self.check
    }

    /// Poll until ready. A gate that fails skips polling entirely.
    pub fn wait_until_ready(
        &self,
        gate: Option<&ExecRequest>,
    ) -> Result<ReadinessOutcome, LifecycleError> {
        let request = match gate {
            Some(gate) => self.check.clone().only_if(gate.clone()),
            None => self.check.clone(),
        };
        match self.runner.run(&request) {
            Ok(ExecOutcome::Completed { attempts, .. }) => {
                debug!(attempts, "node left safe mode");
                Ok(ReadinessOutcome::Ready { attempts })
            }
            Ok(ExecOutcome::Skipped(_)) => {
                info!("node is not the active HA member; skipping readiness poll");
                Ok(ReadinessOutcome::SkippedNotActive)
            }
            Err(ExecError::Failed { attempts, .. }) => Err(LifecycleError::ReadinessTimeout {
                attempts,
                command: request.command().to_owned(),
            }),
            Err(source) => Err(LifecycleError::Command {
                step: Step::Readiness,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nnl_exec::mock::ScriptedRunner;

    fn policy() -> ReadinessConfig {
        ReadinessConfig {
            tries: 4,
            interval: Duration::from_secs(10),
        }
    }

    #[test]
    fn exhausting_tries_is_a_timeout() {
        let runner = ScriptedRunner::new();
        runner.respond("safemode", [1]);
        let poller = ReadinessPoller::new(&runner, ExecRequest::new("safemode get"), &policy());
        let err = poller.wait_until_ready(None).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ReadinessTimeout { attempts: 4, ref command } if command == "safemode get"
        ));
        assert_eq!(runner.pauses().len(), 3);
    }

    #[test]
    fn passing_gate_polls() {
        let runner = ScriptedRunner::new();
        runner.respond("safemode", [1, 0]);
        let poller = ReadinessPoller::new(&runner, ExecRequest::new("safemode get"), &policy());
        let outcome = poller
            .wait_until_ready(Some(&ExecRequest::new("haadmin")))
            .unwrap();
        assert_eq!(outcome, ReadinessOutcome::Ready { attempts: 2 });
        assert_eq!(runner.count("haadmin"), 1);
    }
}
