//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use nnl_common::NodeConfig;
use nnl_exec::{shell_quote, CommandRunner, ExecRequest};
use tracing::info;

use crate::action::Step;
use crate::error::LifecycleError;

/// Obtains Kerberos credentials for the service user.
#[derive(Debug, Clone)]
pub struct Authenticator {
    request: Option<ExecRequest>,
    principal: String,
}

impl Authenticator {
    /// Fails when security is enabled without a keytab to authenticate with.
    pub fn from_config(node: &NodeConfig) -> Result<Self, LifecycleError> {
        let principal = node.principal().to_owned();
        if !node.security.enabled {
            return Ok(Self {
                request: None,
                principal,
            });
        }
        let Some(keytab) = &node.security.keytab else {
            return Err(LifecycleError::Misconfigured {
                step: Step::Authenticate,
                reason: format!("security is enabled but no keytab is set for `{principal}`"),
            });
        };
        let request = ExecRequest::new(format!(
            "{} -kt {} {}",
            shell_quote(&node.security.kinit_path.display().to_string()),
            shell_quote(&keytab.display().to_string()),
            shell_quote(&principal)
        ))
        .as_user(node.user.clone());
        Ok(Self {
            request: Some(request),
            principal,
        })
    }

    /// `kinit` invocation, `None` when security is disabled.
    pub fn request(&self) -> Option<&ExecRequest> {
        self.request.as_ref()
    }

    /// Run `kinit`; returns `false` when there was nothing to do.
    pub fn authenticate(&self, runner: &dyn CommandRunner) -> Result<bool, LifecycleError> {
        let Some(request) = &self.request else {
            return Ok(false);
        };
        runner
            .run(request)
            .map_err(|source| LifecycleError::AuthenticationFailed {
                principal: self.principal.clone(),
                source,
            })?;
        info!(principal = %self.principal, "obtained kerberos ticket");
        Ok(true)
    }
}
