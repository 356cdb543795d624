//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Shared primitives and utilities for the lifecycle controller."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use serde::Serialize;

/// Build metadata reported by `nnlctl --version`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub semver: String,
    pub profile: String,
    pub target_os: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            profile: if cfg!(debug_assertions) {
                "debug".to_owned()
            } else {
                "release".to_owned()
            },
            target_os: std::env::consts::OS.to_owned(),
        }
    }

    /// Short form used in log lines.
    pub fn cli_string(&self) -> String {
        format!("nnl {}", self.semver)
    }

    /// Multi-field form printed by `--version`.
    pub fn extended(&self) -> String {
        format!(
            "nnl {} (profile={}, os={})",
            self.semver, self.profile, self.target_os
        )
    }
}
