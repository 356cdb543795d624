//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Shared primitives and utilities for the lifecycle controller."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! Shared primitives for the NN-Lifecycle workspace.
//! This crate exposes the node configuration snapshot, its loader, tracing
//! setup and version metadata consumed by the controller and the CLI.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, ExcludeConfig, HaConfig, LoadedAppConfig, LoggingConfig, MarkerConfig,
    MetricsConfig, NodeConfig, ProvisioningConfig, ReadinessConfig, SecurityConfig,
};
pub use logging::{filter_directive, init_tracing, FilterSource, LogFormat, LogGuard};
pub use version::VersionInfo;
