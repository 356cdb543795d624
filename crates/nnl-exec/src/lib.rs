//! ---
//! nnl_section: "02-host-capabilities"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Command execution, file resources, and daemon control."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! Capabilities the lifecycle controller consumes from the host.
//!
//! Each capability is a trait with one local implementation (shell, filesystem,
//! `hadoop-daemon.sh`) and one in-memory implementation under [`mock`].

pub mod command;
pub mod mock;
pub mod resource;
pub mod service;
pub mod shell;

pub use command::{
    shell_quote, CommandOutput, CommandRunner, ExecError, ExecOutcome, ExecRequest, SkipReason,
};
pub use resource::{
    DirectorySpec, FileContent, FileSpec, LocalResources, ResourceError, ResourceProvider,
};
pub use service::{DaemonOutcome, DaemonSpec, HadoopDaemonManager, ServiceError, ServiceManager};
pub use shell::ShellRunner;
