//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
//! Lifecycle controller for the storage service's metadata node.

pub mod action;
pub mod auth;
pub mod commands;
pub mod controller;
pub mod dfs_dirs;
pub mod error;
pub mod exclude;
pub mod format_guard;
pub mod metrics;
pub mod readiness;

pub use action::{Action, LifecycleState, Step};
pub use auth::Authenticator;
pub use commands::{HdfsCommands, FORMAT_SEARCH_PATH};
pub use controller::{ActionReport, LifecycleController, StepRecord, StepStatus};
pub use dfs_dirs::DfsDirectoryBatch;
pub use error::LifecycleError;
pub use exclude::{DecommissionOutcome, ExcludeList, ExcludeListManager};
pub use format_guard::{FormatDecision, FormattingGuard};
pub use metrics::{new_registry, LifecycleMetrics, SharedRegistry};
pub use readiness::{ReadinessOutcome, ReadinessPoller};
