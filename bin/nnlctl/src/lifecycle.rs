//! ---
//! nnl_section: "05-external-interfaces"
//! nnl_subsection: "binary"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Control CLI applying lifecycle actions to the local metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use nnl_common::config::AppConfig;
use nnl_core::{new_registry, LifecycleController, LifecycleMetrics, StepStatus};
use tracing::warn;

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// One of configure, start, stop, decommission.
    #[arg(value_name = "ACTION")]
    pub action: String,

    /// Format the name directories even if already formatted (start only, destructive).
    #[arg(long)]
    pub format: bool,
}

fn controller(config: AppConfig) -> Result<(LifecycleController, Option<LifecycleMetrics>)> {
    let controller = LifecycleController::local(config.node);
    if config.metrics.textfile.is_none() {
        return Ok((controller, None));
    }
    let metrics = LifecycleMetrics::new(new_registry()).context("failed to register metrics")?;
    Ok((controller.with_metrics(metrics.clone()), Some(metrics)))
}

pub fn apply(config: AppConfig, args: &ApplyArgs) -> Result<()> {
    let textfile = config.metrics.textfile.clone();
    let (controller, metrics) = controller(config)?;
    let result = controller.apply_raw(&args.action, args.format);

    if let (Some(path), Some(metrics)) = (&textfile, &metrics) {
        if let Err(err) = write_textfile(path, metrics) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "unable to write metrics textfile");
        }
    }

    let report = result.with_context(|| format!("action `{}` failed", args.action.trim()))?;
    println!("{}: ok", report.action);
    for record in &report.steps {
        let status = match record.status {
            StepStatus::Completed => "done",
            StepStatus::Skipped => "skipped",
        };
        println!("  {:<16} {:<8} {}", record.step.as_str(), status, record.detail);
    }
    Ok(())
}

pub fn state(config: AppConfig) -> Result<()> {
    let (controller, _) = controller(config)?;
    let state = controller.observe().context("failed to observe node state")?;
    println!("{}", state);
    Ok(())
}

fn write_textfile(path: &Path, metrics: &LifecycleMetrics) -> Result<()> {
    let body = metrics.render().context("failed to encode metrics")?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    fs::write(&staging, body)
        .with_context(|| format!("failed to write {}", Path::new(&staging).display()))?;
    if let Err(err) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(err).with_context(|| format!("failed to move metrics into {}", path.display()));
    }
    Ok(())
}
