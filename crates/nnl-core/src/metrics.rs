//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Shared registry type used across the controller and the CLI.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Counters and histograms recorded while applying actions.
#[derive(Clone)]
pub struct LifecycleMetrics {
    registry: SharedRegistry,
    actions_total: IntCounterVec,
    format_runs_total: IntCounter,
    readiness_attempts: Histogram,
}

impl LifecycleMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self, prometheus::Error> {
        let actions_total = IntCounterVec::new(
            Opts::new("nnl_actions_total", "Lifecycle actions applied, by outcome"),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        let format_runs_total = IntCounter::with_opts(Opts::new(
            "nnl_format_runs_total",
            "Times the name directories were formatted",
        ))?;
        registry.register(Box::new(format_runs_total.clone()))?;

        let readiness_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "nnl_readiness_attempts",
                "Safe-mode checks needed before the node became ready",
            )
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 10.0, 20.0, 40.0]),
        )?;
        registry.register(Box::new(readiness_attempts.clone()))?;

        Ok(Self {
            registry,
            actions_total,
            format_runs_total,
            readiness_attempts,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_action(&self, action: &str, outcome: &str) {
        self.actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn record_format(&self) {
        self.format_runs_total.inc();
    }

    pub fn observe_readiness(&self, attempts: u32) {
        self.readiness_attempts.observe(f64::from(attempts));
    }

    pub fn action_count(&self, action: &str, outcome: &str) -> u64 {
        self.actions_total
            .with_label_values(&[action, outcome])
            .get()
    }

    pub fn format_runs(&self) -> u64 {
        self.format_runs_total.get()
    }

    /// Registry contents in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_values() {
        let metrics = LifecycleMetrics::new(new_registry()).unwrap();
        metrics.record_action("start", "success");
        metrics.record_format();
        metrics.observe_readiness(3);
        let text = metrics.render().unwrap();
        assert!(text.contains("nnl_actions_total{action=\"start\",outcome=\"success\"} 1"));
        assert!(text.contains("nnl_format_runs_total 1"));
        assert!(text.contains("nnl_readiness_attempts_count 1"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        LifecycleMetrics::new(registry.clone()).unwrap();
        assert!(LifecycleMetrics::new(registry).is_err());
    }
}
