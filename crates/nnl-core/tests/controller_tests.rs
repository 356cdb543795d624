//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Primary lifecycle control for the metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nnl_common::NodeConfig;
use nnl_core::{
    new_registry, Action, LifecycleController, LifecycleError, LifecycleMetrics, LifecycleState,
    Step, StepStatus,
};
use nnl_exec::mock::{MemoryResources, RecordingServices, ScriptedRunner, ServiceCall};

const FORMAT: &str = "namenode -format";
const SAFEMODE: &str = "dfsadmin -safemode get";
const HAADMIN: &str = "haadmin -getServiceState";
const KINIT: &str = "kinit";
const PROVISION: &str = "fs -mkdir";
const REFRESH: &str = "-refreshNodes";

struct Harness {
    controller: LifecycleController,
    runner: Arc<ScriptedRunner>,
    resources: Arc<MemoryResources>,
    services: Arc<RecordingServices>,
}

fn node() -> NodeConfig {
    let mut node = NodeConfig::default();
    node.name_dirs = vec![PathBuf::from("/data/1/nn"), PathBuf::from("/data/2/nn")];
    node.exclude.hosts = vec!["dn7.example.com".into(), "dn9.example.com".into()];
    node
}

fn ha_node() -> NodeConfig {
    let mut node = node();
    node.ha.enabled = true;
    node.ha.namenode_id = Some("nn2".into());
    node.ha.rpc_address = Some("nn2.example.com:8020".into());
    node
}

fn secure(mut node: NodeConfig) -> NodeConfig {
    node.security.enabled = true;
    node.security.keytab = Some(PathBuf::from("/etc/security/keytabs/hdfs.headless.keytab"));
    node
}

fn harness(node: NodeConfig) -> Harness {
    let runner = Arc::new(ScriptedRunner::new());
    let resources = Arc::new(MemoryResources::new());
    let services = Arc::new(RecordingServices::new());
    let controller =
        LifecycleController::new(node, runner.clone(), resources.clone(), services.clone());
    Harness {
        controller,
        runner,
        resources,
        services,
    }
}

#[test]
fn configure_is_idempotent() {
    let h = harness(node());
    h.controller.apply(Action::Configure, false).unwrap();
    let first: Vec<_> = h
        .controller
        .config()
        .name_dirs
        .iter()
        .map(|dir| h.resources.directory(dir).unwrap())
        .collect();
    let writes = h.resources.directory_writes();

    let report = h.controller.apply(Action::Configure, false).unwrap();
    let second: Vec<_> = h
        .controller
        .config()
        .name_dirs
        .iter()
        .map(|dir| h.resources.directory(dir).unwrap())
        .collect();
    assert_eq!(first, second);
    assert_eq!(h.resources.directory_writes(), writes);
    assert_eq!(first[0].owner.as_deref(), Some("hdfs"));
    assert_eq!(first[0].group.as_deref(), Some("hadoop"));
    assert_eq!(first[0].mode, Some(0o755));
    assert!(report.ran(Step::NameDirectories));
    assert!(h.runner.history().is_empty());
}

#[test]
fn start_without_marker_formats_exactly_once() {
    let h = harness(node());
    h.runner.respond(SAFEMODE, [1, 1, 0]);

    let report = h.controller.apply(Action::Start, false).unwrap();
    assert_eq!(h.runner.count(FORMAT), 1);
    assert!(h.resources.has_directory(&h.controller.config().markers.current));
    assert!(report.ran(Step::Format));
    assert_eq!(h.runner.count(SAFEMODE), 3);
    assert_eq!(
        report.step(Step::Readiness).unwrap().detail,
        "ready after 3 attempt(s)"
    );
    assert!(report.ran(Step::ProvisionDfs));
    assert_eq!(h.services.calls(), vec![ServiceCall::Start("namenode".into())]);
    assert_eq!(h.runner.pauses(), vec![Duration::from_secs(10); 2]);

    let order: Vec<Step> = report.steps.iter().map(|record| record.step).collect();
    assert_eq!(
        order,
        vec![
            Step::Format,
            Step::ExcludeFile,
            Step::DaemonStart,
            Step::Authenticate,
            Step::Readiness,
            Step::ProvisionDfs
        ]
    );

    // A second start sees the marker and does not reformat.
    h.controller.apply(Action::Start, false).unwrap();
    assert_eq!(h.runner.count(FORMAT), 1);
}

#[test]
fn either_marker_prevents_formatting() {
    let current = harness(node());
    current
        .resources
        .seed_directory(current.controller.config().markers.current.clone());
    let report = current.controller.apply(Action::Start, false).unwrap();
    assert_eq!(current.runner.count(FORMAT), 0);
    assert_eq!(
        report.step(Step::Format).unwrap().status,
        StepStatus::Skipped
    );

    let legacy = harness(node());
    let legacy_marker = legacy.controller.config().markers.legacy.clone().unwrap();
    legacy.resources.seed_directory(legacy_marker);
    let report = legacy.controller.apply(Action::Start, false).unwrap();
    assert_eq!(legacy.runner.count(FORMAT), 0);
    assert!(report
        .step(Step::Format)
        .unwrap()
        .detail
        .contains("legacy marker"));
    assert!(!legacy
        .resources
        .has_directory(&legacy.controller.config().markers.current));
}

#[test]
fn non_empty_name_dirs_without_marker_refuse_to_format() {
    let h = harness(node());
    h.resources.seed_file("/data/2/nn/current/VERSION", "layoutVersion=-63");
    h.resources.seed_directory("/data/2/nn/current");

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    match err {
        LifecycleError::FormattingFailed { reason, .. } => assert!(reason.contains("/data/2/nn")),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(h.runner.count(FORMAT), 0);
    assert!(h.services.calls().is_empty());
    assert!(!h.resources.is_locked(h.controller.config().format_lock_path()));
}

#[test]
fn failed_format_aborts_start() {
    let h = harness(node());
    h.runner.respond(FORMAT, [1]);

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    assert!(matches!(err, LifecycleError::FormattingFailed { source: Some(_), .. }));
    assert!(!h.resources.has_directory(&h.controller.config().markers.current));
    assert_eq!(h.runner.count(SAFEMODE), 0);
    assert!(h.services.calls().is_empty());
}

#[test]
fn forced_format_runs_even_with_marker() {
    let h = harness(node());
    h.resources
        .seed_directory(h.controller.config().markers.current.clone());

    let report = h.controller.apply(Action::Start, true).unwrap();
    assert_eq!(h.runner.count("namenode -format -force -nonInteractive"), 1);
    assert_eq!(report.step(Step::Format).unwrap().detail, "forced");
}

#[test]
fn ha_never_formats() {
    for forced in [false, true] {
        let h = harness(ha_node());
        h.controller.apply(Action::Start, forced).unwrap();
        assert_eq!(h.runner.count(FORMAT), 0, "forced={forced}");
    }
}

#[test]
fn ha_standby_skips_readiness_and_provisioning() {
    let h = harness(ha_node());
    h.runner.respond(HAADMIN, [1]);

    let report = h.controller.apply(Action::Start, false).unwrap();
    assert_eq!(h.runner.count(FORMAT), 0);
    assert_eq!(h.runner.count(HAADMIN), 1);
    assert_eq!(h.runner.count(SAFEMODE), 0);
    assert_eq!(h.runner.count(PROVISION), 0);
    assert_eq!(
        report.step(Step::Readiness).unwrap().status,
        StepStatus::Skipped
    );
    assert_eq!(
        report.step(Step::ProvisionDfs).unwrap().status,
        StepStatus::Skipped
    );
    assert!(report.ran(Step::DaemonStart));
}

#[test]
fn ha_state_is_rechecked_before_provisioning() {
    let h = harness(ha_node());
    h.controller.apply(Action::Start, false).unwrap();
    assert_eq!(h.runner.count(HAADMIN), 2);
    assert_eq!(h.runner.count(PROVISION), 1);

    // Failover between the safe-mode wait and provisioning.
    let h = harness(ha_node());
    h.runner.respond(HAADMIN, [0, 1]);
    let report = h.controller.apply(Action::Start, false).unwrap();
    assert_eq!(h.runner.count(HAADMIN), 2);
    assert_eq!(h.runner.count(PROVISION), 0);
    assert_eq!(
        report.step(Step::Readiness).unwrap().status,
        StepStatus::Completed
    );
    assert_eq!(
        report.step(Step::ProvisionDfs).unwrap().status,
        StepStatus::Skipped
    );
}

#[test]
fn ha_active_polls_between_one_and_forty_times() {
    let h = harness(ha_node());
    h.runner.respond(SAFEMODE, [1, 1, 1, 1, 0]);

    h.controller.apply(Action::Start, false).unwrap();
    let attempts = h.runner.count(SAFEMODE);
    assert!((1..=40).contains(&attempts));
    assert_eq!(attempts, 5);
    assert_eq!(h.runner.count(PROVISION), 1);
}

#[test]
fn readiness_timeout_after_forty_attempts() {
    let h = harness(node());
    h.runner.respond(SAFEMODE, [1]);

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    match err {
        LifecycleError::ReadinessTimeout { attempts, command } => {
            assert_eq!(attempts, 40);
            assert!(command.contains("Safe mode is OFF"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(h.runner.count(SAFEMODE), 40);
    assert_eq!(h.runner.count(PROVISION), 0);
    assert_eq!(h.services.calls(), vec![ServiceCall::Start("namenode".into())]);
}

#[test]
fn failed_kinit_stops_before_readiness() {
    let h = harness(secure(node()));
    h.runner.respond(KINIT, [1]);

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    assert!(matches!(err, LifecycleError::AuthenticationFailed { ref principal, .. } if principal == "hdfs"));
    assert_eq!(h.runner.count(SAFEMODE), 0);
    assert_eq!(h.runner.count(PROVISION), 0);
}

#[test]
fn decommission_scopes_refresh_under_ha() {
    let h = harness(secure(ha_node()));
    let report = h.controller.apply(Action::Decommission, false).unwrap();

    let history = h.runner.history();
    let refresh = history
        .iter()
        .find(|invocation| invocation.command.contains(REFRESH))
        .unwrap();
    assert!(refresh
        .command
        .contains("-fs hdfs://nn2.example.com:8020 -refreshNodes"));
    assert_eq!(refresh.user.as_deref(), Some("hdfs"));
    assert!(!refresh.command.contains(KINIT));
    let kinit_at = history
        .iter()
        .position(|invocation| invocation.command.contains(KINIT))
        .unwrap();
    let refresh_at = history
        .iter()
        .position(|invocation| invocation.command.contains(REFRESH))
        .unwrap();
    assert!(kinit_at < refresh_at);
    assert!(report.ran(Step::Authenticate));
}

#[test]
fn decommission_without_ha_is_unscoped() {
    let h = harness(node());
    let report = h.controller.apply(Action::Decommission, false).unwrap();
    let commands = h.runner.commands();
    assert_eq!(
        commands,
        vec!["hadoop --config /etc/hadoop/conf dfsadmin -refreshNodes".to_owned()]
    );
    assert_eq!(
        report.step(Step::Authenticate).unwrap().status,
        StepStatus::Skipped
    );
    let exclude = h.resources.file("/etc/hadoop/conf/dfs.exclude").unwrap();
    assert_eq!(exclude.attributes.owner.as_deref(), Some("hdfs"));
    assert_eq!(exclude.attributes.group.as_deref(), Some("hadoop"));
}

#[test]
fn failed_refresh_keeps_the_new_exclude_file() {
    let h = harness(node());
    h.resources
        .seed_file("/etc/hadoop/conf/dfs.exclude", "old.example.com\n");
    h.runner.respond(REFRESH, [255]);

    let err = h.controller.apply(Action::Decommission, false).unwrap_err();
    assert!(matches!(err, LifecycleError::RefreshCommandFailed { .. }));
    assert_eq!(
        h.resources
            .file_contents("/etc/hadoop/conf/dfs.exclude")
            .unwrap(),
        "dn7.example.com\ndn9.example.com\n"
    );
}

#[test]
fn failed_exclude_write_issues_no_refresh() {
    let h = harness(node());
    h.resources.fail_writes_to("/etc/hadoop/conf/dfs.exclude");

    let err = h.controller.apply(Action::Decommission, false).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Resource {
            step: Step::ExcludeFile,
            ..
        }
    ));
    assert_eq!(h.runner.count(REFRESH), 0);
}

#[test]
fn stop_leaves_markers_and_exclude_file() {
    let h = harness(node());
    h.runner.respond(SAFEMODE, [0]);
    h.controller.apply(Action::Start, false).unwrap();
    let report = h.controller.apply(Action::Stop, true).unwrap();

    assert!(report.ran(Step::DaemonStop));
    assert!(h.resources.has_directory(&h.controller.config().markers.current));
    assert!(h.resources.has_file("/etc/hadoop/conf/dfs.exclude"));
    assert_eq!(
        h.services.calls(),
        vec![
            ServiceCall::Start("namenode".into()),
            ServiceCall::Stop("namenode".into())
        ]
    );
}

#[test]
fn unsupported_action_runs_nothing() {
    let metrics = LifecycleMetrics::new(new_registry()).unwrap();
    let h = harness(node());
    let controller = h.controller.with_metrics(metrics.clone());

    let err = controller.apply_raw("restart", false).unwrap_err();
    assert!(matches!(err, LifecycleError::UnsupportedAction(_)));
    assert!(h.runner.history().is_empty());
    assert!(h.services.calls().is_empty());
    assert_eq!(metrics.action_count("unsupported", "fault"), 1);
}

#[test]
fn metrics_track_actions_and_formats() {
    let metrics = LifecycleMetrics::new(new_registry()).unwrap();
    let h = harness(node());
    let controller = h.controller.with_metrics(metrics.clone());
    h.runner.respond(SAFEMODE, [1]);

    controller.apply(Action::Configure, false).unwrap();
    controller.apply(Action::Start, false).unwrap_err();
    assert_eq!(metrics.action_count("configure", "success"), 1);
    assert_eq!(metrics.action_count("start", "fault"), 1);
    assert_eq!(metrics.format_runs(), 1);
}

#[test]
fn observe_follows_the_lifecycle() {
    let h = harness(node());
    assert_eq!(h.controller.observe().unwrap(), LifecycleState::Unconfigured);

    h.controller.apply(Action::Configure, false).unwrap();
    assert_eq!(h.controller.observe().unwrap(), LifecycleState::Configured);

    h.runner.respond(SAFEMODE, [0]);
    h.controller.apply(Action::Start, false).unwrap();
    // The rendered exclude list is non-empty for this node.
    assert_eq!(
        h.controller.observe().unwrap(),
        LifecycleState::Decommissioning
    );

    h.resources.seed_file("/etc/hadoop/conf/dfs.exclude", "");
    assert_eq!(h.controller.observe().unwrap(), LifecycleState::Active);
    h.runner.respond(SAFEMODE, [1]);
    assert_eq!(h.controller.observe().unwrap(), LifecycleState::Starting);

    h.controller.apply(Action::Stop, false).unwrap();
    assert_eq!(h.controller.observe().unwrap(), LifecycleState::Stopped);
}

#[test]
fn security_without_keytab_fails_before_any_step() {
    let mut node = node();
    node.security.enabled = true;
    node.security.keytab = None;
    let h = harness(node);

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Misconfigured {
            step: Step::Authenticate,
            ..
        }
    ));
    assert_eq!(h.runner.count(KINIT), 0);
    assert_eq!(h.runner.count(FORMAT), 0);
    assert_eq!(h.runner.count(SAFEMODE), 0);
    assert_eq!(h.runner.count(PROVISION), 0);
    assert!(h.services.calls().is_empty());

    let err = h.controller.apply(Action::Decommission, false).unwrap_err();
    assert_eq!(err.step(), Some(Step::Authenticate));
    assert_eq!(h.runner.count(REFRESH), 0);
    assert!(!h.resources.has_file(&h.controller.config().exclude.path));
}

#[test]
fn ha_without_namenode_id_never_polls_or_provisions() {
    let mut node = ha_node();
    node.ha.namenode_id = None;
    let h = harness(node);
    h.runner.respond(HAADMIN, [1]);

    let err = h.controller.apply(Action::Start, false).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Misconfigured {
            step: Step::Readiness,
            ..
        }
    ));
    assert!(h.controller.ha_probe().is_err());
    assert_eq!(h.runner.count(SAFEMODE), 0);
    assert_eq!(h.runner.count(PROVISION), 0);
    assert!(h.services.calls().is_empty());
}

#[test]
fn ha_decommission_without_rpc_address_is_not_widened() {
    let mut node = ha_node();
    node.ha.rpc_address = None;
    let h = harness(node);

    let err = h.controller.apply(Action::Decommission, false).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Misconfigured {
            step: Step::RefreshNodes,
            ..
        }
    ));
    assert_eq!(h.runner.count(REFRESH), 0);
    assert!(!h.resources.has_file(&h.controller.config().exclude.path));
}
