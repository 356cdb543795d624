//! ---
//! nnl_section: "15-testing-qa-runbook"
//! nnl_subsection: "integration-tests"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Cross-crate integration tests for NN-Lifecycle."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use nix::unistd::{getgid, getuid, Group, User};
use nnl_common::NodeConfig;
use nnl_core::{Action, LifecycleController, LifecycleError, LifecycleState, Step};
use nnl_exec::mock::{RecordingServices, ScriptedRunner};
use nnl_exec::{LocalResources, ResourceProvider};

struct Node {
    controller: LifecycleController,
    runner: Arc<ScriptedRunner>,
}

fn node_config(root: &Path) -> NodeConfig {
    let mut node = NodeConfig::default();
    node.user = User::from_uid(getuid()).unwrap().unwrap().name;
    node.group = Group::from_gid(getgid()).unwrap().unwrap().name;
    node.name_dirs = vec![root.join("nn/1"), root.join("nn/2")];
    node.name_dir_mode = 0o700;
    node.exclude.path = root.join("dfs.exclude");
    node.exclude.hosts = vec!["dn4.example.com".into()];
    node.markers.current = root.join("state/formatted");
    node.markers.legacy = Some(root.join("run/namenode-formatted"));
    node.pid_dir_prefix = root.join("pids");
    node.log_dir_prefix = root.join("logs");
    node
}

fn assert_lock_free(path: &Path) {
    let other = LocalResources::new();
    assert!(other.try_lock(path, b"0").unwrap(), "{} still locked", path.display());
    other.unlock(path).unwrap();
}

fn local_node(config: NodeConfig) -> Node {
    let runner = Arc::new(ScriptedRunner::new());
    let controller = LifecycleController::new(
        config,
        runner.clone(),
        Arc::new(LocalResources::new()),
        Arc::new(RecordingServices::new()),
    );
    Node { controller, runner }
}

#[test]
fn configure_start_and_restart_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    node.runner.respond("-safemode get", [1, 1, 0]);

    node.controller.apply(Action::Configure, false).unwrap();
    for dir in &node.controller.config().name_dirs {
        let mode = fs::metadata(dir).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700);
    }
    assert_eq!(node.controller.observe().unwrap(), LifecycleState::Configured);

    let report = node.controller.apply(Action::Start, false).unwrap();
    assert!(report.ran(Step::Format));
    assert!(temp.path().join("state/formatted").is_dir());
    assert_lock_free(&temp.path().join("state/formatted.lock"));
    assert_eq!(
        fs::read_to_string(temp.path().join("dfs.exclude")).unwrap(),
        "dn4.example.com\n"
    );
    assert_eq!(node.runner.count("-safemode get"), 3);

    // The format step wrote into the name directory; the marker now guards it.
    fs::write(temp.path().join("nn/1/VERSION"), "layoutVersion=-63").unwrap();
    node.controller.apply(Action::Start, false).unwrap();
    assert_eq!(node.runner.count("namenode -format"), 1);
}

#[test]
fn populated_name_dir_without_marker_is_not_formatted() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    node.controller.apply(Action::Configure, false).unwrap();
    fs::create_dir_all(temp.path().join("nn/2/current")).unwrap();

    let err = node.controller.apply(Action::Start, false).unwrap_err();
    match err {
        LifecycleError::FormattingFailed { reason, source } => {
            assert!(reason.contains("nn/2"), "{reason}");
            assert!(source.is_none());
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(node.runner.count("namenode -format"), 0);
    assert_lock_free(&temp.path().join("state/formatted.lock"));
    assert!(!temp.path().join("state/formatted").exists());
}

#[test]
fn lock_file_left_by_dead_process_is_reused() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    fs::create_dir_all(temp.path().join("state")).unwrap();
    fs::write(temp.path().join("state/formatted.lock"), i32::MAX.to_string()).unwrap();

    node.controller.apply(Action::Start, false).unwrap();
    assert_eq!(node.runner.count("namenode -format"), 1);
    assert_eq!(
        fs::read_to_string(temp.path().join("state/formatted.lock")).unwrap(),
        std::process::id().to_string()
    );
    assert_lock_free(&temp.path().join("state/formatted.lock"));
}

#[test]
fn held_lock_on_disk_blocks_format() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    fs::create_dir_all(temp.path().join("state")).unwrap();
    let lock = temp.path().join("state/formatted.lock");
    let holder = LocalResources::new();
    assert!(holder.try_lock(&lock, b"4242").unwrap());

    let err = node.controller.apply(Action::Start, false).unwrap_err();
    match err {
        LifecycleError::FormattingFailed { reason, .. } => {
            assert!(reason.contains("process 4242"), "{reason}");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(node.runner.count("namenode -format"), 0);
    assert_eq!(fs::read_to_string(&lock).unwrap(), "4242");

    holder.unlock(&lock).unwrap();
    node.controller.apply(Action::Start, false).unwrap();
    assert_eq!(node.runner.count("namenode -format"), 1);
}

#[test]
fn legacy_marker_on_disk_is_honoured() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    fs::create_dir_all(temp.path().join("run/namenode-formatted")).unwrap();

    let report = node.controller.apply(Action::Start, false).unwrap();
    assert!(!report.ran(Step::Format));
    assert_eq!(node.runner.count("namenode -format"), 0);
}

#[test]
fn failed_refresh_leaves_exclude_file_updated() {
    let temp = tempfile::tempdir().unwrap();
    let node = local_node(node_config(temp.path()));
    fs::write(temp.path().join("dfs.exclude"), "dn1.example.com\n").unwrap();
    node.runner.respond("-refreshNodes", [1]);

    let err = node
        .controller
        .apply(Action::Decommission, false)
        .unwrap_err();
    match err {
        LifecycleError::RefreshCommandFailed { command, .. } => {
            assert!(command.ends_with("dfsadmin -refreshNodes"), "{command}");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(
        fs::read_to_string(temp.path().join("dfs.exclude")).unwrap(),
        "dn4.example.com\n"
    );
}
