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

use chrono::{DateTime, Utc};
use nnl_common::NodeConfig;
use nnl_exec::{
    CommandRunner, DaemonOutcome, DaemonSpec, DirectorySpec, ExecOutcome, ExecRequest,
    HadoopDaemonManager, LocalResources, ResourceProvider, ServiceManager, ShellRunner,
};
use nnl_logging::{log_system_event, nnl_debug, nnl_info, nnl_warn, LogContext, SystemEventOutcome};

use crate::action::{Action, LifecycleState, Step};
use crate::auth::Authenticator;
use crate::commands::HdfsCommands;
use crate::dfs_dirs::DfsDirectoryBatch;
use crate::error::LifecycleError;
use crate::exclude::{ExcludeList, ExcludeListManager};
use crate::format_guard::{FormatDecision, FormattingGuard};
use crate::metrics::LifecycleMetrics;
use crate::readiness::{ReadinessOutcome, ReadinessPoller};

const DAEMON_NAME: &str = "namenode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Skipped,
}

/// One step an action went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub detail: String,
}

/// Result of a successful action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub action: Action,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

impl ActionReport {
    fn begin(action: Action) -> Self {
        let now = Utc::now();
        Self {
            action,
            started_at: now,
            finished_at: now,
            steps: Vec::new(),
        }
    }

    fn completed(&mut self, step: Step, detail: impl Into<String>) {
        self.push(step, StepStatus::Completed, detail.into());
    }

    fn skipped(&mut self, step: Step, reason: impl Into<String>) {
        self.push(step, StepStatus::Skipped, reason.into());
    }

    fn push(&mut self, step: Step, status: StepStatus, detail: String) {
        let ctx = LogContext::new()
            .with_action(self.action.as_str())
            .with_step(step.as_str());
        nnl_debug!(context = ctx, "step {:?}: {}", status, detail);
        self.steps.push(StepRecord {
            step,
            status,
            detail,
        });
    }

    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.step == step)
    }

    /// Whether `step` ran to completion.
    pub fn ran(&self, step: Step) -> bool {
        self.step(step)
            .map_or(false, |record| record.status == StepStatus::Completed)
    }
}

/// Drives one node through configure, start, stop and decommission.
pub struct LifecycleController {
    config: Arc<NodeConfig>,
    runner: Arc<dyn CommandRunner>,
    resources: Arc<dyn ResourceProvider>,
    services: Arc<dyn ServiceManager>,
    commands: HdfsCommands,
    metrics: Option<LifecycleMetrics>,
}

impl LifecycleController {
    pub fn new(
        config: NodeConfig,
        runner: Arc<dyn CommandRunner>,
        resources: Arc<dyn ResourceProvider>,
        services: Arc<dyn ServiceManager>,
    ) -> Self {
        let commands = HdfsCommands::new(&config.conf_dir);
        Self {
            config: Arc::new(config),
            runner,
            resources,
            services,
            commands,
            metrics: None,
        }
    }

    /// Controller wired to the local shell, filesystem and `hadoop-daemon.sh`.
    pub fn local(config: NodeConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        let resources: Arc<dyn ResourceProvider> = Arc::new(LocalResources::new());
        let services = Arc::new(HadoopDaemonManager::new(
            runner.clone(),
            resources.clone(),
            config.hadoop_sbin_dir.join("hadoop-daemon.sh"),
            &config.conf_dir,
        ));
        Self::new(config, runner, resources, services)
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&LifecycleMetrics> {
        self.metrics.as_ref()
    }

    fn node_label(&self) -> &str {
        self.config.ha.namenode_id.as_deref().unwrap_or(DAEMON_NAME)
    }

    pub fn daemon_spec(&self) -> DaemonSpec {
        DaemonSpec::new(
            DAEMON_NAME,
            self.config.user.clone(),
            self.config.pid_dir(),
            self.config.log_dir(),
        )
    }

    /// Liveness gate: passes only on the active HA member. `None` without HA.
    ///
    /// Under HA a missing namenode id is an error rather than an open gate.
    pub fn ha_probe(&self) -> Result<Option<ExecRequest>, LifecycleError> {
        if !self.config.ha.enabled {
            return Ok(None);
        }
        let id = self.config.ha.namenode_id.as_deref().ok_or_else(|| {
            LifecycleError::Misconfigured {
                step: Step::Readiness,
                reason: "HA is enabled but no namenode id is set for this node".to_owned(),
            }
        })?;
        Ok(Some(
            ExecRequest::new(self.commands.ha_active(id)).as_user(self.config.user.clone()),
        ))
    }

    fn safemode_check(&self) -> ExecRequest {
        ExecRequest::new(self.commands.safemode_off()).as_user(self.config.user.clone())
    }

    /// Parse `raw` and apply it. Unknown actions execute nothing.
    pub fn apply_raw(
        &self,
        raw: &str,
        format_override: bool,
    ) -> Result<ActionReport, LifecycleError> {
        let action = raw.parse::<Action>().map_err(|err| {
            if let Some(metrics) = &self.metrics {
                metrics.record_action("unsupported", SystemEventOutcome::Fault.as_str());
            }
            err
        })?;
        self.apply(action, format_override)
    }

    pub fn apply(
        &self,
        action: Action,
        format_override: bool,
    ) -> Result<ActionReport, LifecycleError> {
        let ctx = LogContext::new()
            .with_node(self.node_label())
            .with_action(action.as_str());
        if format_override && action != Action::Start {
            nnl_warn!(context = ctx.clone(), "format override only applies to start; ignoring");
        }
        nnl_info!(context = ctx.clone(), "applying action");

        let mut report = ActionReport::begin(action);
        let result = match action {
            Action::Configure => self.configure(&mut report),
            Action::Start => self.start(&mut report, format_override, &ctx),
            Action::Stop => self.stop(&mut report),
            Action::Decommission => self.decommission(&mut report),
        };
        report.finished_at = Utc::now();

        let event = format!("lifecycle.{}", action);
        let outcome = match &result {
            Ok(()) => {
                log_system_event(
                    Some(&ctx),
                    &event,
                    &format!("{} step(s) recorded", report.steps.len()),
                    SystemEventOutcome::Success,
                );
                SystemEventOutcome::Success
            }
            Err(err) => {
                let step = err.step().map(|step| step.as_str()).unwrap_or("");
                log_system_event(
                    Some(&ctx.clone().with_step(step)),
                    &event,
                    &format!("{err}"),
                    SystemEventOutcome::Fault,
                );
                SystemEventOutcome::Fault
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_action(action.as_str(), outcome.as_str());
        }
        result.map(|()| report)
    }

    fn configure(&self, report: &mut ActionReport) -> Result<(), LifecycleError> {
        for dir in &self.config.name_dirs {
            let spec = DirectorySpec::new(dir)
                .owned_by(self.config.user.clone(), self.config.group.clone())
                .with_mode(self.config.name_dir_mode)
                .recursive();
            self.resources
                .ensure_directory(&spec)
                .map_err(LifecycleError::resource(Step::NameDirectories))?;
        }
        report.completed(
            Step::NameDirectories,
            format!(
                "{} name director{} at mode {:o}",
                self.config.name_dirs.len(),
                if self.config.name_dirs.len() == 1 { "y" } else { "ies" },
                self.config.name_dir_mode
            ),
        );
        Ok(())
    }

    fn start(
        &self,
        report: &mut ActionReport,
        format_override: bool,
        ctx: &LogContext<'_>,
    ) -> Result<(), LifecycleError> {
        // Settings the later steps depend on are checked before anything runs.
        let auth = Authenticator::from_config(&self.config)?;
        let probe = self.ha_probe()?;

        let guard = FormattingGuard::new(
            &self.config,
            self.runner.as_ref(),
            self.resources.as_ref(),
            &self.commands,
        );
        match guard.ensure_formatted(format_override)? {
            FormatDecision::SkippedHa => report.skipped(Step::Format, "HA enabled"),
            FormatDecision::AlreadyFormatted { marker, legacy } => report.skipped(
                Step::Format,
                format!(
                    "already formatted ({}marker {})",
                    if legacy { "legacy " } else { "" },
                    marker.display()
                ),
            ),
            FormatDecision::Formatted { forced } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_format();
                }
                report.completed(Step::Format, if forced { "forced" } else { "formatted" });
            }
        }

        let exclude = self.exclude_manager();
        let list = exclude.write_exclude_file()?;
        report.completed(Step::ExcludeFile, format!("{} host(s)", list.len()));

        let spec = self.daemon_spec().creating_dirs();
        match self
            .services
            .start(&spec)
            .map_err(LifecycleError::daemon(Step::DaemonStart))?
        {
            DaemonOutcome::AlreadyRunning => report.skipped(Step::DaemonStart, "already running"),
            _ => report.completed(Step::DaemonStart, spec.pid_file().display().to_string()),
        }

        self.authenticate(report, &auth)?;

        let poller = ReadinessPoller::new(
            self.runner.as_ref(),
            self.safemode_check(),
            &self.config.readiness,
        );
        match poller.wait_until_ready(probe.as_ref())? {
            ReadinessOutcome::Ready { attempts } => {
                nnl_info!(
                    context = ctx.clone().with_step(Step::Readiness.as_str()).with_attempt(attempts),
                    "safe mode off"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.observe_readiness(attempts);
                }
                report.completed(Step::Readiness, format!("ready after {attempts} attempt(s)"));
            }
            ReadinessOutcome::SkippedNotActive => {
                report.skipped(Step::Readiness, "not the active HA member");
                report.skipped(Step::ProvisionDfs, "not the active HA member");
                return Ok(());
            }
        }

        self.provision_dfs(report, probe.as_ref())
    }

    fn provision_dfs(
        &self,
        report: &mut ActionReport,
        gate: Option<&ExecRequest>,
    ) -> Result<(), LifecycleError> {
        let batch = DfsDirectoryBatch::post_start(&self.config);
        let Some(request) = batch.request(&self.commands, &self.config.user, gate) else {
            report.skipped(Step::ProvisionDfs, "nothing to create");
            return Ok(());
        };
        match self
            .runner
            .run(&request)
            .map_err(LifecycleError::command(Step::ProvisionDfs))?
        {
            ExecOutcome::Completed { .. } => {
                report.completed(Step::ProvisionDfs, format!("{} director(ies)", batch.len()))
            }
            ExecOutcome::Skipped(_) => report.skipped(Step::ProvisionDfs, "not the active HA member"),
        }
        Ok(())
    }

    fn authenticate(
        &self,
        report: &mut ActionReport,
        auth: &Authenticator,
    ) -> Result<(), LifecycleError> {
        if auth.authenticate(self.runner.as_ref())? {
            report.completed(Step::Authenticate, self.config.principal().to_owned());
        } else {
            report.skipped(Step::Authenticate, "security disabled");
        }
        Ok(())
    }

    fn stop(&self, report: &mut ActionReport) -> Result<(), LifecycleError> {
        self.services
            .stop(&self.daemon_spec())
            .map_err(LifecycleError::daemon(Step::DaemonStop))?;
        report.completed(Step::DaemonStop, DAEMON_NAME);
        Ok(())
    }

    fn decommission(&self, report: &mut ActionReport) -> Result<(), LifecycleError> {
        let auth = Authenticator::from_config(&self.config)?;
        let outcome = self.exclude_manager().decommission(&auth)?;
        report.completed(Step::ExcludeFile, format!("{} host(s)", outcome.hosts));
        if outcome.authenticated {
            report.completed(Step::Authenticate, self.config.principal().to_owned());
        } else {
            report.skipped(Step::Authenticate, "security disabled");
        }
        report.completed(Step::RefreshNodes, outcome.refresh_command);
        Ok(())
    }

    fn exclude_manager(&self) -> ExcludeListManager<'_> {
        ExcludeListManager::new(
            &self.config,
            self.runner.as_ref(),
            self.resources.as_ref(),
            &self.commands,
        )
    }

    /// Infer the current state from the filesystem, the process manager and
    /// at most one safe-mode probe.
    pub fn observe(&self) -> Result<LifecycleState, LifecycleError> {
        for dir in &self.config.name_dirs {
            let exists = self
                .resources
                .directory_exists(dir)
                .map_err(LifecycleError::resource(Step::NameDirectories))?;
            if !exists {
                return Ok(LifecycleState::Unconfigured);
            }
        }

        let running = self
            .services
            .is_running(&self.daemon_spec())
            .map_err(LifecycleError::daemon(Step::DaemonStart))?;
        if !running {
            let mut markers = vec![self.config.markers.current.as_path()];
            markers.extend(self.config.markers.legacy.as_deref());
            for marker in markers {
                let present = self
                    .resources
                    .directory_exists(marker)
                    .map_err(LifecycleError::resource(Step::Format))?;
                if present {
                    return Ok(LifecycleState::Stopped);
                }
            }
            return Ok(LifecycleState::Configured);
        }

        let excluded = self
            .resources
            .read_file(&self.config.exclude.path)
            .map_err(LifecycleError::resource(Step::ExcludeFile))?
            .map(|raw| ExcludeList::parse(&String::from_utf8_lossy(&raw)))
            .unwrap_or_default();
        if !excluded.is_empty() {
            return Ok(LifecycleState::Decommissioning);
        }

        let ready = self
            .runner
            .probe(&self.safemode_check())
            .map_err(LifecycleError::command(Step::Readiness))?;
        Ok(if ready {
            LifecycleState::Active
        } else {
            LifecycleState::Starting
        })
    }
}
