use super::UpgradeTarget;
use crate::connection::{
    ConnectionRegistry, DEFAULT_CONNECTION, Database, SqliteDatabase, UpgradeConfig,
};
use crate::core::{Result, Segment, UpgradeError, Version, display_version};
use crate::definition::Definition;
use crate::executor::{
    DirectiveInterpreter, DirectivePipeline, ExecutionContext, ProgressListener, SegmentExecutor,
    TracingProgress,
};
use crate::graph::{Path, PathPolicy, SegmentGraph, ShortestPath};
use crate::state::{LogEntry, SqliteVersionStore, VersionState, VersionStore};
use crate::supervisor::RunSupervisor;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a finished upgrade run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    NoUpgradeNeeded {
        version: Option<Version>,
    },
    Upgraded {
        from: Option<Version>,
        to: Version,
        segments: usize,
    },
}

/// The segments an upgrade would apply, without applying them.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub from: Option<Version>,
    pub to: Option<Version>,
    pub segments: Vec<Arc<Segment>>,
}

impl UpgradePlan {
    pub fn is_noop(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Drives a database along a [`SegmentGraph`].
///
/// ```ignore
/// let mut upgrader = Upgrader::from_config(&UpgradeConfig::load("upgrade.toml")?)?;
/// upgrader.upgrade(&UpgradeTarget::Latest, false).await?;
/// ```
pub struct Upgrader {
    graph: SegmentGraph,
    connections: ConnectionRegistry,
    store: Box<dyn VersionStore>,
    directives: DirectivePipeline,
    progress: Arc<dyn ProgressListener>,
    policy: Box<dyn PathPolicy>,
    auto_create_control_tables: bool,
    cancel: CancellationToken,
}

pub struct UpgraderBuilder {
    graph: SegmentGraph,
    connections: ConnectionRegistry,
    store: Option<Box<dyn VersionStore>>,
    directives: DirectivePipeline,
    progress: Arc<dyn ProgressListener>,
    policy: Box<dyn PathPolicy>,
    auto_create_control_tables: bool,
    cancel: CancellationToken,
}

impl UpgraderBuilder {
    /// Register a named connection
    pub fn connection(mut self, name: &str, database: impl Database + 'static) -> Self {
        self.connections.register(name, Box::new(database));
        self
    }

    /// Set the version store
    pub fn store(mut self, store: impl VersionStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Add a directive interpreter after the standard ones
    pub fn directive(mut self, interpreter: impl DirectiveInterpreter + 'static) -> Self {
        self.directives.register(Box::new(interpreter));
        self
    }

    /// Replace the whole directive pipeline
    pub fn directives(mut self, directives: DirectivePipeline) -> Self {
        self.directives = directives;
        self
    }

    /// Set the progress listener
    pub fn progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    /// Set the path policy
    pub fn policy(mut self, policy: Box<dyn PathPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn auto_create_control_tables(mut self, enabled: bool) -> Self {
        self.auto_create_control_tables = enabled;
        self
    }

    /// Use an externally owned cancellation token
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build(self) -> Result<Upgrader> {
        let store = self
            .store
            .ok_or_else(|| UpgradeError::Config("a version store is required".into()))?;
        if !self.connections.contains(DEFAULT_CONNECTION) {
            return Err(UpgradeError::Config(format!(
                "a '{}' connection is required",
                DEFAULT_CONNECTION
            )));
        }
        if !self.connections.contains(store.connection_name()) {
            return Err(UpgradeError::Config(format!(
                "the version store uses connection '{}', which is not registered",
                store.connection_name()
            )));
        }

        Ok(Upgrader {
            graph: self.graph,
            connections: self.connections,
            store,
            directives: self.directives,
            progress: self.progress,
            policy: self.policy,
            auto_create_control_tables: self.auto_create_control_tables,
            cancel: self.cancel,
        })
    }
}

impl Upgrader {
    pub fn builder(graph: SegmentGraph) -> UpgraderBuilder {
        UpgraderBuilder {
            graph,
            connections: ConnectionRegistry::new(),
            store: None,
            directives: DirectivePipeline::default(),
            progress: Arc::new(TracingProgress),
            policy: Box::new(ShortestPath),
            auto_create_control_tables: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Opens every configured SQLite connection and keeps the version state
    /// on the default one.
    pub fn from_config(config: &UpgradeConfig) -> Result<Self> {
        config.validate()?;
        let graph = SegmentGraph::from_definition(Definition::load(&config.definition)?)?;

        let mut builder = Upgrader::builder(graph)
            .policy(config.path_policy.into_policy())
            .auto_create_control_tables(config.auto_create_control_tables);

        for (name, conn) in &config.connections {
            let database = SqliteDatabase::open(&conn.path, conn.busy_timeout_duration())?;
            if name == DEFAULT_CONNECTION {
                let tables = builder.graph.control_tables().clone();
                builder = builder.store(SqliteVersionStore::new(database.handle(), tables));
            }
            builder = builder.connection(name, database);
        }

        builder.build()
    }

    pub fn graph(&self) -> &SegmentGraph {
        &self.graph
    }

    /// Token that aborts the current and every later run once cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&mut self) -> Result<VersionState> {
        self.store.load().await
    }

    pub async fn current_version(&mut self) -> Result<Option<Version>> {
        Ok(self.state().await?.version)
    }

    pub async fn current_target(&mut self) -> Result<Option<Version>> {
        Ok(self.state().await?.target)
    }

    pub async fn current_statements(&mut self) -> Result<u32> {
        Ok(self.state().await?.statements)
    }

    pub async fn control_spec(&mut self) -> Result<Option<String>> {
        Ok(self.state().await?.control_spec)
    }

    pub async fn log_entries(&mut self) -> Result<Vec<LogEntry>> {
        self.store.entries().await
    }

    /// Versions reachable from the current state.
    pub async fn resolve_targets(
        &mut self,
        tips: bool,
        prefix: Option<&str>,
        allow_downgrade: bool,
    ) -> Result<Vec<Option<Version>>> {
        let state = self.store.load().await?;
        self.graph.collect_targets(
            state.version.as_deref(),
            state.target.as_deref(),
            tips,
            allow_downgrade,
            prefix,
        )
    }

    /// Brings the control tables up to date, either through the SETUP
    /// segments of the definition or by letting the store create them.
    pub async fn setup_control_tables(&mut self) -> Result<()> {
        let mut ctx = ExecutionContext::new(self.connections.names(), self.cancel.child_token());
        self.setup_with(&mut ctx).await
    }

    async fn setup_with(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        if !self.graph.has_setup() {
            if self.auto_create_control_tables {
                self.store.ensure_control_tables().await?;
            }
            return Ok(());
        }

        let spec = self.store.load().await?.control_spec;
        let path = self.graph.setup_path(spec.as_deref());
        if path.is_empty() {
            return Ok(());
        }
        debug!(from = ?spec, steps = path.len(), "upgrading control tables");

        let mut executor = SegmentExecutor {
            graph: &self.graph,
            connections: &mut self.connections,
            store: self.store.as_mut(),
            directives: &self.directives,
            progress: self.progress.as_ref(),
        };
        for segment in &path {
            ctx.safe_point().await?;
            executor.apply_setup(segment, ctx).await?;
        }
        Ok(())
    }

    /// Computes what [`upgrade`](Self::upgrade) would do.
    pub async fn plan(&mut self, target: &UpgradeTarget, allow_downgrade: bool) -> Result<UpgradePlan> {
        let state = self.store.load().await?;
        self.plan_from(&state, target, allow_downgrade)
    }

    fn plan_from(
        &self,
        state: &VersionState,
        target: &UpgradeTarget,
        allow_downgrade: bool,
    ) -> Result<UpgradePlan> {
        let from = state.version.clone();
        let to = self.resolve_target(state, target, allow_downgrade)?;

        if state.target.is_none() && to == from {
            return Ok(UpgradePlan {
                from,
                to,
                segments: Vec::new(),
            });
        }
        let Some(to) = to else {
            return Err(self.unreachable(target, state));
        };

        let path = match state.target.as_deref() {
            Some(in_flight) => {
                let first = self
                    .graph
                    .segment(from.as_deref(), in_flight)
                    .cloned()
                    .ok_or_else(|| {
                        UpgradeError::Consistency(format!(
                            "No segment from {} to {} for the interrupted upgrade",
                            display_version(from.as_deref()),
                            in_flight
                        ))
                    })?;
                let mut path = Path::new();
                path.push(first);
                let rest = self
                    .graph
                    .resolve_path(Some(in_flight), Some(&to), allow_downgrade, self.policy.as_ref())
                    .ok_or_else(|| self.unreachable(target, state))?;
                path.extend(rest);
                path
            }
            None => self
                .graph
                .resolve_path(from.as_deref(), Some(&to), allow_downgrade, self.policy.as_ref())
                .ok_or_else(|| self.unreachable(target, state))?,
        };

        Ok(UpgradePlan {
            from,
            to: Some(to),
            segments: path.into_iter().collect(),
        })
    }

    fn resolve_target(
        &self,
        state: &VersionState,
        target: &UpgradeTarget,
        allow_downgrade: bool,
    ) -> Result<Option<Version>> {
        let version = state.version.as_deref();
        let in_flight = state.target.as_deref();

        let prefix = match target {
            UpgradeTarget::Exact(wanted) => {
                let reachable =
                    self.graph
                        .collect_targets(version, in_flight, false, allow_downgrade, None)?;
                if reachable.iter().any(|v| v.as_deref() == Some(wanted.as_str())) {
                    return Ok(Some(wanted.clone()));
                }
                return Err(self.unreachable(target, state));
            }
            UpgradeTarget::Latest => None,
            UpgradeTarget::Prefix(prefix) => Some(prefix.as_str()),
        };

        let mut tips =
            self.graph
                .collect_targets(version, in_flight, true, allow_downgrade, prefix)?;
        match tips.len() {
            0 => Err(self.unreachable(target, state)),
            1 => Ok(tips.remove(0)),
            _ => Err(UpgradeError::TargetAmbiguous {
                target: target.to_string(),
                candidates: tips
                    .iter()
                    .map(|v| display_version(v.as_deref()).to_string())
                    .collect(),
            }),
        }
    }

    fn unreachable(&self, target: &UpgradeTarget, state: &VersionState) -> UpgradeError {
        UpgradeError::TargetUnreachable {
            target: target.to_string(),
            from: display_version(state.version.as_deref()).to_string(),
        }
    }

    /// Upgrades to `target`. Cancelling the upgrader's token stops the run at
    /// the next safe point with [`UpgradeError::Aborted`].
    pub async fn upgrade(
        &mut self,
        target: &UpgradeTarget,
        allow_downgrade: bool,
    ) -> Result<UpgradeOutcome> {
        self.upgrade_until(target, allow_downgrade, std::future::pending())
            .await
    }

    /// Like [`upgrade`](Self::upgrade), additionally aborting when `abort`
    /// resolves.
    pub async fn upgrade_until<A>(
        &mut self,
        target: &UpgradeTarget,
        allow_downgrade: bool,
        abort: A,
    ) -> Result<UpgradeOutcome>
    where
        A: Future<Output = ()>,
    {
        let supervisor = RunSupervisor::new(self.cancel.child_token());
        let token = supervisor.token().clone();
        supervisor
            .run(abort, self.run(target, allow_downgrade, token))
            .await
    }

    async fn run(
        &mut self,
        target: &UpgradeTarget,
        allow_downgrade: bool,
        token: CancellationToken,
    ) -> Result<UpgradeOutcome> {
        let result = self.run_protected(target, allow_downgrade, token).await;
        if result.is_err() {
            self.connections.rollback_all().await.ok();
            self.store.rollback().await.ok();
        }
        result
    }

    async fn run_protected(
        &mut self,
        target: &UpgradeTarget,
        allow_downgrade: bool,
        token: CancellationToken,
    ) -> Result<UpgradeOutcome> {
        let mut ctx = ExecutionContext::new(self.connections.names(), token);
        self.setup_with(&mut ctx).await?;

        let state = self.store.load().await?;
        let plan = self.plan_from(&state, target, allow_downgrade)?;
        let Some(to) = plan.to.clone().filter(|_| !plan.is_noop()) else {
            self.progress.no_upgrade_needed(plan.from.as_deref());
            return Ok(UpgradeOutcome::NoUpgradeNeeded { version: plan.from });
        };

        info!(
            from = display_version(plan.from.as_deref()),
            to = to.as_str(),
            segments = plan.segments.len(),
            policy = self.policy.name(),
            "upgrade path resolved"
        );

        let mut executor = SegmentExecutor {
            graph: &self.graph,
            connections: &mut self.connections,
            store: self.store.as_mut(),
            directives: &self.directives,
            progress: self.progress.as_ref(),
        };
        for segment in &plan.segments {
            ctx.safe_point().await?;
            executor.apply(segment, &mut ctx).await?;
        }

        self.progress.upgrade_complete(&to);
        Ok(UpgradeOutcome::Upgraded {
            from: plan.from,
            to,
            segments: plan.segments.len(),
        })
    }
}
