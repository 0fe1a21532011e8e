use super::{DirectivePipeline, DirectiveScope, ExecutionContext, ProgressListener};
use crate::connection::ConnectionRegistry;
use crate::core::{Command, Result, Segment, StatementFailure, UpgradeError};
use crate::graph::SegmentGraph;
use crate::state::{LogEntry, LogOutcome, VersionStore};
use tracing::{Instrument, debug, info_span, warn};

/// Applies segments against the registered connections.
pub struct SegmentExecutor<'a> {
    pub graph: &'a SegmentGraph,
    pub connections: &'a mut ConnectionRegistry,
    pub store: &'a mut dyn VersionStore,
    pub directives: &'a DirectivePipeline,
    pub progress: &'a dyn ProgressListener,
}

impl SegmentExecutor<'_> {
    /// Applies one UPGRADE, SWITCH or DOWNGRADE segment, resuming after the
    /// statements a previous run already checkpointed.
    pub async fn apply(&mut self, segment: &Segment, ctx: &mut ExecutionContext) -> Result<()> {
        let span = info_span!(
            "segment",
            kind = %segment.kind(),
            to = segment.target()
        );
        self.apply_counted(segment, ctx).instrument(span).await
    }

    /// Applies a SETUP segment. Setup statements are not counted, so a failed
    /// setup segment is replayed from the start.
    pub async fn apply_setup(&mut self, segment: &Segment, ctx: &mut ExecutionContext) -> Result<()> {
        let span = info_span!("setup", to = segment.target());
        self.apply_uncounted(segment, ctx).instrument(span).await
    }

    async fn apply_counted(&mut self, segment: &Segment, ctx: &mut ExecutionContext) -> Result<()> {
        self.progress.upgrade_starting(segment);
        ctx.reset();

        let state = self.store.load().await?;
        let skip = if state.target.as_deref() == Some(segment.target()) {
            state.statements
        } else {
            0
        };
        if skip > 0 {
            debug!(skip, "resuming partially applied segment");
        }

        let mut count = 0u32;
        for command in segment.commands() {
            if !command.is_persistent() {
                self.interpret(command, ctx).await?;
                continue;
            }
            if ctx.is_transient() {
                if ctx.is_skipping() {
                    self.progress.skipped(command);
                    continue;
                }
                ctx.safe_point().await?;
                self.execute_uncounted(command, ctx).await?;
                continue;
            }

            count += 1;
            if count <= skip {
                self.progress.skipped(command);
                continue;
            }
            ctx.safe_point().await?;
            if ctx.is_skipping() {
                self.progress.skipped(command);
                self.checkpoint_skipped(segment, command, count).await?;
                continue;
            }
            self.execute_counted(segment, command, count, ctx).await?;
        }

        self.progress.segment_finished(segment);

        if !segment.is_open() {
            if segment.is_downgrade() {
                let reverted: Vec<_> = self
                    .graph
                    .collect_reachable(Some(segment.target()), None, false)?
                    .into_iter()
                    .flatten()
                    .filter(|v| v != segment.target())
                    .collect();
                debug!(versions = ?reverted, "reverting history");
                self.store.revert_history(&reverted).await?;
            }
            self.store.complete(segment.target()).await?;
            self.store
                .record(LogEntry::completed(segment.source(), segment.target(), count))
                .await?;
            self.store.commit().await?;
        }
        Ok(())
    }

    async fn apply_uncounted(&mut self, segment: &Segment, ctx: &mut ExecutionContext) -> Result<()> {
        self.progress.upgrade_starting(segment);
        ctx.reset();

        for command in segment.commands() {
            if !command.is_persistent() {
                self.interpret(command, ctx).await?;
            } else if ctx.is_skipping() {
                self.progress.skipped(command);
            } else {
                self.execute_uncounted(command, ctx).await?;
            }
        }

        self.progress.segment_finished(segment);
        self.store.update_spec(segment.target()).await?;
        self.store.commit().await
    }

    async fn interpret(&mut self, command: &Command, ctx: &mut ExecutionContext) -> Result<()> {
        let mut scope = DirectiveScope {
            ctx,
            store: &mut *self.store,
            progress: self.progress,
        };
        self.directives.interpret(command, &mut scope).await
    }

    /// Runs a statement and commits it right away without touching the
    /// version state.
    async fn execute_uncounted(&mut self, command: &Command, ctx: &ExecutionContext) -> Result<()> {
        self.progress.executing(command);
        let db = self.connections.get_mut(ctx.current_connection())?;
        match db.execute(command.text()).await {
            Ok(()) => {
                db.commit().await?;
                self.progress.executed(command);
                Ok(())
            }
            Err(failure) => {
                db.rollback().await?;
                let ignored = ctx.is_ignored(&failure.code);
                self.progress.exception(command, &failure, ignored);
                if ignored {
                    Ok(())
                } else {
                    Err(statement_error(command, failure))
                }
            }
        }
    }

    /// Advances the checkpoint over a statement inside a skipped block, so a
    /// resumed run counts it the same way.
    async fn checkpoint_skipped(&mut self, segment: &Segment, command: &Command, ordinal: u32) -> Result<()> {
        self.store.checkpoint(segment.target(), ordinal).await?;
        self.store
            .record(LogEntry::statement(
                segment.source(),
                segment.target(),
                ordinal,
                command.text(),
                LogOutcome::Success,
            ))
            .await?;
        self.store.commit().await
    }

    /// Runs statement `ordinal` of `segment`. The statement, its checkpoint
    /// and its log row become durable before the next command starts.
    ///
    /// On the control connection all three share one transaction. On any
    /// other connection the statement commits first, so the two connections
    /// never hold write transactions at the same time.
    async fn execute_counted(
        &mut self,
        segment: &Segment,
        command: &Command,
        ordinal: u32,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        self.progress.executing(command);
        let shared = ctx.current_connection() == self.store.connection_name();
        let db = self.connections.get_mut(ctx.current_connection())?;

        let failure = match db.execute(command.text()).await {
            Ok(()) => {
                if !shared {
                    db.commit().await?;
                }
                self.store.checkpoint(segment.target(), ordinal).await?;
                self.store
                    .record(LogEntry::statement(
                        segment.source(),
                        segment.target(),
                        ordinal,
                        command.text(),
                        LogOutcome::Success,
                    ))
                    .await?;
                if shared {
                    db.commit().await?;
                }
                self.store.commit().await?;
                self.progress.executed(command);
                return Ok(());
            }
            Err(failure) => failure,
        };

        db.rollback().await?;

        if ctx.is_ignored(&failure.code) {
            self.progress.exception(command, &failure, true);
            self.store.checkpoint(segment.target(), ordinal).await?;
            self.store
                .record(LogEntry::statement(
                    segment.source(),
                    segment.target(),
                    ordinal,
                    command.text(),
                    LogOutcome::Ignored(failure.to_string()),
                ))
                .await?;
            self.store.commit().await?;
            self.progress.executed(command);
            return Ok(());
        }

        self.progress.exception(command, &failure, false);
        let logged = self
            .store
            .record(LogEntry::statement(
                segment.source(),
                segment.target(),
                ordinal,
                command.text(),
                LogOutcome::Failed(failure.to_string()),
            ))
            .await;
        let committed = match logged {
            Ok(()) => self.store.commit().await,
            Err(err) => Err(err),
        };
        if let Err(err) = committed {
            warn!(error = %err, "could not log failed statement");
            self.store.rollback().await.ok();
        }
        Err(statement_error(command, failure))
    }
}

fn statement_error(command: &Command, failure: StatementFailure) -> UpgradeError {
    UpgradeError::Statement {
        location: command.location().clone(),
        command: command.text().to_string(),
        failure,
    }
}
