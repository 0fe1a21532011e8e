use super::{BlockKind, ExecutionContext, ProgressListener};
use crate::core::{Command, Result, UpgradeError};
use crate::state::VersionStore;
use async_trait::async_trait;
use regex::Regex;

lazy_static::lazy_static! {
    static ref IGNORE_SQL_ERROR: Regex =
        Regex::new(r"(?i)^IGNORE\s+SQL\s+ERROR\s+(\w+(?:\s*,\s*\w+)*)$").unwrap();
    static ref IGNORE_END: Regex = Regex::new(r"(?i)^/IGNORE\s+SQL\s+ERROR$").unwrap();
    static ref SELECT_CONNECTION: Regex =
        Regex::new(r"(?i)^SELECT\s+CONNECTION\s+(\w+)$").unwrap();
    static ref TRANSIENT: Regex = Regex::new(r"(?i)^TRANSIENT$").unwrap();
    static ref TRANSIENT_END: Regex = Regex::new(r"(?i)^/TRANSIENT$").unwrap();
    static ref SKIP: Regex = Regex::new(r"(?i)^SKIP$").unwrap();
    static ref SKIP_END: Regex = Regex::new(r"(?i)^/SKIP$").unwrap();
    static ref IF_HISTORY: Regex =
        Regex::new(r#"(?i)^IF\s+HISTORY\s+(NOT\s+)?CONTAINS\s+"([^"]*)"$"#).unwrap();
    static ref ELSE: Regex = Regex::new(r"(?i)^ELSE$").unwrap();
    static ref IF_END: Regex = Regex::new(r"(?i)^/IF$").unwrap();
    static ref SECTION: Regex = Regex::new(r#"(?i)^SECTION(?:\.(\d))?\s+"(.*)"$"#).unwrap();
}

/// Everything a directive may touch.
pub struct DirectiveScope<'a> {
    pub ctx: &'a mut ExecutionContext,
    pub store: &'a mut dyn VersionStore,
    pub progress: &'a dyn ProgressListener,
}

/// Interprets non-persistent commands.
#[async_trait]
pub trait DirectiveInterpreter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `false` when the directive is not one this interpreter knows.
    async fn interpret(&self, command: &Command, scope: &mut DirectiveScope<'_>) -> Result<bool>;
}

/// Ordered chain of interpreters; the first one that accepts a directive wins.
pub struct DirectivePipeline {
    interpreters: Vec<Box<dyn DirectiveInterpreter>>,
}

impl DirectivePipeline {
    /// A pipeline without any interpreters.
    pub fn empty() -> Self {
        Self {
            interpreters: Vec::new(),
        }
    }

    pub fn register(&mut self, interpreter: Box<dyn DirectiveInterpreter>) {
        self.interpreters.push(interpreter);
    }

    pub fn with(mut self, interpreter: Box<dyn DirectiveInterpreter>) -> Self {
        self.register(interpreter);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.interpreters.iter().map(|i| i.name()).collect()
    }

    /// Runs the directive through the chain. Unknown directives are an error
    /// unless they sit inside a skipped block.
    pub async fn interpret(&self, command: &Command, scope: &mut DirectiveScope<'_>) -> Result<()> {
        for interpreter in &self.interpreters {
            if interpreter.interpret(command, scope).await? {
                return Ok(());
            }
        }
        if scope.ctx.is_skipping() {
            return Ok(());
        }
        Err(UpgradeError::Directive {
            location: command.location().clone(),
            message: format!("Unknown directive: {}", command.text()),
        })
    }
}

impl Default for DirectivePipeline {
    fn default() -> Self {
        Self::empty().with(Box::new(StandardDirectives))
    }
}

/// The built-in directive set.
///
/// Inside a skipped block only the block structure (`IF`, `ELSE`, `/IF`,
/// `SKIP`, `/SKIP`) is tracked; everything else is passed over.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDirectives;

fn directive_error(command: &Command, message: String) -> UpgradeError {
    UpgradeError::Directive {
        location: command.location().clone(),
        message,
    }
}

#[async_trait]
impl DirectiveInterpreter for StandardDirectives {
    fn name(&self) -> &'static str {
        "standard"
    }

    async fn interpret(&self, command: &Command, scope: &mut DirectiveScope<'_>) -> Result<bool> {
        let text = command.text().trim();
        let ctx = &mut *scope.ctx;

        if let Some(caps) = IF_HISTORY.captures(text) {
            if ctx.is_skipping() {
                ctx.open_block(BlockKind::If, true);
            } else {
                let negate = caps.get(1).is_some();
                let contains = scope.store.history_contains(&caps[2]).await?;
                ctx.open_block(BlockKind::If, contains == negate);
            }
            return Ok(true);
        }
        if ELSE.is_match(text) {
            ctx.flip().map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if IF_END.is_match(text) {
            ctx.close_block(BlockKind::If)
                .map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if SKIP_END.is_match(text) {
            ctx.close_block(BlockKind::Skip)
                .map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if SKIP.is_match(text) {
            ctx.open_block(BlockKind::Skip, true);
            return Ok(true);
        }

        if ctx.is_skipping() {
            return Ok(false);
        }

        if let Some(caps) = IGNORE_SQL_ERROR.captures(text) {
            let codes = caps[1].split(',').map(|c| c.trim().to_string()).collect();
            ctx.push_ignores(codes);
            return Ok(true);
        }
        if IGNORE_END.is_match(text) {
            ctx.pop_ignores().map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if let Some(caps) = SELECT_CONNECTION.captures(text) {
            ctx.select_connection(&caps[1])
                .map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if TRANSIENT.is_match(text) {
            ctx.set_transient(true).map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if TRANSIENT_END.is_match(text) {
            ctx.set_transient(false).map_err(|m| directive_error(command, m))?;
            return Ok(true);
        }
        if let Some(caps) = SECTION.captures(text) {
            let level = caps
                .get(1)
                .and_then(|l| l.as_str().parse::<u8>().ok())
                .unwrap_or(0);
            ctx.enter_section(level)
                .map_err(|m| directive_error(command, m))?;
            scope.progress.section(level, &caps[2]);
            return Ok(true);
        }

        Ok(false)
    }
}
