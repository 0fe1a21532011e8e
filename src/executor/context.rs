use crate::connection::DEFAULT_CONNECTION;
use crate::core::{Result, UpgradeError};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Kind of an open conditional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    Skip,
}

impl BlockKind {
    fn closer(self) -> &'static str {
        match self {
            Self::If => "/IF",
            Self::Skip => "/SKIP",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    skipping: bool,
    /// An enclosing block was already skipping when this one opened.
    nested_in_skip: bool,
}

/// Mutable state threaded through the commands of a segment.
///
/// Most of it is scoped to a single segment and cleared by [`reset`](Self::reset);
/// the cancellation token lives for the whole run.
#[derive(Debug)]
pub struct ExecutionContext {
    current_connection: String,
    connections: HashSet<String>,
    ignore_stack: Vec<Vec<String>>,
    ignores: HashSet<String>,
    blocks: Vec<Block>,
    transient: bool,
    section_level: Option<u8>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(connections: impl IntoIterator<Item = String>, cancel: CancellationToken) -> Self {
        Self {
            current_connection: DEFAULT_CONNECTION.to_string(),
            connections: connections.into_iter().map(|c| c.to_lowercase()).collect(),
            ignore_stack: Vec::new(),
            ignores: HashSet::new(),
            blocks: Vec::new(),
            transient: false,
            section_level: None,
            cancel,
        }
    }

    /// Clears everything that is scoped to one segment.
    pub fn reset(&mut self) {
        self.current_connection = DEFAULT_CONNECTION.to_string();
        self.ignore_stack.clear();
        self.ignores.clear();
        self.blocks.clear();
        self.transient = false;
        self.section_level = None;
    }

    pub fn current_connection(&self) -> &str {
        &self.current_connection
    }

    pub fn select_connection(&mut self, name: &str) -> std::result::Result<(), String> {
        let name = name.to_lowercase();
        if !self.connections.contains(&name) {
            return Err(format!("Connection '{}' is not configured", name));
        }
        self.current_connection = name;
        Ok(())
    }

    pub fn push_ignores(&mut self, codes: Vec<String>) {
        self.ignore_stack.push(codes);
        self.rebuild_ignores();
    }

    pub fn pop_ignores(&mut self) -> std::result::Result<(), String> {
        if self.ignore_stack.pop().is_none() {
            return Err("/IGNORE SQL ERROR without a matching IGNORE SQL ERROR".into());
        }
        self.rebuild_ignores();
        Ok(())
    }

    fn rebuild_ignores(&mut self) {
        self.ignores = self.ignore_stack.iter().flatten().cloned().collect();
    }

    pub fn is_ignored(&self, code: &str) -> bool {
        self.ignores.contains(code)
    }

    /// Opens a conditional block. Once skipping, nested blocks are skipped
    /// regardless of `skip`.
    pub fn open_block(&mut self, kind: BlockKind, skip: bool) {
        let nested_in_skip = self.is_skipping();
        self.blocks.push(Block {
            kind,
            skipping: nested_in_skip || skip,
            nested_in_skip,
        });
    }

    /// Flips the innermost IF block.
    pub fn flip(&mut self) -> std::result::Result<(), String> {
        match self.blocks.last_mut() {
            Some(block) if block.kind == BlockKind::If => {
                if !block.nested_in_skip {
                    block.skipping = !block.skipping;
                }
                Ok(())
            }
            _ => Err("ELSE without a matching IF".into()),
        }
    }

    pub fn close_block(&mut self, kind: BlockKind) -> std::result::Result<(), String> {
        match self.blocks.last() {
            Some(block) if block.kind == kind => {
                self.blocks.pop();
                Ok(())
            }
            Some(block) => Err(format!(
                "{} found where {} was expected",
                kind.closer(),
                block.kind.closer()
            )),
            None => Err(format!("{} without a matching block", kind.closer())),
        }
    }

    pub fn is_skipping(&self) -> bool {
        self.blocks.last().is_some_and(|block| block.skipping)
    }

    pub fn set_transient(&mut self, transient: bool) -> std::result::Result<(), String> {
        if self.transient == transient {
            return Err(if transient {
                "TRANSIENT blocks cannot be nested".into()
            } else {
                "/TRANSIENT without a matching TRANSIENT".into()
            });
        }
        self.transient = transient;
        Ok(())
    }

    /// Statements executed while transient are not counted or checkpointed.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Sections may go deeper one level at a time.
    pub fn enter_section(&mut self, level: u8) -> std::result::Result<(), String> {
        let deepest = self.section_level.map_or(0, |current| current + 1);
        if level > deepest {
            return Err(format!(
                "SECTION level {} cannot follow level {}",
                level,
                self.section_level.map_or("none".to_string(), |l| l.to_string())
            ));
        }
        self.section_level = Some(level);
        Ok(())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(UpgradeError::Aborted);
        }
        Ok(())
    }

    /// Yields to the runtime so a pending abort can be observed, then checks
    /// for cancellation. Drivers that block inside `execute` never yield on
    /// their own.
    pub async fn safe_point(&self) -> Result<()> {
        tokio::task::yield_now().await;
        self.check_cancelled()
    }
}
