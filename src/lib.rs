// ============================================================================
// schemalift: resumable, graph-driven database upgrades
// ============================================================================

pub mod connection;
pub mod core;
pub mod definition;
pub mod executor;
pub mod facade;
pub mod graph;
pub mod state;
pub mod supervisor;

// Re-export main types for convenience
pub use connection::{
    ConnectionRegistry, DEFAULT_CONNECTION, Database, MemoryDatabase, MemoryDatabaseHandle,
    SqliteConnectionConfig, SqliteDatabase, UpgradeConfig,
};
pub use core::{
    Command, Result, Segment, SegmentKind, SourceLocation, StatementFailure, UpgradeError, Version,
};
pub use definition::{ControlTables, Definition, DefinitionBuilder};
pub use executor::{
    DirectiveInterpreter, DirectivePipeline, DirectiveScope, ExecutionContext, ProgressListener,
    SilentProgress, StandardDirectives, TracingProgress,
};
pub use facade::{UpgradeOutcome, UpgradePlan, UpgradeTarget, Upgrader, UpgraderBuilder};
pub use graph::{FewestSwitches, Path, PathPolicy, PathPolicyKind, SegmentGraph, ShortestPath};
pub use state::{
    LogEntry, LogKind, LogOutcome, MemoryControlHandle, MemoryVersionStore, SqliteVersionStore,
    VersionState, VersionStore,
};
pub use supervisor::RunSupervisor;
