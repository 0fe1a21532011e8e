pub mod error;
pub mod types;

pub use error::{Result, StatementFailure, UpgradeError};
pub use types::{Command, Segment, SegmentKind, SourceLocation, Version, display_version};
