pub mod context;
pub mod directives;
pub mod progress;
mod segment;

pub use context::{BlockKind, ExecutionContext};
pub use directives::{DirectiveInterpreter, DirectivePipeline, DirectiveScope, StandardDirectives};
pub use progress::{ProgressListener, SilentProgress, TracingProgress};
pub use segment::SegmentExecutor;
