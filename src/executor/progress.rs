use crate::core::{Command, Segment, StatementFailure, display_version};
use tracing::{debug, info, warn};

/// Receives notifications while an upgrade runs. Every method has an empty
/// default so listeners only implement what they care about.
#[allow(unused_variables)]
pub trait ProgressListener: Send + Sync {
    fn upgrade_starting(&self, segment: &Segment) {}

    fn executing(&self, command: &Command) {}

    /// A statement was passed over, either because it was already applied
    /// or because it sits in a skipped block.
    fn skipped(&self, command: &Command) {}

    fn executed(&self, command: &Command) {}

    fn exception(&self, command: &Command, failure: &StatementFailure, ignored: bool) {}

    fn segment_finished(&self, segment: &Segment) {}

    fn section(&self, level: u8, message: &str) {}

    fn upgrade_complete(&self, version: &str) {}

    fn no_upgrade_needed(&self, version: Option<&str>) {}
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressListener for SilentProgress {}

/// Reports progress through `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressListener for TracingProgress {
    fn upgrade_starting(&self, segment: &Segment) {
        info!(
            kind = %segment.kind(),
            from = display_version(segment.source()),
            to = segment.target(),
            "applying segment"
        );
    }

    fn executing(&self, command: &Command) {
        debug!(location = %command.location(), sql = command.text(), "executing");
    }

    fn skipped(&self, command: &Command) {
        debug!(location = %command.location(), "skipped");
    }

    fn exception(&self, command: &Command, failure: &StatementFailure, ignored: bool) {
        if ignored {
            info!(location = %command.location(), code = %failure.code, "ignored failure: {}", failure.message);
        } else {
            warn!(location = %command.location(), code = %failure.code, "statement failed: {}", failure.message);
        }
    }

    fn segment_finished(&self, segment: &Segment) {
        debug!(to = segment.target(), "segment finished");
    }

    fn section(&self, level: u8, message: &str) {
        info!(level, "{}", message);
    }

    fn upgrade_complete(&self, version: &str) {
        info!(version, "upgrade complete");
    }

    fn no_upgrade_needed(&self, version: Option<&str>) {
        info!(version = display_version(version), "no upgrade needed");
    }
}
