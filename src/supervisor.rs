//! Cooperative cancellation of a running upgrade.
//!
//! The upgrade future is polled in place next to an abort future. When the
//! abort side fires, the shared token is cancelled and the upgrade is driven
//! to its next safe point, which is before the next persistent statement or
//! between segments. A statement that is already running always finishes and
//! gets its checkpoint.

use crate::core::{Result, UpgradeError};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Clone, Default)]
pub struct RunSupervisor {
    token: CancellationToken,
}

impl RunSupervisor {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drives `work` until it finishes or `abort` resolves.
    ///
    /// After an abort the result is [`UpgradeError::Aborted`], unless the
    /// work failed with an error of its own on the way out.
    pub async fn run<T, W, A>(&self, abort: A, work: W) -> Result<T>
    where
        W: Future<Output = Result<T>>,
        A: Future<Output = ()>,
    {
        tokio::pin!(work);
        tokio::pin!(abort);

        tokio::select! {
            biased;
            result = &mut work => return result,
            _ = &mut abort => {}
        }

        warn!("abort requested, stopping after the current statement");
        self.token.cancel();
        match work.await {
            Err(err) if !matches!(err, UpgradeError::Aborted) => Err(err),
            _ => Err(UpgradeError::Aborted),
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
