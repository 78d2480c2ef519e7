//! Connection session manager.
//!
//! Turns stored connection descriptions into live, monitored driver
//! sessions, keeping at most one live session per (connection, database)
//! pair.
//!
//! # Module Structure
//! - `record`: Session records, closed snapshots and per-key state
//! - `status`: Status values and the counter clock
//! - `handshake`: Connect/analyze producer and the dispatcher applying it
//! - `registry`: Open/close lifecycle and status queries
//! - `router`: Requests against open sessions, closing them on link failure
//! - `notify`: Change notifications for observers
//!
//! # Locking
//! Each key owns one async mutex for the lifetime of the process. Every
//! mutation of a key's live record or closed snapshot happens under that
//! mutex; different keys never contend. A running handshake holds the
//! mutex until its message stream is drained, so a concurrent open of the
//! same key waits and then observes the record the handshake produced.
//! A forced close cancels the running handshake first, through a token
//! kept outside the mutex, so it does not wait for the full handshake.

mod handshake;
mod notify;
mod record;
mod registry;
mod router;
mod status;

pub use notify::{ChangeEvent, ChangeKind};
pub use record::{ClosedSnapshot, SessionInfo, SessionKey, StatusReport};
pub use registry::SessionRegistry;
pub use router::{SessionRequest, SessionResponse};
pub use status::{SessionStatus, StatusClock, StatusName};

use crate::Result;
use crate::error::TinyDbError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs a network operation under a time budget and a cancellation token.
async fn run_bounded<T, F>(
    operation: &str,
    budget: Duration,
    cancel: &CancellationToken,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TinyDbError::cancelled(operation)),
        outcome = tokio::time::timeout(budget, future) => match outcome {
            Ok(result) => result,
            Err(_) => Err(TinyDbError::timeout(operation, budget)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<()> = run_bounded("Query", Duration::from_secs(2), &cancel, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let error = result.unwrap_err();
        assert!(matches!(error, TinyDbError::Timeout { .. }));
        assert_eq!(error.to_string(), "Query timed out after 2s");
    }

    #[tokio::test]
    async fn test_run_bounded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = run_bounded(
            "Connect",
            Duration::from_secs(30),
            &cancel,
            std::future::pending(),
        )
        .await;

        assert!(matches!(result, Err(TinyDbError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_run_bounded_passes_results_through() {
        let cancel = CancellationToken::new();
        let value = run_bounded("Ping", Duration::from_secs(1), &cancel, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
