//! Bounded wait for ICE candidate gathering.

use std::future::Future;
use std::time::Duration;

/// How a gathering wait finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    /// The transport reported that gathering finished.
    Complete,
    /// The limit elapsed first. The local description is used with whatever
    /// candidates were collected so far.
    TimedOut,
}

/// Race `done` against a timer of `limit`.
///
/// Whichever side loses is dropped, so a pending completion future is
/// cancelled rather than left running.
pub async fn wait_for_gathering<F>(done: F, limit: Duration) -> GatherOutcome
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = done => GatherOutcome::Complete,
        _ = tokio::time::sleep(limit) => GatherOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn completes_before_limit() {
        let start = Instant::now();
        let done = tokio::time::sleep(Duration::from_millis(300));
        assert_eq!(wait_for_gathering(done, LIMIT).await, GatherOutcome::Complete);
        assert!(start.elapsed() < LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn never_completing_times_out_at_limit() {
        let start = Instant::now();
        let outcome = wait_for_gathering(std::future::pending::<()>(), LIMIT).await;
        assert_eq!(outcome, GatherOutcome::TimedOut);
        assert!(start.elapsed() >= LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn late_completion_still_times_out() {
        let done = tokio::time::sleep(LIMIT + Duration::from_secs(1));
        assert_eq!(wait_for_gathering(done, LIMIT).await, GatherOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_signalled_from_channel() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(tx);
        });
        let done = async move {
            let _ = rx.recv().await;
        };
        assert_eq!(wait_for_gathering(done, LIMIT).await, GatherOutcome::Complete);
    }
}
