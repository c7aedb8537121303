use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::session::SessionError;

/// How a bounded wait ended.
#[derive(Debug)]
pub enum Wait<T> {
    Ready(T),
    TimedOut,
    Failed(SessionError),
    Cancelled,
}

/// Poll `probe` until it yields `Some`, the budget runs out, the probe errors,
/// or the batch is cancelled. The probe always runs at least once, and each
/// call is itself bounded by the remaining budget.
pub async fn wait_until<T, F, Fut>(
    budget: Duration,
    poll: Duration,
    cancel: &CancelSignal,
    mut probe: F,
) -> Wait<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, SessionError>>,
{
    let deadline = Instant::now() + budget;
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt = tokio::select! {
            r = tokio::time::timeout(remaining, probe()) => r,
            _ = cancel.cancelled() => return Wait::Cancelled,
        };
        match attempt {
            Ok(Ok(Some(value))) => return Wait::Ready(value),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => return Wait::Failed(e),
            Err(_) => return Wait::TimedOut,
        }

        let now = Instant::now();
        if now >= deadline {
            return Wait::TimedOut;
        }
        let nap = poll.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = cancel.cancelled() => return Wait::Cancelled,
        }
    }
}
