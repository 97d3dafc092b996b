use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle for a repeating task armed by [`schedule_delta`].
///
/// Cancelling before the pending delay elapses skips the run entirely.
/// Cancelling while a run is in flight lets it finish, but no new
/// timer is armed afterwards.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    token: CancellationToken,
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Run `action` repeatedly with at least `delay` of idle time between
/// the end of one run and the start of the next.
///
/// The gap is measured from completion, not from a wall-clock tick, so
/// runs of any duration can never overlap and a rate-limited remote
/// always sees the configured spacing. Failure handling belongs to the
/// action itself; a run that panics does not stop the cycle.
pub fn schedule_delta<F, Fut>(delay: Duration, mut action: F) -> ScheduleHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = task_token.cancelled() => {
                    trace!("cancelled while idle, skipping pending run");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Each run gets its own task: a panicking run must not
            // take the cycle down with it.
            let _ = tokio::spawn(action()).await;

            if task_token.is_cancelled() {
                trace!("cancelled during run, not rescheduling");
                break;
            }
        }
    });

    ScheduleHandle { token }
}
