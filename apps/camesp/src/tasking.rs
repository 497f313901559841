//! Crash monitor for the long running device tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::platform::IssueCounter;

pub const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Spawns `factory()` and keeps it alive: a panicking instance is counted as
/// an issue and replaced by a fresh one after [`RESTART_BACKOFF`]. An
/// instance that returns normally is not restarted.
pub fn spawn_monitored<F, Fut>(name: &'static str, issues: IssueCounter, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts = 0u32;
        loop {
            match tokio::spawn(factory()).await {
                Ok(()) => {
                    info!(task = name, "task finished");
                    return;
                }
                Err(err) if err.is_panic() => {
                    let total = issues.increment();
                    restarts += 1;
                    error!(task = name, restarts, issues = total, "task crashed, restarting");
                    tokio::time::sleep(RESTART_BACKOFF).await;
                }
                Err(err) => {
                    warn!(task = name, error = %err, "task cancelled");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_restarted_and_counted() {
        let issues = IssueCounter::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = runs.clone();
            spawn_monitored("flaky", issues.clone(), move || {
                let runs = runs.clone();
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) < 2 {
                        panic!("boom");
                    }
                }
            })
        };
        handle.await.expect("monitor");
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(issues.get(), 2);
    }

    #[tokio::test]
    async fn finished_task_is_not_restarted() {
        let issues = IssueCounter::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = {
            let runs = runs.clone();
            spawn_monitored("once", issues.clone(), move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        handle.await.expect("monitor");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(issues.get(), 0);
    }
}
