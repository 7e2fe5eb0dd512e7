//! Task Runner with Circuit Breaker Pattern
//!
//! Runs a background job in a loop with exponential backoff on failure.
//! The loop stops on shutdown, or gives up after too many consecutive
//! failures so the caller can react instead of degrading silently.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Circuit breaker configuration for background tasks
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum number of consecutive failures before giving up
    pub max_consecutive_failures: u32,
    /// Initial delay between retries
    pub initial_retry_delay: Duration,
    /// Maximum delay between retries
    pub max_retry_delay: Duration,
    /// Pause between successful iterations
    pub idle_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("Task '{task}' exceeded maximum consecutive failures ({failures}). Last error: {last_error}")]
pub struct TaskError {
    pub task: String,
    pub failures: u32,
    pub last_error: String,
}

/// Internal state for circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl CircuitBreakerState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) {
        self.consecutive_failures += 1;
        // Exponential backoff with cap
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Run a background task with circuit breaker protection
///
/// `task_fn` runs one iteration. After a success the loop idles for
/// `idle_interval` or until `wake` is notified; after a failure it backs off.
/// Returns `Ok` when `shutdown` flips to `true` or its sender is dropped.
pub async fn run_with_circuit_breaker<F, Fut>(
    task_name: &str,
    config: CircuitBreakerConfig,
    mut shutdown: watch::Receiver<bool>,
    wake: Arc<Notify>,
    mut task_fn: F,
) -> Result<(), TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut state = CircuitBreakerState::new(config.initial_retry_delay);

    loop {
        if *shutdown.borrow() {
            info!("Task '{}' stopped", task_name);
            return Ok(());
        }

        match task_fn().await {
            Ok(()) => {
                // Reset circuit breaker on success
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);

                tokio::select! {
                    _ = sleep(config.idle_interval) => {}
                    _ = wake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                state.record_failure(config.max_retry_delay);
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, state.consecutive_failures, config.max_consecutive_failures, e
                );

                if state.consecutive_failures >= config.max_consecutive_failures {
                    return Err(TaskError {
                        task: task_name.to_string(),
                        failures: state.consecutive_failures,
                        last_error: e,
                    });
                }

                warn!(
                    "Task '{}' will retry in {:?}",
                    task_name, state.current_retry_delay
                );
                tokio::select! {
                    _ = sleep(state.current_retry_delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_failures: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_consecutive_failures: max_failures,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(10),
            idle_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_resets_on_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();
        let (stop, shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            run_with_circuit_breaker("test_task", config(3), shutdown, Arc::new(Notify::new()), || {
                let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Never three failures in a row.
                    if count % 3 < 2 {
                        Err("Simulated failure".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.send(true).unwrap();
        let result = handle.await.unwrap();

        assert!(result.is_ok());
        assert!(attempt_count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_circuit_breaker_gives_up_on_max_failures() {
        let (_stop, shutdown) = watch::channel(false);

        let err = run_with_circuit_breaker(
            "failing_task",
            config(3),
            shutdown,
            Arc::new(Notify::new()),
            || async { Err("Always fails".to_string()) },
        )
        .await
        .unwrap_err();

        assert_eq!(err.failures, 3);
        assert!(err.to_string().contains("exceeded maximum consecutive failures"));
    }

    #[tokio::test]
    async fn test_wake_skips_idle_wait() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let wake = Arc::new(Notify::new());
        let (stop, shutdown) = watch::channel(false);
        let mut slow = config(3);
        slow.idle_interval = Duration::from_secs(3600);

        let task_wake = wake.clone();
        let handle = tokio::spawn(async move {
            run_with_circuit_breaker("idle_task", slow, shutdown, task_wake, || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        wake.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        stop.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
