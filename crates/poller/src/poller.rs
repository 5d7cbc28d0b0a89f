//! Per-job adaptive status poller.
//!
//! [`AdaptivePoller`] fetches one audit's status immediately on
//! [`start`](AdaptivePoller::start) and then on a schedule, until the audit
//! reaches a terminal status, the retry budget is exhausted, or
//! [`stop`](AdaptivePoller::stop) is called.
//!
//! Each `start` opens a new *generation*. The spawned poll task captures
//! its generation and re-checks it after every suspension point, so a fetch
//! that resolves after `stop`/`restart` can never touch the store, fire a
//! callback or schedule another attempt.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use auditwatch_core::job::{Job, JobStatus};
use auditwatch_core::store::JobStore;
use tokio_util::sync::CancellationToken;

use crate::backoff::{backoff_delay, MAX_BACKOFF, MAX_RETRIES};
use crate::source::{FailureClass, FetchError, StatusSource};

/// Message passed to `on_error` when rate-limit/server retries run out.
pub const TOO_MANY_RETRIES: &str = "too many retries";

/// Fallback `on_error` message for a failed audit without an error text.
const AUDIT_FAILED: &str = "Audit failed";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Never started.
    Idle,
    /// Polling at the base interval.
    Active,
    /// Waiting out an escalated delay after 429/5xx responses.
    Backoff,
    /// Stopped by the caller, a terminal status, or an exhausted budget.
    Stopped,
}

/// Tunables shared by every generation of a poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Upper bound for a single status fetch.
    pub request_timeout: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
    /// Cap for the escalated backoff delay.
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: MAX_RETRIES,
            max_backoff: MAX_BACKOFF,
        }
    }
}

type CompleteFn = dyn Fn(&Job) + Send + Sync;
type ErrorFn = dyn Fn(&str) + Send + Sync;

/// Terminal callbacks. Exactly one of them fires at most once per
/// generation.
#[derive(Clone)]
pub struct PollerHandlers {
    on_complete: Arc<CompleteFn>,
    on_error: Arc<ErrorFn>,
}

impl PollerHandlers {
    pub fn new(
        on_complete: impl Fn(&Job) + Send + Sync + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_complete: Arc::new(on_complete),
            on_error: Arc::new(on_error),
        }
    }

    /// Handlers that ignore every outcome.
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }
}

impl fmt::Debug for PollerHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerHandlers").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AdaptivePoller
// ---------------------------------------------------------------------------

/// Polls the status of one audit job.
///
/// Requires a tokio runtime: `start` spawns the poll task.
pub struct AdaptivePoller {
    source: Arc<dyn StatusSource>,
    store: JobStore,
    config: PollerConfig,
    shared: Arc<Mutex<PollerShared>>,
}

/// Mutable poller state. Never held across an await.
struct PollerShared {
    state: PollerState,
    failure_count: u32,
    generation: u64,
    cancel: Option<CancellationToken>,
    params: Option<StartParams>,
}

#[derive(Clone)]
struct StartParams {
    job_id: String,
    base_interval: Duration,
    handlers: PollerHandlers,
}

/// What the poll task does after a fetch was classified.
enum Step {
    /// The generation is stale; exit without side effects.
    Discard,
    /// Sleep for the delay, then fetch again.
    Retry(Duration),
    /// Fire the terminal callback (if any) and exit.
    Finish(Outcome),
}

enum Outcome {
    Completed(Job),
    Failed(String),
    Cancelled,
}

impl AdaptivePoller {
    pub fn new(source: Arc<dyn StatusSource>, store: JobStore) -> Self {
        Self::with_config(source, store, PollerConfig::default())
    }

    pub fn with_config(source: Arc<dyn StatusSource>, store: JobStore, config: PollerConfig) -> Self {
        Self {
            source,
            store,
            config,
            shared: Arc::new(Mutex::new(PollerShared {
                state: PollerState::Idle,
                failure_count: 0,
                generation: 0,
                cancel: None,
                params: None,
            })),
        }
    }

    /// Start polling `job_id`: fetch now, then every `base_interval`.
    ///
    /// Calling `start` on an active poller cancels the running generation
    /// first.
    pub fn start(&self, job_id: impl Into<String>, base_interval: Duration, handlers: PollerHandlers) {
        let params = StartParams {
            job_id: job_id.into(),
            base_interval,
            handlers,
        };

        let (generation, cancel) = {
            let mut shared = lock(&self.shared);
            if let Some(previous) = shared.cancel.take() {
                previous.cancel();
            }
            shared.generation += 1;
            shared.failure_count = 0;
            shared.state = PollerState::Active;
            let cancel = CancellationToken::new();
            shared.cancel = Some(cancel.clone());
            shared.params = Some(params.clone());
            (shared.generation, cancel)
        };

        self.store.seed(&params.job_id);

        tracing::info!(
            job_id = %params.job_id,
            generation,
            interval_ms = params.base_interval.as_millis() as u64,
            "Starting audit status polling",
        );

        let task = PollTask {
            source: Arc::clone(&self.source),
            store: self.store.clone(),
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            params,
            generation,
        };
        tokio::spawn(task.run(cancel));
    }

    /// Stop polling. Safe from any state; a no-op when already stopped.
    pub fn stop(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == PollerState::Stopped && shared.cancel.is_none() {
            return;
        }
        if let Some(cancel) = shared.cancel.take() {
            cancel.cancel();
        }
        shared.generation += 1;
        shared.state = PollerState::Stopped;
        tracing::info!(
            job_id = shared.params.as_ref().map(|p| p.job_id.as_str()),
            generation = shared.generation,
            "Stopped audit status polling",
        );
    }

    /// `stop()` followed by `start()` with the last parameters.
    pub fn restart(&self) {
        let params = lock(&self.shared).params.clone();
        let Some(params) = params else {
            tracing::warn!("Restart requested before the poller was ever started");
            return;
        };
        self.stop();
        self.start(params.job_id, params.base_interval, params.handlers);
    }

    /// `true` while a poll task is scheduled (active or backing off).
    pub fn is_active(&self) -> bool {
        matches!(self.state(), PollerState::Active | PollerState::Backoff)
    }

    pub fn state(&self) -> PollerState {
        lock(&self.shared).state
    }

    /// Consecutive failed fetches in the current generation.
    pub fn failure_count(&self) -> u32 {
        lock(&self.shared).failure_count
    }

    /// The job this poller was last started for.
    pub fn job_id(&self) -> Option<String> {
        lock(&self.shared).params.as_ref().map(|p| p.job_id.clone())
    }
}

impl Drop for AdaptivePoller {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.shared).cancel.take() {
            cancel.cancel();
        }
    }
}

fn lock(shared: &Mutex<PollerShared>) -> MutexGuard<'_, PollerShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Poll task
// ---------------------------------------------------------------------------

/// One generation's poll loop.
struct PollTask {
    source: Arc<dyn StatusSource>,
    store: JobStore,
    shared: Arc<Mutex<PollerShared>>,
    config: PollerConfig,
    params: StartParams,
    generation: u64,
}

impl PollTask {
    async fn run(self, cancel: CancellationToken) {
        let job_id = self.params.job_id.as_str();
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(
                    self.config.request_timeout,
                    self.source.fetch_status(job_id),
                ) => result.unwrap_or(Err(FetchError::Timeout(self.config.request_timeout))),
            };

            match self.classify(result) {
                Step::Discard => {
                    tracing::debug!(job_id, generation = self.generation, "Discarding stale fetch result");
                    return;
                }
                Step::Retry(next) => delay = next,
                Step::Finish(outcome) => {
                    self.finish(outcome);
                    return;
                }
            }
        }
    }

    /// Apply a fetch result to the shared state. Runs entirely under the
    /// poller lock so that `stop()` either happens before (result
    /// discarded) or after (callback already decided).
    fn classify(&self, result: Result<Job, FetchError>) -> Step {
        let mut shared = lock(&self.shared);
        if shared.generation != self.generation {
            return Step::Discard;
        }

        let job_id = self.params.job_id.as_str();
        let base = self.params.base_interval;

        match result {
            Ok(mut job) => {
                job.id = job_id.to_string();
                shared.failure_count = 0;
                let status = job.status;

                if status.is_terminal() {
                    shared.state = PollerState::Stopped;
                    shared.cancel = None;
                    self.store.apply(job.clone());
                    tracing::info!(job_id, status = %status, "Audit reached terminal status");
                    return Step::Finish(match status {
                        JobStatus::Completed => Outcome::Completed(job),
                        JobStatus::Failed => Outcome::Failed(
                            job.error_message.unwrap_or_else(|| AUDIT_FAILED.to_string()),
                        ),
                        _ => Outcome::Cancelled,
                    });
                }

                tracing::debug!(job_id, status = %status, progress = job.progress, "Audit status fetched");
                self.store.apply(job);
                shared.state = PollerState::Active;
                Step::Retry(base)
            }
            Err(error) => {
                shared.failure_count += 1;
                let failures = shared.failure_count;
                let class = error.class();

                if failures > self.config.max_retries {
                    shared.state = PollerState::Stopped;
                    shared.cancel = None;
                    tracing::warn!(
                        job_id,
                        failures,
                        error = %error,
                        "Giving up on audit status polling",
                    );
                    let message = match class {
                        FailureClass::Backoff => TOO_MANY_RETRIES.to_string(),
                        FailureClass::Other => format!("{TOO_MANY_RETRIES}: {error}"),
                    };
                    return Step::Finish(Outcome::Failed(message));
                }

                let delay = match class {
                    FailureClass::Backoff => {
                        shared.state = PollerState::Backoff;
                        backoff_delay(base, failures, self.config.max_backoff)
                    }
                    FailureClass::Other => {
                        shared.state = PollerState::Active;
                        base
                    }
                };
                tracing::warn!(
                    job_id,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Audit status fetch failed, retrying",
                );
                Step::Retry(delay)
            }
        }
    }

    /// Fire the terminal callback for `outcome`.
    ///
    /// `classify` decided the outcome under the lock, so a `stop()` can land
    /// before this runs. The generation is checked once more here. A `stop()`
    /// racing the callback itself is not excluded, since holding the lock
    /// while user code runs would deadlock a callback that calls back into
    /// the poller.
    fn finish(&self, outcome: Outcome) {
        if lock(&self.shared).generation != self.generation {
            tracing::debug!(
                job_id = %self.params.job_id,
                generation = self.generation,
                "Poller stopped before terminal callback, skipping",
            );
            return;
        }
        let handlers = &self.params.handlers;
        match outcome {
            Outcome::Completed(job) => (handlers.on_complete)(&job),
            Outcome::Failed(message) => (handlers.on_error)(&message),
            Outcome::Cancelled => {
                tracing::info!(job_id = %self.params.job_id, "Audit cancelled, no callback fired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct UnusedSource;

    #[async_trait]
    impl StatusSource for UnusedSource {
        async fn fetch_status(&self, _job_id: &str) -> Result<Job, FetchError> {
            unreachable!("finish never fetches")
        }
    }

    fn task_with_counter(poller: &AdaptivePoller, generation: u64, fired: Arc<AtomicUsize>) -> PollTask {
        let on_error = Arc::clone(&fired);
        PollTask {
            source: Arc::new(UnusedSource),
            store: poller.store.clone(),
            shared: Arc::clone(&poller.shared),
            config: poller.config.clone(),
            params: StartParams {
                job_id: "a1".into(),
                base_interval: Duration::from_secs(5),
                handlers: PollerHandlers::new(
                    move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    },
                    move |_| {
                        on_error.fetch_add(1, Ordering::SeqCst);
                    },
                ),
            },
            generation,
        }
    }

    #[test]
    fn finish_fires_for_current_generation() {
        let poller = AdaptivePoller::new(Arc::new(UnusedSource), JobStore::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let task = task_with_counter(&poller, 0, Arc::clone(&fired));

        task.finish(Outcome::Completed(Job::placeholder("a1").with_status(JobStatus::Completed)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_skips_callback_after_stop() {
        let poller = AdaptivePoller::new(Arc::new(UnusedSource), JobStore::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let task = task_with_counter(&poller, 0, Arc::clone(&fired));

        // Outcome already decided, then the caller stops before delivery.
        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);

        task.finish(Outcome::Completed(Job::placeholder("a1").with_status(JobStatus::Completed)));
        task.finish(Outcome::Failed("boom".into()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
