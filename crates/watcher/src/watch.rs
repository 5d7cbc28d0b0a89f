//! Application root that wires polling, the push channel and the
//! notification feed together.
//!
//! [`AuditWatch`] owns the shared [`RealtimeChannel`], one
//! [`AdaptivePoller`] per tracked audit, the [`JobStore`] and the
//! [`NotificationCenter`]. Terminal events from both transports pass
//! through a [`TerminalLedger`] so each audit yields at most one terminal
//! notification per tracking lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use auditwatch_core::connection::ConnectionState;
use auditwatch_core::job::{Job, JobStatus};
use auditwatch_core::store::{ApplyOutcome, JobStore};
use auditwatch_events::{NewNotification, NotificationCenter, NotificationKind};
use auditwatch_poller::{AdaptivePoller, AuditStatusApi, PollerConfig, PollerHandlers, StatusSource};
use auditwatch_realtime::messages::{AlertData, CompletionData, MetricsData, ProgressData};
use auditwatch_realtime::{ChannelEvent, ChannelListeners, RealtimeChannel};
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::ledger::TerminalLedger;

/// Fallback text for a failed audit that reported no error.
const FAILED_FALLBACK: &str = "Audit failed";

pub struct AuditWatch {
    inner: Arc<WatchInner>,
}

struct WatchInner {
    config: WatchConfig,
    store: JobStore,
    center: NotificationCenter,
    source: Arc<dyn StatusSource>,
    poller_config: PollerConfig,
    channel: Arc<RealtimeChannel>,
    pollers: Mutex<HashMap<String, AdaptivePoller>>,
    ledger: TerminalLedger,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

/// How an audit ended, as reported by either transport.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Completed,
    Failed(String),
    Cancelled,
}

impl AuditWatch {
    /// Build the HTTP status source and the push channel from `config`.
    pub fn new(config: WatchConfig) -> Self {
        let source: Arc<dyn StatusSource> = Arc::new(AuditStatusApi::new(config.api_url.clone()));
        let channel = Arc::new(RealtimeChannel::new(config.ws_url.clone()));
        Self::with_parts(config, source, channel)
    }

    /// Build from explicit collaborators.
    pub fn with_parts(
        config: WatchConfig,
        source: Arc<dyn StatusSource>,
        channel: Arc<RealtimeChannel>,
    ) -> Self {
        let poller_config = PollerConfig {
            request_timeout: config.request_timeout,
            ..PollerConfig::default()
        };
        Self {
            inner: Arc::new(WatchInner {
                config,
                store: JobStore::new(),
                center: NotificationCenter::new(),
                source,
                poller_config,
                channel,
                pollers: Mutex::new(HashMap::new()),
                ledger: TerminalLedger::new(),
                bridge: Mutex::new(None),
            }),
        }
    }

    /// Connect the push channel and mirror its state into the feed.
    ///
    /// Requires a tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        inner.channel.connect(inner.listeners());

        let mut state_rx = inner.channel.subscribe_state();
        let center = inner.center.clone();
        center.set_connection_state(*state_rx.borrow_and_update());
        let bridge = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                center.set_connection_state(state);
            }
        });

        if let Some(previous) = lock(&inner.bridge).replace(bridge) {
            previous.abort();
        }
        tracing::info!(ws_url = %inner.config.ws_url, "Audit watch started");
    }

    /// Start (or restart) polling `job_id` and join its room.
    pub fn track(&self, job_id: &str) {
        let inner = &self.inner;
        inner.reset_terminal(job_id);

        let handlers = inner.handlers(job_id);
        {
            let mut pollers = lock(&inner.pollers);
            let poller = pollers.entry(job_id.to_string()).or_insert_with(|| {
                AdaptivePoller::with_config(
                    Arc::clone(&inner.source),
                    inner.store.clone(),
                    inner.poller_config.clone(),
                )
            });
            poller.start(job_id, inner.config.poll_interval, handlers);
        }

        if inner.channel.is_connected() {
            inner.channel.join_room(job_id);
        }
        tracing::info!(job_id, "Tracking audit");
    }

    /// Stop polling `job_id` and leave its room. Returns `false` when the
    /// audit was not tracked.
    pub fn untrack(&self, job_id: &str) -> bool {
        let inner = &self.inner;
        let Some(poller) = lock(&inner.pollers).remove(job_id) else {
            return false;
        };
        poller.stop();

        if inner.channel.is_connected() {
            inner.channel.leave_room(job_id);
        }
        tracing::info!(job_id, "Stopped tracking audit");
        true
    }

    /// Restart polling a tracked audit with a fresh retry budget.
    pub fn restart(&self, job_id: &str) -> bool {
        let inner = &self.inner;
        let pollers = lock(&inner.pollers);
        let Some(poller) = pollers.get(job_id) else {
            tracing::warn!(job_id, "Restart requested for an untracked audit");
            return false;
        };
        inner.reset_terminal(job_id);
        poller.restart();
        true
    }

    /// Tracked audit ids, sorted.
    pub fn tracked(&self) -> Vec<String> {
        self.inner.tracked()
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.inner.pollers)
            .get(job_id)
            .is_some_and(AdaptivePoller::is_active)
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.inner.store.get(job_id)
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.inner.center
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.inner.channel
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.channel.state()
    }

    /// Route a push event as if it had arrived on the channel.
    pub fn handle_event(&self, event: &ChannelEvent) {
        self.inner.handle_event(event);
    }

    /// Stop every poller and disconnect the push channel.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let pollers: Vec<AdaptivePoller> = lock(&inner.pollers).drain().map(|(_, p)| p).collect();
        for poller in &pollers {
            poller.stop();
        }

        if let Some(bridge) = lock(&inner.bridge).take() {
            bridge.abort();
        }

        inner.channel.disconnect().await;
        inner.center.set_connection_state(ConnectionState::Disconnected);
        tracing::info!(stopped_pollers = pollers.len(), "Audit watch shut down");
    }
}

impl WatchInner {
    fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.pollers).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clear the ledger entry and any frozen snapshot so a re-tracked audit
    /// reports fresh state.
    fn reset_terminal(&self, job_id: &str) {
        self.ledger.reset(job_id);
        if self.store.get(job_id).is_some_and(|job| job.is_terminal()) {
            self.store.forget(job_id);
        }
    }

    fn handlers(self: &Arc<Self>, job_id: &str) -> PollerHandlers {
        let on_complete = {
            let weak = Arc::downgrade(self);
            move |job: &Job| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_terminal(&job.id, Terminal::Completed);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(self);
            let job_id = job_id.to_string();
            move |message: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.poll_failed(&job_id, message);
                }
            }
        };
        PollerHandlers::new(on_complete, on_error)
    }

    fn listeners(self: &Arc<Self>) -> ChannelListeners {
        let weak = Arc::downgrade(self);
        ChannelListeners::new()
            .on_audit_progress(with_inner(&weak, |inner, data: &ProgressData| {
                inner.on_progress(data)
            }))
            .on_audit_completion(with_inner(&weak, |inner, data: &CompletionData| {
                inner.on_completion(data)
            }))
            .on_system_alert(with_inner(&weak, |inner, data: &AlertData| {
                inner.on_system_alert(data)
            }))
            .on_metrics_update(with_inner(&weak, |inner, data: &MetricsData| {
                inner.on_metrics_update(data)
            }))
            .on_connect(with_inner(&weak, |inner, connection_id: &str| {
                inner.on_connect(connection_id)
            }))
            .on_disconnect({
                let weak = weak.clone();
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_disconnect();
                    }
                }
            })
            .on_error(with_inner(&weak, |inner, message: &str| {
                inner.on_channel_error(message)
            }))
    }

    fn handle_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::AuditProgress(data) => self.on_progress(data),
            ChannelEvent::AuditCompletion(data) => self.on_completion(data),
            ChannelEvent::SystemAlert(data) => self.on_system_alert(data),
            ChannelEvent::MetricsUpdate(data) => self.on_metrics_update(data),
        }
    }

    // -----------------------------------------------------------------------
    // Terminal events
    // -----------------------------------------------------------------------

    /// Add the terminal notification for `job_id` unless one was already
    /// delivered.
    fn deliver_terminal(&self, job_id: &str, terminal: Terminal) -> bool {
        if !self.ledger.claim(job_id) {
            tracing::debug!(job_id, ?terminal, "Terminal notification already delivered");
            return false;
        }

        let notification = match &terminal {
            Terminal::Completed => NewNotification::success(
                "Audit completed",
                format!("Audit {job_id} finished successfully"),
            ),
            Terminal::Failed(reason) => {
                NewNotification::error("Audit failed", format!("Audit {job_id}: {reason}"))
            }
            Terminal::Cancelled => {
                NewNotification::info("Audit cancelled", format!("Audit {job_id} was cancelled"))
            }
        };
        self.center.add(notification.with_job(job_id));
        tracing::info!(job_id, ?terminal, "Terminal notification delivered");
        true
    }

    /// Poller `on_error`: either the audit failed, or polling gave up.
    fn poll_failed(&self, job_id: &str, message: &str) {
        if self.store.get(job_id).is_some_and(|job| job.is_terminal()) {
            self.deliver_terminal(job_id, Terminal::Failed(message.to_string()));
            return;
        }

        tracing::warn!(job_id, error = message, "Status polling stopped");
        self.center.add(
            NewNotification::error(
                "Status check failed",
                format!("Could not fetch the status of audit {job_id}: {message}"),
            )
            .with_job(job_id),
        );
    }

    // -----------------------------------------------------------------------
    // Push events
    // -----------------------------------------------------------------------

    /// Map an event's audit id to a tracked audit. Events without an id are
    /// attributed to the only tracked audit, if there is exactly one.
    fn resolve_job(&self, audit_id: Option<&str>) -> Option<String> {
        let tracked = self.tracked();
        match audit_id {
            Some(id) if tracked.iter().any(|t| t == id) => Some(id.to_string()),
            Some(id) => {
                tracing::debug!(audit_id = id, "Ignoring push event for untracked audit");
                None
            }
            None if tracked.len() == 1 => tracked.into_iter().next(),
            None => {
                tracing::debug!(tracked = tracked.len(), "Cannot attribute push event without audit id");
                None
            }
        }
    }

    fn on_progress(&self, data: &ProgressData) {
        let Some(job_id) = self.resolve_job(data.audit_id.as_deref()) else {
            return;
        };

        let previous_step = self.store.get(&job_id).and_then(|job| job.current_step);
        match self.store.apply_progress(&job_id, data.progress, data.step.clone()) {
            ApplyOutcome::Updated => {
                if let Some(step) = data.step.as_deref().filter(|s| previous_step.as_deref() != Some(*s)) {
                    self.center.add(
                        NewNotification::progress(step, format!("Audit {job_id}"), data.progress)
                            .with_job(&job_id),
                    );
                }
            }
            ApplyOutcome::Frozen => {
                tracing::debug!(job_id = %job_id, "Ignoring progress for finished audit");
            }
            outcome => {
                tracing::debug!(job_id = %job_id, ?outcome, "Progress not applied");
            }
        }
    }

    fn on_completion(&self, data: &CompletionData) {
        let Some(job_id) = self.resolve_job(data.audit_id.as_deref()) else {
            return;
        };
        let status: JobStatus = match data.status.parse() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Ignoring completion with unknown status");
                return;
            }
        };

        let terminal = match status {
            JobStatus::Completed => Terminal::Completed,
            JobStatus::Failed => Terminal::Failed(
                completion_error(data).unwrap_or_else(|| FAILED_FALLBACK.to_string()),
            ),
            JobStatus::Cancelled => Terminal::Cancelled,
            other => {
                tracing::debug!(job_id = %job_id, status = %other, "Completion event with non-terminal status");
                return;
            }
        };

        let mut job = self
            .store
            .get(&job_id)
            .unwrap_or_else(|| Job::placeholder(&job_id))
            .with_status(status);
        if status == JobStatus::Completed {
            job = job.with_progress(100);
        }
        if let Terminal::Failed(reason) = &terminal {
            job = job.with_error(reason.clone());
        }
        self.store.apply(job);

        self.deliver_terminal(&job_id, terminal);
    }

    fn on_system_alert(&self, data: &AlertData) {
        let kind = alert_kind(&data.level);
        self.center
            .add(NewNotification::new(kind, "System alert", data.message.clone()));
    }

    fn on_metrics_update(&self, data: &MetricsData) {
        if data.alert != Some(true) {
            return;
        }
        let message = data
            .message
            .clone()
            .unwrap_or_else(|| "A monitored metric crossed its threshold".to_string());
        self.center.add(NewNotification::warning("Metrics alert", message));
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// Rooms belong to a physical connection; re-join them after every
    /// (re)connect.
    fn on_connect(&self, connection_id: &str) {
        let tracked = self.tracked();
        for job_id in &tracked {
            self.channel.join_room(job_id);
        }
        tracing::info!(connection_id, rooms = tracked.len(), "Push channel ready");
    }

    fn on_disconnect(&self) {
        self.center.add(NewNotification::warning(
            "Connection lost",
            "Live updates interrupted, reconnecting",
        ));
    }

    fn on_channel_error(&self, message: &str) {
        self.center.add(NewNotification::warning(
            "Live updates unavailable",
            format!("{message}; status polling continues"),
        ));
    }
}

/// Wrap a callback so it runs against the live watcher, if any.
fn with_inner<T: ?Sized>(
    weak: &Weak<WatchInner>,
    f: impl Fn(&WatchInner, &T) + Send + Sync + 'static,
) -> impl Fn(&T) + Send + Sync + 'static {
    let weak = weak.clone();
    move |value: &T| {
        if let Some(inner) = weak.upgrade() {
            f(&inner, value);
        }
    }
}

fn alert_kind(level: &str) -> NotificationKind {
    match level.to_ascii_lowercase().as_str() {
        "error" | "critical" => NotificationKind::Error,
        "warning" | "warn" => NotificationKind::Warning,
        "success" => NotificationKind::Success,
        _ => NotificationKind::Info,
    }
}

fn completion_error(data: &CompletionData) -> Option<String> {
    data.summary
        .as_ref()
        .and_then(|summary| summary.get("error"))
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
