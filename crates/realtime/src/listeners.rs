//! Listener registry for push-channel events.
//!
//! A [`ChannelListeners`] value is handed to
//! [`RealtimeChannel::connect`](crate::RealtimeChannel::connect) and is
//! released on disconnect. Every logical event has exactly one callback
//! slot, whichever delivery path (named event or envelope) carried it.

use std::fmt;
use std::sync::Arc;

use crate::messages::{AlertData, ChannelEvent, CompletionData, MetricsData, ProgressData};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Signal = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct ChannelListeners {
    on_progress: Option<Callback<ProgressData>>,
    on_completion: Option<Callback<CompletionData>>,
    on_system_alert: Option<Callback<AlertData>>,
    on_metrics_update: Option<Callback<MetricsData>>,
    on_connect: Option<Callback<str>>,
    on_disconnect: Option<Signal>,
    on_error: Option<Callback<str>>,
}

impl ChannelListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_audit_progress(mut self, f: impl Fn(&ProgressData) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_audit_completion(
        mut self,
        f: impl Fn(&CompletionData) + Send + Sync + 'static,
    ) -> Self {
        self.on_completion = Some(Arc::new(f));
        self
    }

    pub fn on_system_alert(mut self, f: impl Fn(&AlertData) + Send + Sync + 'static) -> Self {
        self.on_system_alert = Some(Arc::new(f));
        self
    }

    pub fn on_metrics_update(mut self, f: impl Fn(&MetricsData) + Send + Sync + 'static) -> Self {
        self.on_metrics_update = Some(Arc::new(f));
        self
    }

    /// Called with the connection id every time a physical connection is
    /// established, including after a reconnect.
    pub fn on_connect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called when the channel gives up reconnecting.
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Route a parsed event to its callback.
    pub fn dispatch(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::AuditProgress(data) => call(&self.on_progress, data),
            ChannelEvent::AuditCompletion(data) => call(&self.on_completion, data),
            ChannelEvent::SystemAlert(data) => call(&self.on_system_alert, data),
            ChannelEvent::MetricsUpdate(data) => call(&self.on_metrics_update, data),
        }
    }

    pub(crate) fn connected(&self, connection_id: &str) {
        call(&self.on_connect, connection_id);
    }

    pub(crate) fn disconnected(&self) {
        if let Some(f) = &self.on_disconnect {
            f();
        }
    }

    pub(crate) fn error(&self, message: &str) {
        call(&self.on_error, message);
    }
}

fn call<T: ?Sized>(slot: &Option<Callback<T>>, value: &T) {
    if let Some(f) = slot {
        f(value);
    }
}

impl fmt::Debug for ChannelListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelListeners")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .field("on_system_alert", &self.on_system_alert.is_some())
            .field("on_metrics_update", &self.on_metrics_update.is_some())
            .finish_non_exhaustive()
    }
}
