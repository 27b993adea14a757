//! Loading-state coordination
//!
//! [`LoadingCoordinator::with_loading`] wraps an operation with a loading
//! indicator that only appears if the operation is still running after
//! `delay_show`. Once shown, the indicator is hidden when the operation
//! settles, whichever way it settles (including the wrapping future being
//! dropped).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::http::timeout::{with_cancellation, with_timeout};
use crate::http::RequestError;

/// Default delay before the indicator appears
pub const DEFAULT_DELAY_SHOW: Duration = Duration::from_millis(3000);

/// How a single operation should present itself while running
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingOptions {
    pub message: String,
    pub details: Option<String>,
    /// Fail the whole operation with `Timeout` after this long
    pub timeout: Option<Duration>,
    pub show_progress: bool,
    /// Hand the indicator a [`CancelHandle`]
    pub show_cancel: bool,
    /// `None` uses the coordinator's delay
    pub delay_show: Option<Duration>,
}

impl Default for LoadingOptions {
    fn default() -> Self {
        Self {
            message: "Loading...".to_string(),
            details: None,
            timeout: None,
            show_progress: false,
            show_cancel: false,
            delay_show: None,
        }
    }
}

impl LoadingOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_delay(mut self, delay_show: Duration) -> Self {
        self.delay_show = Some(delay_show);
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.show_cancel = true;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }
}

/// One running operation as seen by the indicator
#[derive(Debug, Clone)]
pub struct LoadingSession {
    pub id: String,
    pub message: String,
    pub details: Option<String>,
    pub started_at: DateTime<Utc>,
    pub delay_show: Duration,
    pub show_progress: bool,
    shown: Arc<AtomicBool>,
    token: CancellationToken,
}

impl LoadingSession {
    fn new(options: &LoadingOptions, default_delay: Duration) -> Self {
        Self {
            id: format!("loading_{}", uuid::Uuid::new_v4().simple()),
            message: options.message.clone(),
            details: options.details.clone(),
            started_at: Utc::now(),
            delay_show: options.delay_show.unwrap_or(default_delay),
            show_progress: options.show_progress,
            shown: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    pub fn is_shown(&self) -> bool {
        self.shown.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Lets the user abort a running operation
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Where loading state is displayed
pub trait LoadingIndicator: Send + Sync {
    /// The operation outlived `delay_show`; `cancel` is set when cancellable
    fn show(&self, session: &LoadingSession, cancel: Option<CancelHandle>);

    fn progress(&self, _session: &LoadingSession, _percent: u8) {}

    /// Called exactly once for every `show`
    fn hide(&self, session: &LoadingSession);
}

/// Default indicator: writes loading transitions to the log
#[derive(Debug, Default, Clone)]
pub struct TracingIndicator;

impl LoadingIndicator for TracingIndicator {
    fn show(&self, session: &LoadingSession, cancel: Option<CancelHandle>) {
        tracing::info!(
            session = %session.id,
            message = %session.message,
            details = session.details.as_deref().unwrap_or(""),
            cancellable = cancel.is_some(),
            "Loading"
        );
    }

    fn progress(&self, session: &LoadingSession, percent: u8) {
        tracing::debug!(session = %session.id, percent, "Loading progress");
    }

    fn hide(&self, session: &LoadingSession) {
        let elapsed_ms = (Utc::now() - session.started_at).num_milliseconds();
        tracing::info!(session = %session.id, elapsed_ms, cancelled = session.is_cancelled(), "Loading finished");
    }
}

/// Indicator transition, as captured by [`RecordingIndicator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorEvent {
    Shown { id: String, message: String, cancellable: bool },
    Progress { id: String, percent: u8 },
    Hidden { id: String },
}

/// Indicator that records every transition, for tests and headless use
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    events: Mutex<Vec<IndicatorEvent>>,
    cancel_handles: Mutex<Vec<CancelHandle>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IndicatorEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn shown_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, IndicatorEvent::Shown { .. }))
            .count()
    }

    pub fn hidden_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, IndicatorEvent::Hidden { .. }))
            .count()
    }

    /// Cancel handle given to the most recent cancellable `show`
    pub fn last_cancel_handle(&self) -> Option<CancelHandle> {
        self.cancel_handles.lock().ok().and_then(|h| h.last().cloned())
    }

    fn push(&self, event: IndicatorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl LoadingIndicator for RecordingIndicator {
    fn show(&self, session: &LoadingSession, cancel: Option<CancelHandle>) {
        self.push(IndicatorEvent::Shown {
            id: session.id.clone(),
            message: session.message.clone(),
            cancellable: cancel.is_some(),
        });
        if let (Some(handle), Ok(mut handles)) = (cancel, self.cancel_handles.lock()) {
            handles.push(handle);
        }
    }

    fn progress(&self, session: &LoadingSession, percent: u8) {
        self.push(IndicatorEvent::Progress {
            id: session.id.clone(),
            percent,
        });
    }

    fn hide(&self, session: &LoadingSession) {
        self.push(IndicatorEvent::Hidden { id: session.id.clone() });
    }
}

/// Forwards progress of one operation to the indicator
#[derive(Clone)]
pub struct ProgressReporter {
    indicator: Arc<dyn LoadingIndicator>,
    session: LoadingSession,
}

impl ProgressReporter {
    /// Report `percent` (clamped to 100); ignored unless progress display is
    /// enabled and the indicator is visible
    pub fn report(&self, percent: u8) {
        if self.session.show_progress && self.session.is_shown() {
            self.indicator.progress(&self.session, percent.min(100));
        }
    }

    pub fn session(&self) -> &LoadingSession {
        &self.session
    }
}

/// Hides the indicator and unregisters the session when dropped
struct SessionGuard<'a> {
    coordinator: &'a LoadingCoordinator,
    session: LoadingSession,
}

impl SessionGuard<'_> {
    fn show(&self, cancellable: bool) {
        self.session.shown.store(true, Ordering::SeqCst);
        let cancel = cancellable.then(|| CancelHandle {
            token: self.session.token.clone(),
        });
        self.coordinator.indicator.show(&self.session, cancel);
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.session.shown.swap(false, Ordering::SeqCst) {
            self.coordinator.indicator.hide(&self.session);
        }
        if let Ok(mut active) = self.coordinator.active.lock() {
            active.remove(&self.session.id);
        }
    }
}

/// Runs operations under a loading indicator
pub struct LoadingCoordinator {
    indicator: Arc<dyn LoadingIndicator>,
    active: Mutex<HashMap<String, CancellationToken>>,
    delay_show: Duration,
}

impl Default for LoadingCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(TracingIndicator))
    }
}

impl LoadingCoordinator {
    pub fn new(indicator: Arc<dyn LoadingIndicator>) -> Self {
        Self {
            indicator,
            active: Mutex::new(HashMap::new()),
            delay_show: DEFAULT_DELAY_SHOW,
        }
    }

    /// Delay for operations whose options leave `delay_show` unset
    pub fn with_delay_show(mut self, delay: Duration) -> Self {
        self.delay_show = delay;
        self
    }

    pub fn delay_show(&self) -> Duration {
        self.delay_show
    }

    /// Run `op` under the indicator described by `options`
    pub async fn with_loading<F, T>(&self, options: &LoadingOptions, op: F) -> Result<T, RequestError>
    where
        F: Future<Output = Result<T, RequestError>>,
    {
        self.with_progress(options, |_| op).await
    }

    /// Like [`with_loading`](Self::with_loading); `make_op` receives a
    /// [`ProgressReporter`] for the session
    pub async fn with_progress<M, F, T>(&self, options: &LoadingOptions, make_op: M) -> Result<T, RequestError>
    where
        M: FnOnce(ProgressReporter) -> F,
        F: Future<Output = Result<T, RequestError>>,
    {
        let session = LoadingSession::new(options, self.delay_show);
        let delay = session.delay_show;
        let token = session.token.clone();
        if let Ok(mut active) = self.active.lock() {
            active.insert(session.id.clone(), token.clone());
        }
        let guard = SessionGuard {
            coordinator: self,
            session: session.clone(),
        };

        let op = make_op(ProgressReporter {
            indicator: self.indicator.clone(),
            session,
        });
        let limit = options.timeout;
        let timed = async move {
            match limit {
                Some(limit) => with_timeout(op, limit).await,
                None => op.await,
            }
        };
        let work = with_cancellation(timed, &token);
        tokio::pin!(work);

        let early = tokio::select! {
            biased;
            result = &mut work => Some(result),
            _ = tokio::time::sleep(delay) => None,
        };

        let result = match early {
            Some(result) => result,
            None => {
                guard.show(options.show_cancel);
                work.await
            }
        };

        if let Err(e) = &result {
            tracing::debug!(session = %guard.session.id, kind = %e.kind(), "Loading operation failed");
        }
        drop(guard);
        result
    }

    /// Number of operations currently running under this coordinator
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Cancel every running operation
    pub fn cancel_all(&self) -> usize {
        let Ok(active) = self.active.lock() else { return 0 };
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }
}
