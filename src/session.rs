//! Async driver around the [`SearchCoordinator`].
//!
//! One tokio task owns the coordinator. Views talk to it only through a
//! [`SessionHandle`]: intents go in over an `mpsc` channel, snapshots come
//! out over a `watch` channel, and failure notices are broadcast.
//!
//! A submit spawns two tasks: the catalog fetch and a one-shot slow-load
//! timer. Both report back into the session tagged with the submission
//! ticket. The timer is aborted as soon as the fetch settles, and the fetch
//! is cancelled if the session shuts down while it is still running.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Catalog;
use crate::coordinator::{FormEdit, SearchCoordinator, Snapshot, Ticket};
use crate::errors::{FetchError, SessionClosed};
use crate::models::SearchResult;
use crate::query::{DateRules, SearchParameters, USGS_QUERY_URL, local_today};

/// Delay before an unresolved search is reported as slow.
pub const DEFAULT_SLOW_AFTER: Duration = Duration::from_secs(3);

const INTENT_BUFFER: usize = 32;
const NOTICE_BUFFER: usize = 16;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint requests are built against
    pub base_url: String,
    pub slow_after: Duration,
    pub rules: DateRules,
    /// Source of the caller's current local date
    pub today: fn() -> NaiveDate,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: USGS_QUERY_URL.to_string(),
            slow_after: DEFAULT_SLOW_AFTER,
            rules: DateRules::default(),
            today: local_today,
        }
    }
}

/// Commands accepted by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Edit(FormEdit),
    Submit,
    ToggleSelection(String),
    DismissNotice,
    Shutdown,
}

/// Messages from tasks spawned by the session itself.
#[derive(Debug)]
enum Internal {
    Settled(Ticket, Result<SearchResult, FetchError>),
    Slow(Ticket),
}

/// Cloneable handle for sending intents and observing state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    intents: mpsc::Sender<Intent>,
    snapshots: watch::Receiver<Snapshot>,
    notices: broadcast::Sender<String>,
}

impl SessionHandle {
    /// Queue an intent for the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has stopped.
    pub async fn send(&self, intent: Intent) -> Result<(), SessionClosed> {
        self.intents.send(intent).await.map_err(|_| SessionClosed)
    }

    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has stopped.
    pub async fn edit(&self, edit: FormEdit) -> Result<(), SessionClosed> {
        self.send(Intent::Edit(edit)).await
    }

    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has stopped.
    pub async fn submit(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Submit).await
    }

    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has stopped.
    pub async fn toggle_selection(&self, id: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Intent::ToggleSelection(id.into())).await
    }

    /// Ask the session to stop, cancelling any request in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has already stopped.
    pub async fn shutdown(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Shutdown).await
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Receiver for user-facing failure notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Wait until the published state satisfies `f`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session stops first.
    pub async fn wait_for(&self, f: impl FnMut(&Snapshot) -> bool) -> Result<Snapshot, SessionClosed> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(f).await.map_err(|_| SessionClosed)?;
        Ok(snapshot.clone())
    }
}

/// Handles for the search the coordinator currently considers in flight.
struct InFlight {
    cancel: CancellationToken,
    timer: JoinHandle<()>,
}

struct Session<C> {
    coordinator: SearchCoordinator,
    catalog: Arc<C>,
    config: SessionConfig,
    snapshots: watch::Sender<Snapshot>,
    notices: broadcast::Sender<String>,
    internal: mpsc::UnboundedSender<Internal>,
    in_flight: Option<InFlight>,
}

/// Start a session task over `catalog` with an initial form.
pub fn spawn<C: Catalog>(
    catalog: Arc<C>,
    params: SearchParameters,
    config: SessionConfig,
) -> (SessionHandle, JoinHandle<()>) {
    let coordinator =
        SearchCoordinator::new(params, config.rules, &config.base_url, (config.today)());

    let (intent_tx, intent_rx) = mpsc::channel(INTENT_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(coordinator.snapshot());
    let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let session = Session {
        coordinator,
        catalog,
        config,
        snapshots: snapshot_tx,
        notices: notice_tx.clone(),
        internal: internal_tx,
        in_flight: None,
    };
    let task = tokio::spawn(session.run(intent_rx, internal_rx));

    let handle = SessionHandle {
        intents: intent_tx,
        snapshots: snapshot_rx,
        notices: notice_tx,
    };
    (handle, task)
}

impl<C: Catalog> Session<C> {
    async fn run(
        mut self,
        mut intents: mpsc::Receiver<Intent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!("search session started");
        loop {
            tokio::select! {
                Some(msg) = internal.recv() => self.on_internal(msg),
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => self.on_intent(intent),
                },
            }
            self.publish();
        }
        self.teardown();
    }

    fn today(&self) -> NaiveDate {
        (self.config.today)()
    }

    fn on_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Edit(edit) => {
                let today = self.today();
                self.coordinator.edit(edit, today);
            }
            Intent::Submit => self.start_search(),
            Intent::ToggleSelection(id) => match self.coordinator.toggle_selection(&id) {
                Ok(_) => debug!(
                    selected = self.coordinator.selection().selected().count(),
                    "selection toggled"
                ),
                Err(e) => warn!("ignoring selection toggle: {e}"),
            },
            Intent::DismissNotice => self.coordinator.dismiss_notice(),
            Intent::Shutdown => {}
        }
    }

    fn start_search(&mut self) {
        let today = self.today();
        let Some(submission) = self.coordinator.submit(today) else {
            return;
        };
        let ticket = submission.ticket;
        let cancel = CancellationToken::new();

        let catalog = Arc::clone(&self.catalog);
        let token = cancel.clone();
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let outcome = catalog.fetch(&submission.request, &token).await;
            // Receiver is gone once the session has shut down
            let _ = tx.send(Internal::Settled(ticket, outcome));
        });

        let delay = self.config.slow_after;
        let tx = self.internal.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::Slow(ticket));
        });

        self.in_flight = Some(InFlight { cancel, timer });
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Slow(ticket) => {
                self.coordinator.mark_slow(ticket);
            }
            Internal::Settled(ticket, outcome) => {
                if self.coordinator.in_flight() == Some(ticket)
                    && let Some(flight) = self.in_flight.take()
                {
                    flight.timer.abort();
                }
                if let Some(notice) = self.coordinator.settle(ticket, outcome) {
                    // No subscribers is fine
                    let _ = self.notices.send(notice.to_string());
                }
            }
        }
    }

    fn publish(&self) {
        let next = self.coordinator.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            info!("session closing with a search in flight; cancelling");
            flight.cancel.cancel();
            flight.timer.abort();
        }
        debug!("search session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify};

    use crate::coordinator::RequestStatus;
    use crate::geo::GeoPoint;
    use crate::models::tests::event;
    use crate::query::{CatalogRequest, DateBound};

    type Outcome = Result<SearchResult, FetchError>;

    /// Catalog that resolves each fetch with the next scripted outcome.
    struct ScriptedCatalog {
        outcomes: Mutex<mpsc::UnboundedReceiver<Outcome>>,
        calls: AtomicUsize,
        cancelled: Notify,
    }

    #[async_trait]
    impl Catalog for ScriptedCatalog {
        async fn fetch(
            &self,
            _request: &CatalogRequest,
            cancel: &CancellationToken,
        ) -> Result<SearchResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().await;
            tokio::select! {
                () = cancel.cancelled() => {
                    self.cancelled.notify_one();
                    Err(FetchError::Cancelled)
                }
                outcome = outcomes.recv() => {
                    outcome.unwrap_or_else(|| Err(FetchError::Decode("script exhausted".into())))
                }
            }
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn start() -> (
        SessionHandle,
        JoinHandle<()>,
        Arc<ScriptedCatalog>,
        mpsc::UnboundedSender<Outcome>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let catalog = Arc::new(ScriptedCatalog {
            outcomes: Mutex::new(rx),
            calls: AtomicUsize::new(0),
            cancelled: Notify::new(),
        });
        let params = SearchParameters {
            location: Some(GeoPoint::new(37.77, -122.42)),
            end: Some(DateBound::Fixed(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())),
            ..SearchParameters::default()
        };
        let config = SessionConfig {
            today,
            ..SessionConfig::default()
        };
        let (handle, task) = spawn(Arc::clone(&catalog), params, config);
        (handle, task, catalog, tx)
    }

    fn result(ids: &[&str]) -> SearchResult {
        SearchResult {
            events: ids.iter().map(|id| event(id, 8.0, 35.0, -120.0, 0)).collect(),
            bbox: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_then_success() {
        let (handle, _task, _catalog, outcomes) = start();

        handle.submit().await.unwrap();
        let snap = handle
            .wait_for(|s| s.status == RequestStatus::InFlightSlow)
            .await
            .unwrap();
        assert!(snap.slow_load);
        assert!(snap.result.is_none());

        outcomes.send(Ok(result(&["a", "b", "c"]))).unwrap();
        let snap = handle
            .wait_for(|s| s.status == RequestStatus::Succeeded)
            .await
            .unwrap();
        assert!(!snap.slow_load);
        assert_eq!(snap.selection.len(), 3);
        assert_eq!(snap.selection.selected().count(), 0);
        assert_eq!(snap.last_searched, Some(GeoPoint::new(37.77, -122.42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_request_never_turns_slow() {
        let (handle, _task, _catalog, outcomes) = start();

        outcomes.send(Ok(result(&["a"]))).unwrap();
        handle.submit().await.unwrap();
        handle
            .wait_for(|s| s.status == RequestStatus::Succeeded)
            .await
            .unwrap();

        tokio::time::sleep(DEFAULT_SLOW_AFTER * 2).await;
        let snap = handle.snapshot();
        assert_eq!(snap.status, RequestStatus::Succeeded);
        assert!(!snap.slow_load);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_in_flight_starts_nothing() {
        let (handle, _task, catalog, outcomes) = start();

        handle.submit().await.unwrap();
        handle.submit().await.unwrap();
        handle.edit(FormEdit::RadiusKm(500.0)).await.unwrap();
        handle
            .wait_for(|s| (s.params.radius_km - 500.0).abs() < 1e-9)
            .await
            .unwrap();
        assert!(handle.snapshot().status.is_in_flight());

        outcomes.send(Ok(result(&["a"]))).unwrap();
        handle
            .wait_for(|s| s.status == RequestStatus::Succeeded)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().status, RequestStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_broadcasts_notice() {
        let (handle, _task, _catalog, outcomes) = start();
        let mut notices = handle.notices();

        handle.submit().await.unwrap();
        outcomes
            .send(Err(FetchError::Decode("truncated".into())))
            .unwrap();

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice, "An error occurred while communicating with USGS.");
        let snap = handle
            .wait_for(|s| s.status == RequestStatus::Idle && s.notice.is_some())
            .await
            .unwrap();
        assert!(snap.result.is_none());
        assert!(snap.can_submit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failure_then_resubmit() {
        let (handle, _task, catalog, outcomes) = start();

        handle.submit().await.unwrap();
        handle.wait_for(|s| s.slow_load).await.unwrap();

        outcomes
            .send(Err(FetchError::Server {
                status: 500,
                message: "internal".into(),
            }))
            .unwrap();
        let snap = handle
            .wait_for(|s| !s.status.is_in_flight())
            .await
            .unwrap();
        assert_eq!(snap.status, RequestStatus::Idle);
        assert!(!snap.slow_load);
        assert!(snap.notice.is_some());

        outcomes.send(Ok(result(&["a"]))).unwrap();
        handle.submit().await.unwrap();
        let snap = handle
            .wait_for(|s| s.status == RequestStatus::Succeeded)
            .await
            .unwrap();
        assert!(snap.notice.is_none());
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_form_submit_is_noop() {
        let (handle, _task, catalog, _outcomes) = start();

        handle.edit(FormEdit::StartDate(None)).await.unwrap();
        handle.submit().await.unwrap();
        handle.edit(FormEdit::ResultLimit(100)).await.unwrap();
        let snap = handle
            .wait_for(|s| s.params.result_limit == 100)
            .await
            .unwrap();

        assert_eq!(snap.status, RequestStatus::Idle);
        assert!(!snap.can_submit);
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_through_handle() {
        let (handle, _task, _catalog, outcomes) = start();

        outcomes.send(Ok(result(&["a", "b"]))).unwrap();
        handle.submit().await.unwrap();
        handle
            .wait_for(|s| s.status == RequestStatus::Succeeded)
            .await
            .unwrap();

        handle.toggle_selection("b").await.unwrap();
        let snap = handle.wait_for(|s| s.selection.is_selected("b")).await.unwrap();
        assert!(!snap.selection.is_selected("a"));

        handle.toggle_selection("missing").await.unwrap();
        handle.toggle_selection("b").await.unwrap();
        let snap = handle.wait_for(|s| !s.selection.is_selected("b")).await.unwrap();
        assert_eq!(snap.selection.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_request() {
        let (handle, task, catalog, _outcomes) = start();

        handle.submit().await.unwrap();
        handle
            .wait_for(|s| s.status.is_in_flight())
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        catalog.cancelled.notified().await;
        assert!(handle.submit().await.is_err());
    }
}
