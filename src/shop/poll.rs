//! Live-update polling for search pages.
//!
//! A [`LivePoller`] runs only while the view has a search term. On every
//! tick it asks a [`RefreshSignal`] whether anything changed and, if so,
//! sends a [`RefreshRequest`] to whoever owns the page. The signal is
//! opaque to the poller; the server supplies [`RevisionSignal`], backed by
//! the data revision that every successful save bumps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::view_state::ViewState;
use crate::errors::ShopError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Monotonic counter of committed data changes.
#[derive(Debug, Clone, Default)]
pub struct Revision(Arc<AtomicU64>);

impl Revision {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Record a change and return the new revision.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
pub trait RefreshSignal: Send + Sync {
    /// True when the data behind the view changed since the previous call.
    async fn changed(&self) -> Result<bool, ShopError>;
}

/// Reports a change whenever the revision moved past the last one seen.
pub struct RevisionSignal {
    revision: Revision,
    seen: AtomicU64,
}

impl RevisionSignal {
    pub fn new(revision: Revision) -> Self {
        let seen = AtomicU64::new(revision.current());
        Self { revision, seen }
    }
}

#[async_trait]
impl RefreshSignal for RevisionSignal {
    async fn changed(&self) -> Result<bool, ShopError> {
        let current = self.revision.current();
        let previous = self.seen.swap(current, Ordering::SeqCst);
        Ok(current != previous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub search_text: String,
}

/// Running poll task. Dropping the handle stops polling.
#[derive(Debug)]
pub struct PollHandle {
    search_text: String,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn search_text(&self) -> &str {
        &self.search_text
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct LivePoller {
    interval: Duration,
    signal: Arc<dyn RefreshSignal>,
    tx: mpsc::Sender<RefreshRequest>,
    handle: Option<PollHandle>,
}

impl LivePoller {
    pub fn new(
        interval: Duration,
        signal: Arc<dyn RefreshSignal>,
        tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        Self {
            interval,
            signal,
            tx,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start, restart or stop polling to match the view's search term.
    /// Must be called from within a tokio runtime.
    pub fn sync(&mut self, view: &ViewState) {
        match view.search_text() {
            None => {
                if self.handle.take().is_some() {
                    tracing::debug!("search cleared, live polling stopped");
                }
            }
            Some(text) => {
                if self.handle.as_ref().is_some_and(|h| h.search_text() == text) {
                    return;
                }
                self.handle = Some(self.spawn(text.to_string()));
            }
        }
    }

    pub fn stop(&mut self) {
        self.handle = None;
    }

    fn spawn(&self, search_text: String) -> PollHandle {
        let interval = self.interval;
        let signal = Arc::clone(&self.signal);
        let tx = self.tx.clone();
        let text = search_text.clone();

        tracing::debug!(search_text = %text, interval_ms = interval.as_millis() as u64, "live polling started");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match signal.changed().await {
                    Ok(true) => {
                        let request = RefreshRequest {
                            search_text: text.clone(),
                        };
                        if tx.send(request).await.is_err() {
                            // Page is gone.
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "refresh signal failed");
                    }
                }
            }
        });

        PollHandle { search_text, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::view_state::ViewQuery;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysChanged {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshSignal for AlwaysChanged {
        async fn changed(&self) -> Result<bool, ShopError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn view(search: Option<&str>) -> ViewState {
        ViewState::from_query(&ViewQuery {
            page: None,
            search_text: search.map(str::to_string),
        })
    }

    #[test]
    fn test_revision_bump() {
        let rev = Revision::default();
        assert_eq!(rev.current(), 0);
        assert_eq!(rev.bump(), 1);
        assert_eq!(rev.bump(), 2);
        assert_eq!(rev.clone().current(), 2);
    }

    #[tokio::test]
    async fn test_revision_signal_reports_each_change_once() {
        let rev = Revision::default();
        rev.bump();
        let signal = RevisionSignal::new(rev.clone());
        assert!(!signal.changed().await.unwrap());
        rev.bump();
        assert!(signal.changed().await.unwrap());
        assert!(!signal.changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_poller_does_not_run_without_search() {
        let (tx, _rx) = mpsc::channel(8);
        let signal = Arc::new(AlwaysChanged {
            calls: AtomicUsize::new(0),
        });
        let mut poller = LivePoller::new(Duration::from_millis(10), signal, tx);
        poller.sync(&view(None));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_poller_sends_refresh_when_changed() {
        let (tx, mut rx) = mpsc::channel(8);
        let signal = Arc::new(AlwaysChanged {
            calls: AtomicUsize::new(0),
        });
        let mut poller = LivePoller::new(Duration::from_millis(10), signal, tx);
        poller.sync(&view(Some("ada")));
        assert!(poller.is_running());

        let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poll should fire")
            .unwrap();
        assert_eq!(request.search_text, "ada");
    }

    #[tokio::test]
    async fn test_clearing_search_stops_polling() {
        let (tx, _rx) = mpsc::channel(64);
        let signal = Arc::new(AlwaysChanged {
            calls: AtomicUsize::new(0),
        });
        let mut poller = LivePoller::new(Duration::from_millis(10), signal.clone(), tx);
        poller.sync(&view(Some("ada")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        poller.sync(&view(None));
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = signal.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(signal.calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_new_search_restarts_poller() {
        let (tx, mut rx) = mpsc::channel(64);
        let signal = Arc::new(AlwaysChanged {
            calls: AtomicUsize::new(0),
        });
        let mut poller = LivePoller::new(Duration::from_millis(10), signal, tx);
        poller.sync(&view(Some("old")));
        poller.sync(&view(Some("new")));
        let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poll should fire")
            .unwrap();
        assert_eq!(request.search_text, "new");
    }

    #[tokio::test]
    async fn test_poller_exits_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let signal = Arc::new(AlwaysChanged {
            calls: AtomicUsize::new(0),
        });
        let mut poller = LivePoller::new(Duration::from_millis(10), signal.clone(), tx);
        poller.sync(&view(Some("ada")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(signal.calls.load(Ordering::SeqCst), 1);
    }
}
