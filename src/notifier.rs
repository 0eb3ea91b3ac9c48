//! Tells the reporting user when their report has been dispatched.
//!
//! A watch subscribes to the store's status channel, then checks the report's
//! current status, so a dispatch that lands between submission and the start
//! of the watch is still seen. The callback is `FnOnce` and the watch task
//! ends right after calling it.

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::report::{ReportId, Status};
use crate::store::{IncidentStore, StatusChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Notified,
    Cancelled,
    /// The report no longer exists.
    Abandoned,
}

#[derive(Debug)]
pub struct WatchHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<WatchOutcome>>,
}

impl WatchHandle {
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub async fn finished(mut self) -> WatchOutcome {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(WatchOutcome::Cancelled),
            None => WatchOutcome::Cancelled,
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub fn watch<F>(store: Arc<IncidentStore>, id: ReportId, on_dispatched: F) -> WatchHandle
where
    F: FnOnce(StatusChange) + Send + 'static,
{
    let events = store.subscribe();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(run(store, id, events, cancel_rx, on_dispatched));
    debug!(%id, "status watch started");
    WatchHandle {
        cancel: Some(cancel_tx),
        task: Some(task),
    }
}

async fn run<F>(
    store: Arc<IncidentStore>,
    id: ReportId,
    mut events: broadcast::Receiver<StatusChange>,
    mut cancel: oneshot::Receiver<()>,
    on_dispatched: F,
) -> WatchOutcome
where
    F: FnOnce(StatusChange) + Send + 'static,
{
    let outcome = loop {
        let Some(report) = store.find_by_id(id) else {
            break WatchOutcome::Abandoned;
        };
        if report.status() == Status::Dispatched {
            on_dispatched(StatusChange {
                id,
                from: Status::Pending,
                to: Status::Dispatched,
            });
            break WatchOutcome::Notified;
        }

        // Wait for something relevant, then re-read the store above.
        tokio::select! {
            _ = &mut cancel => break WatchOutcome::Cancelled,
            () = next_change_for(&mut events, id) => {}
        }
    };
    debug!(%id, ?outcome, "status watch ended");
    outcome
}

/// Resolves once the store should be re-checked for `id`.
async fn next_change_for(events: &mut broadcast::Receiver<StatusChange>, id: ReportId) {
    loop {
        match events.recv().await {
            Ok(change) if change.id == id => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%id, skipped, "status watch lagged; re-reading store");
                return;
            }
            // The sender lives in the store this task keeps alive.
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
