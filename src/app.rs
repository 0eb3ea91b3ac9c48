//! Application state shared by all request handlers.
//!
//! Built once at startup, handed to the router, and torn down on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::geodesy::EvacuationSite;
use crate::geolocation::{ClientGeolocation, GeolocationResult};
use crate::lifecycle::{LifecycleConfig, LifecycleError, ReportSession};
use crate::notifier::WatchHandle;
use crate::report::Report;
use crate::store::{IncidentStore, StatusChange};

/// Per-user report form plus the plumbing the HTTP layer needs around it.
pub struct SessionEntry {
    pub session: Arc<ReportSession>,
    gps: Option<oneshot::Sender<GeolocationResult>>,
    watch: Option<WatchHandle>,
    dispatch_notice: Arc<Mutex<Option<StatusChange>>>,
    last_seen: Instant,
}

impl SessionEntry {
    pub fn dispatch_notice(&self) -> Option<StatusChange> {
        *lock(&self.dispatch_notice)
    }

    fn teardown(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
        }
        self.gps = None;
        self.session.teardown();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What became of a browser geolocation outcome handed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsDelivery {
    Delivered,
    /// An earlier outcome was already handed over.
    AlreadyDelivered,
    /// The form stopped waiting (timed out, cancelled or submitted).
    Closed,
}

pub struct AppState {
    pub store: Arc<IncidentStore>,
    pub sites: Vec<EvacuationSite>,
    lifecycle: LifecycleConfig,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl AppState {
    pub fn new(sites: Vec<EvacuationSite>, lifecycle: LifecycleConfig) -> Self {
        Self {
            store: Arc::new(IncidentStore::new()),
            sites,
            lifecycle,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a report form whose automatic location arrives via
    /// [`AppState::deliver_gps`].
    pub fn open_session(&self) -> Result<Uuid, LifecycleError> {
        let session = Arc::new(ReportSession::new(self.lifecycle));
        let (gps, provider) = ClientGeolocation::channel();
        session.start(provider)?;

        let id = Uuid::new_v4();
        lock(&self.sessions).insert(
            id,
            SessionEntry {
                session,
                gps: Some(gps),
                watch: None,
                dispatch_notice: Arc::new(Mutex::new(None)),
                last_seen: Instant::now(),
            },
        );
        info!(%id, "session opened");
        Ok(id)
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<ReportSession>> {
        lock(&self.sessions).get_mut(&id).map(|e| {
            e.last_seen = Instant::now();
            e.session.clone()
        })
    }

    pub fn dispatch_notice(&self, id: Uuid) -> Option<StatusChange> {
        lock(&self.sessions).get(&id).and_then(SessionEntry::dispatch_notice)
    }

    /// Hands the browser's geolocation outcome to the waiting form. Returns
    /// `None` if the session is unknown.
    pub fn deliver_gps(&self, id: Uuid, result: GeolocationResult) -> Option<GpsDelivery> {
        let mut sessions = lock(&self.sessions);
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Instant::now();
        let delivery = match entry.gps.take() {
            None => GpsDelivery::AlreadyDelivered,
            Some(tx) if tx.is_closed() => {
                entry.gps = Some(tx);
                GpsDelivery::Closed
            }
            Some(tx) => match tx.send(result) {
                Ok(()) => GpsDelivery::Delivered,
                Err(_) => GpsDelivery::Closed,
            },
        };
        Some(delivery)
    }

    /// Submits the session's form and records the dispatch notice for the
    /// user when it comes.
    pub fn submit(&self, id: Uuid) -> Option<Result<Report, LifecycleError>> {
        let mut sessions = lock(&self.sessions);
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = Instant::now();
        let notice = entry.dispatch_notice.clone();
        let result = entry.session.submit(&self.store, move |change| {
            info!(id = %change.id, "reporter notified of dispatch");
            *lock(&notice) = Some(change);
        });
        Some(result.map(|(report, watch)| {
            if let Some(mut previous) = entry.watch.replace(watch) {
                previous.cancel();
            }
            report
        }))
    }

    /// Cancels the form and tears the session down. Returns `false` if the
    /// session is unknown.
    pub fn close_session(&self, id: Uuid) -> bool {
        let Some(mut entry) = lock(&self.sessions).remove(&id) else {
            return false;
        };
        // Already idle or submitted is fine here.
        let _ = entry.session.cancel();
        entry.teardown();
        info!(%id, "session closed");
        true
    }

    /// Tears down sessions nobody has touched for `ttl`. Returns how many
    /// went.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|id, entry| {
            if entry.last_seen.elapsed() < ttl {
                return true;
            }
            entry.teardown();
            debug!(%id, "idle session evicted");
            false
        });
        before - sessions.len()
    }

    /// Periodically evicts idle sessions until the state is dropped.
    pub fn spawn_idle_eviction(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let state = Arc::downgrade(self);
        let period = (ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            loop {
                ticks.tick().await;
                let Some(state) = state.upgrade() else { break };
                let evicted = state.evict_idle(ttl);
                if evicted > 0 {
                    info!(evicted, "idle sessions evicted");
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let mut sessions = lock(&self.sessions);
        let count = sessions.len();
        for (_, mut entry) in sessions.drain() {
            entry.teardown();
        }
        info!(sessions = count, "application state torn down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::default_sites;
    use crate::geodesy::Coordinate;
    use crate::geolocation::{GeoFix, GeolocationError};
    use crate::lifecycle::Phase;
    use crate::report::{Severity, Status};
    use crate::triage;

    #[tokio::test]
    async fn gps_is_delivered_once() {
        let state = AppState::new(default_sites(), LifecycleConfig::default());
        let id = state.open_session().unwrap();
        let fix = GeoFix {
            coordinate: Coordinate::new(14.6, 121.0),
            accuracy: 12.0,
        };
        assert_eq!(state.deliver_gps(id, Ok(fix)), Some(GpsDelivery::Delivered));
        assert_eq!(
            state.deliver_gps(id, Ok(fix)),
            Some(GpsDelivery::AlreadyDelivered)
        );
        assert_eq!(state.deliver_gps(Uuid::new_v4(), Ok(fix)), None);

        let session = state.session(id).unwrap();
        session.settle_location().await;
        assert_eq!(session.draft().phase, Phase::FormActive);
        assert_eq!(session.draft().location.unwrap().accuracy, 12.0);
    }

    #[tokio::test]
    async fn gps_after_timeout_reports_closed() {
        let lifecycle = LifecycleConfig {
            geolocation_timeout: Duration::from_millis(10),
            ..LifecycleConfig::default()
        };
        let state = AppState::new(default_sites(), lifecycle);
        let id = state.open_session().unwrap();
        state.session(id).unwrap().settle_location().await;

        let fix = GeoFix {
            coordinate: Coordinate::new(14.6, 121.0),
            accuracy: 12.0,
        };
        assert_eq!(state.deliver_gps(id, Ok(fix)), Some(GpsDelivery::Closed));
        assert_eq!(state.deliver_gps(id, Ok(fix)), Some(GpsDelivery::Closed));
        let draft = state.session(id).unwrap().draft();
        assert_eq!(draft.geolocation_error, Some(GeolocationError::Timeout));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let state = AppState::new(default_sites(), LifecycleConfig::default());
        let stale = state.open_session().unwrap();
        state
            .session(stale)
            .unwrap()
            .select_severity(Severity::High)
            .unwrap();
        state.submit(stale).unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = state.open_session().unwrap();

        assert_eq!(state.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(state.evict_idle(Duration::from_millis(30)), 1);
        assert!(state.session(stale).is_none());
        assert!(state.session(fresh).is_some());
        assert_eq!(state.store.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_notice_reaches_session() {
        let state = AppState::new(default_sites(), LifecycleConfig::default());
        let id = state.open_session().unwrap();
        state
            .session(id)
            .unwrap()
            .select_severity(Severity::High)
            .unwrap();
        let report = state.submit(id).unwrap().unwrap();
        assert!(state.dispatch_notice(id).is_none());

        triage::dispatch(&state.store, &state.sites, report.id()).unwrap();
        for _ in 0..50 {
            if state.dispatch_notice(id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let notice = state.dispatch_notice(id).unwrap();
        assert_eq!(notice.id, report.id());
        assert_eq!(notice.to, Status::Dispatched);
    }

    #[tokio::test]
    async fn closing_unknown_session_is_reported() {
        let state = AppState::new(default_sites(), LifecycleConfig::default());
        assert!(!state.close_session(Uuid::new_v4()));
        let id = state.open_session().unwrap();
        assert!(state.close_session(id));
        assert!(state.session(id).is_none());
    }
}
