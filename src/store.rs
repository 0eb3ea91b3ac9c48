//! Process-wide incident store.
//!
//! Holds every submitted [`Report`] in insertion order. The two mutators,
//! [`IncidentStore::insert`] and [`IncidentStore::set_status`], run under a
//! single write lock so readers never see a half-applied change. Every status
//! change is also published on a broadcast channel for the notifier.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::report::{Report, ReportId, Status};
use crate::triage::RouteRef;

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("report {0} already exists")]
    DuplicateId(ReportId),
    #[error("report {0} not found")]
    NotFound(ReportId),
    #[error("report {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: ReportId,
        from: Status,
        to: Status,
    },
}

/// Published after a status change has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub id: ReportId,
    pub from: Status,
    pub to: Status,
}

#[derive(Default)]
struct Inner {
    reports: Vec<Report>,
    index: HashMap<ReportId, usize>,
    last_id: u64,
}

pub struct IncidentStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StatusChange>,
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out the next report id: the current time in milliseconds, bumped
    /// past the previous id when two reports land in the same millisecond.
    pub fn allocate_id(&self) -> ReportId {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut inner = self.write();
        let next = now.max(inner.last_id + 1);
        inner.last_id = next;
        ReportId::new(next)
    }

    pub fn insert(&self, report: Report) -> Result<(), StoreError> {
        let id = report.id();
        let mut inner = self.write();
        if inner.index.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        inner.last_id = inner.last_id.max(id.value());
        let position = inner.reports.len();
        inner.reports.push(report);
        inner.index.insert(id, position);
        debug!(%id, "report inserted");
        Ok(())
    }

    pub fn find_by_id(&self, id: ReportId) -> Option<Report> {
        let inner = self.read();
        inner.index.get(&id).map(|&i| inner.reports[i].clone())
    }

    pub fn set_status(&self, id: ReportId, status: Status) -> Result<(), StoreError> {
        self.transition(id, status, None)
    }

    /// Same as [`IncidentStore::set_status`] with `Dispatched`, recording the
    /// assigned route in the same write.
    pub fn dispatch(&self, id: ReportId, route: Option<RouteRef>) -> Result<(), StoreError> {
        self.transition(id, Status::Dispatched, route)
    }

    fn transition(
        &self,
        id: ReportId,
        to: Status,
        route: Option<RouteRef>,
    ) -> Result<(), StoreError> {
        let mut inner = self.write();
        let position = *inner.index.get(&id).ok_or(StoreError::NotFound(id))?;
        let report = &mut inner.reports[position];
        let from = report.status();
        if !from.can_become(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }
        report.set_status(to);
        if let Some(route) = route {
            report.assign_route(route);
        }
        debug!(%id, ?from, ?to, "report status changed");

        // Sent while still holding the lock so subscribers observe changes in
        // the same order as the store applied them. No receivers is fine.
        let _ = self.events.send(StatusChange { id, from, to });
        Ok(())
    }

    /// Snapshot of all reports in insertion order.
    pub fn all(&self) -> Vec<Report> {
        self.read().reports.clone()
    }

    pub fn len(&self) -> usize {
        self.read().reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Location, Severity, Verification};

    fn report(id: u64, severity: Severity) -> Report {
        Report::new(
            ReportId::new(id),
            Utc::now(),
            Location::fallback(),
            severity,
            1,
            Verification::Sms,
        )
    }

    #[test]
    fn insert_keeps_order_and_rejects_duplicates() {
        let store = IncidentStore::new();
        store.insert(report(2, Severity::Low)).unwrap();
        store.insert(report(1, Severity::High)).unwrap();
        assert_eq!(
            store.insert(report(2, Severity::Med)),
            Err(StoreError::DuplicateId(ReportId::new(2)))
        );

        let ids: Vec<u64> = store.all().iter().map(|r| r.id().value()).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn find_missing_is_none() {
        let store = IncidentStore::new();
        assert!(store.find_by_id(ReportId::new(9)).is_none());
    }

    #[test]
    fn dispatch_succeeds_exactly_once() {
        let store = IncidentStore::new();
        let id = ReportId::new(5);
        store.insert(report(5, Severity::High)).unwrap();

        store.set_status(id, Status::Dispatched).unwrap();
        assert_eq!(
            store.set_status(id, Status::Dispatched),
            Err(StoreError::InvalidTransition {
                id,
                from: Status::Dispatched,
                to: Status::Dispatched,
            })
        );
        assert_eq!(store.find_by_id(id).unwrap().status(), Status::Dispatched);
    }

    #[test]
    fn no_way_back_to_pending() {
        let store = IncidentStore::new();
        let id = ReportId::new(5);
        store.insert(report(5, Severity::High)).unwrap();
        assert!(matches!(
            store.set_status(id, Status::Pending),
            Err(StoreError::InvalidTransition { .. })
        ));
        store.set_status(id, Status::Dispatched).unwrap();
        assert!(store.set_status(id, Status::Pending).is_err());
        assert_eq!(store.find_by_id(id).unwrap().status(), Status::Dispatched);
    }

    #[test]
    fn set_status_on_unknown_id() {
        let store = IncidentStore::new();
        assert_eq!(
            store.set_status(ReportId::new(1), Status::Dispatched),
            Err(StoreError::NotFound(ReportId::new(1)))
        );
    }

    #[test]
    fn status_change_is_published() {
        let store = IncidentStore::new();
        let mut rx = store.subscribe();
        store.insert(report(3, Severity::Low)).unwrap();
        store.set_status(ReportId::new(3), Status::Dispatched).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StatusChange {
                id: ReportId::new(3),
                from: Status::Pending,
                to: Status::Dispatched,
            }
        );
    }

    #[test]
    fn allocated_ids_strictly_increase() {
        let store = IncidentStore::new();
        let mut previous = store.allocate_id();
        for _ in 0..100 {
            let next = store.allocate_id();
            assert!(next > previous);
            previous = next;
        }
    }
}
