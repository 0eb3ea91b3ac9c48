//! Flood report data model.
//!
//! A [`Report`] is built once on submission and then owned by the incident
//! store. Only its status (and the route assigned at dispatch) ever change
//! afterwards, and only through the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geodesy::Coordinate;
use crate::triage::RouteRef;

/// Accuracy value marking a location picked by hand on the map.
pub const MANUAL_ACCURACY_M: f64 = 0.0;

/// Used when neither GPS nor the picker ever produced a position.
pub const FALLBACK_COORDINATE: Coordinate = Coordinate::new(14.5995, 120.9842);
pub const FALLBACK_ACCURACY_M: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ReportId(u64);

impl ReportId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPT-{}", self.0)
    }
}

impl std::str::FromStr for ReportId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("RPT-")
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| format!("invalid report id: {s}"))
    }
}

impl From<ReportId> for String {
    fn from(id: ReportId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ReportId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    pub const fn urgency(self) -> Urgency {
        match self {
            Self::High => Urgency::Critical,
            Self::Med => Urgency::Moderate,
            Self::Low => Urgency::Low,
        }
    }
}

/// Triage priority, derived from [`Severity`] and never set on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Moderate,
    Critical,
}

impl Urgency {
    pub const fn rank(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::Moderate => 2,
            Self::Low => 1,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::Critical => "Critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Dispatched,
}

impl Status {
    /// The only allowed transition is `Pending -> Dispatched`.
    pub const fn can_become(self, next: Status) -> bool {
        matches!((self, next), (Self::Pending, Self::Dispatched))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Verification {
    Photo { has_photo: bool },
    Sensor { sensor_verified: bool },
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Meters. `0` means the position was picked by hand.
    pub accuracy: f64,
}

impl Location {
    pub const fn new(coordinate: Coordinate, accuracy: f64) -> Self {
        Self {
            coordinate,
            accuracy,
        }
    }

    pub const fn manual(coordinate: Coordinate) -> Self {
        Self::new(coordinate, MANUAL_ACCURACY_M)
    }

    pub const fn fallback() -> Self {
        Self::new(FALLBACK_COORDINATE, FALLBACK_ACCURACY_M)
    }

    pub fn is_manual(&self) -> bool {
        self.accuracy == MANUAL_ACCURACY_M
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    id: ReportId,
    created_at: DateTime<Utc>,
    location: Location,
    severity: Severity,
    urgency: Urgency,
    people_count: u32,
    status: Status,
    verification: Verification,
    assigned_route: Option<RouteRef>,
}

impl Report {
    pub fn new(
        id: ReportId,
        created_at: DateTime<Utc>,
        location: Location,
        severity: Severity,
        people_count: u32,
        verification: Verification,
    ) -> Self {
        Self {
            id,
            created_at,
            location,
            severity,
            urgency: severity.urgency(),
            people_count,
            status: Status::Pending,
            verification,
            assigned_route: None,
        }
    }

    pub fn id(&self) -> ReportId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn people_count(&self) -> u32 {
        self.people_count
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    pub fn assigned_route(&self) -> Option<&RouteRef> {
        self.assigned_route.as_ref()
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub(crate) fn assign_route(&mut self, route: RouteRef) {
        self.assigned_route = Some(route);
    }
}
