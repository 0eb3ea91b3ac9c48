//! Admin-side view over the incident store.

use std::cmp::Reverse;
use std::fmt;

use geo::{BoundingRect, MultiPoint, Point};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::geodesy::{self, Coordinate, EvacuationSite, GeoError};
use crate::report::{Location, Report, ReportId, Status};
use crate::store::{IncidentStore, StoreError};

/// Reports at or under this accuracy (meters) count as GPS verified.
pub const GPS_VERIFIED_MAX_ACCURACY_M: f64 = 20.0;

/// Map view shown when there is nothing to frame.
pub const DEFAULT_VIEW_CENTER: Coordinate = Coordinate::new(14.5995, 120.9842);
pub const DEFAULT_VIEW_ZOOM: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationBadge {
    #[serde(rename = "GPS Verified")]
    GpsVerified,
    #[serde(rename = "Low Accuracy")]
    LowAccuracy,
}

impl LocationBadge {
    pub fn for_location(location: &Location) -> Self {
        if location.accuracy <= GPS_VERIFIED_MAX_ACCURACY_M {
            Self::GpsVerified
        } else {
            Self::LowAccuracy
        }
    }
}

impl fmt::Display for LocationBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GpsVerified => "GPS Verified",
            Self::LowAccuracy => "Low Accuracy",
        })
    }
}

/// Origin/destination pair handed to an external directions service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRef {
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub site_name: String,
    pub distance_km: f64,
    pub geometry: GeoJsonLineString,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoJsonLineString {
    pub r#type: String,
    pub coordinates: Vec<[f64; 2]>, // [lng, lat] standard for GeoJSON
}

impl GeoJsonLineString {
    fn between(origin: Coordinate, destination: Coordinate) -> Self {
        Self {
            r#type: "LineString".to_string(),
            coordinates: vec![origin.to_lng_lat(), destination.to_lng_lat()],
        }
    }
}

impl RouteRef {
    pub fn to_nearest(origin: Coordinate, sites: &[EvacuationSite]) -> Result<Self, GeoError> {
        let site = geodesy::nearest_site(origin, sites)?;
        let destination = site.coordinate();
        Ok(Self {
            origin,
            destination,
            site_name: site.name.clone(),
            distance_km: geodesy::distance(origin, destination),
            geometry: GeoJsonLineString::between(origin, destination),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayMetadata {
    pub badge: LocationBadge,
    pub nearest_site: EvacuationSite,
    pub route: RouteRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageEntry {
    pub report: Report,
    pub meta: DisplayMetadata,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FeedFilter {
    pub status: Option<Status>,
}

impl FeedFilter {
    fn matches(&self, report: &Report) -> bool {
        self.status.is_none_or(|s| report.status() == s)
    }
}

/// Reports ordered by urgency, most urgent first. Equal urgency keeps
/// insertion order.
pub fn feed(
    store: &IncidentStore,
    sites: &[EvacuationSite],
    filter: FeedFilter,
) -> Result<Vec<TriageEntry>, GeoError> {
    store
        .all()
        .into_iter()
        .filter(|report| filter.matches(report))
        // `sorted_by_key` is a stable sort.
        .sorted_by_key(|report| Reverse(report.urgency().rank()))
        .map(|report| {
            let location = report.location();
            let route = RouteRef::to_nearest(location.coordinate, sites)?;
            let meta = DisplayMetadata {
                badge: LocationBadge::for_location(&location),
                nearest_site: EvacuationSite::new(
                    route.site_name.clone(),
                    route.destination.lat,
                    route.destination.lng,
                ),
                route,
            };
            Ok(TriageEntry { report, meta })
        })
        .collect()
}

/// Marks the report dispatched and assigns it the route to its nearest site.
pub fn dispatch(
    store: &IncidentStore,
    sites: &[EvacuationSite],
    id: ReportId,
) -> Result<(), StoreError> {
    let report = store.find_by_id(id).ok_or(StoreError::NotFound(id))?;
    let route = RouteRef::to_nearest(report.location().coordinate, sites).ok();
    store.dispatch(id, route)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapView {
    /// Fit the map to this box.
    Bounds { south_west: Coordinate, north_east: Coordinate },
    /// Nothing to frame; show the wide-area default.
    Default { center: Coordinate, zoom: u8 },
}

impl MapView {
    pub fn for_entries(entries: &[TriageEntry]) -> Self {
        let points: MultiPoint<f64> = entries
            .iter()
            .flat_map(|e| [e.meta.route.origin, e.meta.route.destination])
            .map(Point::from)
            .collect();

        match points.bounding_rect() {
            Some(rect) => Self::Bounds {
                south_west: Coordinate::new(rect.min().y, rect.min().x),
                north_east: Coordinate::new(rect.max().y, rect.max().x),
            },
            None => Self::Default {
                center: DEFAULT_VIEW_CENTER,
                zoom: DEFAULT_VIEW_ZOOM,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::report::{Severity, Verification};

    fn sites() -> Vec<EvacuationSite> {
        vec![
            EvacuationSite::new("North Hall", 14.70, 121.05),
            EvacuationSite::new("South Gym", 14.50, 121.00),
        ]
    }

    fn add(store: &IncidentStore, id: u64, severity: Severity, accuracy: f64) -> ReportId {
        let id = ReportId::new(id);
        store
            .insert(Report::new(
                id,
                Utc::now(),
                Location::new(Coordinate::new(14.60, 121.00), accuracy),
                severity,
                2,
                Verification::Photo { has_photo: true },
            ))
            .unwrap();
        id
    }

    #[test]
    fn feed_is_stably_sorted_by_urgency() {
        let store = IncidentStore::new();
        let r1 = add(&store, 1, Severity::Low, 10.0);
        let r2 = add(&store, 2, Severity::High, 10.0);
        let r3 = add(&store, 3, Severity::High, 10.0);
        let r4 = add(&store, 4, Severity::Med, 10.0);

        let order: Vec<ReportId> = feed(&store, &sites(), FeedFilter::default())
            .unwrap()
            .iter()
            .map(|e| e.report.id())
            .collect();
        assert_eq!(order, vec![r2, r3, r4, r1]);
    }

    #[test]
    fn badge_threshold_is_inclusive() {
        let at = Location::new(Coordinate::new(0.0, 0.0), 20.0);
        let over = Location::new(Coordinate::new(0.0, 0.0), 20.5);
        let manual = Location::manual(Coordinate::new(0.0, 0.0));
        assert_eq!(LocationBadge::for_location(&at), LocationBadge::GpsVerified);
        assert_eq!(LocationBadge::for_location(&over), LocationBadge::LowAccuracy);
        assert_eq!(LocationBadge::for_location(&manual), LocationBadge::GpsVerified);
        assert_eq!(LocationBadge::LowAccuracy.to_string(), "Low Accuracy");
    }

    #[test]
    fn metadata_points_at_nearest_site() {
        let store = IncidentStore::new();
        add(&store, 1, Severity::High, 35.0);
        let entries = feed(&store, &sites(), FeedFilter::default()).unwrap();
        let meta = &entries[0].meta;
        assert_eq!(meta.badge, LocationBadge::LowAccuracy);
        assert_eq!(meta.nearest_site.name, "South Gym");
        assert_eq!(meta.route.origin, Coordinate::new(14.60, 121.00));
        assert_eq!(meta.route.destination, Coordinate::new(14.50, 121.00));
        assert_eq!(meta.route.geometry.r#type, "LineString");
        assert_eq!(
            meta.route.geometry.coordinates,
            vec![[121.00, 14.60], [121.00, 14.50]]
        );
    }

    #[test]
    fn empty_feed_uses_default_view() {
        let store = IncidentStore::new();
        let entries = feed(&store, &[], FeedFilter::default()).unwrap();
        assert!(entries.is_empty());
        assert_eq!(
            MapView::for_entries(&entries),
            MapView::Default {
                center: DEFAULT_VIEW_CENTER,
                zoom: DEFAULT_VIEW_ZOOM,
            }
        );
    }

    #[test]
    fn reports_without_sites_fail_the_projection() {
        let store = IncidentStore::new();
        add(&store, 1, Severity::Low, 5.0);
        assert!(matches!(
            feed(&store, &[], FeedFilter::default()),
            Err(GeoError::EmptySiteList)
        ));
    }

    #[test]
    fn map_view_frames_reports_and_sites() {
        let store = IncidentStore::new();
        add(&store, 1, Severity::Low, 5.0);
        let entries = feed(&store, &sites(), FeedFilter::default()).unwrap();
        let MapView::Bounds {
            south_west,
            north_east,
        } = MapView::for_entries(&entries)
        else {
            panic!("expected bounds");
        };
        assert_eq!(south_west, Coordinate::new(14.50, 121.00));
        assert_eq!(north_east, Coordinate::new(14.60, 121.00));
    }

    #[test]
    fn dispatch_assigns_route_and_filters() {
        let store = IncidentStore::new();
        let a = add(&store, 1, Severity::Low, 5.0);
        let b = add(&store, 2, Severity::High, 5.0);

        dispatch(&store, &sites(), a).unwrap();
        let report = store.find_by_id(a).unwrap();
        assert_eq!(report.status(), Status::Dispatched);
        assert_eq!(report.assigned_route().unwrap().site_name, "South Gym");

        assert!(matches!(
            dispatch(&store, &sites(), a),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert_eq!(
            dispatch(&store, &sites(), ReportId::new(42)),
            Err(StoreError::NotFound(ReportId::new(42)))
        );

        let pending = feed(
            &store,
            &sites(),
            FeedFilter {
                status: Some(Status::Pending),
            },
        )
        .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].report.id(), b);
    }
}
