use geo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sphere radius used for every distance in the system.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Rejects positions off the globe, including NaN and infinities.
    pub fn validate(self) -> Result<Self, InvalidLocation> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(InvalidLocation::Latitude(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(InvalidLocation::Longitude(self.lng));
        }
        Ok(self)
    }

    /// `[lng, lat]`, the GeoJSON position order.
    pub fn to_lng_lat(self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl From<Coordinate> for Point<f64> {
    fn from(c: Coordinate) -> Self {
        Point::new(c.lng, c.lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvacuationSite {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl EvacuationSite {
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("evacuation site list is empty")]
    EmptySiteList,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidLocation {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("accuracy {0} must be a finite, non-negative number of meters")]
    Accuracy(f64),
}

/// Haversine great-circle distance in kilometers.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Closest site to `point`. Ties go to the site listed first.
pub fn nearest_site(point: Coordinate, sites: &[EvacuationSite]) -> Result<&EvacuationSite, GeoError> {
    let mut best: Option<(&EvacuationSite, f64)> = None;

    for site in sites {
        let d = distance(point, site.coordinate());
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((site, d)),
        }
    }

    best.map(|(site, _)| site).ok_or(GeoError::EmptySiteList)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        ((a - b) / b).abs() < 1e-6
    }

    #[test]
    fn distance_to_self_is_zero() {
        for c in [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(14.5995, 120.9842),
            Coordinate::new(-33.86, 151.21),
            Coordinate::new(89.9, -179.9),
        ] {
            assert_eq!(distance(c, c), 0.0);
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (Coordinate::new(14.60, 121.00), Coordinate::new(14.70, 121.10)),
            (Coordinate::new(51.5, -0.12), Coordinate::new(40.71, -74.0)),
            (Coordinate::new(-12.0, 45.0), Coordinate::new(33.0, -150.0)),
        ];
        for (a, b) in pairs {
            assert!((distance(a, b) - distance(b, a)).abs() < 1e-12);
            assert!(distance(a, b) > 0.0);
        }
    }

    #[test]
    fn one_degree_of_longitude_on_equator() {
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!(close(d, EARTH_RADIUS_KM * std::f64::consts::PI / 180.0));
    }

    #[test]
    fn antipodes_are_half_circumference_apart() {
        let d = distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 180.0));
        assert!(close(d, EARTH_RADIUS_KM * std::f64::consts::PI));
    }

    #[test]
    fn coordinates_off_the_globe_are_rejected() {
        assert_eq!(
            Coordinate::new(500.0, 999.0).validate(),
            Err(InvalidLocation::Latitude(500.0))
        );
        assert_eq!(
            Coordinate::new(14.6, -180.5).validate(),
            Err(InvalidLocation::Longitude(-180.5))
        );
        assert!(Coordinate::new(f64::NAN, 121.0).validate().is_err());
        assert!(Coordinate::new(14.6, f64::INFINITY).validate().is_err());
        assert!(Coordinate::new(-90.0, 180.0).validate().is_ok());
    }

    #[test]
    fn nearest_site_picks_minimum() {
        let sites = vec![
            EvacuationSite::new("far", 15.5, 121.0),
            EvacuationSite::new("near", 14.61, 121.01),
            EvacuationSite::new("middle", 14.9, 121.0),
        ];
        let site = nearest_site(Coordinate::new(14.60, 121.00), &sites).unwrap();
        assert_eq!(site.name, "near");
    }

    #[test]
    fn nearest_site_tie_goes_to_first_listed() {
        let sites = vec![
            EvacuationSite::new("east", 0.0, 1.0),
            EvacuationSite::new("west", 0.0, -1.0),
        ];
        let site = nearest_site(Coordinate::new(0.0, 0.0), &sites).unwrap();
        assert_eq!(site.name, "east");

        let dupes = vec![
            EvacuationSite::new("first", 14.6, 121.0),
            EvacuationSite::new("second", 14.6, 121.0),
        ];
        let site = nearest_site(Coordinate::new(10.0, 100.0), &dupes).unwrap();
        assert_eq!(site.name, "first");
    }

    #[test]
    fn nearest_site_on_empty_list_fails() {
        assert_eq!(
            nearest_site(Coordinate::new(14.6, 121.0), &[]),
            Err(GeoError::EmptySiteList)
        );
    }
}
