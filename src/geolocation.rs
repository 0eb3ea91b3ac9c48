//! Single-shot geolocation sources.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::geodesy::{Coordinate, InvalidLocation};

/// Automatic fixes never report better than this (meters), so they cannot be
/// mistaken for a manual pick.
pub const MIN_AUTOMATIC_ACCURACY_M: f64 = 1.0;

/// A resolved automatic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub coordinate: Coordinate,
    pub accuracy: f64,
}

impl GeoFix {
    /// Rejects impossible fixes and raises accuracy to
    /// [`MIN_AUTOMATIC_ACCURACY_M`].
    pub fn checked(self) -> Result<Self, InvalidLocation> {
        let coordinate = self.coordinate.validate()?;
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return Err(InvalidLocation::Accuracy(self.accuracy));
        }
        Ok(Self {
            coordinate,
            accuracy: self.accuracy.max(MIN_AUTOMATIC_ACCURACY_M),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "lowercase")]
pub enum GeolocationError {
    #[error("location permission denied")]
    Denied,
    #[error("location unavailable")]
    Unavailable,
    #[error("location request timed out")]
    Timeout,
}

pub type GeolocationResult = Result<GeoFix, GeolocationError>;

/// Resolves at most once, with a fix or a reason there is none. It may also
/// never resolve; callers must not block on it.
pub trait GeolocationProvider: Send + 'static {
    fn locate(self) -> impl Future<Output = GeolocationResult> + Send;
}

/// Fix pushed in later by the client (the browser's geolocation API).
pub struct ClientGeolocation {
    rx: oneshot::Receiver<GeolocationResult>,
}

impl ClientGeolocation {
    pub fn channel() -> (oneshot::Sender<GeolocationResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl GeolocationProvider for ClientGeolocation {
    async fn locate(self) -> GeolocationResult {
        // Sender dropped without answering.
        self.rx.await.unwrap_or(Err(GeolocationError::Unavailable))
    }
}

/// Answers immediately with a preset outcome.
pub struct FixedGeolocation(pub GeolocationResult);

impl GeolocationProvider for FixedGeolocation {
    async fn locate(self) -> GeolocationResult {
        self.0
    }
}

/// Bounds how long another provider may take.
pub struct WithTimeout<P> {
    inner: P,
    limit: Duration,
}

impl<P> WithTimeout<P> {
    pub fn new(inner: P, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl<P: GeolocationProvider> GeolocationProvider for WithTimeout<P> {
    async fn locate(self) -> GeolocationResult {
        tokio::time::timeout(self.limit, self.inner.locate())
            .await
            .unwrap_or(Err(GeolocationError::Timeout))
    }
}
