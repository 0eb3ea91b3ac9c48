//! One user's report, from "start report" to submission.
//!
//! ```text
//! Idle -> LocationPending -> FormActive -> Submitted
//!              \______________/
//!        form edits allowed in both
//! ```
//!
//! Geolocation runs in the background; the form stays editable while it is
//! outstanding. A manually picked location is sticky: an automatic fix that
//! arrives afterwards is ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::geodesy::{Coordinate, InvalidLocation};
use crate::geolocation::{GeolocationError, GeolocationProvider, GeolocationResult, WithTimeout};
use crate::notifier::{self, WatchHandle};
use crate::report::{Location, Report, ReportId, Severity, Verification};
use crate::sensor::{SensorCheck, SensorHandle, SensorOutcome, SensorState};
use crate::store::{IncidentStore, StatusChange, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    LocationPending,
    FormActive,
    Submitted,
}

impl Phase {
    fn is_editing(self) -> bool {
        matches!(self, Self::LocationPending | Self::FormActive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    #[default]
    Photo,
    Sensor,
    Sms,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("select a severity before submitting")]
    MissingSeverity,
    #[error("people count cannot be negative (got {0})")]
    NegativePeopleCount(i64),
    #[error("people count {0} is too large")]
    PeopleCountTooLarge(i64),
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] InvalidLocation),
    #[error("cannot {action} while {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub geolocation_timeout: Duration,
    pub sensor: SensorCheck,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            geolocation_timeout: Duration::from_secs(10),
            sensor: SensorCheck::default(),
        }
    }
}

/// Read-only copy of the in-progress form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draft {
    pub phase: Phase,
    pub location: Option<Location>,
    pub location_source: Option<LocationSource>,
    pub geolocation_error: Option<GeolocationError>,
    pub severity: Option<Severity>,
    pub people_count: u32,
    pub mode: VerificationMode,
    pub photo_attached: bool,
    pub sensor: SensorState,
    pub submitted: Option<ReportId>,
    #[serde(skip)]
    generation: u64,
}

impl Draft {
    fn idle(generation: u64) -> Self {
        Self {
            phase: Phase::Idle,
            location: None,
            location_source: None,
            geolocation_error: None,
            severity: None,
            people_count: 0,
            mode: VerificationMode::default(),
            photo_attached: false,
            sensor: SensorState::Idle,
            submitted: None,
            generation,
        }
    }

    fn verification(&self) -> Verification {
        match self.mode {
            VerificationMode::Photo => Verification::Photo {
                has_photo: self.photo_attached,
            },
            VerificationMode::Sensor => Verification::Sensor {
                sensor_verified: self.sensor == SensorState::Verified,
            },
            VerificationMode::Sms => Verification::Sms,
        }
    }

    fn apply_geolocation(&mut self, result: GeolocationResult) {
        let result = result.and_then(|fix| {
            fix.checked().map_err(|err| {
                warn!(%err, "discarding impossible geolocation fix");
                GeolocationError::Unavailable
            })
        });
        if self.location_source == Some(LocationSource::Manual) {
            debug!("ignoring automatic geolocation after manual override");
        } else {
            match result {
                Ok(fix) => {
                    self.location = Some(Location::new(fix.coordinate, fix.accuracy));
                    self.location_source = Some(LocationSource::Automatic);
                    self.geolocation_error = None;
                }
                Err(err) => {
                    warn!(%err, "geolocation failed; fallback location will be used");
                    self.geolocation_error = Some(err);
                }
            }
        }
        if self.phase == Phase::LocationPending {
            self.phase = Phase::FormActive;
        }
    }
}

#[derive(Default)]
struct Tasks {
    geolocation: Option<JoinHandle<()>>,
    sensor: Option<SensorHandle>,
}

impl Tasks {
    fn abort(&mut self) {
        if let Some(task) = self.geolocation.take() {
            task.abort();
        }
        if let Some(mut sensor) = self.sensor.take() {
            sensor.cancel();
        }
    }
}

pub struct ReportSession {
    config: LifecycleConfig,
    draft: Arc<Mutex<Draft>>,
    tasks: Mutex<Tasks>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReportSession {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            draft: Arc::new(Mutex::new(Draft::idle(0))),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub fn draft(&self) -> Draft {
        lock(&self.draft).clone()
    }

    fn editing(&self, action: &'static str) -> Result<MutexGuard<'_, Draft>, LifecycleError> {
        let draft = lock(&self.draft);
        if draft.phase.is_editing() {
            Ok(draft)
        } else {
            Err(LifecycleError::InvalidPhase {
                action,
                phase: draft.phase,
            })
        }
    }

    /// Opens a fresh form and starts locating the user in the background.
    pub fn start<P: GeolocationProvider>(&self, provider: P) -> Result<(), LifecycleError> {
        let generation = {
            let mut draft = lock(&self.draft);
            if draft.phase.is_editing() {
                return Err(LifecycleError::InvalidPhase {
                    action: "start a report",
                    phase: draft.phase,
                });
            }
            let generation = draft.generation + 1;
            *draft = Draft::idle(generation);
            draft.phase = Phase::LocationPending;
            generation
        };

        let provider = WithTimeout::new(provider, self.config.geolocation_timeout);
        let draft = self.draft.clone();
        let task = tokio::spawn(async move {
            let result = provider.locate().await;
            let mut draft = lock(&draft);
            // A cancelled or restarted form must not pick up a stale fix.
            if draft.generation == generation && draft.phase.is_editing() {
                draft.apply_geolocation(result);
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.abort();
        tasks.geolocation = Some(task);
        info!(generation, "report started");
        Ok(())
    }

    /// Waits until the background geolocation request has been applied (or
    /// dropped). Returns immediately if none is outstanding.
    pub async fn settle_location(&self) {
        let task = lock(&self.tasks).geolocation.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Confirms the map picker. Overrides any automatic fix, past or future.
    pub fn confirm_manual_location(&self, coordinate: Coordinate) -> Result<(), LifecycleError> {
        let coordinate = coordinate.validate()?;
        let mut draft = self.editing("confirm a location")?;
        draft.location = Some(Location::manual(coordinate));
        draft.location_source = Some(LocationSource::Manual);
        draft.phase = Phase::FormActive;
        debug!(lat = coordinate.lat, lng = coordinate.lng, "manual location confirmed");
        Ok(())
    }

    pub fn select_severity(&self, severity: Severity) -> Result<(), LifecycleError> {
        self.editing("select severity")?.severity = Some(severity);
        Ok(())
    }

    pub fn set_people_count(&self, count: i64) -> Result<(), LifecycleError> {
        if count < 0 {
            return Err(LifecycleError::NegativePeopleCount(count));
        }
        let count = u32::try_from(count).map_err(|_| LifecycleError::PeopleCountTooLarge(count))?;
        self.editing("set people count")?.people_count = count;
        Ok(())
    }

    /// Switches verification tab. Evidence on other tabs is kept.
    pub fn select_verification_mode(&self, mode: VerificationMode) -> Result<(), LifecycleError> {
        self.editing("switch verification mode")?.mode = mode;
        Ok(())
    }

    pub fn set_photo_attached(&self, attached: bool) -> Result<(), LifecycleError> {
        self.editing("attach a photo")?.photo_attached = attached;
        Ok(())
    }

    /// Starts the simulated sensor check. Restarting cancels a check in flight.
    pub fn start_sensor_check(&self) -> Result<(), LifecycleError> {
        let generation = {
            let mut draft = self.editing("check the sensor")?;
            draft.sensor = SensorState::Checking;
            draft.generation
        };

        let draft = self.draft.clone();
        let handle = self.config.sensor.spawn(move |outcome| {
            let mut draft = lock(&draft);
            if draft.generation != generation || !draft.phase.is_editing() {
                return;
            }
            draft.sensor = match outcome {
                SensorOutcome::Verified => SensorState::Verified,
                SensorOutcome::TimedOut => {
                    warn!("sensor check timed out");
                    SensorState::TimedOut
                }
            };
        });

        let mut tasks = lock(&self.tasks);
        if let Some(mut previous) = tasks.sensor.replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    /// Waits for the outstanding sensor check, if any.
    pub async fn settle_sensor_check(&self) {
        let sensor = lock(&self.tasks).sensor.take();
        if let Some(sensor) = sensor {
            sensor.finished().await;
        }
    }

    /// Files the report and starts watching it for dispatch.
    ///
    /// On error nothing changes: the form keeps its input and the store is
    /// untouched.
    pub fn submit<F>(
        &self,
        store: &Arc<IncidentStore>,
        on_dispatched: F,
    ) -> Result<(Report, WatchHandle), LifecycleError>
    where
        F: FnOnce(StatusChange) + Send + 'static,
    {
        let report = {
            let mut draft = self.editing("submit")?;
            let severity = draft.severity.ok_or(LifecycleError::MissingSeverity)?;
            let location = draft.location.unwrap_or_else(Location::fallback);

            let report = Report::new(
                store.allocate_id(),
                Utc::now(),
                location,
                severity,
                draft.people_count,
                draft.verification(),
            );
            store.insert(report.clone())?;

            draft.phase = Phase::Submitted;
            draft.submitted = Some(report.id());
            report
        };
        lock(&self.tasks).abort();

        info!(id = %report.id(), urgency = %report.urgency(), "report submitted");
        let watch = notifier::watch(store.clone(), report.id(), on_dispatched);
        Ok((report, watch))
    }

    /// Throws away the in-progress form. Submitted reports are unaffected.
    pub fn cancel(&self) -> Result<(), LifecycleError> {
        {
            let mut draft = self.editing("cancel")?;
            let generation = draft.generation + 1;
            *draft = Draft::idle(generation);
        }
        lock(&self.tasks).abort();
        debug!("report cancelled");
        Ok(())
    }

    /// Stops background work regardless of phase.
    pub fn teardown(&self) {
        lock(&self.tasks).abort();
    }
}

impl Drop for ReportSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
