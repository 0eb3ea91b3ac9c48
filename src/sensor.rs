//! Simulated water-level sensor check.
//!
//! There is no real sensor behind this: a check completes as verified after a
//! fixed latency. It is still modeled as a cancellable operation with a
//! deadline so a real sensor reading can slot in later.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    Idle,
    Checking,
    Verified,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorOutcome {
    Verified,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct SensorCheck {
    pub latency: Duration,
    pub timeout: Duration,
}

impl Default for SensorCheck {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl SensorCheck {
    pub async fn run(self) -> SensorOutcome {
        match tokio::time::timeout(self.timeout, tokio::time::sleep(self.latency)).await {
            Ok(()) => SensorOutcome::Verified,
            Err(_) => SensorOutcome::TimedOut,
        }
    }

    /// Runs the check in the background, handing the outcome to `on_done`.
    /// Dropping or cancelling the handle before completion skips `on_done`.
    pub fn spawn<F>(self, on_done: F) -> SensorHandle
    where
        F: FnOnce(SensorOutcome) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let outcome = self.run().await;
            on_done(outcome);
        });
        SensorHandle { task: Some(task) }
    }
}

pub struct SensorHandle {
    task: Option<JoinHandle<()>>,
}

impl SensorHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Waits for the check to finish (or for its cancellation to land).
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
