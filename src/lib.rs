//! Flood incident reporting: citizens file water-level reports, admins triage
//! and dispatch response teams, reporters hear back when help is on the way.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod geodesy;
pub mod geolocation;
pub mod lifecycle;
pub mod notifier;
pub mod report;
pub mod sensor;
pub mod store;
pub mod triage;
