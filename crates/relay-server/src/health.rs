//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered devices.
    pub devices: usize,
    /// Connected UI observers.
    pub uis: usize,
}

/// Build a health response from live counts.
pub fn health_check(start_time: Instant, devices: usize, uis: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        devices,
        uis,
    }
}
