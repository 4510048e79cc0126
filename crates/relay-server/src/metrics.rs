//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Device sockets accepted (counter).
pub const DEVICE_CONNECTIONS_TOTAL: &str = "relay_device_connections_total";
/// Registered devices (gauge).
pub const DEVICES_ACTIVE: &str = "relay_devices_active";
/// UI sockets accepted (counter).
pub const UI_CONNECTIONS_TOTAL: &str = "relay_ui_connections_total";
/// Registered UIs (gauge).
pub const UIS_ACTIVE: &str = "relay_uis_active";
/// Value-set requests (counter, labels: origin).
pub const VALUE_SETS_TOTAL: &str = "relay_value_sets_total";
/// UI frames dropped during broadcast (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Device push frames dropped (counter).
pub const DEVICE_PUSH_DROPS_TOTAL: &str = "relay_device_push_drops_total";
/// Inbound frames rejected (counter, labels: kind).
pub const FRAME_ERRORS_TOTAL: &str = "relay_frame_errors_total";
/// Socket lifetime in seconds (histogram, labels: role).
pub const CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
