//! REST surface: external value trigger and read-only device listing.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use relay_core::{Device, DeviceId};
use serde::{Deserialize, Serialize};

use crate::hub::Origin;
use crate::server::AppState;

/// Query string of `GET /rest/device/{id}`.
#[derive(Debug, Deserialize)]
pub struct ValueQuery {
    /// Value to apply.
    pub value: i64,
}

/// Body returned by the value trigger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueResponse {
    /// Target device.
    pub id: DeviceId,
    /// Requested value.
    pub value: i64,
    /// `delivered`, `dropped` or `not_connected`.
    pub outcome: String,
}

/// `GET /rest/device/{id}?value=N`: set a device value as if a UI asked.
pub async fn set_device_value(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ValueQuery>,
) -> Json<ValueResponse> {
    let id = DeviceId::new(id);
    let outcome = state.hub.apply_value(id, query.value, Origin::Rest);
    Json(ValueResponse {
        id,
        value: query.value,
        outcome: outcome.as_str().to_owned(),
    })
}

/// `GET /rest/devices`: current snapshot, ordered by id.
pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.hub.devices().snapshot())
}
