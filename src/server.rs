//! The HTTP surface over the orchestrator.
//!
//! Handlers are thin: they validate, hand off to a job, and return either a
//! JSON snapshot or a plain-text log stream tagged with `X-Task-Id`. The
//! fleet-status path never blocks on a bus lock it observes held.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_transport::discovery::StatusQuery;
use fleet_transport::{DeviceMode, DiscoveredDevice, FlashMethod};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::fleet::Device;
use crate::jobs::batch::{self, BatchAction};
use crate::jobs::flash::{spawn_flash, spawn_magic_baud_test, FlashRequest};
use crate::jobs::reboot::{spawn_reboot, RebootMode};
use crate::jobs::stream_logger;
use crate::services::{self, ServiceAction};
use crate::state::AppState;
use crate::tasks::TaskStatus;

/// Error payload shaped like the API's `{"detail": ...}` convention
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn not_found(detail: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, detail.into())
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, detail.into())
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

fn stream_response(task_id: &str, rx: mpsc::UnboundedReceiver<String>) -> Response {
    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    match Response::builder()
        .header("X-Task-Id", task_id)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
    {
        Ok(resp) => resp,
        Err(e) => ApiError::internal(e).into_response(),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/fleet", get(get_fleet))
        .route("/fleet/device", post(save_device).delete(remove_device))
        .route("/devices/discover", get(discover_devices))
        .route("/profiles", get(list_profiles))
        .route("/build/{profile}", get(build_profile))
        .route("/flash", post(flash_device))
        .route("/flash/reboot", post(reboot_device))
        .route("/batch/{action}", get(batch_operation))
        .route("/task/status/{task_id}", get(task_status))
        .route("/task/cancel/{task_id}", post(task_cancel))
        .route("/services/status", get(services_status))
        .route("/services/manage", post(services_manage))
        .route("/debug/test_magic_baud", post(test_magic_baud))
        .with_state(state)
}

/// Bind and serve until the process ends.
pub async fn serve(state: Arc<AppState>, listen: &str) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    let app = router(state).layer(cors);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("KlipperFleet API listening on {listen}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "KlipperFleet API is running",
        "klipper_dir": state.paths.klipper_dir,
        "katapult_dir": state.paths.katapult_dir,
        "data_dir": state.paths.data_dir,
    }))
}

#[derive(Deserialize)]
struct FleetParams {
    #[serde(default)]
    fast: bool,
}

/// The registered fleet with a live `status` per device (and `dfu_status`
/// for secondary DFU identities). Exposed for the CLI as well.
pub async fn fleet_snapshot(state: &Arc<AppState>, fast: bool) -> anyhow::Result<Vec<Value>> {
    let fleet = state.fleet.get_fleet()?;
    let overrides = state.tasks.overrides();
    let can_locked = state.flash.buses.can_locked();
    let dfu_locked = state.flash.buses.dfu_locked();

    let mut result = Vec::with_capacity(fleet.len());
    for dev in fleet {
        let status = if let Some(mode) = overrides.statuses.get(&dev.id) {
            *mode
        } else if dev.method == FlashMethod::Can && can_locked && overrides.bus_task_running {
            DeviceMode::BusBusy
        } else if fast {
            DeviceMode::Querying
        } else {
            state
                .flash
                .check_device_status(
                    &dev.id,
                    dev.method,
                    &StatusQuery {
                        dfu_id: dev.dfu_id.clone(),
                        // Services are likely stopped while a bus task runs
                        skip_moonraker: overrides.bus_task_running,
                        is_bridge: dev.is_bridge,
                        interface: Some(dev.interface.clone()),
                    },
                )
                .await
        };

        let dfu_status = match &dev.dfu_id {
            Some(dfu_id) => Some(if let Some(mode) = overrides.statuses.get(dfu_id) {
                *mode
            } else if dfu_locked && overrides.bus_task_running {
                DeviceMode::BusBusy
            } else if fast {
                DeviceMode::Querying
            } else {
                let mode = state
                    .flash
                    .check_device_status(
                        dfu_id,
                        FlashMethod::Dfu,
                        &StatusQuery {
                            dfu_id: None,
                            skip_moonraker: overrides.task_running,
                            is_bridge: false,
                            interface: None,
                        },
                    )
                    .await;
                // The secondary identity being absent while the primary runs
                // just means the bootloader is not active right now
                if mode == DeviceMode::Offline && status == DeviceMode::Service {
                    DeviceMode::Inactive
                } else {
                    mode
                }
            }),
            None => None,
        };

        let mut value = serde_json::to_value(&dev)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("status".to_string(), serde_json::to_value(status)?);
            if let Some(dfu_status) = dfu_status {
                obj.insert("dfu_status".to_string(), serde_json::to_value(dfu_status)?);
            }
        }
        result.push(value);
    }
    Ok(result)
}

async fn get_fleet(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FleetParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    fleet_snapshot(&state, params.fast)
        .await
        .map(Json)
        .map_err(ApiError::internal)
}

async fn save_device(
    State(state): State<Arc<AppState>>,
    Json(device): Json<Device>,
) -> Result<Json<Value>, ApiError> {
    state.fleet.save_device(device).map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "Device saved to fleet" })))
}

#[derive(Deserialize)]
struct DeviceIdParams {
    device_id: String,
}

async fn remove_device(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeviceIdParams>,
) -> Result<Json<Value>, ApiError> {
    state
        .fleet
        .remove_device(&params.device_id)
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "Device removed from fleet" })))
}

async fn discover_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let serial = state.flash.discover_serial_devices(false).await;

    let mut can = Vec::new();
    for interface in state.flash.list_can_interfaces().await {
        can.extend(state.flash.discover_can_devices(&interface, true).await);
    }

    let dfu: Vec<DiscoveredDevice> = state
        .flash
        .discover_dfu_devices(true)
        .await
        .iter()
        .map(Into::into)
        .collect();
    let linux = state.flash.discover_host_process();

    // Annotate entries already attached to a fleet record
    let fleet = state.fleet.get_fleet().map_err(ApiError::internal)?;
    let mut managed: HashSet<String> = HashSet::new();
    for dev in &fleet {
        managed.insert(dev.id.clone());
        if let Some(dfu_id) = &dev.dfu_id {
            managed.insert(dfu_id.clone());
        }
    }

    let annotate = |devices: Vec<DiscoveredDevice>| -> Result<Vec<Value>, ApiError> {
        devices
            .into_iter()
            .map(|d| {
                let is_managed = managed.contains(&d.id);
                let mut value = serde_json::to_value(&d).map_err(ApiError::internal)?;
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("managed".to_string(), Value::Bool(is_managed));
                }
                Ok(value)
            })
            .collect()
    };

    let serial = annotate(serial)?;
    let can = annotate(can)?;
    let dfu = annotate(dfu)?;
    let linux = annotate(linux)?;

    Ok(Json(json!({
        "serial": serial,
        "can": can,
        "dfu": dfu,
        "linux": linux,
    })))
}

async fn list_profiles(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "profiles": state.profiles.list() }))
}

async fn build_profile(
    State(state): State<Arc<AppState>>,
    Path(profile): Path<String>,
) -> Result<Response, ApiError> {
    if !state.profiles.exists(&profile) {
        return Err(ApiError::not_found(format!("Profile {profile} not found")));
    }

    let task_id = state.tasks.create();
    let (sink, out_rx, log_done) = stream_logger(state.clone(), task_id.clone());
    let config_path = state.profiles.config_path(&profile);

    let tid = task_id.clone();
    let job_state = state.clone();
    tokio::spawn(async move {
        job_state
            .builder
            .run_build(&config_path, &profile, &sink)
            .await;
        drop(sink);
        let _ = log_done.await;
        job_state.tasks.complete(&tid, TaskStatus::Completed);
    });

    Ok(stream_response(&task_id, out_rx))
}

async fn flash_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FlashRequest>,
) -> Result<Response, ApiError> {
    let firmware = state.paths.artifact(&req.profile, req.method);
    if !firmware.exists() {
        return Err(ApiError::bad_request(format!(
            "Firmware for profile '{}' not found. Please build first.",
            req.profile
        )));
    }

    let (task_id, out_rx) = spawn_flash(state, req);
    Ok(stream_response(&task_id, out_rx))
}

#[derive(Deserialize)]
struct RebootParams {
    device_id: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    method: Option<String>,
}

async fn reboot_device(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RebootParams>,
) -> Result<Response, ApiError> {
    let mode = match params.mode.as_deref() {
        None => RebootMode::Katapult,
        Some(s) => RebootMode::parse(s)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid reboot mode: {s}")))?,
    };
    let method = match params.method.as_deref() {
        None => None,
        Some(s) => Some(
            s.parse::<FlashMethod>()
                .map_err(ApiError::bad_request)?,
        ),
    };

    let (task_id, out_rx) = spawn_reboot(state, params.device_id, mode, method);
    Ok(stream_response(&task_id, out_rx))
}

async fn batch_operation(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let action = BatchAction::parse(&action)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid batch action: {action}")))?;
    let task_id = batch::spawn(state, action);
    Ok(Json(json!({ "task_id": task_id })))
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.tasks.get(&task_id) {
        Some(snapshot) => Ok(Json(serde_json::to_value(snapshot).map_err(ApiError::internal)?)),
        None => Err(ApiError::not_found("Task not found")),
    }
}

async fn task_cancel(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.tasks.cancel(&task_id) {
        Ok(Json(json!({ "message": "Cancellation requested" })))
    } else {
        Err(ApiError::not_found("Task not found"))
    }
}

async fn services_status() -> Json<Value> {
    let status = services::services_status().await;
    Json(json!(status))
}

#[derive(Deserialize)]
struct ManageParams {
    action: String,
}

async fn services_manage(
    Query(params): Query<ManageParams>,
) -> Result<Json<Value>, ApiError> {
    let action = ServiceAction::parse(&params.action)
        .ok_or_else(|| ApiError::bad_request("Invalid action"))?;
    let log = services::manage_services(action).await;
    Ok(Json(json!({ "message": log })))
}

#[derive(Deserialize)]
struct MagicBaudParams {
    device_id: String,
    #[serde(default)]
    full_cycle: bool,
}

async fn test_magic_baud(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MagicBaudParams>,
) -> Response {
    let (task_id, out_rx) = spawn_magic_baud_test(state, params.device_id, params.full_cycle);
    stream_response(&task_id, out_rx)
}
