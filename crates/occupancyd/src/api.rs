use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::put;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::engine::DeviceSnapshot;
use crate::engine::Registry;
use crate::engine::SubmitError;
use crate::engine::submit_reading;
use crate::store::StoreError;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Response for an accepted reading
#[derive(Serialize)]
struct ReadingResponse {
    message: &'static str,
    reading: String,
    deviceid: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
struct AppState {
    version: &'static str,
    registry: Arc<Registry>,
}

/// Errors a handler can answer with
#[derive(Debug)]
enum ApiError {
    Submit(SubmitError),
    DeviceNotFound(String),
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Submit(SubmitError::Reading(e)) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Submit(SubmitError::Provision(e)) => {
                tracing::error!("Provisioning failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::DeviceNotFound(device_id) => (
                StatusCode::NOT_FOUND,
                format!("Device not found: {}", device_id),
            ),
            ApiError::Store(e) => {
                tracing::error!("Accessory store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for PUT /reading/add/:deviceid/:reading
#[tracing::instrument(skip_all)]
async fn add_reading(
    State(state): State<Arc<AppState>>,
    Path((deviceid, reading)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!("Handling reading {:?} for {}", reading, deviceid);
    let ack = submit_reading(&state.registry, &deviceid, &reading)
        .await
        .map_err(ApiError::Submit)?;

    Ok((
        StatusCode::OK,
        Json(ReadingResponse {
            message: "Reading updated successfully",
            reading: ack.reading,
            deviceid: ack.deviceid,
        }),
    ))
}

/// Handler for GET /v1/devices
#[tracing::instrument(skip(state))]
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.registry.devices().await)
}

/// Handler for GET /v1/devices/:deviceid
#[tracing::instrument(skip_all)]
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<String>,
) -> Result<Json<DeviceSnapshot>, ApiError> {
    let entry = state
        .registry
        .get(&deviceid)
        .await
        .ok_or(ApiError::DeviceNotFound(deviceid))?;
    Ok(Json(entry.snapshot().await))
}

/// Handler for DELETE /v1/devices/:deviceid
#[tracing::instrument(skip_all)]
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(deviceid): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state
        .registry
        .remove(&deviceid)
        .await
        .map_err(ApiError::Store)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::DeviceNotFound(deviceid))
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:deviceid", get(get_device).delete(delete_device))
        .route("/reading/add/:deviceid/:reading", put(add_reading))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves the API until the provided
/// shutdown signal is triggered.
///
/// # Arguments
/// * `config` - Listen address and port
/// * `registry` - Device registry readings are dispatched to
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    config: &ApiConfig,
    registry: Arc<Registry>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, registry });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    tracing::info!("Server is running on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
