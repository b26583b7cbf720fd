use std::time::Instant;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::record::RecordId;
use incidentdb_core::resolve::{AssociationMap, SkippedRecord};
use incidentdb_core::{CollectionReport, Document, ResolveError};
use serde::Serialize;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{DaemonConfig, ServerSettings};
use crate::database::{DatabaseHandle, NewIncident};
use crate::error::{DaemonError, Result};
use crate::signals::ShutdownSignal;

pub async fn run(
    config: &DaemonConfig,
    database: DatabaseHandle,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let addr = config.socket_addr()?;
    let app = router(database, config.server())?;

    let mut server = axum::Server::try_bind(&addr)?.tcp_nodelay(config.server().tcp_nodelay);
    if config.server().http2_only {
        server = server.http2_only(true);
    }

    log::info!("listening on {addr}");
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown.wait())
        .await?;
    log::info!("server stopped");

    Ok(())
}

pub fn router(database: DatabaseHandle, settings: &ServerSettings) -> Result<Router> {
    let state = AppState { database };

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/incidents", get(list_incidents).post(create_incident))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id/answers", get(get_incident_answers))
        .route("/incidents/factory/:factory_id", get(list_incidents_by_factory))
        .route("/factories", get(list_factories))
        .route("/factories/:id", get(get_factory))
        .route("/workers", get(list_workers))
        .route("/workers/:id", get(get_worker))
        .with_state(state);

    if let Some(limit) = settings.body_limit {
        app = app.layer(DefaultBodyLimit::max(limit));
    }

    if let Some(limit) = settings.concurrency_limit {
        app = app.layer(ConcurrencyLimitLayer::new(limit));
    }

    if let Some(cors) = cors_layer(&settings.allowed_origins)? {
        app = app.layer(cors);
    }

    Ok(app.layer(middleware::from_fn(log_requests)))
}

fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| {
                DaemonError::Config(format!("invalid allowed origin '{origin}': {err}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    ))
}

async fn log_requests<B>(request: Request<B>, next: Next<B>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    tracing::debug!(%method, %path, "request received");

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request completed"
    );
    response
}

#[derive(Clone)]
struct AppState {
    database: DatabaseHandle,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct IncidentList {
    incidents: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedRecord>,
}

#[derive(Serialize)]
struct FactoryList {
    factories: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedRecord>,
}

#[derive(Serialize)]
struct WorkerList {
    workers: Vec<Document>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedRecord>,
}

impl From<CollectionReport> for IncidentList {
    fn from(report: CollectionReport) -> Self {
        Self {
            incidents: report.documents,
            skipped: report.skipped,
        }
    }
}

impl From<CollectionReport> for FactoryList {
    fn from(report: CollectionReport) -> Self {
        Self {
            factories: report.documents,
            skipped: report.skipped,
        }
    }
}

impl From<CollectionReport> for WorkerList {
    fn from(report: CollectionReport) -> Self {
        Self {
            workers: report.documents,
            skipped: report.skipped,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_incidents(State(state): State<AppState>) -> ApiResult<IncidentList> {
    Ok(Json(state.database.incidents()?.into()))
}

async fn get_incident(
    State(state): State<AppState>,
    id: std::result::Result<Path<RecordId>, PathRejection>,
) -> ApiResult<Document> {
    Ok(Json(state.database.incident(record_id(id)?)?))
}

async fn get_incident_answers(
    State(state): State<AppState>,
    id: std::result::Result<Path<RecordId>, PathRejection>,
) -> ApiResult<AssociationMap> {
    Ok(Json(state.database.incident_answers(record_id(id)?)?))
}

async fn list_incidents_by_factory(
    State(state): State<AppState>,
    factory_id: std::result::Result<Path<RecordId>, PathRejection>,
) -> ApiResult<IncidentList> {
    let factory_id = record_id(factory_id)?;
    Ok(Json(state.database.incidents_by_factory(factory_id)?.into()))
}

async fn create_incident(
    State(state): State<AppState>,
    body: std::result::Result<Json<NewIncident>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<Document>), ApiError> {
    let Json(incident) =
        body.map_err(|rejection| ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text()))?;
    let document = state.database.create_incident(incident)?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn list_factories(State(state): State<AppState>) -> ApiResult<FactoryList> {
    Ok(Json(state.database.factories()?.into()))
}

async fn get_factory(
    State(state): State<AppState>,
    id: std::result::Result<Path<RecordId>, PathRejection>,
) -> ApiResult<Document> {
    Ok(Json(state.database.factory(record_id(id)?)?))
}

async fn list_workers(State(state): State<AppState>) -> ApiResult<WorkerList> {
    Ok(Json(state.database.workers()?.into()))
}

async fn get_worker(
    State(state): State<AppState>,
    id: std::result::Result<Path<RecordId>, PathRejection>,
) -> ApiResult<Document> {
    Ok(Json(state.database.worker(record_id(id)?)?))
}

fn record_id(
    path: std::result::Result<Path<RecordId>, PathRejection>,
) -> std::result::Result<RecordId, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text()))
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        ApiError::new(map_daemon_error(&err), err.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError::from(DaemonError::Resolve(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = ErrorResponse {
            status: "error",
            error: self.message,
        };
        (self.status, Json(payload)).into_response()
    }
}

fn map_daemon_error(err: &DaemonError) -> StatusCode {
    match err {
        DaemonError::Resolve(inner) if inner.is_user_facing() => StatusCode::NOT_FOUND,
        DaemonError::Resolve(inner) if inner.is_configuration_defect() => {
            crate::fatal!(error = %inner, "stored data does not match the registry");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DaemonError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DaemonError::Resolve(_)
        | DaemonError::Storage(_)
        | DaemonError::Io(_)
        | DaemonError::Nix(_)
        | DaemonError::Logger(_)
        | DaemonError::Config(_)
        | DaemonError::Toml(_)
        | DaemonError::Json(_)
        | DaemonError::Http(_)
        | DaemonError::Registry(_)
        | DaemonError::Seed(_) => {
            tracing::error!(error = %err, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
