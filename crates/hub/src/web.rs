//! Backend HTTP surface: reading ingest, reading history, the command queue
//! and the mode mirror the device polls.

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::info;

use crate::command::{CommandKind, Mode};
use crate::config::{Config, Limits};
use crate::db::{Db, SortOrder};
use crate::error::ApiError;
use crate::reading::NewReading;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub limits: Limits,
}

type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/add_data", post(add_data))
        .route("/get_data", get(get_data))
        .route("/whatsapp_command", post(whatsapp_command))
        .route("/get_control", get(get_control))
        .route("/set_control", post(set_control))
        .route("/get_mode", get(get_mode))
        .route("/set_mode", post(set_mode))
        .with_state(state)
}

async fn index() -> &'static str {
    "canopy hub is active"
}

async fn add_data(
    State(s): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let reading = NewReading::from_json(&body)?;
    let stored = s.db.insert_reading(&reading).await?;
    info!(
        id = %stored.id,
        temperature = stored.temperature,
        humidity = stored.humidity,
        ldr = stored.ldr_value,
        "reading stored"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "message": "Data saved", "data": stored })),
    ))
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    limit: Option<String>,
    sort: Option<String>,
}

fn parse_int(name: &str, raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::Validation(format!("{name} must be an integer, got '{raw}'")))
}

async fn get_data(State(s): State<AppState>, Query(q): Query<DataQuery>) -> ApiResult {
    let limit = match q.limit.as_deref() {
        None | Some("") => s.limits.default_limit,
        Some(raw) => parse_int("limit", raw)?,
    };
    if limit <= 0 {
        return Err(ApiError::Validation(format!(
            "limit must be positive, got {limit}"
        )));
    }
    let limit = limit.min(s.limits.max_limit);

    let order = match q.sort.as_deref() {
        None | Some("") => SortOrder::Descending,
        Some(raw) if parse_int("sort", raw)? > 0 => SortOrder::Ascending,
        Some(_) => SortOrder::Descending,
    };

    let data = s.db.recent_readings(limit, order).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "success", "count": data.len(), "data": data })),
    ))
}

#[derive(Debug, Deserialize)]
struct WhatsappMessage {
    #[serde(rename = "Body")]
    body: Option<String>,
    #[serde(rename = "From")]
    from: Option<String>,
}

/// Queue `kind` for the device. Mode commands also switch the mirror now.
async fn enqueue(db: &Db, kind: CommandKind, source: &str) -> Result<(), ApiError> {
    db.insert_command(kind, source).await?;
    if let Some(mode) = kind.mode() {
        db.set_mode(mode).await?;
    }
    info!(command = %kind, source, "command queued");
    Ok(())
}

async fn whatsapp_command(
    State(s): State<AppState>,
    body: Result<Json<WhatsappMessage>, JsonRejection>,
) -> ApiResult {
    let Json(msg) = body?;
    let (Some(text), Some(from)) = (msg.body, msg.from) else {
        return Err(ApiError::Validation("Missing required fields".to_string()));
    };

    let kind: CommandKind = text.parse().map_err(ApiError::Validation)?;
    enqueue(&s.db, kind, &from).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("Command '{kind}' saved to database"),
        })),
    ))
}

/// The device's poll point. Hands out at most one pending command.
async fn get_control(State(s): State<AppState>) -> ApiResult {
    let mode = s.db.get_mode().await?;
    let control = s.db.take_pending_command().await?;
    if let Some(cmd) = &control {
        info!(id = cmd.id, command = %cmd.kind, source = %cmd.source, "command delivered");
    }
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "mode": mode,
            "control": control.map(|c| c.kind),
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    control: Option<String>,
}

async fn set_control(
    State(s): State<AppState>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let Some(control) = req.control else {
        return Err(ApiError::Validation("Missing field 'control'".to_string()));
    };
    let kind: CommandKind = control.parse().map_err(ApiError::Validation)?;
    enqueue(&s.db, kind, "set_control").await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "success", "control": kind.as_str() })),
    ))
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: Option<String>,
}

async fn set_mode(
    State(s): State<AppState>,
    body: Result<Json<ModeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let Some(raw) = req.mode else {
        return Err(ApiError::Validation("Missing field 'mode'".to_string()));
    };
    let mode: Mode = raw.parse().map_err(ApiError::Validation)?;
    s.db.set_mode(mode).await?;
    info!(%mode, "mode set");
    Ok((StatusCode::OK, Json(json!({ "status": "success", "mode": mode }))))
}

async fn get_mode(State(s): State<AppState>) -> ApiResult {
    let mode = s.db.get_mode().await?;
    Ok((StatusCode::OK, Json(json!({ "status": "success", "mode": mode }))))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, cfg: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.web.bind, cfg.web.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cfg.web.bind, cfg.web.port))?;
    let app = router(state);

    if let Some(tls) = &cfg.tls {
        return serve_tls(app, addr, tls).await;
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {addr}"))?;
    info!("hub listening on http://{addr}");
    axum::serve(listener, app).await.context("web server error")
}

#[cfg(feature = "tls")]
async fn serve_tls(app: Router, addr: SocketAddr, tls: &crate::config::TlsSettings) -> Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .with_context(|| format!("failed to load TLS cert {} / key {}", tls.cert_path, tls.key_path))?;
    info!("hub listening on https://{addr}");
    axum_server::bind_rustls(addr, rustls)
        .serve(app.into_make_service())
        .await
        .context("web server error")
}

#[cfg(not(feature = "tls"))]
async fn serve_tls(_: Router, _: SocketAddr, _: &crate::config::TlsSettings) -> Result<()> {
    anyhow::bail!("[tls] is configured but the hub was built without the `tls` feature")
}

// ===========================================================================
// Tests
// ===========================================================================
