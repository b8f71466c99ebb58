//! Device-local HTTP surface. Every command route answers with one
//! plain-text status line; `/status` is the JSON snapshot.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::command::{Command, CommandChannel, CommandReply, Outcome};
use crate::state::SharedStatus;

const USAGE: &str = "unknown endpoint. Use: /open_servo, /close_servo, /auto_mode, /manual_mode, \
                     /activate_relay?duration=30, /cancel_relay, /relay_status, /status";

#[derive(Clone)]
pub struct WebState {
    pub commands: Arc<CommandChannel>,
    pub status: SharedStatus,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/open_servo", get(open_servo))
        .route("/close_servo", get(close_servo))
        .route("/auto_mode", get(auto_mode))
        .route("/manual_mode", get(manual_mode))
        .route("/activate_relay", get(activate_relay))
        .route("/cancel_relay", get(cancel_relay))
        .route("/relay_status", get(relay_status))
        .route("/status", get(status))
        .fallback(fallback)
        .with_state(state)
}

fn reply(r: CommandReply) -> (StatusCode, String) {
    let code = match r.outcome {
        Outcome::Done | Outcome::Ignored => StatusCode::OK,
        Outcome::Conflict => StatusCode::CONFLICT,
        Outcome::Invalid => StatusCode::BAD_REQUEST,
        Outcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, r.message)
}

async fn open_servo(State(s): State<WebState>) -> impl IntoResponse {
    reply(s.commands.dispatch(Command::Open, "local").await)
}

async fn close_servo(State(s): State<WebState>) -> impl IntoResponse {
    reply(s.commands.dispatch(Command::Close, "local").await)
}

async fn auto_mode(State(s): State<WebState>) -> impl IntoResponse {
    reply(s.commands.dispatch(Command::Auto, "local").await)
}

async fn manual_mode(State(s): State<WebState>) -> impl IntoResponse {
    reply(s.commands.dispatch(Command::Manual, "local").await)
}

#[derive(Debug, Deserialize)]
struct RelayQuery {
    duration: Option<String>,
}

async fn activate_relay(
    State(s): State<WebState>,
    Query(q): Query<RelayQuery>,
) -> impl IntoResponse {
    let duration = match q.duration.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid duration '{raw}': expected whole seconds"),
                )
            }
        },
    };
    reply(s.commands.dispatch(Command::Irrigate { duration }, "local").await)
}

async fn cancel_relay(State(s): State<WebState>) -> impl IntoResponse {
    reply(s.commands.dispatch(Command::CancelRelay, "local").await)
}

async fn relay_status(State(s): State<WebState>) -> impl IntoResponse {
    let r = s.commands.relay().state().await;
    if r.active {
        format!(
            "relay ON, {}s remaining of {}s",
            r.remaining_secs, r.duration_secs
        )
    } else {
        "relay OFF".to_string()
    }
}

async fn status(State(s): State<WebState>) -> impl IntoResponse {
    let mode = s.commands.mode().mode().await;
    let relay = s.commands.relay().state().await;
    let st = s.status.read().await;
    Json(st.to_snapshot(mode, relay))
}

async fn fallback() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, USAGE)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: WebState, bind: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid web bind address {bind}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {addr}"))?;

    info!("device web surface listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
