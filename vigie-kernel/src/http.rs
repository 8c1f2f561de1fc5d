/**
 * API REST VIGIE - Surface HTTP du kernel pour le front-end conversationnel
 *
 * RÔLE :
 * Expose les opérations du Fleet Monitor au bot de chat (et aux scripts
 * d'admin) : déclenchement de checks, lecture du dernier sweep, probes de
 * session. Le bot poste le texte utilisateur sur /command et relaie la
 * réponse texte telle quelle.
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Validation côté middleware avant traitement métier
 */

use crate::commands::CommandHandler;
use crate::models::{CheckResult, CycleSummary, SessionStatus};
use crate::monitor::{FleetMonitor, SweepError};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<CommandHandler>,
    pub monitor: Arc<FleetMonitor>,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("VIGIE_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        eprintln!("SECURITY: VIGIE_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(get_status))
        .route("/command", post(post_command))
        .route("/check", post(check_all))
        .route("/check/{host}", post(check_host))
        .route("/session/{host}", get(get_session))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    text: String,
}

// POST /command (texte utilisateur brut -> réponse texte pour le chat)
async fn post_command(State(app): State<AppState>, Json(body): Json<CommandBody>) -> String {
    app.handler.handle_text(&body.text).await
}

// GET /status (dernier sweep complet)
async fn get_status(State(app): State<AppState>) -> Result<Json<CycleSummary>, StatusCode> {
    match app.monitor.last_summary() {
        Some(summary) => Ok(Json(summary)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// POST /check (sweep complet à la demande)
async fn check_all(State(app): State<AppState>) -> Result<Json<CycleSummary>, StatusCode> {
    app.monitor.run_sweep().await.map(Json).map_err(sweep_error_status)
}

// POST /check/{host} (check mono-hôte à la demande)
async fn check_host(
    State(app): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<CheckResult>, StatusCode> {
    app.monitor.check_host(&host).await.map(Json).map_err(sweep_error_status)
}

// GET /session/{host} (probe de session interactive)
async fn get_session(
    State(app): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<SessionStatus>, StatusCode> {
    app.monitor
        .check_host_session(&host)
        .await
        .map(Json)
        .map_err(sweep_error_status)
}

fn sweep_error_status(e: SweepError) -> StatusCode {
    match e {
        SweepError::AlreadyRunning => StatusCode::CONFLICT,
        SweepError::UnknownHost(_) => StatusCode::NOT_FOUND,
        SweepError::Superseded => StatusCode::CONFLICT,
        SweepError::Inventory(_) | SweepError::Internal => StatusCode::BAD_GATEWAY,
    }
}
