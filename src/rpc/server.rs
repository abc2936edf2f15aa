use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use crate::spaced_repetition::{
    EngineConfig, SpacedRepetitionError, SpacedRepetitionService, StatsResponse, StudyQueue,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SpacedRepetitionService>,
}

impl IntoResponse for SpacedRepetitionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SpacedRepetitionError::InvalidQuality(_)
            | SpacedRepetitionError::InvalidSessionSize(_)
            | SpacedRepetitionError::InvalidSessionOutcome { .. }
            | SpacedRepetitionError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            SpacedRepetitionError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            SpacedRepetitionError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            SpacedRepetitionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SpacedRepetitionError::Io(_)
            | SpacedRepetitionError::Json(_)
            | SpacedRepetitionError::InvalidState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/sr/config", get(sr_get_config))
        .route("/api/sr/cards/introduce", post(sr_introduce_card))
        .route("/api/sr/cards/grade", post(sr_grade_card))
        .route("/api/sr/cards/reset", post(sr_reset_card))
        .route("/api/sr/cards/preview", post(sr_preview_card))
        .route("/api/sr/queue", post(sr_study_queue))
        .route("/api/sr/due", post(sr_find_due))
        .route("/api/sr/session/complete", post(sr_complete_session))
        .route("/api/sr/session/size/{user_id}", get(sr_session_size))
        .route("/api/sr/stats/{user_id}", get(sr_get_stats))
        .route("/rpc", post(json_rpc_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_http_server(
    service: Arc<SpacedRepetitionService>,
    host: &str,
    port: u16,
) -> Result<()> {
    let app = router(Arc::new(AppState { service }));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn run_stdio_server(service: Arc<SpacedRepetitionService>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);

    tracing::info!("JSON-RPC server running on stdio");

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_jsonrpc_request(&service, line).await;

        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn sr_get_config(State(state): State<Arc<AppState>>) -> Json<EngineConfig> {
    Json(state.service.config().clone())
}

async fn sr_introduce_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CardRequest>,
) -> Result<Json<MemoryStateResponse>, SpacedRepetitionError> {
    let card = state
        .service
        .introduce_card(&request.user_id, &request.card_id, request.now())
        .await?;
    Ok(Json(card.into()))
}

async fn sr_grade_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GradeRequest>,
) -> Result<Json<MemoryStateResponse>, SpacedRepetitionError> {
    let quality = request.quality.parse()?;
    let card = state
        .service
        .grade_card_timed(
            &request.user_id,
            &request.card_id,
            quality,
            request.response_ms,
            request.now(),
        )
        .await?;
    Ok(Json(card.into()))
}

async fn sr_reset_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CardRequest>,
) -> Result<Json<MemoryStateResponse>, SpacedRepetitionError> {
    let card = state
        .service
        .reset_card(&request.user_id, &request.card_id, request.now())
        .await?;
    Ok(Json(card.into()))
}

async fn sr_preview_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CardRequest>,
) -> Result<Json<PreviewResponse>, SpacedRepetitionError> {
    let options = state
        .service
        .preview(&request.user_id, &request.card_id, request.now())
        .await?;
    Ok(Json(PreviewResponse {
        user_id: request.user_id,
        card_id: request.card_id,
        options,
    }))
}

async fn sr_study_queue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueueRequest>,
) -> Result<Json<StudyQueue>, SpacedRepetitionError> {
    let queue = state
        .service
        .get_study_queue(&request.user_id, request.size, request.now())
        .await?;
    Ok(Json(queue))
}

async fn sr_find_due(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DueRequest>,
) -> Result<Json<DueResponse>, SpacedRepetitionError> {
    let cards = state
        .service
        .find_due(&request.user_id, request.limit, request.now())
        .await?;
    Ok(Json(DueResponse {
        user_id: request.user_id,
        cards: cards.into_iter().map(Into::into).collect(),
    }))
}

async fn sr_complete_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionCompleteRequest>,
) -> Result<Json<SessionSizeResponse>, SpacedRepetitionError> {
    let session_size = state
        .service
        .complete_session(&request.user_id, request.correct, request.total, request.now())
        .await?;
    Ok(Json(SessionSizeResponse {
        user_id: request.user_id,
        session_size,
    }))
}

async fn sr_session_size(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionSizeResponse>, SpacedRepetitionError> {
    let session_size = state.service.optimal_session_size(&user_id).await?;
    Ok(Json(SessionSizeResponse {
        user_id,
        session_size,
    }))
}

async fn sr_get_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<StatsResponse>, SpacedRepetitionError> {
    let stats = state.service.get_stats(&user_id, query.now()).await?;
    Ok(Json(stats))
}

async fn json_rpc_handler(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let response = handle_jsonrpc_request(&state.service, &body).await;
    (StatusCode::OK, response)
}

async fn handle_jsonrpc_request(service: &SpacedRepetitionService, request: &str) -> String {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(request);

    match parsed {
        Ok(json) => {
            let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
            let params = json
                .get("params")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let id = json.get("id").cloned().unwrap_or(serde_json::Value::Null);

            let result = dispatch_method(service, method, params).await;

            match result {
                Ok(value) => serde_json::json!({
                    "jsonrpc": "2.0",
                    "result": value,
                    "id": id
                })
                .to_string(),
                Err(e) => {
                    let kind = e
                        .downcast_ref::<SpacedRepetitionError>()
                        .map(|err| err.code())
                        .unwrap_or("INVALID_REQUEST");
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "error": {
                            "code": -32000,
                            "message": e.to_string(),
                            "data": { "kind": kind }
                        },
                        "id": id
                    })
                    .to_string()
                }
            }
        }
        Err(e) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32700,
                "message": format!("Parse error: {}", e)
            },
            "id": null
        })
        .to_string(),
    }
}

async fn dispatch_method(
    service: &SpacedRepetitionService,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value> {
    match method {
        "sr.introduce" => {
            let request: CardRequest = serde_json::from_value(params)?;
            let card = service
                .introduce_card(&request.user_id, &request.card_id, request.now())
                .await?;
            Ok(serde_json::to_value(MemoryStateResponse::from(card))?)
        }
        "sr.grade" => {
            let request: GradeRequest = serde_json::from_value(params)?;
            let quality = request.quality.parse()?;
            let card = service
                .grade_card_timed(
                    &request.user_id,
                    &request.card_id,
                    quality,
                    request.response_ms,
                    request.now(),
                )
                .await?;
            Ok(serde_json::to_value(MemoryStateResponse::from(card))?)
        }
        "sr.reset" => {
            let request: CardRequest = serde_json::from_value(params)?;
            let card = service
                .reset_card(&request.user_id, &request.card_id, request.now())
                .await?;
            Ok(serde_json::to_value(MemoryStateResponse::from(card))?)
        }
        "sr.preview" => {
            let request: CardRequest = serde_json::from_value(params)?;
            let options = service
                .preview(&request.user_id, &request.card_id, request.now())
                .await?;
            Ok(serde_json::to_value(PreviewResponse {
                user_id: request.user_id,
                card_id: request.card_id,
                options,
            })?)
        }
        "sr.queue" => {
            let request: QueueRequest = serde_json::from_value(params)?;
            let queue = service
                .get_study_queue(&request.user_id, request.size, request.now())
                .await?;
            Ok(serde_json::to_value(queue)?)
        }
        "sr.due" => {
            let request: DueRequest = serde_json::from_value(params)?;
            let cards = service
                .find_due(&request.user_id, request.limit, request.now())
                .await?;
            Ok(serde_json::to_value(DueResponse {
                user_id: request.user_id,
                cards: cards.into_iter().map(Into::into).collect(),
            })?)
        }
        "sr.session.complete" => {
            let request: SessionCompleteRequest = serde_json::from_value(params)?;
            let session_size = service
                .complete_session(&request.user_id, request.correct, request.total, request.now())
                .await?;
            Ok(serde_json::to_value(SessionSizeResponse {
                user_id: request.user_id,
                session_size,
            })?)
        }
        "sr.session.size" => {
            let request: UserRequest = serde_json::from_value(params)?;
            let session_size = service.optimal_session_size(&request.user_id).await?;
            Ok(serde_json::to_value(SessionSizeResponse {
                user_id: request.user_id,
                session_size,
            })?)
        }
        "sr.stats" => {
            let request: UserRequest = serde_json::from_value(params)?;
            let stats = service.get_stats(&request.user_id, request.now()).await?;
            Ok(serde_json::to_value(stats)?)
        }
        "sr.config" => Ok(serde_json::to_value(service.config())?),
        "health.check" => Ok(serde_json::Value::String("ok".to_string())),
        _ => {
            anyhow::bail!("Method not found: {}", method)
        }
    }
}
