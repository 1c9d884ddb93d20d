//! The natural-language query endpoint. Thin by design: validation and all
//! degradation paths live in the agent runtime, so this handler only maps
//! the boundary (`empty query -> 400`, everything else -> 200 with a
//! well-formed answer).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use consulta_agent::AgentRuntime;
use consulta_core::answer::FormattedAnswer;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ConsultaState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ConsultaRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ConsultaError {
    pub error: String,
}

pub fn router(state: ConsultaState) -> Router {
    Router::new().route("/api/consulta/query", post(query_consulta)).with_state(state)
}

async fn query_consulta(
    State(state): State<ConsultaState>,
    headers: HeaderMap,
    Json(request): Json<ConsultaRequest>,
) -> Result<Json<FormattedAnswer>, (StatusCode, Json<ConsultaError>)> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ConsultaError { error: "falta el encabezado X-User-Id".to_string() }),
            )
        })?;

    let correlation_id = Uuid::new_v4().simple().to_string();
    info!(
        event_name = "consulta.query.received",
        correlation_id = %correlation_id,
        user_id,
        "query received"
    );

    let answer = state.runtime.run_query(&request.query, user_id).await.map_err(|validation| {
        (StatusCode::BAD_REQUEST, Json(ConsultaError { error: validation.to_string() }))
    })?;

    info!(
        event_name = "consulta.query.answered",
        correlation_id = %correlation_id,
        format = answer.format.as_str(),
        "query answered"
    );
    Ok(Json(answer))
}
