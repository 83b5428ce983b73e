//! Thin HTTP handlers over the core facade.
//!
//! Handlers parse the request, call one facade or registry method, and map
//! the error kind onto a status code. No business logic lives here.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use baton_core::{BrokerMessage, CoreError, CreatePipeline, EventBroker, PipelineService, Registry};
use baton_protocol::{AgentProfile, CreatePipelineRequest, DecisionRequest, PipelineTemplate};

use crate::github;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PipelineService>,
    pub registry: Arc<Registry>,
    pub broker: Arc<EventBroker>,
    pub heartbeat: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipelines", post(create_pipeline).get(list_pipelines))
        .route("/pipelines/conflicts", get(conflicts))
        .route("/pipelines/:id", get(pipeline_detail))
        .route("/pipelines/:id/abort", post(abort_pipeline))
        .route("/pipelines/:id/approve", post(approve_pipeline))
        .route("/pipelines/:id/reject", post(reject_pipeline))
        .route("/pipelines/:id/restart", post(restart_pipeline))
        .route("/registry/agents", get(list_agents).post(create_agent))
        .route(
            "/registry/agents/:name",
            put(update_agent).delete(delete_agent),
        )
        .route(
            "/registry/pipelines",
            get(list_templates).post(create_template),
        )
        .route(
            "/registry/pipelines/:name",
            put(update_template).delete(delete_template),
        )
        .route("/events", get(event_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Maps core error kinds onto HTTP statuses.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Validation(_) | CoreError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Store(_) | CoreError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ----------------------------------------------------------------------
// Pipeline lifecycle
// ----------------------------------------------------------------------

async fn create_pipeline(
    State(state): State<AppState>,
    Json(request): Json<CreatePipelineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Fold issue context into the prompt before anything is persisted.
    let prompt = match (&request.github_issue_repo, request.github_issue_number) {
        (Some(repo), Some(number)) => github::enrich_prompt(&request.prompt, repo, number).await,
        _ => request.prompt.clone(),
    };

    let pipeline = state
        .service
        .create_and_run(CreatePipeline {
            template: request.template,
            custom_steps: request.custom_steps,
            title: request.title,
            prompt,
            branch: request.branch,
            working_dir: request.working_dir,
            step_models: request.step_models.unwrap_or_default(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(pipeline)))
}

async fn list_pipelines(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list().await?))
}

async fn pipeline_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.detail(id).await?))
}

async fn abort_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.abort(id).await?))
}

async fn approve_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<DecisionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(decision) = body.unwrap_or_default();
    Ok(Json(
        state
            .service
            .approve(id, decision.comment, decision.decided_by)
            .await?,
    ))
}

async fn reject_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<DecisionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(decision) = body.unwrap_or_default();
    Ok(Json(
        state
            .service
            .reject(id, decision.comment, decision.decided_by)
            .await?,
    ))
}

async fn restart_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.restart(id).await?))
}

#[derive(Deserialize)]
struct ConflictsParams {
    #[serde(default)]
    working_dir: Option<String>,
}

async fn conflicts(
    State(state): State<AppState>,
    Query(params): Query<ConflictsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let working_dir = params.working_dir.unwrap_or_default();
    Ok(Json(state.service.conflicts(&working_dir).await?))
}

// ----------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------

async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot().agents())
}

async fn create_agent(
    State(state): State<AppState>,
    Json(profile): Json<AgentProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.registry.create_agent(profile)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(profile): Json<AgentProfile>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry.update_agent(&name, profile)?))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_agent(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot().templates())
}

async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<PipelineTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.registry.create_template(template)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(template): Json<PipelineTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry.update_template(&name, template)?))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_template(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Event stream
// ----------------------------------------------------------------------

/// Long-lived SSE: forwards broker frames verbatim and interleaves a
/// heartbeat whenever no frame has arrived for one interval.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.broker.subscribe();
    let heartbeat = state.heartbeat;

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                message = subscription.recv() => match message {
                    Some(BrokerMessage::Frame(text)) => yield Ok(Event::default().data(text)),
                    Some(BrokerMessage::Stop) | None => break,
                },
                () = tokio::time::sleep(heartbeat) => {
                    let frame = json!({
                        "type": "heartbeat",
                        "ts": chrono::Utc::now().timestamp(),
                    });
                    yield Ok(Event::default().data(frame.to_string()));
                }
            }
        }
    };

    Sse::new(stream)
}
