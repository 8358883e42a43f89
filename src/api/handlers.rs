use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::models::{ClientProfile, FeatureColumn, Item, Message, Session};
use crate::services::{SelectedItem, SelectionResult, SelectionStatus, TurnOutcome};

use super::AppState;

// Request/Response types

#[derive(Debug, Serialize)]
pub struct FeatureResponse {
    pub index: usize,
    pub name: String,
    pub continuous: bool,
}

impl FeatureResponse {
    fn new(index: usize, column: &FeatureColumn) -> Self {
        Self {
            index,
            name: column.name.clone(),
            continuous: column.continuous,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub name: String,
    pub features: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub profile: ClientProfile,
    pub history: Vec<Message>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at,
            last_active: session.last_active,
            profile: session.profile.clone(),
            history: session.history.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub rank: usize,
    pub name: String,
    pub score: f64,
}

impl From<&SelectedItem> for RecommendationResponse {
    fn from(item: &SelectedItem) -> Self {
        Self {
            rank: item.rank,
            name: item.name.clone(),
            score: item.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub status: SelectionStatus,
    pub requested: usize,
    pub unfilled_ranks: usize,
    pub recommendations: Vec<RecommendationResponse>,
}

impl From<&SelectionResult> for SelectionResponse {
    fn from(selection: &SelectionResult) -> Self {
        Self {
            status: selection.status,
            requested: selection.requested,
            unfilled_ranks: selection.unfilled_ranks,
            recommendations: selection.items.iter().map(RecommendationResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub session_id: Uuid,
    pub objective: String,
    pub summary: String,
    pub unmatched: Vec<String>,
    #[serde(flatten)]
    pub selection: SelectionResponse,
}

impl TurnResponse {
    fn new(session_id: Uuid, outcome: TurnOutcome) -> Self {
        Self {
            session_id,
            selection: SelectionResponse::from(&outcome.selection),
            objective: outcome.objective,
            summary: outcome.summary,
            unmatched: outcome.unmatched,
        }
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// List the catalog's feature columns in index order
pub async fn get_features(State(state): State<AppState>) -> Json<Vec<FeatureResponse>> {
    let schema = state.pipeline.catalog().schema();
    let features = schema
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| FeatureResponse::new(index, column))
        .collect();
    Json(features)
}

/// List catalog items with their normalized feature values
pub async fn get_items(State(state): State<AppState>) -> Json<Vec<ItemResponse>> {
    let catalog = state.pipeline.catalog();
    let names = catalog.schema().names();
    let items = catalog
        .items()
        .iter()
        .map(|item: &Item| ItemResponse {
            name: item.name.clone(),
            features: names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.to_string(), item.value(i)))
                .collect(),
        })
        .collect();
    Json(items)
}

/// Start a new conversation
pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreatedResponse>) {
    let id = state.sessions.create().await;
    tracing::info!(session_id = %id, "Session created");
    (StatusCode::CREATED, Json(SessionCreatedResponse { id }))
}

/// Current profile and history of a session
pub async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<SessionResponse>> {
    let session = state.session(id).await?;
    let mut session = session.lock().await;
    session.touch();
    Ok(Json(SessionResponse::from(&*session)))
}

/// End a conversation and free its state
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    if !state.sessions.remove(id).await {
        return Err(AppError::NotFound(format!("session {}", id)));
    }
    tracing::info!(session_id = %id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Run the preference pipeline for one user message
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<MessageRequest>,
) -> AppResult<Json<TurnResponse>> {
    if request.text.trim().is_empty() {
        return Err(AppError::InvalidInput("text must not be empty".to_string()));
    }
    let top_k = state.top_k(request.top_k)?;
    let session = state.session(id).await?;

    tracing::info!(
        request_id = %request_id,
        session_id = %id,
        top_k,
        "Processing message"
    );

    // Held for the whole turn: one writer per session
    let mut session = session.lock().await;
    session.touch();
    let outcome = state.pipeline.run_turn(&mut session, &request.text, top_k).await?;

    tracing::info!(
        request_id = %request_id,
        session_id = %id,
        selected = outcome.selection.items.len(),
        "Message processed"
    );

    Ok(Json(TurnResponse::new(id, outcome)))
}

/// Recommend from the session's committed profile without calling the collaborator
pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<SelectionResponse>> {
    let top_k = state.top_k(query.top_k)?;
    let session = state.session(id).await?;
    let profile = {
        let mut session = session.lock().await;
        session.touch();
        session.profile.clone()
    };

    let selection = state.pipeline.select(&profile, top_k)?;
    Ok(Json(SelectionResponse::from(&selection)))
}
