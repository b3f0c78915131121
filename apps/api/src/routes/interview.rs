//! Handlers for the interview and evaluation HTTP surface.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    mode: Option<String>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    answer: String,
    sources: Vec<Value>,
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub async fn start(State(state): State<AppState>, Json(req): Json<StartRequest>) -> Json<TurnResponse> {
    let handle = state
        .sessions
        .get(&req.session_id)
        .unwrap_or_else(|| state.sessions.create(&req.session_id));

    let answer = state.dialogue.start(&req.session_id, &handle, req.force).await;
    let _ = state.sessions.persist().await;

    Json(TurnResponse {
        answer,
        sources: Vec::new(),
        session_id: req.session_id,
    })
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub async fn reset(State(state): State<AppState>, Json(req): Json<ResetRequest>) -> Json<TurnResponse> {
    let handle = state
        .sessions
        .get(&req.session_id)
        .unwrap_or_else(|| state.sessions.create(&req.session_id));

    let answer = state.dialogue.start(&req.session_id, &handle, true).await;
    let _ = state.sessions.persist().await;

    Json(TurnResponse {
        answer,
        sources: Vec::new(),
        session_id: req.session_id,
    })
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
    question: String,
    #[serde(default)]
    #[allow(dead_code)]
    mode: Option<String>,
}

pub async fn retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let handle = state
        .sessions
        .get(&req.session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", req.session_id)))?;

    let answer = state.dialogue.handle_turn(&req.session_id, &handle, &req.question).await;
    if let Err(e) = state.sessions.persist().await {
        tracing::error!("failed to persist sessions after turn: {e}");
    }

    Ok(Json(TurnResponse {
        answer,
        sources: Vec::new(),
        session_id: req.session_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationStartRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Serialize)]
pub struct EvaluationStartResponse {
    answer: String,
    eval_schema: crate::evaluation::EvalSchema,
    summary: String,
    knowledge_markdown: String,
    new_knowledge: Vec<Value>,
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub async fn evaluation_start(
    State(state): State<AppState>,
    Json(req): Json<EvaluationStartRequest>,
) -> Result<Json<EvaluationStartResponse>, AppError> {
    let handle = state
        .sessions
        .get(&req.session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", req.session_id)))?;

    let result = state.evaluation.start(&req.session_id, &handle).await;
    let _ = state.sessions.persist().await;

    Ok(Json(EvaluationStartResponse {
        answer: result.answer,
        eval_schema: result.eval_schema,
        summary: result.summary,
        knowledge_markdown: result.knowledge_markdown,
        new_knowledge: result.new_knowledge,
        session_id: req.session_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationSubmitRequest {
    #[serde(rename = "sessionId")]
    session_id: String,
    ratings: HashMap<String, f64>,
    comments: Option<String>,
    corrections: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationSubmitResponse {
    message: String,
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub async fn evaluation_submit(
    State(state): State<AppState>,
    Json(req): Json<EvaluationSubmitRequest>,
) -> Result<Json<EvaluationSubmitResponse>, AppError> {
    let handle = state
        .sessions
        .get(&req.session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", req.session_id)))?;

    let message = state
        .evaluation
        .submit(&req.session_id, &handle, &req.ratings, req.comments, req.corrections)
        .await
        .map_err(AppError::Validation)?;

    let _ = state.sessions.persist().await;

    Ok(Json(EvaluationSubmitResponse {
        message,
        session_id: req.session_id,
    }))
}

pub async fn list_conversations(State(state): State<AppState>) -> Json<Value> {
    let mut sessions = serde_json::Map::new();
    for id in state.sessions.list_ids() {
        if let Some(handle) = state.sessions.get(&id) {
            let snapshot = handle.lock().await.clone();
            sessions.insert(id, serde_json::to_value(snapshot).unwrap_or(Value::Null));
        }
    }
    Json(json!({ "sessions": sessions }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.sessions.delete(&session_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn get_trace(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let path = state.config.data_dir.join("traces").join(format!("{session_id}.jsonl"));
    let contents = std::fs::read_to_string(&path)
        .map_err(|_| AppError::NotFound(format!("no trace for session '{session_id}'")))?;

    Ok(([(header::CONTENT_TYPE, "application/jsonl")], contents).into_response())
}
