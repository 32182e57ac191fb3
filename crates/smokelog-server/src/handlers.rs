//! HTTP route handlers. Each one locks the ledger for a single call.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use smokelog_ledger::{DaySession, Direction, Event};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounterResponse {
    pub counter: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

/// GET /api/hello
pub async fn hello() -> Json<MessageResponse> {
    MessageResponse::new("Hello World!")
}

/// DELETE /api/clear_entries
pub async fn clear_entries(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    state.ledger.lock().clear_all()?;
    Ok(MessageResponse::new("Entries cleared!"))
}

/// GET /api/get_entries
pub async fn get_entries(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    let entries = state.ledger.lock().entries_for_active_day()?;
    Ok(Json(entries))
}

/// GET /api/get_entries_by_day/{day_id}
pub async fn get_entries_by_day(
    State(state): State<AppState>,
    Path(day_id): Path<i64>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let entries = state.ledger.lock().entries_for_day(day_id)?;
    entries.map(Json).ok_or(ApiError::NotFound("Day not found"))
}

/// GET /api/get_days
pub async fn get_days(State(state): State<AppState>) -> Json<Vec<DaySession>> {
    Json(state.ledger.lock().days())
}

/// POST /api/add_entry
pub async fn add_entry(State(state): State<AppState>) -> Result<Json<Event>, ApiError> {
    let event = state.ledger.lock().record_event()?;
    Ok(Json(event))
}

/// POST /api/new_day
pub async fn new_day(State(state): State<AppState>) -> Result<Json<DaySession>, ApiError> {
    let day = state.ledger.lock().open_new_day()?;
    Ok(Json(day))
}

/// POST /api/prev_day
pub async fn prev_day(State(state): State<AppState>) -> Result<Json<DaySession>, ApiError> {
    let day = state.ledger.lock().navigate_day(Direction::Previous)?;
    Ok(Json(day))
}

/// POST /api/next_day
pub async fn next_day(State(state): State<AppState>) -> Result<Json<DaySession>, ApiError> {
    let day = state.ledger.lock().navigate_day(Direction::Next)?;
    Ok(Json(day))
}

/// DELETE /api/delete_entry/{id}
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    if state.ledger.lock().remove_event(id)? {
        Ok(MessageResponse::new("Entry deleted"))
    } else {
        Err(ApiError::NotFound("Entry not found"))
    }
}

/// GET /api/get_counter
pub async fn get_counter(State(state): State<AppState>) -> Json<CounterResponse> {
    Json(CounterResponse {
        counter: state.ledger.lock().counter(),
    })
}

/// GET /api/get_current_day
pub async fn get_current_day(State(state): State<AppState>) -> Result<Json<DaySession>, ApiError> {
    let day = state.ledger.lock().active_day().cloned();
    day.map(Json).ok_or(ApiError::NotFound("Day not found"))
}
