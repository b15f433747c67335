//! Route handler functions for all API endpoints.
//!
//! Handlers parse the request, call the `AlarmService` and return JSON.
//! Engine errors convert into `ApiError` through `?`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use reveille_core::types::{AlarmItem, ItemId, ItemKind};
use reveille_engine::{ItemPatch, NewItem, NotificationAction, Reschedule, ScheduleSnapshot};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct KindParams {
    pub kind: Option<String>,
}

impl KindParams {
    fn kind(&self) -> Result<Option<ItemKind>, ApiError> {
        self.kind
            .as_deref()
            .map(|k| k.parse::<ItemKind>().map_err(ApiError::BadRequest))
            .transpose()
    }
}

/// Button press reported by a phone. `tag` is the item id the
/// notification was sent with.
#[derive(Debug, Deserialize)]
pub struct NotificationActionRequest {
    pub tag: String,
    pub action: NotificationAction,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnoozeParams {
    /// Minutes to snooze; the configured default when absent.
    pub minutes: Option<u32>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub item_count: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub items: Vec<AlarmItem>,
    pub count: usize,
}

impl From<Vec<AlarmItem>> for ItemsResponse {
    fn from(items: Vec<AlarmItem>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

// =============================================================================
// Health and observability
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.service().snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        item_count: snapshot.items.len(),
        active_sessions: snapshot.active_count,
    })
}

/// GET /snapshot - every item with its live session state.
pub async fn snapshot(State(state): State<AppState>) -> Json<ScheduleSnapshot> {
    Json(state.service().snapshot())
}

/// GET /stream - SSE of domain events.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.service().subscribe_events();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event_name()).data(data)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "SSE subscriber lagged; events dropped");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// =============================================================================
// Items
// =============================================================================

/// GET /items - list items, optionally `?kind=alarm|reminder`.
pub async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<KindParams>,
) -> Result<Json<ItemsResponse>, ApiError> {
    let kind = params.kind()?;
    Ok(Json(state.service().list_items(kind).into()))
}

/// POST /items - create an alarm or reminder.
pub async fn create_item(
    State(state): State<AppState>,
    Json(body): Json<NewItem>,
) -> Result<(StatusCode, Json<AlarmItem>), ApiError> {
    let item = state.service().set_item(body)?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// DELETE /items - delete every item, optionally of one kind.
pub async fn delete_items(
    State(state): State<AppState>,
    Query(params): Query<KindParams>,
) -> Result<Json<ItemsResponse>, ApiError> {
    let kind = params.kind()?;
    let removed = state.service().delete_all(kind).await?;
    Ok(Json(removed.into()))
}

/// GET /items/{id}
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(state.service().get_item(&ItemId::new(id))?))
}

/// PUT /items/{id} - edit fields; absent fields are left unchanged.
pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(state.service().edit_item(&ItemId::new(id), patch)?))
}

/// DELETE /items/{id}
pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(state.service().delete(&ItemId::new(id)).await?))
}

/// POST /items/{id}/reschedule
pub async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Reschedule>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(state.service().reschedule(&ItemId::new(id), body)?))
}

/// POST /items/{id}/snooze?minutes=N
pub async fn snooze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SnoozeParams>,
) -> Result<Json<AlarmItem>, ApiError> {
    let item = state
        .service()
        .snooze(&ItemId::new(id), params.minutes)
        .await?;
    Ok(Json(item))
}

/// POST /items/{id}/stop
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(state.service().stop(&ItemId::new(id)).await?))
}

/// POST /items/{id}/enable
pub async fn enable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(
        state.service().set_enabled(&ItemId::new(id), true).await?,
    ))
}

/// POST /items/{id}/disable
pub async fn disable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmItem>, ApiError> {
    Ok(Json(
        state.service().set_enabled(&ItemId::new(id), false).await?,
    ))
}

/// POST /stop-all - stop every sounding item, optionally of one kind.
pub async fn stop_all(
    State(state): State<AppState>,
    Query(params): Query<KindParams>,
) -> Result<Json<ItemsResponse>, ApiError> {
    let kind = params.kind()?;
    Ok(Json(state.service().stop_all(kind).await.into()))
}

/// POST /notifications/action - route a notification button to the item.
pub async fn notification_action(
    State(state): State<AppState>,
    Json(body): Json<NotificationActionRequest>,
) -> Result<Json<AlarmItem>, ApiError> {
    let item = state
        .service()
        .notification_action(&ItemId::new(body.tag), body.action)
        .await?;
    Ok(Json(item))
}
