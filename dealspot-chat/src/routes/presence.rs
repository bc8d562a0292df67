use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;

use crate::routes::channels::verify_membership;
use crate::schema::{channel_members, chat_preferences};
use crate::AppState;

/// A typing signal goes stale after this much silence.
pub const TYPING_TTL_SECS: i64 = 3;

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub channel_id: Uuid,
    pub online_count: usize,
    pub online_user_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TypingUsersResponse {
    pub channel_id: Uuid,
    pub typing_user_ids: Vec<Uuid>,
}

// --- Typing state (shared with the socket handlers) ---

/// Record or clear a typing signal. Backed by a Redis sorted set scored by
/// timestamp so stale entries age out without a sweeper. Always best-effort.
pub async fn set_typing(state: &AppState, channel_id: Uuid, user_id: Uuid, typing: bool) {
    let key = format!("typing:{channel_id}");
    let member = user_id.to_string();
    let result = if typing {
        state.redis.zadd(&key, &member, Utc::now().timestamp() as f64).await
    } else {
        state.redis.zrem(&key, &member).await
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, channel_id = %channel_id, "typing state update failed");
    }

    let payload = serde_json::json!({
        "channel_id": channel_id,
        "user_id": user_id,
        "typing": typing,
    });
    let room = format!("channel:{channel_id}");
    let _ = state.io.to(room).emit("typing", &payload);
}

async fn typing_user_ids(state: &AppState, channel_id: Uuid) -> Vec<Uuid> {
    let key = format!("typing:{channel_id}");
    let cutoff = (Utc::now().timestamp() - TYPING_TTL_SECS) as f64;

    // Age out stale signals, then read what is left
    let _ = state.redis.zrembyscore(&key, 0.0, cutoff).await;
    state
        .redis
        .zrangebyscore(&key, cutoff, f64::MAX)
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

// --- Handlers ---

/// GET /channels/:id/online - approximate online member count, derived from
/// presence keys rather than connection tracking. Members who opted out of
/// showing their status are excluded.
pub async fn get_online_users(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OnlineUsersResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    verify_membership(&mut conn, channel_id, auth_user.id)?;

    let member_ids: Vec<Uuid> = channel_members::table
        .filter(channel_members::channel_id.eq(channel_id))
        .select(channel_members::user_id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?;

    let hidden: HashSet<Uuid> = chat_preferences::table
        .filter(chat_preferences::user_id.eq_any(&member_ids))
        .filter(chat_preferences::show_online_status.eq(false))
        .select(chat_preferences::user_id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?
        .into_iter()
        .collect();

    let keys: Vec<String> = member_ids.iter().map(|id| format!("online:{id}")).collect();
    let online_flags = state.redis.exists_multi(&keys).await.unwrap_or_default();

    let online_user_ids: Vec<Uuid> = member_ids
        .iter()
        .zip(online_flags.iter())
        .filter(|&(id, online)| *online && !hidden.contains(id))
        .map(|(id, _)| *id)
        .collect();

    Ok(Json(ApiResponse::ok(OnlineUsersResponse {
        channel_id,
        online_count: online_user_ids.len(),
        online_user_ids,
    })))
}

/// GET /channels/:id/typing - members currently typing
pub async fn get_typing_users(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<TypingUsersResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    verify_membership(&mut conn, channel_id, auth_user.id)?;
    drop(conn);

    let typing_user_ids = typing_user_ids(&state, channel_id).await;

    Ok(Json(ApiResponse::ok(TypingUsersResponse {
        channel_id,
        typing_user_ids,
    })))
}

/// POST /channels/:id/typing/start
pub async fn start_typing(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    verify_membership(&mut conn, channel_id, auth_user.id)?;
    drop(conn);

    set_typing(&state, channel_id, auth_user.id, true).await;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "typing": true }))))
}

/// POST /channels/:id/typing/stop
pub async fn stop_typing(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    verify_membership(&mut conn, channel_id, auth_user.id)?;
    drop(conn);

    set_typing(&state, channel_id, auth_user.id, false).await;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "typing": false }))))
}
