use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;

use crate::models::{ChatPreferences, NewBlockedUser};
use crate::schema::{blocked_users, chat_preferences};
use crate::AppState;

// --- Helpers (also used by the channel and chat-request paths) ---

/// Load a user's chat preferences, creating the defaults row on first read.
pub fn load_or_default(
    conn: &mut diesel::pg::PgConnection,
    user_id: Uuid,
) -> AppResult<ChatPreferences> {
    if let Some(prefs) = chat_preferences::table
        .find(user_id)
        .first::<ChatPreferences>(conn)
        .optional()
        .map_err(AppError::Database)?
    {
        return Ok(prefs);
    }

    diesel::insert_into(chat_preferences::table)
        .values(&ChatPreferences::defaults_for(user_id))
        .on_conflict_do_nothing()
        .execute(conn)
        .map_err(AppError::Database)?;

    chat_preferences::table
        .find(user_id)
        .first::<ChatPreferences>(conn)
        .map_err(AppError::Database)
}

/// True if either user has blocked the other.
pub fn is_blocked_between(
    conn: &mut diesel::pg::PgConnection,
    a: Uuid,
    b: Uuid,
) -> AppResult<bool> {
    let count: i64 = blocked_users::table
        .filter(
            blocked_users::blocker_id
                .eq(a)
                .and(blocked_users::blocked_id.eq(b))
                .or(blocked_users::blocker_id
                    .eq(b)
                    .and(blocked_users::blocked_id.eq(a))),
        )
        .select(count_star())
        .first::<i64>(conn)
        .map_err(AppError::Database)?;

    Ok(count > 0)
}

// --- Request DTOs ---

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = chat_preferences)]
pub struct UpdatePreferencesRequest {
    pub allow_private_messages: Option<bool>,
    pub require_request_for_private: Option<bool>,
    pub auto_accept_requests_from_followers: Option<bool>,
    pub show_online_status: Option<bool>,
    pub notifications_enabled: Option<bool>,
    pub sound_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct BlockStatusResponse {
    pub user_id: Uuid,
    pub blocked: bool,
}

// --- Handlers ---

/// GET /preferences - the caller's chat preferences (defaults on first read)
pub async fn get_preferences(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ChatPreferences>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let prefs = load_or_default(&mut conn, auth_user.id)?;
    Ok(Json(ApiResponse::ok(prefs)))
}

/// PUT /preferences - update the caller's chat preferences
pub async fn update_preferences(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> AppResult<Json<ApiResponse<ChatPreferences>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    // Make sure the row exists before applying a partial changeset
    load_or_default(&mut conn, auth_user.id)?;

    let updated: ChatPreferences = diesel::update(chat_preferences::table.find(auth_user.id))
        .set((&req, chat_preferences::updated_at.eq(Utc::now())))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(updated)))
}

/// GET /blocks - ids of users the caller has blocked
pub async fn list_blocks(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Uuid>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let blocked: Vec<Uuid> = blocked_users::table
        .filter(blocked_users::blocker_id.eq(auth_user.id))
        .order(blocked_users::created_at.desc())
        .select(blocked_users::blocked_id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(blocked)))
}

/// POST /blocks/:user_id - block a user (idempotent)
pub async fn block_user(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<BlockStatusResponse>>> {
    if target_id == auth_user.id {
        return Err(AppError::new(ErrorCode::CannotBlockSelf, "you cannot block yourself"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    diesel::insert_into(blocked_users::table)
        .values(&NewBlockedUser {
            blocker_id: auth_user.id,
            blocked_id: target_id,
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)
        .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(BlockStatusResponse {
        user_id: target_id,
        blocked: true,
    })))
}

/// DELETE /blocks/:user_id - unblock a user (no-op when not blocked)
pub async fn unblock_user(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<BlockStatusResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    diesel::delete(
        blocked_users::table
            .filter(blocked_users::blocker_id.eq(auth_user.id))
            .filter(blocked_users::blocked_id.eq(target_id)),
    )
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(BlockStatusResponse {
        user_id: target_id,
        blocked: false,
    })))
}
