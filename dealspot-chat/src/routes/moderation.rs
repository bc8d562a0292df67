use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::middleware::{AdminUser, ModeratorUser};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;
use dealspot_shared::types::pagination::{Paginated, PaginationParams};

use crate::events::publisher;
use crate::models::{
    BannedWord, ChatBan, Message, NewBannedWord, NewChatBan, NewUnbanRequest, UnbanRequest,
    UnbanRequestStatus,
};
use crate::schema::{banned_words, channels, chat_bans, messages, unban_requests};
use crate::AppState;

// --- Ban enforcement helpers (consulted synchronously on every send) ---

/// The active ban covering `channel_id` for this user, if any. A global ban
/// (NULL channel scope) covers every channel and wins over scoped bans.
pub fn active_ban_covering(
    conn: &mut diesel::pg::PgConnection,
    user_id: Uuid,
    channel_id: Uuid,
) -> AppResult<Option<ChatBan>> {
    let now = Utc::now();
    let ban = chat_bans::table
        .filter(chat_bans::user_id.eq(user_id))
        .filter(chat_bans::is_active.eq(true))
        .filter(chat_bans::channel_id.is_null().or(chat_bans::channel_id.eq(channel_id)))
        .filter(chat_bans::expires_at.is_null().or(chat_bans::expires_at.gt(now)))
        // Global scope (NULL channel) sorts first so it wins over scoped bans
        .order(chat_bans::channel_id.is_null().desc())
        .first::<ChatBan>(conn)
        .optional()
        .map_err(AppError::Database)?;

    Ok(ban)
}

/// Whether this user holds an in-force global ban.
pub fn has_global_ban(
    conn: &mut diesel::pg::PgConnection,
    user_id: Uuid,
) -> AppResult<bool> {
    let now = Utc::now();
    let count: i64 = chat_bans::table
        .filter(chat_bans::user_id.eq(user_id))
        .filter(chat_bans::is_active.eq(true))
        .filter(chat_bans::channel_id.is_null())
        .filter(chat_bans::expires_at.is_null().or(chat_bans::expires_at.gt(now)))
        .count()
        .get_result(conn)
        .map_err(AppError::Database)?;

    Ok(count > 0)
}

/// The generic refusal shown to a banned sender. The recorded reason stays
/// on the moderator side so it cannot be used to tune evasion.
pub const BANNED_SENDER_MESSAGE: &str = "you are not allowed to send messages right now";

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
pub struct BanUserRequest {
    pub user_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub reason: String,
    pub duration_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RequestUnbanRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnbanReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct ReviewUnbanRequest {
    pub action: UnbanReviewAction,
}

#[derive(Debug, Deserialize)]
pub struct AddBannedWordRequest {
    pub word: String,
}

/// Moderator audit view of a message: includes the pre-redaction content
/// that list endpoints never return.
#[derive(Debug, Serialize)]
pub struct AuditedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub original_content: Option<String>,
    pub deleted_reason: Option<String>,
}

// --- Ban lifecycle ---

/// POST /moderation/bans - ban a user globally or in one channel
pub async fn ban_user(
    moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BanUserRequest>,
) -> AppResult<Json<ApiResponse<ChatBan>>> {
    if req.user_id == moderator.0.id {
        return Err(AppError::new(ErrorCode::CannotBanSelf, "you cannot ban yourself"));
    }
    if req.reason.trim().is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "a ban reason is required"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    // Channel-scoped bans must point at a real channel
    if let Some(channel_id) = req.channel_id {
        let exists: i64 = channels::table
            .filter(channels::id.eq(channel_id))
            .count()
            .get_result(&mut conn)
            .map_err(AppError::Database)?;
        if exists == 0 {
            return Err(AppError::new(ErrorCode::ChannelNotFound, "channel not found"));
        }
    }

    // Bans past their expiry no longer occupy the active-scope slot
    diesel::update(
        chat_bans::table
            .filter(chat_bans::user_id.eq(req.user_id))
            .filter(chat_bans::is_active.eq(true))
            .filter(chat_bans::expires_at.is_not_null())
            .filter(chat_bans::expires_at.le(Utc::now())),
    )
    .set(chat_bans::is_active.eq(false))
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    let expires_at: Option<DateTime<Utc>> = req.duration_days.map(|d| Utc::now() + Duration::days(d));

    let new_ban = NewChatBan {
        user_id: req.user_id,
        channel_id: req.channel_id,
        banned_by: moderator.0.id,
        reason: req.reason.clone(),
        expires_at,
    };

    // The partial unique index on active (user, scope) turns a concurrent
    // duplicate into a violation rather than a second ban row.
    let ban: ChatBan = diesel::insert_into(chat_bans::table)
        .values(&new_ban)
        .get_result(&mut conn)
        .map_err(|e| {
            if AppError::is_unique_violation(&e) {
                AppError::new(
                    ErrorCode::DuplicateBan,
                    "an active ban already covers this user and scope",
                )
            } else {
                AppError::Database(e)
            }
        })?;

    publisher::publish_ban_issued(&state.rabbitmq, &ban).await;

    tracing::info!(
        ban_id = %ban.id,
        user_id = %ban.user_id,
        channel_id = ?ban.channel_id,
        banned_by = %moderator.0.id,
        "ban issued"
    );

    Ok(Json(ApiResponse::ok(ban)))
}

/// DELETE /moderation/bans/:id - deactivate a ban
pub async fn unban_user(
    moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Path(ban_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ChatBan>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let ban: ChatBan = chat_bans::table
        .find(ban_id)
        .first::<ChatBan>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::BanNotFound, "ban not found"))?;

    // Deactivating an already-lifted ban is a no-op
    let updated: ChatBan = diesel::update(chat_bans::table.find(ban_id))
        .set(chat_bans::is_active.eq(false))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    if ban.is_active {
        publisher::publish_ban_lifted(&state.rabbitmq, ban_id, ban.user_id).await;
        tracing::info!(ban_id = %ban_id, user_id = %ban.user_id, lifted_by = %moderator.0.id, "ban lifted");
    }

    Ok(Json(ApiResponse::ok(updated)))
}

/// GET /moderation/bans - active bans with their real reasons (paginated)
pub async fn list_bans(
    _moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<ChatBan>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let offset = params.offset() as i64;
    let limit = params.limit() as i64;

    let items = chat_bans::table
        .filter(chat_bans::is_active.eq(true))
        .order(chat_bans::created_at.desc())
        .offset(offset)
        .limit(limit)
        .load::<ChatBan>(&mut conn)
        .map_err(AppError::Database)?;

    let total: i64 = chat_bans::table
        .filter(chat_bans::is_active.eq(true))
        .count()
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    let paginated = Paginated::new(items, total as u64, &params);
    Ok(Json(ApiResponse::ok(paginated)))
}

/// GET /moderation/users/:id/bans - full ban history for one user
pub async fn get_user_bans(
    _moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<ChatBan>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let bans = chat_bans::table
        .filter(chat_bans::user_id.eq(user_id))
        .order(chat_bans::created_at.desc())
        .load::<ChatBan>(&mut conn)
        .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(bans)))
}

/// GET /moderation/messages/:id - audit view with pre-redaction content
pub async fn get_message_audit(
    _moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<AuditedMessage>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let message: Message = messages::table
        .find(message_id)
        .first::<Message>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

    let original_content = message.original_content.clone();
    let deleted_reason = message.deleted_reason.clone();

    Ok(Json(ApiResponse::ok(AuditedMessage {
        message,
        original_content,
        deleted_reason,
    })))
}

// --- Unban request workflow ---

/// POST /unban-requests - a banned user asks for review
pub async fn request_unban(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestUnbanRequest>,
) -> AppResult<Json<ApiResponse<UnbanRequest>>> {
    if req.reason.trim().is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "a reason is required"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let now = Utc::now();
    let active_bans: i64 = chat_bans::table
        .filter(chat_bans::user_id.eq(auth_user.id))
        .filter(chat_bans::is_active.eq(true))
        .filter(chat_bans::expires_at.is_null().or(chat_bans::expires_at.gt(now)))
        .count()
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    if active_bans == 0 {
        return Err(AppError::new(ErrorCode::NotBanned, "you have no active ban to appeal"));
    }

    let new_request = NewUnbanRequest {
        user_id: auth_user.id,
        reason: req.reason,
    };

    let request: UnbanRequest = diesel::insert_into(unban_requests::table)
        .values(&new_request)
        .get_result(&mut conn)
        .map_err(|e| {
            if AppError::is_unique_violation(&e) {
                AppError::new(
                    ErrorCode::UnbanRequestPending,
                    "you already have a pending unban request",
                )
            } else {
                AppError::Database(e)
            }
        })?;

    Ok(Json(ApiResponse::ok(request)))
}

/// PUT /unban-requests/:id - moderator review; approval lifts the user's bans
pub async fn respond_to_unban_request(
    moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<ReviewUnbanRequest>,
) -> AppResult<Json<ApiResponse<UnbanRequest>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let request: UnbanRequest = unban_requests::table
        .find(request_id)
        .first::<UnbanRequest>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::UnbanRequestNotFound, "unban request not found"))?;

    if request.status != UnbanRequestStatus::Pending.as_str() {
        return Err(AppError::new(
            ErrorCode::UnbanRequestAlreadyReviewed,
            "this request has already been reviewed",
        ));
    }

    let new_status = match req.action {
        UnbanReviewAction::Approve => UnbanRequestStatus::Approved,
        UnbanReviewAction::Reject => UnbanRequestStatus::Rejected,
    };

    let updated: UnbanRequest = diesel::update(unban_requests::table.find(request_id))
        .set((
            unban_requests::status.eq(new_status.as_str()),
            unban_requests::reviewed_by.eq(moderator.0.id),
            unban_requests::reviewed_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    if matches!(req.action, UnbanReviewAction::Approve) {
        let lifted: Vec<ChatBan> = diesel::update(
            chat_bans::table
                .filter(chat_bans::user_id.eq(request.user_id))
                .filter(chat_bans::is_active.eq(true)),
        )
        .set(chat_bans::is_active.eq(false))
        .get_results(&mut conn)
        .map_err(AppError::Database)?;

        for ban in &lifted {
            publisher::publish_ban_lifted(&state.rabbitmq, ban.id, ban.user_id).await;
        }

        tracing::info!(
            request_id = %request_id,
            user_id = %request.user_id,
            lifted = lifted.len(),
            reviewed_by = %moderator.0.id,
            "unban request approved"
        );
    }

    Ok(Json(ApiResponse::ok(updated)))
}

// --- Banned word management ---

/// GET /moderation/banned-words - the current word list
pub async fn list_banned_words(
    _moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<BannedWord>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let words = banned_words::table
        .order(banned_words::word.asc())
        .load::<BannedWord>(&mut conn)
        .map_err(AppError::Database)?;

    Ok(Json(ApiResponse::ok(words)))
}

/// POST /moderation/banned-words - add a word (admin only)
pub async fn add_banned_word(
    admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddBannedWordRequest>,
) -> AppResult<Json<ApiResponse<BannedWord>>> {
    let word = req.word.trim().to_lowercase();
    if word.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "word must not be empty"));
    }
    if word.len() > 100 {
        return Err(AppError::new(ErrorCode::ValidationError, "word max 100 characters"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let banned: BannedWord = diesel::insert_into(banned_words::table)
        .values(&NewBannedWord {
            word,
            added_by: admin.0.id,
        })
        .get_result(&mut conn)
        .map_err(|e| {
            if AppError::is_unique_violation(&e) {
                AppError::new(ErrorCode::BannedWordExists, "word is already on the list")
            } else {
                AppError::Database(e)
            }
        })?;

    Ok(Json(ApiResponse::ok(banned)))
}

/// DELETE /moderation/banned-words/:id - remove a word (admin only)
pub async fn remove_banned_word(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(word_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<BannedWord>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let removed: BannedWord = diesel::delete(banned_words::table.find(word_id))
        .get_result(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::BannedWordNotFound, "word not found"))?;

    Ok(Json(ApiResponse::ok(removed)))
}
