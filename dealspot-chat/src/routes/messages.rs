use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::middleware::ModeratorUser;
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;
use dealspot_shared::types::pagination::{Paginated, PaginationParams};

use crate::events::publisher;
use crate::models::{Channel, Message, MessageType, NewMessage, REDACTED_CONTENT};
use crate::routes::channels::verify_membership;
use crate::routes::moderation;
use crate::routes::reactions::{self, ReactionAggregate};
use crate::schema::{banned_words, channel_members, channels, messages};
use crate::services::content_rules::ContentRules;
use crate::services::enrichment::{self, SenderInfo};
use crate::AppState;

/// Each channel serves at most this many messages as live history; older
/// rows are pruned. Independent of the soft-delete audit flow.
pub const CHANNEL_RETENTION_LIMIT: i64 = 100;

// --- Request DTOs ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub message_type: Option<MessageType>,
    pub reply_to_id: Option<Uuid>,
    pub mentioned_users: Option<Vec<Uuid>>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    pub reason: Option<String>,
}

// --- Response DTOs ---

#[derive(Debug, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: SenderInfo,
    pub reactions: Vec<ReactionAggregate>,
}

// --- Helpers ---

fn load_channel(
    conn: &mut diesel::pg::PgConnection,
    channel_id: Uuid,
) -> AppResult<Channel> {
    channels::table
        .find(channel_id)
        .filter(channels::is_active.eq(true))
        .first::<Channel>(conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ChannelNotFound, "channel not found"))
}

fn validate_content(
    conn: &mut diesel::pg::PgConnection,
    state: &AppState,
    content: &str,
) -> AppResult<()> {
    let words: Vec<String> = banned_words::table
        .select(banned_words::word)
        .load::<String>(conn)
        .map_err(AppError::Database)?;

    let rules = ContentRules::new(words, state.config.allowed_link_domain.clone());
    rules
        .validate(content)
        .map_err(|violation| AppError::new(ErrorCode::ContentRejected, violation.to_string()))
}

/// Trim a channel's history down to the retention bound. Idempotent: once
/// the bound holds this deletes nothing.
pub fn prune_channel_history(
    conn: &mut diesel::pg::PgConnection,
    channel_id: Uuid,
) -> AppResult<usize> {
    let stale_ids: Vec<Uuid> = messages::table
        .filter(messages::channel_id.eq(channel_id))
        .order(messages::created_at.desc())
        .offset(CHANNEL_RETENTION_LIMIT)
        .select(messages::id)
        .load::<Uuid>(conn)
        .map_err(AppError::Database)?;

    if stale_ids.is_empty() {
        return Ok(0);
    }

    let removed = diesel::delete(messages::table.filter(messages::id.eq_any(&stale_ids)))
        .execute(conn)
        .map_err(AppError::Database)?;

    tracing::debug!(channel_id = %channel_id, removed, "channel history pruned");
    Ok(removed)
}

fn channel_member_ids(
    conn: &mut diesel::pg::PgConnection,
    channel_id: Uuid,
) -> Vec<Uuid> {
    channel_members::table
        .filter(channel_members::channel_id.eq(channel_id))
        .select(channel_members::user_id)
        .load::<Uuid>(conn)
        .unwrap_or_default()
}

fn emit_to_members(
    state: &AppState,
    member_ids: &[Uuid],
    skip: Uuid,
    event: &'static str,
    payload: &serde_json::Value,
) {
    for member_id in member_ids.iter().filter(|id| **id != skip) {
        let room = format!("user:{member_id}");
        let _ = state.io.to(room).emit(event, payload);
    }
}

// --- Handlers ---

/// GET /channels/:id/messages - paginated history, newest first. Deleted
/// messages stay in the page with redacted content so reply chains resolve.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<MessageView>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    verify_membership(&mut conn, channel_id, auth_user.id)?;

    let total: i64 = messages::table
        .filter(messages::channel_id.eq(channel_id))
        .select(count_star())
        .first::<i64>(&mut conn)
        .map_err(AppError::Database)?;

    let items: Vec<Message> = messages::table
        .filter(messages::channel_id.eq(channel_id))
        .order(messages::created_at.desc())
        .offset(params.offset() as i64)
        .limit(params.limit() as i64)
        .load::<Message>(&mut conn)
        .map_err(AppError::Database)?;

    let message_ids: Vec<Uuid> = items.iter().map(|m| m.id).collect();
    let mut aggregates = reactions::load_aggregates(&mut conn, &message_ids, auth_user.id)?;

    let mut sender_ids: Vec<Uuid> = items.iter().map(|m| m.sender_id).collect();
    sender_ids.sort();
    sender_ids.dedup();
    let profiles = enrichment::fetch_sender_profiles(&state, &sender_ids).await;

    let views: Vec<MessageView> = items
        .into_iter()
        .map(|message| {
            let sender = profiles
                .get(&message.sender_id)
                .cloned()
                .unwrap_or_else(|| SenderInfo::sentinel(message.sender_id));
            let reactions = aggregates.remove(&message.id).unwrap_or_default();
            MessageView { message, sender, reactions }
        })
        .collect();

    let paginated = Paginated::new(views, total as u64, &params);
    Ok(Json(ApiResponse::ok(paginated)))
}

/// POST /channels/:id/messages - send a message.
///
/// The pipeline order is ban check, content validation, membership check,
/// append; a ban issued mid-session rejects the very next send.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let message_type = req.message_type.unwrap_or(MessageType::Text);
    let content = req.content.unwrap_or_default().trim().to_string();

    message_type
        .validate_metadata(req.metadata.as_ref())
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e))?;

    if content.is_empty() && !message_type.allows_empty_content() {
        return Err(AppError::new(ErrorCode::ValidationError, "message content is required"));
    }

    // Flood guard; Redis being down degrades to allowing the send
    let rate_key = format!("rate:send:{}", auth_user.id);
    let allowed = state
        .redis
        .rate_limit_check(&rate_key, state.config.send_rate_limit, state.config.send_rate_window_secs)
        .await
        .unwrap_or(true);
    if !allowed {
        return Err(AppError::new(
            ErrorCode::RateLimited,
            "you are sending messages too quickly",
        ));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    load_channel(&mut conn, channel_id)?;

    if let Some(ban) = moderation::active_ban_covering(&mut conn, auth_user.id, channel_id)? {
        // The sender only gets the generic refusal; the reason stays on the
        // moderator side
        tracing::info!(ban_id = %ban.id, user_id = %auth_user.id, channel_id = %channel_id, "send rejected by active ban");
        return Err(AppError::new(
            ErrorCode::SenderBanned,
            moderation::BANNED_SENDER_MESSAGE,
        ));
    }

    validate_content(&mut conn, &state, &content)?;

    verify_membership(&mut conn, channel_id, auth_user.id)?;

    if let Some(reply_id) = req.reply_to_id {
        let reply_channel: Option<Uuid> = messages::table
            .find(reply_id)
            .select(messages::channel_id)
            .first::<Uuid>(&mut conn)
            .optional()
            .map_err(AppError::Database)?;

        match reply_channel {
            None => {
                return Err(AppError::new(ErrorCode::MessageNotFound, "reply target not found"))
            }
            Some(cid) if cid != channel_id => {
                return Err(AppError::new(
                    ErrorCode::ReplyOutsideChannel,
                    "replies must reference a message in the same channel",
                ))
            }
            Some(_) => {}
        }
    }

    let new_message = NewMessage {
        channel_id,
        sender_id: auth_user.id,
        content,
        message_type: message_type.as_str().to_string(),
        reply_to_id: req.reply_to_id,
        mentioned_users: req.mentioned_users.unwrap_or_default(),
        metadata: req.metadata,
    };

    let message: Message = diesel::insert_into(messages::table)
        .values(&new_message)
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    diesel::update(channels::table.find(channel_id))
        .set(channels::last_message_at.eq(message.created_at))
        .execute(&mut conn)
        .map_err(AppError::Database)?;

    diesel::update(
        channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .filter(channel_members::user_id.ne(auth_user.id)),
    )
    .set(channel_members::unread_count.eq(channel_members::unread_count + 1))
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    // Keep only the newest rows in live history; failures here must not
    // undo a durable append
    if let Err(e) = prune_channel_history(&mut conn, channel_id) {
        tracing::warn!(error = %e, channel_id = %channel_id, "history pruning failed");
    }

    let content_preview: String = message.content.chars().take(100).collect();
    publisher::publish_message_sent(&state.rabbitmq, &message, &content_preview).await;

    // Enrichment is best-effort: the send already succeeded
    let sender = enrichment::fetch_sender(&state, auth_user.id).await;

    let member_ids = channel_member_ids(&mut conn, channel_id);
    let socket_payload = serde_json::json!({
        "channel_id": channel_id,
        "message": {
            "id": message.id,
            "channel_id": message.channel_id,
            "sender_id": message.sender_id,
            "content": message.content,
            "message_type": message.message_type,
            "reply_to_id": message.reply_to_id,
            "mentioned_users": message.mentioned_users,
            "metadata": message.metadata,
            "created_at": message.created_at,
        },
        "sender": {
            "username": sender.username,
            "avatar_url": sender.avatar_url,
        },
    });
    emit_to_members(&state, &member_ids, auth_user.id, "new-message", &socket_payload);

    tracing::info!(
        message_id = %message.id,
        sender = %auth_user.id,
        channel = %channel_id,
        message_type = %message.message_type,
        "message sent"
    );

    Ok(Json(ApiResponse::ok(MessageView {
        message,
        sender,
        reactions: vec![],
    })))
}

/// PUT /messages/:id - edit a message (sender only; content is re-validated)
pub async fn edit_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "message content is required"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let message: Message = messages::table
        .find(message_id)
        .first::<Message>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

    if message.sender_id != auth_user.id {
        return Err(AppError::new(
            ErrorCode::NotMessageSender,
            "you can only edit your own messages",
        ));
    }

    if message.is_deleted {
        return Err(AppError::new(ErrorCode::BadRequest, "cannot edit a deleted message"));
    }

    validate_content(&mut conn, &state, &content)?;

    let updated: Message = diesel::update(messages::table.find(message_id))
        .set((
            messages::content.eq(&content),
            messages::edited_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    let member_ids = channel_member_ids(&mut conn, updated.channel_id);
    let payload = serde_json::json!({
        "channel_id": updated.channel_id,
        "message_id": updated.id,
        "content": updated.content,
        "edited_at": updated.edited_at,
    });
    emit_to_members(&state, &member_ids, auth_user.id, "message-edited", &payload);

    let aggregates = reactions::load_aggregates(&mut conn, &[message_id], auth_user.id)?
        .remove(&message_id)
        .unwrap_or_default();
    let sender = enrichment::fetch_sender(&state, auth_user.id).await;

    Ok(Json(ApiResponse::ok(MessageView {
        message: updated,
        sender,
        reactions: aggregates,
    })))
}

/// DELETE /messages/:id - moderator soft delete. Content is redacted in
/// place; the original moves to the audit column.
pub async fn delete_message(
    moderator: ModeratorUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    body: Option<Json<DeleteMessageRequest>>,
) -> AppResult<Json<ApiResponse<Message>>> {
    let reason = body.and_then(|Json(req)| req.reason);
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let message: Message = messages::table
        .find(message_id)
        .first::<Message>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

    if message.is_deleted {
        // Deleting twice is a no-op
        return Ok(Json(ApiResponse::ok(message)));
    }

    let updated: Message = diesel::update(messages::table.find(message_id))
        .set((
            messages::is_deleted.eq(true),
            messages::deleted_reason.eq(reason.as_deref()),
            messages::original_content.eq(&message.content),
            messages::content.eq(REDACTED_CONTENT),
            messages::metadata.eq(None::<serde_json::Value>),
        ))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    let member_ids = channel_member_ids(&mut conn, updated.channel_id);
    let payload = serde_json::json!({
        "channel_id": updated.channel_id,
        "message_id": updated.id,
    });
    emit_to_members(&state, &member_ids, moderator.0.id, "message-deleted", &payload);

    tracing::info!(
        message_id = %message_id,
        deleted_by = %moderator.0.id,
        reason = ?reason,
        "message deleted"
    );

    Ok(Json(ApiResponse::ok(updated)))
}
