use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;

use crate::events::publisher;
use crate::models::{
    private_pair_key, Channel, ChatRequest, ChatRequestStatus, NewChatRequest,
};
use crate::routes::{channels, moderation, preferences};
use crate::schema::{channels as channels_table, chat_requests};
use crate::services::enrichment::{self, SenderInfo};
use crate::AppState;

/// Pending requests expire after this long; expiry is applied lazily on
/// read, no background sweep required.
pub const REQUEST_TTL_DAYS: i64 = 7;

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
pub struct SendChatRequestRequest {
    pub recipient_id: Uuid,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRequestAction {
    Accept,
    Reject,
    Ignore,
}

#[derive(Debug, Deserialize)]
pub struct RespondChatRequestRequest {
    pub action: ChatRequestAction,
}

#[derive(Debug, Serialize)]
pub struct ChatRequestView {
    #[serde(flatten)]
    pub request: ChatRequest,
    pub requester: SenderInfo,
}

#[derive(Debug, Serialize)]
pub struct ChatRequestListResponse {
    pub incoming: Vec<ChatRequestView>,
    pub outgoing: Vec<ChatRequest>,
}

#[derive(Debug, Serialize)]
pub struct ChatRequestRespondResponse {
    pub request: ChatRequest,
    pub channel: Option<Channel>,
}

// --- Helpers ---

/// Mark overdue pending requests involving `user_id` as expired. Lazy
/// counterpart of a periodic sweep; both are allowed to run.
fn expire_overdue_requests(
    conn: &mut diesel::pg::PgConnection,
    user_id: Uuid,
) -> AppResult<()> {
    diesel::update(
        chat_requests::table
            .filter(
                chat_requests::requester_id
                    .eq(user_id)
                    .or(chat_requests::recipient_id.eq(user_id)),
            )
            .filter(chat_requests::status.eq(ChatRequestStatus::Pending.as_str()))
            .filter(chat_requests::expires_at.lt(Utc::now())),
    )
    .set(chat_requests::status.eq(ChatRequestStatus::Expired.as_str()))
    .execute(conn)
    .map_err(AppError::Database)?;

    Ok(())
}

// --- Handlers ---

/// POST /chat-requests - ask a user for a private conversation
pub async fn send_chat_request(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendChatRequestRequest>,
) -> AppResult<Json<ApiResponse<ChatRequest>>> {
    let recipient_id = req.recipient_id;
    if recipient_id == auth_user.id {
        return Err(AppError::new(
            ErrorCode::CannotMessageSelf,
            "you cannot send a chat request to yourself",
        ));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    if moderation::has_global_ban(&mut conn, auth_user.id)? {
        return Err(AppError::new(
            ErrorCode::SenderBanned,
            moderation::BANNED_SENDER_MESSAGE,
        ));
    }

    if preferences::is_blocked_between(&mut conn, auth_user.id, recipient_id)? {
        return Err(AppError::new(
            ErrorCode::UserBlocked,
            "you cannot message this user",
        ));
    }

    let recipient_prefs = preferences::load_or_default(&mut conn, recipient_id)?;
    if !recipient_prefs.allow_private_messages {
        return Err(AppError::new(
            ErrorCode::PrivateMessagesDisabled,
            "this user does not accept private messages",
        ));
    }

    // An existing channel makes the handshake pointless
    let pair = private_pair_key(auth_user.id, recipient_id);
    let channel_exists: i64 = channels_table::table
        .filter(channels_table::private_key.eq(&pair))
        .count()
        .get_result(&mut conn)
        .map_err(AppError::Database)?;
    if channel_exists > 0 {
        return Err(AppError::conflict("a conversation with this user already exists"));
    }

    // Requests whose TTL lapsed no longer block a fresh one
    expire_overdue_requests(&mut conn, auth_user.id)?;

    let new_request = NewChatRequest {
        requester_id: auth_user.id,
        recipient_id,
        message: req.message,
        status: ChatRequestStatus::Pending.as_str().to_string(),
        expires_at: Utc::now() + Duration::days(REQUEST_TTL_DAYS),
    };

    // The partial unique index on pending (requester, recipient) turns a
    // concurrent duplicate into a conflict instead of a second request
    let request: ChatRequest = diesel::insert_into(chat_requests::table)
        .values(&new_request)
        .get_result(&mut conn)
        .map_err(|e| {
            if AppError::is_unique_violation(&e) {
                AppError::new(
                    ErrorCode::ChatRequestPending,
                    "you already have a pending request to this user",
                )
            } else {
                AppError::Database(e)
            }
        })?;

    publisher::publish_chat_request_created(&state.rabbitmq, &request).await;

    let room = format!("user:{recipient_id}");
    let _ = state.io.to(room).emit(
        "chat-request",
        &serde_json::json!({
            "request_id": request.id,
            "requester_id": auth_user.id,
            "message": request.message,
        }),
    );

    Ok(Json(ApiResponse::ok(request)))
}

/// GET /chat-requests - the caller's pending requests, both directions
pub async fn list_chat_requests(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ChatRequestListResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    expire_overdue_requests(&mut conn, auth_user.id)?;

    let incoming_rows: Vec<ChatRequest> = chat_requests::table
        .filter(chat_requests::recipient_id.eq(auth_user.id))
        .filter(chat_requests::status.eq(ChatRequestStatus::Pending.as_str()))
        .order(chat_requests::created_at.desc())
        .load::<ChatRequest>(&mut conn)
        .map_err(AppError::Database)?;

    let outgoing: Vec<ChatRequest> = chat_requests::table
        .filter(chat_requests::requester_id.eq(auth_user.id))
        .filter(chat_requests::status.eq(ChatRequestStatus::Pending.as_str()))
        .order(chat_requests::created_at.desc())
        .load::<ChatRequest>(&mut conn)
        .map_err(AppError::Database)?;

    let requester_ids: Vec<Uuid> = incoming_rows.iter().map(|r| r.requester_id).collect();
    let profiles = enrichment::fetch_sender_profiles(&state, &requester_ids).await;

    let incoming = incoming_rows
        .into_iter()
        .map(|request| {
            let requester = profiles
                .get(&request.requester_id)
                .cloned()
                .unwrap_or_else(|| SenderInfo::sentinel(request.requester_id));
            ChatRequestView { request, requester }
        })
        .collect();

    Ok(Json(ApiResponse::ok(ChatRequestListResponse { incoming, outgoing })))
}

/// PUT /chat-requests/:id - recipient response. Accepting creates the
/// private channel through the same race-free path as direct opening.
pub async fn respond_to_chat_request(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<RespondChatRequestRequest>,
) -> AppResult<Json<ApiResponse<ChatRequestRespondResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let request: ChatRequest = chat_requests::table
        .find(request_id)
        .first::<ChatRequest>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ChatRequestNotFound, "chat request not found"))?;

    if request.recipient_id != auth_user.id {
        return Err(AppError::new(
            ErrorCode::Forbidden,
            "only the recipient can respond to a chat request",
        ));
    }

    if !request.is_pending() {
        return Err(AppError::new(
            ErrorCode::ChatRequestClosed,
            "this request has already been resolved",
        ));
    }

    let now = Utc::now();
    if request.effective_status(now) == ChatRequestStatus::Expired {
        diesel::update(chat_requests::table.find(request_id))
            .set(chat_requests::status.eq(ChatRequestStatus::Expired.as_str()))
            .execute(&mut conn)
            .map_err(AppError::Database)?;
        return Err(AppError::new(
            ErrorCode::ChatRequestClosed,
            "this request has expired",
        ));
    }

    let (new_status, channel) = match req.action {
        ChatRequestAction::Accept => {
            // The requester's ban state is re-checked at acceptance time; a
            // ban issued after the request was sent blocks the channel
            if moderation::has_global_ban(&mut conn, request.requester_id)? {
                return Err(AppError::new(
                    ErrorCode::SenderBanned,
                    "this user cannot start conversations right now",
                ));
            }

            let (channel, _created) = channels::get_or_create_private_channel(
                &mut conn,
                request.requester_id,
                request.recipient_id,
            )?;
            (ChatRequestStatus::Accepted, Some(channel))
        }
        ChatRequestAction::Reject => (ChatRequestStatus::Rejected, None),
        ChatRequestAction::Ignore => (ChatRequestStatus::Ignored, None),
    };

    let updated: ChatRequest = diesel::update(chat_requests::table.find(request_id))
        .set((
            chat_requests::status.eq(new_status.as_str()),
            chat_requests::responded_at.eq(now),
        ))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    publisher::publish_chat_request_responded(
        &state.rabbitmq,
        &updated,
        channel.as_ref().map(|c| c.id),
    )
    .await;

    if new_status == ChatRequestStatus::Accepted {
        let room = format!("user:{}", updated.requester_id);
        let _ = state.io.to(room).emit(
            "chat-request-accepted",
            &serde_json::json!({
                "request_id": updated.id,
                "channel_id": channel.as_ref().map(|c| c.id),
            }),
        );
    }

    tracing::info!(
        request_id = %request_id,
        status = %new_status.as_str(),
        "chat request resolved"
    );

    Ok(Json(ApiResponse::ok(ChatRequestRespondResponse {
        request: updated,
        channel,
    })))
}
