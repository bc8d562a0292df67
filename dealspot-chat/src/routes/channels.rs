use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;

use crate::models::{
    private_pair_key, Channel, ChannelMember, ChannelType, Message, NewChannel, NewChannelMember,
    REDACTED_CONTENT,
};
use crate::routes::{moderation, preferences};
use crate::schema::{channel_members, channels, messages};
use crate::services::enrichment;
use crate::AppState;

// --- Response DTOs ---

#[derive(Debug, Serialize)]
pub struct ChannelPreview {
    pub id: Uuid,
    pub channel_type: String,
    pub name: Option<String>,
    pub is_global: bool,
    pub member_count: i64,
    pub partner_id: Option<Uuid>,
    pub partner_username: Option<String>,
    pub partner_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
}

#[derive(Debug, Serialize)]
pub struct ChannelDetail {
    #[serde(flatten)]
    pub channel: Channel,
    pub member_count: i64,
    pub members: Vec<EnrichedMember>,
}

#[derive(Debug, Serialize, Clone)]
pub struct EnrichedMember {
    pub user_id: Uuid,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PrivateChannelResponse {
    #[serde(flatten)]
    pub channel: Channel,
    pub created: bool,
}

// --- Request DTOs ---

#[derive(Debug, Deserialize)]
pub struct OpenPrivateChannelRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

// --- Shared helpers ---

/// Look up or create the private channel for an unordered user pair.
/// Storage-level uniqueness on the normalized pair key makes this race-free:
/// a concurrent loser's insert hits the conflict and falls back to a lookup.
/// Preference/handshake gating happens in the callers, not here.
pub fn get_or_create_private_channel(
    conn: &mut diesel::pg::PgConnection,
    user_a: Uuid,
    user_b: Uuid,
) -> AppResult<(Channel, bool)> {
    let key = private_pair_key(user_a, user_b);

    if let Some(existing) = channels::table
        .filter(channels::private_key.eq(&key))
        .first::<Channel>(conn)
        .optional()
        .map_err(AppError::Database)?
    {
        return Ok((existing, false));
    }

    let new_channel = NewChannel {
        channel_type: ChannelType::Private.as_str().to_string(),
        name: None,
        is_global: false,
        private_key: Some(key.clone()),
        created_by: Some(user_a),
    };

    let inserted: Option<Channel> = diesel::insert_into(channels::table)
        .values(&new_channel)
        .on_conflict(channels::private_key)
        .do_nothing()
        .get_result(conn)
        .optional()
        .map_err(AppError::Database)?;

    match inserted {
        Some(channel) => {
            let members = vec![
                NewChannelMember { channel_id: channel.id, user_id: user_a },
                NewChannelMember { channel_id: channel.id, user_id: user_b },
            ];
            diesel::insert_into(channel_members::table)
                .values(&members)
                .on_conflict_do_nothing()
                .execute(conn)
                .map_err(AppError::Database)?;

            tracing::info!(channel_id = %channel.id, "private channel created");
            Ok((channel, true))
        }
        None => {
            // Lost the race; the winner's row is the channel for this pair
            let channel = channels::table
                .filter(channels::private_key.eq(&key))
                .first::<Channel>(conn)
                .map_err(AppError::Database)?;
            Ok((channel, false))
        }
    }
}

fn member_count(conn: &mut diesel::pg::PgConnection, channel_id: Uuid) -> AppResult<i64> {
    channel_members::table
        .filter(channel_members::channel_id.eq(channel_id))
        .select(count_star())
        .first::<i64>(conn)
        .map_err(AppError::Database)
}

fn last_message_preview(message: &Message) -> String {
    if message.is_deleted {
        REDACTED_CONTENT.to_string()
    } else if message.content.is_empty() {
        format!("[{}]", message.message_type)
    } else {
        message.content.chars().take(100).collect()
    }
}

// --- Handlers ---

/// GET /channels - the caller's channels with last message and unread count
pub async fn list_channels(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ChannelPreview>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let user_id = auth_user.id;

    let memberships: Vec<(Uuid, i32)> = channel_members::table
        .filter(channel_members::user_id.eq(user_id))
        .select((channel_members::channel_id, channel_members::unread_count))
        .load::<(Uuid, i32)>(&mut conn)
        .map_err(AppError::Database)?;

    if memberships.is_empty() {
        return Ok(Json(ApiResponse::ok(vec![])));
    }

    let channel_ids: Vec<Uuid> = memberships.iter().map(|(id, _)| *id).collect();

    let chans: Vec<Channel> = channels::table
        .filter(channels::id.eq_any(&channel_ids))
        .filter(channels::is_active.eq(true))
        .load::<Channel>(&mut conn)
        .map_err(AppError::Database)?;

    let mut previews = Vec::with_capacity(chans.len());
    for chan in chans {
        let unread = memberships
            .iter()
            .find(|(cid, _)| *cid == chan.id)
            .map(|(_, u)| *u)
            .unwrap_or(0);

        let last_msg: Option<Message> = messages::table
            .filter(messages::channel_id.eq(chan.id))
            .order(messages::created_at.desc())
            .first::<Message>(&mut conn)
            .optional()
            .map_err(AppError::Database)?;

        let count = member_count(&mut conn, chan.id)?;

        // For private channels, surface the other member
        let partner_id = if chan.channel_type == ChannelType::Private.as_str() {
            channel_members::table
                .filter(channel_members::channel_id.eq(chan.id))
                .filter(channel_members::user_id.ne(user_id))
                .select(channel_members::user_id)
                .first::<Uuid>(&mut conn)
                .optional()
                .map_err(AppError::Database)?
        } else {
            None
        };

        previews.push(ChannelPreview {
            id: chan.id,
            channel_type: chan.channel_type,
            name: chan.name,
            is_global: chan.is_global,
            member_count: count,
            partner_id,
            partner_username: None,
            partner_avatar: None,
            created_at: chan.created_at,
            last_message: last_msg.as_ref().map(last_message_preview),
            last_message_at: chan.last_message_at,
            unread_count: unread,
        });
    }

    // Enrich private previews with partner profiles; failures leave the
    // placeholder fields empty rather than failing the listing
    let partner_ids: Vec<Uuid> = previews.iter().filter_map(|p| p.partner_id).collect();
    if !partner_ids.is_empty() {
        let profiles = enrichment::fetch_sender_profiles(&state, &partner_ids).await;
        for preview in &mut previews {
            if let Some(pid) = preview.partner_id {
                if let Some(profile) = profiles.get(&pid) {
                    preview.partner_username = Some(profile.username.clone());
                    preview.partner_avatar = profile.avatar_url.clone();
                }
            }
        }
    }

    // Most recently active first, new channels by creation time
    previews.sort_by(|a, b| {
        let a_time = a.last_message_at.unwrap_or(a.created_at);
        let b_time = b.last_message_at.unwrap_or(b.created_at);
        b_time.cmp(&a_time)
    });

    Ok(Json(ApiResponse::ok(previews)))
}

/// GET /channels/global - the single provisioned global channel
pub async fn get_global_channel(
    _auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ChannelDetail>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let channel: Channel = channels::table
        .filter(channels::is_global.eq(true))
        .filter(channels::is_active.eq(true))
        .first::<Channel>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| {
            AppError::new(
                ErrorCode::GlobalChannelMissing,
                "global channel is not provisioned",
            )
        })?;

    let count = member_count(&mut conn, channel.id)?;

    Ok(Json(ApiResponse::ok(ChannelDetail {
        channel,
        member_count: count,
        members: vec![],
    })))
}

/// POST /channels/private - look up or open the private channel with a user.
/// When none exists yet, the recipient's preferences decide between
/// immediate creation and the chat-request handshake.
pub async fn open_private_channel(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenPrivateChannelRequest>,
) -> AppResult<Json<ApiResponse<PrivateChannelResponse>>> {
    let partner_id = req.user_id;
    if partner_id == auth_user.id {
        return Err(AppError::new(
            ErrorCode::CannotMessageSelf,
            "you cannot open a conversation with yourself",
        ));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    // Existing channels short-circuit the gating below
    let key = private_pair_key(auth_user.id, partner_id);
    if let Some(existing) = channels::table
        .filter(channels::private_key.eq(&key))
        .first::<Channel>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
    {
        return Ok(Json(ApiResponse::ok(PrivateChannelResponse {
            channel: existing,
            created: false,
        })));
    }

    if moderation::has_global_ban(&mut conn, auth_user.id)? {
        return Err(AppError::new(
            ErrorCode::SenderBanned,
            moderation::BANNED_SENDER_MESSAGE,
        ));
    }

    if preferences::is_blocked_between(&mut conn, auth_user.id, partner_id)? {
        return Err(AppError::new(
            ErrorCode::UserBlocked,
            "you cannot message this user",
        ));
    }

    let partner_prefs = preferences::load_or_default(&mut conn, partner_id)?;
    if !partner_prefs.allow_private_messages {
        return Err(AppError::new(
            ErrorCode::PrivateMessagesDisabled,
            "this user does not accept private messages",
        ));
    }

    if partner_prefs.require_request_for_private {
        let auto_accepted = partner_prefs.auto_accept_requests_from_followers
            && enrichment::fetch_follower_ids(&state, partner_id)
                .await
                .contains(&auth_user.id);

        if !auto_accepted {
            return Err(AppError::new(
                ErrorCode::ChatRequestRequired,
                "this user accepts new conversations by chat request only",
            ));
        }
    }

    let (channel, created) = get_or_create_private_channel(&mut conn, auth_user.id, partner_id)?;

    if created {
        let room = format!("user:{partner_id}");
        let _ = state.io.to(room).emit(
            "channel-opened",
            &serde_json::json!({ "channel_id": channel.id, "partner_id": auth_user.id }),
        );
    }

    Ok(Json(ApiResponse::ok(PrivateChannelResponse { channel, created })))
}

/// POST /channels/group - create a group channel
pub async fn create_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> AppResult<Json<ApiResponse<ChannelDetail>>> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::new(ErrorCode::GroupNameRequired, "group name is required"));
    }
    if name.chars().count() > 100 {
        return Err(AppError::new(ErrorCode::ValidationError, "group name max 100 characters"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let new_channel = NewChannel {
        channel_type: ChannelType::Group.as_str().to_string(),
        name: Some(name),
        is_global: false,
        private_key: None,
        created_by: Some(auth_user.id),
    };

    let channel: Channel = diesel::insert_into(channels::table)
        .values(&new_channel)
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    // Creator plus requested members, deduplicated
    let mut all_member_ids: Vec<Uuid> = vec![auth_user.id];
    for mid in &req.member_ids {
        if !all_member_ids.contains(mid) {
            all_member_ids.push(*mid);
        }
    }

    let new_members: Vec<NewChannelMember> = all_member_ids
        .iter()
        .map(|uid| NewChannelMember {
            channel_id: channel.id,
            user_id: *uid,
        })
        .collect();

    diesel::insert_into(channel_members::table)
        .values(&new_members)
        .execute(&mut conn)
        .map_err(AppError::Database)?;

    let raw_members: Vec<ChannelMember> = channel_members::table
        .filter(channel_members::channel_id.eq(channel.id))
        .load::<ChannelMember>(&mut conn)
        .map_err(AppError::Database)?;

    let members = enrich_members(&state, &raw_members).await;

    for mid in all_member_ids.iter().filter(|id| **id != auth_user.id) {
        let room = format!("user:{mid}");
        let _ = state.io.to(room).emit(
            "channel-joined",
            &serde_json::json!({ "channel_id": channel.id }),
        );
    }

    let count = raw_members.len() as i64;
    Ok(Json(ApiResponse::ok(ChannelDetail {
        channel,
        member_count: count,
        members,
    })))
}

/// GET /channels/:id - channel details with enriched member list
pub async fn get_channel(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ChannelDetail>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let channel: Channel = channels::table
        .find(channel_id)
        .first::<Channel>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ChannelNotFound, "channel not found"))?;

    verify_membership(&mut conn, channel_id, auth_user.id)?;

    let raw_members: Vec<ChannelMember> = channel_members::table
        .filter(channel_members::channel_id.eq(channel_id))
        .load::<ChannelMember>(&mut conn)
        .map_err(AppError::Database)?;

    let members = enrich_members(&state, &raw_members).await;

    let count = raw_members.len() as i64;
    Ok(Json(ApiResponse::ok(ChannelDetail {
        channel,
        member_count: count,
        members,
    })))
}

/// POST /channels/:id/members - add a member to a group channel
pub async fn add_member(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<Json<ApiResponse<ChannelMember>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let channel: Channel = channels::table
        .find(channel_id)
        .first::<Channel>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ChannelNotFound, "channel not found"))?;

    if channel.channel_type != ChannelType::Group.as_str() {
        return Err(AppError::new(
            ErrorCode::NotGroupChannel,
            "members can only be added to group channels",
        ));
    }

    verify_membership(&mut conn, channel_id, auth_user.id)?;

    let new_member = NewChannelMember {
        channel_id,
        user_id: req.user_id,
    };

    let member: Option<ChannelMember> = diesel::insert_into(channel_members::table)
        .values(&new_member)
        .on_conflict_do_nothing()
        .get_result(&mut conn)
        .optional()
        .map_err(AppError::Database)?;

    let member = member.ok_or_else(|| {
        AppError::new(
            ErrorCode::AlreadyChannelMember,
            "user is already a member of this channel",
        )
    })?;

    let room = format!("user:{}", req.user_id);
    let _ = state.io.to(room).emit(
        "channel-joined",
        &serde_json::json!({ "channel_id": channel_id }),
    );

    Ok(Json(ApiResponse::ok(member)))
}

/// DELETE /channels/:id/members/me - leave a group or private channel
pub async fn leave_channel(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let channel: Channel = channels::table
        .find(channel_id)
        .first::<Channel>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ChannelNotFound, "channel not found"))?;

    if channel.is_global {
        return Err(AppError::new(
            ErrorCode::BadRequest,
            "you cannot leave the global channel",
        ));
    }

    let deleted = diesel::delete(
        channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .filter(channel_members::user_id.eq(auth_user.id)),
    )
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    if deleted == 0 {
        return Err(AppError::new(
            ErrorCode::NotChannelMember,
            "you are not a member of this channel",
        ));
    }

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "channel_id": channel_id,
        "left": true
    }))))
}

/// POST /channels/:id/read - reset the caller's unread counter
pub async fn mark_as_read(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let updated_rows = diesel::update(
        channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .filter(channel_members::user_id.eq(auth_user.id)),
    )
    .set(channel_members::unread_count.eq(0))
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    if updated_rows == 0 {
        return Err(AppError::new(
            ErrorCode::NotChannelMember,
            "you are not a member of this channel",
        ));
    }

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "channel_id": channel_id,
        "read_at": Utc::now()
    }))))
}

// --- Internal helpers ---

/// Verify the user is a member of the given channel. Returns an error if not.
pub fn verify_membership(
    conn: &mut diesel::pg::PgConnection,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    let is_member: bool = channel_members::table
        .filter(channel_members::channel_id.eq(channel_id))
        .filter(channel_members::user_id.eq(user_id))
        .select(count_star())
        .first::<i64>(conn)
        .map(|c| c > 0)
        .map_err(AppError::Database)?;

    if !is_member {
        return Err(AppError::new(
            ErrorCode::NotChannelMember,
            "you are not a member of this channel",
        ));
    }

    Ok(())
}

/// Resolve member profiles from the identity service; lookup failures leave
/// names empty rather than failing the request.
async fn enrich_members(state: &Arc<AppState>, raw_members: &[ChannelMember]) -> Vec<EnrichedMember> {
    let user_ids: Vec<Uuid> = raw_members.iter().map(|m| m.user_id).collect();
    let profiles = enrichment::fetch_sender_profiles(state, &user_ids).await;

    raw_members
        .iter()
        .map(|m| {
            let profile = profiles.get(&m.user_id);
            EnrichedMember {
                user_id: m.user_id,
                username: profile.map(|p| p.username.clone()),
                avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                joined_at: m.joined_at,
            }
        })
        .collect()
}
