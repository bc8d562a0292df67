use axum::extract::{Path, State};
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use dealspot_shared::errors::{AppError, AppResult, ErrorCode};
use dealspot_shared::types::api::ApiResponse;
use dealspot_shared::types::auth::AuthUser;

use crate::models::{Message, MessageReaction, NewMessageReaction};
use crate::schema::{channel_members, message_reactions, messages};
use crate::AppState;

// --- Aggregation ---

/// Per-emoji aggregate over the raw reaction tuples of one message.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ReactionAggregate {
    pub emoji: String,
    pub count: i64,
    pub user_reacted: bool,
}

/// Collapse reaction rows into per-emoji aggregates, preserving the order
/// in which each emoji first appeared.
pub fn aggregate(rows: &[MessageReaction], viewer: Uuid) -> Vec<ReactionAggregate> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<&str, (i64, bool)> = HashMap::new();

    for row in rows {
        let entry = counts.entry(row.emoji.as_str()).or_insert_with(|| {
            order.push(row.emoji.clone());
            (0, false)
        });
        entry.0 += 1;
        if row.user_id == viewer {
            entry.1 = true;
        }
    }

    order
        .into_iter()
        .map(|emoji| {
            let (count, user_reacted) = counts[emoji.as_str()];
            ReactionAggregate { emoji, count, user_reacted }
        })
        .collect()
}

/// Aggregates for a batch of messages, keyed by message id. Computed per
/// read so a caller that just mutated sees the new count immediately.
pub fn load_aggregates(
    conn: &mut diesel::pg::PgConnection,
    message_ids: &[Uuid],
    viewer: Uuid,
) -> AppResult<HashMap<Uuid, Vec<ReactionAggregate>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<MessageReaction> = message_reactions::table
        .filter(message_reactions::message_id.eq_any(message_ids))
        .order(message_reactions::created_at.asc())
        .load::<MessageReaction>(conn)
        .map_err(AppError::Database)?;

    let mut by_message: HashMap<Uuid, Vec<MessageReaction>> = HashMap::new();
    for row in rows {
        by_message.entry(row.message_id).or_default().push(row);
    }

    Ok(by_message
        .into_iter()
        .map(|(id, rows)| (id, aggregate(&rows, viewer)))
        .collect())
}

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize)]
pub struct AddReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct MessageReactionsResponse {
    pub message_id: Uuid,
    pub reactions: Vec<ReactionAggregate>,
}

// --- Helpers ---

fn load_message_for_member(
    conn: &mut diesel::pg::PgConnection,
    message_id: Uuid,
    user_id: Uuid,
) -> AppResult<Message> {
    let message: Message = messages::table
        .find(message_id)
        .first::<Message>(conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

    let is_member: i64 = channel_members::table
        .filter(channel_members::channel_id.eq(message.channel_id))
        .filter(channel_members::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .map_err(AppError::Database)?;

    if is_member == 0 {
        return Err(AppError::new(
            ErrorCode::NotChannelMember,
            "you are not a member of this channel",
        ));
    }

    Ok(message)
}

// --- Handlers ---

/// POST /messages/:id/reactions - add a reaction (idempotent upsert)
pub async fn add_reaction(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<AddReactionRequest>,
) -> AppResult<Json<ApiResponse<MessageReactionsResponse>>> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.chars().count() > 8 {
        return Err(AppError::new(ErrorCode::ValidationError, "invalid emoji"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let message = load_message_for_member(&mut conn, message_id, auth_user.id)?;

    // Unique (message, user, emoji); re-adding is a no-op, not an error
    diesel::insert_into(message_reactions::table)
        .values(&NewMessageReaction {
            message_id,
            user_id: auth_user.id,
            emoji: emoji.clone(),
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)
        .map_err(AppError::Database)?;

    let aggregates = load_aggregates(&mut conn, &[message_id], auth_user.id)?
        .remove(&message_id)
        .unwrap_or_default();

    // Best-effort fanout; reaction state is served authoritatively on read
    let member_ids: Vec<Uuid> = channel_members::table
        .filter(channel_members::channel_id.eq(message.channel_id))
        .select(channel_members::user_id)
        .load::<Uuid>(&mut conn)
        .unwrap_or_default();

    let payload = serde_json::json!({
        "message_id": message_id,
        "channel_id": message.channel_id,
        "user_id": auth_user.id,
        "emoji": emoji,
        "added": true,
    });
    for member_id in member_ids.iter().filter(|id| **id != auth_user.id) {
        let room = format!("user:{member_id}");
        let _ = state.io.to(room).emit("reaction-updated", &payload);
    }

    Ok(Json(ApiResponse::ok(MessageReactionsResponse {
        message_id,
        reactions: aggregates,
    })))
}

/// DELETE /messages/:id/reactions/:emoji - remove a reaction (no-op when absent)
pub async fn remove_reaction(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
) -> AppResult<Json<ApiResponse<MessageReactionsResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let message = load_message_for_member(&mut conn, message_id, auth_user.id)?;

    diesel::delete(
        message_reactions::table
            .filter(message_reactions::message_id.eq(message_id))
            .filter(message_reactions::user_id.eq(auth_user.id))
            .filter(message_reactions::emoji.eq(&emoji)),
    )
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    let aggregates = load_aggregates(&mut conn, &[message_id], auth_user.id)?
        .remove(&message_id)
        .unwrap_or_default();

    let member_ids: Vec<Uuid> = channel_members::table
        .filter(channel_members::channel_id.eq(message.channel_id))
        .select(channel_members::user_id)
        .load::<Uuid>(&mut conn)
        .unwrap_or_default();

    let payload = serde_json::json!({
        "message_id": message_id,
        "channel_id": message.channel_id,
        "user_id": auth_user.id,
        "emoji": emoji,
        "added": false,
    });
    for member_id in member_ids.iter().filter(|id| **id != auth_user.id) {
        let room = format!("user:{member_id}");
        let _ = state.io.to(room).emit("reaction-updated", &payload);
    }

    Ok(Json(ApiResponse::ok(MessageReactionsResponse {
        message_id,
        reactions: aggregates,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    fn reaction(message: Uuid, user: Uuid, emoji: &str) -> MessageReaction {
        MessageReaction {
            id: Uuid::new_v4(),
            message_id: message,
            user_id: user,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn aggregate_counts_per_emoji_and_flags_viewer() {
        let m = uuid(1);
        let viewer = uuid(2);
        let rows = vec![
            reaction(m, viewer, "🔥"),
            reaction(m, uuid(3), "🔥"),
            reaction(m, uuid(3), "👍"),
        ];

        let aggregates = aggregate(&rows, viewer);
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].emoji, "🔥");
        assert_eq!(aggregates[0].count, 2);
        assert!(aggregates[0].user_reacted);
        assert_eq!(aggregates[1].emoji, "👍");
        assert_eq!(aggregates[1].count, 1);
        assert!(!aggregates[1].user_reacted);
    }

    #[test]
    fn aggregate_of_no_rows_is_empty() {
        assert!(aggregate(&[], uuid(1)).is_empty());
    }

    #[test]
    fn duplicate_tuples_from_the_same_user_count_once_in_storage() {
        // The unique index makes a duplicate insert a no-op; aggregation
        // over the stored rows therefore stays flat on repeat adds.
        let m = uuid(1);
        let u = uuid(2);
        let stored = vec![reaction(m, u, "🎉")];
        let first = aggregate(&stored, u);
        let second = aggregate(&stored, u);
        assert_eq!(first, second);
        assert_eq!(first[0].count, 1);
    }
}
