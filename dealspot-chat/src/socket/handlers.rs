use std::sync::Arc;

use diesel::prelude::*;
use serde::Serialize;
use socketioxide::extract::{Data, SocketRef};
use uuid::Uuid;

use crate::routes::presence;
use crate::schema::channel_members;
use crate::AppState;

/// Presence keys live this long between heartbeats.
const PRESENCE_TTL_SECS: u64 = 120;

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

fn get_user_id(socket: &SocketRef) -> Option<Uuid> {
    socket.extensions.get::<Uuid>()
}

pub async fn on_connect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let user_id = match authenticate_socket(&socket, &state) {
        Ok(id) => id,
        Err(msg) => {
            tracing::warn!(error = %msg, "chat socket auth failed");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "AUTH_FAILED".into(),
                    message: msg,
                },
            );
            socket.disconnect().ok();
            return;
        }
    };

    socket.extensions.insert(user_id);

    // Per-user room for direct pushes from the REST handlers
    let user_room = format!("user:{user_id}");
    socket.join(user_room).ok();

    // Channel rooms for typing broadcasts; channels joined later are picked
    // up via the join-channel event
    let channel_ids = member_channel_ids(&state, user_id);
    for channel_id in &channel_ids {
        socket.join(format!("channel:{channel_id}")).ok();
    }

    tracing::info!(user_id = %user_id, sid = %socket.id, channels = channel_ids.len(), "chat socket connected");

    let _ = state
        .redis
        .set(&format!("online:{user_id}"), "1", PRESENCE_TTL_SECS)
        .await;

    let _ = socket.emit("connected", &serde_json::json!({ "user_id": user_id }));

    // Typing signals; ephemeral, never persisted
    socket.on("typing-start", {
        let state = state.clone();
        move |socket: SocketRef, Data::<serde_json::Value>(payload)| {
            let state = state.clone();
            async move { on_typing(socket, payload, &state, true).await; }
        }
    });

    socket.on("typing-stop", {
        let state = state.clone();
        move |socket: SocketRef, Data::<serde_json::Value>(payload)| {
            let state = state.clone();
            async move { on_typing(socket, payload, &state, false).await; }
        }
    });

    // Join a channel room after being added to a channel mid-session
    socket.on("join-channel", {
        let state = state.clone();
        move |socket: SocketRef, Data::<serde_json::Value>(payload)| {
            let state = state.clone();
            async move { on_join_channel(socket, payload, &state).await; }
        }
    });

    // Heartbeat handler - refresh presence TTL
    socket.on("heartbeat", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                if let Some(user_id) = get_user_id(&socket) {
                    let _ = state
                        .redis
                        .set(&format!("online:{user_id}"), "1", PRESENCE_TTL_SECS)
                        .await;
                }
            }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                on_disconnect_with_state(socket, state).await;
            }
        }
    });
}

async fn on_disconnect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let user_id = match get_user_id(&socket) {
        Some(id) => id,
        None => return,
    };

    tracing::info!(user_id = %user_id, sid = %socket.id, "chat socket disconnected");

    let _ = state.redis.del(&format!("online:{user_id}")).await;
}

async fn on_typing(socket: SocketRef, payload: serde_json::Value, state: &Arc<AppState>, typing: bool) {
    let user_id = match get_user_id(&socket) {
        Some(id) => id,
        None => return,
    };

    let channel_id = match payload
        .get("channel_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        Some(id) => id,
        None => {
            tracing::warn!("typing event missing channel_id");
            return;
        }
    };

    presence::set_typing(state, channel_id, user_id, typing).await;
}

async fn on_join_channel(socket: SocketRef, payload: serde_json::Value, state: &Arc<AppState>) {
    let user_id = match get_user_id(&socket) {
        Some(id) => id,
        None => return,
    };

    let channel_id = match payload
        .get("channel_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        Some(id) => id,
        None => return,
    };

    // Only members get the channel room
    let is_member = member_channel_ids(state, user_id).contains(&channel_id);
    if is_member {
        socket.join(format!("channel:{channel_id}")).ok();
        tracing::debug!(user_id = %user_id, channel_id = %channel_id, "socket joined channel room");
    }
}

fn member_channel_ids(state: &Arc<AppState>, user_id: Uuid) -> Vec<Uuid> {
    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to get db connection for socket membership load");
            return vec![];
        }
    };

    channel_members::table
        .filter(channel_members::user_id.eq(user_id))
        .select(channel_members::channel_id)
        .load::<Uuid>(&mut conn)
        .unwrap_or_default()
}

fn authenticate_socket(socket: &SocketRef, state: &Arc<AppState>) -> Result<Uuid, String> {
    let connect_info = socket.req_parts();

    // Extract token from query string ?token=xxx
    let query = connect_info.uri.query().unwrap_or_default();
    let token = query
        .split('&')
        .find_map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next()?;
            let value = split.next()?;
            if key == "token" {
                Some(value.to_string())
            } else {
                None
            }
        })
        .ok_or_else(|| "missing token query parameter".to_string())?;

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = jsonwebtoken::decode::<dealspot_shared::types::auth::Claims>(
        &token,
        &jsonwebtoken::DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| format!("invalid token: {e}"))?;

    if token_data.claims.is_expired() {
        return Err("token has expired".into());
    }

    Ok(token_data.claims.sub)
}
