//! Sender-profile enrichment from the identity service. Lookups are
//! best-effort: a failure degrades to a sentinel sender, it never fails the
//! message path.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dealspot_shared::types::auth::UserRole;

use crate::AppState;

#[derive(Debug, Serialize, Clone)]
pub struct SenderInfo {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: UserRole,
}

impl SenderInfo {
    /// Placeholder used when the identity service cannot be reached.
    pub fn sentinel(id: Uuid) -> Self {
        Self {
            id,
            username: "unknown".to_string(),
            avatar_url: None,
            role: UserRole::User,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileEntry {
    user_id: Uuid,
    username: String,
    avatar_url: Option<String>,
    role: Option<String>,
}

/// Batch-resolve sender profiles. Missing or unreachable entries are simply
/// absent from the map; callers substitute `SenderInfo::sentinel`.
pub async fn fetch_sender_profiles(
    state: &Arc<AppState>,
    user_ids: &[Uuid],
) -> HashMap<Uuid, SenderInfo> {
    if user_ids.is_empty() {
        return HashMap::new();
    }

    let url = format!("{}/internal/profiles/batch", state.config.identity_service_url);
    let entries: Vec<ProfileEntry> = match state
        .http_client
        .post(&url)
        .json(&serde_json::json!({ "user_ids": user_ids }))
        .send()
        .await
    {
        Ok(resp) => resp.json().await.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch profiles from identity service");
            vec![]
        }
    };

    entries
        .into_iter()
        .map(|p| {
            let role = p
                .role
                .as_deref()
                .and_then(|r| UserRole::from_str(r).ok())
                .unwrap_or(UserRole::User);
            (
                p.user_id,
                SenderInfo {
                    id: p.user_id,
                    username: p.username,
                    avatar_url: p.avatar_url,
                    role,
                },
            )
        })
        .collect()
}

/// Resolve one sender, falling back to the sentinel.
pub async fn fetch_sender(state: &Arc<AppState>, user_id: Uuid) -> SenderInfo {
    fetch_sender_profiles(state, &[user_id])
        .await
        .remove(&user_id)
        .unwrap_or_else(|| SenderInfo::sentinel(user_id))
}

#[derive(Debug, Deserialize)]
struct FollowerIdsResponse {
    follower_ids: Vec<Uuid>,
}

/// IDs of users following `user_id`, for the auto-accept-from-followers
/// preference. Empty on any failure.
pub async fn fetch_follower_ids(state: &Arc<AppState>, user_id: Uuid) -> Vec<Uuid> {
    let url = format!(
        "{}/internal/follower-ids/{}",
        state.config.identity_service_url, user_id
    );
    match state.http_client.get(&url).send().await {
        Ok(resp) => resp
            .json::<FollowerIdsResponse>()
            .await
            .map(|r| r.follower_ids)
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch follower ids from identity service");
            vec![]
        }
    }
}
