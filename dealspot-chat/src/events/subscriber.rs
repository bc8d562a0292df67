use std::sync::Arc;

use diesel::prelude::*;
use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;
use uuid::Uuid;

use dealspot_shared::types::event::{payloads, routing_keys, Event};

use crate::models::{ChatPreferences, NewChannelMember};
use crate::schema::{channel_members, channels, chat_preferences};
use crate::AppState;

/// Listen for identity.user.registered events and auto-enroll new users
/// into the global channel.
pub async fn listen_user_registered(state: Arc<AppState>) -> anyhow::Result<()> {
    let consumer = state
        .rabbitmq
        .subscribe(
            "dealspot-chat.identity.user.registered",
            &[routing_keys::IDENTITY_USER_REGISTERED],
        )
        .await?;

    tracing::info!("listening for identity.user.registered events");

    let mut consumer = consumer;
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                match serde_json::from_slice::<Event<payloads::UserRegistered>>(&delivery.data) {
                    Ok(event) => {
                        let user_id = event.data.user_id;
                        tracing::info!(user_id = %user_id, "received user.registered event");

                        if let Err(e) = enroll_in_global_channel(&state.db, user_id) {
                            tracing::error!(
                                error = %e,
                                user_id = %user_id,
                                "failed to enroll user in global channel"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to deserialize user.registered event");
                    }
                }
                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
            }
        }
    }

    Ok(())
}

/// Add the user to the global channel and seed default preferences. Both
/// inserts are idempotent so event redelivery is harmless.
fn enroll_in_global_channel(db: &crate::DbPool, user_id: Uuid) -> anyhow::Result<()> {
    let mut conn = db.get()?;

    let global_id: Option<Uuid> = channels::table
        .filter(channels::is_global.eq(true))
        .filter(channels::is_active.eq(true))
        .select(channels::id)
        .first::<Uuid>(&mut conn)
        .optional()?;

    let Some(channel_id) = global_id else {
        anyhow::bail!("global channel is not provisioned");
    };

    diesel::insert_into(channel_members::table)
        .values(&NewChannelMember { channel_id, user_id })
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    diesel::insert_into(chat_preferences::table)
        .values(&ChatPreferences::defaults_for(user_id))
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    tracing::info!(user_id = %user_id, channel_id = %channel_id, "user enrolled in global channel");
    Ok(())
}
