use uuid::Uuid;

use dealspot_shared::clients::rabbitmq::RabbitMQClient;
use dealspot_shared::types::event::{payloads, routing_keys, Event};

use crate::models::{ChatBan, ChatRequest, Message};

pub async fn publish_message_sent(
    rabbitmq: &RabbitMQClient,
    message: &Message,
    content_preview: &str,
) {
    let event = Event::new(
        "dealspot-chat",
        routing_keys::CHAT_MESSAGE_SENT,
        payloads::MessageSent {
            message_id: message.id,
            channel_id: message.channel_id,
            sender_id: message.sender_id,
            mentioned_users: message.mentioned_users.clone(),
            content_preview: content_preview.to_string(),
        },
    )
    .with_user(message.sender_id);

    if let Err(e) = rabbitmq.publish(routing_keys::CHAT_MESSAGE_SENT, &event).await {
        tracing::error!(error = %e, "failed to publish message.sent event");
    }
}

pub async fn publish_chat_request_created(rabbitmq: &RabbitMQClient, request: &ChatRequest) {
    let event = Event::new(
        "dealspot-chat",
        routing_keys::CHAT_REQUEST_CREATED,
        payloads::ChatRequestCreated {
            request_id: request.id,
            requester_id: request.requester_id,
            recipient_id: request.recipient_id,
        },
    )
    .with_user(request.requester_id);

    if let Err(e) = rabbitmq.publish(routing_keys::CHAT_REQUEST_CREATED, &event).await {
        tracing::error!(error = %e, "failed to publish request.created event");
    }
}

pub async fn publish_chat_request_responded(
    rabbitmq: &RabbitMQClient,
    request: &ChatRequest,
    channel_id: Option<Uuid>,
) {
    let event = Event::new(
        "dealspot-chat",
        routing_keys::CHAT_REQUEST_RESPONDED,
        payloads::ChatRequestResponded {
            request_id: request.id,
            requester_id: request.requester_id,
            recipient_id: request.recipient_id,
            status: request.status.clone(),
            channel_id,
        },
    )
    .with_user(request.recipient_id);

    if let Err(e) = rabbitmq.publish(routing_keys::CHAT_REQUEST_RESPONDED, &event).await {
        tracing::error!(error = %e, "failed to publish request.responded event");
    }
}

pub async fn publish_ban_issued(rabbitmq: &RabbitMQClient, ban: &ChatBan) {
    let event = Event::new(
        "dealspot-chat",
        routing_keys::MODERATION_BAN_ISSUED,
        payloads::BanIssued {
            ban_id: ban.id,
            user_id: ban.user_id,
            channel_id: ban.channel_id,
            reason: ban.reason.clone(),
            expires_at: ban.expires_at,
        },
    )
    .with_user(ban.user_id);

    if let Err(e) = rabbitmq.publish(routing_keys::MODERATION_BAN_ISSUED, &event).await {
        tracing::error!(error = %e, "failed to publish ban.issued event");
    }
}

pub async fn publish_ban_lifted(rabbitmq: &RabbitMQClient, ban_id: Uuid, user_id: Uuid) {
    let event = Event::new(
        "dealspot-chat",
        routing_keys::MODERATION_BAN_LIFTED,
        payloads::BanLifted { ban_id, user_id },
    )
    .with_user(user_id);

    if let Err(e) = rabbitmq.publish(routing_keys::MODERATION_BAN_LIFTED, &event).await {
        tracing::error!(error = %e, "failed to publish ban.lifted event");
    }
}
