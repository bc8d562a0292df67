use axum::{routing::{get, post, put, delete}, Router};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::pg::PgConnection;
use std::sync::Arc;
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod events;
mod models;
mod routes;
mod schema;
mod services;
mod socket;

use config::AppConfig;
use dealspot_shared::clients::rabbitmq::RabbitMQClient;
use dealspot_shared::clients::redis::RedisClient;
use models::{ChannelType, NewChannel};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub rabbitmq: RabbitMQClient,
    pub redis: RedisClient,
    pub io: SocketIo,
    pub http_client: reqwest::Client,
}

/// Provision the single global channel at startup. Explicit init rather
/// than lazy per-request creation, so concurrent first requests cannot race
/// two "first" global channels into existence.
fn ensure_global_channel(db: &DbPool) -> anyhow::Result<()> {
    use crate::schema::channels;

    let mut conn = db.get()?;

    let existing: Option<uuid::Uuid> = channels::table
        .filter(channels::is_global.eq(true))
        .filter(channels::is_active.eq(true))
        .select(channels::id)
        .first(&mut conn)
        .optional()?;

    if let Some(id) = existing {
        tracing::info!(channel_id = %id, "global channel present");
        return Ok(());
    }

    let new_channel = NewChannel {
        channel_type: ChannelType::Global.as_str().to_string(),
        name: Some("DealSpot Community".to_string()),
        is_global: true,
        private_key: None,
        created_by: None,
    };

    let inserted = diesel::insert_into(channels::table)
        .values(&new_channel)
        .execute(&mut conn);

    match inserted {
        Ok(_) => {
            tracing::info!("global channel provisioned");
            Ok(())
        }
        Err(e) if matches!(
            e,
            diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
        ) =>
        {
            // Another instance won the provisioning race
            tracing::info!("global channel provisioned by another instance");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dealspot_shared::middleware::init_tracing("dealspot-chat");

    let config = AppConfig::load()?;
    let port = config.port;

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let db = Pool::builder().max_size(10).build(manager)?;

    ensure_global_channel(&db)?;

    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;
    let redis = RedisClient::connect(&config.redis_url).await?;

    // Socket.IO layer - io lives in AppState so REST handlers can emit
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let http_client = reqwest::Client::new();
    let state = Arc::new(AppState { db, config, rabbitmq, redis, io: io.clone(), http_client });

    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect_with_state(socket, state).await;
            }
        }
    });

    // Auto-enroll newly registered users into the global channel
    let sub_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_user_registered(sub_state).await {
            tracing::error!(error = %e, "user.registered subscriber failed");
        }
    });

    let app = Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        // Channels
        .route("/channels", get(routes::channels::list_channels))
        .route("/channels/global", get(routes::channels::get_global_channel))
        .route("/channels/private", post(routes::channels::open_private_channel))
        .route("/channels/group", post(routes::channels::create_group))
        .route("/channels/:id", get(routes::channels::get_channel))
        .route("/channels/:id/members", post(routes::channels::add_member))
        .route("/channels/:id/members/me", delete(routes::channels::leave_channel))
        .route("/channels/:id/read", post(routes::channels::mark_as_read))
        // Messages
        .route("/channels/:id/messages", get(routes::messages::list_messages).post(routes::messages::send_message))
        .route("/messages/:id", put(routes::messages::edit_message).delete(routes::messages::delete_message))
        // Reactions
        .route("/messages/:id/reactions", post(routes::reactions::add_reaction))
        .route("/messages/:id/reactions/:emoji", delete(routes::reactions::remove_reaction))
        // Chat requests
        .route("/chat-requests", get(routes::requests::list_chat_requests).post(routes::requests::send_chat_request))
        .route("/chat-requests/:id", put(routes::requests::respond_to_chat_request))
        // Preferences & blocks
        .route("/preferences", get(routes::preferences::get_preferences).put(routes::preferences::update_preferences))
        .route("/blocks", get(routes::preferences::list_blocks))
        .route("/blocks/:user_id", post(routes::preferences::block_user).delete(routes::preferences::unblock_user))
        // Presence
        .route("/channels/:id/online", get(routes::presence::get_online_users))
        .route("/channels/:id/typing", get(routes::presence::get_typing_users))
        .route("/channels/:id/typing/start", post(routes::presence::start_typing))
        .route("/channels/:id/typing/stop", post(routes::presence::stop_typing))
        // Moderation
        .route("/moderation/bans", get(routes::moderation::list_bans).post(routes::moderation::ban_user))
        .route("/moderation/bans/:id", delete(routes::moderation::unban_user))
        .route("/moderation/users/:id/bans", get(routes::moderation::get_user_bans))
        .route("/moderation/messages/:id", get(routes::moderation::get_message_audit))
        .route("/moderation/banned-words", get(routes::moderation::list_banned_words).post(routes::moderation::add_banned_word))
        .route("/moderation/banned-words/:id", delete(routes::moderation::remove_banned_word))
        // Unban requests
        .route("/unban-requests", post(routes::moderation::request_unban))
        .route("/unban-requests/:id", put(routes::moderation::respond_to_unban_request))
        .layer(axum::middleware::from_fn(dealspot_shared::middleware::metrics_middleware))
        .layer(sio_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "dealspot-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
