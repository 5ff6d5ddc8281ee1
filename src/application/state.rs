//! Composition root: construct adapters and wire services.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use crate::adapters::auth::TokenService;
use crate::adapters::email::SmtpMailer;
use crate::adapters::postgres::{
    PostgresDlqStore, PostgresMessageStore, PostgresRoomStore, PostgresUserStore,
};
use crate::adapters::redis::{RedisCache, RedisJobQueue, RedisRefreshSessionStore};
use crate::adapters::websocket::Hub;
use crate::application::chat_service::ChatService;
use crate::application::user_service::UserService;
use crate::config::{AppConfig, ConfigError};
use crate::domain::foundation::{AppError, ErrorCode};
use crate::ports::{Cache, DlqStore, JobQueue, RefreshSessionStore, RoomStore};

/// Everything the server and the background consumers share.
pub struct AppState {
    pub config: AppConfig,
    pub root_cancel: CancellationToken,

    pub hub: Arc<Hub>,
    pub cache: Arc<dyn Cache>,
    pub queue: Arc<dyn JobQueue>,
    pub rooms: Arc<dyn RoomStore>,
    pub dlq_store: Arc<dyn DlqStore>,
    pub sessions: Arc<dyn RefreshSessionStore>,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<SmtpMailer>,

    pub chat: Arc<ChatService>,
    pub users: Arc<UserService>,
}

impl AppState {
    /// Connect every store and assemble the services.
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        config
            .validate()
            .map_err(|e| AppError::new(ErrorCode::Internal, format!("config: {}", e)))?;

        let relational = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .map_err(AppError::database)?;

        let message_log = PgPoolOptions::new()
            .max_connections(config.message_store.max_connections)
            .connect(&config.message_store.url)
            .await
            .map_err(AppError::database)?;

        let redis_client = redis::Client::open(config.redis.url.as_str())
            .map_err(|e| AppError::new(ErrorCode::Cache, e.to_string()))?;
        let redis_conn = redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::new(ErrorCode::Cache, e.to_string()))?;

        let (private_pem, public_pem) = config
            .auth
            .read_key_pair()
            .map_err(|e: ConfigError| AppError::new(ErrorCode::Internal, e.to_string()))?;
        let tokens = Arc::new(TokenService::from_rsa_pem(&private_pem, &public_pem)?);

        let root_cancel = CancellationToken::new();
        let hub = Hub::new(&root_cancel);

        let cache: Arc<dyn Cache> = Arc::new(RedisCache::new(redis_conn.clone()));
        let queue: Arc<dyn JobQueue> =
            Arc::new(RedisJobQueue::new(redis_conn.clone(), redis_client));
        let sessions: Arc<dyn RefreshSessionStore> =
            Arc::new(RedisRefreshSessionStore::new(redis_conn));
        let dlq_store: Arc<dyn DlqStore> = Arc::new(PostgresDlqStore::new(message_log.clone()));
        let mailer = Arc::new(SmtpMailer::new(&config.email)?);

        let rooms: Arc<dyn RoomStore> = Arc::new(PostgresRoomStore::new(relational.clone()));

        let chat = Arc::new(ChatService::new(
            Arc::clone(&rooms),
            Arc::new(PostgresMessageStore::new(message_log)),
            Arc::clone(&cache),
            Arc::clone(&queue),
        ));

        let users = Arc::new(UserService::new(
            Arc::new(PostgresUserStore::new(relational)),
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&sessions),
            Arc::clone(&tokens),
        ));

        Ok(Self {
            config,
            root_cancel,
            hub,
            cache,
            queue,
            rooms,
            dlq_store,
            sessions,
            tokens,
            mailer,
            chat,
            users,
        })
    }
}
