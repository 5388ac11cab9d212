use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Template key the mailer renders recommendation emails with
pub const RECOMMENDATION_TEMPLATE: &str = "recommendation";

/// Email hand-off consumed by the notification service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: Uuid,
    pub to: String,
    pub template: String,
    /// Merge fields substituted into the template
    pub data: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl EmailMessage {
    pub fn new(to: impl Into<String>, template: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            to: to.into(),
            template: template.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Hands notifications to the messaging layer
///
/// Delivery is the transport's concern; a successful publish only means the
/// message left this service.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, message: EmailMessage) -> AppResult<()>;
}

/// Creates a Redis client for the notification queue
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Publishes notifications by appending them to a Redis list
#[derive(Clone)]
pub struct RedisPublisher {
    connection: ConnectionManager,
    queue: String,
}

impl RedisPublisher {
    /// Connects through a `ConnectionManager`, which reconnects on its own
    /// after transient failures.
    pub async fn connect(client: Client, queue: impl Into<String>) -> AppResult<Self> {
        let connection = ConnectionManager::new(client).await?;
        let queue = queue.into();

        tracing::info!(queue = %queue, "Notification publisher connected");

        Ok(Self { connection, queue })
    }
}

#[async_trait::async_trait]
impl NotificationPublisher for RedisPublisher {
    async fn publish(&self, message: EmailMessage) -> AppResult<()> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| AppError::Internal(format!("Message serialization error: {}", e)))?;

        let mut conn = self.connection.clone();
        let _: () = conn.rpush(&self.queue, payload).await?;

        tracing::debug!(
            message_id = %message.id,
            template = %message.template,
            queue = %self.queue,
            "Notification published"
        );

        Ok(())
    }
}
