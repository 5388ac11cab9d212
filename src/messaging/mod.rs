pub mod publisher;

pub use publisher::create_redis_client;
pub use publisher::EmailMessage;
pub use publisher::NotificationPublisher;
pub use publisher::RedisPublisher;
pub use publisher::RECOMMENDATION_TEMPLATE;
