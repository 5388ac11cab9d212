use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::User,
    services::providers::{rest::RestClient, IdentityProvider},
};

/// Client for the identity service's user directory
#[derive(Clone)]
pub struct AuthClient {
    rest: RestClient,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            rest: RestClient::new("auth", base_url, timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for AuthClient {
    async fn get_active_users(&self) -> AppResult<Vec<User>> {
        let users: Vec<User> = self
            .rest
            .get_data("/api/v1/auth/users", &[("active", "true".to_string())])
            .await?;

        tracing::debug!(count = users.len(), provider = self.rest.service(), "Fetched active users");

        Ok(users)
    }

    async fn get_user(&self, user_id: Uuid) -> AppResult<User> {
        self.rest
            .get_data(&format!("/api/v1/auth/users/{}", user_id), &[])
            .await
    }
}
