use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::Reservation,
    services::providers::{rest::RestClient, ReservationProvider},
};

/// Client for the reservation (purchase history) service
#[derive(Clone)]
pub struct ReservationClient {
    rest: RestClient,
}

impl ReservationClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            rest: RestClient::new("nakup", base_url, timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl ReservationProvider for ReservationClient {
    async fn get_user_reservations(&self, user_id: Uuid) -> AppResult<Vec<Reservation>> {
        self.rest
            .get_data(
                "/api/v1/nakup/reservations",
                &[("user_id", user_id.to_string())],
            )
            .await
    }
}
