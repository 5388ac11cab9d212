use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Movie, TimeSlot},
    services::providers::{rest::RestClient, CatalogProvider},
};

/// Client for the schedule service (showings and movies)
#[derive(Clone)]
pub struct CatalogClient {
    rest: RestClient,
}

impl CatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            rest: RestClient::new("spored", base_url, timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl CatalogProvider for CatalogClient {
    // The single-showing endpoint returns the showing without an envelope
    async fn get_timeslot(&self, timeslot_id: Uuid) -> AppResult<TimeSlot> {
        self.rest
            .get_json(&format!("/api/v1/spored/timeslots/{}", timeslot_id), &[])
            .await
    }

    async fn get_upcoming_timeslots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<TimeSlot>> {
        self.rest
            .get_data(
                "/api/v1/spored/timeslots",
                &[
                    ("start_date", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("end_date", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ],
            )
            .await
    }

    async fn get_movie(&self, movie_id: Uuid) -> AppResult<Movie> {
        self.rest
            .get_data(&format!("/api/v1/spored/movies/{}", movie_id), &[])
            .await
    }

    async fn get_active_movies(&self) -> AppResult<Vec<Movie>> {
        self.rest
            .get_data("/api/v1/spored/movies", &[("active", "true".to_string())])
            .await
    }
}
