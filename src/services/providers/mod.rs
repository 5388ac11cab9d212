/// Upstream data service abstraction
///
/// The generator reads users, reservations and the programme through these
/// traits. The HTTP implementations share one [`rest::RestClient`]; tests
/// substitute mocks.
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Movie, Reservation, TimeSlot, User},
};

pub mod auth;
pub mod catalog;
pub mod reservations;
pub mod rest;

pub use auth::AuthClient;
pub use catalog::CatalogClient;
pub use reservations::ReservationClient;
pub use rest::RestClient;

/// User directory lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// All users currently marked active
    async fn get_active_users(&self) -> AppResult<Vec<User>>;

    async fn get_user(&self, user_id: Uuid) -> AppResult<User>;
}

/// Purchase and reservation history lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReservationProvider: Send + Sync {
    async fn get_user_reservations(&self, user_id: Uuid) -> AppResult<Vec<Reservation>>;
}

/// Programme catalog lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync {
    /// A single showing, with its movie embedded
    async fn get_timeslot(&self, timeslot_id: Uuid) -> AppResult<TimeSlot>;

    /// Showings starting within `[start, end]`
    async fn get_upcoming_timeslots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<TimeSlot>>;

    async fn get_movie(&self, movie_id: Uuid) -> AppResult<Movie>;

    async fn get_active_movies(&self) -> AppResult<Vec<Movie>>;
}
