use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt::Display;

/// Pipeline step an error originated from, for log attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchUsers,
    FetchUser,
    FetchReservations,
    FetchSchedule,
    GenerateRecommendation,
    FetchRecommendedMovie,
    SaveRecommendation,
    PublishNotification,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::FetchUsers => "fetch active users",
            Stage::FetchUser => "fetch user",
            Stage::FetchReservations => "fetch reservations",
            Stage::FetchSchedule => "fetch upcoming schedule",
            Stage::GenerateRecommendation => "generate recommendation",
            Stage::FetchRecommendedMovie => "fetch recommended movie",
            Stage::SaveRecommendation => "save recommendation",
            Stage::PublishNotification => "publish notification",
        };
        write!(f, "{}", name)
    }
}

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("{service} request failed: {source}")]
    Upstream {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}: {body}")]
    UpstreamStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    UpstreamDecode {
        service: &'static str,
        message: String,
    },

    #[error("Recommendation model error: {0}")]
    Model(String),

    #[error("No upcoming movies available")]
    NoCandidates,

    #[error("Failed to {stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps an error with the pipeline stage it came from
    pub fn at(stage: Stage) -> impl FnOnce(AppError) -> AppError {
        move |source| AppError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// The pipeline stage, if this error was attributed to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AppError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Upstream { .. }
            | AppError::UpstreamStatus { .. }
            | AppError::UpstreamDecode { .. }
            | AppError::HttpClient(_)
            | AppError::Model(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::Database(_)
            | AppError::Messaging(_)
            | AppError::NoCandidates
            | AppError::Stage { .. }
            | AppError::Scheduler(_)
            | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
