use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Lifecycle status of a recommendation
///
/// The generator only moves records `pending -> sent` or `pending -> failed`.
/// `opened` and `clicked` are written by the downstream tracking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Sent,
    Opened,
    Clicked,
    Failed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Sent => "sent",
            RecommendationStatus::Opened => "opened",
            RecommendationStatus::Clicked => "clicked",
            RecommendationStatus::Failed => "failed",
        }
    }

    /// Whether the generator may move a record from `self` to `next`
    pub fn can_transition_to(&self, next: RecommendationStatus) -> bool {
        matches!(
            (self, next),
            (RecommendationStatus::Pending, RecommendationStatus::Sent)
                | (RecommendationStatus::Pending, RecommendationStatus::Failed)
        )
    }
}

impl Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown recommendation status '{0}'")]
pub struct ParseStatusError(String);

impl TryFrom<String> for RecommendationStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(RecommendationStatus::Pending),
            "sent" => Ok(RecommendationStatus::Sent),
            "opened" => Ok(RecommendationStatus::Opened),
            "clicked" => Ok(RecommendationStatus::Clicked),
            "failed" => Ok(RecommendationStatus::Failed),
            _ => Err(ParseStatusError(value)),
        }
    }
}

/// Clamps a confidence score into `[0.0, 1.0]`; non-finite scores become 0
pub fn clamp_confidence(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A generated recommendation with its delivery state and audit context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recommendation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub user_id: Uuid,
    pub movie_id: Uuid,

    pub reason: String,
    pub confidence_score: f64,

    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,

    #[sqlx(try_from = "String")]
    pub status: RecommendationStatus,

    /// Model inputs and raw answer, kept for debugging
    pub generation_context: serde_json::Value,

    pub email_to: String,
    pub email_subject: String,
}

/// Fields the generator supplies when creating a recommendation
#[derive(Debug, Clone)]
pub struct NewRecommendation {
    pub user_id: Uuid,
    pub movie_id: Uuid,
    pub reason: String,
    pub confidence_score: f64,
    pub generation_context: serde_json::Value,
    pub email_to: String,
    pub email_subject: String,
}

impl Recommendation {
    /// Builds a fresh `pending` record with a new id and clamped confidence
    pub fn pending(new: NewRecommendation) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            user_id: new.user_id,
            movie_id: new.movie_id,
            reason: new.reason,
            confidence_score: clamp_confidence(new.confidence_score),
            sent_at: None,
            opened_at: None,
            clicked_at: None,
            status: RecommendationStatus::Pending,
            generation_context: new.generation_context,
            email_to: new.email_to,
            email_subject: new.email_subject,
        }
    }
}

// ============================================================================
// Listing options
// ============================================================================

/// Offset pagination. `None` leaves the corresponding clause out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    ConfidenceScore,
    Status,
    SentAt,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::ConfidenceScore => "confidence_score",
            SortField::Status => "status",
            SortField::SentAt => "sent_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SortOptions {
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

/// One page of results plus the unpaginated total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
}
