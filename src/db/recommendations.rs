use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Page, Pagination, Recommendation, RecommendationStatus, SortOptions},
};

const COLUMNS: &str = "id, created_at, updated_at, user_id, movie_id, reason, confidence_score, \
sent_at, opened_at, clicked_at, status, generation_context, email_to, email_subject";

/// Storage for generated recommendations
///
/// Each method is a single statement; implementations hold no locks across
/// calls. The two `mark_*` transitions only apply to `pending` records and
/// touch nothing but the status and its timestamps.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Inserts `recommendation` and returns the stored row
    async fn create(&self, recommendation: Recommendation) -> AppResult<Recommendation>;

    async fn get(&self, id: Uuid) -> AppResult<Recommendation>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        pagination: Pagination,
        sort: SortOptions,
    ) -> AppResult<Page<Recommendation>>;

    async fn list(&self, pagination: Pagination, sort: SortOptions)
        -> AppResult<Page<Recommendation>>;

    /// `pending -> sent`, recording the sent timestamp
    async fn mark_sent(&self, id: Uuid) -> AppResult<()>;

    /// `pending -> failed`
    async fn mark_failed(&self, id: Uuid) -> AppResult<()>;
}

/// PostgreSQL-backed [`RecommendationStore`]
#[derive(Clone)]
pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        user_id: Option<Uuid>,
        pagination: Pagination,
        sort: SortOptions,
    ) -> AppResult<Page<Recommendation>> {
        let total: i64 = count_query(user_id)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let data = select_query(user_id, pagination, sort)
            .build_query_as::<Recommendation>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page { data, total })
    }

    async fn transition(&self, id: Uuid, next: RecommendationStatus) -> AppResult<()> {
        let now = Utc::now();
        let sent_at = (next == RecommendationStatus::Sent).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE recommendations
            SET status = $2, sent_at = COALESCE($3, sent_at), updated_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(sent_at)
        .bind(now)
        .bind(RecommendationStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "recommendation {} is missing or no longer pending",
                id
            )));
        }

        Ok(())
    }
}

fn count_query(user_id: Option<Uuid>) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM recommendations");
    if let Some(user_id) = user_id {
        query.push(" WHERE user_id = ").push_bind(user_id);
    }
    query
}

fn select_query(
    user_id: Option<Uuid>,
    pagination: Pagination,
    sort: SortOptions,
) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT {} FROM recommendations", COLUMNS));

    if let Some(user_id) = user_id {
        query.push(" WHERE user_id = ").push_bind(user_id);
    }

    // Sort columns come from a closed enum, never from raw input
    query
        .push(" ORDER BY ")
        .push(sort.sort.column())
        .push(" ")
        .push(sort.order.keyword())
        .push(", id");

    if let Some(limit) = pagination.limit {
        query.push(" LIMIT ").push_bind(limit.max(0));
    }
    if let Some(offset) = pagination.offset {
        query.push(" OFFSET ").push_bind(offset.max(0));
    }

    query
}

#[async_trait::async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn create(&self, recommendation: Recommendation) -> AppResult<Recommendation> {
        let stored = sqlx::query_as::<_, Recommendation>(&format!(
            r#"
            INSERT INTO recommendations ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            COLUMNS, COLUMNS
        ))
        .bind(recommendation.id)
        .bind(recommendation.created_at)
        .bind(recommendation.updated_at)
        .bind(recommendation.user_id)
        .bind(recommendation.movie_id)
        .bind(&recommendation.reason)
        .bind(recommendation.confidence_score)
        .bind(recommendation.sent_at)
        .bind(recommendation.opened_at)
        .bind(recommendation.clicked_at)
        .bind(recommendation.status.as_str())
        .bind(&recommendation.generation_context)
        .bind(&recommendation.email_to)
        .bind(&recommendation.email_subject)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> AppResult<Recommendation> {
        sqlx::query_as::<_, Recommendation>(&format!(
            "SELECT {} FROM recommendations WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recommendation {}", id)))
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        pagination: Pagination,
        sort: SortOptions,
    ) -> AppResult<Page<Recommendation>> {
        self.list_where(Some(user_id), pagination, sort).await
    }

    async fn list(
        &self,
        pagination: Pagination,
        sort: SortOptions,
    ) -> AppResult<Page<Recommendation>> {
        self.list_where(None, pagination, sort).await
    }

    async fn mark_sent(&self, id: Uuid) -> AppResult<()> {
        self.transition(id, RecommendationStatus::Sent).await
    }

    async fn mark_failed(&self, id: Uuid) -> AppResult<()> {
        self.transition(id, RecommendationStatus::Failed).await
    }
}
