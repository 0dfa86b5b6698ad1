/// Postgres-backed item store over the `markets` table
use crate::db::ItemStore;
use crate::error::{FeedError, Result};
use crate::models::{ChronoPosition, Market, Segment, UNCATEGORIZED};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

const MARKET_COLUMNS: &str = r#"
    id, source, external_id, title, volume, liquidity, price_change_24h,
    end_date, social_mention_score, trend_signal, tags, confidence,
    trend_score, active, updated_at
"#;

/// Shared eligibility predicate. `$1` = now, `$2` = optional category.
const ELIGIBLE_FILTER: &str = r#"
    active = TRUE
    AND (end_date IS NULL OR end_date > $1)
    AND ($2::TEXT IS NULL
         OR LOWER(COALESCE(NULLIF(TRIM(tags[1]), ''), $3)) = $2)
"#;

pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn db_error(op: &'static str) -> impl Fn(sqlx::Error) -> FeedError {
        move |e| {
            error!(op, error = %e, "Market query failed");
            FeedError::from(e)
        }
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn list_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<Vec<Market>> {
        let sql = format!(
            "SELECT {} FROM markets WHERE {}",
            MARKET_COLUMNS, ELIGIBLE_FILTER
        );
        sqlx::query_as::<_, Market>(&sql)
            .bind(now)
            .bind(segment.category())
            .bind(UNCATEGORIZED)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_error("list_eligible"))
    }

    async fn count_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM markets WHERE {}", ELIGIBLE_FILTER);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(now)
            .bind(segment.category())
            .bind(UNCATEGORIZED)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::db_error("count_eligible"))?;
        Ok(count.max(0) as u64)
    }

    async fn write_score(&self, id: Uuid, confidence: f64, trend_score: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE markets
            SET confidence = $2, trend_score = $3, scored_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(confidence)
        .bind(trend_score)
        .execute(&self.pool)
        .await
        .map_err(Self::db_error("write_score"))?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Market>> {
        let sql = format!("SELECT {} FROM markets WHERE id = $1", MARKET_COLUMNS);
        sqlx::query_as::<_, Market>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::db_error("find_by_id"))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Market>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM markets WHERE id = ANY($1)", MARKET_COLUMNS);
        sqlx::query_as::<_, Market>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_error("find_by_ids"))
    }

    async fn list_recent_unranked(
        &self,
        segment: &Segment,
        after: Option<ChronoPosition>,
        limit: usize,
    ) -> Result<Vec<Market>> {
        let sql = format!(
            r#"
            SELECT {} FROM markets
            WHERE {}
              AND ($4::TIMESTAMPTZ IS NULL OR (updated_at, id) < ($4, $5))
            ORDER BY updated_at DESC, id DESC
            LIMIT $6
            "#,
            MARKET_COLUMNS, ELIGIBLE_FILTER
        );
        sqlx::query_as::<_, Market>(&sql)
            .bind(Utc::now())
            .bind(segment.category())
            .bind(UNCATEGORIZED)
            .bind(after.map(|p| p.updated_at))
            .bind(after.map(|p| p.id))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::db_error("list_recent_unranked"))
    }
}
