use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};

use newswire_core::article::{Article, ArticleDescriptor, ArticlePatch, ArticleStatus};
use newswire_core::error::AppError;
use newswire_core::job::{Job, JobStatus, NewJob};
use newswire_core::store::Store;
use newswire_core::util;

use crate::config::DatabaseConfig;

/// PostgreSQL-backed [`Store`].
///
/// Every primitive is a single statement, so atomicity comes from the
/// database: counter updates are in-place adds, status transitions are
/// guarded UPDATEs and the article upsert rides the unique index on `url`.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `PgStore` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    status: String,
    total_articles: i32,
    new_articles: i32,
    cached_articles: i32,
    completed_count: i32,
    failed_count: i32,
    article_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            total_articles: row.total_articles as u32,
            new_articles: row.new_articles as u32,
            cached_articles: row.cached_articles as u32,
            completed_count: row.completed_count as u32,
            failed_count: row.failed_count as u32,
            article_ids: row.article_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    url: String,
    source: String,
    category: String,
    priority: i32,
    title: Option<String>,
    content: Option<String>,
    status: String,
    error_message: Option<String>,
    scraped_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reference_count: i32,
    retry_count: i32,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            url: row.url,
            source: row.source,
            category: row.category,
            priority: row.priority as u8,
            title: row.title,
            content: row.content,
            status: row.status.parse().unwrap_or(ArticleStatus::Pending),
            error_message: row.error_message,
            scraped_at: row.scraped_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            reference_count: row.reference_count as u32,
            retry_count: row.retry_count as u32,
        }
    }
}

impl Store for PgStore {
    async fn create_job(&self, new_job: NewJob) -> Result<Job, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs
                (id, status, total_articles, new_articles, cached_articles,
                 completed_count, failed_count, article_ids, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7,
                    CASE WHEN $8 THEN NOW() ELSE NULL END)
            RETURNING *
            "#,
        )
        .bind(&new_job.id)
        .bind(new_job.status.as_str())
        .bind(new_job.total_articles as i32)
        .bind(new_job.new_articles as i32)
        .bind(new_job.cached_articles as i32)
        .bind(new_job.completed_count as i32)
        .bind(&new_job.article_ids)
        .bind(new_job.status.is_terminal())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Job>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM jobs
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_job_progress(
        &self,
        job_id: &str,
        completed: u32,
        failed: u32,
    ) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET completed_count = completed_count + $2,
                failed_count = failed_count + $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(completed as i32)
        .bind(failed as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<bool, AppError> {
        // Terminal states stick: a cancellation can never be overwritten by
        // a late completion, and vice versa.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                updated_at = NOW(),
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_article_pending(
        &self,
        descriptor: &ArticleDescriptor,
    ) -> Result<(Article, bool), AppError> {
        // The unique index on url arbitrates concurrent creators: exactly
        // one INSERT returns a row, the rest fall through to the SELECT.
        let inserted = sqlx::query_as::<_, ArticleRow>(
            r#"
            INSERT INTO articles
                (id, url, source, category, priority, status, reference_count, retry_count)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, 0)
            ON CONFLICT (url) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(util::article_id())
        .bind(&descriptor.url)
        .bind(&descriptor.source)
        .bind(&descriptor.category)
        .bind(descriptor.priority as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(row) = inserted {
            return Ok((row.into(), false));
        }

        let existing = self
            .get_article_by_url(&descriptor.url)
            .await?
            .ok_or_else(|| {
                AppError::Database(format!(
                    "Upsert for {} returned neither a row nor a conflict",
                    descriptor.url
                ))
            })?;
        Ok((existing, true))
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(r#"SELECT * FROM articles WHERE id = $1"#)
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(r#"SELECT * FROM articles WHERE url = $1"#)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_articles(&self, article_ids: &[String]) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"SELECT * FROM articles WHERE id = ANY($1)"#,
        )
        .bind(article_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_article(
        &self,
        article_id: &str,
        patch: ArticlePatch,
    ) -> Result<Option<Article>, AppError> {
        let require: Option<Vec<String>> = if patch.require_status.is_empty() {
            None
        } else {
            Some(
                patch
                    .require_status
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            )
        };

        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            UPDATE articles
            SET status = COALESCE($2, status),
                title = COALESCE($3, title),
                content = COALESCE($4, content),
                error_message = CASE WHEN $5 THEN NULL ELSE COALESCE($6, error_message) END,
                scraped_at = COALESCE($7, scraped_at),
                retry_count = CASE WHEN $8 THEN 0 ELSE retry_count END,
                updated_at = NOW()
            WHERE id = $1
              AND ($9::text[] IS NULL OR status = ANY($9))
            RETURNING *
            "#,
        )
        .bind(article_id)
        .bind(patch.status.map(|s| s.as_str().to_string()))
        .bind(patch.title)
        .bind(patch.content)
        .bind(patch.clear_error)
        .bind(patch.error_message)
        .bind(patch.scraped_at)
        .bind(patch.reset_retries)
        .bind(require)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn increment_reference(&self, article_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE articles
            SET reference_count = reference_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn increment_retry(&self, article_id: &str) -> Result<Option<u32>, AppError> {
        let count: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE articles
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING retry_count
            "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count.map(|(n,)| n as u32))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
