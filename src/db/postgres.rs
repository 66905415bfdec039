use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::{JobStore, LogStore, TitleStore, TitleUpsert};
use crate::{
    error::{AppError, AppResult},
    models::{
        Job, JobFinish, JobStatus, JobType, NewSystemLog, NewTitle, StreamingService, SystemLog,
        TitleRow, TitleUpdate,
    },
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

const JOB_COLUMNS: &str = "id, job_type, status, configuration, last_run_at, \
    last_run_duration_seconds, total_titles_processed, error_message, next_run_at";

const TITLE_COLUMNS: &str = "t.id, t.tmdb_id, t.title_type, t.name, t.original_name, t.overview, \
    t.release_year, t.runtime, t.original_language, t.popularity, t.poster_path, \
    t.backdrop_path, t.trailer_url, t.trailer_checked_at, t.episode_run_time, t.details_checked_at";

#[derive(sqlx::FromRow)]
struct JobRecord {
    id: Uuid,
    job_type: String,
    status: String,
    configuration: serde_json::Value,
    last_run_at: Option<DateTime<Utc>>,
    last_run_duration_seconds: Option<i32>,
    total_titles_processed: i64,
    error_message: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRecord> for Job {
    type Error = AppError;

    fn try_from(row: JobRecord) -> AppResult<Self> {
        Ok(Job {
            id: row.id,
            job_type: row.job_type.parse().map_err(AppError::Internal)?,
            status: row.status.parse().map_err(AppError::Internal)?,
            configuration: row.configuration,
            last_run_at: row.last_run_at,
            last_run_duration_seconds: row.last_run_duration_seconds,
            total_titles_processed: row.total_titles_processed,
            error_message: row.error_message,
            next_run_at: row.next_run_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TitleRecord {
    id: Uuid,
    tmdb_id: Option<i64>,
    title_type: String,
    name: String,
    original_name: Option<String>,
    overview: Option<String>,
    release_year: Option<i32>,
    runtime: Option<i32>,
    original_language: Option<String>,
    popularity: Option<f64>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    trailer_url: Option<String>,
    trailer_checked_at: Option<DateTime<Utc>>,
    episode_run_time: Option<i32>,
    details_checked_at: Option<DateTime<Utc>>,
}

impl TryFrom<TitleRecord> for TitleRow {
    type Error = AppError;

    fn try_from(row: TitleRecord) -> AppResult<Self> {
        Ok(TitleRow {
            id: row.id,
            tmdb_id: row.tmdb_id,
            kind: row.title_type.parse().map_err(AppError::Internal)?,
            name: row.name,
            original_name: row.original_name,
            overview: row.overview,
            release_year: row.release_year,
            runtime: row.runtime,
            original_language: row.original_language,
            popularity: row.popularity,
            poster_path: row.poster_path,
            backdrop_path: row.backdrop_path,
            trailer_url: row.trailer_url,
            trailer_checked: row.trailer_checked_at.is_some(),
            episode_run_time: row.episode_run_time,
            details_checked: row.details_checked_at.is_some(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRecord {
    id: Uuid,
    severity: String,
    operation: String,
    error_message: String,
    context: serde_json::Value,
    resolved: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRecord> for SystemLog {
    type Error = AppError;

    fn try_from(row: LogRecord) -> AppResult<Self> {
        Ok(SystemLog {
            id: row.id,
            severity: row.severity.parse().map_err(AppError::Internal)?,
            operation: row.operation,
            error_message: row.error_message,
            context: row.context,
            resolved: row.resolved,
            created_at: row.created_at,
        })
    }
}

fn into_titles(rows: Vec<TitleRecord>) -> AppResult<Vec<TitleRow>> {
    rows.into_iter().map(TitleRow::try_from).collect()
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_job(&self, filter: &str, bind: JobKey) -> AppResult<Job> {
        let sql = format!("SELECT {} FROM jobs WHERE {} = $1", JOB_COLUMNS, filter);
        let query = sqlx::query_as::<_, JobRecord>(&sql);
        let record = match bind {
            JobKey::Type(job_type) => query.bind(job_type.as_str()),
            JobKey::Id(id) => query.bind(id),
        }
        .fetch_optional(&self.pool)
        .await?;

        record
            .ok_or_else(|| AppError::NotFound(format!("job {}", bind)))?
            .try_into()
    }
}

#[derive(Debug, Clone, Copy)]
enum JobKey {
    Type(JobType),
    Id(Uuid),
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Type(t) => write!(f, "{}", t),
            JobKey::Id(id) => write!(f, "{}", id),
        }
    }
}

fn ensure_updated(rows: u64, job_type: JobType) -> AppResult<()> {
    if rows == 0 {
        return Err(AppError::NotFound(format!("job {}", job_type)));
    }
    Ok(())
}

#[async_trait::async_trait]
impl JobStore for PgStore {
    async fn get_job(&self, job_type: JobType) -> AppResult<Job> {
        self.fetch_job("job_type", JobKey::Type(job_type)).await
    }

    async fn get_job_by_id(&self, id: Uuid) -> AppResult<Job> {
        self.fetch_job("id", JobKey::Id(id)).await
    }

    async fn list_jobs(&self) -> AppResult<Vec<Job>> {
        let sql = format!("SELECT {} FROM jobs ORDER BY job_type", JOB_COLUMNS);
        let rows = sqlx::query_as::<_, JobRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn start_job(&self, job_type: JobType, reset_progress: bool) -> AppResult<Job> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                last_run_at = now(),
                error_message = NULL,
                total_titles_processed = CASE WHEN $2 THEN 0 ELSE total_titles_processed END
            WHERE job_type = $1
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let record = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(job_type.as_str())
            .bind(reset_progress)
            .fetch_optional(&self.pool)
            .await?;

        record
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_type)))?
            .try_into()
    }

    async fn set_job_status(&self, job_type: JobType, status: JobStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE jobs SET status = $2 WHERE job_type = $1")
            .bind(job_type.as_str())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), job_type)
    }

    async fn finish_job(&self, job_type: JobType, finish: &JobFinish) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                total_titles_processed = COALESCE($3, total_titles_processed),
                last_run_duration_seconds = $4,
                error_message = $5,
                next_run_at = COALESCE($6, next_run_at)
            WHERE job_type = $1
            "#,
        )
        .bind(job_type.as_str())
        .bind(finish.status.as_str())
        .bind(finish.total_titles_processed)
        .bind(finish.duration_seconds)
        .bind(finish.error_message.as_deref())
        .bind(finish.next_run_at)
        .execute(&self.pool)
        .await?;
        ensure_updated(result.rows_affected(), job_type)
    }

    async fn increment_titles_processed(&self, job_type: JobType, delta: i64) -> AppResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET total_titles_processed = total_titles_processed + $2
            WHERE job_type = $1
            RETURNING total_titles_processed
            "#,
        )
        .bind(job_type.as_str())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        total.ok_or_else(|| AppError::NotFound(format!("job {}", job_type)))
    }

    async fn merge_job_configuration(
        &self,
        job_type: JobType,
        patch: serde_json::Value,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET configuration = COALESCE(configuration, '{}'::jsonb) || $2 WHERE job_type = $1",
        )
        .bind(job_type.as_str())
        .bind(patch)
        .execute(&self.pool)
        .await?;
        ensure_updated(result.rows_affected(), job_type)
    }
}

#[async_trait::async_trait]
impl TitleStore for PgStore {
    async fn upsert_title(&self, title: &NewTitle) -> AppResult<TitleUpsert> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM titles WHERE tmdb_id = $1")
            .bind(title.tmdb_id)
            .fetch_optional(&mut *tx)
            .await?;

        // Enrichable columns only move from NULL to a value, never back
        let upsert = if let Some(id) = existing {
            sqlx::query(
                r#"
                UPDATE titles
                SET title_type = $2,
                    name = $3,
                    original_name = COALESCE($4, original_name),
                    overview = COALESCE($5, overview),
                    release_year = COALESCE($6, release_year),
                    runtime = COALESCE($7, runtime),
                    original_language = COALESCE($8, original_language),
                    popularity = COALESCE($9, popularity),
                    poster_path = COALESCE($10, poster_path),
                    backdrop_path = COALESCE($11, backdrop_path),
                    episode_run_time = COALESCE($12, episode_run_time),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(title.kind.as_str())
            .bind(&title.name)
            .bind(title.original_name.as_deref())
            .bind(title.overview.as_deref())
            .bind(title.release_year)
            .bind(title.runtime)
            .bind(title.original_language.as_deref())
            .bind(title.popularity)
            .bind(title.poster_path.as_deref())
            .bind(title.backdrop_path.as_deref())
            .bind(title.episode_run_time)
            .execute(&mut *tx)
            .await?;
            TitleUpsert { id, created: false }
        } else {
            let (id, created): (Uuid, bool) = sqlx::query_as(
                r#"
                INSERT INTO titles (
                    tmdb_id, title_type, name, original_name, overview, release_year, runtime,
                    original_language, popularity, poster_path, backdrop_path, episode_run_time
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT ON CONSTRAINT titles_name_release_year_key DO UPDATE
                SET tmdb_id = EXCLUDED.tmdb_id,
                    title_type = EXCLUDED.title_type,
                    original_name = COALESCE(EXCLUDED.original_name, titles.original_name),
                    overview = COALESCE(EXCLUDED.overview, titles.overview),
                    runtime = COALESCE(EXCLUDED.runtime, titles.runtime),
                    original_language = COALESCE(EXCLUDED.original_language, titles.original_language),
                    popularity = COALESCE(EXCLUDED.popularity, titles.popularity),
                    poster_path = COALESCE(EXCLUDED.poster_path, titles.poster_path),
                    backdrop_path = COALESCE(EXCLUDED.backdrop_path, titles.backdrop_path),
                    episode_run_time = COALESCE(EXCLUDED.episode_run_time, titles.episode_run_time),
                    updated_at = now()
                RETURNING id, (xmax = 0) AS created
                "#,
            )
            .bind(title.tmdb_id)
            .bind(title.kind.as_str())
            .bind(&title.name)
            .bind(title.original_name.as_deref())
            .bind(title.overview.as_deref())
            .bind(title.release_year)
            .bind(title.runtime)
            .bind(title.original_language.as_deref())
            .bind(title.popularity)
            .bind(title.poster_path.as_deref())
            .bind(title.backdrop_path.as_deref())
            .bind(title.episode_run_time)
            .fetch_one(&mut *tx)
            .await?;
            TitleUpsert { id, created }
        };

        tx.commit().await?;
        Ok(upsert)
    }

    async fn link_genres(&self, title_id: Uuid, tmdb_genre_ids: &[i64]) -> AppResult<usize> {
        if tmdb_genre_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO title_genres (title_id, genre_id)
            SELECT $1, g.id FROM genres g WHERE g.tmdb_genre_id = ANY($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(title_id)
        .bind(tmdb_genre_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn link_language(&self, title_id: Uuid, language_code: &str) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO languages (language_code) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(language_code)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "INSERT INTO title_languages (title_id, language_code) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(title_id)
        .bind(language_code)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_services(&self) -> AppResult<Vec<StreamingService>> {
        let services = sqlx::query_as::<_, StreamingService>(
            "SELECT id, service_name, is_active FROM streaming_services WHERE is_active = true ORDER BY service_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(services)
    }

    async fn link_services(
        &self,
        title_id: Uuid,
        service_ids: &[Uuid],
        region: &str,
    ) -> AppResult<usize> {
        if service_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO title_streaming_availability (title_id, streaming_service_id, region_code)
            SELECT $1, s, $3 FROM UNNEST($2::uuid[]) AS s
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(title_id)
        .bind(service_ids)
        .bind(region)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn titles_missing_details(&self, limit: i64) -> AppResult<Vec<TitleRow>> {
        let sql = format!(
            r#"
            SELECT {} FROM titles t
            WHERE t.tmdb_id IS NOT NULL
              AND t.details_checked_at IS NULL
              AND (t.poster_path IS NULL
                   OR t.backdrop_path IS NULL
                   OR (t.title_type = 'movie' AND t.runtime IS NULL)
                   OR (t.title_type = 'series' AND t.episode_run_time IS NULL))
            ORDER BY t.popularity DESC NULLS LAST
            LIMIT $1
            "#,
            TITLE_COLUMNS
        );
        let rows = sqlx::query_as::<_, TitleRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_titles(rows)
    }

    async fn titles_missing_trailers(&self, limit: i64) -> AppResult<Vec<TitleRow>> {
        let sql = format!(
            r#"
            SELECT {} FROM titles t
            WHERE t.trailer_url IS NULL AND t.trailer_checked_at IS NULL
            ORDER BY t.popularity DESC NULLS LAST
            LIMIT $1
            "#,
            TITLE_COLUMNS
        );
        let rows = sqlx::query_as::<_, TitleRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_titles(rows)
    }

    async fn update_title(&self, title_id: Uuid, update: &TitleUpdate) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE titles
            SET overview = COALESCE($2, overview),
                poster_path = COALESCE($3, poster_path),
                backdrop_path = COALESCE($4, backdrop_path),
                runtime = COALESCE($5, runtime),
                episode_run_time = COALESCE($6, episode_run_time),
                trailer_url = COALESCE($7, trailer_url),
                trailer_checked_at = CASE WHEN $8 THEN now() ELSE trailer_checked_at END,
                details_checked_at = CASE WHEN $9 THEN now() ELSE details_checked_at END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(title_id)
        .bind(update.overview.as_deref())
        .bind(update.poster_path.as_deref())
        .bind(update.backdrop_path.as_deref())
        .bind(update.runtime)
        .bind(update.episode_run_time)
        .bind(update.trailer_url.as_deref())
        .bind(update.trailer_checked)
        .bind(update.details_checked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
        limit: i64,
    ) -> AppResult<Vec<TitleRow>> {
        let sql = format!(
            r#"
            SELECT {} FROM titles t
            JOIN (
                SELECT a.title_id
                FROM title_streaming_availability a
                JOIN streaming_services s ON s.id = a.streaming_service_id AND s.is_active
                WHERE a.region_code = $1
                GROUP BY a.title_id
                HAVING COUNT(*) >= $2
            ) c ON c.title_id = t.id
            WHERE t.tmdb_id IS NOT NULL
            ORDER BY t.popularity DESC NULLS LAST
            LIMIT $3
            "#,
            TITLE_COLUMNS
        );
        let rows = sqlx::query_as::<_, TitleRecord>(&sql)
            .bind(region)
            .bind(min_services)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_titles(rows)
    }

    async fn count_titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM titles t
            JOIN (
                SELECT a.title_id
                FROM title_streaming_availability a
                JOIN streaming_services s ON s.id = a.streaming_service_id AND s.is_active
                WHERE a.region_code = $1
                GROUP BY a.title_id
                HAVING COUNT(*) >= $2
            ) c ON c.title_id = t.id
            WHERE t.tmdb_id IS NOT NULL
            "#,
        )
        .bind(region)
        .bind(min_services)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn availability(&self, title_id: Uuid, region: &str) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT streaming_service_id FROM title_streaming_availability WHERE title_id = $1 AND region_code = $2",
        )
        .bind(title_id)
        .bind(region)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn replace_availability(
        &self,
        title_id: Uuid,
        region: &str,
        service_ids: &[Uuid],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM title_streaming_availability WHERE title_id = $1 AND region_code = $2")
            .bind(title_id)
            .bind(region)
            .execute(&mut *tx)
            .await?;

        if !service_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO title_streaming_availability (title_id, streaming_service_id, region_code)
                SELECT $1, s, $3 FROM UNNEST($2::uuid[]) AS s
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(title_id)
            .bind(service_ids)
            .bind(region)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogStore for PgStore {
    async fn insert_log(&self, entry: &NewSystemLog) -> AppResult<Uuid> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO system_logs (severity, operation, error_message, context)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(entry.severity.as_str())
        .bind(&entry.operation)
        .bind(&entry.error_message)
        .bind(&entry.context)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn unresolved_logs(&self, operation: &str, limit: i64) -> AppResult<Vec<SystemLog>> {
        let rows = sqlx::query_as::<_, LogRecord>(
            r#"
            SELECT id, severity, operation, error_message, context, resolved, created_at
            FROM system_logs
            WHERE operation = $1 AND resolved = false
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(operation)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SystemLog::try_from).collect()
    }

    async fn delete_log(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM system_logs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
