//! Persistence seams for the ingestion pipeline.
//!
//! Workers talk to storage only through these traits. `PgStore` is the
//! production backend; `MemoryStore` enforces the same uniqueness rules
//! in-process and backs the test suite.
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        Job, JobFinish, JobStatus, JobType, NewSystemLog, NewTitle, StreamingService, SystemLog,
        TitleRow, TitleUpdate,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};

/// Result of a title upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleUpsert {
    pub id: Uuid,
    /// False when an existing row (same `tmdb_id` or same name/year) was updated
    pub created: bool,
}

/// Job ledger: configuration source and progress record, one row per job type
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_type: JobType) -> AppResult<Job>;

    async fn get_job_by_id(&self, id: Uuid) -> AppResult<Job>;

    async fn list_jobs(&self) -> AppResult<Vec<Job>>;

    /// Marks the job running and stamps `last_run_at`; optionally zeroes progress
    async fn start_job(&self, job_type: JobType, reset_progress: bool) -> AppResult<Job>;

    async fn set_job_status(&self, job_type: JobType, status: JobStatus) -> AppResult<()>;

    async fn finish_job(&self, job_type: JobType, finish: &JobFinish) -> AppResult<()>;

    /// Adds to `total_titles_processed` in a single statement, safe under
    /// concurrent invocations. Returns the new total.
    async fn increment_titles_processed(&self, job_type: JobType, delta: i64) -> AppResult<i64>;

    /// Shallow-merges `patch` into the job's configuration object
    async fn merge_job_configuration(
        &self,
        job_type: JobType,
        patch: serde_json::Value,
    ) -> AppResult<()>;
}

/// Titles and their genre, language and availability joins
#[async_trait::async_trait]
pub trait TitleStore: Send + Sync {
    /// Updates the row with the same `tmdb_id` if one exists, otherwise
    /// inserts on conflict `(name, release_year)`
    async fn upsert_title(&self, title: &NewTitle) -> AppResult<TitleUpsert>;

    /// Links catalog genre ids that map to known genres. Returns rows added.
    async fn link_genres(&self, title_id: Uuid, tmdb_genre_ids: &[i64]) -> AppResult<usize>;

    /// Returns true when the link was new
    async fn link_language(&self, title_id: Uuid, language_code: &str) -> AppResult<bool>;

    async fn active_services(&self) -> AppResult<Vec<StreamingService>>;

    /// Adds availability rows; existing ones are left alone. Returns rows added.
    async fn link_services(
        &self,
        title_id: Uuid,
        service_ids: &[Uuid],
        region: &str,
    ) -> AppResult<usize>;

    /// Titles missing poster, backdrop or runtime, most popular first
    async fn titles_missing_details(&self, limit: i64) -> AppResult<Vec<TitleRow>>;

    /// Titles never checked for a trailer, most popular first
    async fn titles_missing_trailers(&self, limit: i64) -> AppResult<Vec<TitleRow>>;

    async fn update_title(&self, title_id: Uuid, update: &TitleUpdate) -> AppResult<()>;

    /// Titles with a catalog id joined to at least `min_services` active
    /// services in `region`, most popular first
    async fn titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
        limit: i64,
    ) -> AppResult<Vec<TitleRow>>;

    async fn count_titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
    ) -> AppResult<i64>;

    async fn availability(&self, title_id: Uuid, region: &str) -> AppResult<Vec<Uuid>>;

    /// Replaces every availability row of the title in `region`, atomically
    async fn replace_availability(
        &self,
        title_id: Uuid,
        region: &str,
        service_ids: &[Uuid],
    ) -> AppResult<()>;
}

/// System log table, doubling as the retry queue for failed chunks
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    async fn insert_log(&self, entry: &NewSystemLog) -> AppResult<Uuid>;

    /// Unresolved rows for `operation`, oldest first
    async fn unresolved_logs(&self, operation: &str, limit: i64) -> AppResult<Vec<SystemLog>>;

    async fn delete_log(&self, id: Uuid) -> AppResult<()>;
}

/// Everything a worker needs from storage
pub trait Store: JobStore + TitleStore + LogStore {}

impl<T: JobStore + TitleStore + LogStore> Store for T {}
