//! Ingestion workers.
//!
//! Each worker is a stateless invocation: it reads its configuration from the
//! job row, does a bounded amount of work and records the outcome on the same
//! row. Workers coordinate only through the job and log tables.
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::{sync::Arc, time::Duration};

use crate::{
    db::{JobStore, Store},
    error::{AppError, AppResult},
    models::{JobFinish, JobStatus, JobType},
    services::{
        budget::TimeBudget, catalog::CatalogClient, dispatch::Dispatcher,
        video_search::VideoSearch,
    },
};

pub mod enrich_details;
pub mod enrich_trailers;
pub mod fix_streaming;
pub mod full_refresh;
pub mod orchestrator;
pub mod retry_sweeper;
pub mod sweep;
pub mod sync_delta;

pub const FULL_REFRESH_ORCHESTRATOR: &str = "full-refresh-orchestrator";
pub const FULL_REFRESH_TITLES: &str = "full-refresh-titles";
pub const SYNC_TITLES_DELTA: &str = "sync-titles-delta";
pub const ENRICH_TITLE_DETAILS: &str = "enrich-title-details-batch";
pub const ENRICH_TITLE_TRAILERS: &str = "enrich-title-trailers";
pub const FIX_STREAMING_AVAILABILITY: &str = "fix-streaming-availability";
pub const RETRY_FAILED_THREADS: &str = "retry-failed-threads";

/// Timing and batching knobs shared by the workers
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Pause after each orchestrator dispatch
    pub dispatch_delay: Duration,
    /// Orchestrator re-reads the job status every this many dispatches
    pub status_poll_every: usize,
    /// Pause after each discover combination
    pub combination_delay: Duration,
    /// Written records between progress increments
    pub progress_every: u64,
    pub details_budget: Duration,
    pub trailers_budget: Duration,
    pub repair_budget: Duration,
    pub retry_batch_size: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dispatch_delay: Duration::from_millis(500),
            status_poll_every: 10,
            combination_delay: Duration::from_millis(50),
            progress_every: 50,
            details_budget: Duration::from_secs(55),
            trailers_budget: Duration::from_secs(90),
            repair_budget: Duration::from_secs(55),
            retry_batch_size: 10,
        }
    }
}

/// Collaborators every worker runs against
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub catalog: Arc<dyn CatalogClient>,
    /// Absent when no search key is configured; trailers then come from the
    /// catalog only
    pub video_search: Option<Arc<dyn VideoSearch>>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn CatalogClient>,
        video_search: Option<Arc<dyn VideoSearch>>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            catalog,
            video_search,
            dispatcher,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Next scheduled delta run: 02:00 UTC on the day after `now`
pub fn next_daily_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| now.date_naive());
    tomorrow
        .and_time(NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default())
        .and_utc()
}

/// Seconds rounded to one decimal, as reported in worker responses
pub fn duration_seconds(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 10.0).round() / 10.0
}

/// Batches progress increments so the job row is written every `every`
/// records instead of once per record
pub struct ProgressCounter {
    job_type: JobType,
    every: u64,
    pending: u64,
    flushed: i64,
}

impl ProgressCounter {
    pub fn new(job_type: JobType, every: u64) -> Self {
        Self {
            job_type,
            every: every.max(1),
            pending: 0,
            flushed: 0,
        }
    }

    pub async fn add(&mut self, store: &dyn Store, count: u64) -> AppResult<()> {
        self.pending += count;
        if self.pending >= self.every {
            self.flush(store).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self, store: &dyn Store) -> AppResult<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let delta = self.pending as i64;
        let total = store.increment_titles_processed(self.job_type, delta).await?;
        tracing::debug!(job_type = %self.job_type, delta, total, "Progress recorded");
        self.flushed += delta;
        self.pending = 0;
        Ok(())
    }

    /// Increments written so far by this counter
    pub fn flushed(&self) -> i64 {
        self.flushed
    }
}

/// Records a failed run. A failure to write the job row is logged, not returned,
/// so the caller still surfaces the original error.
pub async fn record_failure(
    store: &dyn Store,
    job_type: JobType,
    error: &AppError,
    budget: &TimeBudget,
    next_run_at: Option<DateTime<Utc>>,
) {
    tracing::error!(job_type = %job_type, error = %error, "Job run failed");

    let finish = JobFinish {
        status: JobStatus::Failed,
        total_titles_processed: None,
        duration_seconds: budget.elapsed_seconds(),
        error_message: Some(error.to_string()),
        next_run_at,
    };
    if let Err(e) = store.finish_job(job_type, &finish).await {
        tracing::error!(job_type = %job_type, error = %e, "Could not record job failure");
    }
}
