use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{JobStore, LogStore},
    error::{AppError, AppResult},
    models::{JobFinish, JobStatus, JobType, NewSystemLog, Severity, WorkChunk, CHUNK_FAILURE_OPERATION},
    services::{
        budget::TimeBudget,
        jobs::{
            duration_seconds, record_failure,
            sweep::{run_sweep, Combination, SweepReport},
            Pipeline, FULL_REFRESH_TITLES,
        },
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullRefreshRequest {
    /// Set by the orchestrator on chunk invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    /// Runs only this combination when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<WorkChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_seconds: Option<u64>,
    /// Set by the retry sweeper; a replay that fails again keeps the original
    /// log row instead of adding another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullRefreshResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<WorkChunk>,
    #[serde(flatten)]
    pub report: SweepReport,
    pub duration: f64,
}

/// Entry point of `full-refresh-titles`
pub async fn run(
    pipeline: &Pipeline,
    request: FullRefreshRequest,
    request_id: Option<String>,
) -> AppResult<FullRefreshResponse> {
    match request.chunk.clone() {
        Some(chunk) => run_chunk(pipeline, request, chunk, request_id).await,
        None => run_full(pipeline, &request).await,
    }
}

/// One orchestrator work unit. The job row is owned by the orchestrator, so
/// only progress is written here.
async fn run_chunk(
    pipeline: &Pipeline,
    request: FullRefreshRequest,
    chunk: WorkChunk,
    request_id: Option<String>,
) -> AppResult<FullRefreshResponse> {
    let budget = TimeBudget::from_request(request.budget_seconds, None);
    tracing::info!(
        language = %chunk.language_code,
        year = chunk.year,
        genre_id = chunk.genre_id,
        "Full refresh chunk started"
    );

    let result: AppResult<SweepReport> = async {
        let job = pipeline.store.get_job(JobType::FullRefresh).await?;
        let config = job.config();
        run_sweep(
            pipeline,
            JobType::FullRefresh,
            &config,
            &[Combination::from(&chunk)],
            &budget,
        )
        .await
    }
    .await;

    match result {
        Ok(report) => Ok(FullRefreshResponse {
            success: true,
            chunk: Some(chunk),
            report,
            duration: duration_seconds(budget.elapsed()),
        }),
        Err(e) => {
            if request.retry_of.is_none() {
                log_chunk_failure(pipeline, &request, &e, request_id).await;
            }
            Err(e)
        }
    }
}

/// Records a failed chunk so the retry sweeper can replay it verbatim
async fn log_chunk_failure(
    pipeline: &Pipeline,
    request: &FullRefreshRequest,
    error: &AppError,
    request_id: Option<String>,
) {
    let params = match serde_json::to_value(request) {
        Ok(params) => params,
        Err(e) => {
            tracing::error!(error = %e, "Could not serialize chunk parameters");
            return;
        }
    };

    let entry = NewSystemLog {
        severity: Severity::Error,
        operation: CHUNK_FAILURE_OPERATION.to_string(),
        error_message: error.to_string(),
        context: serde_json::json!({
            "function": FULL_REFRESH_TITLES,
            "params": params,
            "requestId": request_id,
        }),
    };

    match pipeline.store.insert_log(&entry).await {
        Ok(id) => tracing::warn!(log_id = %id, error = %error, "Chunk failure logged for retry"),
        Err(e) => tracing::error!(error = %e, "Could not log chunk failure"),
    }
}

/// Standalone sweep over every combination in the job configuration
async fn run_full(pipeline: &Pipeline, request: &FullRefreshRequest) -> AppResult<FullRefreshResponse> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::from_request(request.budget_seconds, None);

    let job = store.start_job(JobType::FullRefresh, true).await?;
    let config = job.config();
    let combinations: Vec<Combination> = config
        .chunks(Utc::now())
        .iter()
        .map(Combination::from)
        .collect();

    tracing::info!(combinations = combinations.len(), "Full refresh started");

    match run_sweep(pipeline, JobType::FullRefresh, &config, &combinations, &budget).await {
        Ok(report) => {
            let finish = JobFinish {
                status: JobStatus::Completed,
                total_titles_processed: Some(report.batch.processed() as i64),
                duration_seconds: budget.elapsed_seconds(),
                error_message: None,
                next_run_at: None,
            };
            store.finish_job(JobType::FullRefresh, &finish).await?;

            Ok(FullRefreshResponse {
                success: true,
                chunk: None,
                report,
                duration: duration_seconds(budget.elapsed()),
            })
        }
        Err(e) => {
            record_failure(store, JobType::FullRefresh, &e, &budget, None).await;
            Err(e)
        }
    }
}
