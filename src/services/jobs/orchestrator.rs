//! Full-refresh fan-out.
//!
//! Dispatch is rate limited on issuance: one invocation per chunk, a fixed
//! pause after each, no waiting for completions. Cancellation is polled: the
//! job status is re-read every `status_poll_every` dispatches, so up to
//! `status_poll_every - 1` chunks may still go out after an operator stops
//! the job.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::JobStore,
    error::{AppError, AppResult},
    models::{JobFinish, JobStatus, JobType, WorkChunk},
    services::{
        budget::TimeBudget,
        jobs::{Pipeline, FULL_REFRESH_TITLES},
    },
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorRequest {
    pub job_id: Uuid,
    /// Computed from the job configuration when absent
    #[serde(default)]
    pub chunks: Option<Vec<WorkChunk>>,
    #[serde(default)]
    pub start_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorAccepted {
    pub success: bool,
    pub total_chunks: usize,
    pub start_index: usize,
}

/// Outcome of one dispatch loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub dispatch_errors: usize,
    /// Index of the first undispatched chunk when an operator stopped the run
    pub halted_at: Option<usize>,
}

/// Validates the request, marks the job running and starts the dispatch loop
/// in the background. Returns before any chunk is dispatched.
pub async fn start(pipeline: &Pipeline, request: OrchestratorRequest) -> AppResult<OrchestratorAccepted> {
    let store = pipeline.store.as_ref();
    let job = store.get_job_by_id(request.job_id).await?;
    if job.job_type != JobType::FullRefresh {
        return Err(AppError::InvalidInput(format!(
            "job {} is {}, not {}",
            job.id,
            job.job_type,
            JobType::FullRefresh
        )));
    }

    let chunks = match request.chunks {
        Some(chunks) => chunks,
        None => job.config().chunks(Utc::now()),
    };
    let start_index = request.start_index.unwrap_or(0);
    if start_index > chunks.len() {
        return Err(AppError::InvalidInput(format!(
            "startIndex {} is past the last chunk ({})",
            start_index,
            chunks.len()
        )));
    }

    // A resumed run keeps the progress of the chunks already dispatched
    store.start_job(JobType::FullRefresh, start_index == 0).await?;

    let accepted = OrchestratorAccepted {
        success: true,
        total_chunks: chunks.len(),
        start_index,
    };

    tracing::info!(
        job_id = %job.id,
        total_chunks = chunks.len(),
        start_index,
        "Full refresh dispatch starting"
    );

    let pipeline = pipeline.clone();
    let job_id = job.id;
    tokio::spawn(async move {
        let report = dispatch_chunks(&pipeline, job_id, &chunks, start_index).await;
        tracing::info!(
            job_id = %job_id,
            dispatched = report.dispatched,
            dispatch_errors = report.dispatch_errors,
            halted_at = ?report.halted_at,
            "Full refresh dispatch finished"
        );
    });

    Ok(accepted)
}

/// The dispatch loop. Runs to completion unless the job row is flipped to
/// `idle` or `failed`.
pub async fn dispatch_chunks(
    pipeline: &Pipeline,
    job_id: Uuid,
    chunks: &[WorkChunk],
    start_index: usize,
) -> DispatchReport {
    let store = pipeline.store.as_ref();
    let settings = &pipeline.settings;
    let poll_every = settings.status_poll_every.max(1);
    let budget = TimeBudget::unbounded();
    let mut report = DispatchReport::default();

    for (index, chunk) in chunks.iter().enumerate().skip(start_index) {
        let since_start = index - start_index;
        if since_start > 0 && since_start % poll_every == 0 {
            checkpoint(pipeline, index).await;
            if stopped(pipeline, job_id).await {
                tracing::info!(job_id = %job_id, index, "Job stopped by operator, halting dispatch");
                report.halted_at = Some(index);
                return report;
            }
        }

        let body = serde_json::json!({ "jobId": job_id, "chunk": chunk });
        match pipeline.dispatcher.dispatch(FULL_REFRESH_TITLES, body).await {
            Ok(()) => report.dispatched += 1,
            Err(e) => {
                tracing::error!(index, error = %e, "Chunk dispatch failed");
                report.dispatch_errors += 1;
            }
        }

        tokio::time::sleep(settings.dispatch_delay).await;
    }

    checkpoint(pipeline, chunks.len()).await;

    // A stop issued after the last poll boundary still wins over completion
    if stopped(pipeline, job_id).await {
        tracing::info!(job_id = %job_id, "Job stopped by operator after the last poll, keeping its status");
        report.halted_at = Some(chunks.len());
        return report;
    }

    // Completed means every chunk was handed off; workers may still be running
    let finish = JobFinish {
        status: JobStatus::Completed,
        total_titles_processed: None,
        duration_seconds: budget.elapsed_seconds(),
        error_message: None,
        next_run_at: None,
    };
    if let Err(e) = store.finish_job(JobType::FullRefresh, &finish).await {
        tracing::error!(error = %e, "Could not record dispatch completion");
    }

    report
}

async fn stopped(pipeline: &Pipeline, job_id: Uuid) -> bool {
    match pipeline.store.get_job_by_id(job_id).await {
        Ok(job) => job.status.halts_dispatch(),
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Status poll failed, continuing");
            false
        }
    }
}

async fn checkpoint(pipeline: &Pipeline, next_index: usize) {
    let patch = serde_json::json!({ "next_chunk_index": next_index });
    if let Err(e) = pipeline
        .store
        .merge_job_configuration(JobType::FullRefresh, patch)
        .await
    {
        tracing::warn!(next_index, error = %e, "Could not checkpoint dispatch position");
    }
}
