use chrono::{Days, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::JobStore,
    error::AppResult,
    models::{JobConfiguration, JobFinish, JobStatus, JobType},
    services::{
        budget::TimeBudget,
        jobs::{
            duration_seconds, next_daily_run, record_failure,
            sweep::{run_sweep, Combination, SweepReport},
            Pipeline,
        },
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDeltaRequest {
    /// Overrides the configured lookback window
    #[serde(default)]
    pub lookback_days: Option<i64>,
    #[serde(default)]
    pub budget_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDeltaResponse {
    pub success: bool,
    pub since: String,
    #[serde(flatten)]
    pub report: SweepReport,
    pub next_run_at: String,
    pub duration: f64,
}

fn combinations(config: &JobConfiguration, lookback_days: i64) -> Vec<Combination> {
    let today = Utc::now().date_naive();
    let since = today
        .checked_sub_days(Days::new(lookback_days.max(0) as u64))
        .unwrap_or(today);

    let mut combinations = Vec::with_capacity(config.genre_ids.len() * config.languages.len());
    for genre_id in &config.genre_ids {
        for language in &config.languages {
            combinations.push(Combination {
                genre_id: *genre_id,
                language_code: language.clone(),
                years: None,
                released_since: Some(since),
            });
        }
    }
    combinations
}

/// Entry point of `sync-titles-delta`
pub async fn run(pipeline: &Pipeline, request: SyncDeltaRequest) -> AppResult<SyncDeltaResponse> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::from_request(request.budget_seconds, None);
    let next_run_at = next_daily_run(Utc::now());

    let job = store.start_job(JobType::SyncDelta, true).await?;
    let config = job.config();
    let lookback_days = request.lookback_days.unwrap_or(config.lookback_days);
    let combinations = combinations(&config, lookback_days);
    let since = combinations
        .first()
        .and_then(|c| c.released_since)
        .map(|d| d.to_string())
        .unwrap_or_default();

    tracing::info!(
        lookback_days,
        combinations = combinations.len(),
        "Delta sync started"
    );

    match run_sweep(pipeline, JobType::SyncDelta, &config, &combinations, &budget).await {
        Ok(report) => {
            let finish = JobFinish {
                status: JobStatus::Completed,
                total_titles_processed: Some(report.batch.processed() as i64),
                duration_seconds: budget.elapsed_seconds(),
                error_message: None,
                next_run_at: Some(next_run_at),
            };
            store.finish_job(JobType::SyncDelta, &finish).await?;

            Ok(SyncDeltaResponse {
                success: true,
                since,
                report,
                next_run_at: next_run_at.to_rfc3339(),
                duration: duration_seconds(budget.elapsed()),
            })
        }
        Err(e) => {
            record_failure(store, JobType::SyncDelta, &e, &budget, Some(next_run_at)).await;
            Err(e)
        }
    }
}
