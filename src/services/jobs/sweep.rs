use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::AppResult,
    models::{JobConfiguration, JobType, TitleKind, WorkChunk},
    services::{
        budget::TimeBudget,
        catalog::{fetch_pages, DiscoverFilter},
        jobs::{Pipeline, ProgressCounter},
        upsert::{BatchReport, UpsertWriter},
    },
};

/// One discover combination; each is fetched once for movies and once for series
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub genre_id: i64,
    pub language_code: String,
    pub years: Option<(i32, i32)>,
    pub released_since: Option<NaiveDate>,
}

impl Combination {
    fn filter(&self, kind: TitleKind, config: &JobConfiguration) -> DiscoverFilter {
        DiscoverFilter {
            genre_id: Some(self.genre_id),
            original_language: Some(self.language_code.clone()),
            year_range: self.years,
            released_since: self.released_since,
            min_rating: config.min_rating,
            min_vote_count: config.min_vote_count,
            ..DiscoverFilter::new(kind)
        }
    }
}

impl From<&WorkChunk> for Combination {
    fn from(chunk: &WorkChunk) -> Self {
        Self {
            genre_id: chunk.genre_id,
            language_code: chunk.language_code.clone(),
            years: Some((chunk.year, chunk.year)),
            released_since: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    #[serde(flatten)]
    pub batch: BatchReport,
    pub combinations: usize,
    pub budget_exhausted: bool,
}

/// Discovers and writes every combination in order, recording progress on
/// `job_type`'s row. Record failures are counted, store failures abort.
pub async fn run_sweep(
    pipeline: &Pipeline,
    job_type: JobType,
    config: &JobConfiguration,
    combinations: &[Combination],
    budget: &TimeBudget,
) -> AppResult<SweepReport> {
    let store = pipeline.store.as_ref();
    let writer = UpsertWriter::for_sweep(store, config.link_all_services).await?;
    let mut progress = ProgressCounter::new(job_type, pipeline.settings.progress_every);
    let mut report = SweepReport::default();

    for combination in combinations {
        if budget.exhausted() {
            tracing::info!(
                job_type = %job_type,
                completed = report.combinations,
                remaining = combinations.len() - report.combinations,
                "Time budget exhausted, stopping sweep"
            );
            report.budget_exhausted = true;
            break;
        }

        for kind in [TitleKind::Movie, TitleKind::Series] {
            let filter = combination.filter(kind, config);
            let results = fetch_pages(pipeline.catalog.as_ref(), &filter, config.max_pages).await;

            for result in &results {
                let outcome = writer.write_result(result, kind).await;
                report.batch.record(&outcome);
                if outcome.is_written() {
                    progress.add(store, 1).await?;
                }
            }
        }

        report.combinations += 1;
        tokio::time::sleep(pipeline.settings.combination_delay).await;
    }

    progress.flush(store).await?;

    tracing::info!(
        job_type = %job_type,
        combinations = report.combinations,
        inserted = report.batch.inserted,
        updated = report.batch.updated,
        skipped = report.batch.skipped,
        failed = report.batch.failed,
        "Sweep finished"
    );

    Ok(report)
}
