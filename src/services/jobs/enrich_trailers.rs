use crate::{
    db::{JobStore, TitleStore},
    error::AppResult,
    models::{JobFinish, JobStatus, JobType, TitleRow, TitleUpdate},
    services::{
        budget::TimeBudget,
        jobs::{
            duration_seconds,
            enrich_details::{EnrichReport, EnrichRequest},
            record_failure, Pipeline,
        },
        video_search::{best_search_hit, catalog_trailer, trailer_query, youtube_url},
    },
};

/// Catalog videos first, then keyword search when a search backend is configured.
/// `Ok(None)` means both came up empty.
async fn find_trailer(pipeline: &Pipeline, row: &TitleRow) -> AppResult<Option<String>> {
    if let Some(tmdb_id) = row.tmdb_id {
        let videos = pipeline.catalog.videos(row.kind, tmdb_id).await?;
        if let Some(url) = catalog_trailer(&videos) {
            return Ok(Some(url));
        }
    }

    let Some(search) = &pipeline.video_search else {
        return Ok(None);
    };

    let hits = search.search(&trailer_query(&row.name, row.release_year)).await?;
    Ok(best_search_hit(&hits).map(|hit| youtube_url(&hit.video_id)))
}

/// Entry point of `enrich-title-trailers`
pub async fn run(pipeline: &Pipeline, request: EnrichRequest) -> AppResult<EnrichReport> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::from_request(
        request.budget_seconds,
        Some(pipeline.settings.trailers_budget),
    );

    let job = store.start_job(JobType::EnrichTrailers, false).await?;
    let batch_size = request.batch_size.unwrap_or(job.config().batch_size).max(1);

    match enrich(pipeline, batch_size, &budget).await {
        Ok(report) => {
            let finish = JobFinish {
                status: JobStatus::Completed,
                total_titles_processed: None,
                duration_seconds: budget.elapsed_seconds(),
                error_message: None,
                next_run_at: None,
            };
            store.finish_job(JobType::EnrichTrailers, &finish).await?;
            Ok(report)
        }
        Err(e) => {
            record_failure(store, JobType::EnrichTrailers, &e, &budget, None).await;
            Err(e)
        }
    }
}

async fn enrich(pipeline: &Pipeline, batch_size: i64, budget: &TimeBudget) -> AppResult<EnrichReport> {
    let store = pipeline.store.as_ref();
    let rows = store.titles_missing_trailers(batch_size).await?;
    let mut report = EnrichReport {
        selected: rows.len(),
        ..EnrichReport::default()
    };

    for row in &rows {
        if budget.exhausted() {
            report.budget_exhausted = true;
            break;
        }
        report.processed += 1;

        // Lookup failures leave the row unchecked so a later run retries it
        let trailer_url = match find_trailer(pipeline, row).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(title_id = %row.id, error = %e, "Trailer lookup failed");
                report.failed += 1;
                continue;
            }
        };

        let found = trailer_url.is_some();
        let update = TitleUpdate {
            trailer_url,
            trailer_checked: true,
            ..TitleUpdate::default()
        };
        store.update_title(row.id, &update).await?;

        if found {
            report.updated += 1;
        } else {
            report.skipped += 1;
        }
    }

    if report.processed > 0 {
        store
            .increment_titles_processed(JobType::EnrichTrailers, report.processed as i64)
            .await?;
    }

    tracing::info!(
        selected = report.selected,
        processed = report.processed,
        found = report.updated,
        not_found = report.skipped,
        failed = report.failed,
        budget_exhausted = report.budget_exhausted,
        "Trailer enrichment finished"
    );

    report.success = true;
    report.duration = duration_seconds(budget.elapsed());
    Ok(report)
}
