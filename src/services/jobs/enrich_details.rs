use serde::{Deserialize, Serialize};

use crate::{
    db::{JobStore, TitleStore},
    error::AppResult,
    models::{JobFinish, JobStatus, JobType, TitleDetails, TitleKind, TitleRow, TitleUpdate},
    services::{
        budget::TimeBudget,
        jobs::{duration_seconds, record_failure, Pipeline},
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichRequest {
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub budget_seconds: Option<u64>,
}

/// Response of both enrichment workers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichReport {
    pub success: bool,
    pub selected: usize,
    /// Rows started; a started row is always finished
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub budget_exhausted: bool,
    pub duration: f64,
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fields the details payload can fill on `row`; existing values are never overwritten
pub fn details_delta(row: &TitleRow, details: &TitleDetails) -> TitleUpdate {
    let mut update = TitleUpdate::default();

    if row.poster_path.is_none() {
        update.poster_path = present(&details.poster_path);
    }
    if row.backdrop_path.is_none() {
        update.backdrop_path = present(&details.backdrop_path);
    }
    if row.overview.is_none() {
        update.overview = present(&details.overview);
    }
    match row.kind {
        TitleKind::Movie if row.runtime.is_none() => {
            update.runtime = details.runtime.filter(|r| *r > 0);
        }
        TitleKind::Series if row.episode_run_time.is_none() => {
            update.episode_run_time = details.episode_run_time.iter().copied().find(|r| *r > 0);
        }
        _ => {}
    }

    update
}

/// Entry point of `enrich-title-details-batch`
pub async fn run(pipeline: &Pipeline, request: EnrichRequest) -> AppResult<EnrichReport> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::from_request(
        request.budget_seconds,
        Some(pipeline.settings.details_budget),
    );

    let job = store.start_job(JobType::EnrichDetails, false).await?;
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
            store.finish_job(JobType::EnrichDetails, &finish).await?;
            Ok(report)
        }
        Err(e) => {
            record_failure(store, JobType::EnrichDetails, &e, &budget, None).await;
            Err(e)
        }
    }
}

async fn enrich(pipeline: &Pipeline, batch_size: i64, budget: &TimeBudget) -> AppResult<EnrichReport> {
    let store = pipeline.store.as_ref();
    let rows = store.titles_missing_details(batch_size).await?;
    let mut report = EnrichReport {
        selected: rows.len(),
        ..EnrichReport::default()
    };

    for row in &rows {
        if budget.exhausted() {
            report.budget_exhausted = true;
            break;
        }
        let Some(tmdb_id) = row.tmdb_id else {
            report.skipped += 1;
            continue;
        };
        report.processed += 1;

        let details = match pipeline.catalog.title_details(row.kind, tmdb_id).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(title_id = %row.id, tmdb_id, error = %e, "Details fetch failed");
                report.failed += 1;
                continue;
            }
        };

        // Stamped on every successful lookup, filled or not
        let delta = details_delta(row, &details);
        let filled = !delta.is_empty();
        let update = TitleUpdate {
            details_checked: true,
            ..delta
        };
        store.update_title(row.id, &update).await?;
        if filled {
            report.updated += 1;
        } else {
            report.skipped += 1;
        }
    }

    if report.processed > 0 {
        store
            .increment_titles_processed(JobType::EnrichDetails, report.processed as i64)
            .await?;
    }

    tracing::info!(
        selected = report.selected,
        processed = report.processed,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        budget_exhausted = report.budget_exhausted,
        "Details enrichment finished"
    );

    report.success = true;
    report.duration = duration_seconds(budget.elapsed());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::error::AppError;
    use crate::models::NewTitle;
    use crate::services::{catalog::MockCatalogClient, dispatch::MockDispatcher};
    use std::sync::Arc;
    use std::time::Duration;

    fn new_title(tmdb_id: i64, popularity: f64) -> NewTitle {
        NewTitle {
            tmdb_id,
            kind: TitleKind::Movie,
            name: format!("Title {}", tmdb_id),
            original_name: None,
            overview: None,
            release_year: Some(2020),
            runtime: None,
            original_language: Some("en".to_string()),
            popularity: Some(popularity),
            poster_path: None,
            backdrop_path: None,
            episode_run_time: None,
            genre_ids: vec![],
        }
    }

    fn details(id: i64) -> TitleDetails {
        TitleDetails {
            id,
            runtime: Some(120),
            poster_path: Some(format!("/p{}.jpg", id)),
            backdrop_path: Some(format!("/b{}.jpg", id)),
            ..TitleDetails::default()
        }
    }

    fn pipeline(store: MemoryStore, catalog: MockCatalogClient) -> Pipeline {
        Pipeline::new(
            Arc::new(store),
            Arc::new(catalog),
            None,
            Arc::new(MockDispatcher::new()),
        )
    }

    #[test]
    fn test_delta_fills_only_gaps() {
        let row = TitleRow {
            id: uuid::Uuid::new_v4(),
            tmdb_id: Some(1),
            kind: TitleKind::Series,
            name: "Dark".to_string(),
            original_name: None,
            overview: Some("Existing".to_string()),
            release_year: Some(2017),
            runtime: None,
            original_language: Some("de".to_string()),
            popularity: Some(10.0),
            poster_path: Some("/kept.jpg".to_string()),
            backdrop_path: None,
            trailer_url: None,
            trailer_checked: false,
            episode_run_time: None,
            details_checked: false,
        };
        let details = TitleDetails {
            id: 1,
            overview: Some("New".to_string()),
            runtime: Some(999),
            episode_run_time: vec![0, 55],
            poster_path: Some("/new.jpg".to_string()),
            backdrop_path: Some("/b.jpg".to_string()),
            ..TitleDetails::default()
        };

        let update = details_delta(&row, &details);
        assert_eq!(update.poster_path, None);
        assert_eq!(update.overview, None);
        assert_eq!(update.backdrop_path.as_deref(), Some("/b.jpg"));
        assert_eq!(update.runtime, None);
        assert_eq!(update.episode_run_time, Some(55));
    }

    #[tokio::test]
    async fn test_most_popular_rows_first_and_counted() {
        let store = MemoryStore::seeded();
        for (id, popularity) in [(1, 5.0), (2, 50.0), (3, 500.0)] {
            store.upsert_title(&new_title(id, popularity)).await.unwrap();
        }

        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_title_details()
            .times(2)
            .withf(|_, id| *id == 3 || *id == 2)
            .returning(|_, id| Ok(details(id)));

        let report = run(
            &pipeline(store.clone(), catalog),
            EnrichRequest {
                batch_size: Some(2),
                budget_seconds: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.updated, 2);
        let enriched = store.title_by_tmdb_id(3).await.unwrap();
        assert_eq!(enriched.runtime, Some(120));
        assert!(!enriched.needs_details());
        let job = store.get_job(JobType::EnrichDetails).await.unwrap();
        assert_eq!(job.total_titles_processed, 2);
        assert_eq!(job.status, JobStatus::Completed);
    }

    /// Catalog whose detail lookups each take 20 seconds
    struct SlowCatalog;

    #[async_trait::async_trait]
    impl crate::services::catalog::CatalogClient for SlowCatalog {
        async fn discover(
            &self,
            filter: &crate::services::catalog::DiscoverFilter,
        ) -> AppResult<crate::models::DiscoverPage> {
            Ok(crate::models::DiscoverPage::empty(filter.page))
        }

        async fn title_details(&self, _kind: TitleKind, tmdb_id: i64) -> AppResult<TitleDetails> {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok(details(tmdb_id))
        }

        async fn videos(&self, _kind: TitleKind, _tmdb_id: i64) -> AppResult<Vec<crate::models::CatalogVideo>> {
            Ok(Vec::new())
        }

        async fn watch_providers(&self, _kind: TitleKind, _tmdb_id: i64, _region: &str) -> AppResult<Vec<i64>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_before_next_row() {
        let store = MemoryStore::seeded();
        for id in 1..=6 {
            store.upsert_title(&new_title(id, 100.0 - id as f64)).await.unwrap();
        }
        let pipeline = Pipeline::new(
            Arc::new(store.clone()),
            Arc::new(SlowCatalog),
            None,
            Arc::new(MockDispatcher::new()),
        );

        // rows start at 0s, 20s and 40s; the check at 60s is past the 55s budget
        let report = run(&pipeline, EnrichRequest::default()).await.unwrap();

        assert!(report.budget_exhausted);
        assert_eq!(report.selected, 6);
        assert_eq!(report.processed, 3);
        assert_eq!(report.updated, 3);
        for id in 1..=3 {
            assert!(!store.title_by_tmdb_id(id).await.unwrap().needs_details());
        }
        for id in 4..=6 {
            let untouched = store.title_by_tmdb_id(id).await.unwrap();
            assert_eq!(untouched.poster_path, None);
            assert_eq!(untouched.runtime, None);
        }
    }

    #[tokio::test]
    async fn test_unfillable_row_does_not_block_queue() {
        let store = MemoryStore::seeded();
        store.upsert_title(&new_title(1, 100.0)).await.unwrap();
        store.upsert_title(&new_title(2, 1.0)).await.unwrap();

        let mut catalog = MockCatalogClient::new();
        catalog.expect_title_details().returning(|_, id| {
            if id == 1 {
                Ok(TitleDetails {
                    id,
                    ..TitleDetails::default()
                })
            } else {
                Ok(details(id))
            }
        });
        let pipeline = pipeline(store.clone(), catalog);
        let request = EnrichRequest {
            batch_size: Some(1),
            budget_seconds: None,
        };

        let first = run(&pipeline, request.clone()).await.unwrap();
        assert_eq!(first.skipped, 1);
        let second = run(&pipeline, request.clone()).await.unwrap();
        assert_eq!(second.updated, 1);

        let empty = store.title_by_tmdb_id(1).await.unwrap();
        assert!(empty.needs_details());
        assert!(empty.details_checked);
        assert!(!store.title_by_tmdb_id(2).await.unwrap().needs_details());
        assert!(store.titles_missing_details(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_failure_counts_row_and_continues() {
        let store = MemoryStore::seeded();
        store.upsert_title(&new_title(1, 2.0)).await.unwrap();
        store.upsert_title(&new_title(2, 1.0)).await.unwrap();

        let mut catalog = MockCatalogClient::new();
        catalog.expect_title_details().returning(|_, id| {
            if id == 1 {
                Err(AppError::ExternalApi("status 404".to_string()))
            } else {
                Ok(details(id))
            }
        });

        let report = run(&pipeline(store.clone(), catalog), EnrichRequest::default())
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert!(store.title_by_tmdb_id(1).await.unwrap().needs_details());
    }
}
