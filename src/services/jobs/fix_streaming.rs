//! Availability repair.
//!
//! A title joined to every active service (or all but one) is treated as
//! unverified: its availability is re-fetched from the catalog's watch
//! providers and replaced with the confirmed set.
use serde::{Deserialize, Serialize};

use crate::{
    db::{JobStore, TitleStore},
    error::AppResult,
    models::{
        streaming_service::resolve_provider_services, JobFinish, JobStatus, JobType,
        StreamingService, DEFAULT_REGION,
    },
    services::{
        budget::TimeBudget,
        jobs::{duration_seconds, record_failure, Pipeline},
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixStreamingRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub batch_size: Option<i64>,
    #[serde(default)]
    pub budget_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixStreamingReport {
    pub success: bool,
    pub dry_run: bool,
    pub total_services: usize,
    /// Minimum availability count treated as corrupted
    pub threshold: i64,
    pub checked: usize,
    /// Titles rewritten with a confirmed provider set, or that would be on a dry run
    pub fixed: usize,
    /// Titles whose provider lookup confirmed no active service
    pub no_providers: usize,
    pub failed: usize,
    /// Corrupted titles still left after this run
    pub remaining: i64,
    pub budget_exhausted: bool,
    pub duration: f64,
    /// Set on dry runs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub would_fix: Option<usize>,
}

/// Entry point of `fix-streaming-availability`
pub async fn run(pipeline: &Pipeline, request: FixStreamingRequest) -> AppResult<FixStreamingReport> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::from_request(
        request.budget_seconds,
        Some(pipeline.settings.repair_budget),
    );

    let services = store.active_services().await?;
    if services.len() < 2 {
        tracing::info!(
            total_services = services.len(),
            "Fewer than two active services, nothing can look corrupted"
        );
        return Ok(FixStreamingReport {
            success: true,
            dry_run: request.dry_run,
            total_services: services.len(),
            duration: duration_seconds(budget.elapsed()),
            ..FixStreamingReport::default()
        });
    }

    if request.dry_run {
        return repair(pipeline, &services, &request, &budget).await;
    }

    store.start_job(JobType::FixStreaming, false).await?;

    match repair(pipeline, &services, &request, &budget).await {
        Ok(report) => {
            // idle tells the scheduler another pass is needed
            let status = if report.remaining > 0 {
                JobStatus::Idle
            } else {
                JobStatus::Completed
            };
            let finish = JobFinish {
                status,
                total_titles_processed: None,
                duration_seconds: budget.elapsed_seconds(),
                error_message: None,
                next_run_at: None,
            };
            store.finish_job(JobType::FixStreaming, &finish).await?;
            Ok(report)
        }
        Err(e) => {
            record_failure(store, JobType::FixStreaming, &e, &budget, None).await;
            Err(e)
        }
    }
}

async fn repair(
    pipeline: &Pipeline,
    services: &[StreamingService],
    request: &FixStreamingRequest,
    budget: &TimeBudget,
) -> AppResult<FixStreamingReport> {
    let store = pipeline.store.as_ref();
    let threshold = services.len() as i64 - 1;
    let batch_size = match request.batch_size {
        Some(size) => size,
        None => store.get_job(JobType::FixStreaming).await?.config().batch_size,
    }
    .max(1);

    let rows = store
        .titles_with_service_count_at_least(DEFAULT_REGION, threshold, batch_size)
        .await?;

    let mut report = FixStreamingReport {
        dry_run: request.dry_run,
        total_services: services.len(),
        threshold,
        ..FixStreamingReport::default()
    };

    tracing::info!(
        total_services = services.len(),
        threshold,
        candidates = rows.len(),
        dry_run = request.dry_run,
        "Availability repair started"
    );

    for row in &rows {
        if budget.exhausted() {
            report.budget_exhausted = true;
            break;
        }
        let Some(tmdb_id) = row.tmdb_id else {
            continue;
        };
        report.checked += 1;

        let provider_ids = match pipeline
            .catalog
            .watch_providers(row.kind, tmdb_id, DEFAULT_REGION)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(title_id = %row.id, tmdb_id, error = %e, "Watch provider fetch failed");
                report.failed += 1;
                continue;
            }
        };

        let confirmed = resolve_provider_services(&provider_ids, services);
        if confirmed.is_empty() {
            report.no_providers += 1;
        } else {
            report.fixed += 1;
        }

        if !request.dry_run {
            store
                .replace_availability(row.id, DEFAULT_REGION, &confirmed)
                .await?;
            tracing::debug!(
                title_id = %row.id,
                providers = provider_ids.len(),
                confirmed = confirmed.len(),
                "Availability replaced"
            );
        }
    }

    if !request.dry_run && report.checked > report.failed {
        store
            .increment_titles_processed(
                JobType::FixStreaming,
                (report.checked - report.failed) as i64,
            )
            .await?;
    }

    report.remaining = store
        .count_titles_with_service_count_at_least(DEFAULT_REGION, threshold)
        .await?;
    if request.dry_run {
        report.would_fix = Some(report.fixed);
    }
    report.success = true;
    report.duration = duration_seconds(budget.elapsed());

    tracing::info!(
        checked = report.checked,
        fixed = report.fixed,
        no_providers = report.no_providers,
        failed = report.failed,
        remaining = report.remaining,
        "Availability repair finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewTitle, TitleKind};
    use crate::services::{catalog::MockCatalogClient, dispatch::MockDispatcher};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        store: MemoryStore,
        netflix: StreamingService,
        title_id: Uuid,
    }

    async fn corrupted_title() -> Fixture {
        let store = MemoryStore::seeded();
        let netflix = StreamingService::new("Netflix");
        let services = vec![
            netflix.clone(),
            StreamingService::new("Hulu"),
            StreamingService::new("Max"),
        ];
        for service in &services {
            store.add_service(service.clone()).await;
        }

        let title = store
            .upsert_title(&NewTitle {
                tmdb_id: 550,
                kind: TitleKind::Movie,
                name: "Fight Club".to_string(),
                original_name: None,
                overview: None,
                release_year: Some(1999),
                runtime: Some(139),
                original_language: Some("en".to_string()),
                popularity: Some(60.0),
                poster_path: None,
                backdrop_path: None,
                episode_run_time: None,
                genre_ids: vec![],
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = services.iter().map(|s| s.id).collect();
        store.link_services(title.id, &ids, DEFAULT_REGION).await.unwrap();

        Fixture {
            store,
            netflix,
            title_id: title.id,
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

    fn providers(ids: Vec<i64>) -> MockCatalogClient {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_watch_providers()
            .withf(|_, id, region| *id == 550 && region == "US")
            .returning(move |_, _, _| Ok(ids.clone()));
        catalog
    }

    #[tokio::test]
    async fn test_repair_keeps_only_confirmed_service() {
        let fixture = corrupted_title().await;
        // 8 = Netflix, 2 = a rental store with no internal service
        let pipeline = pipeline(fixture.store.clone(), providers(vec![8, 2]));

        let report = run(&pipeline, FixStreamingRequest::default()).await.unwrap();

        assert_eq!(report.threshold, 2);
        assert_eq!(report.fixed, 1);
        assert_eq!(report.remaining, 0);
        let linked = fixture
            .store
            .availability(fixture.title_id, DEFAULT_REGION)
            .await
            .unwrap();
        assert_eq!(linked, vec![fixture.netflix.id]);
        let job = fixture.store.get_job(JobType::FixStreaming).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fixture = corrupted_title().await;
        let pipeline = pipeline(fixture.store.clone(), providers(vec![8]));

        let report = run(
            &pipeline,
            FixStreamingRequest {
                dry_run: true,
                ..FixStreamingRequest::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.would_fix, Some(1));
        assert_eq!(report.remaining, 1);
        let linked = fixture
            .store
            .availability(fixture.title_id, DEFAULT_REGION)
            .await
            .unwrap();
        assert_eq!(linked.len(), 3);
        let job = fixture.store.get_job(JobType::FixStreaming).await.unwrap();
        assert_eq!(job.status, JobStatus::Idle);
        assert!(job.last_run_at.is_none());
    }

    #[tokio::test]
    async fn test_no_providers_clears_availability() {
        let fixture = corrupted_title().await;
        let pipeline = pipeline(fixture.store.clone(), providers(vec![]));

        let report = run(&pipeline, FixStreamingRequest::default()).await.unwrap();

        assert_eq!(report.no_providers, 1);
        assert!(fixture
            .store
            .availability(fixture.title_id, DEFAULT_REGION)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_leftover_work_leaves_job_idle() {
        let fixture = corrupted_title().await;
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_watch_providers()
            .returning(|_, _, _| Err(crate::error::AppError::ExternalApi("timeout".to_string())));

        let report = run(&pipeline(fixture.store.clone(), catalog), FixStreamingRequest::default())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
        let job = fixture.store.get_job(JobType::FixStreaming).await.unwrap();
        assert_eq!(job.status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_single_service_is_never_corrupted() {
        let store = MemoryStore::seeded();
        store.add_service(StreamingService::new("Netflix")).await;
        let report = run(&pipeline(store, MockCatalogClient::new()), FixStreamingRequest::default())
            .await
            .unwrap();
        assert_eq!(report.total_services, 1);
        assert_eq!(report.checked, 0);
    }

    /// Catalog whose provider lookups each take 20 seconds and confirm Netflix
    struct SlowProviders;

    #[async_trait::async_trait]
    impl crate::services::catalog::CatalogClient for SlowProviders {
        async fn discover(
            &self,
            filter: &crate::services::catalog::DiscoverFilter,
        ) -> AppResult<crate::models::DiscoverPage> {
            Ok(crate::models::DiscoverPage::empty(filter.page))
        }

        async fn title_details(&self, _kind: TitleKind, tmdb_id: i64) -> AppResult<crate::models::TitleDetails> {
            Ok(crate::models::TitleDetails {
                id: tmdb_id,
                ..crate::models::TitleDetails::default()
            })
        }

        async fn videos(&self, _kind: TitleKind, _tmdb_id: i64) -> AppResult<Vec<crate::models::CatalogVideo>> {
            Ok(Vec::new())
        }

        async fn watch_providers(&self, _kind: TitleKind, _tmdb_id: i64, _region: &str) -> AppResult<Vec<i64>> {
            tokio::time::sleep(std::time::Duration::from_secs(20)).await;
            Ok(vec![8])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_leaves_remaining_rows_for_next_run() {
        let store = MemoryStore::seeded();
        let services = vec![
            StreamingService::new("Netflix"),
            StreamingService::new("Hulu"),
            StreamingService::new("Max"),
        ];
        for service in &services {
            store.add_service(service.clone()).await;
        }
        let ids: Vec<Uuid> = services.iter().map(|s| s.id).collect();
        for tmdb_id in 1..=5 {
            let title = store
                .upsert_title(&NewTitle {
                    tmdb_id,
                    kind: TitleKind::Movie,
                    name: format!("Title {}", tmdb_id),
                    original_name: None,
                    overview: None,
                    release_year: Some(2015),
                    runtime: None,
                    original_language: Some("en".to_string()),
                    popularity: Some(100.0 - tmdb_id as f64),
                    poster_path: None,
                    backdrop_path: None,
                    episode_run_time: None,
                    genre_ids: vec![],
                })
                .await
                .unwrap();
            store.link_services(title.id, &ids, DEFAULT_REGION).await.unwrap();
        }
        let pipeline = Pipeline::new(
            Arc::new(store.clone()),
            Arc::new(SlowProviders),
            None,
            Arc::new(MockDispatcher::new()),
        );

        // lookups start at 0s, 20s and 40s; the check at 60s is past the 55s budget
        let report = run(&pipeline, FixStreamingRequest::default()).await.unwrap();

        assert!(report.budget_exhausted);
        assert_eq!(report.checked, 3);
        assert_eq!(report.fixed, 3);
        assert_eq!(report.remaining, 2);
        let job = store.get_job(JobType::FixStreaming).await.unwrap();
        assert_eq!(job.status, JobStatus::Idle);
        assert_eq!(job.total_titles_processed, 3);
    }
}
