use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, LogStore, TitleStore, TitleUpsert};
use crate::{
    error::{AppError, AppResult},
    models::{
        Job, JobFinish, JobStatus, JobType, NewSystemLog, NewTitle, StreamingService, SystemLog,
        TitleRow, TitleUpdate,
    },
};

/// In-process store with the same keys and conflict rules as the Postgres
/// schema. Used by tests and local dry runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobType, Job>,
    titles: HashMap<Uuid, TitleRow>,
    /// catalog genre id -> internal genre id
    genres: HashMap<i64, Uuid>,
    title_genres: BTreeSet<(Uuid, Uuid)>,
    title_languages: BTreeSet<(Uuid, String)>,
    services: Vec<StreamingService>,
    availability: BTreeSet<(Uuid, Uuid, String)>,
    logs: Vec<SystemLog>,
}

impl MemoryState {
    fn job_mut(&mut self, job_type: JobType) -> AppResult<&mut Job> {
        self.jobs
            .get_mut(&job_type)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_type)))
    }

    fn active_service_count(&self, title_id: Uuid, region: &str) -> i64 {
        self.availability
            .iter()
            .filter(|(t, s, r)| {
                *t == title_id
                    && r == region
                    && self.services.iter().any(|svc| svc.id == *s && svc.is_active)
            })
            .count() as i64
    }

    fn by_popularity(&self, mut rows: Vec<TitleRow>, limit: i64) -> Vec<TitleRow> {
        rows.sort_by(|a, b| {
            b.popularity
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.popularity.unwrap_or(f64::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(limit.max(0) as usize);
        rows
    }
}

impl MemoryStore {
    /// Store with one idle row per job type, as the migration seeds them
    pub fn seeded() -> Self {
        let state = MemoryState {
            jobs: JobType::ALL.into_iter().map(|t| (t, Job::seed(t))).collect(),
            ..MemoryState::default()
        };
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn add_genre(&self, tmdb_genre_id: i64) -> Uuid {
        let mut state = self.inner.write().await;
        *state.genres.entry(tmdb_genre_id).or_insert_with(Uuid::new_v4)
    }

    pub async fn add_service(&self, service: StreamingService) {
        self.inner.write().await.services.push(service);
    }

    pub async fn set_job_configuration(&self, job_type: JobType, configuration: serde_json::Value) {
        if let Some(job) = self.inner.write().await.jobs.get_mut(&job_type) {
            job.configuration = configuration;
        }
    }

    pub async fn title_count(&self) -> usize {
        self.inner.read().await.titles.len()
    }

    pub async fn title_by_tmdb_id(&self, tmdb_id: i64) -> Option<TitleRow> {
        self.inner
            .read()
            .await
            .titles
            .values()
            .find(|t| t.tmdb_id == Some(tmdb_id))
            .cloned()
    }

    pub async fn genre_link_count(&self, title_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .title_genres
            .iter()
            .filter(|(t, _)| *t == title_id)
            .count()
    }

    pub async fn language_links(&self, title_id: Uuid) -> Vec<String> {
        self.inner
            .read()
            .await
            .title_languages
            .iter()
            .filter(|(t, _)| *t == title_id)
            .map(|(_, code)| code.clone())
            .collect()
    }

    pub async fn logs(&self) -> Vec<SystemLog> {
        self.inner.read().await.logs.clone()
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, job_type: JobType) -> AppResult<Job> {
        self.inner
            .read()
            .await
            .jobs
            .get(&job_type)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_type)))
    }

    async fn get_job_by_id(&self, id: Uuid) -> AppResult<Job> {
        self.inner
            .read()
            .await
            .jobs
            .values()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    async fn list_jobs(&self) -> AppResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.job_type.as_str());
        Ok(jobs)
    }

    async fn start_job(&self, job_type: JobType, reset_progress: bool) -> AppResult<Job> {
        let mut state = self.inner.write().await;
        let job = state.job_mut(job_type)?;
        job.status = JobStatus::Running;
        job.last_run_at = Some(Utc::now());
        job.error_message = None;
        if reset_progress {
            job.total_titles_processed = 0;
        }
        Ok(job.clone())
    }

    async fn set_job_status(&self, job_type: JobType, status: JobStatus) -> AppResult<()> {
        self.inner.write().await.job_mut(job_type)?.status = status;
        Ok(())
    }

    async fn finish_job(&self, job_type: JobType, finish: &JobFinish) -> AppResult<()> {
        let mut state = self.inner.write().await;
        let job = state.job_mut(job_type)?;
        job.status = finish.status;
        if let Some(total) = finish.total_titles_processed {
            job.total_titles_processed = total;
        }
        job.last_run_duration_seconds = Some(finish.duration_seconds);
        job.error_message = finish.error_message.clone();
        if finish.next_run_at.is_some() {
            job.next_run_at = finish.next_run_at;
        }
        Ok(())
    }

    async fn increment_titles_processed(&self, job_type: JobType, delta: i64) -> AppResult<i64> {
        let mut state = self.inner.write().await;
        let job = state.job_mut(job_type)?;
        job.total_titles_processed += delta;
        Ok(job.total_titles_processed)
    }

    async fn merge_job_configuration(
        &self,
        job_type: JobType,
        patch: serde_json::Value,
    ) -> AppResult<()> {
        let mut state = self.inner.write().await;
        let job = state.job_mut(job_type)?;
        if !job.configuration.is_object() {
            job.configuration = serde_json::json!({});
        }
        if let (Some(target), serde_json::Value::Object(patch)) =
            (job.configuration.as_object_mut(), patch)
        {
            target.extend(patch);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TitleStore for MemoryStore {
    async fn upsert_title(&self, title: &NewTitle) -> AppResult<TitleUpsert> {
        let mut state = self.inner.write().await;

        let existing = state
            .titles
            .values()
            .find(|t| t.tmdb_id == Some(title.tmdb_id))
            .or_else(|| {
                state
                    .titles
                    .values()
                    .find(|t| t.name == title.name && t.release_year == title.release_year)
            })
            .map(|t| t.id);

        if let Some(id) = existing {
            // A tmdb_id match may rename onto another row's (name, year)
            let clash = state.titles.values().any(|t| {
                t.id != id && t.name == title.name && t.release_year == title.release_year
            });
            if clash {
                return Err(AppError::Internal(format!(
                    "duplicate key (name, release_year) = ({}, {:?})",
                    title.name, title.release_year
                )));
            }

            let Some(row) = state.titles.get_mut(&id) else {
                return Err(AppError::Internal(format!("title {} vanished", id)));
            };
            row.tmdb_id = Some(title.tmdb_id);
            row.kind = title.kind;
            row.name = title.name.clone();
            row.original_name = title.original_name.clone().or(row.original_name.take());
            row.overview = title.overview.clone().or(row.overview.take());
            row.release_year = title.release_year.or(row.release_year);
            row.runtime = title.runtime.or(row.runtime);
            row.original_language = title.original_language.clone().or(row.original_language.take());
            row.popularity = title.popularity.or(row.popularity);
            row.poster_path = title.poster_path.clone().or(row.poster_path.take());
            row.backdrop_path = title.backdrop_path.clone().or(row.backdrop_path.take());
            row.episode_run_time = title.episode_run_time.or(row.episode_run_time);
            return Ok(TitleUpsert { id, created: false });
        }

        let id = Uuid::new_v4();
        state.titles.insert(
            id,
            TitleRow {
                id,
                tmdb_id: Some(title.tmdb_id),
                kind: title.kind,
                name: title.name.clone(),
                original_name: title.original_name.clone(),
                overview: title.overview.clone(),
                release_year: title.release_year,
                runtime: title.runtime,
                original_language: title.original_language.clone(),
                popularity: title.popularity,
                poster_path: title.poster_path.clone(),
                backdrop_path: title.backdrop_path.clone(),
                trailer_url: None,
                trailer_checked: false,
                episode_run_time: title.episode_run_time,
                details_checked: false,
            },
        );
        Ok(TitleUpsert { id, created: true })
    }

    async fn link_genres(&self, title_id: Uuid, tmdb_genre_ids: &[i64]) -> AppResult<usize> {
        let mut state = self.inner.write().await;
        let genre_ids: Vec<Uuid> = tmdb_genre_ids
            .iter()
            .filter_map(|g| state.genres.get(g).copied())
            .collect();
        Ok(genre_ids
            .into_iter()
            .filter(|g| state.title_genres.insert((title_id, *g)))
            .count())
    }

    async fn link_language(&self, title_id: Uuid, language_code: &str) -> AppResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .title_languages
            .insert((title_id, language_code.to_string())))
    }

    async fn active_services(&self) -> AppResult<Vec<StreamingService>> {
        let mut services: Vec<StreamingService> = self
            .inner
            .read()
            .await
            .services
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(services)
    }

    async fn link_services(
        &self,
        title_id: Uuid,
        service_ids: &[Uuid],
        region: &str,
    ) -> AppResult<usize> {
        let mut state = self.inner.write().await;
        Ok(service_ids
            .iter()
            .filter(|s| state.availability.insert((title_id, **s, region.to_string())))
            .count())
    }

    async fn titles_missing_details(&self, limit: i64) -> AppResult<Vec<TitleRow>> {
        let state = self.inner.read().await;
        let rows = state
            .titles
            .values()
            .filter(|t| t.awaits_details())
            .cloned()
            .collect();
        Ok(state.by_popularity(rows, limit))
    }

    async fn titles_missing_trailers(&self, limit: i64) -> AppResult<Vec<TitleRow>> {
        let state = self.inner.read().await;
        let rows = state
            .titles
            .values()
            .filter(|t| t.needs_trailer())
            .cloned()
            .collect();
        Ok(state.by_popularity(rows, limit))
    }

    async fn update_title(&self, title_id: Uuid, update: &TitleUpdate) -> AppResult<()> {
        let mut state = self.inner.write().await;
        let Some(row) = state.titles.get_mut(&title_id) else {
            return Ok(());
        };
        if update.overview.is_some() {
            row.overview = update.overview.clone();
        }
        if update.poster_path.is_some() {
            row.poster_path = update.poster_path.clone();
        }
        if update.backdrop_path.is_some() {
            row.backdrop_path = update.backdrop_path.clone();
        }
        row.runtime = update.runtime.or(row.runtime);
        row.episode_run_time = update.episode_run_time.or(row.episode_run_time);
        if update.trailer_url.is_some() {
            row.trailer_url = update.trailer_url.clone();
        }
        row.trailer_checked |= update.trailer_checked;
        row.details_checked |= update.details_checked;
        Ok(())
    }

    async fn titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
        limit: i64,
    ) -> AppResult<Vec<TitleRow>> {
        let state = self.inner.read().await;
        let rows = state
            .titles
            .values()
            .filter(|t| t.tmdb_id.is_some() && state.active_service_count(t.id, region) >= min_services)
            .cloned()
            .collect();
        Ok(state.by_popularity(rows, limit))
    }

    async fn count_titles_with_service_count_at_least(
        &self,
        region: &str,
        min_services: i64,
    ) -> AppResult<i64> {
        let state = self.inner.read().await;
        Ok(state
            .titles
            .values()
            .filter(|t| t.tmdb_id.is_some() && state.active_service_count(t.id, region) >= min_services)
            .count() as i64)
    }

    async fn availability(&self, title_id: Uuid, region: &str) -> AppResult<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .availability
            .iter()
            .filter(|(t, _, r)| *t == title_id && r == region)
            .map(|(_, s, _)| *s)
            .collect())
    }

    async fn replace_availability(
        &self,
        title_id: Uuid,
        region: &str,
        service_ids: &[Uuid],
    ) -> AppResult<()> {
        let mut state = self.inner.write().await;
        state
            .availability
            .retain(|(t, _, r)| !(*t == title_id && r == region));
        for service_id in service_ids {
            state
                .availability
                .insert((title_id, *service_id, region.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryStore {
    async fn insert_log(&self, entry: &NewSystemLog) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        self.inner.write().await.logs.push(SystemLog {
            id,
            severity: entry.severity,
            operation: entry.operation.clone(),
            error_message: entry.error_message.clone(),
            context: entry.context.clone(),
            resolved: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn unresolved_logs(&self, operation: &str, limit: i64) -> AppResult<Vec<SystemLog>> {
        let state = self.inner.read().await;
        let mut rows: Vec<SystemLog> = state
            .logs
            .iter()
            .filter(|l| l.operation == operation && !l.resolved)
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete_log(&self, id: Uuid) -> AppResult<()> {
        self.inner.write().await.logs.retain(|l| l.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TitleKind;

    fn new_title(tmdb_id: i64, name: &str, year: i32) -> NewTitle {
        NewTitle {
            tmdb_id,
            kind: TitleKind::Movie,
            name: name.to_string(),
            original_name: None,
            overview: None,
            release_year: Some(year),
            runtime: None,
            original_language: Some("en".to_string()),
            popularity: Some(10.0),
            poster_path: None,
            backdrop_path: None,
            episode_run_time: None,
            genre_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_upsert_matches_on_tmdb_id() {
        let store = MemoryStore::seeded();
        let first = store.upsert_title(&new_title(1, "Heat", 1995)).await.unwrap();
        let second = store.upsert_title(&new_title(1, "Heat (Remastered)", 1995)).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.title_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_matches_on_name_and_year() {
        let store = MemoryStore::seeded();
        let first = store.upsert_title(&new_title(1, "Heat", 1995)).await.unwrap();
        let second = store.upsert_title(&new_title(2, "Heat", 1995)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.title_count().await, 1);
        assert_eq!(store.title_by_tmdb_id(2).await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_upsert_keeps_enriched_fields() {
        let store = MemoryStore::seeded();
        let id = store.upsert_title(&new_title(1, "Heat", 1995)).await.unwrap().id;
        store
            .update_title(id, &TitleUpdate { runtime: Some(170), ..TitleUpdate::default() })
            .await
            .unwrap();

        store.upsert_title(&new_title(1, "Heat", 1995)).await.unwrap();
        assert_eq!(store.title_by_tmdb_id(1).await.unwrap().runtime, Some(170));
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let store = MemoryStore::seeded();
        store.increment_titles_processed(JobType::EnrichDetails, 3).await.unwrap();
        let total = store.increment_titles_processed(JobType::EnrichDetails, 4).await.unwrap();
        assert_eq!(total, 7);
    }

    #[tokio::test]
    async fn test_merge_configuration_is_shallow() {
        let store = MemoryStore::seeded();
        store
            .set_job_configuration(JobType::FullRefresh, serde_json::json!({ "max_pages": 2 }))
            .await;
        store
            .merge_job_configuration(JobType::FullRefresh, serde_json::json!({ "next_chunk_index": 40 }))
            .await
            .unwrap();

        let job = store.get_job(JobType::FullRefresh).await.unwrap();
        assert_eq!(job.configuration["max_pages"], 2);
        assert_eq!(job.configuration["next_chunk_index"], 40);
    }

    #[tokio::test]
    async fn test_inactive_services_do_not_count() {
        let store = MemoryStore::seeded();
        let active = StreamingService::new("Netflix");
        let mut retired = StreamingService::new("Retired");
        retired.is_active = false;
        store.add_service(active.clone()).await;
        store.add_service(retired.clone()).await;

        let id = store.upsert_title(&new_title(1, "Heat", 1995)).await.unwrap().id;
        store
            .link_services(id, &[active.id, retired.id], "US")
            .await
            .unwrap();

        assert_eq!(
            store.count_titles_with_service_count_at_least("US", 2).await.unwrap(),
            0
        );
        assert_eq!(
            store.count_titles_with_service_count_at_least("US", 1).await.unwrap(),
            1
        );
    }
}
