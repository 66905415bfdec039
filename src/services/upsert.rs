//! Maps catalog records to title rows and writes them with their joins.
//!
//! Writes are best effort: a failed record never aborts the batch. Every
//! record yields a `RecordOutcome`, and callers fold them into a `BatchReport`.
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{Store, TitleStore},
    error::AppResult,
    models::{DiscoverResult, NewTitle, TitleKind, DEFAULT_REGION},
};

/// Failure reasons kept per report; counts are always complete
const MAX_REPORTED_FAILURES: usize = 20;

/// What happened to one catalog record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Inserted(Uuid),
    Updated(Uuid),
    /// Not writable, e.g. a record without a name
    Skipped(String),
    /// The title row or one of its joins failed to write
    Failed(String),
}

impl RecordOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_) | RecordOutcome::Updated(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Inserted(_) => self.inserted += 1,
            RecordOutcome::Updated(_) => self.updated += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
            RecordOutcome::Failed(reason) => {
                self.failed += 1;
                if self.failures.len() < MAX_REPORTED_FAILURES {
                    self.failures.push(reason.clone());
                }
            }
        }
    }

    /// Records written, new or existing
    pub fn processed(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Normalizes a discover result; `None` when it has no usable name
pub fn normalize(result: &DiscoverResult, kind: TitleKind) -> Option<NewTitle> {
    let name = result.display_name()?.to_string();
    let original_name = match kind {
        TitleKind::Movie => result.original_title.clone(),
        TitleKind::Series => result.original_name.clone(),
    }
    .or_else(|| result.original_title.clone().or(result.original_name.clone()));

    Some(NewTitle {
        tmdb_id: result.id,
        kind,
        name,
        original_name,
        overview: non_empty(result.overview.as_deref()),
        release_year: result.release_year(),
        runtime: None,
        original_language: non_empty(result.original_language.as_deref()),
        popularity: Some(result.popularity),
        poster_path: non_empty(result.poster_path.as_deref()),
        backdrop_path: non_empty(result.backdrop_path.as_deref()),
        episode_run_time: None,
        genre_ids: result.genre_ids.clone(),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Writes titles and their genre, language and service joins
pub struct UpsertWriter<'a> {
    store: &'a dyn Store,
    /// Services every written title is linked to; `None` disables the step
    blanket_services: Option<Vec<Uuid>>,
}

impl<'a> UpsertWriter<'a> {
    /// Writer without availability linking
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            blanket_services: None,
        }
    }

    /// Writer for full and delta sweeps. With `link_all_services` set, every
    /// written title is linked to all active services in the default region,
    /// which the availability repair job later corrects from provider data.
    pub async fn for_sweep(store: &'a dyn Store, link_all_services: bool) -> AppResult<Self> {
        if !link_all_services {
            return Ok(Self::new(store));
        }

        let services: Vec<Uuid> = store
            .active_services()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        Ok(Self {
            store,
            blanket_services: Some(services),
        })
    }

    pub async fn write_result(&self, result: &DiscoverResult, kind: TitleKind) -> RecordOutcome {
        match normalize(result, kind) {
            Some(title) => self.write(&title).await,
            None => RecordOutcome::Skipped(format!("{} {} has no name", kind.as_str(), result.id)),
        }
    }

    pub async fn write(&self, title: &NewTitle) -> RecordOutcome {
        let upsert = match self.store.upsert_title(title).await {
            Ok(upsert) => upsert,
            Err(e) => {
                tracing::warn!(tmdb_id = title.tmdb_id, error = %e, "Title upsert failed");
                return RecordOutcome::Failed(format!("title {}: {}", title.tmdb_id, e));
            }
        };

        if let Err(reason) = self.write_joins(upsert.id, title).await {
            tracing::warn!(tmdb_id = title.tmdb_id, title_id = %upsert.id, error = %reason, "Join upsert failed");
            return RecordOutcome::Failed(format!("title {}: {}", title.tmdb_id, reason));
        }

        if upsert.created {
            RecordOutcome::Inserted(upsert.id)
        } else {
            RecordOutcome::Updated(upsert.id)
        }
    }

    async fn write_joins(&self, title_id: Uuid, title: &NewTitle) -> AppResult<()> {
        if !title.genre_ids.is_empty() {
            self.store.link_genres(title_id, &title.genre_ids).await?;
        }

        if let Some(language) = &title.original_language {
            self.store.link_language(title_id, language).await?;
        }

        if let Some(services) = &self.blanket_services {
            if !services.is_empty() {
                self.store
                    .link_services(title_id, services, DEFAULT_REGION)
                    .await?;
            }
        }

        Ok(())
    }
}
