use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::{
    models::DiscoverResult,
    services::catalog::{fetch_pages, CatalogClient, DiscoverFilter},
};

/// Pages read per language by the discover proxy
pub const PAGES_PER_LANGUAGE: u32 = 5;

/// A discover result tagged with the language fetch that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedResult {
    #[serde(flatten)]
    pub result: DiscoverResult,
    pub language_code: String,
    /// Position from the end of the language list; the first language ranks highest
    pub priority: usize,
}

impl PrioritizedResult {
    fn outranks(&self, other: &Self) -> bool {
        rank(self, other) == Ordering::Less
    }
}

/// Priority descending, then popularity descending, then catalog id
fn rank(a: &PrioritizedResult, b: &PrioritizedResult) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            b.result
                .popularity
                .partial_cmp(&a.result.popularity)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.result.id.cmp(&b.result.id))
}

/// Merges per-language result lists, given in language priority order.
///
/// A catalog id seen under several languages keeps the copy with the
/// higher priority, then the higher popularity.
pub fn merge_by_language_priority(
    batches: Vec<(String, Vec<DiscoverResult>)>,
    limit: usize,
) -> Vec<PrioritizedResult> {
    let language_count = batches.len();
    let mut best: HashMap<i64, PrioritizedResult> = HashMap::new();

    for (index, (language_code, results)) in batches.into_iter().enumerate() {
        let priority = language_count - index;
        for result in results {
            let candidate = PrioritizedResult {
                result,
                language_code: language_code.clone(),
                priority,
            };
            match best.get(&candidate.result.id) {
                Some(existing) if !candidate.outranks(existing) => {}
                _ => {
                    best.insert(candidate.result.id, candidate);
                }
            }
        }
    }

    let mut merged: Vec<PrioritizedResult> = best.into_values().collect();
    merged.sort_by(rank);
    merged.truncate(limit);
    merged
}

/// Fetches up to `PAGES_PER_LANGUAGE` pages for each language in order and
/// merges them by priority
pub async fn discover_by_languages(
    catalog: &dyn CatalogClient,
    base: &DiscoverFilter,
    languages: &[String],
    limit: usize,
) -> Vec<PrioritizedResult> {
    let mut batches = Vec::with_capacity(languages.len());

    for language in languages {
        let filter = DiscoverFilter {
            original_language: Some(language.clone()),
            ..base.clone()
        };
        let results = fetch_pages(catalog, &filter, PAGES_PER_LANGUAGE).await;
        tracing::debug!(language = %language, results = results.len(), "Language fetch complete");
        batches.push((language.clone(), results));
    }

    merge_by_language_priority(batches, limit)
}
