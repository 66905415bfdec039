//! External catalog access.
//!
//! The fetcher issues exactly one request per call: no retry, no backoff.
//! Pagination and page caps belong to the callers.
use chrono::NaiveDate;

use crate::{
    error::AppResult,
    models::{CatalogVideo, DiscoverPage, DiscoverResult, TitleDetails, TitleKind},
};

pub mod language_merge;
pub mod tmdb;

pub use language_merge::{discover_by_languages, merge_by_language_priority, PrioritizedResult};
pub use tmdb::TmdbClient;

/// Catalog API used by every ingestion worker
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// One page of the discover endpoint
    async fn discover(&self, filter: &DiscoverFilter) -> AppResult<DiscoverPage>;

    async fn title_details(&self, kind: TitleKind, tmdb_id: i64) -> AppResult<TitleDetails>;

    async fn videos(&self, kind: TitleKind, tmdb_id: i64) -> AppResult<Vec<CatalogVideo>>;

    /// Provider ids that include the title in `region` (subscription, free or ad tier)
    async fn watch_providers(&self, kind: TitleKind, tmdb_id: i64, region: &str)
        -> AppResult<Vec<i64>>;
}

/// Discover query descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverFilter {
    pub media_type: TitleKind,
    /// Movie genre id; series queries translate it to the TV taxonomy
    pub genre_id: Option<i64>,
    pub original_language: Option<String>,
    /// Inclusive release-year range
    pub year_range: Option<(i32, i32)>,
    /// Lower release-date bound, overriding the start of `year_range`
    pub released_since: Option<NaiveDate>,
    pub min_rating: f64,
    pub min_vote_count: i64,
    pub streaming_provider_ids: Vec<i64>,
    pub region: Option<String>,
    pub page: u32,
}

impl DiscoverFilter {
    pub fn new(media_type: TitleKind) -> Self {
        Self {
            media_type,
            genre_id: None,
            original_language: None,
            year_range: None,
            released_since: None,
            min_rating: 0.0,
            min_vote_count: 0,
            streaming_provider_ids: Vec::new(),
            region: None,
            page: 1,
        }
    }

    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Query string pairs for the discover endpoint
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let (date_gte, date_lte) = match self.media_type {
            TitleKind::Movie => ("primary_release_date.gte", "primary_release_date.lte"),
            TitleKind::Series => ("first_air_date.gte", "first_air_date.lte"),
        };

        let mut params = vec![
            ("sort_by", "popularity.desc".to_string()),
            ("include_adult", "false".to_string()),
            ("page", self.page.max(1).to_string()),
        ];

        if self.min_rating > 0.0 {
            params.push(("vote_average.gte", self.min_rating.to_string()));
        }
        if self.min_vote_count > 0 {
            params.push(("vote_count.gte", self.min_vote_count.to_string()));
        }
        if let Some(genre_id) = self.genre_id {
            let genre_id = match self.media_type {
                TitleKind::Movie => genre_id,
                TitleKind::Series => tv_genre_id(genre_id),
            };
            params.push(("with_genres", genre_id.to_string()));
        }
        if let Some(language) = &self.original_language {
            params.push(("with_original_language", language.clone()));
        }

        let lower = self
            .released_since
            .map(|d| d.format("%Y-%m-%d").to_string())
            .or_else(|| self.year_range.map(|(start, _)| format!("{}-01-01", start)));
        if let Some(lower) = lower {
            params.push((date_gte, lower));
        }
        if let Some((_, end)) = self.year_range {
            params.push((date_lte, format!("{}-12-31", end)));
        }

        if !self.streaming_provider_ids.is_empty() {
            let providers: Vec<String> = self
                .streaming_provider_ids
                .iter()
                .map(|id| id.to_string())
                .collect();
            params.push(("with_watch_providers", providers.join("|")));
            params.push((
                "watch_region",
                self.region.clone().unwrap_or_else(|| "US".to_string()),
            ));
        }

        params
    }
}

/// TV discover uses merged genres for a few movie genres
pub fn tv_genre_id(movie_genre_id: i64) -> i64 {
    match movie_genre_id {
        28 | 12 => 10759,
        14 | 878 => 10765,
        10752 => 10768,
        other => other,
    }
}

/// Fetches one page; a failed request is logged and read as an empty page
pub async fn discover_or_empty(catalog: &dyn CatalogClient, filter: &DiscoverFilter) -> DiscoverPage {
    match catalog.discover(filter).await {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!(
                error = %e,
                media_type = filter.media_type.as_str(),
                genre_id = ?filter.genre_id,
                language = ?filter.original_language,
                page = filter.page,
                "Discover request failed, treating page as empty"
            );
            DiscoverPage::empty(filter.page)
        }
    }
}

/// Walks pages from `filter.page` until the catalog runs out or `max_pages`
/// pages have been read
pub async fn fetch_pages(
    catalog: &dyn CatalogClient,
    filter: &DiscoverFilter,
    max_pages: u32,
) -> Vec<DiscoverResult> {
    let mut results = Vec::new();
    let first = filter.page.max(1);

    for page in first..first.saturating_add(max_pages) {
        let response = discover_or_empty(catalog, &filter.with_page(page)).await;
        let exhausted = response.results.is_empty() || !response.has_more();
        results.extend(response.results);
        if exhausted {
            break;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn result(id: i64) -> DiscoverResult {
        serde_json::from_value(serde_json::json!({ "id": id, "title": format!("T{}", id) })).unwrap()
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_movie_year_range_params() {
        let filter = DiscoverFilter {
            genre_id: Some(28),
            original_language: Some("hi".to_string()),
            year_range: Some((2019, 2019)),
            min_rating: 6.5,
            min_vote_count: 100,
            ..DiscoverFilter::new(TitleKind::Movie)
        };
        let params = filter.query_params();

        assert_eq!(param(&params, "with_genres"), Some("28"));
        assert_eq!(param(&params, "with_original_language"), Some("hi"));
        assert_eq!(param(&params, "primary_release_date.gte"), Some("2019-01-01"));
        assert_eq!(param(&params, "primary_release_date.lte"), Some("2019-12-31"));
        assert_eq!(param(&params, "vote_average.gte"), Some("6.5"));
        assert_eq!(param(&params, "vote_count.gte"), Some("100"));
        assert_eq!(param(&params, "page"), Some("1"));
    }

    #[test]
    fn test_series_params_translate_genre_and_date_field() {
        let filter = DiscoverFilter {
            genre_id: Some(878),
            released_since: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..DiscoverFilter::new(TitleKind::Series)
        };
        let params = filter.query_params();

        assert_eq!(param(&params, "with_genres"), Some("10765"));
        assert_eq!(param(&params, "first_air_date.gte"), Some("2024-05-01"));
        assert_eq!(param(&params, "vote_average.gte"), None);
    }

    #[test]
    fn test_series_year_range_uses_air_date_bounds() {
        let filter = DiscoverFilter {
            year_range: Some((2010, 2012)),
            ..DiscoverFilter::new(TitleKind::Series)
        };
        let params = filter.query_params();

        assert_eq!(param(&params, "first_air_date.gte"), Some("2010-01-01"));
        assert_eq!(param(&params, "first_air_date.lte"), Some("2012-12-31"));
        assert_eq!(param(&params, "primary_release_date.lte"), None);
    }

    #[test]
    fn test_provider_filter_defaults_region() {
        let filter = DiscoverFilter {
            streaming_provider_ids: vec![8, 337],
            ..DiscoverFilter::new(TitleKind::Movie)
        };
        let params = filter.query_params();
        assert_eq!(param(&params, "with_watch_providers"), Some("8|337"));
        assert_eq!(param(&params, "watch_region"), Some("US"));
    }

    #[tokio::test]
    async fn test_failed_page_reads_as_empty() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_discover()
            .returning(|_| Err(AppError::ExternalApi("status 500".to_string())));

        let page = discover_or_empty(&catalog, &DiscoverFilter::new(TitleKind::Movie)).await;
        assert!(page.results.is_empty());
        assert_eq!(page.page, 1);
    }

    #[tokio::test]
    async fn test_fetch_pages_respects_cap() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_discover().times(2).returning(|filter| {
            Ok(DiscoverPage {
                page: filter.page,
                results: vec![result(filter.page as i64)],
                total_pages: 50,
                total_results: 1000,
            })
        });

        let results = fetch_pages(&catalog, &DiscoverFilter::new(TitleKind::Movie), 2).await;
        assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fetch_pages_stops_on_last_page() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_discover().times(1).returning(|filter| {
            Ok(DiscoverPage {
                page: filter.page,
                results: vec![result(7)],
                total_pages: 1,
                total_results: 1,
            })
        });

        let results = fetch_pages(&catalog, &DiscoverFilter::new(TitleKind::Series), 5).await;
        assert_eq!(results.len(), 1);
    }
}
