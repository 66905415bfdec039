use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod job;
pub mod streaming_service;
pub mod system_log;
pub mod title;

pub use job::{Job, JobConfiguration, JobFinish, JobStatus, JobType, WorkChunk};
pub use streaming_service::{StreamingService, DEFAULT_REGION};
pub use system_log::{NewSystemLog, RetryContext, Severity, SystemLog, CHUNK_FAILURE_OPERATION};
pub use title::{NewTitle, TitleKind, TitleRow, TitleUpdate};

// ============================================================================
// TMDB API Types
// ============================================================================

/// One page of `/discover/{movie,tv}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverPage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub results: Vec<DiscoverResult>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

impl DiscoverPage {
    pub fn empty(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Raw discover result; movies carry `title`/`release_date`, series carry
/// `name`/`first_air_date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResult {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: i64,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

impl DiscoverResult {
    pub fn display_name(&self) -> Option<&str> {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    pub fn release_year(&self) -> Option<i32> {
        year_of(self.release_date.as_deref().or(self.first_air_date.as_deref()))
    }
}

/// Detail payload of `/movie/{id}` or `/tv/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TitleDetails {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub episode_run_time: Vec<i32>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<CatalogGenre>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogGenre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoList {
    #[serde(default)]
    pub results: Vec<CatalogVideo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVideo {
    pub key: String,
    pub site: String,
    #[serde(rename = "type")]
    pub video_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub official: bool,
}

/// `/{kind}/{id}/watch/providers`, keyed by ISO region
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchProvidersResponse {
    #[serde(default)]
    pub results: HashMap<String, RegionProviders>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionProviders {
    #[serde(default)]
    pub flatrate: Vec<WatchProvider>,
    #[serde(default)]
    pub free: Vec<WatchProvider>,
    #[serde(default)]
    pub ads: Vec<WatchProvider>,
}

impl RegionProviders {
    /// Providers that include the title without a per-title purchase
    pub fn included_provider_ids(&self) -> Vec<i64> {
        self.flatrate
            .iter()
            .chain(&self.free)
            .chain(&self.ads)
            .map(|p| p.provider_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchProvider {
    pub provider_id: i64,
    #[serde(default)]
    pub provider_name: String,
}

// ============================================================================
// YouTube Data API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct YoutubeSearchResponse {
    #[serde(default)]
    pub items: Vec<YoutubeSearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct YoutubeSearchItem {
    pub id: YoutubeItemId,
    pub snippet: YoutubeSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeItemId {
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_title: String,
}

/// A video search hit, independent of the search backend
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSearchHit {
    pub video_id: String,
    pub title: String,
    pub channel_title: String,
}

impl YoutubeSearchItem {
    /// Channel and playlist hits carry no video id and are dropped
    pub fn into_hit(self) -> Option<VideoSearchHit> {
        let snippet = self.snippet;
        self.id.video_id.map(|video_id| VideoSearchHit {
            video_id,
            title: snippet.title,
            channel_title: snippet.channel_title,
        })
    }
}

/// Year prefix of a `YYYY-MM-DD` catalog date; empty strings are common
pub fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}
