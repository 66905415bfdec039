//! Trailer lookup: catalog videos first, keyword video search second.
use crate::{
    error::{AppError, AppResult},
    models::{CatalogVideo, VideoSearchHit, YoutubeSearchItem, YoutubeSearchResponse},
};
use reqwest::Client as HttpClient;
use tracing::instrument;

const SEARCH_RESULTS: &str = "5";

/// Keyword video search backend
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str) -> AppResult<Vec<VideoSearchHit>>;
}

/// YouTube Data API v3 search
#[derive(Clone)]
pub struct YoutubeClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
}

impl YoutubeClient {
    pub fn new(http_client: HttpClient, api_key: String, api_url: String) -> Self {
        Self {
            http_client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl VideoSearch for YoutubeClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> AppResult<Vec<VideoSearchHit>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Video search query cannot be empty".to_string(),
            ));
        }

        let url = format!("{}/search", self.api_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", SEARCH_RESULTS),
                ("q", query),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "YouTube search returned status {}: {}",
                status, body
            )));
        }

        let results: YoutubeSearchResponse = response.json().await?;
        Ok(results
            .items
            .into_iter()
            .filter_map(YoutubeSearchItem::into_hit)
            .collect())
    }
}

pub fn youtube_url(video_key: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_key)
}

/// Catalog-listed YouTube trailer, official uploads first
pub fn catalog_trailer(videos: &[CatalogVideo]) -> Option<String> {
    let mut trailers = videos
        .iter()
        .filter(|v| v.video_type == "Trailer" && v.site == "YouTube" && !v.key.is_empty());

    let first = trailers.clone().next()?;
    let chosen = trailers.find(|v| v.official).unwrap_or(first);
    Some(youtube_url(&chosen.key))
}

/// Search query for a title without a catalog trailer
pub fn trailer_query(name: &str, release_year: Option<i32>) -> String {
    match release_year {
        Some(year) => format!("{} {} official trailer", name, year),
        None => format!("{} official trailer", name),
    }
}

/// Prefers hits from an "official" channel or titled "official trailer",
/// else the first hit
pub fn best_search_hit(hits: &[VideoSearchHit]) -> Option<&VideoSearchHit> {
    hits.iter()
        .find(|hit| {
            hit.channel_title.to_lowercase().contains("official")
                || hit.title.to_lowercase().contains("official trailer")
        })
        .or_else(|| hits.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(key: &str, site: &str, kind: &str, official: bool) -> CatalogVideo {
        CatalogVideo {
            key: key.to_string(),
            site: site.to_string(),
            video_type: kind.to_string(),
            name: None,
            official,
        }
    }

    fn hit(id: &str, title: &str, channel: &str) -> VideoSearchHit {
        VideoSearchHit {
            video_id: id.to_string(),
            title: title.to_string(),
            channel_title: channel.to_string(),
        }
    }

    #[test]
    fn test_catalog_trailer_filters_type_and_site() {
        let videos = vec![
            video("teaser", "YouTube", "Teaser", true),
            video("vimeo", "Vimeo", "Trailer", true),
            video("fan", "YouTube", "Trailer", false),
            video("studio", "YouTube", "Trailer", true),
        ];
        assert_eq!(
            catalog_trailer(&videos).as_deref(),
            Some("https://www.youtube.com/watch?v=studio")
        );
    }

    #[test]
    fn test_catalog_trailer_falls_back_to_first_unofficial() {
        let videos = vec![video("a", "YouTube", "Trailer", false)];
        assert_eq!(
            catalog_trailer(&videos).as_deref(),
            Some("https://www.youtube.com/watch?v=a")
        );
        assert_eq!(catalog_trailer(&[video("t", "YouTube", "Clip", true)]), None);
    }

    #[test]
    fn test_best_hit_prefers_official_channel() {
        let hits = vec![
            hit("1", "Dune reaction", "Some Fan"),
            hit("2", "Dune trailer", "Warner Bros. Official"),
        ];
        assert_eq!(best_search_hit(&hits).map(|h| h.video_id.as_str()), Some("2"));
    }

    #[test]
    fn test_best_hit_prefers_official_trailer_title() {
        let hits = vec![
            hit("1", "Dune breakdown", "Critic"),
            hit("2", "DUNE | Official Trailer", "Movieclips"),
        ];
        assert_eq!(best_search_hit(&hits).map(|h| h.video_id.as_str()), Some("2"));
    }

    #[test]
    fn test_best_hit_defaults_to_first() {
        let hits = vec![hit("1", "Dune", "A"), hit("2", "Dune 2", "B")];
        assert_eq!(best_search_hit(&hits).map(|h| h.video_id.as_str()), Some("1"));
        assert!(best_search_hit(&[]).is_none());
    }

    #[test]
    fn test_trailer_query() {
        assert_eq!(trailer_query("Dune", Some(2021)), "Dune 2021 official trailer");
        assert_eq!(trailer_query("Dune", None), "Dune official trailer");
    }
}
