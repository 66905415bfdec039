/// TMDB v3 catalog client
///
/// Endpoints used:
/// - `/discover/{movie,tv}` for sweeps and the interactive discover proxy
/// - `/{movie,tv}/{id}` for detail enrichment
/// - `/{movie,tv}/{id}/videos` for trailers
/// - `/{movie,tv}/{id}/watch/providers` for availability repair
use crate::{
    error::{AppError, AppResult},
    models::{
        CatalogVideo, DiscoverPage, TitleDetails, TitleKind, VideoList, WatchProvidersResponse,
    },
    services::catalog::{CatalogClient, DiscoverFilter},
};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use tracing::instrument;

#[derive(Clone)]
pub struct TmdbClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
}

impl TmdbClient {
    pub fn new(http_client: HttpClient, api_key: String, api_url: String) -> Self {
        Self {
            http_client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "TMDB returned status {} for {}: {}",
                status, path, body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl CatalogClient for TmdbClient {
    #[instrument(skip(self, filter), fields(media_type = filter.media_type.as_str(), page = filter.page))]
    async fn discover(&self, filter: &DiscoverFilter) -> AppResult<DiscoverPage> {
        let path = format!("/discover/{}", filter.media_type.catalog_path());
        let page: DiscoverPage = self.get_json(&path, &filter.query_params()).await?;

        tracing::debug!(
            media_type = filter.media_type.as_str(),
            page = page.page,
            total_pages = page.total_pages,
            results = page.results.len(),
            "Discover page fetched"
        );

        Ok(page)
    }

    #[instrument(skip(self))]
    async fn title_details(&self, kind: TitleKind, tmdb_id: i64) -> AppResult<TitleDetails> {
        let path = format!("/{}/{}", kind.catalog_path(), tmdb_id);
        self.get_json(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn videos(&self, kind: TitleKind, tmdb_id: i64) -> AppResult<Vec<CatalogVideo>> {
        let path = format!("/{}/{}/videos", kind.catalog_path(), tmdb_id);
        let list: VideoList = self.get_json(&path, &[]).await?;
        Ok(list.results)
    }

    #[instrument(skip(self))]
    async fn watch_providers(
        &self,
        kind: TitleKind,
        tmdb_id: i64,
        region: &str,
    ) -> AppResult<Vec<i64>> {
        let path = format!("/{}/{}/watch/providers", kind.catalog_path(), tmdb_id);
        let response: WatchProvidersResponse = self.get_json(&path, &[]).await?;

        Ok(response
            .results
            .get(region)
            .map(|providers| providers.included_provider_ids())
            .unwrap_or_default())
    }
}
