use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Type of content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TitleKind {
    Movie,
    Series,
}

impl TitleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TitleKind::Movie => "movie",
            TitleKind::Series => "series",
        }
    }

    /// Path segment the catalog API uses for this kind
    pub fn catalog_path(&self) -> &'static str {
        match self {
            TitleKind::Movie => "movie",
            TitleKind::Series => "tv",
        }
    }
}

impl FromStr for TitleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(TitleKind::Movie),
            "series" | "tv" => Ok(TitleKind::Series),
            other => Err(format!("unknown title type '{}'", other)),
        }
    }
}

/// A normalized catalog record ready to be upserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTitle {
    pub tmdb_id: i64,
    pub kind: TitleKind,
    pub name: String,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub release_year: Option<i32>,
    pub runtime: Option<i32>,
    pub original_language: Option<String>,
    pub popularity: Option<f64>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub episode_run_time: Option<i32>,
    /// Catalog genre ids, mapped to internal genres by the writer
    pub genre_ids: Vec<i64>,
}

/// A persisted title as read back by the enrichment and repair workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRow {
    pub id: Uuid,
    pub tmdb_id: Option<i64>,
    pub kind: TitleKind,
    pub name: String,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub release_year: Option<i32>,
    pub runtime: Option<i32>,
    pub original_language: Option<String>,
    pub popularity: Option<f64>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub trailer_url: Option<String>,
    pub trailer_checked: bool,
    pub episode_run_time: Option<i32>,
    /// Set once a details lookup succeeded; the catalog had nothing more to give
    pub details_checked: bool,
}

impl TitleRow {
    /// Whether the details worker has anything left to fill
    pub fn needs_details(&self) -> bool {
        let runtime_missing = match self.kind {
            TitleKind::Movie => self.runtime.is_none(),
            TitleKind::Series => self.episode_run_time.is_none(),
        };
        self.poster_path.is_none() || self.backdrop_path.is_none() || runtime_missing
    }

    /// Whether the details worker should select this row
    pub fn awaits_details(&self) -> bool {
        self.tmdb_id.is_some() && !self.details_checked && self.needs_details()
    }

    pub fn needs_trailer(&self) -> bool {
        self.trailer_url.is_none() && !self.trailer_checked
    }
}

/// Partial update written once per enriched row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleUpdate {
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub runtime: Option<i32>,
    pub episode_run_time: Option<i32>,
    pub trailer_url: Option<String>,
    /// Stamp `trailer_checked_at` even when no trailer was found
    pub trailer_checked: bool,
    /// Stamp `details_checked_at` so the row leaves the details queue
    pub details_checked: bool,
}

impl TitleUpdate {
    /// True when no column would change
    pub fn is_empty(&self) -> bool {
        self.overview.is_none()
            && self.poster_path.is_none()
            && self.backdrop_path.is_none()
            && self.runtime.is_none()
            && self.episode_run_time.is_none()
            && self.trailer_url.is_none()
            && !self.trailer_checked
            && !self.details_checked
    }
}
