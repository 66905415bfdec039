use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

/// Named ingestion job; one `jobs` row exists per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullRefresh,
    SyncDelta,
    EnrichDetails,
    EnrichTrailers,
    FixStreaming,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::FullRefresh,
        JobType::SyncDelta,
        JobType::EnrichDetails,
        JobType::EnrichTrailers,
        JobType::FixStreaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullRefresh => "full_refresh",
            JobType::SyncDelta => "sync_delta",
            JobType::EnrichDetails => "enrich_details",
            JobType::EnrichTrailers => "enrich_trailers",
            JobType::FixStreaming => "fix_streaming",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// An operator stops a run by flipping the row to `idle` or `failed`
    pub fn halts_dispatch(&self) -> bool {
        matches!(self, JobStatus::Idle | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A row of the `jobs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub configuration: serde_json::Value,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration_seconds: Option<i32>,
    pub total_titles_processed: i64,
    pub error_message: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Seed row as created by the initial migration
    pub fn seed(job_type: JobType) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Idle,
            configuration: serde_json::json!({}),
            last_run_at: None,
            last_run_duration_seconds: None,
            total_titles_processed: 0,
            error_message: None,
            next_run_at: None,
        }
    }

    pub fn config(&self) -> JobConfiguration {
        JobConfiguration::from_value(&self.configuration)
    }
}

/// Terminal write for one invocation of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobFinish {
    pub status: JobStatus,
    /// Absolute count; `None` keeps whatever increments already wrote
    pub total_titles_processed: Option<i64>,
    pub duration_seconds: i32,
    pub error_message: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Typed view over the opaque `jobs.configuration` map.
///
/// Unknown keys are ignored and missing ones fall back to defaults, so an
/// operator can tune a single knob without restating the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfiguration {
    pub min_rating: f64,
    pub min_vote_count: i64,
    pub start_year: i32,
    pub end_year: Option<i32>,
    pub languages: Vec<String>,
    pub genre_ids: Vec<i64>,
    pub max_pages: u32,
    pub lookback_days: i64,
    pub batch_size: i64,
    pub link_all_services: bool,
    pub next_chunk_index: Option<usize>,
}

impl Default for JobConfiguration {
    fn default() -> Self {
        Self {
            min_rating: 5.0,
            min_vote_count: 50,
            start_year: 2000,
            end_year: None,
            languages: ["en", "hi", "ko", "ja", "es", "fr"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            // Action, Adventure, Animation, Comedy, Crime, Documentary, Drama,
            // Family, Fantasy, Horror, Mystery, Romance, Sci-Fi, Thriller
            genre_ids: vec![
                28, 12, 16, 35, 80, 99, 18, 10751, 14, 27, 9648, 10749, 878, 53,
            ],
            max_pages: 5,
            lookback_days: 7,
            batch_size: 50,
            link_all_services: true,
            next_chunk_index: None,
        }
    }
}

impl JobConfiguration {
    pub fn from_value(value: &serde_json::Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed job configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Years to sweep, newest first
    pub fn years(&self, now: DateTime<Utc>) -> Vec<i32> {
        let end = self.end_year.unwrap_or_else(|| now.year());
        (self.start_year..=end).rev().collect()
    }

    /// Full-refresh work units: languages x years x genres
    pub fn chunks(&self, now: DateTime<Utc>) -> Vec<WorkChunk> {
        let years = self.years(now);
        let mut chunks = Vec::with_capacity(self.languages.len() * years.len() * self.genre_ids.len());
        for language in &self.languages {
            for year in &years {
                for genre_id in &self.genre_ids {
                    chunks.push(WorkChunk {
                        language_code: language.clone(),
                        year: *year,
                        genre_id: *genre_id,
                    });
                }
            }
        }
        chunks
    }
}

/// One (language, year, genre) unit dispatched by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkChunk {
    pub language_code: String,
    pub year: i32,
    pub genre_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_type_round_trips_through_str() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
        assert!("nightly".parse::<JobType>().is_err());
    }

    #[test]
    fn test_halting_statuses() {
        assert!(JobStatus::Idle.halts_dispatch());
        assert!(JobStatus::Failed.halts_dispatch());
        assert!(!JobStatus::Running.halts_dispatch());
        assert!(!JobStatus::Completed.halts_dispatch());
    }

    #[test]
    fn test_partial_configuration_keeps_defaults() {
        let config = JobConfiguration::from_value(&serde_json::json!({
            "min_rating": 7.5,
            "languages": ["en"],
            "unrelated": true
        }));
        assert_eq!(config.min_rating, 7.5);
        assert_eq!(config.languages, vec!["en".to_string()]);
        assert_eq!(config.max_pages, 5);
        assert!(config.link_all_services);
    }

    #[test]
    fn test_malformed_configuration_falls_back() {
        let config = JobConfiguration::from_value(&serde_json::json!({ "max_pages": "lots" }));
        assert_eq!(config, JobConfiguration::default());
    }

    #[test]
    fn test_chunks_are_language_major_newest_year_first() {
        let config = JobConfiguration {
            languages: vec!["en".into(), "hi".into()],
            start_year: 2023,
            end_year: Some(2024),
            genre_ids: vec![28, 35],
            ..JobConfiguration::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let chunks = config.chunks(now);

        assert_eq!(chunks.len(), 8);
        assert_eq!(
            chunks[0],
            WorkChunk { language_code: "en".into(), year: 2024, genre_id: 28 }
        );
        assert_eq!(chunks[2].year, 2023);
        assert_eq!(chunks[4].language_code, "hi");
    }

    #[test]
    fn test_work_chunk_uses_camel_case() {
        let chunk = WorkChunk { language_code: "ko".into(), year: 2019, genre_id: 18 };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json, serde_json::json!({ "languageCode": "ko", "year": 2019, "genreId": 18 }));
    }
}
