use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Region every ingestion flow writes availability for
pub const DEFAULT_REGION: &str = "US";

/// Represents a streaming service row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct StreamingService {
    pub id: Uuid,
    /// Display name (e.g., "Netflix", "Hulu"); unique
    pub service_name: String,
    pub is_active: bool,
}

impl StreamingService {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_name: service_name.into(),
            is_active: true,
        }
    }
}

/// Catalog watch-provider ids mapped to internal service names.
///
/// Several provider ids collapse onto one service (ad tiers, channel add-ons).
const PROVIDER_SERVICE_NAMES: &[(i64, &str)] = &[
    (8, "Netflix"),
    (1796, "Netflix"),
    (9, "Prime Video"),
    (119, "Prime Video"),
    (337, "Disney+"),
    (15, "Hulu"),
    (1899, "Max"),
    (384, "Max"),
    (350, "Apple TV+"),
    (386, "Peacock"),
    (387, "Peacock"),
    (531, "Paramount+"),
    (2303, "Paramount+"),
    (283, "Crunchyroll"),
    (43, "Starz"),
    (37, "Showtime"),
    (526, "AMC+"),
    (73, "Tubi"),
    (300, "Pluto TV"),
    (237, "JioHotstar"),
    (122, "JioHotstar"),
    (220, "JioCinema"),
];

/// Internal service name for a catalog provider id
pub fn service_name_for_provider(provider_id: i64) -> Option<&'static str> {
    PROVIDER_SERVICE_NAMES
        .iter()
        .find(|(id, _)| *id == provider_id)
        .map(|(_, name)| *name)
}

/// Resolves catalog provider ids to active service ids, de-duplicated, in
/// first-seen order. Unknown providers and inactive services drop out.
pub fn resolve_provider_services(provider_ids: &[i64], active: &[StreamingService]) -> Vec<Uuid> {
    let mut resolved = Vec::new();
    for provider_id in provider_ids {
        let Some(name) = service_name_for_provider(*provider_id) else {
            tracing::debug!(provider_id, "Unmapped catalog provider id");
            continue;
        };
        let service = active
            .iter()
            .find(|s| s.is_active && s.service_name.eq_ignore_ascii_case(name));
        if let Some(service) = service {
            if !resolved.contains(&service.id) {
                resolved.push(service.id);
            }
        }
    }
    resolved
}
