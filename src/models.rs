use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// GET /v2/_catalog response
#[derive(Debug, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// GET /v2/<repo>/tags/list response
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct TagList {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Per-manifest metadata, only present on some registries (GCR-style)
    #[serde(default)]
    pub manifest: HashMap<String, ManifestMeta>,
}

/// One entry of the `manifest` map in a tags/list response
#[derive(Debug, Deserialize)]
pub struct ManifestMeta {
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(rename = "timeUploadedMs")]
    pub time_uploaded_ms: Option<String>,
    #[serde(rename = "timeCreatedMs")]
    pub time_created_ms: Option<String>,
}

impl ManifestMeta {
    /// Millisecond timestamp for this manifest: upload time preferred over
    /// creation time. Registries encode these as decimal strings; "0" and
    /// unparseable values count as absent.
    pub fn timestamp_ms(&self) -> Option<i64> {
        for raw in [&self.time_uploaded_ms, &self.time_created_ms] {
            if let Some(s) = raw {
                if let Ok(ms) = s.parse::<i64>() {
                    if ms > 0 {
                        return Some(ms);
                    }
                }
            }
        }
        None
    }
}

/// GET /v2/<repo>/manifests/<tag> (Docker schema v2 or OCI v1)
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: Option<String>,
    pub config: Option<ManifestDescriptor>,
    #[serde(default)]
    pub layers: Vec<ManifestDescriptor>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct ManifestDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: Option<u64>,
    pub digest: String,
}

/// Tag count shown on a repository row. `Many` marks repositories whose
/// tags were deliberately not fetched on a large page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCount {
    Exact(usize),
    Many,
    Unknown,
}

impl fmt::Display for TagCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagCount::Exact(n) => write!(f, "{}", n),
            TagCount::Many => write!(f, "many"),
            TagCount::Unknown => write!(f, "?"),
        }
    }
}

/// One row of a repository listing. Rebuilt whole on every refresh,
/// never mutated in place.
#[derive(Debug, Clone)]
pub struct RepositoryEntry {
    pub name: String,
    pub tag_count: TagCount,
    /// Most recent first, at most three, never the literal "latest"
    pub recent_tags: Vec<String>,
    pub is_monitored: bool,
    pub is_error: bool,
    pub error: Option<String>,
}

impl RepositoryEntry {
    pub fn catalog(name: &str) -> Self {
        RepositoryEntry {
            name: name.to_string(),
            tag_count: TagCount::Unknown,
            recent_tags: Vec::new(),
            is_monitored: false,
            is_error: false,
            error: None,
        }
    }

    pub fn monitored(name: &str) -> Self {
        RepositoryEntry {
            is_monitored: true,
            ..Self::catalog(name)
        }
    }

    pub fn monitored_error(name: &str, error: &str) -> Self {
        RepositoryEntry {
            is_monitored: true,
            is_error: true,
            error: Some(error.to_string()),
            ..Self::catalog(name)
        }
    }

    pub fn recent_tags_display(&self) -> String {
        if let Some(err) = &self.error {
            return format!("Error: {}", err);
        }
        if self.recent_tags.is_empty() {
            "No recent tags".to_string()
        } else {
            self.recent_tags.join(", ")
        }
    }
}

/// A monitored repository whose fetch failed; reported alongside the
/// listing rather than aborting it.
#[derive(Debug, Clone)]
pub struct MonitoredFailure {
    pub name: String,
    pub error: String,
}

/// One tag row in the tags view
#[derive(Debug, Clone)]
pub struct TagEntry {
    pub name: String,
    pub uploaded: Option<DateTime<Utc>>,
}

impl TagEntry {
    pub fn uploaded_display(&self) -> String {
        match &self.uploaded {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_meta_prefers_upload_time() {
        let meta = ManifestMeta {
            tag: vec!["v1".to_string()],
            time_uploaded_ms: Some("200".to_string()),
            time_created_ms: Some("100".to_string()),
        };
        assert_eq!(meta.timestamp_ms(), Some(200));
    }

    #[test]
    fn manifest_meta_falls_back_to_created_time() {
        let meta = ManifestMeta {
            tag: vec![],
            time_uploaded_ms: Some("0".to_string()),
            time_created_ms: Some("100".to_string()),
        };
        assert_eq!(meta.timestamp_ms(), Some(100));
    }

    #[test]
    fn manifest_meta_without_timestamps() {
        let meta = ManifestMeta {
            tag: vec![],
            time_uploaded_ms: None,
            time_created_ms: Some("not-a-number".to_string()),
        };
        assert_eq!(meta.timestamp_ms(), None);
    }

    #[test]
    fn tag_list_parses_manifest_metadata() {
        let body = r#"{
            "name": "tools/builder",
            "tags": ["v1", "v2", "latest"],
            "manifest": {
                "sha256:aa": {"tag": ["v2", "latest"], "timeUploadedMs": "1700000000000"},
                "sha256:bb": {"tag": ["v1"], "timeCreatedMs": "1600000000000"}
            }
        }"#;
        let list: TagList = serde_json::from_str(body).unwrap();
        assert_eq!(list.tags.as_ref().unwrap().len(), 3);
        assert_eq!(list.manifest.len(), 2);
        assert_eq!(
            list.manifest["sha256:aa"].timestamp_ms(),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn tag_list_tolerates_missing_manifest_field() {
        let body = r#"{"name": "app", "tags": ["a"]}"#;
        let list: TagList = serde_json::from_str(body).unwrap();
        assert!(list.manifest.is_empty());
    }

    #[test]
    fn error_entry_display() {
        let entry = RepositoryEntry::monitored_error("private/app", "HTTP 403");
        assert!(entry.is_monitored);
        assert!(entry.is_error);
        assert_eq!(entry.recent_tags_display(), "Error: HTTP 403");
    }
}
