use std::collections::BTreeMap;
use std::time::Instant;

use chrono::DateTime;
use serde::Deserialize;
use tokio::process::Command;

use crate::audit::{self, ApiCallRecord, SharedAuditLog};
use crate::error::AppError;
use crate::models::{RepositoryEntry, TagCount, TagEntry};

/// Subprocess client for a local container runtime (podman or docker).
/// Remote-registry pagination and monitored-repo merging never run for
/// these endpoints; the command layer branches before reaching them.
pub struct LocalRuntimeClient {
    runtime: String,
    audit: SharedAuditLog,
}

/// One image row from `<runtime> images --format json`
#[derive(Debug, Deserialize)]
struct LocalImage {
    #[serde(rename = "Id", default)]
    #[allow(dead_code)]
    id: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Names", default)]
    names: Option<Vec<String>>,
    #[serde(rename = "Created", default)]
    created: Option<i64>,
}

impl LocalRuntimeClient {
    pub fn new(runtime: &str, audit: SharedAuditLog) -> Self {
        LocalRuntimeClient {
            runtime: runtime.to_string(),
            audit,
        }
    }

    /// `<runtime> version --format json` — runtime present and answering
    pub async fn check_health(&self) -> Result<String, AppError> {
        let stdout = self.run_command(&["version", "--format", "json"]).await?;
        let value: serde_json::Value = serde_json::from_str(&stdout).unwrap_or_default();
        // Podman wraps the client block; some runtimes emit a bare list
        let version = value
            .pointer("/Client/Version")
            .or_else(|| value.pointer("/0/Client/Version"))
            .or_else(|| value.pointer("/Version"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        Ok(version.to_string())
    }

    /// Group local images into repository rows
    pub async fn get_repositories(&self) -> Result<Vec<RepositoryEntry>, AppError> {
        let images = self.load_images().await?;

        // BTreeMap keeps repositories alphabetical like the catalog view
        let mut repos: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for image in &images {
            for (repo, tag) in image_references(image) {
                let tags = repos.entry(repo).or_default();
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        Ok(repos
            .into_iter()
            .map(|(name, tags)| {
                let mut entry = RepositoryEntry::catalog(&name);
                entry.tag_count = TagCount::Exact(tags.len());
                entry.recent_tags = tags
                    .iter()
                    .filter(|tag| tag.as_str() != "latest")
                    .take(3)
                    .cloned()
                    .collect();
                entry
            })
            .collect())
    }

    /// Tags of one local repository, newest first
    pub async fn get_tags(&self, repository: &str) -> Result<Vec<TagEntry>, AppError> {
        let images = self.load_images().await?;

        let mut tagged: Vec<(String, Option<i64>)> = Vec::new();
        for image in &images {
            for (repo, tag) in image_references(image) {
                if repo == repository && !tagged.iter().any(|(t, _)| *t == tag) {
                    tagged.push((tag, image.created));
                }
            }
        }
        tagged.sort_by(|a, b| b.1.unwrap_or(0).cmp(&a.1.unwrap_or(0)));

        Ok(tagged
            .into_iter()
            .map(|(name, created)| TagEntry {
                name,
                uploaded: created.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            })
            .collect())
    }

    async fn load_images(&self) -> Result<Vec<LocalImage>, AppError> {
        let stdout = self.run_command(&["images", "--format", "json"]).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        // Podman emits one JSON array; docker emits one object per line
        if let Ok(images) = serde_json::from_str::<Vec<LocalImage>>(&stdout) {
            return Ok(images);
        }
        Ok(stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<LocalImage>(line).ok())
            .collect())
    }

    /// Run one runtime command, auditing it the way HTTP calls are
    /// audited: method `LOCAL`, the command line as the URL, and the exit
    /// code in status_code.
    async fn run_command(&self, args: &[&str]) -> Result<String, AppError> {
        let start = Instant::now();
        let output = Command::new(&self.runtime)
            .args(args)
            .output()
            .await
            .map_err(|err| {
                AppError::LocalRuntime(format!(
                    "failed to run {} command: {}",
                    self.runtime, err
                ))
            })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let content = if stdout.is_empty() { &stderr } else { &stdout };

        audit::record_call(
            &self.audit,
            ApiCallRecord {
                method: "LOCAL".to_string(),
                url: format!("{} {}", self.runtime, args.join(" ")),
                status_code: exit_code.max(0) as u16,
                duration_ms,
                size_bytes: content.len() as u64,
                headers: Vec::new(),
                content_preview: audit::preview_of(content),
                full_content: content.clone(),
                timestamp: audit::now_timestamp(),
                error: if output.status.success() {
                    None
                } else {
                    Some(stderr.trim().to_string())
                },
            },
        );

        if !output.status.success() {
            return Err(AppError::LocalRuntime(format!(
                "{} command failed: {}",
                self.runtime,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

/// All (repository, tag) pairs an image row names. Digest-only references
/// become a short-hash pseudo-tag; a bare name implies "latest".
fn image_references(image: &LocalImage) -> Vec<(String, String)> {
    let mut refs: Vec<String> = Vec::new();
    for source in [&image.repo_tags, &image.names] {
        if let Some(list) = source {
            for name in list {
                if !refs.contains(name) {
                    refs.push(name.clone());
                }
            }
        }
    }

    let mut pairs = Vec::new();
    for reference in refs {
        if let Some((repo, digest)) = reference.split_once("@sha256:") {
            let short: String = digest.chars().take(12).collect();
            pairs.push((repo.to_string(), short));
        } else if let Some((repo, tag)) = reference.rsplit_once(':') {
            // Avoid splitting on a registry port: "host:5000/repo" has no
            // tag separator after the last slash
            if tag.contains('/') {
                pairs.push((reference.clone(), "latest".to_string()));
            } else {
                pairs.push((repo.to_string(), tag.to_string()));
            }
        } else {
            pairs.push((reference.clone(), "latest".to_string()));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tags: &[&str], created: i64) -> LocalImage {
        LocalImage {
            id: "sha256:abcdef".to_string(),
            repo_tags: Some(tags.iter().map(|s| s.to_string()).collect()),
            names: None,
            created: Some(created),
        }
    }

    #[test]
    fn references_split_repo_and_tag() {
        let pairs = image_references(&image(&["quay.io/team/app:v1"], 0));
        assert_eq!(pairs, vec![("quay.io/team/app".to_string(), "v1".to_string())]);
    }

    #[test]
    fn digest_references_become_short_pseudo_tags() {
        let pairs = image_references(&image(
            &["quay.io/team/app@sha256:0123456789abcdef0123456789abcdef"],
            0,
        ));
        assert_eq!(
            pairs,
            vec![("quay.io/team/app".to_string(), "0123456789ab".to_string())]
        );
    }

    #[test]
    fn registry_port_is_not_mistaken_for_a_tag() {
        let pairs = image_references(&image(&["localhost:5000/app"], 0));
        assert_eq!(pairs, vec![("localhost:5000/app".to_string(), "latest".to_string())]);
    }

    #[test]
    fn images_parse_both_array_and_line_delimited_output() {
        let array = r#"[{"Id": "sha256:aa", "RepoTags": ["app:v1"], "Created": 100}]"#;
        let parsed: Vec<LocalImage> = serde_json::from_str(array).unwrap();
        assert_eq!(parsed.len(), 1);

        let line = r#"{"Id": "sha256:bb", "RepoTags": ["app:v2"], "Created": 200}"#;
        let single: LocalImage = serde_json::from_str(line).unwrap();
        assert_eq!(single.created, Some(200));
    }
}
