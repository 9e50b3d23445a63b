use std::collections::{HashMap, HashSet};

use chrono::DateTime;

use crate::config::AuthConfig;
use crate::models::{
    ManifestMeta, MonitoredFailure, RepositoryEntry, TagCount, TagEntry, TagList,
};
use crate::paginate::{CatalogPager, PaginationMethod, PaginationState};
use crate::registry::RegistryApi;

/// Tag enrichment is skipped when a page brings in more repositories than
/// this; the rows get a sentinel instead of hundreds of extra requests.
/// A policy tunable, nothing downstream depends on the value.
pub const TAG_ENRICHMENT_LIMIT: usize = 50;

/// At most this many recent tags are shown per repository row
pub const RECENT_TAG_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Result of one listing load: rows, continuation state, and any
/// monitored repositories that could not be fetched.
#[derive(Debug)]
pub struct RepositoryListing {
    pub repositories: Vec<RepositoryEntry>,
    pub pagination: PaginationState,
    pub monitored_failures: Vec<MonitoredFailure>,
}

/// Assembles repository listings: monitored repositories first and always
/// visible, catalog pages behind them, no duplicate rows.
pub struct RepositoryLister<'a> {
    api: &'a dyn RegistryApi,
    page_size: usize,
}

impl<'a> RepositoryLister<'a> {
    pub fn new(api: &'a dyn RegistryApi, page_size: usize) -> Self {
        RepositoryLister { api, page_size }
    }

    /// Initial load: fetch every monitored repository independently of the
    /// catalog (catalog scope may be restricted while per-repository reads
    /// still work), then the catalog window, then merge.
    pub async fn load(
        &self,
        config: &AuthConfig,
        offset: usize,
        limit: usize,
        direction: SortDirection,
    ) -> RepositoryListing {
        let (mut monitored, failures) = self.fetch_monitored(&config.monitored_repos).await;

        let pager = CatalogPager::with_page_size(self.api, self.page_size);
        let window = pager.fetch_window(offset, limit).await;

        let monitored_ok: HashSet<String> = monitored
            .iter()
            .filter(|entry| !entry.is_error)
            .map(|entry| entry.name.clone())
            .collect();

        let mut catalog = self
            .catalog_entries(&window.repositories, &monitored_ok)
            .await;

        let mut repositories = Vec::with_capacity(monitored.len() + catalog.len());
        repositories.append(&mut monitored);
        repositories.append(&mut catalog);
        sort_grouped(&mut repositories, direction);

        RepositoryListing {
            repositories,
            pagination: window.state,
            monitored_failures: failures,
        }
    }

    /// One continuation batch for an ongoing listing; monitored rows were
    /// already produced by the initial load and only feed dedup here.
    pub async fn load_more(
        &self,
        state: &PaginationState,
        batch: usize,
        monitored_ok: &HashSet<String>,
    ) -> RepositoryListing {
        let pager = CatalogPager::with_page_size(self.api, self.page_size);
        let window = pager.continue_window(state, batch).await;
        let repositories = self.catalog_entries(&window.repositories, monitored_ok).await;

        RepositoryListing {
            repositories,
            pagination: window.state,
            monitored_failures: Vec::new(),
        }
    }

    /// Fetch each monitored repository in configured order. A failure
    /// becomes an error-marked row plus a structured failure item; it
    /// never aborts the listing.
    async fn fetch_monitored(
        &self,
        names: &[String],
    ) -> (Vec<RepositoryEntry>, Vec<MonitoredFailure>) {
        let mut entries = Vec::with_capacity(names.len());
        let mut failures = Vec::new();

        for name in names {
            let record = self.api.fetch(&format!("/v2/{}/tags/list", name)).await;
            match record.parse_json::<TagList>() {
                Some(list) if record.is_success() => {
                    let tags = list.tags.unwrap_or_default();
                    let mut entry = RepositoryEntry::monitored(name);
                    entry.tag_count = TagCount::Exact(tags.len());
                    entry.recent_tags = select_recent_tags(&tags, &list.manifest);
                    entries.push(entry);
                }
                _ => {
                    let reason = match &record.error {
                        Some(err) => err.clone(),
                        None => format!("HTTP {}", record.status_code),
                    };
                    entries.push(RepositoryEntry::monitored_error(name, &reason));
                    failures.push(MonitoredFailure {
                        name: name.clone(),
                        error: reason,
                    });
                }
            }
        }

        (entries, failures)
    }

    /// Catalog names → rows, dropping names already shown as monitored.
    /// Tags are only fetched for reasonably sized pages.
    async fn catalog_entries(
        &self,
        names: &[String],
        monitored_ok: &HashSet<String>,
    ) -> Vec<RepositoryEntry> {
        let names: Vec<&String> = names
            .iter()
            .filter(|name| !monitored_ok.contains(name.as_str()))
            .collect();

        let enrich = names.len() <= TAG_ENRICHMENT_LIMIT;
        let mut entries = Vec::with_capacity(names.len());

        for name in names {
            let mut entry = RepositoryEntry::catalog(name);
            if enrich {
                let record = self.api.fetch(&format!("/v2/{}/tags/list", name)).await;
                match record.parse_json::<TagList>() {
                    Some(list) if record.is_success() => {
                        let tags = list.tags.unwrap_or_default();
                        entry.tag_count = TagCount::Exact(tags.len());
                        entry.recent_tags = select_recent_tags(&tags, &list.manifest);
                    }
                    _ => entry.tag_count = TagCount::Unknown,
                }
            } else {
                entry.tag_count = TagCount::Many;
            }
            entries.push(entry);
        }

        entries
    }
}

/// Monitored rows always precede catalog rows; each group sorts
/// alphabetically (case-insensitive) on its own, and flipping the
/// direction flips both groups without demoting monitored rows.
pub fn sort_grouped(entries: &mut Vec<RepositoryEntry>, direction: SortDirection) {
    let (mut monitored, mut catalog): (Vec<_>, Vec<_>) =
        entries.drain(..).partition(|entry| entry.is_monitored);

    for group in [&mut monitored, &mut catalog] {
        group.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        if direction == SortDirection::Descending {
            group.reverse();
        }
    }

    entries.extend(monitored);
    entries.extend(catalog);
}

/// Order tags newest-first using the per-manifest metadata some
/// registries include in their tags/list response; without metadata the
/// order is plain case-insensitive alphabetical.
pub fn sort_tags_by_timestamp(
    tags: &[String],
    manifest: &HashMap<String, ManifestMeta>,
) -> Vec<String> {
    let timestamps = tag_timestamps(manifest);
    let mut sorted: Vec<String> = tags.to_vec();

    if timestamps.is_empty() {
        sorted.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
    } else {
        sorted.sort_by(|a, b| {
            let ta = timestamps.get(a).copied().unwrap_or(0);
            let tb = timestamps.get(b).copied().unwrap_or(0);
            tb.cmp(&ta)
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });
    }
    sorted
}

/// tag → millisecond timestamp, upload time preferred over creation time
fn tag_timestamps(manifest: &HashMap<String, ManifestMeta>) -> HashMap<String, i64> {
    let mut timestamps = HashMap::new();
    for meta in manifest.values() {
        if let Some(ms) = meta.timestamp_ms() {
            for tag in &meta.tag {
                timestamps.insert(tag.clone(), ms);
            }
        }
    }
    timestamps
}

/// The newest tags for a repository row: timestamp-sorted, never the
/// literal "latest", at most three.
pub fn select_recent_tags(tags: &[String], manifest: &HashMap<String, ManifestMeta>) -> Vec<String> {
    sort_tags_by_timestamp(tags, manifest)
        .into_iter()
        .filter(|tag| tag.as_str() != "latest")
        .take(RECENT_TAG_LIMIT)
        .collect()
}

/// Full tag rows for the tags view, newest first with upload dates
pub fn tag_entries(list: &TagList) -> Vec<TagEntry> {
    let tags = list.tags.clone().unwrap_or_default();
    let timestamps = tag_timestamps(&list.manifest);
    sort_tags_by_timestamp(&tags, &list.manifest)
        .into_iter()
        .map(|name| {
            let uploaded = timestamps
                .get(&name)
                .and_then(|ms| DateTime::from_timestamp_millis(*ms));
            TagEntry { name, uploaded }
        })
        .collect()
}

/// Accumulated listing state for one view, with a generation counter so a
/// late-arriving load for a superseded view is discarded instead of
/// corrupting the list. Only one load per generation may apply.
#[derive(Debug, Default)]
pub struct ListingSession {
    entries: Vec<RepositoryEntry>,
    pagination: Option<PaginationState>,
    failures: Vec<MonitoredFailure>,
    monitored_ok: HashSet<String>,
    generation: u64,
}

impl ListingSession {
    pub fn new() -> Self {
        ListingSession::default()
    }

    /// Start a new load, superseding any in-flight one
    pub fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Apply an initial load; replaces all rows. Returns false (and
    /// changes nothing) when the result is stale.
    pub fn apply_initial(&mut self, generation: u64, listing: RepositoryListing) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.monitored_ok = listing
            .repositories
            .iter()
            .filter(|entry| entry.is_monitored && !entry.is_error)
            .map(|entry| entry.name.clone())
            .collect();
        self.entries = listing.repositories;
        self.failures = listing.monitored_failures;
        self.pagination = Some(listing.pagination);
        true
    }

    /// Append a continuation batch. Stale results are discarded.
    pub fn apply_batch(&mut self, generation: u64, listing: RepositoryListing) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.entries.extend(listing.repositories);
        self.pagination = Some(listing.pagination);
        true
    }

    pub fn entries(&self) -> &[RepositoryEntry] {
        &self.entries
    }

    pub fn failures(&self) -> &[MonitoredFailure] {
        &self.failures
    }

    pub fn monitored_ok(&self) -> &HashSet<String> {
        &self.monitored_ok
    }

    pub fn pagination(&self) -> Option<&PaginationState> {
        self.pagination.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.pagination
            .as_ref()
            .map(|state| state.has_more)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn method(&self) -> PaginationMethod {
        self.pagination
            .as_ref()
            .map(|state| state.method.clone())
            .unwrap_or(PaginationMethod::Legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{ScriptedRegistry, ScriptedResponse};

    const BASE: &str = "https://registry.example.com";

    fn tags_body(name: &str, tags: &[&str]) -> String {
        serde_json::json!({ "name": name, "tags": tags }).to_string()
    }

    fn catalog_stub(registry: &ScriptedRegistry, names: &[&str]) {
        registry.stub(
            "/v2/_catalog?n=100",
            ScriptedResponse::json(200, &serde_json::json!({ "repositories": names }).to_string()),
        );
    }

    fn tags_stub(registry: &ScriptedRegistry, repo: &str, tags: &[&str]) {
        registry.stub(
            &format!("/v2/{}/tags/list", repo),
            ScriptedResponse::json(200, &tags_body(repo, tags)),
        );
    }

    fn config_with_monitored(names: &[&str]) -> AuthConfig {
        AuthConfig {
            monitored_repos: names.iter().map(|s| s.to_string()).collect(),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn monitored_entries_lead_and_are_not_duplicated() {
        let registry = ScriptedRegistry::new(BASE);
        catalog_stub(&registry, &["a", "b", "c"]);
        for repo in ["a", "b", "c", "z"] {
            tags_stub(&registry, repo, &["v1"]);
        }

        let lister = RepositoryLister::new(&registry, 100);
        let listing = lister
            .load(
                &config_with_monitored(&["b", "z"]),
                0,
                10,
                SortDirection::Ascending,
            )
            .await;

        let names: Vec<&str> = listing
            .repositories
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "z", "a", "c"]);
        assert_eq!(
            listing
                .repositories
                .iter()
                .filter(|e| e.name == "b")
                .count(),
            1
        );
        assert!(listing.repositories[0].is_monitored);
        assert!(listing.repositories[1].is_monitored);
        assert!(listing.monitored_failures.is_empty());
    }

    #[tokio::test]
    async fn monitored_failure_is_isolated_to_its_row() {
        let registry = ScriptedRegistry::new(BASE);
        catalog_stub(&registry, &["a", "b"]);
        tags_stub(&registry, "a", &["v1"]);
        tags_stub(&registry, "b", &["v1"]);
        registry.stub(
            "/v2/z/tags/list",
            ScriptedResponse::json(403, "{\"errors\": []}"),
        );

        let lister = RepositoryLister::new(&registry, 100);
        let listing = lister
            .load(
                &config_with_monitored(&["z"]),
                0,
                10,
                SortDirection::Ascending,
            )
            .await;

        let names: Vec<&str> = listing
            .repositories
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["z", "a", "b"]);

        let z = &listing.repositories[0];
        assert!(z.is_monitored && z.is_error);
        assert_eq!(listing.monitored_failures.len(), 1);
        assert_eq!(listing.monitored_failures[0].name, "z");
        assert!(listing.monitored_failures[0].error.contains("403"));
    }

    #[tokio::test]
    async fn reverse_sort_flips_groups_but_monitored_stay_first() {
        let registry = ScriptedRegistry::new(BASE);
        catalog_stub(&registry, &["alpha", "beta"]);
        for repo in ["alpha", "beta", "mon-a", "mon-b"] {
            tags_stub(&registry, repo, &["v1"]);
        }

        let lister = RepositoryLister::new(&registry, 100);
        let listing = lister
            .load(
                &config_with_monitored(&["mon-a", "mon-b"]),
                0,
                10,
                SortDirection::Descending,
            )
            .await;

        let names: Vec<&str> = listing
            .repositories
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["mon-b", "mon-a", "beta", "alpha"]);
    }

    #[tokio::test]
    async fn large_pages_skip_tag_enrichment() {
        let registry = ScriptedRegistry::new(BASE);
        let names: Vec<String> = (0..60).map(|i| format!("repo{:02}", i)).collect();
        let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        catalog_stub(&registry, &name_refs);

        let lister = RepositoryLister::new(&registry, 100);
        let listing = lister
            .load(&AuthConfig::default(), 0, 60, SortDirection::Ascending)
            .await;

        assert_eq!(listing.repositories.len(), 60);
        assert!(listing
            .repositories
            .iter()
            .all(|e| e.tag_count == TagCount::Many));
        // One catalog call, zero tags calls
        assert_eq!(registry.call_count(), 1);
    }

    #[test]
    fn recent_tags_are_newest_first_and_exclude_latest() {
        let mut manifest = HashMap::new();
        manifest.insert(
            "sha256:aa".to_string(),
            ManifestMeta {
                tag: vec!["v2".to_string()],
                time_uploaded_ms: Some("200".to_string()),
                time_created_ms: None,
            },
        );
        manifest.insert(
            "sha256:bb".to_string(),
            ManifestMeta {
                tag: vec!["v1".to_string()],
                time_uploaded_ms: Some("100".to_string()),
                time_created_ms: None,
            },
        );

        let tags = vec!["v1".to_string(), "v2".to_string(), "latest".to_string()];
        assert_eq!(select_recent_tags(&tags, &manifest), vec!["v2", "v1"]);
    }

    #[test]
    fn recent_tags_fall_back_to_alphabetical_without_metadata() {
        let tags = vec![
            "zeta".to_string(),
            "Alpha".to_string(),
            "latest".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
        ];
        assert_eq!(
            select_recent_tags(&tags, &HashMap::new()),
            vec!["Alpha", "beta", "gamma"]
        );
    }

    #[test]
    fn timestamp_ties_break_alphabetically() {
        let mut manifest = HashMap::new();
        manifest.insert(
            "sha256:aa".to_string(),
            ManifestMeta {
                tag: vec!["b-tag".to_string(), "a-tag".to_string()],
                time_uploaded_ms: Some("500".to_string()),
                time_created_ms: None,
            },
        );
        let tags = vec!["b-tag".to_string(), "a-tag".to_string()];
        assert_eq!(sort_tags_by_timestamp(&tags, &manifest), vec!["a-tag", "b-tag"]);
    }

    #[test]
    fn stale_generation_results_are_discarded() {
        let mut session = ListingSession::new();
        let stale = session.begin_load();
        let current = session.begin_load();

        let listing = RepositoryListing {
            repositories: vec![RepositoryEntry::catalog("late")],
            pagination: PaginationState::start(),
            monitored_failures: Vec::new(),
        };
        assert!(!session.apply_initial(stale, listing));
        assert!(session.is_empty());

        let listing = RepositoryListing {
            repositories: vec![RepositoryEntry::catalog("fresh")],
            pagination: PaginationState::start(),
            monitored_failures: Vec::new(),
        };
        assert!(session.apply_initial(current, listing));
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn continuation_batches_respect_monitored_dedup() {
        let registry = ScriptedRegistry::new(BASE);
        registry.stub(
            "/v2/_catalog?n=2&next_page=tok1",
            ScriptedResponse::json(
                200,
                &serde_json::json!({ "repositories": ["mon", "new"] }).to_string(),
            ),
        );
        tags_stub(&registry, "new", &["v1"]);

        let lister = RepositoryLister::new(&registry, 2);
        let state = PaginationState {
            next_page_token: Some("tok1".to_string()),
            method: PaginationMethod::LinkHeader,
            total_loaded: 2,
            has_more: true,
        };
        let monitored_ok: HashSet<String> = ["mon".to_string()].into_iter().collect();

        let listing = lister.load_more(&state, 2, &monitored_ok).await;
        let names: Vec<&str> = listing
            .repositories
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["new"]);
        assert!(!listing.pagination.has_more);
    }
}
