use std::fmt;

use regex::Regex;
use url::Url;

use crate::audit::ApiCallRecord;
use crate::models::CatalogPage;
use crate::registry::RegistryApi;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// How a listing is (or was) being paginated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationMethod {
    /// Continuation tokens from `Link: <...>; rel="next"` headers
    LinkHeader,
    /// Client-side offset walk, used when a continuation token is
    /// rejected or absent
    OffsetBased,
    /// Registry without Link support: a full page may hide more entries
    Legacy,
    /// Nothing left to fetch
    Complete,
    Failed {
        reason: String,
    },
}

impl fmt::Display for PaginationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationMethod::LinkHeader => write!(f, "link header"),
            PaginationMethod::OffsetBased => write!(f, "offset fallback"),
            PaginationMethod::Legacy => write!(f, "legacy"),
            PaginationMethod::Complete => write!(f, "complete"),
            PaginationMethod::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Listing-session pagination state. `has_more == false` means no further
/// fetch will be attempted; a stored token always accompanies
/// `LinkHeader` while more data remains.
#[derive(Debug, Clone)]
pub struct PaginationState {
    pub next_page_token: Option<String>,
    pub method: PaginationMethod,
    /// Catalog entries consumed so far; the offset a fallback resumes at
    pub total_loaded: usize,
    pub has_more: bool,
}

impl PaginationState {
    #[allow(dead_code)]
    pub fn start() -> Self {
        PaginationState {
            next_page_token: None,
            method: PaginationMethod::Legacy,
            total_loaded: 0,
            has_more: true,
        }
    }
}

/// One window of catalog names plus the state to continue from
#[derive(Debug)]
pub struct CatalogWindow {
    pub repositories: Vec<String>,
    pub state: PaginationState,
}

/// Drives repeated catalog requests against a registry, following Link
/// headers and recovering from server-side token expiry.
pub struct CatalogPager<'a> {
    api: &'a dyn RegistryApi,
    page_size: usize,
}

impl<'a> CatalogPager<'a> {
    pub fn new(api: &'a dyn RegistryApi) -> Self {
        CatalogPager {
            api,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(api: &'a dyn RegistryApi, page_size: usize) -> Self {
        CatalogPager {
            api,
            page_size: page_size.max(1),
        }
    }

    /// Fetch the window `[offset, offset+limit)` of the catalog, walking
    /// as many pages as that takes. The result is the requested slice
    /// regardless of page size.
    pub async fn fetch_window(&self, offset: usize, limit: usize) -> CatalogWindow {
        self.walk(offset, limit, true).await
    }

    /// Fetch the next batch for an ongoing listing. Resumes from the
    /// stored continuation token when one exists; a 400/401 rejection of
    /// that token means the server expired the cursor, and the equivalent
    /// window is retried once as an offset walk instead of surfacing the
    /// error. Without a token the batch is an offset walk from the start.
    pub async fn continue_window(&self, state: &PaginationState, batch: usize) -> CatalogWindow {
        if !state.has_more {
            return CatalogWindow {
                repositories: Vec::new(),
                state: PaginationState {
                    next_page_token: None,
                    method: PaginationMethod::Complete,
                    total_loaded: state.total_loaded,
                    has_more: false,
                },
            };
        }

        if let (Some(token), PaginationMethod::LinkHeader) =
            (&state.next_page_token, &state.method)
        {
            let url = self.catalog_url(Some(token.as_str()));
            let record = self.api.fetch(&url).await;

            if matches!(record.status_code, 400 | 401) {
                // Stale catalog cursor; registries reject or redirect
                // them. Retry the same window by offset, once.
                let mut window = self.walk(state.total_loaded, batch, false).await;
                if !matches!(window.state.method, PaginationMethod::Failed { .. }) {
                    window.state.method = PaginationMethod::OffsetBased;
                }
                return window;
            }

            if record.status_code != 200 {
                return failed_window(&record, state.total_loaded);
            }

            let repos = page_repositories(&record);
            if repos.is_empty() {
                return CatalogWindow {
                    repositories: Vec::new(),
                    state: PaginationState {
                        next_page_token: None,
                        method: PaginationMethod::Complete,
                        total_loaded: state.total_loaded,
                        has_more: false,
                    },
                };
            }

            let total_loaded = state.total_loaded + repos.len();
            let next = next_page_token(&record);
            let state = match next {
                Some(token) => PaginationState {
                    next_page_token: Some(token),
                    method: PaginationMethod::LinkHeader,
                    total_loaded,
                    has_more: true,
                },
                None => PaginationState {
                    next_page_token: None,
                    method: PaginationMethod::Complete,
                    total_loaded,
                    has_more: false,
                },
            };
            return CatalogWindow {
                repositories: repos,
                state,
            };
        }

        let mut window = self.walk(state.total_loaded, batch, false).await;
        if !matches!(
            window.state.method,
            PaginationMethod::Failed { .. } | PaginationMethod::Complete
        ) {
            window.state.method = PaginationMethod::OffsetBased;
        }
        window
    }

    /// Accumulate pages from the catalog start until `offset + limit`
    /// entries are covered, then slice the window out.
    async fn walk(&self, offset: usize, limit: usize, allow_fallback: bool) -> CatalogWindow {
        let target = offset.saturating_add(limit);
        let mut accumulated: Vec<String> = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let url = self.catalog_url(token.as_deref());
            let record = self.api.fetch(&url).await;

            if record.status_code != 200 {
                let token_rejected = token.is_some() && matches!(record.status_code, 400 | 401);
                if token_rejected && allow_fallback {
                    let already = accumulated.len();
                    let mut fallback = Box::pin(self.walk(
                        already,
                        target.saturating_sub(already),
                        false,
                    ))
                    .await;
                    if !matches!(fallback.state.method, PaginationMethod::Failed { .. }) {
                        fallback.state.method = PaginationMethod::OffsetBased;
                    }
                    accumulated.extend(fallback.repositories);
                    return CatalogWindow {
                        repositories: window_slice(&accumulated, offset, target),
                        state: PaginationState {
                            total_loaded: accumulated.len(),
                            ..fallback.state
                        },
                    };
                }
                let mut window = failed_window(&record, accumulated.len());
                window.repositories = window_slice(&accumulated, offset, target);
                return window;
            }

            let repos = page_repositories(&record);
            // An empty page also means the listing is exhausted
            if repos.is_empty() {
                return CatalogWindow {
                    repositories: window_slice(&accumulated, offset, target),
                    state: PaginationState {
                        next_page_token: None,
                        method: PaginationMethod::Complete,
                        total_loaded: accumulated.len(),
                        has_more: false,
                    },
                };
            }

            let page_len = repos.len();
            accumulated.extend(repos);

            let link_present = record.header("link").is_some();
            let next = next_page_token(&record);

            if accumulated.len() >= target {
                let state = match next {
                    Some(token) => PaginationState {
                        next_page_token: Some(token),
                        method: PaginationMethod::LinkHeader,
                        total_loaded: accumulated.len(),
                        has_more: true,
                    },
                    None => end_of_walk_state(accumulated.len(), link_present, page_len, self.page_size),
                };
                return CatalogWindow {
                    repositories: window_slice(&accumulated, offset, target),
                    state,
                };
            }

            match next {
                Some(next_token) => token = Some(next_token),
                None => {
                    let state =
                        end_of_walk_state(accumulated.len(), link_present, page_len, self.page_size);
                    return CatalogWindow {
                        repositories: window_slice(&accumulated, offset, target),
                        state,
                    };
                }
            }
        }
    }

    fn catalog_url(&self, token: Option<&str>) -> String {
        let mut url = format!("{}/v2/_catalog?n={}", self.api.base_url(), self.page_size);
        if let Some(token) = token {
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            url.push_str("&next_page=");
            url.push_str(&encoded);
        }
        url
    }
}

/// Completion state when a walk stops without a continuation token. A
/// `next` relation's absence is the authoritative completion signal; the
/// short-page heuristic only applies when the registry sends no Link
/// header at all.
fn end_of_walk_state(
    total_loaded: usize,
    link_present: bool,
    page_len: usize,
    page_size: usize,
) -> PaginationState {
    if link_present || page_len < page_size {
        PaginationState {
            next_page_token: None,
            method: PaginationMethod::Complete,
            total_loaded,
            has_more: false,
        }
    } else {
        // Full page from a Link-less registry: more entries may exist but
        // only an offset walk can reach them
        PaginationState {
            next_page_token: None,
            method: PaginationMethod::Legacy,
            total_loaded,
            has_more: true,
        }
    }
}

fn failed_window(record: &ApiCallRecord, total_loaded: usize) -> CatalogWindow {
    let reason = match &record.error {
        Some(err) => err.clone(),
        None => format!("HTTP {}", record.status_code),
    };
    CatalogWindow {
        repositories: Vec::new(),
        state: PaginationState {
            next_page_token: None,
            method: PaginationMethod::Failed { reason },
            total_loaded,
            has_more: false,
        },
    }
}

fn page_repositories(record: &ApiCallRecord) -> Vec<String> {
    record
        .parse_json::<CatalogPage>()
        .map(|page| page.repositories)
        .unwrap_or_default()
}

fn window_slice(accumulated: &[String], offset: usize, target: usize) -> Vec<String> {
    if offset >= accumulated.len() {
        return Vec::new();
    }
    accumulated[offset..accumulated.len().min(target)].to_vec()
}

/// Parse an RFC5988-style Link header into (url, relation) pairs
pub fn parse_link_header(value: &str) -> Vec<(String, String)> {
    let Ok(re) = Regex::new(r#"<([^>]*)>\s*;\s*rel="([^"]*)""#) else {
        return Vec::new();
    };
    re.captures_iter(value)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/// Continuation token for the following request: the `next_page` query
/// parameter of the `next` relation, if the response carries one.
pub fn next_page_token(record: &ApiCallRecord) -> Option<String> {
    let link = record.header("link")?;
    for (target, rel) in parse_link_header(link) {
        if rel == "next" {
            return query_param(&target, "next_page");
        }
    }
    None
}

fn query_param(target: &str, name: &str) -> Option<String> {
    let absolute = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else if target.starts_with('/') {
        format!("http://registry.invalid{}", target)
    } else {
        format!("http://registry.invalid/{}", target)
    };
    let parsed = Url::parse(&absolute).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
