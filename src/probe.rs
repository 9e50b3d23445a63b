use std::fmt;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::models::CatalogPage;
use crate::registry::RegistryApi;

/// Connectivity checks use a shorter timeout than content fetches
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reachability/auth classification for a registry badge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryStatus {
    /// Version check and catalog both answered
    Connected,
    /// Version endpoint answers but the catalog is restricted
    VersionOnly,
    /// Catalog readable but the version check wants auth
    CatalogOnly,
    /// Neither endpoint answers, yet monitored repositories do
    /// (scope-limited tokens grant per-repository access without catalog
    /// access; a legitimate, common configuration)
    MonitoredOnly,
    /// Both endpoints demand auth; credentials are configured but unproven
    AuthUnverified,
    Unreachable {
        status: u16,
    },
}

impl RegistryStatus {
    pub fn badge(&self) -> &'static str {
        match self {
            RegistryStatus::Connected => "OK",
            RegistryStatus::VersionOnly
            | RegistryStatus::CatalogOnly
            | RegistryStatus::MonitoredOnly => "PART",
            RegistryStatus::AuthUnverified => "AUTH",
            RegistryStatus::Unreachable { .. } => "ERR",
        }
    }

    #[allow(dead_code)]
    pub fn is_reachable(&self) -> bool {
        !matches!(self, RegistryStatus::Unreachable { .. })
    }
}

impl fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryStatus::Connected => write!(f, "connected"),
            RegistryStatus::VersionOnly => write!(f, "partial access (catalog restricted)"),
            RegistryStatus::CatalogOnly => write!(f, "partial access (version check restricted)"),
            RegistryStatus::MonitoredOnly => {
                write!(f, "partial access (monitored repositories only)")
            }
            RegistryStatus::AuthUnverified => write!(f, "auth configured, not yet verified"),
            RegistryStatus::Unreachable { status: 0 } => write!(f, "unreachable (connection failed)"),
            RegistryStatus::Unreachable { status } => write!(f, "unreachable (HTTP {})", status),
        }
    }
}

#[derive(Debug)]
pub struct ProbeReport {
    pub status: RegistryStatus,
    pub response_time_ms: u64,
    /// Display count like `12(3)`: catalog plus monitored-not-in-catalog,
    /// with the total monitored count in parentheses
    pub repo_count: Option<String>,
}

/// Classify a registry with the cheapest signals first: unauthenticated
/// version check and catalog fetch, then a monitored-repository test
/// fetch only when both fail.
pub async fn probe_registry(api: &dyn RegistryApi, config: &AuthConfig) -> ProbeReport {
    let version = api.fetch("/v2/").await;
    let catalog = api.fetch("/v2/_catalog").await;

    let version_ok = version.status_code == 200;
    let catalog_ok = catalog.status_code == 200;

    let status = if version_ok && catalog_ok {
        RegistryStatus::Connected
    } else if version_ok {
        RegistryStatus::VersionOnly
    } else if catalog_ok {
        RegistryStatus::CatalogOnly
    } else {
        let monitored_reachable = match config.monitored_repos.first() {
            Some(first) => {
                let test = api.fetch(&format!("/v2/{}/tags/list", first)).await;
                test.status_code == 200
            }
            None => false,
        };
        if monitored_reachable {
            RegistryStatus::MonitoredOnly
        } else if version.status_code == 401
            && catalog.status_code == 401
            && config.has_credentials()
        {
            RegistryStatus::AuthUnverified
        } else {
            RegistryStatus::Unreachable {
                status: version.status_code,
            }
        }
    };

    let repo_count = if catalog_ok {
        let names = catalog
            .parse_json::<CatalogPage>()
            .map(|page| page.repositories)
            .unwrap_or_default();
        Some(format_repo_count(&names, &config.monitored_repos))
    } else {
        None
    };

    ProbeReport {
        status,
        response_time_ms: version.duration_ms,
        repo_count,
    }
}

/// Compose catalog and monitored counts without double-counting overlap.
/// The parenthetical always shows the total monitored count.
pub fn format_repo_count(catalog: &[String], monitored: &[String]) -> String {
    if monitored.is_empty() {
        return catalog.len().to_string();
    }
    let outside_catalog = monitored
        .iter()
        .filter(|name| !catalog.contains(name))
        .count();
    format!("{}({})", catalog.len() + outside_catalog, monitored.len())
}
