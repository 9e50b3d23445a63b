use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::audit::SharedAuditLog;
use crate::config::{AuthConfig, AuthMode};
use crate::registry::{execute_get, execute_post_form};

/// Assumed token lifetime when the auth server sends no expires_in.
/// issued_at alone does not extend this window.
const ASSUMED_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Per-client token state, populated lazily from a 401 challenge.
#[derive(Debug, Default)]
pub struct TokenCache {
    cached_token: Option<String>,
    expires_at: Option<Instant>,
    scope: Option<String>,
    auth_realm: Option<String>,
    auth_service: Option<String>,
}

impl TokenCache {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Instant::now() >= expiry,
            None => false,
        }
    }

    fn clear_token(&mut self) {
        self.cached_token = None;
        self.expires_at = None;
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Credential handling for one registry: synthesizes Authorization
/// headers per the configured mode and runs the Docker-Registry-v2 token
/// exchange when the registry demands it.
pub struct RegistryAuth {
    base_url: String,
    config: AuthConfig,
    cache: Arc<RwLock<TokenCache>>,
    client: Client,
    audit: SharedAuditLog,
}

impl RegistryAuth {
    pub fn new(base_url: &str, config: AuthConfig, client: Client, audit: SharedAuditLog) -> Self {
        RegistryAuth {
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
            cache: Arc::new(RwLock::new(TokenCache::default())),
            client,
            audit,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.config.auth_mode
    }

    pub fn has_credentials(&self) -> bool {
        self.config.has_credentials()
    }

    /// Authorization header value for the configured mode, or None when no
    /// header applies right now.
    ///
    /// Bearer mode encodes `user:pass` when both are set and otherwise
    /// sends the password as a raw token; registries disagree on which
    /// form they expect and the caller cannot know in advance. Token mode
    /// only returns a cached, unexpired token; using an expired entry
    /// clears it so the transport falls through to a fresh exchange.
    pub fn auth_header(&self) -> Option<String> {
        match self.config.auth_mode {
            AuthMode::None => None,
            AuthMode::Basic => {
                if self.config.username.is_empty() && self.config.password.is_empty() {
                    return None;
                }
                Some(format!(
                    "Basic {}",
                    basic_credentials(&self.config.username, &self.config.password)
                ))
            }
            AuthMode::Bearer => {
                if self.config.has_credentials() {
                    Some(format!(
                        "Bearer {}",
                        basic_credentials(&self.config.username, &self.config.password)
                    ))
                } else if !self.config.password.is_empty() {
                    Some(format!("Bearer {}", self.config.password))
                } else {
                    None
                }
            }
            AuthMode::Token => {
                let mut cache = self.cache.write().ok()?;
                if cache.is_expired() {
                    cache.clear_token();
                    return None;
                }
                cache
                    .cached_token
                    .as_ref()
                    .map(|token| format!("Bearer {}", token))
            }
        }
    }

    /// Exchange credentials for a bearer token at the realm discovered
    /// from the registry's 401 challenge. Never raises: every failure path
    /// returns None and the calling request proceeds unauthenticated,
    /// surfacing as an observable 401 from the real endpoint.
    pub async fn acquire_token(&self, scope: Option<&str>) -> Option<String> {
        if !self.config.has_credentials() {
            return None;
        }

        let (realm, service, challenge_scope) = self.discover_challenge().await?;

        // A server-suggested scope wins over whatever the caller asked for
        let scope = challenge_scope
            .or_else(|| scope.map(|s| s.to_string()))
            .unwrap_or_else(|| self.config.auth_scope.clone());

        let record = execute_post_form(
            &self.client,
            &realm,
            &[("service", service.as_str()), ("scope", scope.as_str())],
            Some((self.config.username.as_str(), self.config.password.as_str())),
            &self.audit,
        )
        .await;

        if record.status_code != 200 {
            return None;
        }

        let response: TokenResponse = serde_json::from_str(&record.full_content).ok()?;
        let token = response.token.or(response.access_token)?;

        let ttl = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(ASSUMED_TOKEN_TTL);

        if let Ok(mut cache) = self.cache.write() {
            cache.cached_token = Some(token.clone());
            cache.expires_at = Some(Instant::now() + ttl);
            cache.scope = Some(scope);
        }

        Some(token)
    }

    /// Realm/service for the token exchange, discovered once from an
    /// unauthenticated probe of the version endpoint and cached after.
    async fn discover_challenge(&self) -> Option<(String, String, Option<String>)> {
        {
            let cache = self.cache.read().ok()?;
            if let (Some(realm), Some(service)) = (&cache.auth_realm, &cache.auth_service) {
                return Some((realm.clone(), service.clone(), cache.scope.clone()));
            }
        }

        let url = format!("{}/v2/", self.base_url);
        let record = execute_get(&self.client, &url, &[], &self.audit).await;
        if record.status_code != 401 {
            return None;
        }
        let challenge = record.header("www-authenticate")?.to_string();
        let params = parse_challenge(&challenge);

        let realm = params.get("realm")?.clone();
        let service = params.get("service").cloned().unwrap_or_default();
        let scope = params.get("scope").cloned();

        if let Ok(mut cache) = self.cache.write() {
            cache.auth_realm = Some(realm.clone());
            cache.auth_service = Some(service.clone());
            if scope.is_some() {
                cache.scope = scope.clone();
            }
        }

        Some((realm, service, scope))
    }

    #[cfg(test)]
    fn seed_token(&self, token: &str, expires_at: Instant) {
        let mut cache = self.cache.write().unwrap();
        cache.cached_token = Some(token.to_string());
        cache.expires_at = Some(expires_at);
    }

    #[cfg(test)]
    fn cached_token(&self) -> Option<String> {
        self.cache.read().unwrap().cached_token.clone()
    }
}

pub fn basic_credentials(username: &str, password: &str) -> String {
    BASE64.encode(format!("{}:{}", username, password))
}

/// Extract key="value" pairs from a WWW-Authenticate Bearer challenge
pub fn parse_challenge(header: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let Ok(re) = Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_-]*)\s*=\s*"([^"]*)""#) else {
        return params;
    };
    let body = header.strip_prefix("Bearer ").unwrap_or(header);
    for cap in re.captures_iter(body) {
        params.insert(cap[1].to_string(), cap[2].to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::shared_log;

    fn auth_with(config: AuthConfig) -> RegistryAuth {
        RegistryAuth::new(
            "https://registry.example.com",
            config,
            Client::new(),
            shared_log(),
        )
    }

    #[test]
    fn parse_challenge_extracts_realm_service_scope() {
        let header = r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="registry:catalog:*""#;
        let params = parse_challenge(header);
        assert_eq!(params["realm"], "https://auth.example.com/token");
        assert_eq!(params["service"], "registry.example.com");
        assert_eq!(params["scope"], "registry:catalog:*");
    }

    #[test]
    fn parse_challenge_tolerates_partial_headers() {
        let params = parse_challenge(r#"Bearer realm="https://auth.example.com/token""#);
        assert_eq!(params.len(), 1);
        assert!(parse_challenge("Basic").is_empty());
    }

    #[test]
    fn no_auth_mode_sends_nothing() {
        let auth = auth_with(AuthConfig::default());
        assert_eq!(auth.auth_header(), None);
    }

    #[test]
    fn basic_mode_encodes_credentials() {
        let auth = auth_with(AuthConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            auth_mode: AuthMode::Basic,
            ..AuthConfig::default()
        });
        assert_eq!(auth.auth_header(), Some("Basic dXNlcjpwYXNz".to_string()));
    }

    #[test]
    fn bearer_mode_encodes_pair_when_both_set() {
        let auth = auth_with(AuthConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            auth_mode: AuthMode::Bearer,
            ..AuthConfig::default()
        });
        assert_eq!(auth.auth_header(), Some("Bearer dXNlcjpwYXNz".to_string()));
    }

    #[test]
    fn bearer_mode_sends_raw_token_without_username() {
        let auth = auth_with(AuthConfig {
            password: "opaque-registry-token".to_string(),
            auth_mode: AuthMode::Bearer,
            ..AuthConfig::default()
        });
        assert_eq!(
            auth.auth_header(),
            Some("Bearer opaque-registry-token".to_string())
        );
    }

    #[test]
    fn token_mode_returns_cached_unexpired_token() {
        let auth = auth_with(AuthConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            auth_mode: AuthMode::Token,
            ..AuthConfig::default()
        });
        auth.seed_token("tok123", Instant::now() + Duration::from_secs(60));
        assert_eq!(auth.auth_header(), Some("Bearer tok123".to_string()));
    }

    #[test]
    fn expired_token_is_cleared_not_reused() {
        let auth = auth_with(AuthConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            auth_mode: AuthMode::Token,
            ..AuthConfig::default()
        });
        auth.seed_token("stale", Instant::now() - Duration::from_secs(1));

        assert_eq!(auth.auth_header(), None);
        assert_eq!(auth.cached_token(), None, "expired entry must be dropped");
    }

    #[tokio::test]
    async fn acquire_token_requires_credentials() {
        let auth = auth_with(AuthConfig {
            auth_mode: AuthMode::Token,
            ..AuthConfig::default()
        });
        assert_eq!(auth.acquire_token(None).await, None);
    }
}
