use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::audit::{self, ApiCallRecord, SharedAuditLog};
use crate::auth::RegistryAuth;
use crate::config::{AuthConfig, AuthMode};
use crate::error::AppError;

/// Per-call timeout for content requests
pub const CONTENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept list negotiating Docker v2, manifest-list, and OCI formats
pub const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json, ",
    "application/vnd.docker.distribution.manifest.v1+json"
);

/// Read seam for everything that walks a registry: the paginator, the
/// monitored-repo merge, and the status probe all speak this trait, so
/// tests can drive them with a scripted registry instead of a socket.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Authenticated GET returning a uniform record for success and failure
    async fn fetch(&self, url: &str) -> ApiCallRecord;

    /// Base URL for building absolute endpoint paths
    fn base_url(&self) -> &str;
}

/// HTTP client for one registry's v2 API. Every call, success or failure,
/// lands in the shared audit log as a side effect.
pub struct RegistryClient {
    client: Client,
    base_url: String,
    auth: RegistryAuth,
    audit: SharedAuditLog,
}

impl RegistryClient {
    pub fn new(base_url: &str, config: AuthConfig, audit: SharedAuditLog) -> Result<Self, AppError> {
        Self::with_timeout(base_url, config, audit, CONTENT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        config: AuthConfig,
        audit: SharedAuditLog,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder().timeout(timeout).build()?;
        let auth = RegistryAuth::new(&base_url, config, client.clone(), audit.clone());
        Ok(RegistryClient {
            client,
            base_url,
            auth,
            audit,
        })
    }

    /// GET an endpoint with the configured auth. A 401 with credentials on
    /// hand triggers exactly one token-exchange retry; Basic failures are
    /// not retried since Basic is already the strongest credential form
    /// the user supplied. Never returns an error: transport failures come
    /// back as records with status_code 0.
    pub async fn request(&self, endpoint: &str) -> ApiCallRecord {
        self.request_with_accept(endpoint, None).await
    }

    pub async fn request_with_accept(
        &self,
        endpoint: &str,
        accept: Option<&str>,
    ) -> ApiCallRecord {
        let url = self.resolve_url(endpoint);

        let mut headers: Vec<(&str, String)> = Vec::new();
        if let Some(media) = accept {
            headers.push(("Accept", media.to_string()));
        }
        if let Some(value) = self.auth.auth_header() {
            headers.push(("Authorization", value));
        }

        let record = execute_get(&self.client, &url, &headers, &self.audit).await;

        if record.status_code == 401
            && self.auth.has_credentials()
            && self.auth.mode() != AuthMode::Basic
        {
            if let Some(token) = self.auth.acquire_token(None).await {
                let mut retry_headers: Vec<(&str, String)> = Vec::new();
                if let Some(media) = accept {
                    retry_headers.push(("Accept", media.to_string()));
                }
                retry_headers.push(("Authorization", format!("Bearer {}", token)));
                return execute_get(&self.client, &url, &retry_headers, &self.audit).await;
            }
        }

        record
    }

    /// GET /v2/ — capability and auth probe
    pub async fn check_version(&self) -> ApiCallRecord {
        self.request("/v2/").await
    }

    /// GET /v2/<repo>/tags/list
    pub async fn get_tags(&self, repo: &str) -> ApiCallRecord {
        self.request(&format!("/v2/{}/tags/list", repo)).await
    }

    /// GET /v2/<repo>/manifests/<tag> with media-type negotiation
    pub async fn get_manifest(&self, repo: &str, tag: &str) -> ApiCallRecord {
        self.request_with_accept(
            &format!("/v2/{}/manifests/{}", repo, tag),
            Some(MANIFEST_ACCEPT),
        )
        .await
    }

    /// Resolve a possibly-relative URL (Link headers often carry paths)
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn fetch(&self, url: &str) -> ApiCallRecord {
        self.request(url).await
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Execute a GET and normalize the outcome into a record. The audit
/// append happens here so no caller can forget it; the log redacts
/// headers on its side of the boundary.
pub(crate) async fn execute_get(
    client: &Client,
    url: &str,
    headers: &[(&str, String)],
    audit: &SharedAuditLog,
) -> ApiCallRecord {
    let mut builder = client.get(url);
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    execute_request(builder, "GET", url, audit).await
}

/// POST a form body (the token-exchange shape) with optional Basic auth.
pub(crate) async fn execute_post_form(
    client: &Client,
    url: &str,
    form: &[(&str, &str)],
    basic: Option<(&str, &str)>,
    audit: &SharedAuditLog,
) -> ApiCallRecord {
    let mut builder = client.post(url).form(form);
    if let Some((username, password)) = basic {
        builder = builder.basic_auth(username, Some(password));
    }
    execute_request(builder, "POST", url, audit).await
}

async fn execute_request(
    builder: reqwest::RequestBuilder,
    method: &str,
    url: &str,
    audit: &SharedAuditLog,
) -> ApiCallRecord {
    let start = Instant::now();

    let record = match send_and_read(builder).await {
        Ok((status, headers, body)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            ApiCallRecord {
                method: method.to_string(),
                url: url.to_string(),
                status_code: status,
                duration_ms,
                size_bytes: body.len() as u64,
                headers,
                content_preview: audit::preview_of(&String::from_utf8_lossy(&body)),
                full_content: String::from_utf8_lossy(&body).into_owned(),
                timestamp: audit::now_timestamp(),
                error: None,
            }
        }
        Err(err) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let details = describe_failure(url, &err);
            ApiCallRecord {
                method: method.to_string(),
                url: url.to_string(),
                status_code: 0,
                duration_ms,
                size_bytes: 0,
                headers: Vec::new(),
                content_preview: details.clone(),
                full_content: details,
                timestamp: audit::now_timestamp(),
                error: Some(err.to_string()),
            }
        }
    };

    audit::record_call(audit, record.clone());
    record
}

async fn send_and_read(
    builder: reqwest::RequestBuilder,
) -> Result<(u16, Vec<(String, String)>, Vec<u8>), reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    let body = response.bytes().await?.to_vec();
    Ok((status, headers, body))
}

/// Annotate transport failures with hints for the failure modes operators
/// actually hit: Google-hosted registries, TLS problems, missing auth.
fn describe_failure(url: &str, err: &reqwest::Error) -> String {
    let mut details = format!("Error: {}", err);
    let text = err.to_string().to_lowercase();
    if url.contains("gcr.io") || url.contains("googleapis.com") {
        details.push_str(" (Note: Google registries require authentication)");
    } else if text.contains("certificate") || text.contains("ssl") || text.contains("tls") {
        details.push_str(" (TLS/SSL certificate issue)");
    } else if text.contains("permission") || text.contains("unauthorized") {
        details.push_str(" (Authentication required)");
    }
    details
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::shared_log;

    #[test]
    fn resolve_url_relative_and_absolute() {
        let client = RegistryClient::new(
            "http://localhost:5000/",
            AuthConfig::default(),
            shared_log(),
        )
        .unwrap();
        assert_eq!(
            client.resolve_url("/v2/_catalog?n=100"),
            "http://localhost:5000/v2/_catalog?n=100"
        );
        assert_eq!(
            client.resolve_url("http://other:5000/v2/_catalog"),
            "http://other:5000/v2/_catalog"
        );
        assert_eq!(
            client.resolve_url("v2/_catalog"),
            "http://localhost:5000/v2/_catalog"
        );
    }

    #[tokio::test]
    async fn transport_failure_becomes_status_zero_record() {
        // Reserved TEST-NET address; connection fails fast and no HTTP
        // response is ever produced.
        let audit = shared_log();
        let client = RegistryClient::with_timeout(
            "http://192.0.2.1:1",
            AuthConfig::default(),
            audit.clone(),
            Duration::from_millis(300),
        )
        .unwrap();

        let record = client.check_version().await;
        assert_eq!(record.status_code, 0);
        assert!(record.error.is_some());
        assert_eq!(record.size_bytes, 0);
        assert_eq!(audit.lock().unwrap().len(), 1);
    }

    #[test]
    fn google_registry_failures_get_a_hint() {
        // describe_failure only needs a reqwest::Error; fabricate one from
        // a builder with an invalid URL.
        let err = Client::new().get("http://[bad").build().unwrap_err();
        let details = describe_failure("https://gcr.io/v2/", &err);
        assert!(details.contains("Google registries require authentication"));
    }
}
