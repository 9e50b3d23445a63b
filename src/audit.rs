use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::de::DeserializeOwned;

/// The audit log retains only the most recent calls
pub const AUDIT_LOG_CAPACITY: usize = 100;

/// Stored previews are clipped to this many characters
pub const PREVIEW_CHARS: usize = 500;

/// Key fragments whose values must never reach a stored log line in clear
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "passwd",
    "passphrase",
    "pwd",
    "token",
    "secret",
    "private",
    "credential",
    "cred",
    "api_key",
    "apikey",
    "access_key",
    "authorization",
    "authenticate",
    "x-auth",
    "www-authenticate",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Redact a value when its key is sensitive: short values disappear
/// entirely, longer ones keep first3...last3 for identification.
pub fn redact_value(key: &str, value: &str) -> String {
    if !is_sensitive_key(key) {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "[REDACTED]".to_string()
    } else {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Redact a header map for storage; `append` runs every record through
/// this before it lands in the log.
pub fn redact_headers<'a, I>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(k, v)| (k.to_string(), redact_value(k, v)))
        .collect()
}

pub fn preview_of(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

pub fn now_timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

/// One outbound call, success or failure. `status_code` 0 means the
/// request never produced an HTTP response (DNS, TLS, timeout); for
/// `LOCAL` records it carries the subprocess exit code instead.
#[derive(Debug, Clone)]
pub struct ApiCallRecord {
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub headers: Vec<(String, String)>,
    pub content_preview: String,
    pub full_content: String,
    pub timestamp: String,
    pub error: Option<String>,
}

impl ApiCallRecord {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Case-insensitive header lookup; servers disagree on Link vs link
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Parse the body as JSON on a 200; anything else is "no data"
    pub fn parse_json<T: DeserializeOwned>(&self) -> Option<T> {
        if self.status_code != 200 {
            return None;
        }
        serde_json::from_str(&self.full_content).ok()
    }
}

/// Bounded FIFO of every outbound call, shared process-wide. Entries are
/// immutable after append; eviction drops the oldest first.
#[derive(Debug, Default)]
pub struct CallAuditLog {
    entries: VecDeque<ApiCallRecord>,
}

impl CallAuditLog {
    pub fn new() -> Self {
        CallAuditLog {
            entries: VecDeque::with_capacity(AUDIT_LOG_CAPACITY),
        }
    }

    /// Redaction happens here, at the storage boundary, rather than in
    /// every producer: an in-flight record may still need its raw headers
    /// (the auth challenge lives in one), but nothing unredacted may ever
    /// sit in the log.
    pub fn append(&mut self, mut record: ApiCallRecord) {
        let redacted = redact_headers(
            record
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        record.headers = redacted;
        self.entries.push_back(record);
        while self.entries.len() > AUDIT_LOG_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn purge(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequential-index read access, the shape the inspection surface
    /// uses to page back through history
    pub fn get(&self, index: usize) -> Option<&ApiCallRecord> {
        self.entries.get(index)
    }
}

pub type SharedAuditLog = Arc<Mutex<CallAuditLog>>;

pub fn shared_log() -> SharedAuditLog {
    Arc::new(Mutex::new(CallAuditLog::new()))
}

/// Append through the shared handle. A poisoned lock only loses the one
/// record; auditing must never take the request path down with it.
pub fn record_call(log: &SharedAuditLog, record: ApiCallRecord) {
    if let Ok(mut guard) = log.lock() {
        guard.append(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> ApiCallRecord {
        ApiCallRecord {
            method: "GET".to_string(),
            url: url.to_string(),
            status_code: 200,
            duration_ms: 5,
            size_bytes: 2,
            headers: Vec::new(),
            content_preview: "{}".to_string(),
            full_content: "{}".to_string(),
            timestamp: now_timestamp(),
            error: None,
        }
    }

    #[test]
    fn authorization_header_is_never_stored_verbatim() {
        let redacted = redact_headers(vec![
            ("Authorization", "Bearer abcdefghij1234"),
            ("Content-Type", "application/json"),
        ]);
        assert_eq!(redacted[0].1, "Bea...234");
        assert_ne!(redacted[0].1, "Bearer abcdefghij1234");
        assert_eq!(redacted[1].1, "application/json");
    }

    #[test]
    fn append_redacts_headers_before_storage() {
        let mut log = CallAuditLog::new();
        let mut rec = record("https://r.example.com/v2/");
        rec.headers = vec![
            (
                "Authorization".to_string(),
                "Bearer abcdefghij1234".to_string(),
            ),
            (
                "Www-Authenticate".to_string(),
                "Bearer realm=\"https://auth.example.com/token\"".to_string(),
            ),
        ];
        log.append(rec);

        let stored = log.get(0).unwrap();
        assert_eq!(stored.headers[0].1, "Bea...234");
        assert!(!stored.headers[1].1.contains("auth.example.com"));
    }

    #[test]
    fn short_secrets_are_fully_redacted() {
        assert_eq!(redact_value("password", "hunter2"), "[REDACTED]");
        assert_eq!(redact_value("X-Auth-Token", ""), "[REDACTED]");
    }

    #[test]
    fn non_sensitive_keys_pass_through() {
        assert_eq!(redact_value("Link", "</v2/_catalog?n=5>; rel=\"next\""), "</v2/_catalog?n=5>; rel=\"next\"");
    }

    #[test]
    fn sensitive_key_matching_is_substring_and_case_insensitive() {
        assert!(is_sensitive_key("WWW-Authenticate"));
        assert!(is_sensitive_key("robot_token"));
        assert!(is_sensitive_key("Registry-Credentials"));
        assert!(!is_sensitive_key("Content-Length"));
    }

    #[test]
    fn log_keeps_only_most_recent_100_in_order() {
        let mut log = CallAuditLog::new();
        for i in 0..150 {
            log.append(record(&format!("https://r.example.com/call/{}", i)));
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.get(0).unwrap().url, "https://r.example.com/call/50");
        assert_eq!(log.get(99).unwrap().url, "https://r.example.com/call/149");
    }

    #[test]
    fn purge_empties_regardless_of_size() {
        let mut log = CallAuditLog::new();
        for i in 0..7 {
            log.append(record(&format!("https://r.example.com/{}", i)));
        }
        log.purge();
        assert!(log.is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut rec = record("https://r.example.com/v2/_catalog");
        rec.headers = vec![("LINK".to_string(), "<u>; rel=\"next\"".to_string())];
        assert_eq!(rec.header("Link"), Some("<u>; rel=\"next\""));
    }

    #[test]
    fn parse_json_ignores_non_200_and_bad_bodies() {
        let mut rec = record("https://r.example.com/v2/_catalog");
        rec.full_content = "not json".to_string();
        assert!(rec.parse_json::<serde_json::Value>().is_none());

        rec.full_content = "{\"repositories\": []}".to_string();
        rec.status_code = 401;
        assert!(rec.parse_json::<serde_json::Value>().is_none());
    }
}
