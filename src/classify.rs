//! Canonical classification of raw upstream errors
//!
//! Upstream providers disagree about everything, including how they fail.
//! This module maps raw error bodies and status codes onto a fixed taxonomy
//! and a canned, user-safe message. Raw upstream text never reaches the
//! caller.

use serde::Serialize;

/// Canonical error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModerationBlocked,
    BadRequest,
    InternalError,
    Timeout,
    NoAvailableKey,
    RateLimit,
    Unknown,
}

impl ErrorKind {
    /// Whether the backend-mode retry loop may rotate to another credential
    /// after this failure. Validation-class errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::Timeout
                | ErrorKind::InternalError
                | ErrorKind::NoAvailableKey
                | ErrorKind::Unknown
        )
    }

    /// Fixed user-facing message for this kind
    pub fn friendly_message(&self) -> &'static str {
        match self {
            ErrorKind::ModerationBlocked => {
                "The request was blocked by the provider's content moderation"
            }
            ErrorKind::BadRequest => "The provider rejected the request as invalid",
            ErrorKind::InternalError => "The provider reported an internal error",
            ErrorKind::Timeout => "The provider did not respond in time",
            ErrorKind::NoAvailableKey => "No available credential for this provider",
            ErrorKind::RateLimit => "The provider rate limit was exceeded",
            ErrorKind::Unknown => "The provider returned an unrecognized error",
        }
    }
}

/// Maximum length of a sanitized message
const MAX_MESSAGE_LEN: usize = 512;

/// Keywords indicating the provider has run out of usable credentials/quota
const EXHAUSTION_KEYWORDS: &[&str] = &[
    "no available key",
    "no available token",
    "no available channel",
    "insufficient quota",
    "quota exceeded",
    "balance is insufficient",
    "insufficient balance",
];

const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "requests per minute",
    "tpm limit",
    "rpm limit",
];

/// Upstream datastore failures leak through some providers as raw driver
/// errors; they are internal errors from the caller's point of view.
const DATASTORE_KEYWORDS: &[&str] = &[
    "sql",
    "database error",
    "db error",
    "redis",
    "connection pool",
    "deadlock",
];

const MODERATION_KEYWORDS: &[&str] = &[
    "content policy",
    "content_policy",
    "moderation",
    "flagged",
    "unsafe content",
    "safety system",
    "sensitive content",
    "risk control",
];

const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline exceeded"];

const BAD_REQUEST_KEYWORDS: &[&str] = &[
    "invalid request",
    "invalid parameter",
    "invalid argument",
    "unsupported model",
    "model not found",
    "bad request",
    "validation failed",
];

/// Classify raw upstream error text plus an optional HTTP status code.
///
/// Keyword matches take precedence over the status code so that providers
/// which hide a rate limit behind a 500, or a quota failure behind a 503,
/// still classify correctly. First match wins.
pub fn classify(raw: &str, status: Option<u16>) -> (ErrorKind, String) {
    let sanitized = sanitize(raw);
    let lower = sanitized.to_lowercase();

    let kind = if contains_any(&lower, EXHAUSTION_KEYWORDS) {
        ErrorKind::NoAvailableKey
    } else if contains_any(&lower, RATE_LIMIT_KEYWORDS) {
        ErrorKind::RateLimit
    } else if contains_any(&lower, DATASTORE_KEYWORDS) {
        ErrorKind::InternalError
    } else if contains_any(&lower, MODERATION_KEYWORDS) {
        ErrorKind::ModerationBlocked
    } else if contains_any(&lower, TIMEOUT_KEYWORDS) {
        ErrorKind::Timeout
    } else if contains_any(&lower, BAD_REQUEST_KEYWORDS) {
        ErrorKind::BadRequest
    } else {
        match status {
            Some(400) => ErrorKind::BadRequest,
            Some(408) | Some(504) => ErrorKind::Timeout,
            Some(429) => ErrorKind::RateLimit,
            Some(500) | Some(502) | Some(503) => ErrorKind::InternalError,
            _ => ErrorKind::Unknown,
        }
    };

    (kind, kind.friendly_message().to_string())
}

/// Classify and wrap into a provider-tagged message
pub fn friendly_error(provider: Option<&str>, raw: &str, status: Option<u16>) -> (ErrorKind, String) {
    let (kind, message) = classify(raw, status);
    let message = match provider {
        Some(name) => format!("{}: {}", name, message),
        None => message,
    };
    (kind, message)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Sanitize raw upstream text before keyword matching.
///
/// Strips the noise that commonly rides along in upstream error bodies:
/// embedded data URIs and very long URLs, stack-trace lines, filesystem
/// paths. Attempts one level of JSON `message`/`error.message` extraction
/// and hard-caps the final length.
pub fn sanitize(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    // One level of JSON-nested message extraction
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(msg) = extract_json_message(&value) {
            text = msg;
        }
    }

    let mut cleaned: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Stack-trace frames and filesystem paths carry no user-facing value
        if trimmed.starts_with("at ")
            || trimmed.contains("src/")
            || trimmed.contains(".rs:")
            || trimmed.contains(".py\"")
            || trimmed.contains(".js:")
            || trimmed.starts_with('/')
        {
            continue;
        }
        cleaned.push(truncate_embedded_uris(trimmed));
    }

    let mut out = cleaned.join(" ");
    truncate_at_boundary(&mut out, MAX_MESSAGE_LEN);
    out
}

/// Truncate without splitting a multi-byte character
fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s.truncate(idx);
}

fn extract_json_message(value: &serde_json::Value) -> Option<String> {
    let candidates = [
        value.get("message"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("error").filter(|e| e.is_string()),
        value.get("msg"),
        value.get("detail"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(|s| s.to_string()))
}

/// Truncate embedded data URIs and pathologically long URLs within a line
fn truncate_embedded_uris(line: &str) -> String {
    let mut out = String::with_capacity(line.len().min(MAX_MESSAGE_LEN));
    for token in line.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        if token.starts_with("data:") || (token.contains("://") && token.len() > 128) {
            out.extend(token.chars().take(32));
            out.push_str("...");
        } else {
            out.push_str(token);
        }
    }
    out
}
