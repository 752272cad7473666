use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors surfaced to callers of the estimator.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("GEMINI_API_KEY is not configured")]
    CredentialMissing,

    #[error("Gemini API key is invalid or unauthorized: {detail}")]
    CredentialInvalid { detail: String },

    #[error("Gemini API key was reported as leaked; create a new key, update GEMINI_API_KEY and restart")]
    CredentialCompromised,

    #[error("Gemini rate limit reached{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("no Gemini model produced a usable result after {attempts} attempts: {last_error}")]
    AllCandidatesExhausted { attempts: usize, last_error: String },

    #[error("Gemini response was not valid JSON: {preview}")]
    UnparseableResponse { preview: String },

    #[error("Gemini request failed{}: {message}", status_hint(.status))]
    Transport { status: Option<u16>, message: String },

    #[error("Gemini estimation did not finish within {seconds}s")]
    DeadlineExceeded { seconds: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EstimatorError>;

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry in about {}s", s),
        None => String::new(),
    }
}

fn status_hint(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" ({})", s),
        None => String::new(),
    }
}

impl EstimatorError {
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EstimatorError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            EstimatorError::CredentialMissing
                | EstimatorError::CredentialInvalid { .. }
                | EstimatorError::CredentialCompromised
        )
    }
}

impl From<reqwest::Error> for EstimatorError {
    fn from(err: reqwest::Error) -> Self {
        EstimatorError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Outcome of a single provider call that did not return content.
#[derive(Debug)]
pub(crate) enum CallFailure {
    /// The model id is unknown for this API version; try the next candidate.
    ModelNotFound,
    Fatal(EstimatorError),
}

impl From<EstimatorError> for CallFailure {
    fn from(err: EstimatorError) -> Self {
        CallFailure::Fatal(err)
    }
}

impl From<reqwest::Error> for CallFailure {
    fn from(err: reqwest::Error) -> Self {
        CallFailure::Fatal(err.into())
    }
}

const LEAKED_MARKER: &str = "reported as leaked";

pub(crate) fn is_leaked_key(status: u16, body: &str) -> bool {
    status == 403 && body.contains(LEAKED_MARKER)
}

pub(crate) fn is_invalid_key(status: u16, body: &str) -> bool {
    status == 401
        || status == 403
        || body.contains("API_KEY_INVALID")
        || body.contains("API key not valid")
}

pub(crate) fn is_rate_limited(status: u16, body: &str) -> bool {
    status == 429 || body.contains("RESOURCE_EXHAUSTED") || body.contains("exceeded your current quota")
}

/// Maps a non-2xx generateContent response onto the error taxonomy.
pub(crate) fn classify_generate_failure(status: u16, body: &str) -> CallFailure {
    if is_leaked_key(status, body) {
        return CallFailure::Fatal(EstimatorError::CredentialCompromised);
    }
    if status == 404 || body.contains("NOT_FOUND") {
        return CallFailure::ModelNotFound;
    }
    if is_rate_limited(status, body) {
        return CallFailure::Fatal(EstimatorError::RateLimited {
            retry_after_secs: parse_retry_after(body),
        });
    }
    if is_invalid_key(status, body) {
        return CallFailure::Fatal(EstimatorError::CredentialInvalid {
            detail: preview(body),
        });
    }
    CallFailure::Fatal(EstimatorError::Transport {
        status: Some(status),
        message: preview(body),
    })
}

fn retry_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)retry in\s+([0-9]+(?:\.[0-9]+)?)s").expect("valid retry regex"),
            Regex::new(r#"(?i)"retryDelay"\s*:\s*"([0-9]+(?:\.[0-9]+)?)s""#).expect("valid retryDelay regex"),
        ]
    })
}

/// Extracts a retry-after hint (whole seconds, at least 1) from provider error text.
pub fn parse_retry_after(text: &str) -> Option<u64> {
    retry_patterns()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map(|secs| secs.ceil().max(1.0) as u64)
}

/// Longest slice of raw model or provider text we put in errors and logs.
pub const PREVIEW_CHARS: usize = 300;

pub fn preview(raw: &str) -> String {
    raw.trim().chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_from_retry_delay_field() {
        let body = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"12s"}]}}"#;
        assert_eq!(parse_retry_after(body), Some(12));
    }

    #[test]
    fn test_retry_after_from_free_text_rounds_up() {
        assert_eq!(parse_retry_after("Please retry in 3.2s."), Some(4));
        assert_eq!(parse_retry_after("Please Retry In 0.1s"), Some(1));
        assert_eq!(parse_retry_after("quota exceeded"), None);
    }

    #[test]
    fn test_classify_rate_limit() {
        let failure = classify_generate_failure(429, r#"{"retryDelay": "12s"}"#);
        match failure {
            CallFailure::Fatal(err) => assert_eq!(err.retry_after_secs(), Some(12)),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_not_found_is_recoverable() {
        assert!(matches!(
            classify_generate_failure(404, "models/gemini-x is not found"),
            CallFailure::ModelNotFound
        ));
        assert!(matches!(
            classify_generate_failure(400, r#"{"status":"NOT_FOUND"}"#),
            CallFailure::ModelNotFound
        ));
    }

    #[test]
    fn test_classify_leaked_and_invalid_keys() {
        assert!(matches!(
            classify_generate_failure(403, "Your API key was reported as leaked."),
            CallFailure::Fatal(EstimatorError::CredentialCompromised)
        ));
        assert!(matches!(
            classify_generate_failure(400, "API key not valid. Please pass a valid API key."),
            CallFailure::Fatal(EstimatorError::CredentialInvalid { .. })
        ));
    }

    #[test]
    fn test_classify_server_error_is_transport() {
        match classify_generate_failure(503, "overloaded") {
            CallFailure::Fatal(EstimatorError::Transport { status, .. }) => assert_eq!(status, Some(503)),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS);
        assert_eq!(preview("  short  "), "short");
    }
}
