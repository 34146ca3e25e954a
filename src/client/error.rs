//! Errors returned by [`GithubClient`](super::GithubClient).

use serde::Deserialize;
use thiserror::Error;

/// Coarse classification of an API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 404.
    NotFound,
    /// HTTP 409 or 422. The remote object moved under us; re-fetch and retry.
    Conflict,
    /// HTTP 429, or a 403 with no remaining rate-limit quota.
    RateLimited,
    /// Everything else.
    Other,
}

/// An error talking to the hosting API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success status.
    #[error("{method} {url}: {status} {message}{}", field_errors(.errors))]
    Status {
        /// HTTP method of the failed request.
        method: String,
        /// Full request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// The `message` field of the error body, or the raw body.
        message: String,
        /// Per-field messages from the `errors` array.
        errors: Vec<String>,
        /// Set when `X-RateLimit-Remaining` reported zero.
        rate_limit_exhausted: bool,
    },

    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// An endpoint URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The configured base URL cannot carry path segments.
    #[error("base URL cannot be used for API paths: {0}")]
    BaseUrl(String),

    /// The response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status {
                status,
                rate_limit_exhausted,
                ..
            } => match *status {
                404 => ErrorKind::NotFound,
                409 | 422 => ErrorKind::Conflict,
                429 => ErrorKind::RateLimited,
                403 if *rate_limit_exhausted => ErrorKind::RateLimited,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }

    /// HTTP status code, when the API answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the API answered 404.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether the API answered 409 or 422.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Whether the request was rejected by rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ErrorKind::RateLimited
    }

    /// Case-sensitive substring search over the rendered error, including
    /// field messages.
    pub fn message_contains(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }
}

fn field_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(" [{}]", errors.join("; "))
    }
}

/// Error body returned by the API.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

/// One entry of the `errors` array. The API sends either objects or bare
/// strings here.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum FieldError {
    Detailed {
        #[serde(default)]
        resource: Option<String>,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Plain(String),
}

impl FieldError {
    pub(crate) fn render(&self) -> String {
        match self {
            Self::Plain(message) => message.clone(),
            Self::Detailed {
                message: Some(message),
                ..
            } => message.clone(),
            Self::Detailed {
                resource,
                field,
                code,
                ..
            } => format!(
                "{} {} {}",
                resource.as_deref().unwrap_or_default(),
                field.as_deref().unwrap_or_default(),
                code.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, exhausted: bool) -> ApiError {
        ApiError::Status {
            method: "PUT".to_string(),
            url: "https://api.github.com/repos/o/r/contents/a.txt".to_string(),
            status: code,
            message: "Something".to_string(),
            errors: vec![],
            rate_limit_exhausted: exhausted,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(status(404, false).kind(), ErrorKind::NotFound);
        assert_eq!(status(409, false).kind(), ErrorKind::Conflict);
        assert_eq!(status(422, false).kind(), ErrorKind::Conflict);
        assert_eq!(status(429, false).kind(), ErrorKind::RateLimited);
        assert_eq!(status(403, true).kind(), ErrorKind::RateLimited);
        assert_eq!(status(403, false).kind(), ErrorKind::Other);
        assert_eq!(status(500, false).kind(), ErrorKind::Other);
        assert_eq!(ApiError::Decode("x".to_string()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_display_includes_field_errors() {
        let err = ApiError::Status {
            method: "POST".to_string(),
            url: "https://api.github.com/repos/o/r/pulls".to_string(),
            status: 422,
            message: "Validation Failed".to_string(),
            errors: vec!["A pull request already exists for o:feature.".to_string()],
            rate_limit_exhausted: false,
        };
        assert_eq!(
            err.to_string(),
            "POST https://api.github.com/repos/o/r/pulls: 422 Validation Failed \
             [A pull request already exists for o:feature.]"
        );
        assert!(err.message_contains("already exists"));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_privacy_message_is_searchable() {
        let err = ApiError::Status {
            method: "PATCH".to_string(),
            url: "https://api.github.com/repos/o/r".to_string(),
            status: 422,
            message: "Privacy is already set".to_string(),
            errors: vec![],
            rate_limit_exhausted: false,
        };
        assert!(err.message_contains("422 Privacy is already set"));
    }

    #[test]
    fn test_error_body_parses_both_field_error_shapes() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"message":"Validation Failed","errors":[
                {"resource":"Repository","field":"name","code":"custom","message":"name already exists on this account"},
                {"resource":"Issue","field":"title","code":"missing_field"},
                "plain entry"
            ]}"#,
        )
        .unwrap();
        let rendered: Vec<String> = body.errors.iter().map(FieldError::render).collect();
        assert_eq!(
            rendered,
            vec![
                "name already exists on this account".to_string(),
                "Issue title missing_field".to_string(),
                "plain entry".to_string(),
            ]
        );
    }
}
