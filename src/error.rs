//! Error types for the githubx provider.

use thiserror::Error;

use crate::client::{ApiError, ErrorKind};
use crate::schema::Diagnostic;

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation ran before `Configure` installed the API client.
    #[error("Client Error: client is not configured")]
    NotConfigured,

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Binding or reading the listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The hosting API returned an error that has no more specific meaning.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// A titled failure shown to the user as-is.
    #[error("{summary}: {detail}")]
    Operation {
        /// Short title, e.g. "Branch Not Found".
        summary: String,
        /// Longer explanation.
        detail: String,
    },
}

impl ProviderError {
    /// Build a titled operation error.
    pub fn operation(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Operation {
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    /// Wrap an API failure under a user-facing title.
    ///
    /// Rate-limit responses keep their own title so they are never mistaken
    /// for an ordinary failure of the step.
    pub fn api(summary: impl Into<String>, err: ApiError) -> Self {
        if err.kind() == ErrorKind::RateLimited {
            return Self::operation("Rate Limit Exceeded", err.to_string());
        }
        Self::operation(summary, err.to_string())
    }

    /// Whether this error wraps an API 404.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Render the error as an error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Operation { summary, detail } => {
                Diagnostic::error(summary.clone()).with_detail(detail.clone())
            },
            Self::NotConfigured => Diagnostic::error("Client Error")
                .with_detail("client is not configured"),
            Self::Api(err) if err.kind() == ErrorKind::RateLimited => {
                Diagnostic::error("Rate Limit Exceeded").with_detail(err.to_string())
            },
            Self::Api(err) => Diagnostic::error("API Error").with_detail(err.to_string()),
            other => Diagnostic::error(other.to_string()),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::NotConfigured => {
                tonic::Status::failed_precondition("client is not configured")
            },
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::Io(err) => tonic::Status::internal(format!("I/O error: {}", err)),
            ProviderError::Api(err) => match err.kind() {
                ErrorKind::NotFound => tonic::Status::not_found(err.to_string()),
                ErrorKind::Conflict => tonic::Status::aborted(err.to_string()),
                ErrorKind::RateLimited => tonic::Status::resource_exhausted(err.to_string()),
                ErrorKind::Other => tonic::Status::unknown(err.to_string()),
            },
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::Operation { summary, detail } => {
                tonic::Status::failed_precondition(format!("{}: {}", summary, detail))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    fn status_error(status: u16, message: &str) -> ApiError {
        ApiError::Status {
            method: "GET".to_string(),
            url: "https://api.github.com/repos/o/r".to_string(),
            status,
            message: message.to_string(),
            errors: vec![],
            rate_limit_exhausted: false,
        }
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("octo/hello".to_string());
        assert_eq!(format!("{}", err), "Resource not found: octo/hello");

        let err = ProviderError::UnknownResource("githubx_team".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: githubx_team");

        let err = ProviderError::NotConfigured;
        assert_eq!(format!("{}", err), "Client Error: client is not configured");

        let err = ProviderError::operation("Branch Not Found", "branch dev does not exist");
        assert_eq!(format!("{}", err), "Branch Not Found: branch dev does not exist");
    }

    #[test]
    fn test_operation_diagnostic_keeps_title() {
        let diag = ProviderError::operation("File Already Exists", "README.md exists").to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "File Already Exists");
        assert_eq!(diag.detail.as_deref(), Some("README.md exists"));
    }

    #[test]
    fn test_rate_limited_api_error_gets_its_own_title() {
        let err = ProviderError::api("Error reading file", status_error(429, "slow down"));
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Rate Limit Exceeded");

        let diag = ProviderError::Api(status_error(429, "slow down")).to_diagnostic();
        assert_eq!(diag.summary, "Rate Limit Exceeded");

        let diag = ProviderError::Api(status_error(500, "boom")).to_diagnostic();
        assert_eq!(diag.summary, "API Error");
    }

    #[test]
    fn test_is_not_found() {
        assert!(ProviderError::Api(status_error(404, "Not Found")).is_not_found());
        assert!(!ProviderError::Api(status_error(422, "Validation Failed")).is_not_found());
        assert!(!ProviderError::NotConfigured.is_not_found());
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::Validation("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::NotConfigured.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::Api(status_error(404, "Not Found")).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Api(status_error(409, "conflict")).into();
        assert_eq!(status.code(), tonic::Code::Aborted);

        let status: tonic::Status = ProviderError::Api(status_error(429, "limited")).into();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);

        let status: tonic::Status = ProviderError::Unimplemented("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
