//! Provider configuration resolution.
//!
//! Every setting can come from the provider block, from an environment
//! variable, or from a built-in fallback. The first source that yields a
//! non-empty value wins.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::app_auth;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com/";

/// Raw provider block as sent by the orchestrator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Personal access token.
    pub token: Option<String>,
    /// OAuth token, used when `token` is unset.
    pub oauth_token: Option<String>,
    /// API root, for enterprise installs.
    pub base_url: Option<String>,
    /// Default owner for resources that take a bare repository name.
    pub owner: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: Option<bool>,
    /// GitHub App credentials, used when no token is found elsewhere.
    pub app_auth: Option<AppAuthConfig>,
}

/// The `app_auth` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppAuthConfig {
    /// App ID, the `iss` of the app JWT.
    pub id: i64,
    /// Installation to mint a token for.
    pub installation_id: i64,
    /// Path to the app's PEM-encoded private key.
    pub pem_file: String,
}

impl ProviderConfig {
    /// Parse the provider block. A null block means "everything unset".
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(
                        "Personal access token. Falls back to GITHUB_TOKEN, then `gh auth token`, \
                         then `app_auth`.",
                    ),
            )
            .with_attribute(
                "oauth_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("OAuth token, used when `token` is not set."),
            )
            .with_attribute(
                "base_url",
                Attribute::optional_string().with_description(
                    "API root URL. Falls back to GITHUB_BASE_URL, then https://api.github.com/.",
                ),
            )
            .with_attribute(
                "owner",
                Attribute::optional_string().with_description(
                    "Owner used for bare repository names. Falls back to GITHUB_OWNER, \
                     then the authenticated user.",
                ),
            )
            .with_attribute(
                "insecure",
                Attribute::optional_bool().with_description(
                    "Disable TLS certificate verification. Falls back to GITHUB_INSECURE.",
                ),
            )
            .with_block(
                "app_auth",
                NestedBlock::single(
                    Block::new()
                        .with_attribute(
                            "id",
                            Attribute::required_int64().with_description("GitHub App ID."),
                        )
                        .with_attribute(
                            "installation_id",
                            Attribute::required_int64()
                                .with_description("Installation ID of the app."),
                        )
                        .with_attribute(
                            "pem_file",
                            Attribute::required_string()
                                .with_description("Path to the app's private key."),
                        )
                        .with_description(
                            "Authenticate as a GitHub App installation when no token is found.",
                        ),
                ),
            )
    }
}

/// Settings after applying environment fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Token sent as a bearer credential, if any.
    pub token: Option<String>,
    /// API root, always ending in `/`.
    pub base_url: Url,
    /// Owner from the block or environment. The authenticated user is
    /// consulted later, once a client exists.
    pub owner: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// Resolve a provider block against the process environment, the GitHub
/// CLI and finally GitHub App credentials.
pub async fn resolve(config: &ProviderConfig) -> Result<ResolvedConfig, ProviderError> {
    let mut resolved = resolve_with(config, |key| std::env::var(key).ok())?;
    if resolved.token.is_none() {
        resolved.token = gh_cli_token().await;
    }
    apply_app_auth(config, &mut resolved).await?;
    Ok(resolved)
}

/// Fill a missing token with an installation token minted from
/// `app_auth`. A token found earlier always wins.
pub async fn apply_app_auth(
    config: &ProviderConfig,
    resolved: &mut ResolvedConfig,
) -> Result<(), ProviderError> {
    if resolved.token.is_some() {
        return Ok(());
    }
    let Some(app) = &config.app_auth else {
        return Ok(());
    };
    let token = app_auth::installation_token(resolved, app).await?;
    resolved.token = Some(token);
    Ok(())
}

/// Resolve a provider block against an arbitrary variable lookup. The CLI
/// fallback for the token is not consulted here.
pub fn resolve_with<F>(config: &ProviderConfig, lookup: F) -> Result<ResolvedConfig, ProviderError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| lookup(key).filter(|v| !v.is_empty());

    let token = non_empty(config.token.as_deref())
        .or_else(|| non_empty(config.oauth_token.as_deref()))
        .or_else(|| env("GITHUB_TOKEN"));

    let raw_base_url = non_empty(config.base_url.as_deref())
        .or_else(|| env("GITHUB_BASE_URL"))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let base_url = parse_base_url(&raw_base_url)?;

    let insecure =
        config.insecure.unwrap_or(false) || env("GITHUB_INSECURE").as_deref() == Some("true");

    let owner = non_empty(config.owner.as_deref()).or_else(|| env("GITHUB_OWNER"));

    Ok(ResolvedConfig {
        token,
        base_url,
        owner,
        insecure,
    })
}

/// Parse an API root, forcing a trailing slash so relative joins land under
/// it.
pub fn parse_base_url(raw: &str) -> Result<Url, ProviderError> {
    let mut url = Url::parse(raw).map_err(|e| {
        ProviderError::operation("Invalid Base URL", format!("Unable to parse base_url: {}", e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ProviderError::operation(
            "Invalid Base URL",
            format!("base_url must use http or https, got {}", url.scheme()),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn gh_cli_token() -> Option<String> {
    let output = tokio::process::Command::new("gh")
        .args(["auth", "token"])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if token.is_empty() {
                None
            } else {
                debug!("Using token from GitHub CLI");
                Some(token)
            }
        },
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "GitHub CLI not available");
            None
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Bounds for the provider's polling and retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Attempts while waiting for a pull request to become mergeable.
    pub merge_attempts: u32,
    /// Sleep between mergeability attempts.
    pub merge_interval: Duration,
    /// Attempts while waiting for status checks.
    pub check_attempts: u32,
    /// Sleep between status-check attempts.
    pub check_interval: Duration,
    /// Attempts for a file write that keeps hitting conflicts.
    pub file_write_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            merge_attempts: 30,
            merge_interval: Duration::from_secs(5),
            check_attempts: 60,
            check_interval: Duration::from_secs(5),
            file_write_attempts: 5,
        }
    }
}

impl PollSettings {
    /// Settings with no sleeping, for tests.
    pub fn immediate() -> Self {
        Self {
            merge_interval: Duration::ZERO,
            check_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Override the number of mergeability checks.
    pub fn with_merge_attempts(mut self, attempts: u32) -> Self {
        self.merge_attempts = attempts;
        self
    }

    /// Override the number of status-check polls.
    pub fn with_check_attempts(mut self, attempts: u32) -> Self {
        self.check_attempts = attempts;
        self
    }

    /// Override the number of file-write attempts.
    pub fn with_file_write_attempts(mut self, attempts: u32) -> Self {
        self.file_write_attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_token_precedence() {
        let config = ProviderConfig {
            token: Some("tok".to_string()),
            oauth_token: Some("oauth".to_string()),
            ..Default::default()
        };
        let resolved = resolve_with(&config, lookup(&[("GITHUB_TOKEN", "env")])).unwrap();
        assert_eq!(resolved.token.as_deref(), Some("tok"));

        let config = ProviderConfig {
            oauth_token: Some("oauth".to_string()),
            ..Default::default()
        };
        let resolved = resolve_with(&config, lookup(&[("GITHUB_TOKEN", "env")])).unwrap();
        assert_eq!(resolved.token.as_deref(), Some("oauth"));

        let resolved =
            resolve_with(&ProviderConfig::default(), lookup(&[("GITHUB_TOKEN", "env")])).unwrap();
        assert_eq!(resolved.token.as_deref(), Some("env"));

        let resolved = resolve_with(&ProviderConfig::default(), lookup(&[])).unwrap();
        assert_eq!(resolved.token, None);
    }

    #[test]
    fn test_empty_values_fall_through() {
        let config = ProviderConfig {
            token: Some(String::new()),
            owner: Some(String::new()),
            ..Default::default()
        };
        let resolved = resolve_with(
            &config,
            lookup(&[("GITHUB_TOKEN", "env"), ("GITHUB_OWNER", "octo")]),
        )
        .unwrap();
        assert_eq!(resolved.token.as_deref(), Some("env"));
        assert_eq!(resolved.owner.as_deref(), Some("octo"));
    }

    #[test]
    fn test_base_url_defaults_and_trailing_slash() {
        let resolved = resolve_with(&ProviderConfig::default(), lookup(&[])).unwrap();
        assert_eq!(resolved.base_url.as_str(), DEFAULT_BASE_URL);

        let resolved = resolve_with(
            &ProviderConfig::default(),
            lookup(&[("GITHUB_BASE_URL", "https://ghe.example.com/api/v3")]),
        )
        .unwrap();
        assert_eq!(resolved.base_url.as_str(), "https://ghe.example.com/api/v3/");

        let config = ProviderConfig {
            base_url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        let resolved = resolve_with(&config, lookup(&[])).unwrap();
        assert_eq!(resolved.base_url.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ProviderConfig {
            base_url: Some("not a url".to_string()),
            ..Default::default()
        };
        let err = resolve_with(&config, lookup(&[])).unwrap_err();
        assert!(matches!(err, ProviderError::Operation { ref summary, .. } if summary == "Invalid Base URL"));

        let config = ProviderConfig {
            base_url: Some("ftp://example.com/".to_string()),
            ..Default::default()
        };
        assert!(resolve_with(&config, lookup(&[])).is_err());
    }

    #[test]
    fn test_insecure_from_env() {
        let resolved =
            resolve_with(&ProviderConfig::default(), lookup(&[("GITHUB_INSECURE", "true")])).unwrap();
        assert!(resolved.insecure);

        let resolved =
            resolve_with(&ProviderConfig::default(), lookup(&[("GITHUB_INSECURE", "1")])).unwrap();
        assert!(!resolved.insecure);

        let config = ProviderConfig {
            insecure: Some(true),
            ..Default::default()
        };
        assert!(resolve_with(&config, lookup(&[])).unwrap().insecure);
    }

    #[test]
    fn test_from_value() {
        let config = ProviderConfig::from_value(serde_json::json!({
            "token": "abc",
            "owner": null,
            "insecure": false
        }))
        .unwrap();
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.owner, None);

        let config = ProviderConfig::from_value(serde_json::Value::Null).unwrap();
        assert!(config.token.is_none());
    }

    #[test]
    fn test_app_auth_from_value() {
        let config = ProviderConfig::from_value(serde_json::json!({
            "app_auth": {"id": 12, "installation_id": 34, "pem_file": "/keys/app.pem"}
        }))
        .unwrap();
        assert_eq!(
            config.app_auth,
            Some(AppAuthConfig {
                id: 12,
                installation_id: 34,
                pem_file: "/keys/app.pem".to_string(),
            })
        );
    }

    #[test]
    fn test_schema_has_app_auth_block() {
        let schema = ProviderConfig::schema();
        let block = &schema.block.blocks["app_auth"];
        assert!(block.block.attributes.contains_key("pem_file"));
    }

    #[tokio::test]
    async fn test_app_auth_fills_missing_token() {
        use std::io::Write;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/34/access_tokens"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"token": "ghs_app"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut key = tempfile::NamedTempFile::new().unwrap();
        key.write_all(include_bytes!("testdata/app_key.pem")).unwrap();
        let config = ProviderConfig {
            base_url: Some(server.uri()),
            app_auth: Some(AppAuthConfig {
                id: 12,
                installation_id: 34,
                pem_file: key.path().to_string_lossy().into_owned(),
            }),
            ..Default::default()
        };

        let mut resolved = resolve_with(&config, lookup(&[])).unwrap();
        apply_app_auth(&config, &mut resolved).await.unwrap();
        assert_eq!(resolved.token.as_deref(), Some("ghs_app"));
    }

    #[tokio::test]
    async fn test_explicit_token_skips_app_auth() {
        let config = ProviderConfig {
            token: Some("tok".to_string()),
            app_auth: Some(AppAuthConfig {
                id: 12,
                installation_id: 34,
                pem_file: "/nonexistent.pem".to_string(),
            }),
            ..Default::default()
        };
        let mut resolved = resolve_with(&config, lookup(&[])).unwrap();
        apply_app_auth(&config, &mut resolved).await.unwrap();
        assert_eq!(resolved.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_poll_settings_defaults() {
        let poll = PollSettings::default();
        assert_eq!(poll.merge_attempts, 30);
        assert_eq!(poll.merge_interval, Duration::from_secs(5));
        assert_eq!(poll.check_attempts, 60);
        assert_eq!(poll.file_write_attempts, 5);
        assert_eq!(PollSettings::immediate().check_interval, Duration::ZERO);
    }
}
