//! HTTP client for the hosting REST API.
//!
//! [`GithubClient`] is the one handle every resource and data source shares.
//! It owns the authenticated `reqwest` client, the API root, the resolved
//! default owner and the polling bounds. Each endpoint the provider touches
//! has a typed method here; the handlers never build URLs themselves.

mod error;
pub mod models;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ETAG, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

pub use error::{ApiError, ErrorKind};
use error::{ErrorBody, FieldError};
use models::{
    Contents, FileChange, FileChangeResponse, InstallationToken, MergeResult, NewPullRequest,
    NewRepository, Pages, PagesUpdate, PullRequest, PullRequestUpdate, Reference, RepoStatus,
    Repository, RepositoryCommit, RepositoryLicense, User,
};

use crate::config::{PollSettings, ResolvedConfig};
use crate::error::ProviderError;

const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticated handle to the hosting API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: Url,
    has_token: bool,
    owner: Option<String>,
    authenticated_login: Option<String>,
    poll: PollSettings,
}

impl GithubClient {
    /// Build a client from resolved settings. No request is made.
    pub fn new(config: &ResolvedConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ProviderError::Configuration(format!("invalid token header value: {}", e))
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if config.insecure {
            warn!("TLS certificate verification is disabled");
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            has_token: config.token.is_some(),
            owner: config.owner.clone(),
            authenticated_login: None,
            poll: PollSettings::default(),
        })
    }

    /// Replace the polling bounds.
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Look up the authenticated user when a token is present. The login
    /// becomes the default owner when none was configured. Failures are
    /// logged and leave the owner unresolved.
    pub async fn discover_identity(&mut self) {
        if !self.has_token {
            return;
        }
        match self.get_authenticated_user().await {
            Ok(user) => {
                if let Some(login) = user.login {
                    debug!(login = %login, "Resolved authenticated user");
                    if self.owner.is_none() {
                        self.owner = Some(login.clone());
                    }
                    self.authenticated_login = Some(login);
                }
            },
            Err(e) => warn!(error = %e, "Unable to fetch authenticated user"),
        }
    }

    /// API root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Configured or discovered default owner.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Login of the token's user, when known.
    pub fn authenticated_login(&self) -> Option<&str> {
        self.authenticated_login.as_deref()
    }

    /// Polling and retry bounds.
    pub fn poll(&self) -> &PollSettings {
        &self.poll
    }

    /// Default owner, asking the API for the authenticated user when none
    /// was resolved at configure time.
    pub async fn resolve_owner(&self) -> Result<String, ProviderError> {
        if let Some(owner) = &self.owner {
            return Ok(owner.clone());
        }
        let user = self.get_authenticated_user().await.map_err(|e| {
            ProviderError::operation(
                "Missing Owner",
                format!(
                    "unable to determine owner: provider-level `owner` is not set and unable to \
                     fetch authenticated user: {}",
                    e
                ),
            )
        })?;
        user.login.ok_or_else(|| {
            ProviderError::operation(
                "Missing Owner",
                "unable to determine owner: provider-level `owner` is not set and authenticated \
                 user information is unavailable",
            )
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// `GET user`
    pub async fn get_authenticated_user(&self) -> Result<User, ApiError> {
        self.get(self.url(&["user"])?).await
    }

    /// `GET users/{username}`
    pub async fn get_user(&self, username: &str) -> Result<User, ApiError> {
        self.get(self.url(&["users", username])?).await
    }

    /// `POST app/installations/{id}/access_tokens`. The client must carry
    /// an app JWT rather than a user token.
    pub async fn create_installation_token(
        &self,
        installation_id: i64,
    ) -> Result<InstallationToken, ApiError> {
        let id = installation_id.to_string();
        let url = self.url(&["app", "installations", &id, "access_tokens"])?;
        self.send_json(Method::POST, url, &serde_json::json!({})).await
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// `GET repos/{owner}/{repo}`
    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<Repository, ApiError> {
        self.get(self.repo_url(owner, repo, &[])?).await
    }

    /// `POST user/repos`, or `POST orgs/{org}/repos` when `org` is given.
    pub async fn create_repository(
        &self,
        org: Option<&str>,
        body: &NewRepository,
    ) -> Result<Repository, ApiError> {
        let url = match org {
            Some(org) => self.url(&["orgs", org, "repos"])?,
            None => self.url(&["user", "repos"])?,
        };
        self.send_json(Method::POST, url, body).await
    }

    /// `PATCH repos/{owner}/{repo}` with a partial body.
    pub async fn edit_repository(
        &self,
        owner: &str,
        repo: &str,
        body: &serde_json::Value,
    ) -> Result<Repository, ApiError> {
        self.send_json(Method::PATCH, self.repo_url(owner, repo, &[])?, body)
            .await
    }

    /// `DELETE repos/{owner}/{repo}`
    pub async fn delete_repository(&self, owner: &str, repo: &str) -> Result<(), ApiError> {
        self.send(self.http.delete(self.repo_url(owner, repo, &[])?))
            .await
            .map(drop)
    }

    /// `PUT repos/{owner}/{repo}/topics`, replacing all topics.
    pub async fn replace_topics(
        &self,
        owner: &str,
        repo: &str,
        topics: &[String],
    ) -> Result<(), ApiError> {
        let url = self.repo_url(owner, repo, &["topics"])?;
        let body = serde_json::json!({ "names": topics });
        self.send(self.http.put(url).json(&body)).await.map(drop)
    }

    /// `GET repos/{owner}/{repo}/pages`
    pub async fn get_pages(&self, owner: &str, repo: &str) -> Result<Pages, ApiError> {
        self.get(self.repo_url(owner, repo, &["pages"])?).await
    }

    /// `PUT repos/{owner}/{repo}/pages`
    pub async fn update_pages(
        &self,
        owner: &str,
        repo: &str,
        body: &PagesUpdate,
    ) -> Result<(), ApiError> {
        let url = self.repo_url(owner, repo, &["pages"])?;
        self.send(self.http.put(url).json(body)).await.map(drop)
    }

    /// `GET repos/{owner}/{repo}/vulnerability-alerts`: 204 means enabled,
    /// 404 means disabled.
    pub async fn vulnerability_alerts_enabled(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<bool, ApiError> {
        let url = self.repo_url(owner, repo, &["vulnerability-alerts"])?;
        match self.send(self.http.get(url)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `PUT` or `DELETE` on `repos/{owner}/{repo}/vulnerability-alerts`.
    pub async fn set_vulnerability_alerts(
        &self,
        owner: &str,
        repo: &str,
        enabled: bool,
    ) -> Result<(), ApiError> {
        let url = self.repo_url(owner, repo, &["vulnerability-alerts"])?;
        let request = if enabled {
            self.http.put(url)
        } else {
            self.http.delete(url)
        };
        self.send(request).await.map(drop)
    }

    /// `GET repos/{owner}/{repo}/license`
    pub async fn get_repository_license(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryLicense, ApiError> {
        self.get(self.repo_url(owner, repo, &["license"])?).await
    }

    // =========================================================================
    // Git references
    // =========================================================================

    /// `GET repos/{owner}/{repo}/git/ref/heads/{branch}`, returning the
    /// reference and its `ETag` header.
    pub async fn get_branch_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(Reference, Option<String>), ApiError> {
        let mut segments = vec!["git", "ref", "heads"];
        segments.extend(split_path(branch));
        let url = self.repo_url(owner, repo, &segments)?;
        let response = self.send(self.http.get(url)).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reference = decode(response).await?;
        Ok((reference, etag))
    }

    /// `POST repos/{owner}/{repo}/git/refs`
    pub async fn create_branch_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<Reference, ApiError> {
        let url = self.repo_url(owner, repo, &["git", "refs"])?;
        let body = serde_json::json!({
            "ref": format!("refs/heads/{}", branch),
            "sha": sha,
        });
        self.send_json(Method::POST, url, &body).await
    }

    /// `DELETE repos/{owner}/{repo}/git/refs/heads/{branch}`
    pub async fn delete_branch_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), ApiError> {
        let mut segments = vec!["git", "refs", "heads"];
        segments.extend(split_path(branch));
        let url = self.repo_url(owner, repo, &segments)?;
        self.send(self.http.delete(url)).await.map(drop)
    }

    /// `POST repos/{owner}/{repo}/branches/{branch}/rename`
    pub async fn rename_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        new_name: &str,
    ) -> Result<(), ApiError> {
        let url = self.repo_url(owner, repo, &["branches", branch, "rename"])?;
        let body = serde_json::json!({ "new_name": new_name });
        self.send(self.http.post(url).json(&body)).await.map(drop)
    }

    // =========================================================================
    // Contents and commits
    // =========================================================================

    /// `GET repos/{owner}/{repo}/contents/{path}?ref=`
    pub async fn get_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Contents, ApiError> {
        let mut url = self.contents_url(owner, repo, path)?;
        if let Some(git_ref) = git_ref.filter(|r| !r.is_empty()) {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        self.get(url).await
    }

    /// `PUT repos/{owner}/{repo}/contents/{path}`, creating or updating a
    /// file.
    pub async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        change: &FileChange,
    ) -> Result<FileChangeResponse, ApiError> {
        let url = self.contents_url(owner, repo, path)?;
        self.send_json(Method::PUT, url, change).await
    }

    /// `DELETE repos/{owner}/{repo}/contents/{path}`
    pub async fn delete_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        change: &FileChange,
    ) -> Result<FileChangeResponse, ApiError> {
        let url = self.contents_url(owner, repo, path)?;
        self.send_json(Method::DELETE, url, change).await
    }

    /// `GET repos/{owner}/{repo}/commits?path=&sha=&per_page=`
    pub async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        sha: Option<&str>,
        per_page: u32,
    ) -> Result<Vec<RepositoryCommit>, ApiError> {
        let mut url = self.repo_url(owner, repo, &["commits"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("path", path);
            if let Some(sha) = sha.filter(|s| !s.is_empty()) {
                query.append_pair("sha", sha);
            }
            query.append_pair("per_page", &per_page.to_string());
        }
        self.get(url).await
    }

    /// `GET repos/{owner}/{repo}/commits/{sha}`
    pub async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<RepositoryCommit, ApiError> {
        self.get(self.repo_url(owner, repo, &["commits", sha])?).await
    }

    /// `GET repos/{owner}/{repo}/commits/{sha}/statuses`
    pub async fn list_statuses(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<RepoStatus>, ApiError> {
        self.get(self.repo_url(owner, repo, &["commits", sha, "statuses"])?)
            .await
    }

    // =========================================================================
    // Pull requests
    // =========================================================================

    /// `GET repos/{owner}/{repo}/pulls?state=&head=&base=&per_page=100`
    pub async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        state: &str,
        head: &str,
        base: &str,
    ) -> Result<Vec<PullRequest>, ApiError> {
        let mut url = self.repo_url(owner, repo, &["pulls"])?;
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("head", head)
            .append_pair("base", base)
            .append_pair("per_page", "100");
        self.get(url).await
    }

    /// `GET repos/{owner}/{repo}/pulls/{number}`
    pub async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequest, ApiError> {
        let number = number.to_string();
        self.get(self.repo_url(owner, repo, &["pulls", &number])?)
            .await
    }

    /// `POST repos/{owner}/{repo}/pulls`
    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        body: &NewPullRequest,
    ) -> Result<PullRequest, ApiError> {
        let url = self.repo_url(owner, repo, &["pulls"])?;
        self.send_json(Method::POST, url, body).await
    }

    /// `PATCH repos/{owner}/{repo}/pulls/{number}`
    pub async fn update_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &PullRequestUpdate,
    ) -> Result<PullRequest, ApiError> {
        let number = number.to_string();
        let url = self.repo_url(owner, repo, &["pulls", &number])?;
        self.send_json(Method::PATCH, url, body).await
    }

    /// `PUT repos/{owner}/{repo}/pulls/{number}/merge`
    pub async fn merge_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        merge_method: &str,
    ) -> Result<MergeResult, ApiError> {
        let number = number.to_string();
        let url = self.repo_url(owner, repo, &["pulls", &number, "merge"])?;
        let body = serde_json::json!({ "merge_method": merge_method });
        self.send_json(Method::PUT, url, &body).await
    }

    /// `POST repos/{owner}/{repo}/pulls/{number}/reviews` with `APPROVE`.
    pub async fn approve_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<(), ApiError> {
        let number = number.to_string();
        let url = self.repo_url(owner, repo, &["pulls", &number, "reviews"])?;
        let body = serde_json::json!({ "event": "APPROVE" });
        self.send(self.http.post(url).json(&body)).await.map(drop)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::BaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_url(&self, owner: &str, repo: &str, rest: &[&str]) -> Result<Url, ApiError> {
        let mut segments = vec!["repos", owner, repo];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url, ApiError> {
        let mut segments = vec!["contents"];
        segments.extend(split_path(path));
        self.repo_url(owner, repo, &segments)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self.send(self.http.get(url)).await?;
        decode(response).await
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.http.request(method, url).json(body)).await?;
        decode(response).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = request.build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();

        let response = self.http.execute(request).await?;
        let status = response.status();
        debug!(method = %method, url = %url, status = status.as_u16(), "API request");

        if status.is_success() {
            return Ok(response);
        }
        Err(error_from_response(method, url, response).await)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn error_from_response(method: String, url: String, response: Response) -> ApiError {
    let status = response.status();
    let rate_limit_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .filter(|m| !m.is_empty())
        .or_else(|| Some(text.trim().to_string()).filter(|t| !t.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());

    ApiError::Status {
        method,
        url,
        status: status.as_u16(),
        message,
        errors: body.errors.iter().map(FieldError::render).collect(),
        rate_limit_exhausted,
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Client pointed at a mock server, with a token and no polling delay.
#[cfg(test)]
pub(crate) fn test_client(base_url: &str, owner: Option<&str>) -> GithubClient {
    let config = ResolvedConfig {
        token: Some("test-token".to_string()),
        base_url: crate::config::parse_base_url(base_url).unwrap(),
        owner: owner.map(str::to_string),
        insecure: false,
    };
    GithubClient::new(&config)
        .unwrap()
        .with_poll_settings(PollSettings::immediate())
}
