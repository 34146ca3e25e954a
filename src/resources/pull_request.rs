//! `githubx_repository_pull_request_auto_merge`
//!
//! A pull request that can merge itself once it is mergeable and its status
//! checks have passed. Both waits are bounded by [`PollSettings`].
//!
//! [`PollSettings`]: crate::config::PollSettings

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::Resource;
use crate::client::models::{
    NewPullRequest, PullRequest, PullRequestUpdate, RepoStatus, Repository,
};
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::ids::{build_two_part_id, parse_import_id};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::{flag, required_str, set, str_attr};
use crate::types::OperationResult;

const MERGE_METHODS: [&str; 3] = ["merge", "squash", "rebase"];

/// A pull request with optional merge-when-ready.
pub struct PullRequestAutoMergeResource;

#[async_trait]
impl Resource for PullRequestAutoMergeResource {
    fn type_name(&self) -> &'static str {
        "githubx_repository_pull_request_auto_merge"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "Creates and manages a GitHub pull request with optional auto-merge capabilities.",
            )
            .with_attribute(
                "repository",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The GitHub repository name."),
            )
            .with_attribute(
                "base_ref",
                Attribute::required_string()
                    .with_description("The base branch name (e.g., 'main', 'develop')."),
            )
            .with_attribute(
                "head_ref",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The head branch name (e.g., 'feature-branch')."),
            )
            .with_attribute(
                "title",
                Attribute::required_string().with_description("The title of the pull request."),
            )
            .with_attribute(
                "body",
                Attribute::optional_string()
                    .with_description("The body/description of the pull request."),
            )
            .with_attribute(
                "merge_when_ready",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description(
                        "Wait for all checks and approvals to pass, then automatically merge.",
                    ),
            )
            .with_attribute(
                "merge_method",
                Attribute::optional_computed_string()
                    .with_default(json!("merge"))
                    .one_of(&MERGE_METHODS)
                    .with_description(
                        "The merge method to use when auto-merging: 'merge', 'squash' or 'rebase'.",
                    ),
            )
            .with_attribute(
                "wait_for_checks",
                Attribute::optional_computed_bool()
                    .with_default(json!(true))
                    .with_description(
                        "Wait for CI checks to pass before merging. \
                         Only applies when 'merge_when_ready' is true.",
                    ),
            )
            .with_attribute(
                "auto_delete_branch",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description("Automatically delete the head branch after merge."),
            )
            .with_attribute(
                "maintainer_can_modify",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description("Allow maintainers to modify the pull request."),
            )
            .with_attribute(
                "base_sha",
                Attribute::computed_string().with_description("The SHA of the base branch."),
            )
            .with_attribute(
                "head_sha",
                Attribute::computed_string().with_description("The SHA of the head branch."),
            )
            .with_attribute(
                "number",
                Attribute::computed_int64().with_description("The pull request number."),
            )
            .with_attribute(
                "state",
                Attribute::computed_string()
                    .with_description("The state of the pull request (open, closed)."),
            )
            .with_attribute(
                "merged",
                Attribute::computed_bool()
                    .with_description("Whether the pull request has been merged."),
            )
            .with_attribute(
                "merged_at",
                Attribute::computed_string()
                    .with_description("The RFC3339 timestamp when the pull request was merged."),
            )
            .with_attribute(
                "merge_commit_sha",
                Attribute::computed_string().with_description("The SHA of the merge commit."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("The ID, 'repository:number'."),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        match (str_attr(config, "base_ref"), str_attr(config, "head_ref")) {
            (Some(base), Some(head)) if base == head => vec![same_branch_diagnostic(base, head)],
            _ => vec![],
        }
    }

    async fn create(
        &self,
        client: &GithubClient,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let repo = required_str(&planned, "repository")?.to_string();
        let base = required_str(&planned, "base_ref")?.to_string();
        let head = required_str(&planned, "head_ref")?.to_string();
        if base == head {
            let diagnostic = same_branch_diagnostic(&base, &head);
            return Err(ProviderError::operation(
                diagnostic.summary,
                diagnostic.detail.unwrap_or_default(),
            ));
        }

        let pull = match find_existing(client, &owner, &repo, &base, &head).await? {
            Some(existing) if !existing.is_open() && !existing.is_merged() => {
                let number = existing.number.unwrap_or_default();
                info!(number, head = %head, base = %base, "Reopening closed pull request");
                let reopen = PullRequestUpdate {
                    state: Some("open".to_string()),
                    ..Default::default()
                };
                client
                    .update_pull_request(&owner, &repo, number, &reopen)
                    .await
                    .map_err(|e| ProviderError::api("Error reopening pull request", e))?
            },
            Some(existing) => {
                info!(
                    number = existing.number,
                    head = %head,
                    base = %base,
                    "Adopting existing pull request"
                );
                existing
            },
            None => open_pull_request(client, &owner, &repo, &base, &head, &planned).await?,
        };

        let number = pull.number.ok_or_else(|| {
            ProviderError::operation("Error creating pull request", "response carried no number")
        })?;

        if pull.is_open() && flag(&planned, "merge_when_ready") {
            merge_when_ready(client, &owner, &repo, number, &planned)
                .await
                .map_err(auto_merge_error(number))?;
        }

        let mut state = planned;
        set(&mut state, "id", build_two_part_id(&repo, &number.to_string()));
        read_pull_request(client, &owner, &repo, number, state)
            .await?
            .map(OperationResult::new)
            .ok_or_else(|| {
                ProviderError::operation(
                    "Error reading pull request",
                    format!("pull request #{} was closed without merging", number),
                )
            })
    }

    async fn read(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let (repo, number) = parse_id(required_str(&state, "id")?)?;
        Ok(read_pull_request(client, &owner, &repo, number, state)
            .await?
            .map(OperationResult::new)
            .unwrap_or_else(OperationResult::removed))
    }

    async fn update(
        &self,
        client: &GithubClient,
        prior: Value,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let (repo, number) = parse_id(required_str(&prior, "id")?)?;

        let base = str_attr(&planned, "base_ref");
        let patch = PullRequestUpdate {
            title: str_attr(&planned, "title").map(str::to_string),
            body: Some(str_attr(&planned, "body").unwrap_or_default().to_string()),
            maintainer_can_modify: Some(flag(&planned, "maintainer_can_modify")),
            base: base
                .filter(|b| Some(*b) != str_attr(&prior, "base_ref"))
                .map(str::to_string),
            ..Default::default()
        };
        let pull = client
            .update_pull_request(&owner, &repo, number, &patch)
            .await
            .map_err(|e| ProviderError::api("Error updating pull request", e))?;

        let enabled_now = flag(&planned, "merge_when_ready") && !flag(&prior, "merge_when_ready");
        if enabled_now && pull.is_open() {
            merge_when_ready(client, &owner, &repo, number, &planned)
                .await
                .map_err(auto_merge_error(number))?;
        }

        let mut state = planned;
        if let Some(id) = str_attr(&prior, "id") {
            set(&mut state, "id", id.to_string());
        }
        Ok(read_pull_request(client, &owner, &repo, number, state)
            .await?
            .map(OperationResult::new)
            .unwrap_or_else(OperationResult::removed))
    }

    async fn delete(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let owner = client.resolve_owner().await?;
        let (repo, number) = parse_id(required_str(&state, "id")?)?;

        let pull = match client.get_pull_request(&owner, &repo, number).await {
            Ok(pull) => pull,
            Err(e) if e.is_not_found() => {
                info!(number, "Pull request not found, assuming already deleted");
                return Ok(vec![]);
            },
            Err(e) => return Err(ProviderError::api("Error reading pull request", e)),
        };

        if pull.is_merged() {
            info!(number, "Pull request is already merged, skipping close");
        } else if pull.is_open() {
            let close = PullRequestUpdate {
                state: Some("closed".to_string()),
                ..Default::default()
            };
            client
                .update_pull_request(&owner, &repo, number, &close)
                .await
                .map_err(|e| ProviderError::api("Error closing pull request", e))?;
            info!(number, "Closed pull request");
        } else {
            info!(number, "Pull request is already closed");
        }
        Ok(vec![])
    }

    async fn import(&self, _client: &GithubClient, id: &str) -> Result<Value, ProviderError> {
        let (repo, number, _) = parse_import_id(id, "repository:number")?;
        let number = parse_number(number)?;
        Ok(json!({
            "id": build_two_part_id(repo, &number.to_string()),
            "repository": repo,
            "number": number,
            "merge_when_ready": false,
            "merge_method": "merge",
            "wait_for_checks": true,
            "auto_delete_branch": false,
        }))
    }
}

fn same_branch_diagnostic(base: &str, head: &str) -> Diagnostic {
    Diagnostic::error("Invalid Configuration")
        .with_detail(format!(
            "Base branch '{}' and head branch '{}' cannot be the same. There must be a difference \
             to create a pull request.",
            base, head
        ))
        .with_attribute("head_ref")
}

fn auto_merge_error(number: i64) -> impl FnOnce(ProviderError) -> ProviderError {
    move |err| match err {
        ProviderError::Operation { ref summary, .. } if summary == "Rate Limit Exceeded" => err,
        other => ProviderError::operation(
            "Error setting up auto-merge",
            format!("Unable to set up auto-merge for pull request #{}: {}", number, other),
        ),
    }
}

fn parse_number(raw: &str) -> Result<i64, ProviderError> {
    raw.parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            ProviderError::operation("Invalid PR Number", format!("Invalid PR number: {}", raw))
        })
}

fn parse_id(id: &str) -> Result<(String, i64), ProviderError> {
    let Some((repo, number)) = id.split_once(':') else {
        return Err(ProviderError::operation(
            "Invalid ID",
            format!("Invalid ID format: {}. Expected 'repository:number'.", id),
        ));
    };
    Ok((repo.to_string(), parse_number(number)?))
}

async fn find_existing(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    base: &str,
    head: &str,
) -> Result<Option<PullRequest>, ProviderError> {
    let pulls = client
        .list_pull_requests(owner, repo, "all", &format!("{}:{}", owner, head), base)
        .await
        .map_err(|e| ProviderError::api("Error checking for existing pull request", e))?;
    Ok(pulls.into_iter().find(|pull| {
        let base_ref = pull.base.as_ref().and_then(|b| b.name.as_deref());
        let head_ref = pull.head.as_ref().and_then(|h| h.name.as_deref());
        base_ref == Some(base) && head_ref == Some(head)
    }))
}

async fn open_pull_request(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    base: &str,
    head: &str,
    planned: &Value,
) -> Result<PullRequest, ProviderError> {
    let (base_sha, head_sha) = branch_shas(client, owner, repo, base, head).await?;
    if base_sha == head_sha {
        return Err(ProviderError::operation(
            "No Differences",
            format!(
                "Branches '{}' and '{}' are at the same commit (SHA: {}). There are no changes to \
                 create a pull request.",
                head, base, head_sha
            ),
        ));
    }

    let request = NewPullRequest {
        title: required_str(planned, "title")?.to_string(),
        head: head.to_string(),
        base: base.to_string(),
        body: str_attr(planned, "body").map(str::to_string),
        maintainer_can_modify: flag(planned, "maintainer_can_modify"),
    };
    match client.create_pull_request(owner, repo, &request).await {
        Ok(pull) => {
            info!(number = pull.number, head, base, "Created pull request");
            Ok(pull)
        },
        Err(e)
            if e.status() == Some(422)
                && (e.message_contains("already exists")
                    || e.message_contains("No commits between")) =>
        {
            Err(ProviderError::operation(
                "Pull Request Already Exists or No Changes",
                format!(
                    "Unable to create pull request: {}. A pull request may already exist, \
                     or there are no commits between '{}' and '{}'.",
                    e, head, base
                ),
            ))
        },
        Err(e) => Err(ProviderError::api("Error creating pull request", e)),
    }
}

async fn branch_shas(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    base: &str,
    head: &str,
) -> Result<(String, String), ProviderError> {
    let mut shas = Vec::with_capacity(2);
    for (label, branch) in [("base", base), ("head", head)] {
        let (reference, _) = client.get_branch_ref(owner, repo, branch).await.map_err(|e| {
            ProviderError::operation(
                "Error checking branch differences",
                format!("unable to get {} branch {}: {}", label, branch, e),
            )
        })?;
        shas.push(reference.sha().unwrap_or_default().to_string());
    }
    let head_sha = shas.pop().unwrap_or_default();
    let base_sha = shas.pop().unwrap_or_default();
    Ok((base_sha, head_sha))
}

/// Poll until the pull request can be merged, then merge it.
async fn merge_when_ready(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    number: i64,
    planned: &Value,
) -> Result<(), ProviderError> {
    let poll = *client.poll();
    let requested = str_attr(planned, "merge_method").unwrap_or("merge");

    for attempt in 1..=poll.merge_attempts {
        let pull = client
            .get_pull_request(owner, repo, number)
            .await
            .map_err(|e| ProviderError::api("Error reading pull request", e))?;

        if !pull.is_open() {
            if pull.is_merged() {
                info!(number, "Pull request already merged");
                return Ok(());
            }
            return Err(ProviderError::operation(
                "Error merging pull request",
                "pull request is not open",
            ));
        }

        if pull.mergeable != Some(true) {
            debug!(
                number,
                attempt,
                max = poll.merge_attempts,
                mergeable = ?pull.mergeable,
                "Pull request not mergeable yet"
            );
            tokio::time::sleep(poll.merge_interval).await;
            continue;
        }

        if flag(planned, "wait_for_checks") {
            if let Err(e) = wait_for_checks(client, owner, repo, number).await {
                debug!(number, attempt, error = %e, "Checks not ready");
                tokio::time::sleep(poll.merge_interval).await;
                continue;
            }
        }

        if let Err(e) = client.approve_pull_request(owner, repo, number).await {
            warn!(number, error = %e, "Failed to approve pull request");
        }

        let repository = client.get_repository(owner, repo).await.ok();
        let method = choose_merge_method(requested, repository.as_ref())?;
        merge_with_fallback(client, owner, repo, number, &method, repository.as_ref()).await?;
        info!(number, method = %method, "Merged pull request");

        if flag(planned, "auto_delete_branch") {
            if let Some(head) = str_attr(planned, "head_ref") {
                match client.delete_branch_ref(owner, repo, head).await {
                    Ok(()) => info!(branch = %head, "Deleted head branch"),
                    Err(e) => warn!(branch = %head, error = %e, "Failed to delete head branch"),
                }
            }
        }
        return Ok(());
    }

    Err(ProviderError::operation(
        "Error merging pull request",
        format!("pull request not ready to merge after {} attempts", poll.merge_attempts),
    ))
}

/// Poll commit statuses on the head SHA until none is pending.
async fn wait_for_checks(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<(), ProviderError> {
    let poll = *client.poll();
    for attempt in 1..=poll.check_attempts {
        let pull = client
            .get_pull_request(owner, repo, number)
            .await
            .map_err(|e| ProviderError::api("Error reading pull request", e))?;
        let sha = pull.head_sha().unwrap_or_default().to_string();
        let statuses = client
            .list_statuses(owner, repo, &sha)
            .await
            .map_err(|e| ProviderError::api("Error reading status checks", e))?;
        let statuses = latest_per_context(statuses);

        if let Some(failed) = statuses
            .iter()
            .find(|s| matches!(s.state.as_deref(), Some("error") | Some("failure")))
        {
            return Err(ProviderError::operation(
                "Status Check Failed",
                format!(
                    "status check {} failed",
                    failed.context.as_deref().unwrap_or("unknown")
                ),
            ));
        }
        if !statuses.iter().any(|s| s.state.as_deref() == Some("pending")) {
            if statuses.is_empty() {
                debug!(number, "No status checks found, proceeding");
            }
            return Ok(());
        }

        debug!(number, attempt, max = poll.check_attempts, "Status checks pending");
        tokio::time::sleep(poll.check_interval).await;
    }
    Err(ProviderError::operation(
        "Status Check Timeout",
        format!("status checks did not complete after {} attempts", poll.check_attempts),
    ))
}

/// Keep only the newest status for each context. The API lists statuses
/// newest first, so a retried check that went pending then green counts as
/// green.
fn latest_per_context(statuses: Vec<RepoStatus>) -> Vec<RepoStatus> {
    let mut seen = HashSet::new();
    statuses
        .into_iter()
        .filter(|s| seen.insert(s.context.clone().unwrap_or_default()))
        .collect()
}

fn allowed_methods(repository: Option<&Repository>) -> Vec<&'static str> {
    let Some(repository) = repository else {
        return MERGE_METHODS.to_vec();
    };
    let mut allowed = Vec::new();
    if repository.allow_merge_commit.unwrap_or(false) {
        allowed.push("merge");
    }
    if repository.allow_squash_merge.unwrap_or(false) {
        allowed.push("squash");
    }
    if repository.allow_rebase_merge.unwrap_or(false) {
        allowed.push("rebase");
    }
    allowed
}

/// Pick the requested merge method, or the first allowed fallback. Without
/// repository settings the request is used as-is.
fn choose_merge_method(
    requested: &str,
    repository: Option<&Repository>,
) -> Result<String, ProviderError> {
    let allowed = allowed_methods(repository);
    let fallbacks: &[&str] = match requested {
        "squash" => &["squash", "merge", "rebase"],
        "rebase" => &["rebase", "merge", "squash"],
        _ => &["merge", "squash", "rebase"],
    };
    for candidate in fallbacks {
        if allowed.iter().any(|a| a == candidate) {
            if *candidate != requested {
                warn!(requested, fallback = %candidate, "Merge method not allowed, falling back");
            }
            return Ok(candidate.to_string());
        }
    }
    Err(ProviderError::operation(
        "Error merging pull request",
        format!(
            "{} merge is not allowed on this repository \
             and no alternative merge methods are enabled",
            requested
        ),
    ))
}

async fn merge_with_fallback(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    number: i64,
    method: &str,
    repository: Option<&Repository>,
) -> Result<(), ProviderError> {
    let err = match client.merge_pull_request(owner, repo, number, method).await {
        Ok(_) => return Ok(()),
        Err(e) if e.status() == Some(405) => e,
        Err(e) => return Err(ProviderError::api("Error merging pull request", e)),
    };

    for alternative in allowed_methods(repository)
        .into_iter()
        .filter(|m| *m != method)
    {
        warn!(failed = %method, alternative, "Merge rejected, trying another method");
        match client
            .merge_pull_request(owner, repo, number, alternative)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.status() == Some(405) => continue,
            Err(e) => return Err(ProviderError::api("Error merging pull request", e)),
        }
    }
    Err(ProviderError::api("Error merging pull request", err))
}

/// Refresh computed fields. `None` means the pull request is gone or was
/// closed without merging.
async fn read_pull_request(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    number: i64,
    state: Value,
) -> Result<Option<Value>, ProviderError> {
    let pull = match client.get_pull_request(owner, repo, number).await {
        Ok(pull) => pull,
        Err(e) if e.is_not_found() => {
            info!(number, "Pull request not found, removing from state");
            return Ok(None);
        },
        Err(e) => return Err(ProviderError::api("Error reading pull request", e)),
    };
    if !pull.is_open() && !pull.is_merged() {
        info!(number, "Pull request is closed but not merged, removing from state");
        return Ok(None);
    }

    let merged = pull.is_merged();
    let mut state = state;
    set(&mut state, "repository", repo);
    set(&mut state, "number", number);
    set(&mut state, "title", pull.title.clone());
    if let Some(body) = pull.body.clone().filter(|b| !b.is_empty()) {
        set(&mut state, "body", body);
    }
    set(&mut state, "state", pull.state.clone());
    set(&mut state, "merged", merged);
    set(&mut state, "maintainer_can_modify", pull.maintainer_can_modify.unwrap_or(false));
    set(
        &mut state,
        "merged_at",
        pull.merged_at.clone().filter(|_| merged),
    );
    set(
        &mut state,
        "merge_commit_sha",
        pull.merge_commit_sha.clone().filter(|s| merged && !s.is_empty()),
    );
    if let Some(head) = &pull.head {
        set(&mut state, "head_ref", head.name.clone());
        set(&mut state, "head_sha", head.sha.clone());
    }
    if let Some(base) = &pull.base {
        set(&mut state, "base_ref", base.name.clone());
        set(&mut state, "base_sha", base.sha.clone());
    }
    Ok(Some(state))
}
