//! `githubx_repository`
//!
//! Besides the repository itself this resource owns its topics, its Pages
//! site and the vulnerability-alerts toggle. Failures in those follow-up
//! calls are reported as warnings so a half-configured repository still
//! lands in state.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::Resource;
use crate::client::models::{NewRepository, Pages, PagesSource, PagesUpdate};
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::state::{
    block, bool_attr, flag, is_unset, keep, non_empty, required_str, set, sorted_list,
    str_attr, string_set,
};
use crate::types::OperationResult;

const MERGE_FLAGS: [&str; 3] = ["allow_merge_commit", "allow_squash_merge", "allow_rebase_merge"];

/// Feature toggles the API sometimes reports differently from what was
/// requested. Configured values win over the API response.
const FEATURE_FLAGS: [&str; 5] = [
    "has_issues",
    "has_discussions",
    "has_projects",
    "has_downloads",
    "has_wiki",
];

/// Fields whose change forces the merge flags to be resent.
const BASIC_FIELDS: [&str; 9] = [
    "description",
    "homepage_url",
    "visibility",
    "has_issues",
    "has_discussions",
    "has_projects",
    "has_downloads",
    "has_wiki",
    "is_template",
];

/// A repository owned by the configured owner.
pub struct RepositoryResource;

#[async_trait]
impl Resource for RepositoryResource {
    fn type_name(&self) -> &'static str {
        "githubx_repository"
    }

    fn schema(&self) -> Schema {
        let flag_attr =
            |description: &str| Attribute::optional_computed_bool().with_description(description);
        Schema::v0()
            .with_description("Creates and manages a GitHub repository.")
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_pattern("^[-a-zA-Z0-9_.]{1,100}$")
                    .with_description("The name of the repository."),
            )
            .with_attribute(
                "description",
                Attribute::optional_string().with_description("A description of the repository."),
            )
            .with_attribute(
                "homepage_url",
                Attribute::optional_string().with_description(
                    "URL of a page describing the project.",
                ),
            )
            .with_attribute(
                "visibility",
                Attribute::optional_computed_string()
                    .one_of(&["public", "private", "internal"])
                    .with_description("Can be 'public', 'private' or 'internal'."),
            )
            .with_attribute("has_issues", flag_attr("Whether the repository has issues enabled."))
            .with_attribute(
                "has_discussions",
                flag_attr("Whether the repository has discussions enabled."),
            )
            .with_attribute(
                "has_projects",
                flag_attr("Whether the repository has projects enabled."),
            )
            .with_attribute(
                "has_downloads",
                flag_attr("Whether the repository has downloads enabled."),
            )
            .with_attribute("has_wiki", flag_attr("Whether the repository has wiki enabled."))
            .with_attribute("is_template", flag_attr("Whether the repository is a template."))
            .with_attribute("allow_merge_commit", flag_attr("Whether merge commits are allowed."))
            .with_attribute("allow_squash_merge", flag_attr("Whether squash merges are allowed."))
            .with_attribute("allow_rebase_merge", flag_attr("Whether rebase merges are allowed."))
            .with_attribute("allow_auto_merge", flag_attr("Whether auto-merge is enabled."))
            .with_attribute("allow_update_branch", flag_attr("Whether branch updates are allowed."))
            .with_attribute(
                "squash_merge_commit_title",
                Attribute::optional_computed_string()
                    .one_of(&["PR_TITLE", "COMMIT_OR_PR_TITLE"])
                    .with_description("The default commit title for squash merges."),
            )
            .with_attribute(
                "squash_merge_commit_message",
                Attribute::optional_computed_string()
                    .one_of(&["PR_BODY", "COMMIT_MESSAGES", "BLANK"])
                    .with_description("The default commit message for squash merges."),
            )
            .with_attribute(
                "merge_commit_title",
                Attribute::optional_computed_string()
                    .one_of(&["PR_TITLE", "MERGE_MESSAGE"])
                    .with_description("The default commit title for merge commits."),
            )
            .with_attribute(
                "merge_commit_message",
                Attribute::optional_computed_string()
                    .one_of(&["PR_BODY", "PR_TITLE", "BLANK"])
                    .with_description("The default commit message for merge commits."),
            )
            .with_attribute(
                "delete_branch_on_merge",
                flag_attr("Whether to delete branches after merging pull requests."),
            )
            .with_attribute(
                "archive_on_destroy",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description(
                        "Whether to archive the repository instead of deleting it when the \
                         resource is destroyed.",
                    ),
            )
            .with_attribute(
                "archived",
                Attribute::computed_bool().with_description("Whether the repository is archived."),
            )
            .with_attribute(
                "auto_init",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description(
                        "Whether to initialize the repository with a README file. This will create \
                         the default branch.",
                    ),
            )
            .with_attribute(
                "topics",
                Attribute::optional_string_set().with_description(
                    "The topics (tags) associated with the repository. Order does not matter.",
                ),
            )
            .with_attribute(
                "vulnerability_alerts",
                flag_attr("Whether vulnerability alerts are enabled for the repository."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description(
                    "The repository name (same as `name`).",
                ),
            )
            .with_attribute(
                "full_name",
                Attribute::computed_string()
                    .with_description("The full name of the repository (owner/repo)."),
            )
            .with_attribute(
                "default_branch",
                Attribute::computed_string().with_description(
                    "The default branch of the repository.",
                ),
            )
            .with_attribute(
                "html_url",
                Attribute::computed_string().with_description("The HTML URL of the repository."),
            )
            .with_attribute(
                "node_id",
                Attribute::computed_string().with_description(
                    "The GitHub node ID of the repository.",
                ),
            )
            .with_attribute(
                "repo_id",
                Attribute::computed_int64()
                    .with_description("The GitHub repository ID as an integer."),
            )
            .with_block("pages", NestedBlock::single(pages_block()))
    }

    async fn create(
        &self,
        client: &GithubClient,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let name = required_str(&planned, "name")?.to_string();

        let request = new_repository(&name, &planned);
        let org = match client.authenticated_login() {
            Some(login) if login == owner => None,
            _ => Some(owner.as_str()),
        };
        let created = client
            .create_repository(org, &request)
            .await
            .map_err(|e| ProviderError::api("Error creating repository", e))?;
        let name = created.name.unwrap_or(name);
        info!(owner = %owner, repo = %name, "Created repository");

        let mut warnings = Vec::new();
        if let Some(topics) = string_set(&planned, "topics").filter(|t| !t.is_empty()) {
            if let Err(e) = client.replace_topics(&owner, &name, &topics).await {
                warnings.push(
                    Diagnostic::warning("Error setting topics")
                        .with_detail(format!("Unable to set topics: {}", e)),
                );
            }
        }
        if let Some(pages) = planned.get("pages").filter(|p| p.is_object()) {
            warnings.extend(update_pages(client, &owner, &name, pages).await);
        }
        if let Some(enabled) = bool_attr(&planned, "vulnerability_alerts") {
            warnings.extend(toggle_vulnerability_alerts(client, &owner, &name, enabled).await);
        }

        let mut state = planned.clone();
        if !read_repository(client, &owner, &name, &mut state, &mut warnings).await? {
            return Err(ProviderError::operation(
                "Error reading repository",
                format!("repository {}/{} not found after creation", owner, name),
            ));
        }
        for attr in FEATURE_FLAGS {
            keep(&mut state, &planned, attr);
        }
        let pages = refresh_pages(client, &owner, &name, planned.get("pages"), true).await;
        set(&mut state, "pages", pages);

        Ok(OperationResult::new(state).with_diagnostics(warnings))
    }

    async fn read(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let Some(name) = str_attr(&state, "id").map(str::to_string) else {
            return Err(ProviderError::operation(
                "Missing Repository Name",
                "The repository name (id) is required.",
            ));
        };

        let prior = state.clone();
        let mut state = state;
        let mut warnings = Vec::new();
        if !read_repository(client, &owner, &name, &mut state, &mut warnings).await? {
            return Ok(OperationResult::removed());
        }
        for attr in FEATURE_FLAGS {
            keep(&mut state, &prior, attr);
        }
        let pages = refresh_pages(client, &owner, &name, prior.get("pages"), false).await;
        set(&mut state, "pages", pages);

        Ok(OperationResult::new(state).with_diagnostics(warnings))
    }

    async fn update(
        &self,
        client: &GithubClient,
        prior: Value,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let name = required_str(&prior, "id")?.to_string();

        let patch = repository_patch(&prior, &planned);
        if !patch.is_empty() {
            match client
                .edit_repository(&owner, &name, &Value::Object(patch))
                .await
            {
                Ok(_) => info!(owner = %owner, repo = %name, "Updated repository"),
                Err(e)
                    if e.status() == Some(422) && e.message_contains("Privacy is already set") =>
                {
                    debug!(repo = %name, "Visibility already set, ignoring");
                },
                Err(e) => return Err(ProviderError::api("Error updating repository", e)),
            }
        }

        let mut warnings = Vec::new();
        if changed(&prior, &planned, "topics") {
            let (topics, summary, detail) = match string_set(&planned, "topics") {
                Some(topics) => (topics, "Error updating topics", "Unable to update topics"),
                None => (Vec::new(), "Error clearing topics", "Unable to clear topics"),
            };
            if let Err(e) = client.replace_topics(&owner, &name, &topics).await {
                warnings.push(
                    Diagnostic::warning(summary).with_detail(format!("{}: {}", detail, e)),
                );
            }
        }
        if let Some(pages) = planned.get("pages").filter(|p| p.is_object()) {
            if pages_changed(prior.get("pages"), pages) {
                warnings.extend(update_pages(client, &owner, &name, pages).await);
            }
        }
        if changed(&prior, &planned, "vulnerability_alerts") {
            if let Some(enabled) = bool_attr(&planned, "vulnerability_alerts") {
                warnings.extend(toggle_vulnerability_alerts(client, &owner, &name, enabled).await);
            }
        }

        let mut state = planned.clone();
        if !read_repository(client, &owner, &name, &mut state, &mut warnings).await? {
            return Ok(OperationResult::removed());
        }
        for attr in FEATURE_FLAGS {
            if is_unset(&planned, attr) {
                keep(&mut state, &prior, attr);
            } else {
                keep(&mut state, &planned, attr);
            }
        }
        let pages = refresh_pages(client, &owner, &name, planned.get("pages"), true).await;
        set(&mut state, "pages", pages);

        Ok(OperationResult::new(state).with_diagnostics(warnings))
    }

    async fn delete(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let owner = client.resolve_owner().await?;
        let name = required_str(&state, "id")?;

        if flag(&state, "archive_on_destroy") {
            if flag(&state, "archived") {
                debug!(
                    owner = %owner,
                    repo = %name,
                    "Repository already archived, nothing to do on delete"
                );
                return Ok(vec![]);
            }
            debug!(owner = %owner, repo = %name, "Archiving repository on delete");
            client
                .edit_repository(&owner, name, &json!({"archived": true}))
                .await
                .map_err(|e| ProviderError::api("Error archiving repository", e))?;
            return Ok(vec![]);
        }

        match client.delete_repository(&owner, name).await {
            Ok(()) => info!(owner = %owner, repo = %name, "Deleted repository"),
            Err(e) if e.is_not_found() => {
                info!(
                    owner = %owner,
                    repo = %name,
                    "Repository not found, assuming already deleted"
                );
            },
            Err(e) => return Err(ProviderError::api("Error deleting repository", e)),
        }
        Ok(vec![])
    }

    async fn import(&self, client: &GithubClient, id: &str) -> Result<Value, ProviderError> {
        let parts: Vec<&str> = id.split('/').collect();
        let name = match parts.as_slice() {
            [_, name] if !name.is_empty() => name.to_string(),
            [name] if !name.is_empty() => {
                client.resolve_owner().await.map_err(|e| {
                    ProviderError::operation(
                        "Invalid Import ID",
                        format!(
                            "Import ID must be in format 'owner/repo' or 'repo' (when \
                             provider-level owner is configured or authentication is available). \
                             Error: {}",
                            e
                        ),
                    )
                })?;
                name.to_string()
            },
            _ => {
                return Err(ProviderError::operation(
                    "Invalid Import ID",
                    "Import ID must be in format 'owner/repo' or 'repo'.",
                ))
            },
        };
        Ok(json!({
            "id": name,
            "name": name,
            "archive_on_destroy": false,
            "auto_init": false,
        }))
    }
}

fn pages_block() -> Block {
    Block::new()
        .with_description("The GitHub Pages configuration for the repository.")
        .with_attribute(
            "build_type",
            Attribute::optional_string().one_of(&["legacy", "workflow"]),
        )
        .with_attribute("cname", Attribute::optional_string())
        .with_attribute("custom_404", Attribute::computed_bool())
        .with_attribute("html_url", Attribute::computed_string())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("url", Attribute::computed_string())
        .with_block(
            "source",
            NestedBlock::single(
                Block::new()
                    .with_attribute("branch", Attribute::required_string())
                    .with_attribute(
                        "path",
                        Attribute::optional_computed_string().with_default(json!("/")),
                    ),
            ),
        )
}

/// Merge methods to request on create. Unset methods default to enabled and
/// at least one method always stays on.
fn initial_merge_methods(planned: &Value) -> (bool, bool, bool) {
    let [merge, squash, rebase] = MERGE_FLAGS.map(|attr| bool_attr(planned, attr));
    let (mut merge, squash, rebase) = (
        merge.unwrap_or(true),
        squash.unwrap_or(true),
        rebase.unwrap_or(true),
    );
    if !merge && !squash && !rebase {
        merge = true;
    }
    (merge, squash, rebase)
}

fn new_repository(name: &str, planned: &Value) -> NewRepository {
    let (merge, squash, rebase) = initial_merge_methods(planned);
    let owned = |attr: &str| str_attr(planned, attr).map(str::to_string);
    let visibility = owned("visibility");

    let mut request = NewRepository {
        name: name.to_string(),
        description: Some(owned("description").unwrap_or_default()),
        homepage: owned("homepage_url"),
        private: visibility.as_deref().map(|v| v == "private"),
        visibility,
        has_issues: bool_attr(planned, "has_issues"),
        has_discussions: bool_attr(planned, "has_discussions"),
        has_projects: bool_attr(planned, "has_projects"),
        has_downloads: bool_attr(planned, "has_downloads"),
        has_wiki: bool_attr(planned, "has_wiki"),
        is_template: bool_attr(planned, "is_template"),
        auto_init: bool_attr(planned, "auto_init"),
        allow_merge_commit: merge,
        allow_squash_merge: squash,
        allow_rebase_merge: rebase,
        allow_auto_merge: bool_attr(planned, "allow_auto_merge"),
        allow_update_branch: bool_attr(planned, "allow_update_branch"),
        delete_branch_on_merge: bool_attr(planned, "delete_branch_on_merge"),
        ..Default::default()
    };
    if squash {
        request.squash_merge_commit_title = owned("squash_merge_commit_title");
        request.squash_merge_commit_message = owned("squash_merge_commit_message");
    }
    if merge {
        let commit = (owned("merge_commit_title"), owned("merge_commit_message"));
        if let (Some(title), Some(message)) = commit {
            request.merge_commit_title = Some(title);
            request.merge_commit_message = Some(message);
        }
    }
    request
}

fn changed(prior: &Value, planned: &Value, attr: &str) -> bool {
    prior.get(attr).unwrap_or(&Value::Null) != planned.get(attr).unwrap_or(&Value::Null)
}

/// Build the PATCH body for an update. Only changed fields are sent, and the
/// merge flags are resent whenever another setting changes so the API never
/// sees all three disabled.
fn repository_patch(prior: &Value, planned: &Value) -> Map<String, Value> {
    let mut patch = Map::new();

    if changed(prior, planned, "description") {
        let description = str_attr(planned, "description").unwrap_or_default();
        patch.insert("description".into(), json!(description));
    }
    if changed(prior, planned, "homepage_url") {
        let homepage = str_attr(planned, "homepage_url").unwrap_or_default();
        patch.insert("homepage".into(), json!(homepage));
    }
    if changed(prior, planned, "visibility") {
        let visibility = str_attr(planned, "visibility").unwrap_or_default();
        patch.insert("visibility".into(), json!(visibility));
        patch.insert("private".into(), json!(visibility == "private"));
    }
    for attr in FEATURE_FLAGS.iter().chain(&["is_template"]) {
        if changed(prior, planned, attr) {
            patch.insert(attr.to_string(), json!(flag(planned, attr)));
        }
    }

    let mut current = MERGE_FLAGS.map(|attr| flag(prior, attr));
    for (i, attr) in MERGE_FLAGS.iter().enumerate() {
        if let Some(wanted) = bool_attr(planned, attr).filter(|_| changed(prior, planned, attr)) {
            current[i] = wanted;
            patch.insert(attr.to_string(), json!(wanted));
        }
    }
    if current.iter().all(|on| !on) {
        current[0] = true;
        patch.insert(MERGE_FLAGS[0].to_string(), json!(true));
    }

    for attr in ["allow_auto_merge", "allow_update_branch"] {
        if let Some(wanted) = bool_attr(planned, attr).filter(|_| changed(prior, planned, attr)) {
            patch.insert(attr.to_string(), json!(wanted));
        }
    }

    let [merge, squash, _] = current;
    if squash {
        for attr in ["squash_merge_commit_title", "squash_merge_commit_message"] {
            if let Some(value) = str_attr(planned, attr).filter(|_| changed(prior, planned, attr)) {
                patch.insert(attr.to_string(), json!(value));
            }
        }
    }
    if merge {
        let title = str_attr(planned, "merge_commit_title");
        let message = str_attr(planned, "merge_commit_message");
        let either_changed = changed(prior, planned, "merge_commit_title")
            || changed(prior, planned, "merge_commit_message");
        if let (Some(title), Some(message), true) = (title, message, either_changed) {
            patch.insert("merge_commit_title".into(), json!(title));
            patch.insert("merge_commit_message".into(), json!(message));
        }
    }

    if changed(prior, planned, "delete_branch_on_merge") {
        patch.insert(
            "delete_branch_on_merge".into(),
            json!(flag(planned, "delete_branch_on_merge")),
        );
    }

    let merge_flags_sent = MERGE_FLAGS.iter().any(|attr| patch.contains_key(*attr));
    let basic_changed = BASIC_FIELDS.iter().any(|attr| changed(prior, planned, attr));
    if !merge_flags_sent && basic_changed {
        for (attr, on) in MERGE_FLAGS.iter().zip(current) {
            patch.insert(attr.to_string(), json!(on));
        }
    }
    patch
}

/// Refresh `state` from the API. Returns `false` when the repository is gone.
async fn read_repository(
    client: &GithubClient,
    owner: &str,
    name: &str,
    state: &mut Value,
    warnings: &mut Vec<Diagnostic>,
) -> Result<bool, ProviderError> {
    let repo = match client.get_repository(owner, name).await {
        Ok(repo) => repo,
        Err(e) if e.is_not_found() => {
            info!(owner, repo = name, "Repository not found, removing from state");
            return Ok(false);
        },
        Err(e) => return Err(ProviderError::api("Error reading repository", e)),
    };

    let name = repo.name.clone().unwrap_or_else(|| name.to_string());
    set(state, "id", name.clone());
    set(state, "name", name.clone());
    set(
        state,
        "full_name",
        repo.full_name
            .clone()
            .unwrap_or_else(|| format!("{}/{}", owner, name)),
    );
    set(state, "description", non_empty(repo.description.as_deref()));
    set(state, "homepage_url", non_empty(repo.homepage.as_deref()));
    set(
        state,
        "visibility",
        repo.visibility.clone().filter(|v| !v.is_empty()).unwrap_or_else(|| "public".into()),
    );

    let flags = [
        ("has_issues", repo.has_issues),
        ("has_discussions", repo.has_discussions),
        ("has_projects", repo.has_projects),
        ("has_downloads", repo.has_downloads),
        ("has_wiki", repo.has_wiki),
        ("is_template", repo.is_template),
        ("allow_merge_commit", repo.allow_merge_commit),
        ("allow_squash_merge", repo.allow_squash_merge),
        ("allow_rebase_merge", repo.allow_rebase_merge),
        ("allow_auto_merge", repo.allow_auto_merge),
        ("allow_update_branch", repo.allow_update_branch),
        ("delete_branch_on_merge", repo.delete_branch_on_merge),
        ("archived", repo.archived),
    ];
    for (attr, value) in flags {
        set(state, attr, value.unwrap_or(false));
    }
    for (attr, value) in [
        ("squash_merge_commit_title", &repo.squash_merge_commit_title),
        ("squash_merge_commit_message", &repo.squash_merge_commit_message),
        ("merge_commit_title", &repo.merge_commit_title),
        ("merge_commit_message", &repo.merge_commit_message),
    ] {
        set(state, attr, non_empty(value.as_deref()));
    }

    set(
        state,
        "default_branch",
        repo.default_branch.clone().filter(|b| !b.is_empty()).unwrap_or_else(|| "main".into()),
    );
    set(
        state,
        "html_url",
        repo.html_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("https://github.com/{}/{}", owner, name)),
    );
    set(state, "node_id", repo.node_id.clone().unwrap_or_default());
    set(state, "repo_id", repo.id.unwrap_or_default());
    set(state, "topics", sorted_list(repo.topics.as_deref()));
    set(state, "pages", Value::Null);

    match client.vulnerability_alerts_enabled(owner, &name).await {
        Ok(enabled) => set(state, "vulnerability_alerts", enabled),
        Err(e) => {
            warnings.push(
                Diagnostic::warning("Error reading vulnerability alerts")
                    .with_detail(format!("Unable to read vulnerability alerts: {}", e)),
            );
            set(state, "vulnerability_alerts", Value::Null);
        },
    }
    Ok(true)
}

/// Re-read Pages when they are configured. On a lookup failure `fallback`
/// decides between merging with nothing (fresh config) and keeping the
/// configured value untouched (refresh).
async fn refresh_pages(
    client: &GithubClient,
    owner: &str,
    name: &str,
    configured: Option<&Value>,
    fallback: bool,
) -> Value {
    let Some(configured) = configured.filter(|p| p.is_object()) else {
        return Value::Null;
    };
    match client.get_pages(owner, name).await {
        Ok(pages) => merge_pages(configured, Some(&pages)),
        Err(e) => {
            debug!(owner, repo = name, error = %e, "Unable to read Pages");
            if fallback {
                merge_pages(configured, None)
            } else {
                configured.clone()
            }
        },
    }
}

/// Combine configured Pages arguments with what the API reports. Configured
/// arguments win; computed fields always come from the API.
fn merge_pages(configured: &Value, remote: Option<&Pages>) -> Value {
    let source = match block(configured, "source") {
        Some(source) => Some(source_value(
            source.get("branch").and_then(Value::as_str),
            source.get("path").and_then(Value::as_str),
        )),
        None => remote
            .and_then(|p| p.source.as_ref())
            .map(|s| source_value(s.branch.as_deref(), s.path.as_deref())),
    };
    let pick = |attr: &str, remote_value: Option<&String>| {
        configured
            .get(attr)
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| remote_value.map(|v| json!(v)))
            .unwrap_or(Value::Null)
    };
    json!({
        "source": source,
        "build_type": pick("build_type", remote.and_then(|p| p.build_type.as_ref())),
        "cname": pick("cname", remote.and_then(|p| p.cname.as_ref())),
        "custom_404": remote.and_then(|p| p.custom_404),
        "html_url": remote.and_then(|p| p.html_url.clone()),
        "status": remote.and_then(|p| p.status.clone()),
        "url": remote.and_then(|p| p.url.clone()),
    })
}

fn source_value(branch: Option<&str>, path: Option<&str>) -> Value {
    json!({
        "branch": branch,
        "path": path.filter(|p| !p.is_empty()).unwrap_or("/"),
    })
}

fn pages_changed(prior: Option<&Value>, planned: &Value) -> bool {
    let Some(prior) = prior.filter(|p| p.is_object()) else {
        return true;
    };
    ["source", "build_type", "cname"]
        .iter()
        .any(|attr| changed(prior, planned, attr))
}

async fn update_pages(
    client: &GithubClient,
    owner: &str,
    name: &str,
    pages: &Value,
) -> Option<Diagnostic> {
    let request = PagesUpdate {
        cname: str_attr(pages, "cname").map(str::to_string),
        build_type: str_attr(pages, "build_type").map(str::to_string),
        source: pages.get("source").filter(|s| s.is_object()).map(|source| PagesSource {
            branch: str_attr(source, "branch").map(str::to_string),
            path: Some(str_attr(source, "path").unwrap_or("/").to_string()),
        }),
    };
    match client.update_pages(owner, name, &request).await {
        Ok(()) => None,
        Err(e) if e.is_not_found() => {
            debug!(
                owner,
                repo = name,
                error = %e,
                "Pages not yet available, they will be configured once the repository has content"
            );
            None
        },
        Err(e) => Some(Diagnostic::warning("Error updating Pages").with_detail(format!(
            "Unable to update Pages configuration: {}. Pages may not be available until the \
             repository has content.",
            e
        ))),
    }
}

async fn toggle_vulnerability_alerts(
    client: &GithubClient,
    owner: &str,
    name: &str,
    enabled: bool,
) -> Option<Diagnostic> {
    let err = client
        .set_vulnerability_alerts(owner, name, enabled)
        .await
        .err()?;
    let (summary, verb) = if enabled {
        ("Error enabling vulnerability alerts", "enable")
    } else {
        ("Error disabling vulnerability alerts", "disable")
    };
    Some(
        Diagnostic::warning(summary)
            .with_detail(format!("Unable to {} vulnerability alerts: {}", verb, err)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use crate::schema::DiagnosticSeverity;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_repo() -> Value {
        json!({
            "id": 1296269,
            "node_id": "MDEwOlJlcG9zaXRvcnkxMjk2MjY5",
            "name": "hello",
            "full_name": "octo/hello",
            "description": "Demo",
            "homepage": "",
            "visibility": "public",
            "has_issues": true,
            "has_wiki": true,
            "allow_merge_commit": true,
            "allow_squash_merge": false,
            "allow_rebase_merge": true,
            "default_branch": "main",
            "html_url": "https://github.com/octo/hello",
            "topics": ["zeta", "alpha"],
        })
    }

    async fn mount_read(server: &MockServer, alerts_status: u16) {
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_repo()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/vulnerability-alerts"))
            .respond_with(ResponseTemplate::new(alerts_status))
            .mount(server)
            .await;
    }

    #[test]
    fn test_initial_merge_methods() {
        assert_eq!(initial_merge_methods(&json!({})), (true, true, true));
        assert_eq!(
            initial_merge_methods(&json!({"allow_squash_merge": false})),
            (true, false, true)
        );
        assert_eq!(
            initial_merge_methods(&json!({
                "allow_merge_commit": false,
                "allow_squash_merge": false,
                "allow_rebase_merge": false,
            })),
            (true, false, false)
        );
    }

    #[test]
    fn test_new_repository_commit_settings() {
        let request = new_repository(
            "hello",
            &json!({
                "visibility": "private",
                "allow_squash_merge": false,
                "squash_merge_commit_title": "PR_TITLE",
                "merge_commit_title": "PR_TITLE",
            }),
        );
        assert_eq!(request.private, Some(true));
        assert_eq!(request.squash_merge_commit_title, None);
        // Title alone is not enough; title and message travel together.
        assert_eq!(request.merge_commit_title, None);
        assert_eq!(request.description.as_deref(), Some(""));
    }

    #[test]
    fn test_patch_resends_merge_flags_with_other_changes() {
        let prior = json!({
            "description": "old",
            "allow_merge_commit": true,
            "allow_squash_merge": false,
            "allow_rebase_merge": true,
        });
        let mut planned = prior.clone();
        planned["description"] = json!("new");
        let patch = repository_patch(&prior, &planned);
        assert_eq!(
            Value::Object(patch),
            json!({
                "description": "new",
                "allow_merge_commit": true,
                "allow_squash_merge": false,
                "allow_rebase_merge": true,
            })
        );
    }

    #[test]
    fn test_patch_keeps_one_merge_method() {
        let prior = json!({
            "allow_merge_commit": true,
            "allow_squash_merge": false,
            "allow_rebase_merge": false,
        });
        let mut planned = prior.clone();
        planned["allow_merge_commit"] = json!(false);
        let patch = repository_patch(&prior, &planned);
        assert_eq!(Value::Object(patch), json!({"allow_merge_commit": true}));
    }

    #[test]
    fn test_patch_empty_without_changes() {
        let prior = json!({"name": "hello", "allow_merge_commit": true});
        assert!(repository_patch(&prior, &prior.clone()).is_empty());
    }

    #[test]
    fn test_merge_pages_prefers_configuration() {
        let configured = json!({"source": {"branch": "gh-pages", "path": null}, "cname": null});
        let remote = Pages {
            cname: Some("docs.example.com".into()),
            status: Some("built".into()),
            build_type: Some("legacy".into()),
            source: Some(PagesSource {
                branch: Some("main".into()),
                path: Some("/docs".into()),
            }),
            ..Default::default()
        };
        let merged = merge_pages(&configured, Some(&remote));
        assert_eq!(merged["source"], json!({"branch": "gh-pages", "path": "/"}));
        assert_eq!(merged["cname"], "docs.example.com");
        assert_eq!(merged["build_type"], "legacy");
        assert_eq!(merged["status"], "built");

        let offline = merge_pages(&configured, None);
        assert_eq!(offline["status"], Value::Null);
        assert_eq!(offline["source"]["branch"], "gh-pages");
    }

    #[tokio::test]
    async fn test_create_in_organization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orgs/octo/repos"))
            .and(body_partial_json(json!({
                "name": "hello",
                "allow_merge_commit": true,
                "allow_squash_merge": false,
                "allow_rebase_merge": true,
                "has_wiki": false,
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(remote_repo()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/topics"))
            .and(body_json(json!({"names": ["alpha", "zeta"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"names": ["alpha", "zeta"]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/vulnerability-alerts"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        mount_read(&server, 204).await;

        let client = test_client(&server.uri(), Some("octo"));
        let planned = json!({
            "name": "hello",
            "description": "Demo",
            "has_wiki": false,
            "allow_squash_merge": false,
            "topics": ["zeta", "alpha"],
            "vulnerability_alerts": true,
            "archive_on_destroy": false,
            "auto_init": false,
        });
        let result = RepositoryResource.create(&client, planned).await.unwrap();
        assert!(result.diagnostics.is_empty());
        let state = result.state.unwrap();
        assert_eq!(state["id"], "hello");
        assert_eq!(state["full_name"], "octo/hello");
        assert_eq!(state["has_wiki"], false);
        assert_eq!(state["topics"], json!(["alpha", "zeta"]));
        assert_eq!(state["vulnerability_alerts"], true);
        assert_eq!(state["homepage_url"], Value::Null);
        assert_eq!(state["repo_id"], 1296269);
        assert_eq!(state["pages"], Value::Null);
    }

    #[tokio::test]
    async fn test_create_for_authenticated_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octo"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(201).set_body_json(remote_repo()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/topics"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_read(&server, 404).await;

        let mut client = test_client(&server.uri(), None);
        client.discover_identity().await;
        let result = RepositoryResource
            .create(&client, json!({"name": "hello", "topics": ["ops"]}))
            .await
            .unwrap();
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].summary, "Error setting topics");
        assert_eq!(result.diagnostics[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(result.state.unwrap()["vulnerability_alerts"], false);
    }

    #[tokio::test]
    async fn test_read_applies_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "hello"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/vulnerability-alerts"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = RepositoryResource
            .read(&client, json!({"id": "hello", "has_wiki": true}))
            .await
            .unwrap();
        assert_eq!(result.diagnostics[0].summary, "Error reading vulnerability alerts");
        let state = result.state.unwrap();
        assert_eq!(state["visibility"], "public");
        assert_eq!(state["default_branch"], "main");
        assert_eq!(state["html_url"], "https://github.com/octo/hello");
        assert_eq!(state["full_name"], "octo/hello");
        assert_eq!(state["has_wiki"], true);
        assert_eq!(state["topics"], Value::Null);
        assert_eq!(state["vulnerability_alerts"], Value::Null);
    }

    #[tokio::test]
    async fn test_read_removes_missing_repository() {
        let server = MockServer::start().await;
        let client = test_client(&server.uri(), Some("octo"));
        let result = RepositoryResource
            .read(&client, json!({"id": "gone"}))
            .await
            .unwrap();
        assert!(result.state.is_none());
    }

    #[tokio::test]
    async fn test_update_ignores_privacy_already_set() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/octo/hello"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"message": "Privacy is already set"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_read(&server, 204).await;

        let client = test_client(&server.uri(), Some("octo"));
        let prior = json!({"id": "hello", "name": "hello", "visibility": "private"});
        let planned = json!({"name": "hello", "visibility": "public"});
        let state = RepositoryResource
            .update(&client, prior, planned)
            .await
            .unwrap()
            .state
            .unwrap();
        assert_eq!(state["visibility"], "public");
    }

    #[tokio::test]
    async fn test_update_clears_topics() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/topics"))
            .and(body_json(json!({"names": []})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"names": []})))
            .expect(1)
            .mount(&server)
            .await;
        mount_read(&server, 204).await;

        let client = test_client(&server.uri(), Some("octo"));
        let prior = json!({
            "id": "hello",
            "name": "hello",
            "allow_merge_commit": true,
            "topics": ["ops"],
        });
        let planned = json!({"name": "hello", "allow_merge_commit": true, "topics": null});
        RepositoryResource
            .update(&client, prior, planned)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_archives_instead() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/octo/hello"))
            .and(body_json(json!({"archived": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_repo()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        RepositoryResource
            .delete(&client, json!({"id": "hello", "archive_on_destroy": true, "archived": false}))
            .await
            .unwrap();
        // Already archived: nothing to do.
        RepositoryResource
            .delete(&client, json!({"id": "hello", "archive_on_destroy": true, "archived": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import_id_forms() {
        let server = MockServer::start().await;
        let client = test_client(&server.uri(), Some("octo"));
        let state = RepositoryResource.import(&client, "octo/hello").await.unwrap();
        assert_eq!(state["id"], "hello");
        let state = RepositoryResource.import(&client, "hello").await.unwrap();
        assert_eq!(state["name"], "hello");
        let err = RepositoryResource.import(&client, "a/b/c").await.unwrap_err();
        assert_eq!(err.to_diagnostic().summary, "Invalid Import ID");
    }
}
