//! `githubx_repository_file`

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::branch::{resolve_branch_sha, DEFAULT_SOURCE_BRANCH};
use super::Resource;
use crate::client::models::{
    CommitAuthor, Contents, FileChange, RepositoryCommit, RepositoryContent,
};
use crate::client::{ApiError, GithubClient};
use crate::error::ProviderError;
use crate::ids::{build_two_part_id, parse_import_id};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::{flag, is_unset, required_str, set, str_attr};
use crate::types::OperationResult;

/// A single file committed to a repository branch.
pub struct FileResource;

#[async_trait]
impl Resource for FileResource {
    fn type_name(&self) -> &'static str {
        "githubx_repository_file"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Creates and manages a file in a GitHub repository.")
            .with_attribute(
                "repository",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The GitHub repository name."),
            )
            .with_attribute(
                "file",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The file path to manage."),
            )
            .with_attribute(
                "content",
                Attribute::required_string().with_description("The file's content."),
            )
            .with_attribute(
                "branch",
                Attribute::optional_string()
                    .with_force_new()
                    .with_description(
                        "The branch name, defaults to the repository's default branch.",
                    ),
            )
            .with_attribute(
                "ref",
                Attribute::computed_string().with_description("The name of the commit/branch/tag."),
            )
            .with_attribute(
                "commit_sha",
                Attribute::computed_string()
                    .with_description("The SHA of the commit that modified the file."),
            )
            .with_attribute(
                "commit_message",
                Attribute::optional_computed_string().with_description(
                    "The commit message when creating, updating or deleting the file.",
                ),
            )
            .with_attribute(
                "commit_author",
                Attribute::optional_string()
                    .required_with("commit_email")
                    .with_description(
                        "The commit author name, defaults to the authenticated user's name.",
                    ),
            )
            .with_attribute(
                "commit_email",
                Attribute::optional_string()
                    .required_with("commit_author")
                    .with_description(
                        "The commit author email address, \
                         defaults to the authenticated user's email address.",
                    ),
            )
            .with_attribute(
                "sha",
                Attribute::computed_string().with_description("The blob SHA of the file."),
            )
            .with_attribute(
                "overwrite_on_create",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description("Enable overwriting existing files."),
            )
            .with_attribute(
                "autocreate_branch",
                Attribute::optional_computed_bool()
                    .with_default(json!(false))
                    .with_description("Automatically create the branch if it could not be found."),
            )
            .with_attribute(
                "autocreate_branch_source_branch",
                Attribute::optional_computed_string()
                    .with_default(json!(DEFAULT_SOURCE_BRANCH))
                    .with_description("The branch to start from when 'autocreate_branch' is set."),
            )
            .with_attribute(
                "autocreate_branch_source_sha",
                Attribute::optional_computed_string().with_description(
                    "The commit to start from when 'autocreate_branch' is set. \
                     Defaults to the tip of 'autocreate_branch_source_branch'.",
                ),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("The ID, 'repository:file'."),
            )
    }

    async fn create(
        &self,
        client: &GithubClient,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let repo = required_str(&planned, "repository")?.to_string();
        let file = required_str(&planned, "file")?.to_string();
        let branch = str_attr(&planned, "branch").map(str::to_string);
        let overwrite = flag(&planned, "overwrite_on_create");

        let mut state = planned;
        ensure_branch(client, &owner, &repo, &mut state).await?;

        let mut change = file_change(&state, Some(content_of(&state)));
        if change.message.is_empty() {
            change.message = format!("Add {}", file);
        }
        set(&mut state, "commit_message", change.message.clone());

        if overwrite {
            change.sha = existing_sha(client, &owner, &repo, &file, branch.as_deref()).await;
        }

        let attempts = client.poll().file_write_attempts.max(1);
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match client.put_file(&owner, &repo, &file, &change).await {
                Ok(response) => break response,
                Err(e) if e.is_conflict() && attempt < attempts => {
                    warn!(
                        attempt,
                        file = %file,
                        error = %e,
                        "File write conflicted, re-fetching SHA"
                    );
                    if let Some(sha) =
                        existing_sha(client, &owner, &repo, &file, branch.as_deref()).await
                    {
                        if !overwrite {
                            return Err(ProviderError::operation(
                                "File Already Exists",
                                format!(
                                    "File {} already exists in repository {}/{}. \
                                     Set 'overwrite_on_create' to true to overwrite it.",
                                    file, owner, repo
                                ),
                            ));
                        }
                        change.sha = Some(sha);
                    }
                },
                Err(e) => {
                    return Err(write_error("Error creating file", &file, &owner, &repo, attempt, e))
                },
            }
        };

        set(&mut state, "id", build_two_part_id(&repo, &file));
        if let Some(sha) = response.commit.and_then(|c| c.sha) {
            set(&mut state, "commit_sha", sha);
        }
        if !flag(&state, "autocreate_branch") {
            set(&mut state, "autocreate_branch_source_sha", Value::Null);
        }

        finish(read_file(client, &owner, &repo, &file, state).await?, "created")
    }

    async fn read(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let Some(id) = str_attr(&state, "id") else {
            return Ok(OperationResult::removed());
        };
        let (repo, file) = split_id(id)?;

        let mut state = state;
        if let Some(branch) = str_attr(&state, "branch").map(str::to_string) {
            if !branch_exists(client, &owner, &repo, &branch).await? {
                if !flag(&state, "autocreate_branch") {
                    info!(
                        owner = %owner,
                        repo = %repo,
                        file = %file,
                        "Removing file from state because its branch no longer exists"
                    );
                    return Ok(OperationResult::removed());
                }
                let source = str_attr(&state, "autocreate_branch_source_branch")
                    .unwrap_or(DEFAULT_SOURCE_BRANCH)
                    .to_string();
                set(&mut state, "branch", source);
            }
        }

        let result = read_file(client, &owner, &repo, &file, state).await?;
        Ok(match result.state {
            Some(mut state) => {
                if !flag(&state, "autocreate_branch") {
                    set(&mut state, "autocreate_branch_source_sha", Value::Null);
                }
                OperationResult::new(state).with_diagnostics(result.diagnostics)
            },
            None => result,
        })
    }

    async fn update(
        &self,
        client: &GithubClient,
        prior: Value,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let repo = required_str(&planned, "repository")?.to_string();
        let file = required_str(&planned, "file")?.to_string();
        let branch = str_attr(&planned, "branch").map(str::to_string);

        let mut state = planned;
        ensure_branch(client, &owner, &repo, &mut state).await?;

        let mut change = file_change(&state, Some(content_of(&state)));
        change.sha = str_attr(&prior, "sha").map(str::to_string);
        if change.message.is_empty() || change.message == format!("Add {}", file) {
            change.message = format!("Update {}", file);
        }
        set(&mut state, "commit_message", change.message.clone());

        let attempts = client.poll().file_write_attempts.max(1);
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match client.put_file(&owner, &repo, &file, &change).await {
                Ok(response) => break response,
                Err(e) if e.is_conflict() && attempt < attempts => {
                    warn!(
                        attempt,
                        file = %file,
                        error = %e,
                        "File write conflicted, re-fetching SHA"
                    );
                    match existing_sha(client, &owner, &repo, &file, branch.as_deref()).await {
                        Some(sha) => change.sha = Some(sha),
                        None => {
                            let summary = "Error updating file";
                            return Err(write_error(summary, &file, &owner, &repo, attempt, e));
                        },
                    }
                },
                Err(e) => {
                    return Err(write_error("Error updating file", &file, &owner, &repo, attempt, e))
                },
            }
        };

        if let Some(id) = str_attr(&prior, "id") {
            set(&mut state, "id", id.to_string());
        }
        if let Some(sha) = response.commit.and_then(|c| c.sha) {
            set(&mut state, "commit_sha", sha);
        }

        finish(read_file(client, &owner, &repo, &file, state).await?, "updated")
    }

    async fn delete(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let Some(id) = str_attr(&state, "id") else {
            debug!("File has no ID, nothing to delete");
            return Ok(vec![]);
        };
        let (repo, file) = split_id(id)?;
        let owner = client.resolve_owner().await?;
        let branch = str_attr(&state, "branch").map(str::to_string);

        let mut state = state;
        ensure_branch(client, &owner, &repo, &mut state).await?;

        let mut change = file_change(&state, None);
        if change.message.is_empty() || change.message == format!("Add {}", file) {
            change.message = format!("Delete {}", file);
        }
        change.sha = str_attr(&state, "sha").map(str::to_string);

        let attempts = client.poll().file_write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match client.delete_file(&owner, &repo, &file, &change).await {
                Ok(_) => return Ok(vec![]),
                Err(e) if e.is_not_found() => {
                    info!(file = %file, "File already deleted");
                    return Ok(vec![]);
                },
                Err(e) if e.is_conflict() && attempt < attempts => {
                    warn!(
                        attempt,
                        file = %file,
                        error = %e,
                        "File delete conflicted, re-fetching SHA"
                    );
                    match client
                        .get_contents(&owner, &repo, &file, branch.as_deref())
                        .await
                    {
                        Ok(Contents::File(content)) => change.sha = content.sha,
                        Err(read_err) if read_err.is_not_found() => return Ok(vec![]),
                        _ => {
                            let summary = "Error deleting file";
                            return Err(write_error(summary, &file, &owner, &repo, attempt, e));
                        },
                    }
                },
                Err(e) => {
                    return Err(write_error("Error deleting file", &file, &owner, &repo, attempt, e))
                },
            }
        }
    }

    async fn import(&self, client: &GithubClient, id: &str) -> Result<Value, ProviderError> {
        let (repo, file, branch) = parse_import_id(id, "repository:file[:branch]")?;
        let owner = client.resolve_owner().await?;

        match client.get_contents(&owner, repo, file, branch).await {
            Ok(Contents::File(_)) => {},
            Ok(Contents::Directory(_)) => {
                return Err(ProviderError::operation(
                    "File Not Found",
                    format!(
                        "File {} is not a file in repository {}/{} or repository is not readable",
                        file, owner, repo
                    ),
                ))
            },
            Err(e) => return Err(ProviderError::api("Error importing file", e)),
        }

        let mut state = json!({
            "id": build_two_part_id(repo, file),
            "repository": repo,
            "file": file,
            "overwrite_on_create": false,
            "autocreate_branch": false,
            "autocreate_branch_source_branch": DEFAULT_SOURCE_BRANCH,
        });
        if let Some(branch) = branch {
            set(&mut state, "branch", branch);
        }
        Ok(state)
    }
}

fn content_of(state: &Value) -> String {
    state
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn split_id(id: &str) -> Result<(String, String), ProviderError> {
    match id.split_once(':') {
        Some((repo, file)) if !repo.is_empty() && !file.is_empty() => {
            Ok((repo.to_string(), file.to_string()))
        },
        _ => Err(ProviderError::operation(
            "Invalid ID",
            format!("Invalid ID format: {}. Expected 'repository:file'.", id),
        )),
    }
}

/// Contents write body from state. The message is left empty when unset.
fn file_change(state: &Value, content: Option<String>) -> FileChange {
    let mut change = FileChange {
        message: str_attr(state, "commit_message").unwrap_or_default().to_string(),
        content: content.map(|c| STANDARD.encode(c)),
        branch: str_attr(state, "branch").map(str::to_string),
        ..Default::default()
    };
    let author = (str_attr(state, "commit_author"), str_attr(state, "commit_email"));
    if let (Some(name), Some(email)) = author {
        let author = CommitAuthor {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            date: None,
        };
        change.committer = Some(author.clone());
        change.author = Some(author);
    }
    change
}

fn write_error(
    summary: &str,
    file: &str,
    owner: &str,
    repo: &str,
    attempts: u32,
    err: ApiError,
) -> ProviderError {
    if err.is_rate_limited() {
        return ProviderError::api(summary, err);
    }
    ProviderError::operation(
        summary,
        format!(
            "Unable to write file {} in repository {}/{} after {} attempt(s): {}",
            file, owner, repo, attempts, err
        ),
    )
}

fn finish(result: OperationResult, verb: &str) -> Result<OperationResult, ProviderError> {
    if result.state.is_none() {
        return Err(ProviderError::operation(
            "Error reading file",
            format!("file was {} but could not be read back", verb),
        ));
    }
    Ok(result)
}

/// Blob SHA of the file on `branch`, if it exists.
async fn existing_sha(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    file: &str,
    branch: Option<&str>,
) -> Option<String> {
    match client.get_contents(owner, repo, file, branch).await {
        Ok(Contents::File(content)) => content.sha,
        _ => None,
    }
}

async fn branch_exists(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<bool, ProviderError> {
    match client.get_branch_ref(owner, repo, branch).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(ProviderError::api("Error reading branch", e)),
    }
}

/// Make sure the configured branch exists, creating it when allowed.
async fn ensure_branch(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    state: &mut Value,
) -> Result<(), ProviderError> {
    let Some(branch) = str_attr(state, "branch").map(str::to_string) else {
        return Ok(());
    };
    if branch_exists(client, owner, repo, &branch).await? {
        return Ok(());
    }
    if !flag(state, "autocreate_branch") {
        return Err(ProviderError::operation(
            "Branch Not Found",
            format!(
                "Branch {} not found in repository {}/{}. \
                 Set 'autocreate_branch' to true to automatically create it.",
                branch, owner, repo
            ),
        ));
    }

    let sha = match str_attr(state, "autocreate_branch_source_sha") {
        Some(sha) => sha.to_string(),
        None => {
            let source = str_attr(state, "autocreate_branch_source_branch")
                .unwrap_or(DEFAULT_SOURCE_BRANCH)
                .to_string();
            let sha = resolve_branch_sha(client, owner, repo, &source).await?;
            set(state, "autocreate_branch_source_sha", sha.clone());
            sha
        },
    };

    client
        .create_branch_ref(owner, repo, &branch, &sha)
        .await
        .map_err(|e| ProviderError::api("Error creating branch", e))?;
    info!(owner, repo, branch = %branch, "Created branch for file");
    Ok(())
}

/// Decode a base64 body as returned by the contents API, which wraps lines.
///
/// Binary files are not an error: bytes that are not UTF-8 come back as
/// U+FFFD replacement characters.
pub(crate) fn decode_content(content: &RepositoryContent) -> Result<String, ProviderError> {
    let raw = content.content.as_deref().unwrap_or_default();
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| {
        ProviderError::operation(
            "Error reading file content",
            format!("invalid base64 content: {}", e),
        )
    })?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// The `ref` query parameter of a contents URL.
pub(crate) fn ref_from_url(url: Option<&str>) -> Option<String> {
    let url = Url::parse(url?).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "ref")
        .map(|(_, value)| value.into_owned())
}

/// Latest commit touching `file` on `git_ref`.
pub(crate) async fn file_commit(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    file: &str,
    git_ref: &str,
) -> Result<RepositoryCommit, ProviderError> {
    let commits = client
        .list_commits(owner, repo, file, Some(git_ref), 1)
        .await
        .map_err(|e| ProviderError::api("Error fetching commit information", e))?;
    let sha = commits
        .first()
        .and_then(|c| c.sha.clone())
        .ok_or_else(|| {
            ProviderError::operation(
                "Error fetching commit information",
                format!("no commits found for file {} in ref {}", file, git_ref),
            )
        })?;
    client
        .get_commit(owner, repo, &sha)
        .await
        .map_err(|e| ProviderError::api("Error fetching commit information", e))
}

/// Refresh content, blob SHA, ref and commit details.
async fn read_file(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    file: &str,
    state: Value,
) -> Result<OperationResult, ProviderError> {
    let mut state = state;
    let branch = str_attr(&state, "branch").map(str::to_string);

    let content = match client.get_contents(owner, repo, file, branch.as_deref()).await {
        Ok(Contents::File(content)) => content,
        Ok(Contents::Directory(_)) => {
            return Err(ProviderError::operation(
                "Error reading file",
                format!("{} in repository {}/{} is a directory", file, owner, repo),
            ))
        },
        Err(e) if e.is_not_found() => {
            info!(owner, repo, file, "Removing file from state because it no longer exists");
            return Ok(OperationResult::removed());
        },
        Err(e) if e.is_rate_limited() => return Err(ProviderError::api("Rate Limit Exceeded", e)),
        Err(e) => return Err(ProviderError::api("Error reading file", e)),
    };

    set(&mut state, "content", decode_content(&content)?);
    set(&mut state, "repository", repo);
    set(&mut state, "file", file);
    set(&mut state, "sha", content.sha.clone());
    let git_ref = ref_from_url(content.url.as_deref());
    set(&mut state, "ref", git_ref.clone());

    let mut diagnostics = Vec::new();
    let lookup_ref = git_ref.or(branch);
    if let Some(lookup_ref) = lookup_ref {
        let commit = match str_attr(&state, "commit_sha") {
            Some(sha) => client
                .get_commit(owner, repo, sha)
                .await
                .map_err(|e| ProviderError::api("Error fetching commit information", e)),
            None => file_commit(client, owner, repo, file, &lookup_ref).await,
        };
        match commit {
            Ok(commit) => apply_commit(&mut state, commit),
            Err(e) => {
                debug!(error = %e, "Commit lookup failed");
                diagnostics.push(
                    Diagnostic::warning("Error fetching commit information").with_detail(format!(
                        "Unable to fetch commit information for file {}/{}/{}: {}",
                        owner, repo, file, e
                    )),
                );
            },
        }
    }

    Ok(OperationResult::new(state).with_diagnostics(diagnostics))
}

fn apply_commit(state: &mut Value, commit: RepositoryCommit) {
    if let Some(sha) = commit.sha {
        set(state, "commit_sha", sha);
    }
    let Some(details) = commit.commit else {
        return;
    };
    if is_unset(state, "commit_message") {
        set(state, "commit_message", details.message);
    }
    if let Some(committer) = details.committer {
        let name = committer.name.unwrap_or_default();
        let email = committer.email.unwrap_or_default();
        let configured = !is_unset(state, "commit_author") && !is_unset(state, "commit_email");
        if configured && name != "GitHub" && email != "noreply@github.com" {
            set(state, "commit_author", name);
            set(state, "commit_email", email);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use crate::config::PollSettings;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contents(path: &str, text: &str, sha: &str, git_ref: &str) -> Value {
        json!({
            "type": "file",
            "encoding": "base64",
            "path": path,
            "content": format!("{}\n", STANDARD.encode(text)),
            "sha": sha,
            "url": format!("https://api.github.com/repos/octo/hello/contents/{}?ref={}", path, git_ref),
        })
    }

    fn commit(sha: &str, message: &str) -> Value {
        json!({
            "sha": sha,
            "commit": {
                "message": message,
                "committer": {"name": "GitHub", "email": "noreply@github.com"},
            },
        })
    }

    async fn mount_read_back(server: &MockServer, text: &str) {
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contents("docs/a.md", text, "blob1", "main")),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(commit("c1", "Add docs/a.md")))
            .mount(server)
            .await;
    }

    #[test]
    fn test_schema_flags() {
        let schema = FileResource.schema();
        assert!(schema.attribute("file").unwrap().force_new);
        assert!(schema.attribute("branch").unwrap().force_new);
        assert!(!schema.attribute("content").unwrap().force_new);
        assert!(schema.attribute("commit_message").unwrap().flags.computed);
        assert_eq!(
            schema.attribute("overwrite_on_create").unwrap().default,
            Some(json!(false))
        );
    }

    #[test]
    fn test_ref_from_url() {
        assert_eq!(
            ref_from_url(Some("https://api.github.com/repos/o/r/contents/a?ref=dev")),
            Some("dev".to_string())
        );
        assert_eq!(ref_from_url(Some("https://api.github.com/repos/o/r/contents/a")), None);
        assert_eq!(ref_from_url(None), None);
    }

    #[test]
    fn test_decode_wrapped_content() {
        let content = RepositoryContent {
            content: Some("aGVs\nbG8=\n".to_string()),
            ..Default::default()
        };
        assert_eq!(decode_content(&content).unwrap(), "hello");
    }

    #[test]
    fn test_decode_binary_content_is_lossy() {
        let content = RepositoryContent {
            content: Some("iVBORw0KGgo=".to_string()),
            ..Default::default()
        };
        let text = decode_content(&content).unwrap();
        assert!(text.starts_with('\u{FFFD}'));
        assert!(text.contains("PNG"));

        let broken = RepositoryContent {
            content: Some("not base64!".to_string()),
            ..Default::default()
        };
        assert!(decode_content(&broken).is_err());
    }

    #[tokio::test]
    async fn test_create_uses_default_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(body_partial_json(json!({
                "message": "Add docs/a.md",
                "content": STANDARD.encode("hi"),
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "content": {"sha": "blob1"},
                "commit": {"sha": "c1"},
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_read_back(&server, "hi").await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .create(
                &client,
                json!({"repository": "hello", "file": "docs/a.md", "content": "hi"}),
            )
            .await
            .unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["id"], "hello:docs/a.md");
        assert_eq!(state["commit_sha"], "c1");
        assert_eq!(state["commit_message"], "Add docs/a.md");
        assert_eq!(state["sha"], "blob1");
        assert_eq!(state["ref"], "main");
        assert_eq!(state["content"], "hi");
    }

    #[tokio::test]
    async fn test_create_conflict_with_existing_file_fails() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "conflict"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contents("docs/a.md", "old", "blob0", "main")),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let err = FileResource
            .create(
                &client,
                json!({"repository": "hello", "file": "docs/a.md", "content": "hi"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_diagnostic().summary, "File Already Exists");
    }

    #[tokio::test]
    async fn test_create_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "conflict"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"))
            .with_poll_settings(PollSettings::immediate().with_file_write_attempts(2));
        let err = FileResource
            .create(
                &client,
                json!({"repository": "hello", "file": "docs/a.md", "content": "hi"}),
            )
            .await
            .unwrap_err();
        let diagnostic = err.to_diagnostic();
        assert_eq!(diagnostic.summary, "Error creating file");
        assert!(diagnostic.detail.unwrap().contains("after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_create_requires_existing_branch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/git/ref/heads/docs"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let err = FileResource
            .create(
                &client,
                json!({"repository": "hello", "file": "a.md", "content": "hi", "branch": "docs"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_diagnostic().summary, "Branch Not Found");
    }

    #[tokio::test]
    async fn test_create_autocreates_branch_from_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/git/ref/heads/docs"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/git/ref/heads/develop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ref": "refs/heads/develop",
                "object": {"type": "commit", "sha": "d1"},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octo/hello/git/refs"))
            .and(body_json(json!({"ref": "refs/heads/docs", "sha": "d1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ref": "refs/heads/docs",
                "object": {"type": "commit", "sha": "d1"},
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(body_partial_json(json!({"branch": "docs"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"commit": {"sha": "c1"}})))
            .expect(1)
            .mount(&server)
            .await;
        mount_read_back(&server, "hi").await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .create(
                &client,
                json!({
                    "repository": "hello", "file": "docs/a.md", "content": "hi",
                    "branch": "docs", "autocreate_branch": true,
                    "autocreate_branch_source_branch": "develop",
                }),
            )
            .await
            .unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["autocreate_branch_source_sha"], "d1");
        assert_eq!(state["commit_sha"], "c1");
    }

    #[tokio::test]
    async fn test_create_overwrite_retries_with_fetched_sha() {
        let server = MockServer::start().await;
        // Not there when first checked, then created concurrently.
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(body_partial_json(json!({"sha": "blob0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"commit": {"sha": "c1"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"message": "\"sha\" wasn't supplied."})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contents("docs/a.md", "old", "blob0", "main")),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_read_back(&server, "hi").await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .create(
                &client,
                json!({
                    "repository": "hello", "file": "docs/a.md", "content": "hi",
                    "overwrite_on_create": true,
                }),
            )
            .await
            .unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["commit_sha"], "c1");
        assert_eq!(state["content"], "hi");
    }

    #[tokio::test]
    async fn test_read_with_missing_branch_and_no_autocreate_removes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/git/ref/heads/docs"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .read(&client, json!({"id": "hello:a.md", "branch": "docs"}))
            .await
            .unwrap();
        assert!(result.state.is_none());
    }

    #[tokio::test]
    async fn test_read_lists_commits_when_sha_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contents("docs/a.md", "hi", "blob1", "main")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits"))
            .and(query_param("path", "docs/a.md"))
            .and(query_param("sha", "main"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"sha": "c9"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits/c9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(commit("c9", "Tweak")))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .read(
                &client,
                json!({"id": "hello:docs/a.md", "commit_message": "Mine"}),
            )
            .await
            .unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["commit_sha"], "c9");
        assert_eq!(state["commit_message"], "Mine");
        assert!(result.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_read_commit_failure_is_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contents("docs/a.md", "hi", "blob1", "main")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileResource
            .read(&client, json!({"id": "hello:docs/a.md"}))
            .await
            .unwrap();
        assert!(result.state.is_some());
        assert_eq!(result.diagnostics[0].summary, "Error fetching commit information");
    }

    #[tokio::test]
    async fn test_read_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"message": "slow down"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let err = FileResource
            .read(&client, json!({"id": "hello:docs/a.md"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_diagnostic().summary, "Rate Limit Exceeded");
    }

    #[tokio::test]
    async fn test_update_rewrites_add_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(body_partial_json(json!({"message": "Update docs/a.md", "sha": "blob1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"commit": {"sha": "c1"}})))
            .expect(1)
            .mount(&server)
            .await;
        mount_read_back(&server, "bye").await;

        let client = test_client(&server.uri(), Some("octo"));
        let prior = json!({
            "id": "hello:docs/a.md", "repository": "hello", "file": "docs/a.md",
            "content": "hi", "sha": "blob1", "commit_message": "Add docs/a.md",
        });
        let mut planned = prior.clone();
        planned["content"] = json!("bye");
        let result = FileResource.update(&client, prior, planned).await.unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["content"], "bye");
        assert_eq!(state["commit_message"], "Update docs/a.md");
    }

    #[tokio::test]
    async fn test_delete_conflict_then_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(body_partial_json(json!({"message": "Delete docs/a.md", "sha": "blob1"})))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "conflict"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let diagnostics = FileResource
            .delete(&client, json!({"id": "hello:docs/a.md", "sha": "blob1"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_id_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let diagnostics = FileResource.delete(&client, json!({"id": ""})).await.unwrap();
        assert!(diagnostics.is_empty());
        let diagnostics = FileResource.delete(&client, json!({})).await.unwrap();
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_import_with_branch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/docs/a.md"))
            .and(query_param("ref", "gh-pages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(contents("docs/a.md", "hi", "blob1", "gh-pages")),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let state = FileResource
            .import(&client, "hello:docs/a.md:gh-pages")
            .await
            .unwrap();
        assert_eq!(state["id"], "hello:docs/a.md");
        assert_eq!(state["branch"], "gh-pages");
        assert_eq!(state["overwrite_on_create"], false);
    }
}
