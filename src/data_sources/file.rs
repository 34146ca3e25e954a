//! `githubx_repository_file`

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{locate_repository, DataSource};
use crate::client::models::Contents;
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::resources::file::{decode_content, file_commit, ref_from_url};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::{set, str_attr};
use crate::types::OperationResult;

const CONTENT_FIELDS: [&str; 7] = [
    "content",
    "sha",
    "ref",
    "commit_sha",
    "commit_message",
    "commit_author",
    "commit_email",
];

/// Reads a file and the last commit that touched it.
pub struct FileDataSource;

#[async_trait]
impl DataSource for FileDataSource {
    fn type_name(&self) -> &'static str {
        "githubx_repository_file"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Get information on a file in a GitHub repository.")
            .with_attribute(
                "repository",
                Attribute::optional_string()
                    .conflicts_with("full_name")
                    .with_description(
                        "The name of the repository. Conflicts with `full_name`. Uses the \
                         provider-level `owner`.",
                    ),
            )
            .with_attribute(
                "full_name",
                Attribute::optional_string()
                    .conflicts_with("repository")
                    .with_description(
                        "The full name of the repository (owner/repo). Conflicts with \
                         `repository`.",
                    ),
            )
            .with_attribute(
                "file",
                Attribute::required_string().with_description("The file path to read."),
            )
            .with_attribute(
                "branch",
                Attribute::optional_string()
                    .with_description(
                        "The branch name, defaults to the repository's default branch.",
                    ),
            )
            .with_attribute(
                "ref",
                Attribute::computed_string().with_description("The name of the commit/branch/tag."),
            )
            .with_attribute(
                "content",
                Attribute::computed_string().with_description("The file's content."),
            )
            .with_attribute(
                "sha",
                Attribute::computed_string().with_description("The blob SHA of the file."),
            )
            .with_attribute(
                "commit_sha",
                Attribute::computed_string()
                    .with_description("The SHA of the commit that modified the file."),
            )
            .with_attribute(
                "commit_message",
                Attribute::computed_string()
                    .with_description("The commit message when the file was last modified."),
            )
            .with_attribute(
                "commit_author",
                Attribute::computed_string().with_description("The commit author name."),
            )
            .with_attribute(
                "commit_email",
                Attribute::computed_string().with_description("The commit author email address."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("The ID, 'repository/file'."),
            )
    }

    async fn read(
        &self,
        client: &GithubClient,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        let (owner, repo) = locate_repository(client, &config, "repository").await?;
        let Some(file) = str_attr(&config, "file").map(str::to_string) else {
            return Err(ProviderError::operation(
                "Missing Required Attribute",
                "The `file` attribute is required.",
            ));
        };
        let branch = str_attr(&config, "branch").map(str::to_string);

        let mut state = config;
        for attr in CONTENT_FIELDS {
            set(&mut state, attr, Value::Null);
        }

        let content = match client
            .get_contents(&owner, &repo, &file, branch.as_deref())
            .await
        {
            Ok(Contents::File(content)) => content,
            Ok(Contents::Directory(_)) => {
                debug!(owner = %owner, repo = %repo, path = %file, "Path is a directory");
                set(&mut state, "repository", repo.clone());
                set(&mut state, "id", format!("{}/{}", repo, file));
                return Ok(OperationResult::new(state));
            },
            Err(e) if e.is_not_found() => {
                debug!(owner = %owner, repo = %repo, path = %file, "Missing repository file");
                set(&mut state, "id", "");
                return Ok(OperationResult::new(state));
            },
            Err(e) => return Err(ProviderError::api("Error fetching GitHub repository file", e)),
        };

        set(&mut state, "repository", repo.clone());
        set(&mut state, "id", format!("{}/{}", repo, file));
        set(&mut state, "content", decode_content(&content)?);
        set(&mut state, "sha", content.sha.clone());
        let git_ref = ref_from_url(content.url.as_deref());
        set(&mut state, "ref", git_ref.clone());

        let mut warnings = Vec::new();
        if let Some(git_ref) = git_ref.or(branch) {
            match file_commit(client, &owner, &repo, &file, &git_ref).await {
                Ok(commit) => {
                    debug!(path = %file, sha = ?commit.sha, "Found file commit");
                    let details = commit.commit.unwrap_or_default();
                    let committer = details.committer.unwrap_or_default();
                    set(&mut state, "commit_sha", commit.sha);
                    set(&mut state, "commit_message", details.message);
                    set(&mut state, "commit_author", committer.name);
                    set(&mut state, "commit_email", committer.email);
                },
                Err(e) => warnings.push(
                    Diagnostic::warning("Error fetching commit information").with_detail(format!(
                        "Unable to fetch commit information for file {}/{}/{}: {}",
                        owner, repo, file, e
                    )),
                ),
            }
        }

        Ok(OperationResult::new(state).with_diagnostics(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_read_file_with_commit() {
        let server = MockServer::start().await;
        let url = format!("{}/repos/octo/hello/contents/README.md?ref=main", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/README.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "encoding": "base64",
                "content": "aGVsbG8K\n",
                "sha": "blob1",
                "url": url,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits"))
            .and(query_param("path", "README.md"))
            .and(query_param("sha", "main"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"sha": "c1"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "c1",
                "commit": {
                    "message": "Initial commit",
                    "committer": {"name": "Mona", "email": "mona@example.com"},
                },
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileDataSource
            .read(&client, json!({"repository": "hello", "file": "README.md"}))
            .await
            .unwrap();
        assert!(result.diagnostics.is_empty());
        let state = result.state.unwrap();
        assert_eq!(state["id"], "hello/README.md");
        assert_eq!(state["content"], "hello\n");
        assert_eq!(state["ref"], "main");
        assert_eq!(state["commit_sha"], "c1");
        assert_eq!(state["commit_message"], "Initial commit");
        assert_eq!(state["commit_author"], "Mona");
        assert_eq!(state["commit_email"], "mona@example.com");
    }

    #[tokio::test]
    async fn test_directory_leaves_content_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/hub/tools/contents/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"type": "file", "name": "a.md", "path": "docs/a.md"},
            ])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), None);
        let state = FileDataSource
            .read(&client, json!({"full_name": "hub/tools", "file": "docs"}))
            .await
            .unwrap()
            .state
            .unwrap();
        assert_eq!(state["id"], "tools/docs");
        assert_eq!(state["content"], Value::Null);
        assert_eq!(state["sha"], Value::Null);
    }

    #[tokio::test]
    async fn test_binary_file_is_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/logo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "encoding": "base64",
                "content": "iVBORw0KGgo=",
                "sha": "blob3",
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileDataSource
            .read(&client, json!({"repository": "hello", "file": "logo.png"}))
            .await
            .unwrap();
        let state = result.state.unwrap();
        assert_eq!(state["id"], "hello/logo.png");
        assert_eq!(state["sha"], "blob3");
        assert!(state["content"].as_str().unwrap().contains("PNG"));
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_id() {
        let server = MockServer::start().await;
        let client = test_client(&server.uri(), Some("octo"));
        let result = FileDataSource
            .read(&client, json!({"repository": "hello", "file": "nope.txt"}))
            .await
            .unwrap();
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.state.unwrap()["id"], "");
    }

    #[tokio::test]
    async fn test_commit_lookup_failure_is_a_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/contents/a.txt"))
            .and(query_param("ref", "dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "file",
                "content": "YQ==",
                "sha": "blob2",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/hello/commits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), Some("octo"));
        let result = FileDataSource
            .read(&client, json!({"repository": "hello", "file": "a.txt", "branch": "dev"}))
            .await
            .unwrap();
        assert_eq!(result.diagnostics[0].summary, "Error fetching commit information");
        let state = result.state.unwrap();
        assert_eq!(state["content"], "a");
        assert_eq!(state["ref"], Value::Null);
        assert_eq!(state["commit_sha"], Value::Null);
    }
}
