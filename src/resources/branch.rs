//! `githubx_repository_branch`

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::Resource;
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::ids::{build_two_part_id, is_legacy, parse_import_id, parse_two_part_id};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::{required_str, set, str_attr};
use crate::types::OperationResult;

pub(crate) const DEFAULT_SOURCE_BRANCH: &str = "main";

/// A branch created from another branch or a commit.
pub struct BranchResource;

#[async_trait]
impl Resource for BranchResource {
    fn type_name(&self) -> &'static str {
        "githubx_repository_branch"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Creates and manages a GitHub repository branch.")
            .with_attribute(
                "repository",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The GitHub repository name."),
            )
            .with_attribute(
                "branch",
                Attribute::required_string().with_description("The repository branch to create."),
            )
            .with_attribute(
                "source_branch",
                Attribute::optional_computed_string()
                    .with_default(json!(DEFAULT_SOURCE_BRANCH))
                    .with_force_new()
                    .with_description("The branch name to start from. Defaults to 'main'."),
            )
            .with_attribute(
                "source_sha",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_description(
                        "The commit hash to start from. Defaults to the tip of 'source_branch'.",
                    ),
            )
            .with_attribute(
                "etag",
                Attribute::optional_computed_string()
                    .with_description("An etag representing the Branch object."),
            )
            .with_attribute(
                "ref",
                Attribute::computed_string()
                    .with_description("The branch reference, in the form 'refs/heads/<branch>'."),
            )
            .with_attribute(
                "sha",
                Attribute::computed_string()
                    .with_description("SHA1 of the commit the branch points at."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("The ID, 'repository:branch'."),
            )
    }

    async fn create(
        &self,
        client: &GithubClient,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let repo = required_str(&planned, "repository")?.to_string();
        let branch = required_str(&planned, "branch")?.to_string();
        let source_branch = str_attr(&planned, "source_branch")
            .unwrap_or(DEFAULT_SOURCE_BRANCH)
            .to_string();

        let source_sha = match str_attr(&planned, "source_sha") {
            Some(sha) => sha.to_string(),
            None => resolve_branch_sha(client, &owner, &repo, &source_branch).await?,
        };

        match client
            .create_branch_ref(&owner, &repo, &branch, &source_sha)
            .await
        {
            Ok(_) => info!(owner = %owner, repo = %repo, branch = %branch, "Created branch"),
            Err(e) if e.is_conflict() && e.message_contains("Reference already exists") => {
                debug!(owner = %owner, repo = %repo, branch = %branch, "Branch already exists");
            },
            Err(e) => return Err(ProviderError::api("Error creating branch", e)),
        }

        let mut state = planned;
        set(&mut state, "source_branch", source_branch);
        set(&mut state, "source_sha", source_sha);
        set(&mut state, "id", build_two_part_id(&repo, &branch));
        if !read_branch(client, &owner, &repo, &branch, &mut state).await? {
            return Err(ProviderError::operation(
                "Error reading branch",
                format!("branch {}/{} ({}) not found after creation", owner, repo, branch),
            ));
        }
        Ok(OperationResult::new(state))
    }

    async fn read(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let id = required_str(&state, "id")?.to_string();
        let (repo, branch) = parse_two_part_id(&id, "repository", "branch")?;

        let mut state = state;
        if !read_branch(client, &owner, &repo, &branch, &mut state).await? {
            return Ok(OperationResult::removed());
        }
        if is_legacy(&id) {
            debug!(id = %id, "Migrating branch ID to ':' separator");
            set(&mut state, "id", build_two_part_id(&repo, &branch));
        }
        set(&mut state, "repository", repo);
        set(&mut state, "branch", branch);
        Ok(OperationResult::new(state))
    }

    async fn update(
        &self,
        client: &GithubClient,
        prior: Value,
        planned: Value,
    ) -> Result<OperationResult, ProviderError> {
        let owner = client.resolve_owner().await?;
        let id = required_str(&prior, "id")?;
        let (repo, old_branch) = parse_two_part_id(id, "repository", "branch")?;
        let new_branch = required_str(&planned, "branch")?.to_string();

        if new_branch != old_branch {
            client
                .rename_branch(&owner, &repo, &old_branch, &new_branch)
                .await
                .map_err(|e| ProviderError::api("Error renaming branch", e))?;
            info!(old = %old_branch, new = %new_branch, "Renamed branch");
        }

        let mut state = planned;
        set(&mut state, "id", build_two_part_id(&repo, &new_branch));
        if !read_branch(client, &owner, &repo, &new_branch, &mut state).await? {
            return Ok(OperationResult::removed());
        }
        Ok(OperationResult::new(state))
    }

    async fn delete(
        &self,
        client: &GithubClient,
        state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let owner = client.resolve_owner().await?;
        let id = required_str(&state, "id")?;
        let (repo, branch) = parse_two_part_id(id, "repository", "branch")?;

        match client.delete_branch_ref(&owner, &repo, &branch).await {
            Ok(()) => Ok(vec![]),
            Err(e)
                if e.is_not_found()
                    || (e.status() == Some(422)
                        && e.message_contains("Reference does not exist")) =>
            {
                info!(owner = %owner, repo = %repo, branch = %branch, "Branch no longer exists");
                Ok(vec![])
            },
            Err(e) => Err(ProviderError::api("Error deleting branch", e)),
        }
    }

    async fn import(&self, _client: &GithubClient, id: &str) -> Result<Value, ProviderError> {
        let (repo, branch, source_branch) =
            parse_import_id(id, "repository:branch[:source_branch]")?;
        Ok(json!({
            "id": build_two_part_id(repo, branch),
            "repository": repo,
            "branch": branch,
            "source_branch": source_branch.unwrap_or(DEFAULT_SOURCE_BRANCH),
        }))
    }
}

/// SHA at the tip of `branch`.
pub(crate) async fn resolve_branch_sha(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<String, ProviderError> {
    let (reference, _) = client
        .get_branch_ref(owner, repo, branch)
        .await
        .map_err(|e| ProviderError::api("Error querying source branch", e))?;
    reference.sha().map(str::to_string).ok_or_else(|| {
        ProviderError::operation(
            "Invalid source branch",
            format!("Source branch {} does not have a valid SHA", branch),
        )
    })
}

/// Fill `etag`, `ref` and `sha`. Returns `false` when the branch is gone.
async fn read_branch(
    client: &GithubClient,
    owner: &str,
    repo: &str,
    branch: &str,
    state: &mut Value,
) -> Result<bool, ProviderError> {
    match client.get_branch_ref(owner, repo, branch).await {
        Ok((reference, etag)) => {
            if let Some(etag) = etag {
                set(state, "etag", etag);
            }
            set(
                state,
                "ref",
                reference
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("refs/heads/{}", branch)),
            );
            if let Some(sha) = reference.sha() {
                set(state, "sha", sha);
            }
            Ok(true)
        },
        Err(e) if e.is_not_found() => {
            info!(owner, repo, branch, "Removing branch from state because it no longer exists");
            Ok(false)
        },
        Err(e) => Err(ProviderError::api("Error reading branch", e)),
    }
}
