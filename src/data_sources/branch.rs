//! `githubx_repository_branch`

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{locate_repository, DataSource};
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::{set, str_attr};
use crate::types::OperationResult;

/// Looks up the tip of a branch.
pub struct BranchDataSource;

#[async_trait]
impl DataSource for BranchDataSource {
    fn type_name(&self) -> &'static str {
        "githubx_repository_branch"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Get information on a GitHub repository branch.")
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
                "branch",
                Attribute::required_string().with_description("The name of the branch."),
            )
            .with_attribute(
                "etag",
                Attribute::computed_string().with_description(
                    "The ETag header value from the API response.",
                ),
            )
            .with_attribute(
                "ref",
                Attribute::computed_string()
                    .with_description("The full Git reference (e.g., refs/heads/main)."),
            )
            .with_attribute(
                "sha",
                Attribute::computed_string()
                    .with_description("The SHA of the commit that the branch points to."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("The ID, 'repository/branch'."),
            )
    }

    async fn read(
        &self,
        client: &GithubClient,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        let (owner, repo) = locate_repository(client, &config, "repository").await?;
        let Some(branch) = str_attr(&config, "branch").map(str::to_string) else {
            return Err(ProviderError::operation(
                "Missing Required Attribute",
                "The `branch` attribute is required.",
            ));
        };

        let mut state = config;
        let (reference, etag) = match client.get_branch_ref(&owner, &repo, &branch).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                debug!(owner = %owner, repo = %repo, branch = %branch, "Missing branch");
                set(&mut state, "id", "");
                return Ok(OperationResult::new(state).with_diagnostic(
                    Diagnostic::warning("Branch Not Found").with_detail(format!(
                        "Branch {} not found in repository {}/{}. Setting empty state.",
                        branch, owner, repo
                    )),
                ));
            },
            Err(e) => return Err(ProviderError::api("Error fetching GitHub branch", e)),
        };

        set(&mut state, "id", format!("{}/{}", repo, branch));
        set(&mut state, "etag", etag);
        set(&mut state, "sha", reference.sha().map(str::to_string));
        set(&mut state, "ref", reference.name);
        Ok(OperationResult::new(state))
    }
}
