//! Read-only data sources.

mod branch;
mod file;
mod repository;
mod user;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::ids::split_full_name;
use crate::schema::{Diagnostic, Schema};
use crate::state::str_attr;
use crate::types::OperationResult;

pub use branch::BranchDataSource;
pub use file::FileDataSource;
pub use repository::RepositoryDataSource;
pub use user::UserDataSource;

/// A data source served by the provider.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Full type name, e.g. `githubx_user`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Cross-field checks run after schema validation.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Look the object up. Not-found cases return a state with an empty
    /// `id` and a warning rather than an error.
    async fn read(&self, client: &GithubClient, config: Value)
        -> Result<OperationResult, ProviderError>;
}

/// Every data source the provider serves.
pub fn all() -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(UserDataSource),
        Arc::new(RepositoryDataSource),
        Arc::new(BranchDataSource),
        Arc::new(FileDataSource),
    ]
}

/// Resolve `(owner, repo)` from a config that names the repository either by
/// `full_name` or by `name_attr` under the provider owner.
pub(crate) async fn locate_repository(
    client: &GithubClient,
    config: &Value,
    name_attr: &str,
) -> Result<(String, String), ProviderError> {
    match (str_attr(config, "full_name"), str_attr(config, name_attr)) {
        (Some(_), Some(_)) => Err(ProviderError::operation(
            "Conflicting Attributes",
            format!(
                "Cannot specify both `full_name` and `{}`. Please use only one.",
                name_attr
            ),
        )),
        (Some(full_name), None) => split_full_name(full_name)
            .map(|(owner, repo)| (owner.to_string(), repo.to_string()))
            .ok_or_else(|| {
                ProviderError::operation(
                    "Invalid Full Name",
                    format!(
                        "Unable to parse full_name: unexpected full name format ({}), expected \
                         owner/repo",
                        full_name
                    ),
                )
            }),
        (None, Some(repo)) => {
            let owner = client.resolve_owner().await?;
            Ok((owner, repo.to_string()))
        },
        (None, None) => Err(ProviderError::operation(
            "Missing Required Attribute",
            format!("Either `full_name` or `{}` must be provided.", name_attr),
        )),
    }
}
