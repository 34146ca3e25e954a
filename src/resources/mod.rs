//! Managed resources.
//!
//! Each resource type implements [`Resource`]. The provider looks handlers up
//! by their full type name (`githubx_<name>`) and passes in the configured
//! [`GithubClient`].

pub(crate) mod branch;
pub(crate) mod file;
mod pull_request;
mod repository;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::plan;
use crate::schema::{Diagnostic, Schema};
use crate::types::{OperationResult, PlanResult};

pub use branch::BranchResource;
pub use file::FileResource;
pub use pull_request::PullRequestAutoMergeResource;
pub use repository::RepositoryResource;

/// A resource type managed by the provider.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Full type name, e.g. `githubx_repository`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Cross-field checks run after schema validation.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Plan a change. The default is the schema-driven planner.
    fn plan(&self, prior: Option<&Value>, proposed: &Value) -> PlanResult {
        plan::plan(&self.schema(), prior, proposed)
    }

    /// Create the remote object.
    async fn create(
        &self,
        client: &GithubClient,
        planned: Value,
    ) -> Result<OperationResult, ProviderError>;

    /// Refresh state. A result without state removes the object.
    async fn read(&self, client: &GithubClient, state: Value)
        -> Result<OperationResult, ProviderError>;

    /// Apply in-place changes.
    async fn update(
        &self,
        client: &GithubClient,
        prior: Value,
        planned: Value,
    ) -> Result<OperationResult, ProviderError>;

    /// Destroy the remote object. Returned diagnostics are warnings.
    async fn delete(&self, client: &GithubClient, state: Value)
        -> Result<Vec<Diagnostic>, ProviderError>;

    /// Build the state to read back for an import ID.
    async fn import(&self, client: &GithubClient, id: &str) -> Result<Value, ProviderError>;
}

/// Every resource the provider serves.
pub fn all() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(RepositoryResource),
        Arc::new(BranchResource),
        Arc::new(FileResource),
        Arc::new(PullRequestAutoMergeResource),
    ]
}
