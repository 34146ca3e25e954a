//! In-process harness for exercising a [`ProviderService`].
//!
//! [`ProviderTester`] calls the service methods directly, so tests can stand
//! up a `wiremock` server, point the provider at it and walk a resource
//! through plan, apply and read without any gRPC plumbing.
//!
//! ```ignore
//! let tester = ProviderTester::new(GithubProvider::new());
//! tester
//!     .configure(json!({"token": "t", "owner": "octo", "base_url": server.uri()}))
//!     .await?;
//! let state = tester
//!     .lifecycle_create(
//!         "githubx_repository_branch",
//!         json!({"repository": "hello", "branch": "dev"}),
//!     )
//!     .await?;
//! assert_eq!(state["id"], "hello:dev");
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, OperationResult, PlanResult};

/// Why a harness step failed.
#[derive(Debug, Error)]
pub enum TestError {
    /// The step returned error diagnostics.
    #[error("{}", render(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The service returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    /// A read reported the object as gone.
    #[error("{0} was removed from state")]
    Removed(String),
}

fn render(diagnostics: &[Diagnostic]) -> String {
    let mut out = format!("Operation failed with {} diagnostic(s):\n", diagnostics.len());
    for d in diagnostics {
        out.push_str(&format!("  [{:?}] {}", d.severity, d.summary));
        if let Some(detail) = &d.detail {
            out.push_str(&format!(": {detail}"));
        }
        if let Some(attr) = &d.attribute {
            out.push_str(&format!(" (at {attr})"));
        }
        out.push('\n');
    }
    out
}

fn errors(diagnostics: &[Diagnostic]) -> impl Iterator<Item = &Diagnostic> {
    diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
}

fn fail_on_errors(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errs: Vec<Diagnostic> = errors(&diagnostics).cloned().collect();
    if errs.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errs))
    }
}

fn require_state(resource_type: &str, result: OperationResult) -> Result<Value, TestError> {
    fail_on_errors(result.diagnostics)?;
    result
        .state
        .ok_or_else(|| TestError::Removed(resource_type.to_string()))
}

/// Drives a [`ProviderService`] the way the orchestrator would.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// `GetSchema`.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names from `GetMetadata`.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names from `GetMetadata`.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// `ValidateProviderConfig`, failing on any error diagnostic.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        fail_on_errors(self.provider.validate_provider_config(config).await?)
    }

    /// `Configure`, failing on any error diagnostic.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        fail_on_errors(self.provider.configure(config).await?)
    }

    /// `Stop`.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// `ValidateResourceConfig`, failing on any error diagnostic.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        fail_on_errors(diagnostics)
    }

    /// `ValidateResourceConfig` with every diagnostic returned as-is.
    pub async fn resource_config_diagnostics(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.provider
            .validate_resource_config(resource_type, config)
            .await
    }

    /// Plan with no prior state. `config` doubles as the proposed state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan from `prior_state` towards `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan with a null proposed state.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// `Create`.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<OperationResult, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// `Read`.
    pub async fn read(
        &self,
        resource_type: &str,
        state: Value,
    ) -> Result<OperationResult, ProviderError> {
        self.provider.read(resource_type, state).await
    }

    /// `Update`.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<OperationResult, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// `Delete`. Returns its warnings.
    pub async fn delete(
        &self,
        resource_type: &str,
        state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// `ImportResourceState`.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// `ValidateDataSourceConfig`, failing on any error diagnostic.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        fail_on_errors(diagnostics)
    }

    /// `ReadDataSource`.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        self.provider.read_data_source(data_source_type, config).await
    }

    /// Plan, create, then read back. Returns the read state.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self.plan_create(resource_type, config).await?;
        fail_on_errors(plan.diagnostics)?;
        let created = self.create(resource_type, plan.planned_state).await?;
        let created = require_state(resource_type, created)?;
        require_state(resource_type, self.read(resource_type, created).await?)
    }

    /// Plan, update, then read back. Returns the read state.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        fail_on_errors(plan.diagnostics)?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        let updated = require_state(resource_type, updated)?;
        require_state(resource_type, self.read(resource_type, updated).await?)
    }

    /// Plan a destroy, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        state: Value,
    ) -> Result<(), TestError> {
        self.plan_delete(resource_type, state.clone()).await?;
        fail_on_errors(self.delete(resource_type, state).await?)
    }

    /// Create from `initial`, update to `updated`, then delete. Returns the
    /// state read after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: Value,
        updated: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial).await?;
        let state = self.lifecycle_update(resource_type, created, updated).await?;
        self.lifecycle_delete(resource_type, state.clone()).await?;
        Ok(state)
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Panics unless `plan` is a create: some changes, no replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "expected a create plan, got no changes");
    assert!(!plan.requires_replace, "expected a create plan, got a replacement");
}

/// Panics if `plan` has any change.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` replaces the object.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(plan.requires_replace, "expected a replacement plan");
}

/// Panics if `plan` replaces the object.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.requires_replace, "expected an in-place update, got a replacement");
}

/// Panics unless `plan` changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let paths = changed_paths(plan);
    assert!(paths.contains(&path), "expected '{path}' to change, changed: {paths:?}");
}

/// Panics if `plan` changes `path`.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !changed_paths(plan).contains(&path),
        "expected '{path}' to stay unchanged"
    );
}

/// Panics on any error diagnostic.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let summaries: Vec<&str> = errors(diagnostics).map(|d| d.summary.as_str()).collect();
    assert!(summaries.is_empty(), "expected no errors, got {summaries:?}");
}

/// Panics unless there is at least one error diagnostic.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(errors(diagnostics).next().is_some(), "expected at least one error");
}

/// Panics unless an error summary contains `needle`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], needle: &str) {
    let summaries: Vec<&str> = errors(diagnostics).map(|d| d.summary.as_str()).collect();
    assert!(
        summaries.iter().any(|s| s.contains(needle)),
        "expected an error containing '{needle}', got {summaries:?}"
    );
}

/// Panics unless a warning summary contains `needle`.
pub fn assert_warning_contains(diagnostics: &[Diagnostic], needle: &str) {
    let found = diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Warning && d.summary.contains(needle));
    assert!(
        found,
        "expected a warning containing '{needle}', got {:?}",
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Schema};
    use crate::types::AttributeChange;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Keeps labels in memory, keyed by name.
    #[derive(Default)]
    struct LabelProvider {
        labels: Mutex<HashMap<String, Value>>,
    }

    #[async_trait::async_trait]
    impl ProviderService for LabelProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource(
                "githubx_label",
                Schema::v0()
                    .with_attribute("name", Attribute::required_string())
                    .with_attribute("color", Attribute::optional_string())
                    .with_attribute("id", Attribute::computed_string()),
            )
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn plan(
            &self,
            _resource_type: &str,
            prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            match prior_state {
                None => Ok(PlanResult::with_changes(
                    proposed_state,
                    vec![AttributeChange::added("name", json!("bug"))],
                    false,
                )),
                Some(prior) if prior.get("color") != proposed_state.get("color") => {
                    let mut planned = proposed_state.clone();
                    planned["id"] = prior["id"].clone();
                    Ok(PlanResult::with_changes(
                        planned,
                        vec![AttributeChange::modified(
                            "color",
                            prior["color"].clone(),
                            proposed_state["color"].clone(),
                        )],
                        false,
                    ))
                },
                Some(prior) => Ok(PlanResult::no_change(prior)),
            }
        }

        async fn create(
            &self,
            _resource_type: &str,
            planned_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            let mut state = planned_state;
            let name = state["name"].as_str().unwrap_or_default().to_string();
            state["id"] = json!(name);
            self.labels.lock().unwrap().insert(name, state.clone());
            Ok(OperationResult::new(state))
        }

        async fn read(
            &self,
            _resource_type: &str,
            current_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            let id = current_state["id"].as_str().unwrap_or_default();
            Ok(match self.labels.lock().unwrap().get(id) {
                Some(state) => OperationResult::new(state.clone()),
                None => OperationResult::removed(),
            })
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            planned_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            let id = planned_state["id"].as_str().unwrap_or_default().to_string();
            self.labels
                .lock()
                .unwrap()
                .insert(id, planned_state.clone());
            Ok(OperationResult::new(planned_state)
                .with_diagnostic(Diagnostic::warning("Color normalized")))
        }

        async fn delete(
            &self,
            _resource_type: &str,
            current_state: Value,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            let id = current_state["id"].as_str().unwrap_or_default();
            self.labels.lock().unwrap().remove(id);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_tester_schema_and_types() {
        let tester = ProviderTester::new(LabelProvider::default());
        assert!(tester.schema().resources.contains_key("githubx_label"));
        assert_eq!(tester.resource_types(), vec!["githubx_label".to_string()]);
        assert!(tester.data_source_types().is_empty());
    }

    #[tokio::test]
    async fn test_tester_lifecycle_create() {
        let tester = ProviderTester::new(LabelProvider::default());
        let state = tester
            .lifecycle_create("githubx_label", json!({"name": "bug", "color": "red"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "bug");
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let tester = ProviderTester::new(LabelProvider::default());
        let final_state = tester
            .lifecycle_crud(
                "githubx_label",
                json!({"name": "bug", "color": "red"}),
                json!({"name": "bug", "color": "blue"}),
            )
            .await
            .unwrap();
        assert_eq!(final_state["color"], "blue");
        assert!(tester.provider().labels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tester_update_keeps_warnings() {
        let tester = ProviderTester::new(LabelProvider::default());
        let created = tester
            .lifecycle_create("githubx_label", json!({"name": "bug", "color": "red"}))
            .await
            .unwrap();
        let mut planned = created.clone();
        planned["color"] = json!("blue");
        let result = tester
            .update("githubx_label", created, planned)
            .await
            .unwrap();
        assert!(!result.has_errors());
        assert_warning_contains(&result.diagnostics, "normalized");
    }

    #[tokio::test]
    async fn test_tester_read_of_missing_object() {
        let tester = ProviderTester::new(LabelProvider::default());
        let result = tester
            .read("githubx_label", json!({"id": "gone"}))
            .await
            .unwrap();
        assert!(result.state.is_none());
        assert!(matches!(
            require_state("githubx_label", result),
            Err(TestError::Removed(_))
        ));
    }

    #[tokio::test]
    async fn test_tester_plan_without_changes() {
        let tester = ProviderTester::new(LabelProvider::default());
        let state = json!({"name": "bug", "color": "red", "id": "bug"});
        let plan = tester
            .plan_update("githubx_label", state.clone(), state)
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        assert_plan_updates_in_place(&plan);
    }

    #[tokio::test]
    async fn test_default_import_is_unimplemented() {
        let tester = ProviderTester::new(LabelProvider::default());
        let err = tester.import_resource("githubx_label", "bug").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unimplemented(_)));
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid Import ID")];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "Import ID");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Invalid ID").with_attribute("id"),
            Diagnostic::error("Missing Owner").with_detail("owner is not set"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("Invalid ID"));
        assert!(display.contains("(at id)"));
        assert!(display.contains("owner is not set"));
        assert_eq!(
            TestError::Removed("githubx_label".into()).to_string(),
            "githubx_label was removed from state"
        );
    }
}
