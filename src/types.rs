//! Values passed between the gRPC layer and [`ProviderService`](crate::ProviderService)
//! implementations. State travels as `serde_json::Value`; the server encodes
//! it to bytes at the protocol edge.

use serde_json::Value;

use crate::generated;
use crate::schema::{Diagnostic, DiagnosticSeverity};

/// Handshake protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// One attribute difference in a plan. `before` is `None` for additions and
/// `after` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// Dotted attribute path, e.g. `pages.source.branch`.
    pub path: String,
    /// Prior value.
    pub before: Option<Value>,
    /// Planned value.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// An attribute that is new in the plan.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// An attribute the plan drops.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// An attribute whose value changes.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

fn encode(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<AttributeChange> for generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode(change.before),
            after: encode(change.after),
        }
    }
}

/// Planned state plus the changes that lead to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// State the apply step will receive.
    pub planned_state: Value,
    /// Attribute-level differences against prior state.
    pub changes: Vec<AttributeChange>,
    /// A force-new attribute changed.
    pub requires_replace: bool,
    /// Warnings or errors raised while planning.
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanResult {
    /// Nothing to do.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan with the given changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
            diagnostics: Vec::new(),
        }
    }

    /// Attach diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }
}

/// Outcome of a create, read, update or data source read.
///
/// A `None` state tells the orchestrator the object no longer exists.
/// Warnings ride along with a successful state.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// The new state, or `None` when the object is gone.
    pub state: Option<Value>,
    /// Non-fatal diagnostics raised during the operation.
    pub diagnostics: Vec<Diagnostic>,
}

impl OperationResult {
    /// A state with no diagnostics.
    pub fn new(state: Value) -> Self {
        Self {
            state: Some(state),
            diagnostics: Vec::new(),
        }
    }

    /// The object was not found remotely and should leave state.
    pub fn removed() -> Self {
        Self {
            state: None,
            diagnostics: Vec::new(),
        }
    }

    /// Attach diagnostics.
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }

    /// Attach a single diagnostic.
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    /// Whether any attached diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }
}

/// State produced by `ImportResourceState`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedResource {
    /// Type the state belongs to.
    pub resource_type: String,
    /// State as returned by a read.
    pub state: Value,
}

impl ImportedResource {
    /// Pair a type name with its imported state.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Answer to `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// Data source type names, sorted.
    pub data_sources: Vec<String>,
    /// Optional protocol features.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerCapabilities {
    /// `Plan` is called with a null proposed state before delete.
    pub plan_destroy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_constructors() {
        let added = AttributeChange::added("topics", json!(["rust"]));
        assert_eq!((added.before, added.after), (None, Some(json!(["rust"]))));

        let removed = AttributeChange::removed("homepage_url", json!("https://example.com"));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("visibility", json!("public"), json!("private"));
        assert_eq!(modified.before, Some(json!("public")));
        assert_eq!(modified.after, Some(json!("private")));
    }

    #[test]
    fn test_change_to_proto_encodes_json() {
        let proto: generated::AttributeChange =
            AttributeChange::modified("has_wiki", json!(true), json!(false)).into();
        assert_eq!(proto.path, "has_wiki");
        assert_eq!(proto.before, b"true");
        assert_eq!(proto.after, b"false");

        let proto: generated::AttributeChange = AttributeChange::added("name", json!("hello")).into();
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"\"hello\"");
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "hello"}));
        assert!(no_change.changes.is_empty());
        assert!(!no_change.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"id": null, "name": "renamed"}),
            vec![AttributeChange::modified("name", json!("hello"), json!("renamed"))],
            true,
        )
        .with_diagnostics(vec![Diagnostic::warning("careful")]);
        assert!(replace.requires_replace);
        assert_eq!(replace.diagnostics.len(), 1);
    }

    #[test]
    fn test_operation_result() {
        let result = OperationResult::new(json!({"id": "hello"}))
            .with_diagnostic(Diagnostic::warning("Error fetching Pages info"));
        assert_eq!(result.state.as_ref().unwrap()["id"], "hello");
        assert!(!result.has_errors());

        let failed = OperationResult::new(json!({})).with_diagnostic(Diagnostic::error("boom"));
        assert!(failed.has_errors());

        let removed = OperationResult::removed();
        assert!(removed.state.is_none());
        assert!(removed.diagnostics.is_empty());
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("githubx_repository", json!({"id": "hello"}));
        assert_eq!(imported.resource_type, "githubx_repository");
        assert_eq!(imported.state["id"], "hello");
    }
}
