//! Schema-driven planning.
//!
//! [`plan`] turns the orchestrator's proposed state into a planned state and
//! a list of [`AttributeChange`]s:
//!
//! - schema defaults fill null attributes;
//! - null computed attributes keep their prior value;
//! - a changed `force_new` attribute marks the plan as a replacement, and
//!   computed-only values are then cleared so the provider recomputes them.

use serde_json::{Map, Value};

use crate::schema::{AttributeType, Block, BlockNestingMode, Schema};
use crate::types::{AttributeChange, PlanResult};

static NULL: Value = Value::Null;

/// Plan a resource against its schema.
///
/// `prior` is `None` when the resource is being created. A null `proposed`
/// state plans a delete.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        let changes = prior
            .and_then(Value::as_object)
            .map(|obj| {
                let mut changes: Vec<AttributeChange> = obj
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
                    .collect();
                changes.sort_by(|a, b| a.path.cmp(&b.path));
                changes
            })
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let empty = Map::new();
    let prior_obj = prior.and_then(Value::as_object);
    let mut planned = fill_block(&schema.block, proposed, prior_obj.unwrap_or(&empty));

    let mut changes = Vec::new();
    let mut requires_replace = false;
    match prior_obj {
        None => collect_added(&schema.block, &planned, "", &mut changes),
        Some(prior_obj) => diff_block(
            &schema.block,
            prior_obj,
            &planned,
            "",
            &mut changes,
            &mut requires_replace,
        ),
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    if requires_replace {
        if let Value::Object(obj) = &mut planned {
            for (name, attr) in &schema.block.attributes {
                if attr.is_computed_only() {
                    obj.insert(name.clone(), Value::Null);
                }
            }
        }
    }

    PlanResult::with_changes(planned, changes, requires_replace)
}

fn fill_block(block: &Block, proposed: &Value, prior: &Map<String, Value>) -> Value {
    let mut obj = proposed.as_object().cloned().unwrap_or_default();

    for (name, attr) in &block.attributes {
        let current = obj.get(name).filter(|v| !v.is_null());
        if current.is_some() {
            continue;
        }
        if let Some(default) = &attr.default {
            obj.insert(name.clone(), default.clone());
        } else if attr.flags.computed {
            match prior.get(name).filter(|v| !v.is_null()) {
                Some(previous) => obj.insert(name.clone(), previous.clone()),
                None => obj.insert(name.clone(), Value::Null),
            };
        }
    }

    let empty = Map::new();
    for (name, nested) in &block.blocks {
        if nested.nesting_mode != BlockNestingMode::Single {
            continue;
        }
        let Some(value) = obj.get(name).filter(|v| v.is_object()).cloned() else {
            continue;
        };
        let nested_prior = prior
            .get(name)
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        obj.insert(name.clone(), fill_block(&nested.block, &value, nested_prior));
    }

    Value::Object(obj)
}

fn collect_added(block: &Block, planned: &Value, path: &str, changes: &mut Vec<AttributeChange>) {
    let Some(obj) = planned.as_object() else {
        return;
    };
    for (name, attr) in &block.attributes {
        if attr.is_computed_only() {
            continue;
        }
        if let Some(value) = obj.get(name).filter(|v| !v.is_null()) {
            changes.push(AttributeChange::added(join_path(path, name), value.clone()));
        }
    }
    for name in block.blocks.keys() {
        if let Some(value) = obj.get(name).filter(|v| !v.is_null()) {
            changes.push(AttributeChange::added(join_path(path, name), value.clone()));
        }
    }
}

fn diff_block(
    block: &Block,
    prior: &Map<String, Value>,
    planned: &Value,
    path: &str,
    changes: &mut Vec<AttributeChange>,
    requires_replace: &mut bool,
) {
    let empty = Map::new();
    let planned = planned.as_object().unwrap_or(&empty);

    for (name, attr) in &block.attributes {
        if attr.is_computed_only() {
            continue;
        }
        let before = prior.get(name).unwrap_or(&NULL);
        let after = planned.get(name).unwrap_or(&NULL);
        if values_equal(&attr.attr_type, before, after) {
            continue;
        }
        changes.push(change(join_path(path, name), before, after));
        if attr.force_new {
            *requires_replace = true;
        }
    }

    for (name, nested) in &block.blocks {
        let before = prior.get(name).unwrap_or(&NULL);
        let after = planned.get(name).unwrap_or(&NULL);
        let block_path = join_path(path, name);
        match (nested.nesting_mode, before, after) {
            (BlockNestingMode::Single, Value::Object(before_obj), Value::Object(_)) => diff_block(
                &nested.block,
                before_obj,
                after,
                &block_path,
                changes,
                requires_replace,
            ),
            _ => {
                if before != after {
                    changes.push(change(block_path, before, after));
                    if block_forces_new(&nested.block) {
                        *requires_replace = true;
                    }
                }
            },
        }
    }
}

fn block_forces_new(block: &Block) -> bool {
    block.attributes.values().any(|a| a.force_new)
}

fn change(path: String, before: &Value, after: &Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(path, after.clone()),
        (false, true) => AttributeChange::removed(path, before.clone()),
        (false, false) => AttributeChange::modified(path, before.clone(), after.clone()),
    }
}

/// Compare two values of the given type. Sets ignore element order and an
/// empty set equals null.
fn values_equal(attr_type: &AttributeType, a: &Value, b: &Value) -> bool {
    match attr_type {
        AttributeType::Set(_) => sorted_elements(a) == sorted_elements(b),
        _ => a == b,
    }
}

fn sorted_elements(value: &Value) -> Vec<String> {
    let mut elements: Vec<String> = value
        .as_array()
        .map(|arr| arr.iter().map(Value::to_string).collect())
        .unwrap_or_default();
    elements.sort();
    elements.dedup();
    elements
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use crate::testing::{
        assert_plan_changes_attribute, assert_plan_creates, assert_plan_does_not_change_attribute,
        assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place,
    };
    use serde_json::json;

    fn branch_schema() -> Schema {
        Schema::v0()
            .with_attribute("repository", Attribute::required_string().with_force_new())
            .with_attribute("branch", Attribute::required_string())
            .with_attribute(
                "source_branch",
                Attribute::optional_computed_string()
                    .with_default(json!("main"))
                    .with_force_new(),
            )
            .with_attribute("etag", Attribute::optional_computed_string())
            .with_attribute("sha", Attribute::computed_string())
            .with_attribute("id", Attribute::computed_string())
    }

    #[test]
    fn test_create_fills_defaults_and_adds_everything() {
        let plan = plan(
            &branch_schema(),
            None,
            &json!({"repository": "hello", "branch": "dev"}),
        );

        assert_plan_creates(&plan);
        assert_eq!(plan.planned_state["source_branch"], "main");
        assert!(plan.planned_state["sha"].is_null());
        assert_plan_changes_attribute(&plan, "repository");
        assert_plan_changes_attribute(&plan, "source_branch");
        assert_plan_does_not_change_attribute(&plan, "sha");
    }

    #[test]
    fn test_update_carries_computed_values() {
        let prior = json!({
            "repository": "hello",
            "branch": "dev",
            "source_branch": "main",
            "etag": "W/\"1\"",
            "sha": "c0ffee",
            "id": "hello:dev"
        });
        let plan = plan(
            &branch_schema(),
            Some(&prior),
            &json!({"repository": "hello", "branch": "dev"}),
        );

        assert_plan_no_changes(&plan);
        assert_eq!(plan.planned_state["sha"], "c0ffee");
        assert_eq!(plan.planned_state["etag"], "W/\"1\"");
        assert_eq!(plan.planned_state["id"], "hello:dev");
    }

    #[test]
    fn test_update_in_place() {
        let prior = json!({
            "repository": "hello",
            "branch": "dev",
            "source_branch": "main",
            "sha": "c0ffee",
            "id": "hello:dev"
        });
        let plan = plan(
            &branch_schema(),
            Some(&prior),
            &json!({"repository": "hello", "branch": "develop"}),
        );

        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "branch");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].before, Some(json!("dev")));
        assert_eq!(plan.changes[0].after, Some(json!("develop")));
    }

    #[test]
    fn test_force_new_requires_replace_and_clears_computed() {
        let prior = json!({
            "repository": "hello",
            "branch": "dev",
            "source_branch": "main",
            "sha": "c0ffee",
            "id": "hello:dev"
        });
        let plan = plan(
            &branch_schema(),
            Some(&prior),
            &json!({"repository": "world", "branch": "dev"}),
        );

        assert_plan_replaces(&plan);
        assert!(plan.planned_state["id"].is_null());
        assert!(plan.planned_state["sha"].is_null());
    }

    #[test]
    fn test_delete_removes_everything() {
        let prior = json!({"repository": "hello", "branch": "dev", "etag": null});
        let plan = plan(&branch_schema(), Some(&prior), &Value::Null);

        assert!(plan.planned_state.is_null());
        assert_eq!(plan.changes.len(), 2);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_sets_ignore_order() {
        let schema = Schema::v0().with_attribute("topics", Attribute::optional_string_set());
        let prior = json!({"topics": ["rust", "cli"]});

        let same = plan(&schema, Some(&prior), &json!({"topics": ["cli", "rust"]}));
        assert_plan_no_changes(&same);

        let changed = plan(&schema, Some(&prior), &json!({"topics": ["cli"]}));
        assert_plan_changes_attribute(&changed, "topics");

        let empty_vs_null = plan(&schema, Some(&json!({"topics": null})), &json!({"topics": []}));
        assert_plan_no_changes(&empty_vs_null);
    }

    #[test]
    fn test_single_block_diffs_by_path() {
        let schema = Schema::v0().with_block(
            "pages",
            NestedBlock::single(
                Block::new()
                    .with_attribute("cname", Attribute::optional_string())
                    .with_attribute("url", Attribute::computed_string())
                    .with_block(
                        "source",
                        NestedBlock::single(
                            Block::new()
                                .with_attribute("branch", Attribute::required_string())
                                .with_attribute(
                                    "path",
                                    Attribute::optional_string().with_default(json!("/")),
                                ),
                        ),
                    ),
            ),
        );
        let prior = json!({
            "pages": {
                "cname": null,
                "url": "https://api.github.com/repos/o/r/pages",
                "source": {"branch": "main", "path": "/"}
            }
        });
        let plan = plan(
            &schema,
            Some(&prior),
            &json!({"pages": {"source": {"branch": "gh-pages"}}}),
        );

        assert_plan_changes_attribute(&plan, "pages.source.branch");
        assert_plan_does_not_change_attribute(&plan, "pages.source.path");
        assert_eq!(plan.planned_state["pages"]["source"]["path"], "/");
        assert_eq!(
            plan.planned_state["pages"]["url"],
            "https://api.github.com/repos/o/r/pages"
        );
    }

    #[test]
    fn test_block_removed() {
        let schema = Schema::v0().with_block(
            "pages",
            NestedBlock::single(Block::new().with_attribute("cname", Attribute::optional_string())),
        );
        let plan = plan(
            &schema,
            Some(&json!({"pages": {"cname": "example.com"}})),
            &json!({"pages": null}),
        );
        assert_plan_changes_attribute(&plan, "pages");
        assert!(plan.changes[0].after.is_none());
    }
}
