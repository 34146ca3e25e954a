//! Checks a configuration value against a [`Schema`] before planning.
//!
//! Every problem found becomes an error [`Diagnostic`] pointing at the
//! dotted attribute path, so one pass reports all mistakes at once.
//!
//! ```
//! use hemmer_provider_githubx::schema::{Attribute, Schema};
//! use hemmer_provider_githubx::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "visibility",
//!         Attribute::optional_string().one_of(&["public", "private", "internal"]),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "hello", "visibility": "private"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "hello", "visibility": "secret"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("visibility"));
//! ```

use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema, Validator,
};

/// Validate `value` against `schema`. An empty result means it is valid.
///
/// Computed-only attributes are skipped. Validators only run on attributes
/// that hold a non-null value.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut checker = Checker::default();
    checker.block(&schema.block, value, "");
    checker.diagnostics
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
}

impl Checker {
    fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let obj = match value {
            Value::Object(map) => map,
            Value::Null => return,
            other => {
                let mut diag = Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", kind(other)));
                if !path.is_empty() {
                    diag = diag.with_attribute(path);
                }
                self.push(diag);
                return;
            },
        };

        for (name, attr) in &block.attributes {
            let attr_path = join(path, name);
            let attr_value = obj.get(name);
            self.attribute(attr, attr_value, &attr_path);
            if let Some(v) = attr_value.filter(|v| !v.is_null()) {
                self.validators(attr, v, obj, path, &attr_path);
            }
        }

        for (name, nested) in &block.blocks {
            self.nested(nested, obj.get(name), &join(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        if attr.is_computed_only() {
            return;
        }
        match value {
            None | Some(Value::Null) if attr.flags.required => self.push(
                Diagnostic::error(format!("Missing required attribute '{path}'"))
                    .with_detail("This attribute is required and must be provided")
                    .with_attribute(path),
            ),
            None | Some(Value::Null) => {},
            Some(v) => self.value(&attr.attr_type, v, path),
        }
    }

    fn value(&mut self, ty: &AttributeType, value: &Value, path: &str) {
        let ok = match ty {
            AttributeType::String => value.is_string(),
            AttributeType::Int64 => is_int64(value),
            AttributeType::Float64 => value.is_number(),
            AttributeType::Bool => value.is_boolean(),
            AttributeType::Dynamic => true,
            AttributeType::List(elem) | AttributeType::Set(elem) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.value(elem, item, &format!("{path}.{i}"));
                    }
                    true
                },
                None => false,
            },
            AttributeType::Map(elem) => match value.as_object() {
                Some(entries) => {
                    for (key, item) in entries {
                        self.value(elem, item, &format!("{path}.{key}"));
                    }
                    true
                },
                None => false,
            },
            AttributeType::Object(fields) => match value.as_object() {
                Some(obj) => {
                    self.object(fields, obj, path);
                    true
                },
                None => false,
            },
        };
        if !ok {
            self.push(
                Diagnostic::error(format!("Invalid type for attribute '{path}'"))
                    .with_detail(format!("Expected {}, got {}", type_name(ty), kind(value)))
                    .with_attribute(path),
            );
        }
    }

    // Object fields carry no presence flags, so absent fields are fine.
    fn object(
        &mut self,
        fields: &HashMap<String, AttributeType>,
        obj: &Map<String, Value>,
        path: &str,
    ) {
        for (name, ty) in fields {
            if let Some(v) = obj.get(name) {
                self.value(ty, v, &join(path, name));
            }
        }
    }

    fn validators(
        &mut self,
        attr: &Attribute,
        value: &Value,
        siblings: &Map<String, Value>,
        parent: &str,
        path: &str,
    ) {
        for validator in &attr.validators {
            match validator {
                Validator::OneOf(allowed) => {
                    let Some(s) = value.as_str() else { continue };
                    if !allowed.iter().any(|a| a == s) {
                        self.push(invalid_value(path).with_detail(format!(
                            "Value must be one of: {}, got \"{s}\"",
                            allowed.join(", ")
                        )));
                    }
                },
                Validator::Pattern(pattern) => {
                    let Some(s) = value.as_str() else { continue };
                    match Regex::new(pattern) {
                        Ok(re) if re.is_match(s) => {},
                        Ok(_) => self.push(
                            invalid_value(path)
                                .with_detail(format!("Value \"{s}\" must match {pattern}")),
                        ),
                        Err(e) => self.push(
                            Diagnostic::error(format!("Invalid pattern for attribute '{path}'"))
                                .with_detail(e.to_string())
                                .with_attribute(path),
                        ),
                    }
                },
                Validator::ConflictsWith(other) if is_set(siblings.get(other)) => self.push(
                    Diagnostic::error("Conflicting Attributes")
                        .with_detail(format!(
                            "Attribute '{path}' cannot be specified when '{}' is specified",
                            join(parent, other)
                        ))
                        .with_attribute(path),
                ),
                Validator::RequiredWith(other) if !is_set(siblings.get(other)) => self.push(
                    Diagnostic::error("Missing Required Attribute")
                        .with_detail(format!(
                            "Attribute '{}' must be specified when '{path}' is specified",
                            join(parent, other)
                        ))
                        .with_attribute(path),
                ),
                Validator::ConflictsWith(_) | Validator::RequiredWith(_) => {},
            }
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &str) {
        let value = match value {
            None | Some(Value::Null) => {
                if nested.min_items > 0 {
                    let summary = match nested.nesting_mode {
                        BlockNestingMode::Single => format!("Missing required block '{path}'"),
                        _ => format!(
                            "Block '{path}' requires at least {} item(s)",
                            nested.min_items
                        ),
                    };
                    self.push(Diagnostic::error(summary).with_attribute(path));
                }
                return;
            },
            Some(v) => v,
        };

        let items: Vec<(String, &Value)> = match (nested.nesting_mode, value) {
            (BlockNestingMode::Single, v) => {
                self.block(&nested.block, v, path);
                return;
            },
            (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(arr)) => arr
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("{path}.{i}"), v))
                .collect(),
            (BlockNestingMode::Map, Value::Object(obj)) => obj
                .iter()
                .map(|(k, v)| (format!("{path}.{k}"), v))
                .collect(),
            (mode, other) => {
                let expected = if mode == BlockNestingMode::Map { "map" } else { "list" };
                self.push(
                    Diagnostic::error(format!("Expected {expected} for block '{path}'"))
                        .with_detail(format!("Got {}", kind(other)))
                        .with_attribute(path),
                );
                return;
            },
        };

        let len = items.len() as u32;
        if len < nested.min_items {
            self.push(
                Diagnostic::error(format!(
                    "Block '{path}' requires at least {} item(s), got {len}",
                    nested.min_items
                ))
                .with_attribute(path),
            );
        }
        // max_items of 0 is unbounded
        if nested.max_items > 0 && len > nested.max_items {
            self.push(
                Diagnostic::error(format!(
                    "Block '{path}' allows at most {} item(s), got {len}",
                    nested.max_items
                ))
                .with_attribute(path),
            );
        }
        for (item_path, item) in items {
            self.block(&nested.block, item, &item_path);
        }
    }
}

fn invalid_value(path: &str) -> Diagnostic {
    Diagnostic::error(format!("Invalid value for attribute '{path}'")).with_attribute(path)
}

fn is_set(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}.{name}")
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_name(ty: &AttributeType) -> &'static str {
    match ty {
        AttributeType::String => "string",
        AttributeType::Int64 => "int64",
        AttributeType::Float64 => "float64",
        AttributeType::Bool => "bool",
        AttributeType::List(_) => "list",
        AttributeType::Set(_) => "set",
        AttributeType::Map(_) => "map",
        AttributeType::Object(_) => "object",
        AttributeType::Dynamic => "dynamic",
    }
}

/// Integers, or floats with no fractional part that fit in an `i64`.
fn is_int64(value: &Value) -> bool {
    let Value::Number(n) = value else {
        return false;
    };
    n.is_i64()
        || n
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
}
