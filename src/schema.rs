//! Declarative description of the provider block, resources and data sources.
//!
//! The same [`Schema`] value feeds `GetSchema`, config validation
//! ([`crate::validation`]) and planning ([`crate::plan`]).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Value type of an attribute. Serialized as JSON into `GetSchema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// UTF-8 string.
    String,
    /// 64-bit integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// Ordered collection.
    List(Box<AttributeType>),
    /// Unordered collection of unique values.
    Set(Box<AttributeType>),
    /// String-keyed collection.
    Map(Box<AttributeType>),
    /// Fixed set of named fields.
    Object(HashMap<String, AttributeType>),
    /// Anything.
    Dynamic,
}

impl AttributeType {
    /// `list(element)`
    pub fn list(element: AttributeType) -> Self {
        Self::List(Box::new(element))
    }

    /// `set(element)`
    pub fn set(element: AttributeType) -> Self {
        Self::Set(Box::new(element))
    }

    /// `map(element)`
    pub fn map(element: AttributeType) -> Self {
        Self::Map(Box::new(element))
    }

    /// `object({ field: type, .. })`
    pub fn object(fields: HashMap<String, AttributeType>) -> Self {
        Self::Object(fields)
    }
}

/// A declarative check attached to an attribute.
///
/// Validators run during `Validate*Config` and only apply when the attribute
/// holds a known, non-null value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// The string value must be one of the listed values.
    OneOf(Vec<String>),
    /// The string value must match the regular expression.
    Pattern(String),
    /// The attribute must not be set together with the named sibling.
    ConflictsWith(String),
    /// When set, the named sibling must be set too.
    RequiredWith(String),
}

impl Validator {
    /// Build a [`Validator::OneOf`] from string slices.
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Who supplies an attribute's value.
///
/// `optional` and `computed` together mean the practitioner may set it and
/// the provider fills it in otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeFlags {
    /// Must be configured.
    pub required: bool,
    /// May be configured.
    pub optional: bool,
    /// Set by the provider.
    pub computed: bool,
    /// Redacted in plans and logs.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// `required`
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// `optional`
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    /// `computed`
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    /// `optional` + `computed`
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::default()
        }
    }

    /// Add `sensitive`.
    pub fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }
}

/// A single attribute: its type, flags and plan-time behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Value type.
    pub attr_type: AttributeType,
    /// Presence flags.
    pub flags: AttributeFlags,
    /// Shown in generated docs.
    pub description: Option<String>,
    /// A change plans a replacement instead of an update.
    pub force_new: bool,
    /// Planned when the configuration leaves the attribute null.
    pub default: Option<Value>,
    /// Checks applied to configured values.
    pub validators: Vec<Validator>,
}

impl Attribute {
    /// Attribute of `attr_type` with `flags` and nothing else.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            validators: Vec::new(),
        }
    }

    /// Required string.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Optional string.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Computed string.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Optional string the provider fills in when unset.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// Required integer.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Optional integer.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Computed integer.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Required bool.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Optional bool.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Computed bool.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::computed())
    }

    /// Optional bool the provider fills in when unset.
    pub fn optional_computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional_computed())
    }

    /// Optional set of strings, e.g. topics.
    pub fn optional_string_set() -> Self {
        Self::new(
            AttributeType::set(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Computed list of strings.
    pub fn computed_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::computed(),
        )
    }

    /// Computed object with the given field types.
    pub fn computed_object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, AttributeType)>,
        K: Into<String>,
    {
        let fields = fields.into_iter().map(|(k, t)| (k.into(), t)).collect();
        Self::new(AttributeType::object(fields), AttributeFlags::computed())
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the object when this attribute changes.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Plan `default` when the attribute is null.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Redact the value.
    pub fn sensitive(mut self) -> Self {
        self.flags = self.flags.sensitive();
        self
    }

    /// Attach a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Restrict the value to one of `values`.
    pub fn one_of(self, values: &[&str]) -> Self {
        self.with_validator(Validator::one_of(values))
    }

    /// Require the value to match `pattern`.
    pub fn with_pattern(self, pattern: impl Into<String>) -> Self {
        self.with_validator(Validator::Pattern(pattern.into()))
    }

    /// Forbid setting this attribute together with `other`.
    pub fn conflicts_with(self, other: impl Into<String>) -> Self {
        self.with_validator(Validator::ConflictsWith(other.into()))
    }

    /// Require `other` whenever this attribute is set.
    pub fn required_with(self, other: impl Into<String>) -> Self {
        self.with_validator(Validator::RequiredWith(other.into()))
    }

    /// Whether the attribute is set only by the provider.
    pub fn is_computed_only(&self) -> bool {
        self.flags.computed && !self.flags.optional && !self.flags.required
    }
}

/// How many instances of a nested block may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockNestingMode {
    /// Zero or one, as an object.
    #[default]
    Single,
    /// Ordered array.
    List,
    /// Unordered array.
    Set,
    /// Object keyed by name.
    Map,
}

/// Attributes and nested blocks at one level of a schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// Attributes by name.
    pub attributes: HashMap<String, Attribute>,
    /// Nested blocks by name, e.g. `pages`.
    pub blocks: HashMap<String, NestedBlock>,
    /// Shown in generated docs.
    pub description: Option<String>,
}

impl Block {
    /// Empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A block embedded in another, with its cardinality.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedBlock {
    /// Contents.
    pub block: Block,
    /// Cardinality.
    pub nesting_mode: BlockNestingMode,
    /// Fewest instances allowed.
    pub min_items: u32,
    /// Most instances allowed; `0` is unbounded.
    pub max_items: u32,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: BlockNestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
        }
    }

    /// At most one instance.
    pub fn single(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Single, 1)
    }

    /// Any number of instances, in order.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::List, 0)
    }

    /// Require at least `min` instances.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Allow at most `max` instances.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// Versioned root block of a resource, data source or provider config.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Bumped when stored state needs an upgrade.
    pub version: u64,
    /// Top-level attributes and blocks.
    pub block: Block,
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

impl Schema {
    /// Empty schema at `version`.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Empty schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add a top-level attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block = self.block.with_attribute(name, attr);
        self
    }

    /// Add a top-level nested block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block = self.block.with_block(name, block);
        self
    }

    /// Set the description shown in generated documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block.description = Some(description.into());
        self
    }

    /// Look up a top-level attribute.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }
}

/// Everything `GetSchema` returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderSchema {
    /// The provider block.
    pub provider: Schema,
    /// Resource schemas by type name.
    pub resources: HashMap<String, Schema>,
    /// Data source schemas by type name.
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    /// Empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider block schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Register a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Register a data source schema.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// The operation failed.
    Error,
    /// The operation succeeded with a caveat.
    Warning,
}

/// A user-facing message, optionally tied to an attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// Title, e.g. "Branch Not Found".
    pub summary: String,
    /// Longer explanation.
    pub detail: Option<String>,
    /// Dotted path of the offending attribute.
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Error titled `summary`.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary)
    }

    /// Warning titled `summary`.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary)
    }

    /// Set the detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Point at an attribute path.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flags() {
        let required = AttributeFlags::required();
        assert!(required.required && !required.optional && !required.computed);

        let optional_computed = AttributeFlags::optional_computed();
        assert!(!optional_computed.required);
        assert!(optional_computed.optional && optional_computed.computed);

        assert!(AttributeFlags::optional().sensitive().sensitive);
        assert!(Attribute::optional_string().sensitive().flags.sensitive);
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::optional_computed_string()
            .with_default(json!("main"))
            .with_force_new()
            .with_description("The branch to start from.");
        assert_eq!(attr.attr_type, AttributeType::String);
        assert_eq!(attr.default, Some(json!("main")));
        assert!(attr.force_new);
        assert!(!attr.is_computed_only());
        assert!(Attribute::computed_string().is_computed_only());
    }

    #[test]
    fn test_validator_builders() {
        let attr = Attribute::optional_string()
            .one_of(&["merge", "squash", "rebase"])
            .conflicts_with("full_name");
        assert_eq!(
            attr.validators,
            vec![
                Validator::OneOf(vec!["merge".into(), "squash".into(), "rebase".into()]),
                Validator::ConflictsWith("full_name".into()),
            ]
        );

        let attr = Attribute::optional_string()
            .with_pattern("^[a-z]+$")
            .required_with("commit_email");
        assert_eq!(attr.validators.len(), 2);
    }

    #[test]
    fn test_collection_helpers() {
        let topics = Attribute::optional_string_set();
        assert_eq!(topics.attr_type, AttributeType::set(AttributeType::String));

        let template = Attribute::computed_object([
            ("owner", AttributeType::String),
            ("repository", AttributeType::String),
        ]);
        assert!(template.is_computed_only());
        assert!(matches!(template.attr_type, AttributeType::Object(ref f) if f.len() == 2));
    }

    #[test]
    fn test_attribute_type_json() {
        let encoded = serde_json::to_value(AttributeType::list(AttributeType::String)).unwrap();
        assert_eq!(encoded, json!({"list": "string"}));
        assert_eq!(serde_json::to_value(AttributeType::Int64).unwrap(), json!("int64"));
    }

    #[test]
    fn test_schema_and_blocks() {
        let schema = Schema::v0()
            .with_description("A repository")
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "pages",
                NestedBlock::single(Block::new().with_attribute("cname", Attribute::optional_string())),
            );
        assert_eq!(schema.version, 0);
        assert_eq!(schema.block.description.as_deref(), Some("A repository"));
        assert!(schema.attribute("name").is_some());
        assert_eq!(schema.block.blocks["pages"].max_items, 1);

        let list = NestedBlock::list(Block::new()).with_min_items(1).with_max_items(5);
        assert_eq!(list.nesting_mode, BlockNestingMode::List);
        assert_eq!((list.min_items, list.max_items), (1, 5));
    }

    #[test]
    fn test_provider_schema() {
        let schema = ProviderSchema::new()
            .with_provider_config(
                Schema::v0().with_attribute("token", Attribute::optional_string().sensitive()),
            )
            .with_resource("githubx_repository", Schema::v0())
            .with_data_source("githubx_user", Schema::v0());
        assert!(schema.provider.attribute("token").is_some());
        assert!(schema.resources.contains_key("githubx_repository"));
        assert!(schema.data_sources.contains_key("githubx_user"));
    }

    #[test]
    fn test_diagnostic() {
        let diag = Diagnostic::error("Invalid Full Name")
            .with_detail("full_name must be owner/repo")
            .with_attribute("full_name");
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.detail.as_deref(), Some("full_name must be owner/repo"));
        assert_eq!(diag.attribute.as_deref(), Some("full_name"));
        assert_eq!(Diagnostic::warning("x").severity, DiagnosticSeverity::Warning);
    }
}
