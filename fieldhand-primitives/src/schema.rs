//! Parameter schema model and schema dialect translation.
//!
//! Tools describe their parameters with [`ParameterSchema`], a small ordered
//! model that renders to a JSON-schema-like value. Before the schema is
//! offered to a model provider it is passed through [`SchemaDialect`], which
//! rewrites it into the exact shape that provider's function-calling protocol
//! accepts. Translation is idempotent so schemas can be re-translated on
//! every turn without drift.

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Semantic type of a single tool parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParameterKind {
    /// UTF-8 text.
    String,
    /// Whole number.
    Integer,
    /// Floating-point number.
    Number,
    /// True/false flag.
    Boolean,
    /// Nested key/value mapping.
    Object,
    /// Ordered sequence.
    Array,
}

impl ParameterKind {
    /// Returns the lowercase JSON-schema type tag for this kind.
    #[must_use]
    pub const fn type_tag(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Description of one tool parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    kind: ParameterKind,
    description: Option<String>,
    default: Option<Value>,
    required: bool,
}

impl ParameterSpec {
    /// Returns the semantic type of the parameter.
    #[must_use]
    pub const fn kind(&self) -> ParameterKind {
        self.kind
    }

    /// Returns the parameter description if one was supplied.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the default value hint, if any.
    #[must_use]
    pub const fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns `true` when the caller must supply this parameter.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    fn to_json(&self) -> Value {
        let mut node = Map::new();
        if self.required {
            node.insert("type".into(), Value::from(self.kind.type_tag()));
        } else {
            // Optional parameters render as a nullable union; dialect
            // translation collapses it back to the non-null branch.
            node.insert(
                "anyOf".into(),
                json!([{ "type": self.kind.type_tag() }, { "type": "null" }]),
            );
        }
        if let Some(description) = &self.description {
            node.insert("description".into(), Value::from(description.clone()));
        }
        if let Some(default) = &self.default {
            node.insert("default".into(), default.clone());
        }
        Value::Object(node)
    }
}

/// Ordered parameter schema derived from a handler's signature and doc text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSchema {
    params: Vec<(String, ParameterSpec)>,
}

impl ParameterSchema {
    /// Starts building a parameter schema.
    #[must_use]
    pub fn builder() -> ParameterSchemaBuilder {
        ParameterSchemaBuilder {
            params: Vec::new(),
        }
    }

    /// Returns an empty schema for tools that take no parameters.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the parameters in declaration order.
    #[must_use]
    pub fn params(&self) -> &[(String, ParameterSpec)] {
        &self.params
    }

    /// Fills in parameter descriptions from a parsed documentation block.
    ///
    /// Only parameters without an explicit description are updated, so doc
    /// text never overrides what the builder set directly.
    pub fn apply_doc(&mut self, doc: &DocText) {
        for (name, spec) in &mut self.params {
            if spec.description.is_none() {
                if let Some(text) = doc.arg(name) {
                    spec.description = Some(text.to_owned());
                }
            }
        }
    }

    /// Renders the schema as a JSON-schema-like object value.
    ///
    /// The rendered form is the runtime's own dialect (lowercase type tags,
    /// nullable unions for optional fields, `additionalProperties: false`);
    /// pass it through [`SchemaDialect::translate`] before handing it to a
    /// provider.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.params {
            properties.insert(name.clone(), spec.to_json());
            if spec.required {
                required.push(Value::from(name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": Value::Array(required),
            "additionalProperties": false,
        })
    }
}

/// Builder for [`ParameterSchema`].
#[derive(Debug)]
pub struct ParameterSchemaBuilder {
    params: Vec<(String, ParameterSpec)>,
}

impl ParameterSchemaBuilder {
    /// Declares a required parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the name is empty or already
    /// declared.
    pub fn required(self, name: impl Into<String>, kind: ParameterKind) -> Result<Self> {
        self.push(name.into(), kind, true)
    }

    /// Declares an optional parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the name is empty or already
    /// declared.
    pub fn optional(self, name: impl Into<String>, kind: ParameterKind) -> Result<Self> {
        self.push(name.into(), kind, false)
    }

    /// Attaches a description to the most recently declared parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if no parameter has been declared.
    pub fn describe(mut self, text: impl Into<String>) -> Result<Self> {
        let Some((_, spec)) = self.params.last_mut() else {
            return Err(Error::InvalidParameter {
                reason: "describe() requires a preceding parameter declaration".into(),
            });
        };
        spec.description = Some(text.into());
        Ok(self)
    }

    /// Attaches a default-value hint to the most recently declared parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if no parameter has been declared
    /// or the parameter is required.
    pub fn default_value(mut self, value: Value) -> Result<Self> {
        let Some((name, spec)) = self.params.last_mut() else {
            return Err(Error::InvalidParameter {
                reason: "default_value() requires a preceding parameter declaration".into(),
            });
        };
        if spec.required {
            return Err(Error::InvalidParameter {
                reason: format!("required parameter `{name}` cannot carry a default"),
            });
        }
        spec.default = Some(value);
        Ok(self)
    }

    /// Finalises the schema.
    #[must_use]
    pub fn build(self) -> ParameterSchema {
        ParameterSchema {
            params: self.params,
        }
    }

    fn push(mut self, name: String, kind: ParameterKind, required: bool) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::InvalidParameter {
                reason: "parameter name cannot be empty".into(),
            });
        }
        if self.params.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::InvalidParameter {
                reason: format!("parameter `{name}` declared twice"),
            });
        }
        self.params.push((
            name,
            ParameterSpec {
                kind,
                description: None,
                default: None,
                required,
            },
        ));
        Ok(self)
    }
}

/// Parsed tool documentation: a one-line summary plus per-argument
/// descriptions from a conventional `Args:` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocText {
    summary: String,
    args: Vec<(String, String)>,
}

impl DocText {
    /// Parses a documentation block.
    ///
    /// The first non-empty line becomes the summary. Lines following an
    /// `Args:` (or `Parameters:`) header of the form `name: description` are
    /// collected until the next section header.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().map(str::trim);
        let summary = lines
            .by_ref()
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_owned();

        let mut args = Vec::new();
        let mut in_args = false;
        for line in lines {
            let lowered = line.to_ascii_lowercase();
            if lowered == "args:" || lowered == "parameters:" {
                in_args = true;
                continue;
            }
            // Any other bare `Section:` header ends the Args block.
            if in_args && line.ends_with(':') && !line[..line.len() - 1].contains(':') {
                break;
            }
            if in_args {
                if let Some((name, description)) = line.split_once(':') {
                    args.push((name.trim().to_owned(), description.trim().to_owned()));
                }
            }
        }

        Self { summary, args }
    }

    /// Returns the one-line summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Returns the description recorded for the named argument, if any.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, text)| text.as_str())
    }
}

/// Target schema dialects understood by provider function-calling protocols.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaDialect {
    /// Google Gemini function declarations: uppercase type tags, no
    /// `title`/`default`/`additionalProperties` metadata, no nullable
    /// unions.
    Gemini,
}

impl SchemaDialect {
    /// Translates a schema value into this dialect.
    ///
    /// The translation strips metadata keys the dialect rejects, collapses
    /// `anyOf` nullable unions into their non-null branch (merging sibling
    /// keys without overwriting), and normalises primitive type tags.
    /// Applying it twice yields the same value as applying it once. A
    /// nullable union with no non-null branch is left untouched.
    #[must_use]
    pub fn translate(self, schema: &Value) -> Value {
        match self {
            Self::Gemini => {
                let mut translated = schema.clone();
                sanitize_for_gemini(&mut translated);
                translated
            }
        }
    }
}

const STRIPPED_KEYS: [&str; 3] = ["title", "default", "additionalProperties"];

fn sanitize_for_gemini(node: &mut Value) {
    match node {
        Value::Object(map) => {
            for key in STRIPPED_KEYS {
                map.shift_remove(key);
            }

            for value in map.values_mut() {
                sanitize_for_gemini(value);
            }

            collapse_nullable_union(map);

            if let Some(Value::String(tag)) = map.get_mut("type") {
                *tag = tag.to_ascii_uppercase();
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_for_gemini(item);
            }
        }
        _ => {}
    }
}

fn collapse_nullable_union(map: &mut Map<String, Value>) {
    let Some(Value::Array(branches)) = map.get("anyOf") else {
        return;
    };

    let non_null = branches
        .iter()
        .find(|branch| !is_null_branch(branch))
        .cloned();

    // No non-null branch: leave the union untouched rather than failing.
    let Some(Value::Object(branch)) = non_null else {
        return;
    };

    for (key, value) in branch {
        map.entry(key).or_insert(value);
    }
    map.shift_remove("anyOf");
}

fn is_null_branch(branch: &Value) -> bool {
    branch
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|tag| tag.eq_ignore_ascii_case("null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> ParameterSchema {
        ParameterSchema::builder()
            .required("query", ParameterKind::String)
            .unwrap()
            .describe("The complete query string to execute.")
            .unwrap()
            .optional("limit", ParameterKind::Integer)
            .unwrap()
            .default_value(Value::from(20))
            .unwrap()
            .build()
    }

    #[test]
    fn renders_ordered_properties() {
        let rendered = sample_schema().to_json();
        let properties = rendered["properties"].as_object().unwrap();
        let names: Vec<&String> = properties.keys().collect();
        assert_eq!(names, ["query", "limit"]);
        assert_eq!(rendered["required"], json!(["query"]));
        assert_eq!(rendered["additionalProperties"], Value::Bool(false));
    }

    #[test]
    fn optional_parameters_render_nullable_unions() {
        let rendered = sample_schema().to_json();
        let limit = &rendered["properties"]["limit"];
        assert_eq!(
            limit["anyOf"],
            json!([{ "type": "integer" }, { "type": "null" }])
        );
        assert_eq!(limit["default"], Value::from(20));
    }

    #[test]
    fn gemini_translation_strips_and_uppercases() {
        let translated = SchemaDialect::Gemini.translate(&sample_schema().to_json());

        assert_eq!(translated["type"], "OBJECT");
        assert!(translated.get("additionalProperties").is_none());

        let limit = &translated["properties"]["limit"];
        assert_eq!(limit["type"], "INTEGER");
        assert!(limit.get("anyOf").is_none());
        assert!(limit.get("default").is_none());
    }

    #[test]
    fn gemini_translation_is_idempotent() {
        let once = SchemaDialect::Gemini.translate(&sample_schema().to_json());
        let twice = SchemaDialect::Gemini.translate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn union_without_non_null_branch_is_untouched() {
        let schema = json!({
            "type": "object",
            "properties": {
                "ghost": { "anyOf": [{ "type": "null" }] }
            }
        });
        let translated = SchemaDialect::Gemini.translate(&schema);
        assert_eq!(
            translated["properties"]["ghost"]["anyOf"],
            json!([{ "type": "NULL" }])
        );
    }

    #[test]
    fn translation_drops_titles_from_foreign_schemas() {
        let schema = json!({
            "title": "ExternalSchema",
            "type": "object",
            "properties": {
                "name": { "title": "Name", "type": "string", "default": "x" }
            }
        });
        let translated = SchemaDialect::Gemini.translate(&schema);
        assert!(translated.get("title").is_none());
        assert_eq!(
            translated["properties"]["name"],
            json!({ "type": "STRING" })
        );
    }

    #[test]
    fn union_merge_does_not_overwrite_siblings() {
        let schema = json!({
            "description": "kept",
            "anyOf": [
                { "type": "string", "description": "ignored" },
                { "type": "null" }
            ]
        });
        let translated = SchemaDialect::Gemini.translate(&schema);
        assert_eq!(translated["description"], "kept");
        assert_eq!(translated["type"], "STRING");
        assert!(translated.get("anyOf").is_none());
    }

    #[test]
    fn doc_text_parses_summary_and_args() {
        let doc = DocText::parse(
            "
            Executes a CRM query and returns matching records.

            Args:
                query: The complete query string to execute.
                limit: Maximum number of records to return.

            Returns:
                A JSON string of matching records.
            ",
        );

        assert_eq!(
            doc.summary(),
            "Executes a CRM query and returns matching records."
        );
        assert_eq!(doc.arg("query"), Some("The complete query string to execute."));
        assert_eq!(doc.arg("limit"), Some("Maximum number of records to return."));
        assert_eq!(doc.arg("Returns"), None);
    }

    #[test]
    fn apply_doc_fills_missing_descriptions_only() {
        let doc = DocText::parse("Summary.\nArgs:\n  query: from doc\n  limit: from doc\n");
        let mut schema = sample_schema();
        schema.apply_doc(&doc);

        let query = &schema.params()[0].1;
        let limit = &schema.params()[1].1;
        assert_eq!(query.description(), Some("The complete query string to execute."));
        assert_eq!(limit.description(), Some("from doc"));
    }

    #[test]
    fn duplicate_parameter_errors() {
        let err = ParameterSchema::builder()
            .required("a", ParameterKind::String)
            .unwrap()
            .required("a", ParameterKind::String)
            .expect_err("duplicate should fail");
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }
}
