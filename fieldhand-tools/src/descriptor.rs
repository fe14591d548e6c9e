//! Tool descriptors: name, documentation, parameter schema, and executor.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use fieldhand_primitives::schema::{DocText, ParameterSchema, SchemaDialect};
use fieldhand_primitives::ToolName;

use crate::handler::{ToolError, ToolHandler, ToolResult};

/// A registered capability: everything the loop needs to offer the tool to
/// the model and to run it.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: ToolName,
    description: String,
    schema: ParameterSchema,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Starts building a descriptor for the supplied tool name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidDescriptor`] if the name fails validation.
    pub fn builder(name: impl Into<String>) -> ToolResult<ToolDescriptorBuilder> {
        let name = ToolName::new(name).map_err(|err| ToolError::invalid_descriptor(err.to_string()))?;
        Ok(ToolDescriptorBuilder {
            name,
            description: None,
            schema: ParameterSchema::empty(),
            doc: None,
            handler: None,
        })
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &ToolName {
        &self.name
    }

    /// Returns the description shown to the model.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the parameter schema.
    #[must_use]
    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Renders the parameter schema in the supplied provider dialect.
    #[must_use]
    pub fn translated_parameters(&self, dialect: SchemaDialect) -> Value {
        dialect.translate(&self.schema.to_json())
    }

    /// Executes the underlying handler.
    ///
    /// # Errors
    ///
    /// Propagates any [`ToolError::Execution`] returned by the handler.
    pub async fn invoke(&self, args: Map<String, Value>) -> ToolResult<String> {
        self.handler.call(args).await
    }
}

/// Builder for [`ToolDescriptor`].
pub struct ToolDescriptorBuilder {
    name: ToolName,
    description: Option<String>,
    schema: ParameterSchema,
    doc: Option<DocText>,
    handler: Option<Arc<dyn ToolHandler>>,
}

impl fmt::Debug for ToolDescriptorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptorBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptorBuilder {
    /// Sets the description shown to the model.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Derives documentation from a doc block with a conventional `Args:`
    /// section. The summary becomes the description unless one was set
    /// explicitly, and parameter descriptions fill in schema fields that
    /// lack their own.
    #[must_use]
    pub fn doc_text(mut self, text: &str) -> Self {
        self.doc = Some(DocText::parse(text));
        self
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the executor.
    #[must_use]
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Finalises the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidDescriptor`] if no handler was supplied
    /// or no description could be derived.
    pub fn build(self) -> ToolResult<ToolDescriptor> {
        let Some(handler) = self.handler else {
            return Err(ToolError::invalid_descriptor(format!(
                "tool `{}` has no handler",
                self.name
            )));
        };

        let mut schema = self.schema;
        let description = match (self.description, self.doc) {
            (Some(description), doc) => {
                if let Some(doc) = doc {
                    schema.apply_doc(&doc);
                }
                description
            }
            (None, Some(doc)) => {
                schema.apply_doc(&doc);
                doc.summary().to_owned()
            }
            (None, None) => String::new(),
        };

        if description.trim().is_empty() {
            return Err(ToolError::invalid_descriptor(format!(
                "tool `{}` has no description",
                self.name
            )));
        }

        Ok(ToolDescriptor {
            name: self.name,
            description,
            schema,
            handler,
        })
    }
}
