//! JSON discovery and invocation surface over the tool registry.
//!
//! Transports hand in one JSON request object and get one JSON response
//! back; the echoed `id` lets callers correlate them. `tools/call` invokes
//! a tool directly with the supplied arguments, bypassing the conversation
//! loop and its argument normalization.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use fieldhand_primitives::schema::SchemaDialect;
use fieldhand_tools::ToolRegistry;

/// Requested method or tool does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Request could not be processed.
pub const INTERNAL_ERROR: i32 = -32603;

/// Incoming service request.
#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    /// Caller-chosen correlation value, echoed in the response.
    #[serde(default)]
    pub id: Value,
    /// Method name, e.g. `tools/list`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Outgoing service response. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    /// Correlation value echoed from the request.
    pub id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl ServiceResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ServiceError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Error object carried in failed responses.
#[derive(Debug, Serialize)]
pub struct ServiceError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

/// Serves `tools/list` and `tools/call` over a shared registry.
pub struct ToolService {
    registry: Arc<ToolRegistry>,
    dialect: SchemaDialect,
}

impl ToolService {
    /// Creates a service over the supplied registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            dialect: SchemaDialect::Gemini,
        }
    }

    /// Overrides the dialect used when rendering parameter schemas.
    #[must_use]
    pub const fn with_dialect(mut self, dialect: SchemaDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Handles one request.
    pub async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        debug!(method = %request.method, "service request");
        match request.method.as_str() {
            "tools/list" => self.list(request.id),
            "tools/call" => self.call(request.id, request.params).await,
            other => ServiceResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("unknown method `{other}`"),
            ),
        }
    }

    /// Handles one raw JSON request, returning a raw JSON response.
    /// Malformed input never panics and never drops the response.
    pub async fn handle_json(&self, raw: &str) -> String {
        let response = match serde_json::from_str::<ServiceRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(err) => ServiceResponse::error(
                Value::Null,
                INTERNAL_ERROR,
                format!("malformed request: {err}"),
            ),
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            json!({
                "id": null,
                "error": { "code": INTERNAL_ERROR, "message": err.to_string() }
            })
            .to_string()
        })
    }

    fn list(&self, id: Value) -> ServiceResponse {
        let tools: Vec<Value> = self
            .registry
            .snapshot()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name().as_str(),
                    "description": tool.description(),
                    "parameters": tool.translated_parameters(self.dialect),
                })
            })
            .collect();
        ServiceResponse::result(id, json!({ "tools": tools }))
    }

    async fn call(&self, id: Value, params: Value) -> ServiceResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return ServiceResponse::error(
                id,
                INTERNAL_ERROR,
                "tools/call requires a `name` string parameter",
            );
        };

        let arguments: Map<String, Value> = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return ServiceResponse::error(
                    id,
                    INTERNAL_ERROR,
                    "`arguments` must be a JSON object",
                );
            }
        };

        let tool = match self.registry.lookup(name) {
            Ok(tool) => tool,
            Err(err) => return ServiceResponse::error(id, METHOD_NOT_FOUND, err.to_string()),
        };

        match tool.invoke(arguments).await {
            Ok(text) => ServiceResponse::result(id, json!({ "result": text })),
            Err(err) => ServiceResponse::error(id, INTERNAL_ERROR, err.to_string()),
        }
    }
}
