//! Production Google Gemini provider with function calling.

use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Uri};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use crate::http_client::{HyperClient, build_https_client};
use crate::traits::{
    ChatProvider, ModelResponse, Part, ProviderError, ProviderMetadata, ProviderResult, Role,
    ToolCall, ToolDeclaration, ToolResult, Turn,
};

/// Environment variable used when loading configuration automatically.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Configuration for the Gemini provider.
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
    default_temperature: Option<f32>,
    system_instruction: Option<String>,
}

impl GeminiConfig {
    /// Creates a configuration using the supplied model identifier.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com/".to_owned(),
            timeout: Duration::from_secs(60),
            default_temperature: None,
            system_instruction: None,
        }
    }

    /// Loads the API key from the `GEMINI_API_KEY` environment variable.
    #[must_use]
    pub fn from_env(model: impl Into<String>) -> Self {
        let mut cfg = Self::new(model);
        cfg.api_key = env::var(GEMINI_API_KEY_ENV).ok();
        cfg
    }

    /// Overrides the base URL used for API calls.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> ProviderResult<Self> {
        let sanitized = sanitize_base_url(base_url.as_ref())?;
        self.base_url = sanitized;
        Ok(self)
    }

    /// Sets the default sampling temperature.
    #[must_use]
    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = Some(temperature);
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supplies an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets a system instruction sent with every completion.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// Google Gemini provider that calls the official API over HTTPS.
pub struct GeminiProvider {
    client: HyperClient,
    base_endpoint: String,
    metadata: ProviderMetadata,
    api_key: String,
    timeout: Duration,
    default_temperature: Option<f32>,
    system_instruction: Option<String>,
}

impl fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("model", &self.metadata.model())
            .field("base_endpoint", &self.base_endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Constructs a new provider with the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] if the API key is missing.
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| ProviderError::configuration("Gemini provider requires an API key"))?;

        let metadata = ProviderMetadata::new("gemini", config.model.clone());
        let base_endpoint = format!(
            "{}v1beta/models/{}:generateContent",
            config.base_url, config.model
        );

        let client = build_https_client();

        Ok(Self {
            client,
            base_endpoint,
            metadata,
            api_key,
            timeout: config.timeout,
            default_temperature: config.default_temperature,
            system_instruction: config.system_instruction,
        })
    }

    fn build_request(&self, history: &[Turn], tools: &[ToolDeclaration]) -> GenerateContentRequest {
        let system_instruction =
            self.system_instruction
                .as_ref()
                .map(|instruction| SystemInstruction {
                    parts: vec![WirePart::text(instruction.clone())],
                });

        let contents = history.iter().map(map_turn).collect();

        let tools = if tools.is_empty() {
            None
        } else {
            Some(vec![ToolGroup {
                function_declarations: tools.iter().map(map_declaration).collect(),
            }])
        };

        let generation_config = self
            .default_temperature
            .map(|temperature| GenerationConfig {
                temperature: Some(temperature),
            });

        GenerateContentRequest {
            system_instruction,
            contents,
            tools,
            generation_config,
        }
    }

    fn build_uri(&self) -> ProviderResult<Uri> {
        format!("{}?key={}", self.base_endpoint, self.api_key)
            .parse::<Uri>()
            .map_err(|err| {
                ProviderError::configuration(format!("invalid Gemini endpoint: {err}"))
            })
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn complete(
        &self,
        history: &[Turn],
        tools: &[ToolDeclaration],
    ) -> ProviderResult<ModelResponse> {
        let payload = self.build_request(history, tools);
        let body = serde_json::to_vec(&payload).map_err(|err| {
            ProviderError::invalid_request(format!("failed to encode Gemini request: {err}"))
        })?;

        let endpoint = self.build_uri()?;

        let req = Request::post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| {
                ProviderError::transport(format!("failed to build Gemini request: {err}"))
            })?;

        debug!(
            model = self.metadata.model(),
            turns = history.len(),
            tools = tools.len(),
            "requesting Gemini completion"
        );

        let response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| ProviderError::transport("Gemini request timed out"))?
            .map_err(|err| ProviderError::transport(format!("Gemini request failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            ProviderError::transport(format!("failed to read Gemini response: {err}"))
        })?;

        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes).to_string();
            return Err(ProviderError::response(format!(
                "Gemini returned {status}: {reason}"
            )));
        }

        let response: GenerateContentResponse =
            serde_json::from_slice(&bytes).map_err(|err| {
                ProviderError::response(format!("failed to decode Gemini response: {err}"))
            })?;

        Ok(decode_response(response))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolGroup {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: String,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

impl WirePart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

fn map_turn(turn: &Turn) -> Content {
    let role = match turn.role {
        Role::User => "user",
        Role::Model => "model",
    };

    let parts = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => WirePart::text(text.clone()),
            Part::ToolCall(call) => WirePart {
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..WirePart::default()
            },
            Part::ToolResult(result) => WirePart {
                function_response: Some(WireFunctionResponse {
                    name: result.name.clone(),
                    response: result.output.clone(),
                }),
                ..WirePart::default()
            },
        })
        .collect();

    Content {
        role: role.to_owned(),
        parts,
    }
}

fn map_declaration(declaration: &ToolDeclaration) -> FunctionDeclaration {
    FunctionDeclaration {
        name: declaration.name.clone(),
        description: declaration.description.clone(),
        parameters: declaration.parameters.clone(),
    }
}

fn decode_response(response: GenerateContentResponse) -> ModelResponse {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return ModelResponse { turn: None };
    };

    let parts: Vec<Part> = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|part| {
            if let Some(call) = part.function_call {
                Some(Part::ToolCall(ToolCall {
                    name: call.name,
                    args: call.args,
                }))
            } else if let Some(response) = part.function_response {
                Some(Part::ToolResult(ToolResult {
                    name: response.name,
                    output: response.response,
                }))
            } else {
                part.text.map(Part::Text)
            }
        })
        .collect();

    ModelResponse {
        turn: Some(Turn::model(parts)),
    }
}

fn sanitize_base_url(input: &str) -> ProviderResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ProviderError::configuration(
            "Gemini base URL must start with http:// or https://",
        ));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>()
        .map_err(|err| ProviderError::configuration(format!("invalid Gemini base URL: {err}")))?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(GeminiConfig::new("gemini-2.0-flash").with_api_key("test_key"))
            .expect("provider")
    }

    #[test]
    fn base_url_requires_scheme() {
        let err = GeminiConfig::new("gemini-2.0-flash")
            .with_base_url("generativelanguage.googleapis.com")
            .expect_err("missing scheme should error");

        assert!(matches!(err, ProviderError::Configuration { .. }));
    }

    #[test]
    fn sanitize_allows_trailing_slash() {
        let cfg = GeminiConfig::new("gemini-2.0-flash")
            .with_base_url("https://example.com/gemini")
            .expect("valid URL");
        assert_eq!(cfg.base_url, "https://example.com/gemini/");
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = GeminiProvider::new(GeminiConfig::new("gemini-2.0-flash"))
            .expect_err("key required");
        assert!(matches!(err, ProviderError::Configuration { .. }));
    }

    #[test]
    fn build_request_maps_tool_declarations() {
        let provider = provider();
        let tools = vec![ToolDeclaration {
            name: "crm_query".into(),
            description: "Runs a query.".into(),
            parameters: json!({"type": "OBJECT", "properties": {}}),
        }];

        let request = provider.build_request(&[Turn::user_text("hello")], &tools);
        let groups = request.tools.expect("tool group");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].function_declarations[0].name, "crm_query");
        assert!(request.system_instruction.is_none());
    }

    #[test]
    fn build_request_maps_function_responses() {
        let provider = provider();
        let history = vec![
            Turn::user_text("list accounts"),
            Turn::model(vec![Part::ToolCall(ToolCall {
                name: "crm_query".into(),
                args: json!({"query": "SELECT Id FROM Account"}),
            })]),
            Turn::tool_results(vec![ToolResult {
                name: "crm_query".into(),
                output: json!({"result": "[]"}),
            }]),
        ];

        let request = provider.build_request(&history, &[]);
        assert!(request.tools.is_none());
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[1].role, "model");
        assert_eq!(
            request.contents[1].parts[0]
                .function_call
                .as_ref()
                .map(|call| call.name.as_str()),
            Some("crm_query")
        );
        assert_eq!(
            request.contents[2].parts[0]
                .function_response
                .as_ref()
                .map(|resp| resp.name.as_str()),
            Some("crm_query")
        );
    }

    #[test]
    fn decode_extracts_text_and_calls() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check."},
                        {"functionCall": {"name": "crm_query", "args": {"query": "q"}}}
                    ]
                }
            }]
        });
        let decoded: GenerateContentResponse = serde_json::from_value(raw).expect("decode");
        let response = decode_response(decoded);
        let turn = response.turn.expect("turn");
        assert_eq!(turn.text().as_deref(), Some("Let me check."));
        assert_eq!(turn.tool_calls().len(), 1);
    }

    #[test]
    fn decode_handles_empty_candidates() {
        let decoded: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": []})).expect("decode");
        assert!(decode_response(decoded).turn.is_none());
    }
}
