//! CRM accessor and the example tools built on it.
//!
//! `crm_query` and `crm_api_request` are the baseline capabilities the
//! model starts with. Their handlers never return `Err`: connection and
//! execution failures become `"Error: …"` result text with guidance the
//! model can act on, which is what the loop's failure classifier expects.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use webpki_roots::TLS_SERVER_ROOTS;

use fieldhand_primitives::schema::{ParameterKind, ParameterSchema};

use crate::descriptor::ToolDescriptor;
use crate::handler::{ToolError, ToolResult};

/// Errors produced by CRM connections.
#[derive(Debug, Error)]
pub enum CrmError {
    /// Connector is misconfigured or missing credentials.
    #[error("CRM not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// Transport-level failures (network, protocol, etc.).
    #[error("CRM transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The CRM rejected the request.
    #[error("CRM returned {status}: {reason}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error payload returned by the CRM.
        reason: String,
    },
}

impl CrmError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// An established CRM session.
#[async_trait]
pub trait CrmConnection: Send + Sync {
    /// Runs a query in the CRM's query language and returns the raw result.
    ///
    /// # Errors
    ///
    /// Returns a [`CrmError`] when the query cannot be sent or is rejected.
    async fn query(&self, soql: &str) -> Result<Value, CrmError>;

    /// Sends an arbitrary API request under the CRM's data path.
    ///
    /// # Errors
    ///
    /// Returns a [`CrmError`] when the request cannot be sent or is
    /// rejected.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CrmError>;
}

/// Produces CRM connections on demand.
///
/// Tools connect per invocation; the connection is held by one worker and
/// never shared across conversation loops.
#[async_trait]
pub trait CrmConnector: Send + Sync {
    /// Establishes a session with the CRM.
    ///
    /// # Errors
    ///
    /// Returns a [`CrmError`] when the session cannot be established.
    async fn connect(&self) -> Result<Arc<dyn CrmConnection>, CrmError>;
}

/// Configuration for the HTTPS CRM connector.
#[derive(Clone, Debug)]
pub struct HttpCrmConfig {
    base_url: String,
    token: String,
    api_version: String,
    timeout: Duration,
}

impl HttpCrmConfig {
    /// Creates a configuration for the supplied instance URL and token.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Configuration`] if the URL is invalid.
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, CrmError> {
        let base_url = sanitize_base_url(base_url.as_ref())?;
        Ok(Self {
            base_url,
            token: token.into(),
            api_version: "v59.0".to_owned(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Overrides the API version segment used in request paths.
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Connector that speaks the CRM's REST API over HTTPS.
pub struct HttpCrmConnector {
    config: HttpCrmConfig,
}

impl fmt::Debug for HttpCrmConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCrmConnector")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpCrmConnector {
    /// Creates a connector with the supplied configuration.
    #[must_use]
    pub fn new(config: HttpCrmConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CrmConnector for HttpCrmConnector {
    async fn connect(&self) -> Result<Arc<dyn CrmConnection>, CrmError> {
        let client = build_https_client();
        Ok(Arc::new(HttpCrmConnection {
            client,
            config: self.config.clone(),
        }))
    }
}

struct HttpCrmConnection {
    client: HyperClient,
    config: HttpCrmConfig,
}

impl HttpCrmConnection {
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, CrmError> {
        let uri = format!(
            "{}services/data/{}/{}",
            self.config.base_url,
            self.config.api_version,
            path.trim_start_matches('/')
        )
        .parse::<Uri>()
        .map_err(|err| CrmError::configuration(format!("invalid CRM endpoint: {err}")))?;

        debug!(%method, %uri, "sending CRM request");

        let payload = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };

        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .map_err(|err| CrmError::transport(format!("failed to build CRM request: {err}")))?;

        let response = timeout(self.config.timeout, self.client.request(request))
            .await
            .map_err(|_| CrmError::transport("CRM request timed out"))?
            .map_err(|err| CrmError::transport(format!("CRM request failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| CrmError::transport(format!("failed to read CRM response: {err}")))?;

        if !status.is_success() {
            return Err(CrmError::Api {
                status: status.as_u16(),
                reason: String::from_utf8_lossy(&bytes).to_string(),
            });
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| CrmError::transport(format!("malformed CRM response: {err}")))
    }
}

#[async_trait]
impl CrmConnection for HttpCrmConnection {
    async fn query(&self, soql: &str) -> Result<Value, CrmError> {
        let path = format!("query?q={}", encode_query_component(soql));
        self.send(Method::GET, &path, None).await
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CrmError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CrmError::transport(format!("invalid HTTP method `{method}`")))?;
        self.send(method, path, body).await
    }
}

/// Builds the `crm_query` tool over the supplied connector.
///
/// # Errors
///
/// Returns [`ToolError::InvalidDescriptor`] if the descriptor cannot be
/// built.
pub fn crm_query_tool(connector: Arc<dyn CrmConnector>) -> ToolResult<ToolDescriptor> {
    let schema = ParameterSchema::builder()
        .required("query", ParameterKind::String)
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .describe("The complete, valid query string to execute.")
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .build();

    let handler = move |args: Map<String, Value>| {
        let connector = Arc::clone(&connector);
        async move {
            let Some(query) = args.get("query").and_then(Value::as_str) else {
                return Ok("Error: crm_query requires a `query` string argument.".to_owned());
            };

            info!(query, "executing CRM query");

            let connection = match connector.connect().await {
                Ok(connection) => connection,
                Err(err) => {
                    return Ok(format!(
                        "Error: could not establish a CRM connection: {err}"
                    ));
                }
            };

            match connection.query(query).await {
                Ok(result) => Ok(render_query_result(&result)),
                Err(err) => Ok(query_error_text(&err)),
            }
        }
    };

    ToolDescriptor::builder("crm_query")?
        .description(
            "Executes a read-only CRM query and returns matching records as \
             JSON. The preferred tool for all data retrieval; include a LIMIT \
             clause unless every record is needed.",
        )
        .schema(schema)
        .handler(handler)
        .build()
}

/// Builds the `crm_api_request` tool over the supplied connector.
///
/// # Errors
///
/// Returns [`ToolError::InvalidDescriptor`] if the descriptor cannot be
/// built.
pub fn crm_api_request_tool(connector: Arc<dyn CrmConnector>) -> ToolResult<ToolDescriptor> {
    let schema = ParameterSchema::builder()
        .required("method", ParameterKind::String)
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .describe("HTTP method: GET, POST, PATCH, PUT, or DELETE.")
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .required("path", ParameterKind::String)
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .describe("API path after the data root, e.g. `sobjects/Account` or `limits`.")
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .optional("body", ParameterKind::Object)
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .describe("JSON request payload for write operations.")
        .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
        .build();

    let handler = move |args: Map<String, Value>| {
        let connector = Arc::clone(&connector);
        async move {
            let Some(method) = args.get("method").and_then(Value::as_str) else {
                return Ok(
                    "Error: crm_api_request requires a `method` string argument.".to_owned()
                );
            };
            let Some(path) = args.get("path").and_then(Value::as_str) else {
                return Ok("Error: crm_api_request requires a `path` string argument.".to_owned());
            };
            let body = args.get("body").cloned().filter(|value| !value.is_null());

            info!(method, path, "executing CRM API request");

            let connection = match connector.connect().await {
                Ok(connection) => connection,
                Err(err) => {
                    return Ok(format!(
                        "Error: could not establish a CRM connection: {err}"
                    ));
                }
            };

            match connection.request(method, path, body).await {
                Ok(result) => {
                    let rendered = serde_json::to_string_pretty(&result)
                        .unwrap_or_else(|_| result.to_string());
                    Ok(format!("API request succeeded:\n{rendered}"))
                }
                Err(err) => Ok(api_error_text(&err, method, path)),
            }
        }
    };

    ToolDescriptor::builder("crm_api_request")?
        .description(
            "Sends an arbitrary CRM REST API request for operations a query \
             cannot express: creating, updating, or deleting records, and \
             describe or limits endpoints.",
        )
        .schema(schema)
        .handler(handler)
        .build()
}

fn render_query_result(result: &Value) -> String {
    let records = match result.get("records").and_then(Value::as_array) {
        Some(records) => records,
        None => return "Query executed successfully: no records found.".to_owned(),
    };

    if records.is_empty() {
        return "Query executed successfully: no records found.".to_owned();
    }

    // Record metadata is noise to the model.
    let cleaned: Vec<Value> = records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            if let Value::Object(map) = &mut record {
                map.shift_remove("attributes");
            }
            record
        })
        .collect();

    serde_json::to_string_pretty(&cleaned).unwrap_or_else(|_| Value::Array(cleaned).to_string())
}

fn query_error_text(err: &CrmError) -> String {
    let mut text = format!("Error: executing the query failed: {err}");
    let detail = err.to_string();
    if detail.contains("MALFORMED_QUERY") {
        text.push_str(
            "\nGuidance: the query syntax is incorrect. Check the SELECT \
             statement, object and field names, and the WHERE clause.",
        );
    } else if detail.contains("INVALID_FIELD") {
        text.push_str(
            "\nGuidance: one or more fields in the query are invalid. Verify \
             the field API names for the target object.",
        );
    }
    text
}

fn api_error_text(err: &CrmError, method: &str, path: &str) -> String {
    let guidance = match err {
        CrmError::Api { status: 400, .. } => {
            "Bad request. Check the payload structure and required fields."
        }
        CrmError::Api { status: 403, .. } => {
            "Forbidden. Check permissions for the object or fields."
        }
        CrmError::Api { status: 404, .. } => {
            "Not found. Verify the path is correct and the resource exists."
        }
        _ => "An unexpected CRM API error occurred.",
    };
    format!("Error: API request {method} {path} failed: {err}\nGuidance: {guidance}")
}

fn encode_query_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

fn sanitize_base_url(input: &str) -> Result<String, CrmError> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(CrmError::configuration(
            "CRM base URL must start with http:// or https://",
        ));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>()
        .map_err(|err| CrmError::configuration(format!("invalid CRM base URL: {err}")))?;
    Ok(base)
}

fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    Client::builder().build::<_, Body>(HttpsConnector::from((http, Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Connection double returning scripted outcomes.
    struct FakeConnection {
        query_result: Result<Value, CrmError>,
        request_result: Result<Value, CrmError>,
    }

    #[async_trait]
    impl CrmConnection for FakeConnection {
        async fn query(&self, _soql: &str) -> Result<Value, CrmError> {
            clone_result(&self.query_result)
        }

        async fn request(
            &self,
            _method: &str,
            _path: &str,
            _body: Option<Value>,
        ) -> Result<Value, CrmError> {
            clone_result(&self.request_result)
        }
    }

    fn clone_result(result: &Result<Value, CrmError>) -> Result<Value, CrmError> {
        match result {
            Ok(value) => Ok(value.clone()),
            Err(CrmError::Api { status, reason }) => Err(CrmError::Api {
                status: *status,
                reason: reason.clone(),
            }),
            Err(err) => Err(CrmError::transport(err.to_string())),
        }
    }

    struct FakeConnector {
        query_result: Result<Value, CrmError>,
        request_result: Result<Value, CrmError>,
    }

    #[async_trait]
    impl CrmConnector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn CrmConnection>, CrmError> {
            Ok(Arc::new(FakeConnection {
                query_result: clone_result(&self.query_result),
                request_result: clone_result(&self.request_result),
            }))
        }
    }

    fn query_args(query: &str) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("query".into(), Value::from(query));
        args
    }

    #[tokio::test]
    async fn query_strips_attributes() {
        let connector = Arc::new(FakeConnector {
            query_result: Ok(json!({"records": [
                {"attributes": {"type": "Account"}, "Id": "001", "Name": "Acme"}
            ]})),
            request_result: Ok(Value::Null),
        });
        let tool = crm_query_tool(connector).unwrap();

        let text = tool
            .invoke(query_args("SELECT Id, Name FROM Account"))
            .await
            .unwrap();
        assert!(text.contains("Acme"));
        assert!(!text.contains("attributes"));
    }

    #[tokio::test]
    async fn empty_result_reports_success() {
        let connector = Arc::new(FakeConnector {
            query_result: Ok(json!({"records": []})),
            request_result: Ok(Value::Null),
        });
        let tool = crm_query_tool(connector).unwrap();

        let text = tool.invoke(query_args("SELECT Id FROM Account")).await.unwrap();
        assert_eq!(text, "Query executed successfully: no records found.");
    }

    #[tokio::test]
    async fn malformed_query_gets_guidance() {
        let connector = Arc::new(FakeConnector {
            query_result: Err(CrmError::Api {
                status: 400,
                reason: "MALFORMED_QUERY: unexpected token".into(),
            }),
            request_result: Ok(Value::Null),
        });
        let tool = crm_query_tool(connector).unwrap();

        let text = tool.invoke(query_args("SELEC Id")).await.unwrap();
        assert!(text.starts_with("Error:"));
        assert!(text.contains("Guidance: the query syntax is incorrect"));
    }

    #[tokio::test]
    async fn missing_argument_is_result_text() {
        let connector = Arc::new(FakeConnector {
            query_result: Ok(Value::Null),
            request_result: Ok(Value::Null),
        });
        let tool = crm_query_tool(connector).unwrap();

        let text = tool.invoke(Map::new()).await.unwrap();
        assert!(text.starts_with("Error:"));
    }

    #[tokio::test]
    async fn api_request_not_found_gets_guidance() {
        let connector = Arc::new(FakeConnector {
            query_result: Ok(Value::Null),
            request_result: Err(CrmError::Api {
                status: 404,
                reason: "The requested resource does not exist".into(),
            }),
        });
        let tool = crm_api_request_tool(connector).unwrap();

        let mut args = Map::new();
        args.insert("method".into(), Value::from("GET"));
        args.insert("path".into(), Value::from("sobjects/Acount"));
        let text = tool.invoke(args).await.unwrap();
        assert!(text.starts_with("Error:"));
        assert!(text.contains("Not found"));
    }

    #[tokio::test]
    async fn api_request_success_renders_json() {
        let connector = Arc::new(FakeConnector {
            query_result: Ok(Value::Null),
            request_result: Ok(json!({"maxApiRequests": 15000})),
        });
        let tool = crm_api_request_tool(connector).unwrap();

        let mut args = Map::new();
        args.insert("method".into(), Value::from("GET"));
        args.insert("path".into(), Value::from("limits"));
        let text = tool.invoke(args).await.unwrap();
        assert!(text.starts_with("API request succeeded:"));
        assert!(text.contains("15000"));
    }

    #[test]
    fn config_rejects_bad_base_url() {
        let err = HttpCrmConfig::new("example.my.salesforce.com", "token")
            .expect_err("scheme required");
        assert!(matches!(err, CrmError::Configuration { .. }));
    }

    #[test]
    fn query_component_encoding() {
        assert_eq!(
            encode_query_component("SELECT Id FROM Account WHERE Name = 'Acme'"),
            "SELECT%20Id%20FROM%20Account%20WHERE%20Name%20%3D%20%27Acme%27"
        );
    }
}
