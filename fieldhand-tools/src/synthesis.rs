//! Dynamic capability synthesis: turning model-generated source into
//! registered tools at runtime.
//!
//! Source execution is delegated to a [`ScriptSandbox`]. The shipped
//! [`InterpreterSandbox`] runs the source through an external interpreter
//! subprocess with a fixed driver that pre-populates the allowed namespace;
//! it performs no isolation beyond that, which is why its constructor is
//! named [`InterpreterSandbox::unsandboxed`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use fieldhand_primitives::schema::{ParameterKind, ParameterSchema};
use fieldhand_primitives::ToolName;

use crate::descriptor::ToolDescriptor;
use crate::handler::{ToolError, ToolResult};
use crate::registry::ToolRegistry;

/// Errors produced while defining a dynamic tool.
///
/// All variants are recoverable: the `define_tool` meta-tool reports them
/// back to the model as its own result text.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The source failed to parse.
    #[error("syntax error at line {line}: {message}")]
    InvalidSyntax {
        /// One-based source line of the error.
        line: u32,
        /// Parser message.
        message: String,
    },

    /// The source did not define exactly one function.
    #[error("source must define exactly one function, found {found}")]
    NoSingleFunction {
        /// Number of functions actually defined.
        found: usize,
    },

    /// The source parsed but the tool could not be defined or executed.
    #[error("tool definition failed: {reason}")]
    DefinitionFailed {
        /// Human-readable reason for the failure.
        reason: String,
    },
}

impl SynthesisError {
    /// Creates a definition failure from the supplied reason.
    #[must_use]
    pub fn definition_failed(reason: impl Into<String>) -> Self {
        Self::DefinitionFailed {
            reason: reason.into(),
        }
    }
}

/// One parameter of a synthesised function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: String,
    /// Semantic type derived from the source annotation.
    pub kind: ParameterKind,
    /// Whether the source declares no default for this parameter.
    pub required: bool,
}

/// Shape of a function extracted from generated source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSpec {
    /// Function name, which becomes the tool name.
    pub name: String,
    /// Raw documentation block (summary plus `Args:` section).
    pub doc: String,
    /// Declared parameters in signature order.
    pub params: Vec<ParamDecl>,
}

/// Executes generated source on behalf of the synthesizer.
///
/// This is the explicit seam for isolation policy: implementations decide
/// how much containment the source gets.
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    /// Executes the source and describes the single function it defines.
    ///
    /// # Errors
    ///
    /// Returns a [`SynthesisError`] when the source fails to parse, defines
    /// zero or multiple functions, or fails during definition.
    async fn describe(&self, source: &str) -> Result<FunctionSpec, SynthesisError>;

    /// Executes the source and calls the named function with the arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`SynthesisError`] when the source or the call fails.
    async fn invoke(
        &self,
        source: &str,
        function: &str,
        args: &Map<String, Value>,
    ) -> Result<String, SynthesisError>;
}

/// Wraps a sandbox and a registry to define new tools from source.
pub struct Synthesizer {
    sandbox: Arc<dyn ScriptSandbox>,
    registry: Arc<ToolRegistry>,
}

impl Synthesizer {
    /// Creates a synthesizer over the supplied sandbox and registry.
    #[must_use]
    pub fn new(sandbox: Arc<dyn ScriptSandbox>, registry: Arc<ToolRegistry>) -> Self {
        Self { sandbox, registry }
    }

    /// Defines and registers a new tool from generated source.
    ///
    /// The registered tool re-executes the source through the sandbox on
    /// every call and outlives the conversation that defined it.
    ///
    /// # Errors
    ///
    /// Returns a [`SynthesisError`] when the source is rejected by the
    /// sandbox or produces an invalid descriptor.
    pub async fn define(&self, source: &str) -> Result<ToolName, SynthesisError> {
        warn!("defining a tool from generated source");

        let spec = self.sandbox.describe(source).await?;
        let doc = spec.doc.clone();

        let mut schema = ParameterSchema::builder();
        for param in &spec.params {
            schema = if param.required {
                schema.required(param.name.clone(), param.kind)
            } else {
                schema.optional(param.name.clone(), param.kind)
            }
            .map_err(|err| SynthesisError::definition_failed(err.to_string()))?;
        }

        let sandbox = Arc::clone(&self.sandbox);
        let source: Arc<str> = Arc::from(source);
        let function = spec.name.clone();
        let handler = move |args: Map<String, Value>| {
            let sandbox = Arc::clone(&sandbox);
            let source = Arc::clone(&source);
            let function = function.clone();
            async move {
                sandbox
                    .invoke(&source, &function, &args)
                    .await
                    .map_err(|err| ToolError::execution(err.to_string()))
            }
        };

        let descriptor = ToolDescriptor::builder(spec.name.clone())
            .map_err(|err| SynthesisError::definition_failed(err.to_string()))?
            .doc_text(&doc)
            .schema(schema.build())
            .handler(handler)
            .build()
            .map_err(|err| SynthesisError::definition_failed(err.to_string()))?;

        let name = descriptor.name().clone();
        self.registry.register(descriptor);
        info!(tool = %name, "dynamic tool registered");
        Ok(name)
    }

    /// Builds the `define_tool` meta-tool descriptor.
    ///
    /// Synthesis failures are returned as the tool's own result text so the
    /// model can correct the source and retry.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidDescriptor`] if the descriptor cannot be
    /// built.
    pub fn define_tool(self: &Arc<Self>) -> ToolResult<ToolDescriptor> {
        let schema = ParameterSchema::builder()
            .required("source", ParameterKind::String)
            .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
            .describe(
                "Source defining exactly one function with type hints for every \
                 argument and a docstring with an Args: section.",
            )
            .map_err(|err| ToolError::invalid_descriptor(err.to_string()))?
            .build();

        let synthesizer = Arc::clone(self);
        let handler = move |args: Map<String, Value>| {
            let synthesizer = Arc::clone(&synthesizer);
            async move {
                let Some(source) = args.get("source").and_then(Value::as_str) else {
                    return Ok(
                        "Error: define_tool requires a `source` string argument.".to_owned()
                    );
                };
                match synthesizer.define(source).await {
                    Ok(name) => Ok(format!(
                        "Successfully defined and registered new tool: '{name}'. \
                         You may now call this tool to complete the task."
                    )),
                    Err(err) => Ok(format!(
                        "Error: failed to define the new tool: {err}\n\
                         Guidance: the source must define exactly one function with \
                         type hints for every argument and a docstring, using only \
                         the preloaded modules."
                    )),
                }
            }
        };

        ToolDescriptor::builder("define_tool")?
            .description(
                "Defines and registers a new tool from generated source for \
                 multi-step or custom tasks the existing tools cannot handle. \
                 The source must define a single function; its signature and \
                 docstring become the tool's schema and description.",
            )
            .schema(schema)
            .handler(handler)
            .build()
    }
}

/// Request sent to the interpreter driver on stdin.
#[derive(Serialize)]
struct DriverRequest<'a> {
    op: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a Map<String, Value>>,
}

/// Reply printed by the interpreter driver on stdout.
#[derive(Deserialize)]
struct DriverReply {
    ok: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    doc: Option<String>,
    #[serde(default)]
    params: Option<Vec<DriverParam>>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<DriverFault>,
}

#[derive(Deserialize)]
struct DriverParam {
    name: String,
    kind: String,
    required: bool,
}

#[derive(Deserialize)]
struct DriverFault {
    kind: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    found: Option<usize>,
    message: String,
}

/// Driver script executed by the interpreter for every request. It reads a
/// JSON request on stdin, executes the source in a namespace limited to
/// data interchange, tabular data, date arithmetic, and the CRM accessor,
/// and prints a JSON reply.
const DRIVER: &str = r#"
import csv, inspect, json, os, sys, urllib.parse, urllib.request
from datetime import date, datetime, timedelta


def _crm_request(method, path, body=None):
    base = os.environ.get("CRM_BASE_URL", "").rstrip("/")
    req = urllib.request.Request(base + "/" + path.lstrip("/"), method=method)
    req.add_header("Authorization", "Bearer " + os.environ.get("CRM_TOKEN", ""))
    req.add_header("Content-Type", "application/json")
    data = json.dumps(body).encode() if body is not None else None
    with urllib.request.urlopen(req, data=data, timeout=30) as resp:
        payload = resp.read().decode()
    return json.loads(payload) if payload else None


class _CrmConnection:
    def query(self, soql):
        return _crm_request("GET", "query?q=" + urllib.parse.quote(soql))

    def request(self, method, path, body=None):
        return _crm_request(method, path, body)


def get_crm_connection():
    return _CrmConnection()


_KINDS = {str: "string", int: "integer", float: "number", bool: "boolean",
          dict: "object", list: "array"}


def _fail(kind, message, **extra):
    print(json.dumps({"ok": False,
                      "error": dict(kind=kind, message=message, **extra)}))
    sys.exit(0)


def main():
    request = json.loads(sys.stdin.read())
    namespace = {"json": json, "csv": csv, "date": date, "datetime": datetime,
                 "timedelta": timedelta,
                 "get_crm_connection": get_crm_connection}
    scope = {}
    try:
        compiled = compile(request["source"], "<tool>", "exec")
    except SyntaxError as err:
        _fail("syntax", err.msg or "invalid syntax", line=err.lineno or 0)
    try:
        exec(compiled, namespace, scope)
    except Exception as err:
        _fail("definition", str(err))
    functions = [(n, f) for n, f in scope.items() if inspect.isfunction(f)]
    if request["op"] == "describe":
        if len(functions) != 1:
            _fail("no_single_function",
                  "source must define exactly one function",
                  found=len(functions))
        name, func = functions[0]
        params = []
        for param in inspect.signature(func).parameters.values():
            params.append({"name": param.name,
                           "kind": _KINDS.get(param.annotation, "string"),
                           "required":
                               param.default is inspect.Parameter.empty})
        print(json.dumps({"ok": True, "name": name,
                          "doc": inspect.getdoc(func) or "",
                          "params": params}))
        return
    target = dict(functions).get(request["function"])
    if target is None:
        _fail("definition",
              "function %r is not defined by the source" % request["function"])
    try:
        result = target(**(request.get("args") or {}))
    except Exception as err:
        _fail("execution", str(err))
    print(json.dumps({"ok": True, "result": str(result)}))


main()
"#;

/// Sandbox that runs generated source through an external interpreter
/// subprocess. It bounds execution time but performs no other isolation.
pub struct InterpreterSandbox {
    interpreter: String,
    timeout: Duration,
}

impl InterpreterSandbox {
    /// Creates a sandbox that executes source with the supplied interpreter
    /// binary (e.g. `python3`) and no containment beyond a wall-clock
    /// timeout. The name is deliberate: choosing this implementation is an
    /// explicit decision to run generated code unisolated.
    #[must_use]
    pub fn unsandboxed(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the per-request execution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, request: &DriverRequest<'_>) -> Result<DriverReply, SynthesisError> {
        let payload = serde_json::to_vec(request)
            .map_err(|err| SynthesisError::definition_failed(err.to_string()))?;

        let mut child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                SynthesisError::definition_failed(format!(
                    "failed to spawn interpreter `{}`: {err}",
                    self.interpreter
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.map_err(|err| {
                SynthesisError::definition_failed(format!("failed to write source: {err}"))
            })?;
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SynthesisError::definition_failed("interpreter timed out"))?
            .map_err(|err| {
                SynthesisError::definition_failed(format!("interpreter failed: {err}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SynthesisError::definition_failed(format!(
                "interpreter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let reply: DriverReply = serde_json::from_slice(&output.stdout).map_err(|err| {
            SynthesisError::definition_failed(format!("malformed driver reply: {err}"))
        })?;

        if reply.ok {
            return Ok(reply);
        }

        Err(match reply.error {
            Some(fault) => map_fault(fault),
            None => SynthesisError::definition_failed("driver reported an unnamed failure"),
        })
    }
}

fn map_fault(fault: DriverFault) -> SynthesisError {
    match fault.kind.as_str() {
        "syntax" => SynthesisError::InvalidSyntax {
            line: fault.line.unwrap_or(0),
            message: fault.message,
        },
        "no_single_function" => SynthesisError::NoSingleFunction {
            found: fault.found.unwrap_or(0),
        },
        _ => SynthesisError::definition_failed(fault.message),
    }
}

fn map_kind(tag: &str) -> ParameterKind {
    match tag {
        "integer" => ParameterKind::Integer,
        "number" => ParameterKind::Number,
        "boolean" => ParameterKind::Boolean,
        "object" => ParameterKind::Object,
        "array" => ParameterKind::Array,
        _ => ParameterKind::String,
    }
}

#[async_trait]
impl ScriptSandbox for InterpreterSandbox {
    async fn describe(&self, source: &str) -> Result<FunctionSpec, SynthesisError> {
        let reply = self
            .run(&DriverRequest {
                op: "describe",
                source,
                function: None,
                args: None,
            })
            .await?;

        let name = reply
            .name
            .ok_or_else(|| SynthesisError::definition_failed("driver omitted function name"))?;
        let params = reply
            .params
            .unwrap_or_default()
            .into_iter()
            .map(|param| ParamDecl {
                name: param.name,
                kind: map_kind(&param.kind),
                required: param.required,
            })
            .collect();

        Ok(FunctionSpec {
            name,
            doc: reply.doc.unwrap_or_default(),
            params,
        })
    }

    async fn invoke(
        &self,
        source: &str,
        function: &str,
        args: &Map<String, Value>,
    ) -> Result<String, SynthesisError> {
        let reply = self
            .run(&DriverRequest {
                op: "call",
                source,
                function: Some(function),
                args: Some(args),
            })
            .await?;

        reply
            .result
            .ok_or_else(|| SynthesisError::definition_failed("driver omitted call result"))
    }
}
