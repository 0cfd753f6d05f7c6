//! Tool registration and dispatch for AI function calling.
//!
//! The model can request a named operation mid-conversation; the dispatcher
//! validates the arguments against the registered schema, runs the handler on
//! its own task, and always produces exactly one correlated [`ToolResult`] —
//! unknown names, bad arguments, and handler panics all come back as failure
//! results rather than crossing into the call session.
//!
//! The registry is populated once at startup and shared read-only across
//! sessions; handlers must be safe to invoke concurrently.

mod builtin;

pub use builtin::register_builtin_tools;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from tool registration and dispatch.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A tool name was registered twice
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// The requested tool is not in the registry
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// Arguments did not match the registered schema
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The handler task panicked or was aborted
    #[error("Tool '{0}' handler failed")]
    HandlerFault(String),
}


// =============================================================================
// Call / Result Types
// =============================================================================

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation identifier supplied by the AI session
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// Named arguments
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Outcome of one dispatched call, correlated by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation identifier from the originating [`ToolCall`]
    pub call_id: String,
    /// Tool name, echoed back for the wire protocol
    pub name: String,
    /// Structured return value on success, human-readable reason on failure
    pub outcome: ToolOutcome,
}

/// Success or failure payload of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Handler completed; value is returned to the model
    Ok(Value),
    /// Handler failed or the call was invalid; reason is returned to the model
    Err(String),
}

impl ToolResult {
    /// Build a success result correlated to `call`.
    pub fn ok(call: &ToolCall, value: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Ok(value),
        }
    }

    /// Build a failure result correlated to `call`.
    pub fn err(call: &ToolCall, reason: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Err(reason.into()),
        }
    }

    /// Whether the outcome is a success.
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Ok(_))
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Expected type of one tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ArgumentType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ArgumentType::String => value.is_string(),
            ArgumentType::Number => value.is_number(),
            ArgumentType::Boolean => value.is_boolean(),
            ArgumentType::Object => value.is_object(),
            ArgumentType::Array => value.is_array(),
        }
    }

    fn json_type(self) -> &'static str {
        match self {
            ArgumentType::String => "string",
            ArgumentType::Number => "number",
            ArgumentType::Boolean => "boolean",
            ArgumentType::Object => "object",
            ArgumentType::Array => "array",
        }
    }
}

/// Declared argument of a tool.
#[derive(Debug, Clone)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub arg_type: ArgumentType,
    pub required: bool,
}

/// Typed argument schema for one tool, validated at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    args: Vec<ArgumentSpec>,
}

impl ArgumentSchema {
    /// Schema with no arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a required argument.
    pub fn required(
        mut self,
        name: &'static str,
        arg_type: ArgumentType,
        description: &'static str,
    ) -> Self {
        self.args.push(ArgumentSpec {
            name,
            description,
            arg_type,
            required: true,
        });
        self
    }

    /// Add an optional argument.
    pub fn optional(
        mut self,
        name: &'static str,
        arg_type: ArgumentType,
        description: &'static str,
    ) -> Self {
        self.args.push(ArgumentSpec {
            name,
            description,
            arg_type,
            required: false,
        });
        self
    }

    /// Validate `args` against this schema.
    pub fn validate(&self, tool: &str, args: &Map<String, Value>) -> Result<(), ToolError> {
        for spec in &self.args {
            match args.get(spec.name) {
                Some(value) => {
                    if !spec.arg_type.matches(value) {
                        return Err(ToolError::InvalidArguments {
                            tool: tool.to_string(),
                            reason: format!(
                                "argument '{}' must be a {}",
                                spec.name,
                                spec.arg_type.json_type()
                            ),
                        });
                    }
                }
                None if spec.required => {
                    return Err(ToolError::InvalidArguments {
                        tool: tool.to_string(),
                        reason: format!("missing required argument '{}'", spec.name),
                    });
                }
                None => {}
            }
        }
        for key in args.keys() {
            if !self.args.iter().any(|s| s.name == key) {
                return Err(ToolError::InvalidArguments {
                    tool: tool.to_string(),
                    reason: format!("unknown argument '{key}'"),
                });
            }
        }
        Ok(())
    }

    /// Render the schema as a JSON-schema parameters object for the AI setup.
    pub fn to_parameters_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.args {
            properties.insert(
                spec.name.to_string(),
                serde_json::json!({
                    "type": spec.arg_type.json_type(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(Value::String(spec.name.to_string()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Boxed async tool handler.
///
/// Receives the validated argument map and returns the value to hand back to
/// the model, or a human-readable failure reason.
pub type ToolHandler = Arc<
    dyn Fn(Map<String, Value>) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>
        + Send
        + Sync,
>;

struct RegisteredTool {
    description: String,
    schema: ArgumentSchema,
    handler: ToolHandler,
}

/// Declaration of one tool as advertised to the AI backend at session setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Process-wide tool registry and dispatcher.
///
/// Built once at startup via [`ToolDispatcherBuilder`], then immutable and
/// shared across call sessions behind an `Arc`.
pub struct ToolDispatcher {
    tools: HashMap<String, RegisteredTool>,
}

/// Builder collecting tool registrations before the registry is frozen.
#[derive(Default)]
pub struct ToolDispatcherBuilder {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolDispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names are a configuration error.
    pub fn register(
        mut self,
        name: &str,
        description: &str,
        schema: ArgumentSchema,
        handler: ToolHandler,
    ) -> Result<Self, ToolError> {
        if self.tools.contains_key(name) {
            return Err(ToolError::DuplicateTool(name.to_string()));
        }
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                description: description.to_string(),
                schema,
                handler,
            },
        );
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> ToolDispatcher {
        ToolDispatcher { tools: self.tools }
    }
}

impl ToolDispatcher {
    /// Names of all registered tools.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Declarations for the AI session setup message.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .tools
            .iter()
            .map(|(name, tool)| ToolDeclaration {
                name: name.clone(),
                description: tool.description.clone(),
                parameters: tool.schema.to_parameters_json(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Execute a tool call, always producing exactly one correlated result.
    ///
    /// The handler runs on its own spawned task so a panic inside it surfaces
    /// as a `JoinError` and becomes a failure result instead of unwinding into
    /// the session.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Tool call for unregistered tool");
            return ToolResult::err(&call, ToolError::NotFound(call.name.clone()).to_string());
        };

        if let Err(e) = tool.schema.validate(&call.name, &call.args) {
            tracing::warn!(tool = %call.name, error = %e, "Tool arguments rejected");
            return ToolResult::err(&call, e.to_string());
        }

        let handler = tool.handler.clone();
        let args = call.args.clone();
        let joined = tokio::spawn(async move { handler(args).await }).await;

        match joined {
            Ok(Ok(value)) => {
                tracing::debug!(tool = %call.name, "Tool call succeeded");
                ToolResult::ok(&call, value)
            }
            Ok(Err(reason)) => {
                tracing::warn!(tool = %call.name, %reason, "Tool handler returned failure");
                ToolResult::err(&call, reason)
            }
            Err(join_err) => {
                tracing::error!(tool = %call.name, error = %join_err, "Tool handler fault");
                ToolResult::err(
                    &call,
                    ToolError::HandlerFault(call.name.clone()).to_string(),
                )
            }
        }
    }
}

/// Convenience for handlers written as plain async closures.
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}
