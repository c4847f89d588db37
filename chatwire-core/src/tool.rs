#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::message::MessageBlock;

/// Vendor-neutral description of a tool the model may call
///
/// Tool names are matched exactly and case-sensitively. Two descriptors with
/// the same name in one list is a registry bug; lookups return the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    /// MCP server exposing the tool
    #[serde(default)]
    pub server_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            server_name: String::new(),
            name,
            description: description.into(),
            input_schema,
        }
    }
}

/// Typed tool definition whose argument schema is derived from `Input`
///
/// # Examples
///
/// ```
/// use chatwire_core::ToolDefinition;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Debug, Clone, Deserialize, JsonSchema)]
/// struct WeatherRequest {
///     location: String,
/// }
///
/// struct WeatherTool;
///
/// impl ToolDefinition for WeatherTool {
///     type Input = WeatherRequest;
///
///     fn name(&self) -> String {
///         "get_weather".to_string()
///     }
///
///     fn description(&self) -> String {
///         "Get current weather for a location".to_string()
///     }
/// }
///
/// let descriptor = WeatherTool.descriptor().unwrap();
/// assert_eq!(descriptor.name, "get_weather");
/// assert_eq!(descriptor.input_schema["type"], "object");
/// ```
#[cfg(feature = "schema")]
pub trait ToolDefinition {
    /// The input type that this tool accepts
    type Input: DeserializeOwned + JsonSchema + Send + Sync + 'static;

    fn name(&self) -> String;

    fn description(&self) -> String;

    /// Helper to generate the JSON schema for the input type
    fn schema(&self) -> Result<Value> {
        let schema = schemars::schema_for!(Self::Input);
        serde_json::to_value(schema.schema)
            .map_err(|e| crate::Error::Other(format!("Schema generation failed: {}", e)))
    }

    /// Vendor-neutral descriptor for this tool
    fn descriptor(&self) -> Result<ToolDescriptor> {
        Ok(ToolDescriptor::new(
            self.name(),
            self.description(),
            self.schema()?,
        ))
    }
}

#[cfg(not(feature = "schema"))]
pub trait ToolDefinition {
    type Input: DeserializeOwned + Send + Sync + 'static;
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn schema(&self) -> Result<Value> {
        Err(crate::Error::Other(
            "Schema generation requires the `schema` feature".to_string(),
        ))
    }
    fn descriptor(&self) -> Result<ToolDescriptor> {
        Ok(ToolDescriptor::new(
            self.name(),
            self.description(),
            self.schema()?,
        ))
    }
}

/// A tool call as requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Invoking,
    Done,
    Error,
}

/// One content part of an MCP tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

/// Raw result of executing a tool on an MCP server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpCallToolResponse {
    pub content: Vec<McpContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpCallToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Text parts joined by newlines; resources contribute their text if any
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                McpContent::Resource { text, .. } => text.as_deref(),
                McpContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            McpContent::Image { data, .. } => Some(data.as_str()),
            _ => None,
        })
    }
}

/// Canonical tool-call result handed to the tool runtime and back
///
/// Exactly one response exists per tool call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    /// Vendor id of the call, when the vendor assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub tool: ToolDescriptor,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<McpCallToolResponse>,
}

impl ToolCallResponse {
    pub fn pending(tool: ToolDescriptor, arguments: Value, tool_call_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_call_id,
            tool,
            arguments,
            status: ToolCallStatus::Pending,
            response: None,
        }
    }

    /// Records the execution result; status follows `is_error`.
    #[must_use]
    pub fn completed(mut self, response: McpCallToolResponse) -> Self {
        self.status = if response.is_error {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Done
        };
        self.response = Some(response);
        self
    }
}

/// Looks a tool up by exact name
pub fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    tools.iter().find(|t| t.name == name)
}

const INVALID_RESULT: &str = "Invalid Result";

#[derive(Serialize)]
struct WrappedCall<'a, P: Serialize, R: Serialize> {
    params: &'a P,
    response: &'a R,
}

/// Renders a tool call as plain text for vendors without structured tool turns
///
/// The payload is pretty-printed as `{params, response}` inside a fenced JSON
/// block. A payload that cannot be serialized is replaced by `Invalid Result`.
///
/// # Examples
///
/// ```
/// use chatwire_core::tool::wrap_tool_result;
/// use serde_json::json;
///
/// let text = wrap_tool_result("search", &json!({"q": "x"}), &json!({"ok": true}));
/// assert!(text.contains("Tool Name:search"));
/// assert!(text.contains("\"params\""));
/// ```
pub fn wrap_tool_result<P: Serialize, R: Serialize>(name: &str, params: &P, response: &R) -> String {
    let body = serde_json::to_string_pretty(&WrappedCall { params, response }).unwrap_or_else(|e| {
        warn!("Failed to serialize result of tool {}: {}", name, e);
        INVALID_RESULT.to_string()
    });
    format!(
        "\n\nAssistant called a tool.\nTool Name:{name}\nTool call result: \n```json\n{body}\n```\n\n"
    )
}

/// Flattens main text and tool blocks of a message into one text body
pub fn content_with_tools(blocks: &[MessageBlock]) -> String {
    let mut content = String::new();
    for block in blocks {
        match block {
            MessageBlock::MainText { content: text } => content.push_str(text),
            MessageBlock::Tool(tool) => {
                let r = &tool.response;
                content.push_str(&wrap_tool_result(&r.tool.name, &r.arguments, &r.response));
            }
            MessageBlock::Thinking { .. } | MessageBlock::File(_) => {}
        }
    }
    content
}
