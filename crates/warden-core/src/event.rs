use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::now_rfc3339;

/// Normalized event type, shared across providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Message,
    ToolUse,
    ToolResult,
    Thinking,
    Result,
    PartialStreamDelta,
    System,
}

/// One event from an agent process, after provider-specific parsing.
///
/// `content` keeps a provider-neutral shape for the kinds the core acts on
/// (`tool-use`, `tool-result`, `message`, `result`) and passes the rest
/// through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub is_error: bool,
    pub content: Value,
}

impl NormalizedEvent {
    pub fn new(kind: EventKind, content: Value) -> Self {
        Self {
            kind,
            content,
            timestamp: now_rfc3339(),
        }
    }

    pub fn tool_use(id: &str, name: &str, input: Value) -> Self {
        Self::new(
            EventKind::ToolUse,
            json!({ "id": id, "name": name, "input": input }),
        )
    }

    pub fn tool_result(tool_use_id: &str, is_error: bool, content: Value) -> Self {
        Self::new(
            EventKind::ToolResult,
            json!({ "tool_use_id": tool_use_id, "is_error": is_error, "content": content }),
        )
    }

    pub fn message(text: &str) -> Self {
        Self::new(
            EventKind::Message,
            json!({ "role": "assistant", "text": text }),
        )
    }

    pub fn thinking(text: &str) -> Self {
        Self::new(EventKind::Thinking, json!({ "text": text }))
    }

    pub fn result(is_error: bool, text: Option<&str>, cost_usd: Option<f64>) -> Self {
        Self::new(
            EventKind::Result,
            json!({ "is_error": is_error, "text": text, "total_cost_usd": cost_usd }),
        )
    }

    pub fn system(subtype: &str, mut extra: Value) -> Self {
        if let Some(obj) = extra.as_object_mut() {
            obj.insert("subtype".into(), Value::String(subtype.to_string()));
            return Self::new(EventKind::System, extra);
        }
        Self::new(EventKind::System, json!({ "subtype": subtype }))
    }

    /// Wrap a stdout line that could not be parsed.
    pub fn opaque(line: &str) -> Self {
        Self::system("unparsed", json!({ "raw": line }))
    }

    pub fn as_tool_use(&self) -> Option<ToolUse> {
        if self.kind != EventKind::ToolUse {
            return None;
        }
        Some(ToolUse {
            id: self.content.get("id")?.as_str()?.to_string(),
            name: self.content.get("name")?.as_str()?.to_string(),
            input: self.content.get("input").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn as_tool_result(&self) -> Option<ToolResult> {
        if self.kind != EventKind::ToolResult {
            return None;
        }
        Some(ToolResult {
            tool_use_id: self.content.get("tool_use_id")?.as_str()?.to_string(),
            is_error: self
                .content
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            content: self.content.get("content").cloned().unwrap_or(Value::Null),
        })
    }

    /// Text of a `message`, `thinking` or `result` event.
    pub fn text(&self) -> Option<&str> {
        self.content.get("text").and_then(Value::as_str)
    }

    pub fn subtype(&self) -> Option<&str> {
        self.content.get("subtype").and_then(Value::as_str)
    }
}
