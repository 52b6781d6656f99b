//! Event types exchanged with the remote conversational endpoint.
//!
//! These are provider-neutral. A transport translates its own wire
//! messages into [`ServerEvent`]s and serializes [`ToolResponse`]s back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events received from the remote session.
///
/// One provider message can expand into several events; they are yielded
/// in the order they appeared in the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The session finished its setup handshake.
    SetupComplete,

    /// A chunk of synthesized speech, still base64-armored PCM16.
    Audio {
        /// Base64 PCM16 at the output sample rate.
        data: String,
    },

    /// A text part of the model turn.
    Text {
        /// Text content.
        text: String,
    },

    /// The user barged in; queued speech must be discarded.
    Interrupted,

    /// The model finished its turn.
    TurnComplete,

    /// The model wants one or more tools executed.
    ToolCall {
        /// Invocations carried by a single message.
        calls: Vec<ToolCall>,
    },

    /// The model withdrew earlier invocations.
    ToolCallCancellation {
        /// Ids of the withdrawn invocations.
        ids: Vec<String>,
    },

    /// The server will close the connection soon.
    GoAway {
        /// Remaining time as reported by the server.
        #[serde(skip_serializing_if = "Option::is_none")]
        time_left: Option<String>,
    },

    /// Unknown message kind (for forward compatibility).
    #[serde(other)]
    Unknown,
}

/// A request from the model to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque invocation id, echoed in the response.
    pub id: String,
    /// Tool/function name.
    pub name: String,
    /// Arguments as JSON.
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self { id: id.into(), name: name.into(), args }
    }
}

/// Outcome of a tool invocation as seen by the model.
///
/// Serializes to `{"status":"ok", ...}` or `{"status":"error","reason":...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    /// The host carried out the action.
    Ok {
        /// Human-readable summary for the model.
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The action was refused or failed.
    Error {
        /// Why it failed.
        reason: String,
    },
}

impl ToolResult {
    /// A successful result with a short summary.
    pub fn ok(detail: impl Into<String>) -> Self {
        Self::Ok { detail: Some(detail.into()) }
    }

    /// A failed result.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { reason: reason.into() }
    }

    /// Whether this is a success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// A tool result correlated to its invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Id of the invocation being answered.
    pub id: String,
    /// Name of the invoked tool.
    pub name: String,
    /// The outcome.
    pub result: ToolResult,
}

impl ToolResponse {
    /// Answer `call` with `result`.
    pub fn for_call(call: &ToolCall, result: ToolResult) -> Self {
        Self { id: call.id.clone(), name: call.name.clone(), result }
    }

    /// The `response` object sent on the wire: `{"result": {...}}`.
    pub fn response_body(&self) -> Value {
        serde_json::json!({ "result": self.result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_serialization() {
        let ok = serde_json::to_value(ToolResult::ok("appointment booked")).unwrap();
        assert_eq!(ok, json!({"status": "ok", "detail": "appointment booked"}));

        let bare = serde_json::to_value(ToolResult::Ok { detail: None }).unwrap();
        assert_eq!(bare, json!({"status": "ok"}));

        let err = serde_json::to_value(ToolResult::error("unknown tool")).unwrap();
        assert_eq!(err, json!({"status": "error", "reason": "unknown tool"}));
    }

    #[test]
    fn test_response_echoes_call() {
        let call = ToolCall::new("call-7", "deleteAppointment", json!({"appointmentId": "3"}));
        let response = ToolResponse::for_call(&call, ToolResult::ok("appointment deleted"));
        assert_eq!(response.id, "call-7");
        assert_eq!(response.name, "deleteAppointment");
        assert_eq!(response.response_body()["result"]["status"], "ok");
    }

    #[test]
    fn test_tool_call_missing_args_defaults_to_null() {
        let call: ToolCall = serde_json::from_str(r#"{"id":"a","name":"updateProfile"}"#).unwrap();
        assert_eq!(call.args, Value::Null);
    }

    #[test]
    fn test_unknown_event_type() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"usage_metadata"}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }
}
