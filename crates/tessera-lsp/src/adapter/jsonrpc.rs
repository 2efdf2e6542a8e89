//! JSON-RPC 2.0 message types for LSP communication.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for unsupported server-to-client requests.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code for malformed request parameters.
pub const INVALID_PARAMS: i64 = -32602;

/// Identifier carried by requests and responses.
///
/// Requests issued by this client always use numbers, but servers may use
/// strings for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(formatter, "{id}"),
            Self::String(id) => formatter.write_str(id),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// Unique request identifier.
    pub id: i64,
    /// The method to invoke.
    pub method: String,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with an explicit identifier.
    #[must_use]
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// The method to invoke.
    pub method: String,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome carried by a reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOutcome {
    /// Successful result, possibly `null`.
    Result(Value),
    /// Error object.
    Error(JsonRpcError),
}

/// A reply sent by the client to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// Identifier of the request being answered.
    pub id: RequestId,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl JsonRpcReply {
    /// Builds a successful reply.
    #[must_use]
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: ReplyOutcome::Result(result),
        }
    }

    /// Builds an error reply.
    #[must_use]
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: ReplyOutcome::Error(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A response received from the server.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    /// Request identifier this response corresponds to.
    pub id: Option<RequestId>,
    /// The result on success; `null` when absent.
    pub result: Value,
    /// The error on failure.
    pub error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Any message the server can send, classified by shape.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Method without an id.
    Notification {
        /// Notification method.
        method: String,
        /// Parameters, `null` when absent.
        params: Value,
    },
    /// Method with an id; the server expects a reply.
    Request {
        /// Identifier to echo in the reply.
        id: RequestId,
        /// Request method.
        method: String,
        /// Parameters, `null` when absent.
        params: Value,
    },
}

impl InboundMessage {
    /// Classifies a decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not an object or carries neither a
    /// method nor a response payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_value(value)?;
        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Self::Request {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(method), None) => Ok(Self::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, id) if id.is_some() || raw.result.is_some() || raw.error.is_some() => {
                Ok(Self::Response(JsonRpcResponse {
                    id,
                    result: raw.result.unwrap_or(Value::Null),
                    error: raw.error,
                }))
            }
            (None, _) => Err(serde_json::Error::custom(
                "message has neither a method nor a response payload",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn classify(value: Value) -> InboundMessage {
        InboundMessage::from_value(value).expect("classification failed")
    }

    #[rstest]
    fn serialises_request_with_params() {
        let request = JsonRpcRequest::new(
            1,
            "textDocument/definition",
            Some(json!({"uri": "file:///test.rs"})),
        );
        let json = serde_json::to_value(&request).expect("serialization failed");

        assert_eq!(
            json,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "textDocument/definition",
                "params": {"uri": "file:///test.rs"}
            })
        );
    }

    #[rstest]
    fn serialises_notification_without_id() {
        let notification = JsonRpcNotification::new("exit", None);
        let json = serde_json::to_value(&notification).expect("serialization failed");

        assert_eq!(json, json!({"jsonrpc": "2.0", "method": "exit"}));
    }

    #[rstest]
    fn null_results_are_kept_in_replies() {
        let reply = JsonRpcReply::result(RequestId::String(String::from("a")), Value::Null);
        let json = serde_json::to_value(&reply).expect("serialization failed");

        assert_eq!(json, json!({"jsonrpc": "2.0", "id": "a", "result": null}));
    }

    #[rstest]
    fn error_replies_carry_code() {
        let reply = JsonRpcReply::error(RequestId::Number(7), METHOD_NOT_FOUND, "unsupported");
        let json = serde_json::to_value(&reply).expect("serialization failed");

        assert_eq!(json["error"]["code"], json!(-32601));
        assert!(json.get("result").is_none());
    }

    #[rstest]
    fn classifies_success_response() {
        match classify(json!({"jsonrpc": "2.0", "id": 1, "result": {"contents": "x"}})) {
            InboundMessage::Response(response) => {
                assert_eq!(response.id, Some(RequestId::Number(1)));
                assert!(response.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[rstest]
    fn classifies_null_result_response() {
        match classify(json!({"jsonrpc": "2.0", "id": 4, "result": null})) {
            InboundMessage::Response(response) => assert_eq!(response.result, Value::Null),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[rstest]
    fn classifies_error_response() {
        let message = classify(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "Invalid params", "data": {"details": "x"}}
        }));
        let InboundMessage::Response(response) = message else {
            panic!("expected response");
        };
        let error = response.error.expect("error missing");
        assert_eq!(error.code, -32602);
        assert!(error.data.is_some());
    }

    #[rstest]
    fn classifies_notifications_and_requests() {
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {}})),
            InboundMessage::Notification { .. }
        ));
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "id": "t1", "method": "window/workDoneProgress/create"})),
            InboundMessage::Request { id: RequestId::String(_), .. }
        ));
    }

    #[rstest]
    fn rejects_shapeless_messages() {
        assert!(InboundMessage::from_value(json!({"jsonrpc": "2.0"})).is_err());
        assert!(InboundMessage::from_value(json!([1, 2])).is_err());
    }
}
