//! JSON-RPC 2.0 message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ServiceError, ServiceResult};

/// JSON-RPC 2.0 protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier, either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// A fresh id for an outgoing request.
    pub fn new_unique() -> Self {
        RequestId::String(uuid::Uuid::new_v4().to_string())
    }

    fn from_value(value: &Value) -> ServiceResult<Self> {
        match value {
            Value::String(s) => Ok(RequestId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(RequestId::Number).ok_or_else(|| {
                ServiceError::ParseError(format!("'id' must be an integer, got {n}"))
            }),
            other => Err(ServiceError::ParseError(format!(
                "'id' must be a string or integer, got {other}"
            ))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RequestId::String(s) => Value::String(s.clone()),
            RequestId::Number(n) => Value::from(*n),
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// Error object within a ResponseError message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("code".to_string(), Value::from(self.code));
        map.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            map.insert("data".to_string(), data.clone());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    ResponseError,
    Event,
}

/// A JSON-RPC message.
///
/// `id` is present exactly for requests, responses and response errors;
/// `method` exactly for requests and events. The constructors are the only
/// way to build one, so those invariants always hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    id: Option<RequestId>,
    method: Option<String>,
    contents: Value,
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            message_type: MessageType::Request,
            id: Some(id),
            method: Some(method.into()),
            contents: params,
        }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self {
            message_type: MessageType::Response,
            id: Some(id),
            method: None,
            contents: result,
        }
    }

    pub fn response_error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            message_type: MessageType::ResponseError,
            id: Some(id),
            method: None,
            contents: error.to_value(),
        }
    }

    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self {
            message_type: MessageType::Event,
            id: None,
            method: Some(method.into()),
            contents: params,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// `params`, `result` or `error`, depending on the message type.
    pub fn contents(&self) -> &Value {
        &self.contents
    }

    pub fn into_contents(self) -> Value {
        self.contents
    }

    /// Decode the contents into `T`.
    pub fn typed_contents<T: DeserializeOwned>(&self) -> ServiceResult<T> {
        serde_json::from_value(self.contents.clone()).map_err(ServiceError::Json)
    }

    /// The error object of a ResponseError.
    pub fn error_object(&self) -> Option<ErrorObject> {
        match self.message_type {
            MessageType::ResponseError => serde_json::from_value(self.contents.clone()).ok(),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "jsonrpc".to_string(),
            Value::String(JSONRPC_VERSION.to_string()),
        );
        if let Some(id) = &self.id {
            map.insert("id".to_string(), id.to_value());
        }
        if let Some(method) = &self.method {
            map.insert("method".to_string(), Value::String(method.clone()));
        }
        let key = match self.message_type {
            MessageType::Request | MessageType::Event => "params",
            MessageType::Response => "result",
            MessageType::ResponseError => "error",
        };
        map.insert(key.to_string(), self.contents.clone());
        Value::Object(map)
    }

    /// Serialize to JSON-RPC 2.0 text.
    pub fn serialize(&self) -> String {
        self.to_value().to_string()
    }

    /// Parse JSON-RPC 2.0 text.
    pub fn deserialize(text: &str) -> ServiceResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ServiceError::ParseError(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> ServiceResult<Self> {
        let Value::Object(mut obj) = value else {
            return Err(ServiceError::ParseError(
                "message must be a JSON object".to_string(),
            ));
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(ServiceError::ParseError(format!(
                    "unsupported jsonrpc version {other}"
                )))
            }
            None => {
                return Err(ServiceError::ParseError(
                    "missing 'jsonrpc' member".to_string(),
                ))
            }
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(RequestId::from_value(v)?),
        };

        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(other) => {
                return Err(ServiceError::ParseError(format!(
                    "'method' must be a string, got {other}"
                )))
            }
        };

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::request(
                id,
                method,
                obj.remove("params").unwrap_or(Value::Null),
            )),
            (Some(id), None) => {
                if let Some(error) = obj.remove("error") {
                    if !error.is_object() {
                        return Err(ServiceError::ParseError(
                            "'error' must be an object".to_string(),
                        ));
                    }
                    Ok(Self {
                        message_type: MessageType::ResponseError,
                        id: Some(id),
                        method: None,
                        contents: error,
                    })
                } else if let Some(result) = obj.remove("result") {
                    Ok(Self::response(id, result))
                } else {
                    Err(ServiceError::ParseError(format!(
                        "message {id} has no 'method', 'result' or 'error'"
                    )))
                }
            }
            (None, Some(method)) => Ok(Self::event(
                method,
                obj.remove("params").unwrap_or(Value::Null),
            )),
            (None, None) => Err(ServiceError::ParseError(
                "missing 'method' member".to_string(),
            )),
        }
    }
}
