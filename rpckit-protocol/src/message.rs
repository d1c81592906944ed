//! JSON-RPC 2.0 message types.

use crate::error::{ErrorCode, ProtocolError};
use crate::JSONRPC_VERSION;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Request identifier: a number or a string.
///
/// A request without an id is a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// Request parameters: either positional or keyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    /// Converts an arbitrary JSON value into parameters.
    ///
    /// `null` means "no parameters"; scalars are rejected because JSON-RPC
    /// only allows structured parameter containers.
    pub fn from_value(value: Value) -> Result<Option<Self>, ProtocolError> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(Params::Array(items))),
            Value::Object(map) => Ok(Some(Params::Object(map))),
            other => Err(ProtocolError::InvalidMessage(format!(
                "params must be an array or an object, got {}",
                other
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Params::Array(items) => Value::Array(items),
            Params::Object(map) => Value::Object(map),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Params::Array(items) => items.len(),
            Params::Object(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("JSON-RPC error {}: {message}", code.0)]
pub struct WireError {
    /// Error code.
    pub code: ErrorCode,

    /// Human-readable error message.
    pub message: String,

    /// Additional error details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }
}

/// Request (or notification) message.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id; `None` marks a notification.
    pub id: Option<Id>,

    /// Method to invoke.
    pub method: String,

    /// Method parameters.
    pub params: Option<Params>,
}

impl Request {
    /// Creates a call that expects a response.
    pub fn call(id: impl Into<Id>, method: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params: None,
        }
    }

    /// Creates a notification; the peer sends no response.
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Response message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request this answers. `None` only when the request id could
    /// not be determined (e.g. parse errors).
    pub id: Option<Id>,

    /// Either the result value or the error object, never both.
    pub outcome: Result<Value, WireError>,
}

impl Response {
    pub fn ok(id: impl Into<Id>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Ok(result),
        }
    }

    pub fn error(id: Option<Id>, error: WireError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error_object(&self) -> Option<&WireError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<Value, WireError> {
        self.outcome
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Returns the id of the message, if any.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Message::Request(r) => r.id.as_ref(),
            Message::Response(r) => r.id.as_ref(),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

/// Flat wire representation shared by every message kind.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMessage {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Params>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

/// Distinguishes `"result": null` from an absent `result` field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RawMessage {
    pub(crate) fn into_message(self) -> Result<Message, ProtocolError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::InvalidMessage(format!(
                "unsupported jsonrpc version {:?}",
                self.jsonrpc
            )));
        }

        if let Some(method) = self.method {
            if self.result.is_some() || self.error.is_some() {
                return Err(ProtocolError::InvalidMessage(
                    "request must not carry result or error".to_string(),
                ));
            }
            return Ok(Message::Request(Request {
                id: self.id,
                method,
                params: self.params,
            }));
        }

        let outcome = match (self.result, self.error) {
            (Some(_), Some(_)) => {
                return Err(ProtocolError::InvalidMessage(
                    "response carries both result and error".to_string(),
                ))
            }
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            (None, None) => {
                return Err(ProtocolError::InvalidMessage(
                    "message has neither method, result nor error".to_string(),
                ))
            }
        };

        Ok(Message::Response(Response {
            id: self.id,
            outcome,
        }))
    }
}

#[derive(Serialize)]
struct RequestOut<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Params>,
}

#[derive(Serialize)]
struct ResponseOut<'a> {
    jsonrpc: &'static str,
    id: Option<&'a Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a WireError>,
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RequestOut {
            jsonrpc: JSONRPC_VERSION,
            id: self.id.as_ref(),
            method: &self.method,
            params: self.params.as_ref(),
        }
        .serialize(serializer)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ResponseOut {
            jsonrpc: JSONRPC_VERSION,
            id: self.id.as_ref(),
            result: self.outcome.as_ref().ok(),
            error: self.outcome.as_ref().err(),
        }
        .serialize(serializer)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Message::Request(r) => r.serialize(serializer),
            Message::Response(r) => r.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawMessage::deserialize(deserializer)?
            .into_message()
            .map_err(D::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Message::deserialize(deserializer)? {
            Message::Request(r) => Ok(r),
            Message::Response(_) => Err(D::Error::custom("expected a request, got a response")),
        }
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Message::deserialize(deserializer)? {
            Message::Response(r) => Ok(r),
            Message::Request(_) => Err(D::Error::custom("expected a response, got a request")),
        }
    }
}
