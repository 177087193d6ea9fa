//! JSON-RPC 2.0 signaling protocol types
//!
//! One UTF-8 text frame carries one [`Envelope`]: a call (has `id` and
//! `method`), a notification (`method`, no `id`), a success response
//! (`id`, `result`) or an error response (`id`, `error`).

use crate::rtc::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names exchanged between peers and the hub
pub mod methods {
    /// Peer → hub: fetch the recommended RTC configuration
    pub const GET_RECOMMENDED_CONFIGURATION: &str = "getRecommendedRPCConfiguration";

    /// Peer → hub: fan an offer out to every ready peer
    pub const BROADCAST_OFFER: &str = "broadcastOffer";

    /// Peer → hub: route an ICE candidate
    pub const SEND_CANDIDATE_TO: &str = "sendCandidateTo";

    /// Hub → peer: deliver an offer, expect an answer back
    pub const SEND_OFFER: &str = "sendOffer";

    /// Hub → peer: deliver an ICE candidate (notification)
    pub const SEND_CANDIDATE: &str = "sendCandidate";
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Signaling-specific error codes

    /// Caller has not completed its first exchange yet
    pub const PEER_NOT_READY: i32 = -32001;

    /// Offer could not be applied
    pub const OFFER_INVALID: i32 = -32002;

    /// Offer dropped by the impolite side of a collision
    pub const OFFER_IGNORED: i32 = -32010;
}

/// Opaque identifier of a hub connection slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// JSON-RPC 2.0 request (call when `id` is set, notification otherwise)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: Value,

    /// Request ID this response corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Create an error object without data
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Unknown method
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    /// Params failed to decode for a known method
    pub fn invalid_params(method: &str, err: impl fmt::Display) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params for {}: {}", method, err),
        )
    }

    /// Server-side failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

impl From<ErrorObject> for Error {
    fn from(err: ErrorObject) -> Self {
        Error::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// One parsed unit on the signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Request expecting exactly one response
    Call {
        /// Correlation id
        id: Value,
        /// Method name
        method: String,
        /// Method parameters
        params: Value,
    },

    /// Fire-and-forget request
    Notification {
        /// Method name
        method: String,
        /// Method parameters
        params: Value,
    },

    /// Successful reply to a call
    Response {
        /// Correlation id of the call
        id: Value,
        /// Result payload
        result: Value,
    },

    /// Error reply to a call
    Error {
        /// Correlation id of the call (null when the call could not be read)
        id: Value,
        /// Error details
        error: ErrorObject,
    },
}

impl Envelope {
    /// Build a call envelope with a numeric correlation id
    pub fn call(id: u64, method: &str, params: Value) -> Self {
        Envelope::Call {
            id: Value::from(id),
            method: method.to_string(),
            params,
        }
    }

    /// Build a notification envelope
    pub fn notification(method: &str, params: Value) -> Self {
        Envelope::Notification {
            method: method.to_string(),
            params,
        }
    }

    /// Parse an envelope from a text frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the frame is not a JSON object, the
    /// version tag is missing or wrong, or the shape matches none of the
    /// four envelope kinds.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("Failed to parse JSON: {}", e)))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(Error::Protocol(format!(
                    "Envelope must be a JSON object, got {}",
                    kind_of(&other)
                )))
            }
        };

        match object.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "Unsupported jsonrpc version: {}",
                    other
                )))
            }
            None => return Err(Error::Protocol("Missing jsonrpc version".to_string())),
        }

        if let Some(method) = object.remove("method") {
            let method = match method {
                Value::String(method) => method,
                other => {
                    return Err(Error::Protocol(format!(
                        "Method must be a string, got {}",
                        kind_of(&other)
                    )))
                }
            };
            let params = object.remove("params").unwrap_or(Value::Null);
            return Ok(match take_id(&mut object) {
                Some(id) => Envelope::Call { id, method, params },
                None => Envelope::Notification { method, params },
            });
        }

        let id = take_id(&mut object).unwrap_or(Value::Null);

        if let Some(error) = object.remove("error") {
            let error: ErrorObject = serde_json::from_value(error)
                .map_err(|e| Error::Protocol(format!("Malformed error object: {}", e)))?;
            return Ok(Envelope::Error { id, error });
        }

        if let Some(result) = object.remove("result") {
            if id.is_null() {
                return Err(Error::Protocol("Response without id".to_string()));
            }
            return Ok(Envelope::Response { id, result });
        }

        Err(Error::Protocol(
            "Envelope is neither a request nor a response".to_string(),
        ))
    }

    /// Serialize the envelope to a text frame
    pub fn to_json(&self) -> Result<String> {
        let text = match self {
            Envelope::Call { id, method, params } => serde_json::to_string(&JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: method.clone(),
                params: params.clone(),
                id: Some(id.clone()),
            }),
            Envelope::Notification { method, params } => serde_json::to_string(&JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: method.clone(),
                params: params.clone(),
                id: None,
            }),
            Envelope::Response { id, result } => serde_json::to_string(&JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: result.clone(),
                id: id.clone(),
            }),
            Envelope::Error { id, error } => serde_json::to_string(&JsonRpcError {
                jsonrpc: JSONRPC_VERSION.to_string(),
                error: error.clone(),
                id: id.clone(),
            }),
        };

        text.map_err(|e| {
            Error::Serialization(format!("Failed to serialize JSON-RPC envelope: {}", e))
        })
    }

    /// Method name for calls and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Call { method, .. } | Envelope::Notification { method, .. } => {
                Some(method.as_str())
            }
            _ => None,
        }
    }
}

fn take_id(object: &mut Map<String, Value>) -> Option<Value> {
    object.remove("id").filter(|id| !id.is_null())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decodes an inbound `(method, params)` pair into a typed request
pub trait DecodeRequest: Sized + Send + 'static {
    /// Decode or produce the error object to reply with
    fn decode(method: &str, params: Value) -> std::result::Result<Self, ErrorObject>;
}

fn decode_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Value,
) -> std::result::Result<T, ErrorObject> {
    serde_json::from_value(params).map_err(|e| ErrorObject::invalid_params(method, e))
}

/// Parameters for broadcastOffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastOfferParams {
    /// Local offer to fan out
    pub description: SessionDescription,
}

/// One answer collected by broadcastOffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOfferEntry {
    /// Peer that answered
    pub from_id: PeerId,

    /// The answering peer's description
    pub description: SessionDescription,
}

/// Parameters for sendOffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendOfferParams {
    /// Peer that broadcast the offer
    pub from_id: PeerId,

    /// The offer
    pub description: SessionDescription,
}

/// Result of sendOffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendOfferResult {
    /// Peer the answer is addressed to
    pub to_id: PeerId,

    /// The answer
    pub description: SessionDescription,
}

/// Parameters for sendCandidateTo and sendCandidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateParams {
    /// ICE candidate
    pub candidate: IceCandidate,

    /// Addressed peer
    pub to_id: PeerId,
}

/// Requests a peer may send to the hub
#[derive(Debug, Clone, PartialEq)]
pub enum HubRequest {
    /// getRecommendedRPCConfiguration
    GetRecommendedConfiguration,
    /// broadcastOffer
    BroadcastOffer(BroadcastOfferParams),
    /// sendCandidateTo
    SendCandidateTo(CandidateParams),
}

impl HubRequest {
    /// Wire method name
    pub fn method_name(&self) -> &'static str {
        match self {
            HubRequest::GetRecommendedConfiguration => methods::GET_RECOMMENDED_CONFIGURATION,
            HubRequest::BroadcastOffer(_) => methods::BROADCAST_OFFER,
            HubRequest::SendCandidateTo(_) => methods::SEND_CANDIDATE_TO,
        }
    }
}

impl DecodeRequest for HubRequest {
    fn decode(method: &str, params: Value) -> std::result::Result<Self, ErrorObject> {
        match method {
            methods::GET_RECOMMENDED_CONFIGURATION => Ok(HubRequest::GetRecommendedConfiguration),
            methods::BROADCAST_OFFER => decode_params(method, params).map(HubRequest::BroadcastOffer),
            methods::SEND_CANDIDATE_TO => {
                decode_params(method, params).map(HubRequest::SendCandidateTo)
            }
            _ => Err(ErrorObject::method_not_found(method)),
        }
    }
}

/// Requests the hub may send to a peer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerRequest {
    /// sendOffer
    SendOffer(SendOfferParams),
    /// sendCandidate
    SendCandidate(CandidateParams),
}

impl PeerRequest {
    /// Wire method name
    pub fn method_name(&self) -> &'static str {
        match self {
            PeerRequest::SendOffer(_) => methods::SEND_OFFER,
            PeerRequest::SendCandidate(_) => methods::SEND_CANDIDATE,
        }
    }
}

impl DecodeRequest for PeerRequest {
    fn decode(method: &str, params: Value) -> std::result::Result<Self, ErrorObject> {
        match method {
            methods::SEND_OFFER => decode_params(method, params).map(PeerRequest::SendOffer),
            methods::SEND_CANDIDATE => decode_params(method, params).map(PeerRequest::SendCandidate),
            _ => Err(ErrorObject::method_not_found(method)),
        }
    }
}

/// Request type for channels that expose no methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRequest {}

impl DecodeRequest for NoRequest {
    fn decode(method: &str, _params: Value) -> std::result::Result<Self, ErrorObject> {
        Err(ErrorObject::method_not_found(method))
    }
}
