//! JSON-RPC 2.0 envelopes and the wire shapes of results that carry binary
//! data.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use nanowrite::{BatchResult, CameraFrame, JobState, NanoWriteError, ScreenshotResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Server-defined codes, one per [`NanoWriteError`] kind.
pub fn fault_code(error: &NanoWriteError) -> i64 {
    match error {
        NanoWriteError::VerificationTimeout(_) => -32001,
        NanoWriteError::AmbiguousState(_) => -32002,
        NanoWriteError::ParseFailure(_) => -32003,
        NanoWriteError::TargetUnavailable(_) => -32004,
        NanoWriteError::NotReady(_) => -32005,
        NanoWriteError::ExecutionError(_) => -32006,
        NanoWriteError::InvalidArgument(_) => -32007,
        NanoWriteError::Config(_) => -32008,
        NanoWriteError::PlatformError(_) => -32009,
        NanoWriteError::UnsupportedPlatform(_) => -32010,
        NanoWriteError::Io(_) => -32011,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: json!(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcFault {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(error: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {error}"))
    }

    /// The [`NanoWriteError`] kind behind the fault, if it came from one.
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }
}

impl From<&NanoWriteError> for RpcFault {
    fn from(error: &NanoWriteError) -> Self {
        Self {
            code: fault_code(error),
            message: error.to_string(),
            data: Some(json!({ "kind": error.kind() })),
        }
    }
}

impl From<NanoWriteError> for RpcFault {
    fn from(error: NanoWriteError) -> Self {
        Self::from(&error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, fault: RpcFault) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(fault),
            id,
        }
    }
}

pub fn encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn decode(data: &str) -> Result<Vec<u8>, RpcFault> {
    general_purpose::STANDARD
        .decode(data)
        .map_err(|e| RpcFault::new(INTERNAL_ERROR, format!("bad base64 payload: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraImage {
    /// Base64 TIFF
    pub data: String,
    pub metadata: String,
    pub captured_at: DateTime<Utc>,
}

impl From<CameraFrame> for CameraImage {
    fn from(frame: CameraFrame) -> Self {
        Self {
            data: encode(&frame.data),
            metadata: frame.metadata,
            captured_at: frame.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    /// Base64 RGBA pixels
    pub data: String,
    pub width: u32,
    pub height: u32,
}

impl From<ScreenshotResult> for Screenshot {
    fn from(shot: ScreenshotResult) -> Self {
        Self {
            data: encode(&shot.image_data),
            width: shot.width,
            height: shot.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub start: String,
    pub state: JobState,
    /// File name to base64 contents
    pub artifacts: BTreeMap<String, String>,
}

impl From<BatchResult> for BatchOutcome {
    fn from(result: BatchResult) -> Self {
        Self {
            start: result.start,
            state: result.state,
            artifacts: result
                .artifacts
                .into_iter()
                .map(|(name, data)| (name, encode(&data)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes_are_distinct() {
        let errors = [
            NanoWriteError::VerificationTimeout(String::new()),
            NanoWriteError::AmbiguousState(String::new()),
            NanoWriteError::ParseFailure(String::new()),
            NanoWriteError::TargetUnavailable(String::new()),
            NanoWriteError::NotReady(String::new()),
            NanoWriteError::ExecutionError(String::new()),
            NanoWriteError::InvalidArgument(String::new()),
            NanoWriteError::Config(String::new()),
            NanoWriteError::PlatformError(String::new()),
            NanoWriteError::UnsupportedPlatform(String::new()),
            NanoWriteError::Io(std::io::Error::other("disk")),
        ];
        let mut codes: Vec<i64> = errors.iter().map(fault_code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| (-32099..=-32000).contains(c)));
    }

    #[test]
    fn test_fault_carries_error_kind() {
        let fault = RpcFault::from(NanoWriteError::NotReady("busy".into()));
        assert_eq!(fault.code, -32005);
        assert_eq!(fault.kind(), Some("not_ready"));
        assert!(fault.message.contains("busy"));
    }

    #[test]
    fn test_failure_response_omits_result() {
        let response = RpcResponse::failure(json!(7), RpcFault::method_not_found("nope"));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!(METHOD_NOT_FOUND));
        assert_eq!(value["id"], json!(7));
    }
}
