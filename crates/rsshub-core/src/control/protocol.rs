//! Control protocol definitions
//!
//! JSON-RPC style request/response objects, one per line.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON-RPC style request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC style response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Uuid, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// Error codes
pub const ERR_PARSE: i32 = -32700;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

// Method names
pub mod methods {
    pub const PING: &str = "ping";
    pub const STATUS: &str = "status";

    pub const INTERVAL_GET: &str = "interval.get";
    pub const INTERVAL_SET: &str = "interval.set";

    pub const WORKERS_GET: &str = "workers.get";
    pub const WORKERS_SET: &str = "workers.set";
}

// Parameter structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIntervalParams {
    /// Duration text such as `30s` or `1h30m`
    pub duration: String,
}

/// Signed so that negative counts reach the server and get a proper rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetWorkersParams {
    pub workers: i64,
}

// Response structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub interval: String,
    pub workers: usize,
    pub live_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalResponse {
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: usize,
}

/// Result of a setter: the value before and after the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

impl<T: PartialEq> Change<T> {
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}
