//! JSON-RPC types for the daemon protocol.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::error::{DaemonError, ErrorCode};
use crate::pool::PoolEvent;
use crate::types::{CacheCategory, CacheValue, TaskId, TaskPayload, TaskReport, TaskState};

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Integer(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// A JSON-RPC request wrapper.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC response wrapper.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn new(id: RequestId, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// A JSON-RPC error response.
#[derive(Debug, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonRpcErrorData>,
}

/// Extended error data for application-specific errors.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

impl JsonRpcError {
    /// Creates a parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method not found error (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    /// Creates an invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

/// Application error codes live in the -32000 server range.
fn rpc_code(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::StorageError => -32000,
        ErrorCode::TaskTimeout => -32001,
        ErrorCode::TaskExecutionFailed => -32002,
        ErrorCode::WorkerFault => -32003,
        ErrorCode::TaskCancelled => -32004,
        ErrorCode::QueueCleared => -32005,
        ErrorCode::PoolShutdown => -32006,
        ErrorCode::InvalidAudio => -32007,
        ErrorCode::InvalidPayload => -32008,
    }
}

impl From<&DaemonError> for JsonRpcError {
    fn from(err: &DaemonError) -> Self {
        Self {
            code: rpc_code(err.code),
            message: err.code.description().to_string(),
            data: Some(JsonRpcErrorData {
                error_code: err.code.as_str().to_string(),
                details: Some(err.message.clone()),
                recovery_hint: Some(err.code.recovery_hint().to_string()),
            }),
        }
    }
}

// ============================================================================
// Cache methods
// ============================================================================

/// Parameters addressing one cache entry.
#[derive(Debug, Deserialize)]
pub struct CacheKeyParams {
    pub category: CacheCategory,
    pub key: String,
}

/// Parameters for `cache_set`.
#[derive(Debug, Deserialize)]
pub struct CacheSetParams {
    pub category: CacheCategory,
    pub key: String,
    pub value: CacheValue,
}

/// Result of `cache_get`. `value` is null on a miss.
#[derive(Debug, Serialize)]
pub struct CacheGetResult {
    pub hit: bool,
    pub value: Option<CacheValue>,
}

/// Result of `cache_stats`.
pub type CacheStatsResult = CacheStats;

// ============================================================================
// Pool methods
// ============================================================================

/// Parameters for `submit_task`: a tagged task payload,
/// e.g. `{"type": "normalize-audio", "data": {"channelData": [...]}}`.
pub type SubmitTaskParams = TaskPayload;

/// Result of `submit_task`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResult {
    pub task_id: TaskId,
}

/// Parameters for `cancel_task`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskParams {
    pub task_id: TaskId,
}

/// Result of `cancel_task`.
#[derive(Debug, Serialize)]
pub struct CancelTaskResult {
    pub cancelled: bool,
}

/// Parameters for `task_state`.
pub type TaskStateParams = CancelTaskParams;

/// Result of `task_state`. `state` is null once the task has finished.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateResult {
    pub task_id: TaskId,
    pub state: Option<TaskState>,
}

// ============================================================================
// Notifications
// ============================================================================

/// A JSON-RPC notification (no id field).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<T: Serialize> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> JsonRpcNotification<T> {
    pub fn new(method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Params of the `task_event` notification.
pub type TaskEventParams = PoolEvent;

/// Final outcome of a submitted task, sent as `task_result`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultParams {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl TaskResultParams {
    pub fn new(task_id: TaskId, result: crate::error::Result<TaskReport>) -> Self {
        match result {
            Ok(report) => Self {
                task_id,
                success: true,
                report: Some(report),
                error: None,
            },
            Err(e) => Self {
                task_id,
                success: false,
                report: None,
                error: Some(JsonRpcError::from(&e)),
            },
        }
    }
}
