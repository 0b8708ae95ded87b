//! JSON-RPC module for daemon communication.
//!
//! Provides the JSON-RPC 2.0 server implementation for:
//! - `ping`: Health check
//! - `shutdown`: Graceful shutdown
//! - `cache_get`, `cache_set`, `cache_remove`, `cache_clear`, `cache_stats`:
//!   Tiered cache access
//! - `submit_task`, `cancel_task`, `task_state`, `pool_stats`: Worker pool access
//!
//! Notifications:
//! - `task_event`: Pool lifecycle events (dispatched, completed, retrying, ...)
//! - `task_result`: Final outcome of a task submitted with `submit_task`

pub mod methods;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use server::{run_server, send_notification, Outbox, ServerState};
pub use types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
