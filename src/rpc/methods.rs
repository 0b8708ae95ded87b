//! JSON-RPC method handlers.
//!
//! Implements the handlers for all supported JSON-RPC methods.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::server::{send_notification, Outbox, ServerState};
use super::types::{
    CacheGetResult, CacheKeyParams, CacheSetParams, CancelTaskParams, CancelTaskResult,
    JsonRpcError, SubmitTaskParams, SubmitTaskResult, TaskResultParams, TaskStateParams,
    TaskStateResult,
};

type MethodResult = Result<serde_json::Value, JsonRpcError>;

/// Handles a JSON-RPC method call.
pub async fn handle_request(
    method: &str,
    params: serde_json::Value,
    state: &ServerState,
    outbox: &Outbox,
) -> MethodResult {
    match method {
        "ping" => handle_ping(),
        "shutdown" => handle_shutdown(state),
        "cache_get" => handle_cache_get(params, state).await,
        "cache_set" => handle_cache_set(params, state).await,
        "cache_remove" => handle_cache_remove(params, state).await,
        "cache_clear" => handle_cache_clear(state).await,
        "cache_stats" => to_result(state.cache().stats().await),
        "submit_task" => handle_submit_task(params, state, outbox),
        "cancel_task" => handle_cancel_task(params, state).await,
        "task_state" => handle_task_state(params, state).await,
        "pool_stats" => handle_pool_stats(state).await,
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_result<T: Serialize>(value: T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Handles the ping method for health checks.
fn handle_ping() -> MethodResult {
    Ok(serde_json::json!({ "status": "ok" }))
}

/// Handles the shutdown method.
fn handle_shutdown(state: &ServerState) -> MethodResult {
    state.shutdown();
    Ok(serde_json::json!({ "status": "shutting_down" }))
}

async fn handle_cache_get(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: CacheKeyParams = parse_params(params)?;
    let value = state.cache().get(params.category, &params.key).await;
    to_result(CacheGetResult {
        hit: value.is_some(),
        value,
    })
}

async fn handle_cache_set(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: CacheSetParams = parse_params(params)?;
    state
        .cache()
        .set(params.category, &params.key, params.value)
        .await;
    Ok(serde_json::json!({ "status": "ok" }))
}

async fn handle_cache_remove(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: CacheKeyParams = parse_params(params)?;
    state.cache().remove(params.category, &params.key).await;
    Ok(serde_json::json!({ "status": "ok" }))
}

async fn handle_cache_clear(state: &ServerState) -> MethodResult {
    state.cache().clear().await;
    Ok(serde_json::json!({ "status": "ok" }))
}

/// Queues a task and answers with its id right away. The outcome follows as
/// a `task_result` notification.
fn handle_submit_task(
    params: serde_json::Value,
    state: &ServerState,
    outbox: &Outbox,
) -> MethodResult {
    let payload: SubmitTaskParams = parse_params(params)?;
    let handle = state.pool().submit(payload);
    let task_id = handle.id();

    let outbox = outbox.clone();
    tokio::spawn(async move {
        let result = handle.wait().await;
        send_notification(&outbox, "task_result", TaskResultParams::new(task_id, result));
    });

    to_result(SubmitTaskResult { task_id })
}

async fn handle_cancel_task(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: CancelTaskParams = parse_params(params)?;
    let cancelled = state.pool().cancel(params.task_id).await;
    to_result(CancelTaskResult { cancelled })
}

async fn handle_task_state(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: TaskStateParams = parse_params(params)?;
    let task_state = state.pool().task_state(params.task_id).await;
    to_result(TaskStateResult {
        task_id: params.task_id,
        state: task_state,
    })
}

async fn handle_pool_stats(state: &ServerState) -> MethodResult {
    match state.pool().stats().await {
        Ok(stats) => to_result(stats),
        Err(e) => Err(JsonRpcError::from(&e)),
    }
}
