//! JSON-RPC server over stdin/stdout.
//!
//! Implements the JSON-RPC 2.0 protocol for daemon communication. Requests
//! are read line by line and handled concurrently; all output (responses and
//! notifications) funnels through a single writer task so lines never
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::CacheManager;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::pool::{PoolEvent, WorkerPool};
use crate::service::AudioService;

use super::methods::handle_request;
use super::types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JSONRPC_VERSION,
};

/// Lines queued for stdout.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Time allowed for queued output to drain after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared across all request handlers.
pub struct ServerState {
    service: AudioService,
    /// Daemon configuration.
    pub config: DaemonConfig,
    /// Flips to true when shutdown is requested.
    shutdown: watch::Sender<bool>,
}

impl ServerState {
    /// Opens the cache, starts its sweeper and the worker pool.
    pub async fn new(config: DaemonConfig) -> Self {
        let cache = Arc::new(CacheManager::open(&config).await);
        cache.start_sweeper(config.cache.sweep_interval);
        let pool = Arc::new(WorkerPool::with_audio_processor(config.pool.clone()));
        Self::with_service(config, AudioService::new(cache, pool))
    }

    /// Creates server state around an existing service.
    pub fn with_service(config: DaemonConfig, service: AudioService) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            config,
            shutdown,
        }
    }

    pub fn service(&self) -> &AudioService {
        &self.service
    }

    pub fn cache(&self) -> &CacheManager {
        self.service.cache()
    }

    pub fn pool(&self) -> &WorkerPool {
        self.service.pool()
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Runs the JSON-RPC server, reading from stdin and writing to stdout.
///
/// Returns when stdin closes or a `shutdown` request arrives. Pending pool
/// work is rejected and the cache sweeper is stopped before returning.
pub async fn run_server(state: ServerState) -> Result<()> {
    let state = Arc::new(state);
    let (outbox, outgoing) = mpsc::unbounded_channel::<String>();

    let writer = spawn_writer(outgoing);
    let forwarder = spawn_event_forwarder(state.pool().subscribe(), outbox.clone());

    let mut shutdown = state.shutdown.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("JSON-RPC server started, waiting for requests");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        };

        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading stdin");
                break;
            }
        };

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let state = Arc::clone(&state);
        let outbox = outbox.clone();
        tokio::spawn(async move {
            if let Some(response) = process_request(&line, &state, &outbox).await {
                let _ = outbox.send(response);
            }
        });
    }

    state.pool().shutdown().await;
    state.cache().shutdown();
    forwarder.abort();
    drop(outbox);

    if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::warn!("Timed out flushing pending output");
    }

    tracing::info!("JSON-RPC server stopped");
    Ok(())
}

fn spawn_writer(mut outgoing: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = outgoing.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                tracing::error!(error = %e, "Error writing stdout");
                break;
            }
        }
    })
}

/// Forwards pool events to the client as `task_event` notifications.
fn spawn_event_forwarder(
    mut events: broadcast::Receiver<PoolEvent>,
    outbox: Outbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !send_notification(&outbox, "task_event", event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped task events for a slow client");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Processes a single JSON-RPC request line.
async fn process_request(line: &str, state: &ServerState, outbox: &Outbox) -> Option<String> {
    // Parse JSON
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
            return Some(serde_json::to_string(&error).unwrap_or_default());
        }
    };

    // Validate JSON-RPC version
    if request.jsonrpc != JSONRPC_VERSION {
        let error = JsonRpcErrorResponse::new(
            Some(request.id),
            JsonRpcError::invalid_request("Invalid JSON-RPC version (expected 2.0)"),
        );
        return Some(serde_json::to_string(&error).unwrap_or_default());
    }

    tracing::debug!(method = %request.method, "Handling request");
    let result = handle_request(&request.method, request.params, state, outbox).await;

    let json = match result {
        Ok(response) => serde_json::to_string(&JsonRpcResponse::new(request.id, response)),
        Err(error) => serde_json::to_string(&JsonRpcErrorResponse::new(Some(request.id), error)),
    };
    Some(json.unwrap_or_default())
}

/// Queues a JSON-RPC notification for stdout.
///
/// Returns false once the writer has gone away.
pub fn send_notification<T: serde::Serialize>(
    outbox: &Outbox,
    method: &'static str,
    params: T,
) -> bool {
    let notification = JsonRpcNotification::new(method, params);
    match serde_json::to_string(&notification) {
        Ok(json) => outbox.send(json).is_ok(),
        Err(e) => {
            tracing::error!(method, error = %e, "Failed to serialize notification");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PersistentStore;
    use crate::config::PoolConfig;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn test_state(dir: &TempDir) -> ServerState {
        let config = DaemonConfig {
            cache_path: Some(dir.path().to_path_buf()),
            pool: PoolConfig {
                max_workers: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let cache = Arc::new(CacheManager::new(
            PersistentStore::new(dir.path(), config.cache.ttl, true),
            1 << 20,
        ));
        let pool = Arc::new(WorkerPool::with_audio_processor(config.pool.clone()));
        ServerState::with_service(config, AudioService::new(cache, pool))
    }

    async fn call(state: &ServerState, outbox: &Outbox, request: Value) -> Value {
        let response = process_request(&request.to_string(), state, outbox)
            .await
            .unwrap();
        serde_json::from_str(&response).unwrap()
    }

    fn request(id: i64, method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }

    #[tokio::test]
    async fn server_state_shutdown() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        assert!(!state.is_shutdown());
        state.shutdown();
        assert!(state.is_shutdown());
    }

    #[tokio::test]
    async fn process_invalid_json() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = process_request("not json", &state, &outbox).await.unwrap();
        assert!(response.contains("-32700")); // Parse error
    }

    #[tokio::test]
    async fn process_invalid_version() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let request = r#"{"jsonrpc":"1.0","method":"ping","id":1}"#;
        let response = process_request(request, &state, &outbox).await.unwrap();
        assert!(response.contains("-32600")); // Invalid request
    }

    #[tokio::test]
    async fn process_unknown_method() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = call(&state, &outbox, request(1, "unknown", Value::Null)).await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn ping_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let pong = call(&state, &outbox, request(1, "ping", Value::Null)).await;
        assert_eq!(pong["result"]["status"], "ok");
        assert_eq!(pong["id"], 1);

        let bye = call(&state, &outbox, request(2, "shutdown", Value::Null)).await;
        assert_eq!(bye["result"]["status"], "shutting_down");
        assert!(state.is_shutdown());
    }

    #[tokio::test]
    async fn cache_methods_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();
        let key = json!({"category": "presets", "key": "warm"});

        let set = call(
            &state,
            &outbox,
            request(
                1,
                "cache_set",
                json!({"category": "presets", "key": "warm", "value": {"kind": "json", "value": {"gain": 0.5}}}),
            ),
        )
        .await;
        assert_eq!(set["result"]["status"], "ok");

        let get = call(&state, &outbox, request(2, "cache_get", key.clone())).await;
        assert_eq!(get["result"]["hit"], true);
        assert_eq!(get["result"]["value"]["value"]["gain"], 0.5);

        call(&state, &outbox, request(3, "cache_remove", key.clone())).await;
        let miss = call(&state, &outbox, request(4, "cache_get", key)).await;
        assert_eq!(miss["result"]["hit"], false);
        assert!(miss["result"]["value"].is_null());

        let stats = call(&state, &outbox, request(5, "cache_stats", Value::Null)).await;
        assert_eq!(stats["result"]["hitCount"], 1);
        assert_eq!(stats["result"]["missCount"], 1);
        assert_eq!(stats["result"]["hitRate"], 0.5);
    }

    #[tokio::test]
    async fn cache_clear_empties_store() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        call(
            &state,
            &outbox,
            request(
                1,
                "cache_set",
                json!({"category": "metadata", "key": "m", "value": {"kind": "bytes", "value": [1, 2, 3]}}),
            ),
        )
        .await;
        call(&state, &outbox, request(2, "cache_clear", Value::Null)).await;

        let stats = call(&state, &outbox, request(3, "cache_stats", Value::Null)).await;
        assert_eq!(stats["result"]["count"], 0);
    }

    #[tokio::test]
    async fn bad_category_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = call(
            &state,
            &outbox,
            request(1, "cache_get", json!({"category": "videos", "key": "k"})),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn submit_task_reports_result_as_notification() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, mut outgoing) = mpsc::unbounded_channel();

        let response = call(
            &state,
            &outbox,
            request(
                1,
                "submit_task",
                json!({"type": "normalize-audio", "data": {"channelData": [0.25, -0.5], "targetLevel": 0.0}}),
            ),
        )
        .await;
        let task_id = response["result"]["taskId"].as_u64().unwrap();

        let line = outgoing.recv().await.unwrap();
        let notification: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(notification["method"], "task_result");
        assert_eq!(notification["params"]["taskId"], task_id);
        assert_eq!(notification["params"]["success"], true);
        assert_eq!(
            notification["params"]["report"]["output"]["type"],
            "normalize-audio"
        );

        let stats = call(&state, &outbox, request(2, "pool_stats", Value::Null)).await;
        assert_eq!(stats["result"]["completedTasks"], 1);
    }

    #[tokio::test]
    async fn submit_task_rejects_unknown_type() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = call(
            &state,
            &outbox,
            request(1, "submit_task", json!({"type": "transcode", "data": {}})),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn cancel_unknown_task() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = call(
            &state,
            &outbox,
            request(1, "cancel_task", json!({"taskId": 404})),
        )
        .await;
        assert_eq!(response["result"]["cancelled"], false);
    }

    #[tokio::test]
    async fn task_state_of_unknown_task_is_null() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();

        let response = call(
            &state,
            &outbox,
            request(1, "task_state", json!({"taskId": 77})),
        )
        .await;
        assert_eq!(response["result"]["taskId"], 77);
        assert!(response["result"]["state"].is_null());
    }

    #[tokio::test]
    async fn pool_stats_after_shutdown_is_application_error() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, _rx) = mpsc::unbounded_channel();
        state.pool().shutdown().await;

        let response = call(&state, &outbox, request(1, "pool_stats", Value::Null)).await;
        assert_eq!(response["error"]["code"], -32006);
        assert_eq!(response["error"]["data"]["error_code"], "POOL_SHUTDOWN");
    }

    #[tokio::test]
    async fn pool_events_are_forwarded() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let (outbox, mut outgoing) = mpsc::unbounded_channel();
        let forwarder = spawn_event_forwarder(state.pool().subscribe(), outbox.clone());

        state
            .pool()
            .run(crate::types::TaskPayload::NormalizeAudio {
                channel_data: vec![0.5],
                target_level: -3.0,
            })
            .await
            .unwrap();

        let first: Value = serde_json::from_str(&outgoing.recv().await.unwrap()).unwrap();
        assert_eq!(first["method"], "task_event");
        assert_eq!(first["params"]["event"], "dispatched");
        let second: Value = serde_json::from_str(&outgoing.recv().await.unwrap()).unwrap();
        assert_eq!(second["params"]["event"], "completed");

        forwarder.abort();
    }
}
