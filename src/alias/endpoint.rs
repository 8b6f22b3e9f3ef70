//! The alias RPC endpoint: an authenticated loopback JSON-RPC 2.0 service
//! exposing curated host calls to the container.
//!
//! Bound to `127.0.0.1:0` by default; the kernel-chosen port is published to
//! the container through environment variables together with the bearer
//! token and session id. Calls run through the [`ShellExecutor`] under a
//! bounded semaphore.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;

use crate::alias::entry::AliasEntry;
use crate::alias::executor::{DEFAULT_CALL_TIMEOUT, ShellExecutor};
use crate::error::AliasError;

/// Path the JSON-RPC service is mounted at.
pub const RPC_PATH: &str = "/mcp";

/// Default bound on concurrently executing calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

pub const CODE_UNKNOWN_TOOL: i64 = -32001;
pub const CODE_BUSY: i64 = -32002;
pub const CODE_EXEC_FAILED: i64 = -32003;
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;

const TOKEN_BYTES: usize = 32;
const SESSION_ID_BYTES: usize = 16;

/// Endpoint tuning knobs.
#[derive(Debug, Clone)]
pub struct AliasEndpointConfig {
    pub bind: SocketAddr,
    pub max_concurrent: usize,
    pub call_timeout: Duration,
}

impl Default for AliasEndpointConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct EndpointState {
    token: Arc<String>,
    entries: Arc<HashMap<String, AliasEntry>>,
    executor: Arc<ShellExecutor>,
    slots: Arc<Semaphore>,
}

/// A running alias endpoint. Shutdown is idempotent.
pub struct AliasEndpoint {
    addr: SocketAddr,
    token: String,
    session_id: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AliasEndpoint {
    /// Bind the listener, generate credentials, and spawn the server.
    pub async fn start(
        entries: HashMap<String, AliasEntry>,
        executor: ShellExecutor,
        config: AliasEndpointConfig,
    ) -> Result<Self, AliasError> {
        let token = random_b64(TOKEN_BYTES);
        let session_id = random_b64(SESSION_ID_BYTES);

        let state = EndpointState {
            token: Arc::new(token.clone()),
            entries: Arc::new(entries),
            executor: Arc::new(executor.with_timeout(config.call_timeout)),
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
        };

        let app = Router::new()
            .route(RPC_PATH, post(rpc_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .map_err(|e| AliasError::Startup {
                reason: format!("failed to bind {}: {e}", config.bind),
            })?;
        let addr = listener.local_addr().map_err(|e| AliasError::Startup {
            reason: format!("no local address: {e}"),
        })?;

        tracing::debug!(%addr, "alias endpoint listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %e, "alias endpoint error");
            }
        });

        Ok(Self {
            addr,
            token,
            session_id,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Bound loopback address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Endpoint URL as reachable from inside the container via `host`.
    pub fn url_for_host(&self, host: &str) -> String {
        format!("http://{host}:{}{RPC_PATH}", self.addr.port())
    }

    /// Signal graceful shutdown and wait for the server task. Safe to call
    /// more than once.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AliasEndpoint {
    fn drop(&mut self) {
        // Scoped teardown: if shutdown() was never awaited, at least signal
        // the server task so it does not outlive the sandbox.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn random_b64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Bearer auth with constant-time comparison. Anything else is 401.
async fn auth_middleware(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(header) = headers.get("authorization")
        && let Ok(value) = header.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && bool::from(token.as_bytes().ct_eq(state.token.as_bytes()))
    {
        return next.run(request).await;
    }

    (StatusCode::UNAUTHORIZED, "Invalid or missing bearer token").into_response()
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    args: Vec<String>,
}

async fn rpc_handler(State(state): State<EndpointState>, Json(body): Json<Value>) -> Json<Value> {
    let request: RpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error(Value::Null, CODE_INVALID_REQUEST, format!("invalid request: {e}"));
        }
    };
    let id = request.id.clone();

    match request.method.as_str() {
        "listTools" => Json(rpc_result(id, list_tools(&state))),
        "callTool" => call_tool(state, id, request.params).await,
        other => rpc_error(id, CODE_METHOD_NOT_FOUND, format!("unknown method {other:?}")),
    }
}

fn list_tools(state: &EndpointState) -> Value {
    let mut tools: Vec<&AliasEntry> = state.entries.values().collect();
    tools.sort_by(|a, b| a.name.cmp(&b.name));

    let tools: Vec<Value> = tools
        .into_iter()
        .map(|entry| {
            json!({
                "name": entry.name,
                "description": entry.description,
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "args": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Additional command arguments",
                        },
                    },
                    "required": [],
                },
            })
        })
        .collect();

    json!({ "tools": tools })
}

async fn call_tool(state: EndpointState, id: Value, params: Value) -> Json<Value> {
    let params: CallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return rpc_error(id, CODE_INVALID_PARAMS, format!("invalid params: {e}"));
        }
    };

    let Some(entry) = state.entries.get(&params.name) else {
        return rpc_error(
            id,
            CODE_UNKNOWN_TOOL,
            format!("unknown tool {:?}", params.name),
        );
    };

    let Ok(_permit) = state.slots.clone().try_acquire_owned() else {
        return rpc_error(id, CODE_BUSY, "all call slots are busy".to_string());
    };

    match state.executor.execute(entry, &params.args).await {
        Ok(output) => {
            let content: Vec<Value> = output
                .chunks
                .iter()
                .map(|chunk| {
                    json!({
                        "type": "text",
                        "stream": chunk.stream,
                        "text": chunk.text,
                    })
                })
                .collect();
            Json(rpc_result(
                id,
                json!({ "exitCode": output.exit_code, "content": content }),
            ))
        }
        Err(e) => rpc_error(id, CODE_EXEC_FAILED, e.to_string()),
    }
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: String) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    }))
}
