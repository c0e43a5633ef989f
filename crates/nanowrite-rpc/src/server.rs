use crate::methods;
use crate::protocol::{
    RpcFault, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION,
    PARSE_ERROR,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use nanowrite::NanoWrite;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Already serving on {0}")]
    AlreadyServing(SocketAddr),

    #[error("Not serving")]
    NotServing,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server task failed: {0}")]
    Join(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Serves one [`NanoWrite`] over JSON-RPC. Starts out not serving; `start`
/// and `stop` move it between the two states.
pub struct RpcServer {
    nw: Arc<NanoWrite>,
    cors: bool,
    running: Option<Running>,
}

impl RpcServer {
    pub fn new(nw: Arc<NanoWrite>) -> Self {
        Self {
            nw,
            cors: false,
            running: None,
        }
    }

    /// Allow browser clients from any origin.
    pub fn with_cors(mut self, cors: bool) -> Self {
        self.cors = cors;
        self
    }

    pub fn is_serving(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Bind and start answering requests. Port 0 picks a free port; the
    /// bound address is returned.
    pub async fn start(&mut self, bind: IpAddr, port: u16) -> Result<SocketAddr, RpcError> {
        if let Some(running) = &self.running {
            return Err(RpcError::AlreadyServing(running.addr));
        }

        let listener = tokio::net::TcpListener::bind((bind, port))
            .await
            .map_err(|source| RpcError::Bind {
                addr: format!("{bind}:{port}"),
                source,
            })?;
        let addr = listener.local_addr()?;

        let mut app = router(Arc::clone(&self.nw)).layer(TraceLayer::new_for_http());
        if self.cors {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        let (shutdown, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
        });

        info!("RPC server listening on http://{}", addr);
        self.running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn stop(&mut self) -> Result<(), RpcError> {
        let running = self.running.take().ok_or(RpcError::NotServing)?;
        let _ = running.shutdown.send(());
        running
            .task
            .await
            .map_err(|e| RpcError::Join(e.to_string()))??;
        info!("RPC server on {} stopped", running.addr);
        Ok(())
    }
}

pub fn router(nw: Arc<NanoWrite>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rpc", post(rpc))
        .with_state(nw)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "methods": methods::METHODS,
    }))
}

async fn rpc(State(nw): State<Arc<NanoWrite>>, body: String) -> Json<RpcResponse> {
    let value: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return Json(RpcResponse::failure(
                Value::Null,
                RpcFault::new(PARSE_ERROR, format!("Parse error: {e}")),
            ))
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(RpcResponse::failure(
                id,
                RpcFault::new(INVALID_REQUEST, format!("Invalid request: {e}")),
            ))
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(RpcResponse::failure(
            request.id,
            RpcFault::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        ));
    }

    let RpcRequest {
        method, params, id, ..
    } = request;
    let outcome = tokio::task::spawn_blocking(move || methods::call(&nw, &method, params)).await;

    Json(match outcome {
        Ok(Ok(result)) => RpcResponse::success(id, result),
        Ok(Err(fault)) => RpcResponse::failure(id, fault),
        Err(e) => {
            error!("RPC worker panicked: {}", e);
            RpcResponse::failure(id, RpcFault::new(INTERNAL_ERROR, e.to_string()))
        }
    })
}
