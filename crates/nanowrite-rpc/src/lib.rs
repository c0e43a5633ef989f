//! JSON-RPC front end for [`nanowrite`].
//!
//! Requests are `POST /rpc` JSON-RPC 2.0 calls; `GET /health` reports the
//! server version and its methods. Each call runs on the blocking pool and
//! queues on the session lock, so concurrent clients wait instead of failing.

pub mod client;
pub mod methods;
pub mod protocol;
pub mod server;

pub use client::{ClientError, RpcClient};
pub use protocol::{fault_code, BatchOutcome, CameraImage, RpcFault, Screenshot};
pub use server::{router, RpcError, RpcServer};

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 60000;
