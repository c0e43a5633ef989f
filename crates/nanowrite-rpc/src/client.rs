//! HTTP client for a running `nanowrite-rpc-server`.

use crate::methods::{
    ExecuteGwlParams, FindInterfaceParams, GwlParams, LoadStructureParams, MoveParams,
    PlanarParams, ZInversionParams,
};
use crate::protocol::{BatchOutcome, CameraImage, RpcFault, RpcRequest, RpcResponse, Screenshot};
use nanowrite::{
    JobState, JobStatus, LogEntry, PiezoPosition, Progress, StagePosition, StructureBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a JSON-RPC error.
    #[error("RPC fault {}: {}", .0.code, .0.message)]
    Fault(RpcFault),

    #[error("Malformed response: {0}")]
    Protocol(String),
}

impl ClientError {
    pub fn fault(&self) -> Option<&RpcFault> {
        match self {
            ClientError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// `base` is the server root, e.g. `http://127.0.0.1:60000`.
    pub fn new(base: &str) -> Result<Self, ClientError> {
        // jobs can run for hours, so only connecting is bounded
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: base.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        Ok(self
            .http
            .get(format!("{}/health", self.url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Call `method` and decode its result.
    pub async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T, ClientError> {
        let params =
            serde_json::to_value(params).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let request = RpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let response: RpcResponse = self
            .http
            .post(format!("{}/rpc", self.url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(fault) = response.error {
            return Err(ClientError::Fault(fault));
        }
        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| ClientError::Protocol(format!("{method}: {e}")))
    }

    pub async fn get_log(&self) -> Result<Vec<LogEntry>, ClientError> {
        self.call("get_log", json!({})).await
    }

    pub async fn get_command_log(&self) -> Result<Vec<LogEntry>, ClientError> {
        self.call("get_command_log", json!({})).await
    }

    pub async fn execute_gwl_command(&self, commands: &str, execute: bool) -> Result<(), ClientError> {
        self.call(
            "execute_gwl_command",
            ExecuteGwlParams {
                commands: commands.to_string(),
                execute,
            },
        )
        .await
    }

    /// Run `commands` and wait on the server until they end. The request
    /// stays open for the whole job; see [`RpcClient::wait_for_job`] for long
    /// ones.
    pub async fn execute_gwl_and_wait(&self, commands: &str) -> Result<JobState, ClientError> {
        self.call(
            "execute_gwl_and_wait",
            GwlParams {
                commands: commands.to_string(),
            },
        )
        .await
    }

    pub async fn load_structure_file(&self, path: &Path) -> Result<JobState, ClientError> {
        self.call(
            "load_structure_file",
            LoadStructureParams {
                path: path.to_path_buf(),
            },
        )
        .await
    }

    pub async fn load_structure_batch(
        &self,
        batch: &StructureBatch,
    ) -> Result<Vec<BatchOutcome>, ClientError> {
        self.call("load_structure_batch", batch).await
    }

    pub async fn start_dlw(&self) -> Result<(), ClientError> {
        self.call("start_dlw", json!({})).await
    }

    pub async fn switch_to_camera_view(&self) -> Result<(), ClientError> {
        self.call("switch_to_camera_view", json!({})).await
    }

    pub async fn get_piezo_position(&self) -> Result<PiezoPosition, ClientError> {
        self.call("get_piezo_position", json!({})).await
    }

    pub async fn get_stage_position(&self) -> Result<StagePosition, ClientError> {
        self.call("get_stage_position", json!({})).await
    }

    pub async fn get_progress(&self) -> Result<Progress, ClientError> {
        self.call("get_progress", json!({})).await
    }

    pub async fn get_job_status(&self) -> Result<JobStatus, ClientError> {
        self.call("get_job_status", json!({})).await
    }

    /// Poll `get_job_status` every `poll_interval` until the job is finished
    /// or aborted. Waiting happens here rather than on the server, so no
    /// single request has to outlive the job.
    pub async fn wait_for_job(&self, poll_interval: Duration) -> Result<JobState, ClientError> {
        loop {
            let status = self.get_job_status().await?;
            if status.state.is_terminal() {
                return Ok(status.state);
            }
            debug!("job still {:?}", status.state);
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn abort_job(&self) -> Result<JobState, ClientError> {
        self.call("abort_job", json!({})).await
    }

    pub async fn get_camera_image(&self) -> Result<CameraImage, ClientError> {
        self.call("get_camera_image", json!({})).await
    }

    pub async fn get_screenshot(&self) -> Result<Screenshot, ClientError> {
        self.call("get_screenshot", json!({})).await
    }

    pub async fn get_z_inversion(&self) -> Result<bool, ClientError> {
        self.call("get_z_inversion", json!({})).await
    }

    pub async fn set_z_inversion(&self, inverted: bool) -> Result<(), ClientError> {
        self.call("set_z_inversion", ZInversionParams { inverted }).await
    }

    pub async fn move_piezo(&self, x: f64, y: f64, z: Option<f64>, relative: bool) -> Result<(), ClientError> {
        self.call("move_piezo", MoveParams { x, y, z, relative }).await
    }

    pub async fn move_stage(&self, x: f64, y: f64, z: Option<f64>, relative: bool) -> Result<(), ClientError> {
        self.call("move_stage", MoveParams { x, y, z, relative }).await
    }

    pub async fn move_piezo_to_same_location_by_stage(&self, x: f64, y: f64) -> Result<(), ClientError> {
        self.call("move_piezo_to_same_location_by_stage", PlanarParams { x, y })
            .await
    }

    pub async fn invalidate_piezo_position(&self) -> Result<(), ClientError> {
        self.call("invalidate_piezo_position", json!({})).await
    }

    pub async fn piezo_range(&self) -> Result<(f64, f64, f64), ClientError> {
        self.call("piezo_range", json!({})).await
    }

    pub async fn is_within_piezo_range(&self, position: &PiezoPosition) -> Result<bool, ClientError> {
        self.call("is_within_piezo_range", position).await
    }

    pub async fn find_interface(&self, at: f64) -> Result<JobState, ClientError> {
        self.call("find_interface", FindInterfaceParams { at }).await
    }
}
