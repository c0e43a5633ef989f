//! Maps RPC method names onto the [`NanoWrite`] facade.

use crate::protocol::{BatchOutcome, CameraImage, RpcFault, Screenshot};
use nanowrite::{NanoWrite, NanoWriteError, PiezoPosition, StructureBatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Every method the server answers.
pub const METHODS: &[&str] = &[
    "get_log",
    "get_command_log",
    "execute_gwl_command",
    "execute_gwl_and_wait",
    "load_structure_file",
    "load_structure_batch",
    "start_dlw",
    "switch_to_camera_view",
    "get_piezo_position",
    "get_stage_position",
    "get_progress",
    "get_job_status",
    "wait_for_job",
    "abort_job",
    "get_camera_image",
    "get_screenshot",
    "get_z_inversion",
    "set_z_inversion",
    "move_piezo",
    "move_stage",
    "move_piezo_to_same_location_by_stage",
    "invalidate_piezo_position",
    "piezo_range",
    "is_within_piezo_range",
    "find_interface",
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteGwlParams {
    pub commands: String,
    #[serde(default = "default_true")]
    pub execute: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GwlParams {
    pub commands: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStructureParams {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZInversionParams {
    pub inverted: bool,
}

/// Absolute target, or an offset from the current position when `relative`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveParams {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(default)]
    pub relative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanarParams {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindInterfaceParams {
    pub at: f64,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, RpcFault> {
    serde_json::from_value(value).map_err(RpcFault::invalid_params)
}

fn reply<T: Serialize>(result: Result<T, NanoWriteError>) -> Result<Value, RpcFault> {
    let value = result.map_err(|e| {
        warn!("operation failed: {}", e);
        RpcFault::from(&e)
    })?;
    serde_json::to_value(value).map_err(|e| RpcFault::new(crate::protocol::INTERNAL_ERROR, e.to_string()))
}

/// Run one method to completion. Blocks for as long as the operation takes,
/// including the wait for the session lock.
pub fn call(nw: &NanoWrite, method: &str, raw: Value) -> Result<Value, RpcFault> {
    debug!("rpc call {}", method);
    match method {
        "get_log" => reply(nw.get_log()),
        "get_command_log" => reply(nw.get_command_log()),
        "execute_gwl_command" => {
            let p: ExecuteGwlParams = params(raw)?;
            reply(nw.execute_gwl(&p.commands, p.execute))
        }
        "execute_gwl_and_wait" => {
            let p: GwlParams = params(raw)?;
            reply(nw.execute_gwl_and_wait(&p.commands))
        }
        "load_structure_file" => {
            let p: LoadStructureParams = params(raw)?;
            reply(nw.load_structure_file(&p.path))
        }
        "load_structure_batch" => {
            let batch: StructureBatch = params(raw)?;
            reply(nw.load_structure_batch(&batch).map(|results| {
                results.into_iter().map(BatchOutcome::from).collect::<Vec<_>>()
            }))
        }
        "start_dlw" => reply(nw.start_dlw()),
        "switch_to_camera_view" => reply(nw.switch_to_camera_view()),
        "get_piezo_position" => reply(nw.get_piezo_position()),
        "get_stage_position" => reply(nw.get_stage_position()),
        "get_progress" => reply(nw.get_progress()),
        "get_job_status" => reply(nw.get_job_status()),
        "wait_for_job" => reply(nw.wait_for_job()),
        "abort_job" => reply(nw.abort_job()),
        "get_camera_image" => reply(nw.get_camera_image().map(CameraImage::from)),
        "get_screenshot" => reply(nw.get_screenshot().map(Screenshot::from)),
        "get_z_inversion" => reply(nw.get_z_inversion()),
        "set_z_inversion" => {
            let p: ZInversionParams = params(raw)?;
            reply(nw.set_z_inversion(p.inverted))
        }
        "move_piezo" => {
            let p: MoveParams = params(raw)?;
            reply(if p.relative {
                nw.move_piezo_relative(p.x, p.y, p.z.unwrap_or(0.0))
            } else {
                nw.move_piezo(p.x, p.y, p.z)
            })
        }
        "move_stage" => {
            let p: MoveParams = params(raw)?;
            reply(if p.relative {
                nw.move_stage_relative(p.x, p.y, p.z.unwrap_or(0.0))
            } else {
                nw.move_stage(p.x, p.y, p.z)
            })
        }
        "move_piezo_to_same_location_by_stage" => {
            let p: PlanarParams = params(raw)?;
            reply(nw.move_piezo_to_same_location_by_stage(p.x, p.y))
        }
        "invalidate_piezo_position" => {
            nw.invalidate_piezo_position();
            Ok(Value::Null)
        }
        "piezo_range" => reply(Ok(nw.piezo_range())),
        "is_within_piezo_range" => {
            let p: PiezoPosition = params(raw)?;
            reply(Ok(nw.is_within_piezo_range(&p)))
        }
        "find_interface" => {
            let p: FindInterfaceParams = params(raw)?;
            reply(nw.find_interface(p.at))
        }
        other => Err(RpcFault::method_not_found(other)),
    }
}
