//! High-level NanoWrite operations as input sequences.
//!
//! Nothing NanoWrite does can be confirmed through an API, so every
//! operation that changes the instrument ends with a bounded read-back of
//! the screen. An operation whose effect never becomes visible fails with
//! [`NanoWriteError::VerificationTimeout`] and leaves the job tracker alone.

use crate::coordinates::ControlName;
use crate::errors::NanoWriteError;
use crate::job_state::{poll_once, require_terminal, wait_for_terminal, JobState};
use crate::log_parser::{command_log, LogEntry};
use crate::platforms::KeyCombo;
use crate::session::Session;
use crate::types::{parse_hms, CameraFrame, PiezoPosition, Progress, Rect, ScreenshotResult, StagePosition};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

const OPEN_FILE_DIALOG: &str = "Open file";
const CAMERA_PICTURE: &str = "captured.tif";

/// GWL files to write into the work directory and the jobs to run from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureBatch {
    /// File name to GWL source. Only the base name is used.
    pub files: BTreeMap<String, String>,
    pub jobs: Vec<BatchJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Entry in `files` to load and write
    pub start: String,
    /// Files the job produces that should be returned
    #[serde(default)]
    pub readback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub start: String,
    pub state: JobState,
    pub artifacts: BTreeMap<String, Vec<u8>>,
}

/// Strip any directory part so callers cannot write outside the work dir.
fn base_name(name: &str) -> Result<&str, NanoWriteError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        return Err(NanoWriteError::InvalidArgument(format!(
            "'{name}' is not a file name"
        )));
    }
    Ok(base)
}

/// Poll `check` under the session's verification policy. Unparsable reads
/// count as "not yet".
fn verify<F>(session: &Session, what: &str, mut check: F) -> Result<(), NanoWriteError>
where
    F: FnMut(&Session) -> Result<bool, NanoWriteError>,
{
    let policy = session.config.verify;
    let started = Instant::now();
    for attempt in 1..=policy.max_attempts {
        match check(session) {
            Ok(true) => {
                debug!("verified {} after {} read(s)", what, attempt);
                return Ok(());
            }
            Ok(false) => {}
            Err(NanoWriteError::ParseFailure(e)) => debug!("unreadable while verifying {}: {}", what, e),
            Err(e) => return Err(e),
        }
        if attempt == policy.max_attempts || started.elapsed() >= policy.timeout() {
            break;
        }
        std::thread::sleep(policy.interval());
    }
    warn!("verification of {} timed out", what);
    Err(NanoWriteError::VerificationTimeout(format!(
        "{what} not visible after {:?}",
        started.elapsed()
    )))
}

fn mentions(entries: &[LogEntry], needle: &str) -> usize {
    entries.iter().filter(|e| e.message.contains(needle)).count()
}

/// Wait until the log mentions `needle` more often than `before` times.
fn verify_logged(session: &Session, needle: &str, before: usize) -> Result<(), NanoWriteError> {
    verify(session, &format!("log message {needle:?}"), |s| {
        Ok(mentions(&s.read_log()?, needle) > before)
    })
}

/// Read a field until `parse` accepts it, within the verification budget.
fn read_parsed<T>(
    session: &Session,
    control: ControlName,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, NanoWriteError> {
    let policy = session.config.verify;
    let mut last = String::new();
    for attempt in 1..=policy.max_attempts {
        last = session.read_field(control)?;
        if let Some(value) = parse(&last) {
            return Ok(value);
        }
        if attempt < policy.max_attempts {
            std::thread::sleep(policy.interval());
        }
    }
    Err(NanoWriteError::ParseFailure(format!(
        "field {control} holds {last:?}"
    )))
}

fn read_float(session: &Session, control: ControlName) -> Result<f64, NanoWriteError> {
    read_parsed(session, control, |s| s.trim().parse::<f64>().ok())
}

/// Fail with `NotReady` while a job submitted through this session runs.
fn ensure_ready(session: &mut Session) -> Result<(), NanoWriteError> {
    if session.tracker.active_job().is_none() {
        return Ok(());
    }
    poll_once(session)?;
    match session.tracker.active_job() {
        None => Ok(()),
        Some(_) => Err(NanoWriteError::NotReady(format!(
            "last job is still {:?}",
            session.tracker.state()
        ))),
    }
}

/// Forget the cached piezo position, e.g. after something outside this
/// session moved the piezo.
pub fn invalidate_piezo_position(session: &mut Session) {
    if session.piezo_cache.take().is_some() {
        debug!("invalidating cached piezo position");
    }
}

/// Paste `commands` into the mini GWL console and run them.
///
/// The commands are framed by a numbered `MessageOut` marker, which is how the
/// submission is verified and how the job's own log output is found later,
/// and by a trailing `wait` that forces a progress bar update. Does not wait
/// for the commands to finish.
#[instrument(level = "debug", skip(session))]
pub fn execute_gwl(
    session: &mut Session,
    commands: &str,
    execute: bool,
    invalidate_piezo: bool,
) -> Result<(), NanoWriteError> {
    ensure_ready(session)?;

    let marker = session.next_marker();
    let script = format!("MessageOut {marker}\n{commands}\nwait 0.01");
    // the panel survives restarts and may already hold this marker
    let before = if execute {
        mentions(&session.read_log()?, &marker)
    } else {
        0
    };

    session.focus()?;
    session.click(ControlName::AdvancedSettingsTab)?;
    session.click(ControlName::GwlConsole)?;
    session.press(KeyCombo::CtrlEnd)?;
    session.press(KeyCombo::ShiftCtrlHome)?;
    session.press(KeyCombo::Delete)?;
    session.driver.paste_text(&script)?;

    if !execute {
        return Ok(());
    }

    session.click(ControlName::GwlSubmit)?;
    verify_logged(session, &marker, before)?;
    session.tracker.submit(marker);
    info!("GWL command submitted");

    // the camera view is the useful one while something runs
    switch_to_camera_view(session)?;
    if invalidate_piezo {
        invalidate_piezo_position(session);
    }
    Ok(())
}

/// Load a structure file through the *Load structure* dialog and wait until
/// NanoWrite has processed it. The structure is not written; see [`start_dlw`].
#[instrument(level = "debug", skip(session))]
pub fn load_structure_file(session: &mut Session, path: &Path) -> Result<JobState, NanoWriteError> {
    ensure_ready(session)?;

    let path_text = path.to_string_lossy().to_string();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| NanoWriteError::InvalidArgument(format!("'{path_text}' has no file name")))?;
    let before = mentions(&session.read_log()?, &file_name);

    session.focus()?;
    session.click(ControlName::LoadStructure)?;
    session.driver.fill_dialog(OPEN_FILE_DIALOG, &path_text)?;
    session.press(KeyCombo::Enter)?;

    verify_logged(session, &file_name, before)?;
    session.tracker.submit(file_name);
    info!("structure {} loading", path_text);

    let poll = session.config.poll;
    require_terminal(session, poll)
}

/// Start writing the loaded structure.
#[instrument(level = "debug", skip(session))]
pub fn start_dlw(session: &mut Session, invalidate_piezo: bool) -> Result<(), NanoWriteError> {
    start_dlw_marked(session, None, invalidate_piezo)
}

/// `marker` is a line the structure prints first. Without one, any new log
/// output counts as the start.
fn start_dlw_marked(
    session: &mut Session,
    marker: Option<&str>,
    invalidate_piezo: bool,
) -> Result<(), NanoWriteError> {
    ensure_ready(session)?;

    let before = session.read_log()?;
    session.focus()?;
    session.click(ControlName::StartDlw)?;

    let job_marker = match marker {
        Some(marker) => {
            verify_logged(session, marker, mentions(&before, marker))?;
            marker.to_string()
        }
        None => {
            let mut first_new = None;
            verify(session, "new log output", |s| {
                let now = s.read_log()?;
                let grew = now.len() > before.len() || now.last() != before.last();
                if grew {
                    first_new = now.get(before.len()).or(now.last()).map(|e| e.message.clone());
                }
                Ok(grew)
            })?;
            first_new.unwrap_or_default()
        }
    };
    session.tracker.submit(job_marker);
    info!("DLW started");

    switch_to_camera_view(session)?;
    if invalidate_piezo {
        invalidate_piezo_position(session);
    }
    Ok(())
}

/// Write the batch files, then load, write and read back each job in turn.
///
/// A job whose structure does not load cleanly is reported with the load's
/// state and ends the batch; later jobs are not started.
#[instrument(level = "debug", skip(session, batch), fields(jobs = batch.jobs.len()))]
pub fn load_structure_batch(
    session: &mut Session,
    batch: &StructureBatch,
) -> Result<Vec<BatchResult>, NanoWriteError> {
    for job in &batch.jobs {
        if !batch.files.contains_key(&job.start) {
            return Err(NanoWriteError::InvalidArgument(format!(
                "batch job '{}' has no file",
                job.start
            )));
        }
    }

    let dir = session.work_dir().to_path_buf();
    let mut paths = BTreeMap::new();
    for (name, content) in &batch.files {
        let path = dir.join(base_name(name)?);
        std::fs::write(&path, content)?;
        paths.insert(name.as_str(), path);
    }

    let mut results = Vec::with_capacity(batch.jobs.len());
    for job in &batch.jobs {
        let path = &paths[job.start.as_str()];
        let marker = session.next_marker();
        std::fs::write(
            path,
            format!("MessageOut {marker}\n{}\nwait 0.01", batch.files[&job.start]),
        )?;

        let loaded = load_structure_file(session, path)?;
        if loaded != JobState::Finished {
            warn!("loading {} ended {:?}, stopping the batch", job.start, loaded);
            results.push(BatchResult {
                start: job.start.clone(),
                state: loaded,
                artifacts: BTreeMap::new(),
            });
            break;
        }
        start_dlw_marked(session, Some(&marker), true)?;
        let poll = session.config.poll;
        let state = require_terminal(session, poll)?;

        let mut artifacts = BTreeMap::new();
        for name in &job.readback {
            let data = std::fs::read(dir.join(base_name(name)?))?;
            artifacts.insert(name.clone(), data);
        }
        info!("batch job {} ended {:?}, {} artifact(s)", job.start, state, artifacts.len());
        results.push(BatchResult {
            start: job.start.clone(),
            state,
            artifacts,
        });
    }
    Ok(results)
}

pub fn switch_to_camera_view(session: &mut Session) -> Result<(), NanoWriteError> {
    session.focus()?;
    session.click(ControlName::CameraTab)
}

pub fn get_z_inversion(session: &Session) -> Result<bool, NanoWriteError> {
    Ok(session.read_pixel(ControlName::ZInversionPixel)?.g > 100)
}

/// Bring the z-axis inversion toggle to `inverted`. Clicks only when the
/// toggle currently shows the other state, then re-reads until it matches.
#[instrument(level = "debug", skip(session))]
pub fn set_z_inversion(session: &mut Session, inverted: bool) -> Result<(), NanoWriteError> {
    if get_z_inversion(session)? == inverted {
        return Ok(());
    }
    session.focus()?;
    session.click(ControlName::ZInversionPixel)?;
    invalidate_piezo_position(session);
    verify(session, "z-inversion toggle", |s| Ok(get_z_inversion(s)? == inverted))
}

pub fn get_piezo_position(session: &mut Session) -> Result<PiezoPosition, NanoWriteError> {
    if session.config.cache_piezo_position {
        if let Some(cached) = session.piezo_cache {
            return Ok(cached);
        }
    }

    let mut x = read_float(session, ControlName::PiezoXField)?;
    let y = read_float(session, ControlName::PiezoYField)?;
    let mut z = read_float(session, ControlName::PiezoZField)?;

    if get_z_inversion(session)? {
        let (range_x, _, range_z) = session.config.piezo_range;
        x = range_x - x;
        z = range_z - z;
    }

    let position = PiezoPosition { x, y, z };
    session.piezo_cache = Some(position);
    Ok(position)
}

pub fn get_stage_position(session: &Session) -> Result<StagePosition, NanoWriteError> {
    Ok(StagePosition {
        x: read_float(session, ControlName::StageXField)?,
        y: read_float(session, ControlName::StageYField)?,
        z: read_float(session, ControlName::StageZField)?,
    })
}

/// Elapsed time from the progress field and the projected total from the
/// Graph tab.
pub fn get_progress(session: &mut Session) -> Result<Progress, NanoWriteError> {
    session.focus()?;
    let elapsed = read_parsed(session, ControlName::ProgressField, parse_hms)?;

    session.click(ControlName::GraphTab)?;
    let estimate = match read_parsed(session, ControlName::ProgressEstimateField, parse_hms) {
        Ok(estimate) => Some(estimate),
        Err(NanoWriteError::ParseFailure(e)) => {
            debug!("no time estimate: {}", e);
            None
        }
        Err(e) => return Err(e),
    };
    session.tracker.set_estimate(estimate);
    Ok(Progress::new(elapsed, estimate))
}

/// Click *Abort* and wait for NanoWrite to settle.
#[instrument(level = "debug", skip(session))]
pub fn abort_job(session: &mut Session) -> Result<JobState, NanoWriteError> {
    session.focus()?;
    session.click(ControlName::Abort)?;
    session.tracker.expect_transition();
    let poll = session.config.poll;
    let state = wait_for_terminal(session, poll)?;
    invalidate_piezo_position(session);
    Ok(state)
}

/// Take a camera picture with `CapturePhoto` and return the TIFF with its
/// metadata. The camera must be enabled or NanoWrite hangs.
#[instrument(level = "debug", skip(session))]
pub fn get_camera_image(session: &mut Session) -> Result<CameraFrame, NanoWriteError> {
    let image_path = session.work_dir().join(CAMERA_PICTURE);
    let meta_path = PathBuf::from(format!("{}_meta.txt", image_path.display()));

    execute_gwl(
        session,
        &format!("CapturePhoto {}", image_path.display()),
        true,
        false,
    )?;
    let poll = session.config.poll;
    require_terminal(session, poll)?;

    Ok(CameraFrame {
        data: std::fs::read(&image_path)?,
        metadata: String::from_utf8_lossy(&std::fs::read(&meta_path)?).to_string(),
        captured_at: Utc::now(),
    })
}

pub fn get_screenshot(session: &Session) -> Result<ScreenshotResult, NanoWriteError> {
    session.focus()?;
    let baseline = session.table.baseline;
    session
        .screen
        .capture_region(Rect::new(0, 0, baseline.width, baseline.height))
}

pub fn get_log(session: &Session) -> Result<Vec<LogEntry>, NanoWriteError> {
    session.read_log()
}

/// Log output of the most recent mini-console command.
pub fn get_command_log(session: &Session) -> Result<Vec<LogEntry>, NanoWriteError> {
    Ok(command_log(&session.read_log()?).to_vec())
}

pub fn is_within_piezo_range(session: &Session, position: &PiezoPosition) -> bool {
    let (rx, ry, rz) = session.config.piezo_range;
    (0.0..=rx).contains(&position.x)
        && (0.0..=ry).contains(&position.y)
        && (0.0..=rz).contains(&position.z)
}

fn run_gwl_to_end(
    session: &mut Session,
    commands: &str,
    invalidate_piezo: bool,
) -> Result<JobState, NanoWriteError> {
    execute_gwl(session, commands, true, invalidate_piezo)?;
    let poll = session.config.poll;
    require_terminal(session, poll)
}

/// Move the piezo to an absolute GWL position; `z` defaults to the current one.
#[instrument(level = "debug", skip(session))]
pub fn move_piezo(session: &mut Session, x: f64, y: f64, z: Option<f64>) -> Result<(), NanoWriteError> {
    let z = match z {
        Some(z) => z,
        None => get_piezo_position(session)?.z,
    };
    let target = PiezoPosition { x, y, z };
    let in_range = is_within_piezo_range(session, &target);
    if !in_range {
        warn!("piezo target {:?} outside range {:?}", target, session.config.piezo_range);
    }

    run_gwl_to_end(session, &format!("{x:.6} {y:.6} {z:.6} 0\nwrite"), true)?;
    // an out-of-range target is clamped by NanoWrite, so it cannot be cached
    session.piezo_cache = in_range.then_some(target);
    std::thread::sleep(session.config.move_settle());
    Ok(())
}

pub fn move_piezo_relative(session: &mut Session, dx: f64, dy: f64, dz: f64) -> Result<(), NanoWriteError> {
    let current = get_piezo_position(session)?;
    move_piezo(session, current.x + dx, current.y + dy, Some(current.z + dz))
}

/// Move the stage to an absolute position; `z` defaults to the current one.
#[instrument(level = "debug", skip(session))]
pub fn move_stage(session: &mut Session, x: f64, y: f64, z: Option<f64>) -> Result<(), NanoWriteError> {
    let current = get_stage_position(session)?;
    let mut dz = z.map_or(0.0, |z| z - current.z);
    if get_z_inversion(session)? {
        dz = -dz;
    }
    move_stage_relative(session, x - current.x, y - current.y, dz)
}

pub fn move_stage_relative(session: &mut Session, dx: f64, dy: f64, dz: f64) -> Result<(), NanoWriteError> {
    run_gwl_to_end(
        session,
        &format!("MoveStageX {dx:.6}\nMoveStageY {dy:.6}\nAddZDrivePosition {dz:.6}\nwrite"),
        false,
    )?;
    std::thread::sleep(session.config.move_settle());
    Ok(())
}

/// Move the piezo to `(x, y)` and the stage by the opposite offset, so the
/// sample stays where it was under the objective.
#[instrument(level = "debug", skip(session))]
pub fn move_piezo_to_same_location_by_stage(
    session: &mut Session,
    x: f64,
    y: f64,
) -> Result<(), NanoWriteError> {
    let current = get_piezo_position(session)?;
    let (dx, dy) = (x - current.x, y - current.y);
    move_piezo(session, x, y, Some(current.z))?;
    move_stage_relative(session, -dx, -dy, 0.0)
}

/// Run NanoWrite's interface finder starting `at` micrometres into the piezo range.
pub fn find_interface(session: &mut Session, at: f64) -> Result<JobState, NanoWriteError> {
    run_gwl_to_end(session, &format!("findInterfaceAt {at:.6}"), true)
}
