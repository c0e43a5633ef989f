//! Remote control for the NanoWrite direct laser writing software.
//!
//! NanoWrite has no programmatic interface, so this crate drives its window
//! the way an operator would: clicks at known coordinates, pasted GWL
//! commands and text copied back out of the front panel. Job completion is
//! inferred from the message log and a progress bar pixel and debounced
//! before it is reported.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::instrument;

pub mod config;
pub mod coordinates;
pub mod dispatcher;
pub mod errors;
pub mod job_state;
pub mod log_parser;
pub mod platforms;
pub mod session;
pub mod types;

pub use config::{Config, LogSource, RetryPolicy};
pub use coordinates::{ControlCoordinate, ControlName, CoordinateTable, Geometry};
pub use dispatcher::{BatchJob, BatchResult, StructureBatch};
pub use errors::NanoWriteError;
pub use job_state::{JobState, JobStatus};
pub use log_parser::{parse_log, LogEntry, LogLevel, LogTimestamp};
pub use platforms::{InputDriver, KeyCombo, ScreenReader};
pub use session::Session;
pub use types::{
    CameraFrame, PiezoPosition, Point, Progress, Rect, Resolution, Rgb, ScreenshotResult,
    StagePosition,
};

/// The main entry point: one connected NanoWrite instance.
///
/// Every method holds the session for its whole duration, so calls from
/// several threads run one after another and their input sequences never
/// interleave.
pub struct NanoWrite {
    session: Mutex<Session>,
}

impl NanoWrite {
    /// Find the NanoWrite window named in `config` and open a session on it.
    #[instrument(skip(config))]
    pub fn connect(config: Config) -> Result<Self, NanoWriteError> {
        let (driver, screen) = platforms::create_platform(&config)?;
        Ok(Self::from_session(Session::open(driver, screen, config)?))
    }

    pub fn from_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        // a panic mid-sequence leaves the window in an unknown state, but the
        // next operation starts by refocusing anyway
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_log(&self) -> Result<Vec<LogEntry>, NanoWriteError> {
        dispatcher::get_log(&self.session())
    }

    pub fn get_command_log(&self) -> Result<Vec<LogEntry>, NanoWriteError> {
        dispatcher::get_command_log(&self.session())
    }

    pub fn execute_gwl(&self, commands: &str, execute: bool) -> Result<(), NanoWriteError> {
        dispatcher::execute_gwl(&mut self.session(), commands, execute, true)
    }

    /// Run `commands` and wait until they are finished.
    pub fn execute_gwl_and_wait(&self, commands: &str) -> Result<JobState, NanoWriteError> {
        let mut session = self.session();
        dispatcher::execute_gwl(&mut session, commands, true, true)?;
        let poll = session.config().poll;
        job_state::wait_for_terminal(&mut session, poll)
    }

    pub fn load_structure_file(&self, path: &Path) -> Result<JobState, NanoWriteError> {
        dispatcher::load_structure_file(&mut self.session(), path)
    }

    pub fn load_structure_batch(
        &self,
        batch: &StructureBatch,
    ) -> Result<Vec<BatchResult>, NanoWriteError> {
        dispatcher::load_structure_batch(&mut self.session(), batch)
    }

    pub fn start_dlw(&self) -> Result<(), NanoWriteError> {
        dispatcher::start_dlw(&mut self.session(), true)
    }

    pub fn switch_to_camera_view(&self) -> Result<(), NanoWriteError> {
        dispatcher::switch_to_camera_view(&mut self.session())
    }

    pub fn get_piezo_position(&self) -> Result<PiezoPosition, NanoWriteError> {
        dispatcher::get_piezo_position(&mut self.session())
    }

    pub fn get_stage_position(&self) -> Result<StagePosition, NanoWriteError> {
        dispatcher::get_stage_position(&self.session())
    }

    pub fn get_progress(&self) -> Result<Progress, NanoWriteError> {
        dispatcher::get_progress(&mut self.session())
    }

    pub fn get_job_status(&self) -> Result<JobStatus, NanoWriteError> {
        job_state::job_status(&mut self.session())
    }

    /// Block until the current job ends or the poll budget runs out, in
    /// which case [`JobState::Unknown`] is returned.
    pub fn wait_for_job(&self) -> Result<JobState, NanoWriteError> {
        let mut session = self.session();
        let poll = session.config().poll;
        job_state::wait_for_terminal(&mut session, poll)
    }

    pub fn abort_job(&self) -> Result<JobState, NanoWriteError> {
        dispatcher::abort_job(&mut self.session())
    }

    pub fn get_camera_image(&self) -> Result<CameraFrame, NanoWriteError> {
        dispatcher::get_camera_image(&mut self.session())
    }

    pub fn get_screenshot(&self) -> Result<ScreenshotResult, NanoWriteError> {
        dispatcher::get_screenshot(&self.session())
    }

    pub fn get_z_inversion(&self) -> Result<bool, NanoWriteError> {
        dispatcher::get_z_inversion(&self.session())
    }

    pub fn set_z_inversion(&self, inverted: bool) -> Result<(), NanoWriteError> {
        dispatcher::set_z_inversion(&mut self.session(), inverted)
    }

    pub fn move_piezo(&self, x: f64, y: f64, z: Option<f64>) -> Result<(), NanoWriteError> {
        dispatcher::move_piezo(&mut self.session(), x, y, z)
    }

    pub fn move_piezo_relative(&self, dx: f64, dy: f64, dz: f64) -> Result<(), NanoWriteError> {
        dispatcher::move_piezo_relative(&mut self.session(), dx, dy, dz)
    }

    pub fn move_stage(&self, x: f64, y: f64, z: Option<f64>) -> Result<(), NanoWriteError> {
        dispatcher::move_stage(&mut self.session(), x, y, z)
    }

    pub fn move_stage_relative(&self, dx: f64, dy: f64, dz: f64) -> Result<(), NanoWriteError> {
        dispatcher::move_stage_relative(&mut self.session(), dx, dy, dz)
    }

    /// Move the piezo to `(x, y)` while the stage compensates, keeping the
    /// view on the same spot of the sample.
    pub fn move_piezo_to_same_location_by_stage(&self, x: f64, y: f64) -> Result<(), NanoWriteError> {
        dispatcher::move_piezo_to_same_location_by_stage(&mut self.session(), x, y)
    }

    /// Drop the cached piezo position. Use when the piezo was moved by
    /// something other than this session.
    pub fn invalidate_piezo_position(&self) {
        dispatcher::invalidate_piezo_position(&mut self.session())
    }

    pub fn find_interface(&self, at: f64) -> Result<JobState, NanoWriteError> {
        dispatcher::find_interface(&mut self.session(), at)
    }

    pub fn piezo_range(&self) -> (f64, f64, f64) {
        self.session().config().piezo_range
    }

    pub fn is_within_piezo_range(&self, position: &PiezoPosition) -> bool {
        dispatcher::is_within_piezo_range(&self.session(), position)
    }
}
