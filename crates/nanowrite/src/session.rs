//! The one live connection to a NanoWrite instance.
//!
//! A [`Session`] owns the input driver, the screen reader, the coordinate
//! table and all state inferred about the running job. It is never shared
//! directly; [`crate::NanoWrite`] keeps it behind a single lock so input
//! sequences cannot interleave.

use crate::config::{Config, LogSource};
use crate::coordinates::{ControlName, CoordinateTable};
use crate::errors::NanoWriteError;
use crate::job_state::JobTracker;
use crate::log_parser::{parse_log, LogEntry, COMMAND_SEPARATOR};
use crate::platforms::{InputDriver, KeyCombo, ScreenReader};
use crate::types::{PiezoPosition, Rgb};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

enum WorkDir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Fixed(path) => path,
        }
    }
}

pub struct Session {
    pub(crate) driver: Box<dyn InputDriver>,
    pub(crate) screen: Box<dyn ScreenReader>,
    pub(crate) table: CoordinateTable,
    pub(crate) config: Config,
    pub(crate) tracker: JobTracker,
    pub(crate) piezo_cache: Option<PiezoPosition>,
    command_seq: u64,
    work_dir: WorkDir,
}

impl Session {
    /// Open a session, picking the coordinate table from the configuration
    /// or from the version in the window title.
    pub fn open(
        driver: Box<dyn InputDriver>,
        screen: Box<dyn ScreenReader>,
        config: Config,
    ) -> Result<Self, NanoWriteError> {
        config.validate()?;

        let table = match (&config.coordinates, &config.profile) {
            (Some(path), _) => CoordinateTable::from_json_file(path)?,
            (None, Some(profile)) => CoordinateTable::builtin(profile).ok_or_else(|| {
                NanoWriteError::Config(format!("no built-in coordinates for NanoWrite {profile}"))
            })?,
            (None, None) => {
                let title = driver.window_title()?;
                let version = title.split_whitespace().last().unwrap_or_default();
                CoordinateTable::builtin(version).ok_or_else(|| {
                    NanoWriteError::Config(format!(
                        "program version '{version}' (from title '{title}') not known"
                    ))
                })?
            }
        };
        let table = match config.dpi {
            Some(dpi) => table.scaled_to_dpi(dpi),
            None => table,
        };

        Self::with_table(driver, screen, table, config)
    }

    pub fn with_table(
        driver: Box<dyn InputDriver>,
        screen: Box<dyn ScreenReader>,
        table: CoordinateTable,
        config: Config,
    ) -> Result<Self, NanoWriteError> {
        config.validate()?;

        let work_dir = match &config.work_dir {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                WorkDir::Fixed(path.clone())
            }
            None => WorkDir::Temp(tempfile::Builder::new().suffix("nanowrite").tempdir()?),
        };
        info!(
            "session opened with coordinate profile {}, work dir {}",
            table.profile,
            work_dir.path().display()
        );

        Ok(Self {
            driver,
            screen,
            tracker: JobTracker::new(config.debounce),
            table,
            config,
            piezo_cache: None,
            command_seq: 0,
            work_dir,
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &CoordinateTable {
        &self.table
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// A log marker no earlier command has used.
    pub(crate) fn next_marker(&mut self) -> String {
        self.command_seq += 1;
        format!("{COMMAND_SEPARATOR} #{}#", self.command_seq)
    }

    pub(crate) fn focus(&self) -> Result<(), NanoWriteError> {
        self.driver.focus_window()
    }

    pub(crate) fn click(&self, control: ControlName) -> Result<(), NanoWriteError> {
        let at = self.table.point(control)?;
        debug!("click {} at ({}, {})", control, at.x, at.y);
        self.driver.click(at)?;
        self.settle();
        Ok(())
    }

    pub(crate) fn press(&self, keys: KeyCombo) -> Result<(), NanoWriteError> {
        debug!("press {:?}", keys);
        self.driver.press(keys)
    }

    pub(crate) fn settle(&self) {
        if self.config.settle_ms > 0 {
            std::thread::sleep(self.config.settle());
        }
    }

    pub(crate) fn read_field(&self, control: ControlName) -> Result<String, NanoWriteError> {
        let at = self.table.point(control)?;
        let text = self.screen.read_field(at)?;
        debug!("field {} reads {:?}", control, text);
        Ok(text)
    }

    pub(crate) fn read_pixel(&self, control: ControlName) -> Result<Rgb, NanoWriteError> {
        let at = self.table.point(control)?;
        self.screen.read_pixel(at)
    }

    pub(crate) fn read_log_text(&self) -> Result<String, NanoWriteError> {
        match &self.config.log_source {
            LogSource::Screen => {
                let region = self.table.rect(ControlName::LogRegion)?;
                self.screen.read_region_text(region)
            }
            LogSource::MessagesDir(dir) => read_latest_messages_file(dir),
        }
    }

    pub(crate) fn read_log(&self) -> Result<Vec<LogEntry>, NanoWriteError> {
        let text = self.read_log_text()?;
        Ok(parse_log(&text).collect())
    }
}

/// Newest `*_Messages.log` in `dir`, decoded as Latin-1. The files are named
/// `2013-07-08_16-17-00_Messages.log`, so the lexically last one is newest.
pub(crate) fn read_latest_messages_file(dir: &Path) -> Result<String, NanoWriteError> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| {
            NanoWriteError::TargetUnavailable(format!(
                "messages directory {} unreadable: {e}",
                dir.display()
            ))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_Messages.log"))
        })
        .collect();
    names.sort();

    let latest = names.pop().ok_or_else(|| {
        NanoWriteError::TargetUnavailable(format!("no message log in {}", dir.display()))
    })?;
    let bytes = std::fs::read(&latest)?;
    Ok(bytes.iter().map(|&b| b as char).collect())
}
