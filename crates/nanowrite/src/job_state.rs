//! Inferring the job state from what NanoWrite shows.
//!
//! NanoWrite has no notion of "job finished" that can be queried. The only
//! signals are the message log (`done.` / `aborted.` after the command that
//! started the job) and the colour of the last progress bar pixel, and both
//! repaint asynchronously. Single reads are therefore classified into a
//! [`RawStatus`] and only promoted to a terminal [`JobState`] after the
//! [`Debouncer`] has seen it several times in a row.

use crate::config::RetryPolicy;
use crate::coordinates::ControlName;
use crate::errors::NanoWriteError;
use crate::log_parser::{entries_since, LogEntry};
use crate::session::Session;
use crate::types::{duration_secs, parse_hms};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Finished,
    Aborted,
    /// Nothing confirmed yet. Retry later; this is neither success nor failure.
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Aborted)
    }
}

/// Classification of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Idle,
    Running,
    Finished,
    Aborted,
    /// The read produced nothing usable
    Unreadable,
}

impl RawStatus {
    fn as_state(self) -> Option<JobState> {
        match self {
            RawStatus::Idle => Some(JobState::Idle),
            RawStatus::Running => Some(JobState::Running),
            RawStatus::Finished => Some(JobState::Finished),
            RawStatus::Aborted => Some(JobState::Aborted),
            RawStatus::Unreadable => None,
        }
    }
}

/// Promotes raw reads to confirmed states. Non-terminal reads are accepted at
/// once; a terminal read must repeat `required` times in a row.
#[derive(Debug, Clone)]
pub struct Debouncer {
    required: u32,
    confirmed: JobState,
    candidate: Option<JobState>,
    streak: u32,
}

impl Debouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            confirmed: JobState::Unknown,
            candidate: None,
            streak: 0,
        }
    }

    pub fn state(&self) -> JobState {
        self.confirmed
    }

    pub fn observe(&mut self, raw: RawStatus) -> JobState {
        let Some(state) = raw.as_state() else {
            self.candidate = None;
            self.streak = 0;
            return self.confirmed;
        };

        if !state.is_terminal() {
            self.confirmed = state;
            self.candidate = None;
            self.streak = 0;
            return self.confirmed;
        }

        if self.candidate == Some(state) {
            self.streak += 1;
        } else {
            self.candidate = Some(state);
            self.streak = 1;
        }
        if self.streak >= self.required {
            self.confirmed = state;
        }
        self.confirmed
    }

    /// Forget any terminal state; used right after a command was accepted.
    pub fn restart(&mut self, state: JobState) {
        self.confirmed = state;
        self.candidate = None;
        self.streak = 0;
    }
}

/// Confirmed state after each raw read, starting from nothing confirmed.
pub fn confirm_sequence(samples: &[RawStatus], required: u32) -> Vec<JobState> {
    let mut debouncer = Debouncer::new(required);
    samples.iter().map(|s| debouncer.observe(*s)).collect()
}

/// Classify the log written since the current job was submitted.
///
/// An entry with `!!!` means NanoWrite rejected the job and is reported as an
/// [`NanoWriteError::ExecutionError`].
pub fn classify_job_log(entries: &[LogEntry]) -> Result<RawStatus, NanoWriteError> {
    if let Some(failed) = entries.iter().find(|e| e.is_error()) {
        return Err(NanoWriteError::ExecutionError(failed.message.clone()));
    }
    let Some(last) = entries.last() else {
        return Ok(RawStatus::Unreadable);
    };
    Ok(if last.message.contains("aborted.") {
        RawStatus::Aborted
    } else if last.message.contains("done.") {
        RawStatus::Finished
    } else {
        RawStatus::Running
    })
}

/// Classify the window when no job was submitted through this session.
pub fn classify_idle(progress_bar_full: bool, last_message: Option<&str>) -> RawStatus {
    match last_message {
        _ if progress_bar_full => RawStatus::Finished,
        Some(msg) if msg.contains("aborted.") => RawStatus::Aborted,
        Some(msg) if msg.contains("done.") => RawStatus::Finished,
        _ => RawStatus::Idle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress_fraction: Option<f64>,
    #[serde(with = "duration_secs::option")]
    pub elapsed: Option<Duration>,
    #[serde(with = "duration_secs::option")]
    pub estimated_total: Option<Duration>,
}

/// A job submitted through this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    /// Log text that marks where the job's own output begins
    pub marker: String,
}

/// Job bookkeeping kept in the session.
#[derive(Debug, Clone)]
pub struct JobTracker {
    debouncer: Debouncer,
    active: Option<ActiveJob>,
    /// Projected total of the current job, from the last progress read
    estimate: Option<Duration>,
}

impl JobTracker {
    pub fn new(required: u32) -> Self {
        Self {
            debouncer: Debouncer::new(required),
            active: None,
            estimate: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.debouncer.state()
    }

    pub fn active_job(&self) -> Option<&ActiveJob> {
        self.active.as_ref()
    }

    pub fn estimate(&self) -> Option<Duration> {
        self.estimate
    }

    pub(crate) fn set_estimate(&mut self, estimate: Option<Duration>) {
        self.estimate = estimate;
    }

    /// Record a job whose submission was verified.
    pub(crate) fn submit(&mut self, marker: impl Into<String>) {
        let marker = marker.into();
        info!("job submitted, output starts at {:?}", marker);
        self.active = Some(ActiveJob { marker });
        self.estimate = None;
        self.debouncer.restart(JobState::Running);
    }

    /// A command was issued that should end in a new terminal state.
    pub(crate) fn expect_transition(&mut self) {
        self.estimate = None;
        self.debouncer.restart(JobState::Running);
    }

    fn observe(&mut self, raw: RawStatus) -> JobState {
        let state = self.debouncer.observe(raw);
        if state.is_terminal() && self.active.take().is_some() {
            info!("job confirmed {:?}", state);
        }
        state
    }
}

fn sample(session: &mut Session) -> Result<RawStatus, NanoWriteError> {
    if let Some(job) = session.tracker.active.clone() {
        let entries = match session.read_log() {
            Ok(entries) => entries,
            Err(NanoWriteError::ParseFailure(e)) => {
                debug!("log unreadable: {}", e);
                return Ok(RawStatus::Unreadable);
            }
            Err(e) => return Err(e),
        };
        let marker_seen = entries.iter().any(|e| e.message.contains(&job.marker));
        let job_log = if marker_seen {
            entries_since(&entries, &job.marker)
        } else {
            // the marker scrolled out of view; only the newest line is trustworthy
            &entries[entries.len().saturating_sub(1)..]
        };
        return classify_job_log(job_log).inspect_err(|_| {
            session.tracker.active = None;
            session.tracker.debouncer.restart(JobState::Aborted);
        });
    }

    let bar_full = session.read_pixel(ControlName::FinishedPixel)?.is_progress_blue();
    if bar_full {
        return Ok(classify_idle(true, None));
    }
    let entries = match session.read_log() {
        Ok(entries) => entries,
        Err(NanoWriteError::ParseFailure(_)) => return Ok(RawStatus::Unreadable),
        Err(e) => return Err(e),
    };
    Ok(classify_idle(false, entries.last().map(|e| e.message.as_str())))
}

/// Take one sample and feed it to the debouncer.
pub fn poll_once(session: &mut Session) -> Result<JobState, NanoWriteError> {
    let raw = sample(session)?;
    let state = session.tracker.observe(raw);
    debug!("poll: raw {:?} -> confirmed {:?}", raw, state);
    Ok(state)
}

/// Poll until a terminal state is confirmed. Returns [`JobState::Unknown`]
/// when the budget runs out instead of blocking.
pub fn wait_for_terminal(
    session: &mut Session,
    policy: RetryPolicy,
) -> Result<JobState, NanoWriteError> {
    let started = Instant::now();
    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            std::thread::sleep(policy.interval());
        }
        let state = poll_once(session)?;
        if state.is_terminal() {
            return Ok(state);
        }
        if started.elapsed() >= policy.timeout() {
            break;
        }
    }
    warn!(
        "no terminal job state confirmed within {:?} / {} polls",
        policy.timeout(),
        policy.max_attempts
    );
    Ok(JobState::Unknown)
}

/// Like [`wait_for_terminal`] but for callers that need the job to be over.
pub(crate) fn require_terminal(
    session: &mut Session,
    policy: RetryPolicy,
) -> Result<JobState, NanoWriteError> {
    match wait_for_terminal(session, policy)? {
        JobState::Unknown => Err(NanoWriteError::AmbiguousState(
            "job did not reach a confirmed end state".to_string(),
        )),
        state => Ok(state),
    }
}

/// Current state plus whatever progress information is cheap to read.
pub fn job_status(session: &mut Session) -> Result<JobStatus, NanoWriteError> {
    let state = poll_once(session)?;
    let elapsed = match session.read_field(ControlName::ProgressField) {
        Ok(text) => parse_hms(&text),
        Err(NanoWriteError::ParseFailure(_)) => None,
        Err(e) => return Err(e),
    };
    let estimated_total = session.tracker.estimate();
    let progress_fraction = match (elapsed, estimated_total) {
        (Some(e), Some(t)) if !t.is_zero() => Some((e.as_secs_f64() / t.as_secs_f64()).clamp(0.0, 1.0)),
        _ => None,
    };
    Ok(JobStatus {
        state,
        progress_fraction,
        elapsed,
        estimated_total,
    })
}
