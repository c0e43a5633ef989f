use thiserror::Error;

#[derive(Error, Debug)]
pub enum NanoWriteError {
    /// An expected post-condition never became visible within the retry budget.
    #[error("Verification timed out: {0}")]
    VerificationTimeout(String),

    /// The job tracker could not confirm a terminal state within its budget.
    #[error("Ambiguous job state: {0}")]
    AmbiguousState(String),

    #[error("Failed to parse screen text: {0}")]
    ParseFailure(String),

    #[error("Target application unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Instrument is busy: {0}")]
    NotReady(String),

    /// NanoWrite reported an error (`!!!`) while executing the current job.
    #[error("Execution error reported by NanoWrite: {0}")]
    ExecutionError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NanoWriteError {
    /// Stable identifier of the error kind, used by remote callers.
    pub fn kind(&self) -> &'static str {
        match self {
            NanoWriteError::VerificationTimeout(_) => "verification_timeout",
            NanoWriteError::AmbiguousState(_) => "ambiguous_state",
            NanoWriteError::ParseFailure(_) => "parse_failure",
            NanoWriteError::TargetUnavailable(_) => "target_unavailable",
            NanoWriteError::NotReady(_) => "not_ready",
            NanoWriteError::ExecutionError(_) => "execution_error",
            NanoWriteError::InvalidArgument(_) => "invalid_argument",
            NanoWriteError::Config(_) => "config",
            NanoWriteError::PlatformError(_) => "platform_error",
            NanoWriteError::UnsupportedPlatform(_) => "unsupported_platform",
            NanoWriteError::Io(_) => "io",
        }
    }
}
