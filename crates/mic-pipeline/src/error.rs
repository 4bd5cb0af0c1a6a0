use thiserror::Error;

/// Why the byte source could not be opened.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("serial device {port} not found")]
    DeviceAbsent { port: String },

    #[error("serial device {port} is busy (is another program holding it?)")]
    DeviceBusy { port: String },

    #[error("permission denied opening {port}")]
    PermissionDenied { port: String },

    #[error("failed to open {port}: {message}")]
    Other { port: String, message: String },
}

/// Rejected filter parameters. The filter falls back to passthrough when it sees one.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FilterConfigError {
    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("cutoff {hz} Hz must be positive and below the Nyquist frequency ({nyquist} Hz)")]
    CutoffOutOfRange { hz: f64, nyquist: f64 },

    #[error("bandpass low cutoff {low} Hz must be below the high cutoff {high} Hz")]
    InvertedBand { low: f64, high: f64 },
}

/// Fatal pipeline errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not open the serial device after {attempts} attempts")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: ConnectError,
    },

    #[error("stream stayed unhealthy after {attempts} reconnect attempts: {reason}")]
    UnstableStream { attempts: u32, reason: String },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("audio sink error: {0:#}")]
    Sink(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
