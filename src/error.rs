//! Error types.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// A test case could not be executed.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The benchmark program could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that was being started.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The benchmark program ran but reported failure.
    #[error("`{program}` exited with {status}")]
    Exit {
        /// Program that failed.
        program: String,
        /// Its exit status.
        status: ExitStatus,
    },

    /// The benchmark program was started but could not be waited on.
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        /// Program that was running.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The benchmark program ran past its deadline and was killed.
    #[error("`{program}` did not finish within {}ms", .timeout.as_millis())]
    Timeout {
        /// Program that was killed.
        program: String,
        /// How long it was given.
        timeout: Duration,
    },

    /// The result artifact could not be written.
    #[error("failed to write result file {}: {source}", .path.display())]
    Artifact {
        /// Where the artifact was going.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Any other driver-specific failure.
    #[error("{0}")]
    Other(String),
}

/// No throughput could be computed from a run's artifacts.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The artifact could not be read.
    #[error("failed to read result file {}: {source}", .path.display())]
    Read {
        /// The artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Nothing in the artifact looked like a throughput report.
    #[error("no throughput found in {}", .path.display())]
    NoMatch {
        /// The artifact path.
        path: PathBuf,
    },

    /// A throughput was found but is not a number.
    #[error("`{value}` is not a throughput: {source}")]
    Parse {
        /// The captured text.
        value: String,
        /// Underlying error.
        #[source]
        source: std::num::ParseFloatError,
    },

    /// A throughput was parsed but cannot be a real measurement.
    #[error("invalid throughput {0}")]
    Invalid(f64),

    /// Any other analyzer-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is missing something or is inconsistent. Reported before any iteration
    /// runs.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// See [`DriverError`].
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// See [`AnalysisError`].
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// A file could not be read or written.
    #[error("{}: {source}", .path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Recorded results could not be (de)serialized.
    #[error("failed to (de)serialize recorded results: {0}")]
    Record(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

/// Shorthand for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
