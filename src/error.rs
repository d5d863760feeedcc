//! Error types.
//!
//! Only [`StartupError`] is fatal. Every other error is absorbed at the
//! component boundary where it occurs and only surfaces as log output.

use thiserror::Error;

/// Errors that stop the appliance before any worker is started.
///
/// The binary maps every variant to exit status 1.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Refusing to run with superuser privileges.
    #[error("refusing to run as root ({0})")]
    Privileged(String),

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The cellular modem could not be located.
    #[error("modem discovery failed: {0}")]
    ModemDiscovery(String),

    /// Logging sinks could not be set up.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for StartupError {
    fn from(err: config::ConfigError) -> Self {
        StartupError::Config(err.to_string())
    }
}

/// Errors raised when a worker instance cannot be started.
#[derive(Debug, Error)]
pub enum StartError {
    /// The role already has a live instance.
    #[error("worker is already running")]
    AlreadyRunning,

    /// The role was terminated by shutdown.
    #[error("worker is terminated")]
    Terminated,

    /// The process could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised while fetching modem or location status for one tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The status command could not be run or exited unsuccessfully.
    #[error("status command failed: {0}")]
    Command(String),

    /// The status command printed nothing.
    #[error("status command returned no output")]
    Empty,

    /// The status output is not the expected JSON document.
    #[error("failed to parse status output: {0}")]
    Parse(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Command(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Errors raised while calling the room service.
#[derive(Debug, Error)]
pub enum RoomError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the request.
    #[error("room service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Failed to mint an access token.
    #[error("failed to sign access token: {0}")]
    Token(String),

    /// Failed to encode the request payload.
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for RoomError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RoomError::Timeout
        } else if err.is_connect() {
            RoomError::Connection(err.to_string())
        } else {
            RoomError::Http(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for RoomError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        RoomError::Token(err.to_string())
    }
}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::Encode(err.to_string())
    }
}
