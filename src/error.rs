use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the access subsystem's public operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An access policy was not satisfied
    #[error("access violation: {0}")]
    Violation(#[from] Violation),
    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A notification channel could not be started
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Group membership could not be fetched
    #[error("group fetch failed: {0}")]
    Fetch(#[from] FetchError),
    /// Session persistence failed
    #[error("session store failure: {0}")]
    Store(String),
}

/// A policy violation with details about what failed.
#[derive(Debug, Clone)]
pub struct Violation {
    /// The kind of violation that occurred
    pub kind: ViolationKind,
    /// Human-readable message explaining the violation
    pub message: String,
}

impl Violation {
    /// Creates a new violation.
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Violation {}

/// The kind of policy violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// No principal was presented
    Unauthenticated,
    /// The principal holds neither the required group id nor an accepted name
    MissingRequiredGroup {
        /// The group id that was required
        required_group_id: String,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Unauthenticated => write!(f, "Unauthenticated"),
            ViolationKind::MissingRequiredGroup { required_group_id } => {
                write!(f, "Missing required group '{}'", required_group_id)
            }
        }
    }
}

/// Failure while fetching group membership from the portal.
///
/// Every variant is a transport-class failure: the scheduler logs it and keeps
/// running. None of them is ever interpreted as an access denial.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be delivered or the connection failed
    #[error("transport failure: {0}")]
    Transport(String),
    /// The fetch did not resolve within the configured bound
    #[error("group fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The response could not be decoded
    #[error("malformed portal response: {0}")]
    Malformed(String),
    /// The portal answered with an error object
    #[error("portal error {code}: {message}")]
    Portal {
        /// Error code reported by the portal
        code: i64,
        /// Error message reported by the portal
        message: String,
    },
}

impl FetchError {
    /// Short, stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Timeout(_) => "timeout",
            FetchError::Malformed(_) => "malformed",
            FetchError::Portal { .. } => "portal",
        }
    }
}

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Invalid environment variable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name
        name: String,
        /// What was wrong with it
        message: String,
    },

    /// The loaded values are individually valid but inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid env var error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure of the push event stream or of a notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The event stream could not be opened
    #[error("event stream connection failed: {0}")]
    Connect(String),
    /// An open event stream failed
    #[error("event stream failed: {0}")]
    Stream(String),
    /// An event payload could not be decoded
    #[error("malformed membership event: {0}")]
    Malformed(String),
    /// No authenticated principal to scope the stream to
    #[error("no authenticated principal to subscribe for")]
    NoPrincipal,
    /// Monitoring needs a tokio runtime and none is current
    #[error("no async runtime available to run monitoring")]
    NoRuntime,
}
