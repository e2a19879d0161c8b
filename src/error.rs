use std::path::PathBuf;
use thiserror::Error;

/// Failures of the device transport.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("unexpected device output: {0}")]
    UnexpectedOutput(String),

    #[error("device task aborted: {0}")]
    Aborted(String),
}

/// The UI hierarchy snapshot could not be read or parsed.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("failed to read UI hierarchy {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed UI hierarchy: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed UI hierarchy attribute: {0}")]
    Attribute(String),

    #[error("invalid bounds `{0}`")]
    Bounds(String),
}

/// Failures of the decision oracle or completion judge.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("oracle call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed oracle response: {0}")]
    Malformed(String),

    #[error("undefined action `{0}`")]
    UndefinedAction(String),

    #[error("undefined decision `{0}`")]
    UndefinedVerdict(String),

    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The action executor could not perform an action.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{kind} {area} is out of range")]
    OutOfRange { kind: &'static str, area: usize },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Documentation store failures.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("documentation I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt documentation record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode journal record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("failed to load screenshot {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save annotated screenshot {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read app mapping {path}: {source}")]
    MappingRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse app mapping {path}: {source}")]
    MappingParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Reasons a task run ends as failed.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("capture failed: {0}")]
    CaptureFailure(String),

    #[error("oracle failed: {0}")]
    OracleFailure(String),

    #[error("out-of-range action: {0}")]
    OutOfRangeAction(String),

    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("round limit of {0} reached")]
    RoundLimit(u32),
}

impl From<TreeError> for AgentError {
    fn from(err: TreeError) -> Self {
        AgentError::CaptureFailure(err.to_string())
    }
}

impl From<AnnotateError> for AgentError {
    fn from(err: AnnotateError) -> Self {
        AgentError::CaptureFailure(err.to_string())
    }
}

impl From<JournalError> for AgentError {
    fn from(err: JournalError) -> Self {
        AgentError::Persistence(err.to_string())
    }
}
