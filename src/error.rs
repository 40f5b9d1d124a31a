//! Error types for Marionette

use thiserror::Error;

/// Main error type for Marionette
#[derive(Error, Debug)]
pub enum MarionetteError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Landmark source errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Landmark receiver error: {0}")]
    Receiver(String),

    #[error("Landmark packet parse error: {0}")]
    Parse(String),

    #[error("Unknown landmark name: {0}")]
    UnknownLandmark(String),

    #[error("Unknown landmark schema: {0}")]
    UnknownSchema(String),
}

/// Degenerate geometry encountered while decomposing a pose
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Basis is singular (determinant {determinant:e})")]
    SingularBasis { determinant: f64 },
}

/// Relay wire protocol errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unrecognized message type: {0:?}")]
    UnknownMessageType(String),

    #[error("Malformed init payload: {0:?}")]
    MalformedInit(String),

    #[error("Connection must send init first")]
    NotInitialized,

    #[error("No group registered for leader {0}")]
    UnknownLeader(String),

    #[error("Client {0} cannot supply its own group")]
    SelfSupply(String),

    #[error("Schema mismatch: supplier uses {supplier}, leader {leader} uses {expected}")]
    SchemaMismatch {
        supplier: String,
        leader: String,
        expected: String,
    },

    #[error("Malformed data frame: {0}")]
    MalformedFrame(String),

    #[error("Client id too long: {0} bytes (max 255)")]
    ClientIdTooLong(usize),

    #[error("Landmark {0} has no id in schema {1}")]
    UnmappedLandmark(String, String),
}

/// Pose output errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Pose sink error: {0}")]
    Sink(String),

    #[error("Pose encode error: {0}")]
    Encode(String),
}

/// Result type alias for Marionette operations
pub type Result<T> = std::result::Result<T, MarionetteError>;
