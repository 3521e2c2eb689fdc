use starwire_proto::{BlobError, CodecError, CommandError};
use starwire_types::PropertyKind;
use thiserror::Error;

/// A command that could not be applied to the device model.
///
/// Reported and logged; the connection keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown command <{0}>")]
    UnknownCommand(String),

    #[error("<{tag}> is missing required attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: &'static str },

    #[error("No such device {0}")]
    UnknownDevice(String),

    #[error("Device {device} has no property {property}")]
    UnknownProperty { device: String, property: String },

    #[error("Property {device}.{property} has no element {element}")]
    UnknownElement {
        device: String,
        property: String,
        element: String,
    },

    #[error("Property {device}.{property} is a {found} vector, got a {expected} update")]
    KindMismatch {
        device: String,
        property: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("Property {device}.{property} is already defined")]
    DuplicateProperty { device: String, property: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to {host}:{port} after {attempts} attempts: {source}")]
    Connect {
        host: String,
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {host}:{port} failed: {source}")]
    Transport {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("No devices configured")]
    NoDevices,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(CodecError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Blob(blob) => Self::Blob(blob),
            other => Self::Codec(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
