//! Error types for the starwire-proto crate.

use starwire_types::PropertyKind;

use crate::transport::CodecError;

/// A malformed element or command on the inbound stream.
///
/// Never fatal to the stream: the decoder keeps going with the next bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("XML error: {0}")]
    Xml(String),

    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Element too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("<{tag}> is missing required attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: &'static str },

    #[error("<{tag}> has invalid {field} '{value}': {reason}")]
    InvalidValue {
        tag: String,
        field: String,
        value: String,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn invalid(
        tag: &str,
        field: impl Into<String>,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            tag: tag.to_string(),
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// An outbound command that cannot be built from the given property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Property {property} is a {found} vector, expected {expected}")]
    WrongKind {
        property: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("Property {property} has no element {element}")]
    UnknownElement { property: String, element: String },
}

/// Out-of-order use of the three-call blob transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("No blob transfer in progress")]
    NotStarted,

    #[error("A blob transfer is already in progress")]
    InProgress,
}

/// Unified error type for protocol operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, Error>;
