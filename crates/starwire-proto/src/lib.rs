//! XML wire codec for the starwire device-control client.
//!
//! This crate turns the unframed XML stream spoken by device servers into
//! typed commands, and typed commands back into bytes.
//!
//! # Architecture
//!
//! - [`xml`]: Generic element tree parsed with `quick-xml`
//! - [`protocol`]: Inbound and outbound command types
//! - [`transport`]: Incremental codec over a growable byte buffer
//! - [`blob`]: Three-step writer for binary payload uploads
//! - [`error`]: Error types and the `Result` alias
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use starwire_proto::{InboundCommand, XmlCodec};
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = XmlCodec::new();
//! let mut buf = BytesMut::from(
//!     "<message device='Tele' message='Tracking'/>",
//! );
//!
//! let item = codec.decode(&mut buf).unwrap().unwrap().unwrap();
//! assert!(matches!(item, InboundCommand::Message(_)));
//! ```

pub mod blob;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod xml;

pub use blob::{BLOB_LINE_WIDTH, BlobWriter, encode_payload};

pub use error::{BlobError, CommandError, Error, ParseError, Result};

pub use protocol::{
    BlobPayload, BlobPolicy, DeleteProperty, DeviceMessage, InboundCommand, NumberValue,
    OutboundCommand, PROTOCOL_VERSION, UpdateValues, ValueUpdate, VectorDefinition, VectorUpdate,
};

pub use transport::{
    CodecError, DEFAULT_MAX_ELEMENT_SIZE, OutboundFrame, XmlCodec, decode_element,
};

pub use xml::XmlElement;
