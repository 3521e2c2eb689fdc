//! Streaming XML codec for the device-control protocol.
//!
//! The protocol has no framing: the server writes a sequence of top-level
//! XML elements onto the socket. The decoder keeps a small lexical state
//! machine across calls so every byte is scanned once, no matter how the
//! stream is chunked. When a top-level element closes its bytes are split
//! off, parsed into an [`XmlElement`] and classified as an
//! [`InboundCommand`].
//!
//! ```text
//! bytes ──► Scanner ──► complete element ──► XmlElement ──► InboundCommand
//!            (pos, depth, lexical state)
//! ```
//!
//! A malformed element is yielded as an `Err(ParseError)` item. The stream
//! stays usable; only I/O failures surface as a [`CodecError`].

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::blob::BlobWriter;
use crate::error::{BlobError, ParseError};
use crate::protocol::{InboundCommand, OutboundCommand};
use crate::xml::XmlElement;

/// Default upper bound for one buffered element (64 MiB)
pub const DEFAULT_MAX_ELEMENT_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Lex {
    #[default]
    Outside,
    /// Just read `<`
    TagOpen,
    /// Read `<!`, waiting to tell a comment from CDATA or a declaration
    Markup,
    InTag {
        closing: bool,
        slash: bool,
    },
    Quoted {
        quote: u8,
        closing: bool,
    },
    Comment,
    CData,
    Pi,
    Decl,
}

enum Scan {
    NeedMore,
    /// A top-level element ends before this index
    Element(usize),
    /// Top-level comment, declaration or processing instruction
    Skipped(usize),
    /// Closing tag with nothing open
    StrayClose(usize),
}

#[derive(Debug, Default)]
struct Scanner {
    pos: usize,
    depth: usize,
    lex: Lex,
    /// Last two consumed bytes, for `-->`, `]]>` and `?>`
    prev: [u8; 2],
}

impl Scanner {
    fn is_idle(&self) -> bool {
        self.depth == 0 && self.lex == Lex::Outside
    }

    /// Forget consumed bytes after the caller removed `pos` bytes from the buffer.
    fn rebase(&mut self) {
        self.pos = 0;
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn scan(&mut self, buf: &[u8]) -> Scan {
        while self.pos < buf.len() {
            let at = self.pos;
            let b = buf[at];
            self.pos += 1;

            match self.lex {
                Lex::Outside => {
                    if b == b'<' {
                        self.lex = Lex::TagOpen;
                    }
                }
                Lex::TagOpen => match b {
                    b'/' => {
                        self.lex = Lex::InTag {
                            closing: true,
                            slash: false,
                        };
                    }
                    b'?' => self.lex = Lex::Pi,
                    b'!' => self.lex = Lex::Markup,
                    _ => {
                        // Reprocess this byte as part of the tag
                        self.lex = Lex::InTag {
                            closing: false,
                            slash: false,
                        };
                        self.pos = at;
                        continue;
                    }
                },
                Lex::Markup => {
                    let rest = &buf[at..];
                    if rest.starts_with(b"--") {
                        self.lex = Lex::Comment;
                        self.pos = at + 2;
                        self.prev = [0, 0];
                        continue;
                    }
                    if rest.starts_with(b"[CDATA[") {
                        self.lex = Lex::CData;
                        self.pos = at + 7;
                        self.prev = [0, 0];
                        continue;
                    }
                    if b"--".starts_with(rest) || b"[CDATA[".starts_with(rest) {
                        self.pos = at;
                        return Scan::NeedMore;
                    }
                    self.lex = Lex::Decl;
                    self.pos = at;
                    continue;
                }
                Lex::InTag { closing, slash } => match b {
                    b'"' | b'\'' => self.lex = Lex::Quoted { quote: b, closing },
                    b'>' => {
                        self.lex = Lex::Outside;
                        if closing {
                            if self.depth == 0 {
                                return Scan::StrayClose(self.pos);
                            }
                            self.depth -= 1;
                            if self.depth == 0 {
                                return Scan::Element(self.pos);
                            }
                        } else if slash {
                            if self.depth == 0 {
                                return Scan::Element(self.pos);
                            }
                        } else {
                            self.depth += 1;
                        }
                    }
                    _ => {
                        self.lex = Lex::InTag {
                            closing,
                            slash: b == b'/',
                        };
                    }
                },
                Lex::Quoted { quote, closing } => {
                    if b == quote {
                        self.lex = Lex::InTag {
                            closing,
                            slash: false,
                        };
                    }
                }
                Lex::Comment | Lex::CData | Lex::Pi | Lex::Decl => {
                    let ends = b == b'>'
                        && match self.lex {
                            Lex::Comment => self.prev == *b"--",
                            Lex::CData => self.prev == *b"]]",
                            Lex::Pi => self.prev[1] == b'?',
                            _ => true,
                        };
                    if ends {
                        self.lex = Lex::Outside;
                        if self.depth == 0 {
                            self.prev = [0, 0];
                            return Scan::Skipped(self.pos);
                        }
                    }
                }
            }

            self.prev = [self.prev[1], b];
        }
        Scan::NeedMore
    }
}

/// Parse one complete element into a command.
///
/// # Errors
///
/// Returns a `ParseError` if the bytes are not a single well-formed
/// element or the command it holds is invalid.
pub fn decode_element(bytes: &[u8]) -> Result<InboundCommand, ParseError> {
    let element = XmlElement::parse(bytes)?;
    InboundCommand::from_element(&element)
}

/// What the encoder accepts: whole commands or the pieces of a blob transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Command(OutboundCommand),
    BlobStart {
        device: String,
        property: String,
        timestamp: String,
    },
    BlobChunk {
        name: String,
        size: usize,
        format: String,
        /// Base64 payload, written verbatim
        encoded: Bytes,
    },
    BlobFinish,
}

impl From<OutboundCommand> for OutboundFrame {
    fn from(command: OutboundCommand) -> Self {
        Self::Command(command)
    }
}

/// Codec for the XML command stream.
#[derive(Debug)]
pub struct XmlCodec {
    scanner: Scanner,
    max_element_size: usize,
    /// Set after an oversized element was reported; its remaining bytes are dropped
    discarding: bool,
    blob: BlobWriter,
}

impl Default for XmlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_element_size(DEFAULT_MAX_ELEMENT_SIZE)
    }

    #[must_use]
    pub fn with_max_element_size(max_element_size: usize) -> Self {
        Self {
            scanner: Scanner::default(),
            max_element_size,
            discarding: false,
            blob: BlobWriter::new(),
        }
    }

    #[must_use]
    pub const fn max_element_size(&self) -> usize {
        self.max_element_size
    }

    /// Whether a blob transfer has been started but not finished.
    #[must_use]
    pub const fn blob_in_progress(&self) -> bool {
        self.blob.is_open()
    }

    fn too_large(&self, size: usize) -> ParseError {
        ParseError::TooLarge {
            size,
            max: self.max_element_size,
        }
    }
}

impl Decoder for XmlCodec {
    type Item = Result<InboundCommand, ParseError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.scanner.is_idle() {
                match src.iter().position(|&b| b == b'<') {
                    Some(0) => {}
                    Some(skip) => {
                        trace!(bytes = skip, "Skipping text between elements");
                        src.advance(skip);
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            match self.scanner.scan(src) {
                Scan::NeedMore => {
                    if self.discarding {
                        src.advance(self.scanner.pos);
                        self.scanner.rebase();
                    } else if src.len() > self.max_element_size {
                        let size = src.len();
                        src.advance(self.scanner.pos);
                        self.scanner.rebase();
                        self.discarding = true;
                        return Ok(Some(Err(self.too_large(size))));
                    }
                    return Ok(None);
                }
                Scan::Skipped(end) => {
                    src.advance(end);
                    self.scanner.rebase();
                }
                Scan::StrayClose(end) => {
                    let bytes = src.split_to(end);
                    self.scanner.reset();
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    return Ok(Some(Err(ParseError::Malformed(format!(
                        "unexpected closing tag {}",
                        String::from_utf8_lossy(&bytes).trim()
                    )))));
                }
                Scan::Element(end) => {
                    let bytes = src.split_to(end);
                    self.scanner.reset();
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    if bytes.len() > self.max_element_size {
                        return Ok(Some(Err(self.too_large(bytes.len()))));
                    }

                    let decoded = decode_element(&bytes);
                    if let Err(e) = &decoded {
                        debug!(error = %e, raw = %String::from_utf8_lossy(&bytes), "Rejected element");
                    }
                    return Ok(Some(decoded));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        let truncated = !self.scanner.is_idle() && !self.discarding;
        src.clear();
        self.scanner.reset();
        self.discarding = false;

        if truncated {
            return Ok(Some(Err(ParseError::Malformed(
                "stream ended inside an element".into(),
            ))));
        }
        Ok(None)
    }
}

impl Encoder<OutboundFrame> for XmlCodec {
    type Error = CodecError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            OutboundFrame::Command(command) => {
                if self.blob.is_open() {
                    return Err(BlobError::InProgress.into());
                }
                command.write_to(dst);
            }
            OutboundFrame::BlobStart {
                device,
                property,
                timestamp,
            } => self.blob.begin(dst, &device, &property, &timestamp)?,
            OutboundFrame::BlobChunk {
                name,
                size,
                format,
                encoded,
            } => self.blob.append(dst, &name, size, &format, &encoded)?,
            OutboundFrame::BlobFinish => self.blob.finish(dst)?,
        }
        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob transfer error: {0}")]
    Blob(#[from] BlobError),
}
