//! Outbound binary payload transfers.
//!
//! A `newBLOBVector` is written in three steps so large payloads can be
//! streamed element by element:
//!
//! ```text
//! <newBLOBVector
//!   device='CCD'
//!   name='CCD1'
//!   timestamp='2024-01-01T00:00:00'>
//!   <oneBLOB
//!     name='CCD1'
//!     size='200'
//!     format='.fits'>
//!     <72 payload bytes>
//!     ...
//!   </oneBLOB>
//! </newBLOBVector>
//! ```

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use quick_xml::escape::escape;

use crate::error::BlobError;

/// Payload bytes per body line
pub const BLOB_LINE_WIDTH: usize = 72;

/// Base64-encode a raw payload for [`BlobWriter::append`].
#[must_use]
pub fn encode_payload(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// Writes one `newBLOBVector`. At most one transfer is open at a time.
#[derive(Debug, Default)]
pub struct BlobWriter {
    open: bool,
}

impl BlobWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Write the opening tag.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::InProgress` if a transfer is already open.
    pub fn begin(
        &mut self,
        dst: &mut BytesMut,
        device: &str,
        property: &str,
        timestamp: &str,
    ) -> Result<(), BlobError> {
        if self.open {
            return Err(BlobError::InProgress);
        }
        let mut out = String::new();
        let _ = writeln!(out, "<newBLOBVector");
        let _ = writeln!(out, "  device='{}'", escape(device));
        let _ = writeln!(out, "  name='{}'", escape(property));
        let _ = writeln!(out, "  timestamp='{}'>", escape(timestamp));
        dst.extend_from_slice(out.as_bytes());
        self.open = true;
        Ok(())
    }

    /// Write one `oneBLOB` element. `encoded` is used verbatim.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::NotStarted` unless [`begin`](Self::begin) was called.
    pub fn append(
        &mut self,
        dst: &mut BytesMut,
        name: &str,
        size: usize,
        format: &str,
        encoded: &[u8],
    ) -> Result<(), BlobError> {
        if !self.open {
            return Err(BlobError::NotStarted);
        }
        let mut out = String::new();
        let _ = writeln!(out, "  <oneBLOB");
        let _ = writeln!(out, "    name='{}'", escape(name));
        let _ = writeln!(out, "    size='{size}'");
        let _ = writeln!(out, "    format='{}'>", escape(format));
        dst.extend_from_slice(out.as_bytes());

        for line in encoded.chunks(BLOB_LINE_WIDTH) {
            dst.extend_from_slice(b"    ");
            dst.extend_from_slice(line);
            dst.extend_from_slice(b"\n");
        }
        dst.extend_from_slice(b"  </oneBLOB>\n");
        Ok(())
    }

    /// Write the closing tag.
    ///
    /// # Errors
    ///
    /// Returns `BlobError::NotStarted` unless a transfer is open.
    pub fn finish(&mut self, dst: &mut BytesMut) -> Result<(), BlobError> {
        if !self.open {
            return Err(BlobError::NotStarted);
        }
        dst.extend_from_slice(b"</newBLOBVector>\n");
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{UpdateValues, VectorUpdate};
    use crate::xml::XmlElement;

    fn lines(buf: &BytesMut) -> Vec<String> {
        String::from_utf8(buf.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_payload_split_into_lines() {
        let mut writer = BlobWriter::new();
        let mut buf = BytesMut::new();
        let payload = vec![b'A'; 200];

        writer.begin(&mut buf, "CCD", "CCD1", "2024-01-01T00:00:00").unwrap();
        writer.append(&mut buf, "CCD1", 200, ".fits", &payload).unwrap();
        writer.finish(&mut buf).unwrap();

        let lines = lines(&buf);
        assert_eq!(lines.first().map(String::as_str), Some("<newBLOBVector"));
        assert_eq!(lines.last().map(String::as_str), Some("</newBLOBVector>"));
        assert!(lines.contains(&"    size='200'".to_string()));

        let body: Vec<&String> = lines.iter().filter(|l| l.contains("AAAA")).collect();
        assert_eq!(body.len(), 3);
        assert_eq!(body[0].trim().len(), 72);
        assert_eq!(body[1].trim().len(), 72);
        assert_eq!(body[2].trim().len(), 56);
        assert_eq!(lines.iter().filter(|l| l.contains("<newBLOBVector")).count(), 1);
    }

    #[test]
    fn test_three_elements_in_one_transfer() {
        let mut writer = BlobWriter::new();
        let mut buf = BytesMut::new();

        writer.begin(&mut buf, "CCD", "CCD1", "2024-01-01T00:00:00").unwrap();
        for (name, len) in [("R", 10), ("G", 150), ("B", 300)] {
            let encoded = encode_payload(&vec![7u8; len]);
            writer
                .append(&mut buf, name, len, ".raw", encoded.as_bytes())
                .unwrap();
        }
        writer.finish(&mut buf).unwrap();
        assert!(!writer.is_open());

        let lines = lines(&buf);
        assert_eq!(lines.iter().filter(|l| l.starts_with("<newBLOBVector")).count(), 1);
        assert_eq!(lines.iter().filter(|l| *l == "</newBLOBVector>").count(), 1);
        assert_eq!(lines.iter().filter(|l| *l == "  <oneBLOB").count(), 3);
        assert_eq!(lines.iter().filter(|l| *l == "  </oneBLOB>").count(), 3);
        assert!(lines.iter().all(|l| l.trim().len() <= BLOB_LINE_WIDTH));

        let element = XmlElement::parse(&buf).unwrap();
        let update = VectorUpdate::from_element(&element).unwrap();
        let UpdateValues::Blob(blobs) = update.values else {
            panic!("expected blob values");
        };
        let sizes: Vec<(&str, usize)> = blobs
            .iter()
            .map(|b| (b.name.as_str(), b.value.data.len()))
            .collect();
        assert_eq!(sizes, vec![("R", 10), ("G", 150), ("B", 300)]);
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut writer = BlobWriter::new();
        let mut buf = BytesMut::new();

        assert_eq!(
            writer.append(&mut buf, "X", 0, "", b""),
            Err(BlobError::NotStarted)
        );
        assert_eq!(writer.finish(&mut buf), Err(BlobError::NotStarted));

        writer.begin(&mut buf, "D", "P", "t").unwrap();
        assert_eq!(writer.begin(&mut buf, "D", "P", "t"), Err(BlobError::InProgress));
        writer.finish(&mut buf).unwrap();

        assert_eq!(
            writer.append(&mut buf, "X", 0, "", b""),
            Err(BlobError::NotStarted)
        );
        assert!(!writer.is_open());
    }

    #[test]
    fn test_written_blob_parses_back() {
        let raw = b"starwire blob payload".repeat(10);
        let encoded = encode_payload(&raw);

        let mut writer = BlobWriter::new();
        let mut buf = BytesMut::new();
        writer.begin(&mut buf, "CCD", "CCD1", "now").unwrap();
        writer
            .append(&mut buf, "CCD1", raw.len(), ".bin", encoded.as_bytes())
            .unwrap();
        writer.finish(&mut buf).unwrap();

        let element = XmlElement::parse(&buf).unwrap();
        let update = VectorUpdate::from_element(&element).unwrap();
        let UpdateValues::Blob(blobs) = update.values else {
            panic!("expected blob values");
        };
        assert_eq!(blobs[0].value.data, raw);
        assert_eq!(blobs[0].value.size, raw.len());
        assert_eq!(blobs[0].value.format, ".bin");
    }
}
