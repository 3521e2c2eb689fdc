//! Generic XML element tree.
//!
//! The codec splits the byte stream into complete top-level elements and
//! hands each one to [`XmlElement::parse`]. Attribute order and body text
//! are kept exactly as received.

use std::fmt::Write as _;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::ParseError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated character data directly inside this element
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Value of the first attribute called `name`.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Like [`attr`](Self::attr) but missing attributes are an error.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::MissingAttribute` if the attribute is absent.
    pub fn required_attr(&self, name: &'static str) -> Result<&str, ParseError> {
        self.attr(name).ok_or_else(|| ParseError::MissingAttribute {
            tag: self.tag.clone(),
            attribute: name,
        })
    }

    /// Parse exactly one complete element from `input`.
    ///
    /// Leading and trailing whitespace, comments and processing instructions
    /// around the element are ignored.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the input is not a single well-formed element.
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::from_reader(input);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ParseError::Xml(format!("at byte {}: {e}", reader.buffer_position())))?;

            match event {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ParseError::Malformed("unexpected closing tag".into()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.text.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(ParseError::Malformed(format!(
                                "text outside of element: '{}'",
                                text.trim()
                            )));
                        }
                    }
                }
                Event::CData(data) => {
                    let data = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    if let Some(parent) = stack.last_mut() {
                        parent.text.push_str(&data);
                    }
                }
                Event::Eof => break,
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(ParseError::Malformed(format!("unclosed element <{}>", open.tag)));
        }

        root.ok_or_else(|| ParseError::Malformed("no element found".into()))
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let tag = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| ParseError::Xml(e.to_string()))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ParseError::Xml(format!("<{tag}>: {e}")))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| ParseError::Xml(e.to_string()))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| ParseError::Xml(format!("<{tag} {key}>: {e}")))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            tag,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<(), ParseError> {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(element);
            return Ok(());
        }
        if root.is_some() {
            return Err(ParseError::Malformed(format!(
                "second root element <{}>",
                element.tag
            )));
        }
        *root = Some(element);
        Ok(())
    }

    /// Serialize back to XML, one element per line, for diagnostics.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    fn write_xml(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent * 2);
        let _ = write!(out, "{pad}<{}", self.tag);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {key}='{}'", escape(value.as_str()));
        }

        let text = self.text.trim();
        if self.children.is_empty() && text.is_empty() {
            out.push_str("/>\n");
            return;
        }

        out.push('>');
        if self.children.is_empty() {
            let _ = writeln!(out, "{}</{}>", escape(text), self.tag);
            return;
        }

        out.push('\n');
        if !text.is_empty() {
            let _ = writeln!(out, "{pad}  {}", escape(text));
        }
        for child in &self.children {
            child.write_xml(out, indent + 1);
        }
        let _ = writeln!(out, "{pad}</{}>", self.tag);
    }
}
