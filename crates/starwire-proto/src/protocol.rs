//! Device-control protocol commands.
//!
//! Inbound elements are turned into the closed [`InboundCommand`] set right
//! after parsing, so nothing downstream compares tag strings. Outbound
//! commands know how to write themselves in the traditional line layout.

use std::fmt::Write as _;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

use starwire_types::{
    BlobElement, Elements, LightElement, NumberElement, Permission, PropertyKind, PropertyState,
    PropertyVector, SwitchElement, SwitchRule, SwitchState, TextElement, UnknownValue,
    parse_number,
};

use crate::error::{CommandError, ParseError};
use crate::xml::XmlElement;

/// Protocol version announced in `getProperties`.
pub const PROTOCOL_VERSION: &str = "1.7";

/// Whether the server should send binary payloads on this connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobPolicy {
    Never,
    #[default]
    Also,
    Only,
}

impl BlobPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Also => "Also",
            Self::Only => "Only",
        }
    }
}

impl FromStr for BlobPolicy {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Never" => Ok(Self::Never),
            "Also" => Ok(Self::Also),
            "Only" => Ok(Self::Only),
            other => Err(UnknownValue {
                kind: "blob policy",
                value: other.to_string(),
            }),
        }
    }
}

/// One named value inside a vector update.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate<T> {
    pub name: String,
    pub value: T,
}

impl<T> ValueUpdate<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// New number value, with optional new limits.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberValue {
    pub value: f64,
    /// Text the value was received as
    pub text: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

/// Decoded binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPayload {
    pub size: usize,
    pub format: String,
    pub data: Vec<u8>,
}

/// Values carried by a `set*Vector` (or `new*Vector`) element.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValues {
    Text(Vec<ValueUpdate<String>>),
    Number(Vec<ValueUpdate<NumberValue>>),
    Switch(Vec<ValueUpdate<SwitchState>>),
    Light(Vec<ValueUpdate<PropertyState>>),
    Blob(Vec<ValueUpdate<BlobPayload>>),
}

impl UpdateValues {
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Text(_) => PropertyKind::Text,
            Self::Number(_) => PropertyKind::Number,
            Self::Switch(_) => PropertyKind::Switch,
            Self::Light(_) => PropertyKind::Light,
            Self::Blob(_) => PropertyKind::Blob,
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Text(v) => v.iter().map(|u| u.name.as_str()).collect(),
            Self::Number(v) => v.iter().map(|u| u.name.as_str()).collect(),
            Self::Switch(v) => v.iter().map(|u| u.name.as_str()).collect(),
            Self::Light(v) => v.iter().map(|u| u.name.as_str()).collect(),
            Self::Blob(v) => v.iter().map(|u| u.name.as_str()).collect(),
        }
    }
}

/// A `def*Vector`: a complete new property.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDefinition {
    pub device: Option<String>,
    pub message: Option<String>,
    pub vector: PropertyVector,
}

/// A `set*Vector`: new values for an existing property.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorUpdate {
    pub device: Option<String>,
    pub name: String,
    pub state: Option<PropertyState>,
    pub timeout: Option<f64>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
    pub values: UpdateValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub device: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteProperty {
    pub device: Option<String>,
    /// Absent means the whole device goes away
    pub name: Option<String>,
    pub timestamp: Option<String>,
    pub message: Option<String>,
}

/// Everything a server can send us.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Define(VectorDefinition),
    Set(VectorUpdate),
    Message(DeviceMessage),
    DeleteProperty(DeleteProperty),
    /// Well-formed element with a tag we do not handle
    Unrecognized { tag: String, device: Option<String> },
}

fn kind_from_tag(tag: &str, prefix: &str) -> Option<PropertyKind> {
    let middle = tag.strip_prefix(prefix)?.strip_suffix("Vector")?;
    match middle {
        "Text" => Some(PropertyKind::Text),
        "Number" => Some(PropertyKind::Number),
        "Switch" => Some(PropertyKind::Switch),
        "Light" => Some(PropertyKind::Light),
        "BLOB" => Some(PropertyKind::Blob),
        _ => None,
    }
}

/// Children that carry element values for `kind`: `def<Kind>` or `one<Kind>`.
fn value_children(element: &XmlElement, kind: PropertyKind) -> impl Iterator<Item = &XmlElement> {
    let name = kind.tag_name();
    element.children.iter().filter(move |child| {
        child
            .tag
            .strip_prefix("def")
            .or_else(|| child.tag.strip_prefix("one"))
            .is_some_and(|rest| rest == name)
    })
}

fn owned_attr(element: &XmlElement, name: &str) -> Option<String> {
    element.attr(name).map(str::to_string)
}

fn parse_attr<T: FromStr>(element: &XmlElement, name: &str) -> Result<Option<T>, ParseError>
where
    T::Err: std::fmt::Display,
{
    element
        .attr(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| ParseError::invalid(&element.tag, name, value, e.to_string()))
        })
        .transpose()
}

fn number_attr(element: &XmlElement, name: &str) -> Result<Option<f64>, ParseError> {
    element
        .attr(name)
        .map(|value| {
            parse_number(value)
                .ok_or_else(|| ParseError::invalid(&element.tag, name, value, "not a number"))
        })
        .transpose()
}

fn number_body(element: &XmlElement) -> Result<f64, ParseError> {
    parse_number(&element.text)
        .ok_or_else(|| ParseError::invalid(&element.tag, "value", element.text.trim(), "not a number"))
}

fn parsed_body<T: FromStr>(element: &XmlElement) -> Result<T, ParseError>
where
    T::Err: std::fmt::Display,
{
    element
        .text
        .parse::<T>()
        .map_err(|e| ParseError::invalid(&element.tag, "value", element.text.trim(), e.to_string()))
}

fn decode_base64(element: &XmlElement) -> Result<Vec<u8>, ParseError> {
    let compact: Vec<u8> = element
        .text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(&compact)
        .map_err(|e| ParseError::invalid(&element.tag, "payload", "<base64>", e.to_string()))
}

impl VectorDefinition {
    /// Build a definition from a `def*Vector` element of the given kind.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for missing names or unparsable values.
    pub fn from_element(element: &XmlElement, kind: PropertyKind) -> Result<Self, ParseError> {
        let name = element.required_attr("name")?.to_string();

        let elements = match kind {
            PropertyKind::Text => Elements::Text(
                value_children(element, kind)
                    .map(|child| {
                        let name = child.required_attr("name")?.to_string();
                        Ok(TextElement {
                            label: child.attr("label").unwrap_or(&name).to_string(),
                            value: child.text.trim().to_string(),
                            name,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Number => Elements::Number(
                value_children(element, kind)
                    .map(|child| {
                        let name = child.required_attr("name")?.to_string();
                        Ok(NumberElement {
                            label: child.attr("label").unwrap_or(&name).to_string(),
                            format: child.attr("format").unwrap_or("%g").to_string(),
                            min: number_attr(child, "min")?.unwrap_or(0.0),
                            max: number_attr(child, "max")?.unwrap_or(0.0),
                            step: number_attr(child, "step")?.unwrap_or(0.0),
                            value: number_body(child)?,
                            text: Some(child.text.trim().to_string()),
                            name,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Switch => Elements::Switch(
                value_children(element, kind)
                    .map(|child| {
                        let name = child.required_attr("name")?.to_string();
                        Ok(SwitchElement {
                            label: child.attr("label").unwrap_or(&name).to_string(),
                            state: parsed_body(child)?,
                            name,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Light => Elements::Light(
                value_children(element, kind)
                    .map(|child| {
                        let name = child.required_attr("name")?.to_string();
                        Ok(LightElement {
                            label: child.attr("label").unwrap_or(&name).to_string(),
                            state: parsed_body(child)?,
                            name,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Blob => Elements::Blob(
                value_children(element, kind)
                    .map(|child| {
                        let name = child.required_attr("name")?.to_string();
                        Ok(BlobElement {
                            label: child.attr("label").unwrap_or(&name).to_string(),
                            format: child.attr("format").unwrap_or_default().to_string(),
                            size: 0,
                            data: Vec::new(),
                            name,
                        })
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
        };

        let mut vector = PropertyVector::new(name, elements);
        if let Some(label) = element.attr("label") {
            vector.label = label.to_string();
        }
        if let Some(group) = element.attr("group") {
            vector.group = group.to_string();
        }
        if kind != PropertyKind::Light
            && let Some(perm) = parse_attr::<Permission>(element, "perm")?
        {
            vector.permission = perm;
        }
        if let Some(state) = parse_attr::<PropertyState>(element, "state")? {
            vector.state = state;
        }
        if let Some(timeout) = number_attr(element, "timeout")? {
            vector.timeout = timeout;
        }
        if kind == PropertyKind::Switch {
            vector.rule = Some(parse_attr::<SwitchRule>(element, "rule")?.unwrap_or_default());
        }
        vector.timestamp = owned_attr(element, "timestamp");

        Ok(Self {
            device: owned_attr(element, "device"),
            message: owned_attr(element, "message"),
            vector,
        })
    }

    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        let vector = &self.vector;
        let kind = vector.kind();
        let mut el = XmlElement::new(format!("def{}Vector", kind.tag_name()));
        if let Some(device) = &self.device {
            el = el.with_attr("device", device);
        }
        el = el
            .with_attr("name", &vector.name)
            .with_attr("label", &vector.label)
            .with_attr("group", &vector.group)
            .with_attr("state", vector.state.as_str());
        if kind != PropertyKind::Light {
            el = el.with_attr("perm", vector.permission.as_str());
        }
        if let Some(rule) = vector.rule {
            el = el.with_attr("rule", rule.as_str());
        }
        el = el.with_attr("timeout", vector.timeout.to_string());
        if let Some(timestamp) = &vector.timestamp {
            el = el.with_attr("timestamp", timestamp);
        }
        if let Some(message) = &self.message {
            el = el.with_attr("message", message);
        }

        let child_tag = format!("def{}", kind.tag_name());
        let child = |name: &str, label: &str| {
            XmlElement::new(child_tag.as_str())
                .with_attr("name", name)
                .with_attr("label", label)
        };
        let children: Vec<XmlElement> = match &vector.elements {
            Elements::Text(v) => v
                .iter()
                .map(|e| child(&e.name, &e.label).with_text(&e.value))
                .collect(),
            Elements::Number(v) => v
                .iter()
                .map(|e| {
                    child(&e.name, &e.label)
                        .with_attr("format", &e.format)
                        .with_attr("min", e.min.to_string())
                        .with_attr("max", e.max.to_string())
                        .with_attr("step", e.step.to_string())
                        .with_text(e.wire_value())
                })
                .collect(),
            Elements::Switch(v) => v
                .iter()
                .map(|e| child(&e.name, &e.label).with_text(e.state.as_str()))
                .collect(),
            Elements::Light(v) => v
                .iter()
                .map(|e| child(&e.name, &e.label).with_text(e.state.as_str()))
                .collect(),
            Elements::Blob(v) => v
                .iter()
                .map(|e| child(&e.name, &e.label).with_attr("format", &e.format))
                .collect(),
        };
        el.children = children;
        el
    }
}

impl VectorUpdate {
    /// Build an update from a `set*Vector` or `new*Vector` element.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the tag is not a vector update, a name is
    /// missing, or a value cannot be parsed.
    pub fn from_element(element: &XmlElement) -> Result<Self, ParseError> {
        let kind = kind_from_tag(&element.tag, "set")
            .or_else(|| kind_from_tag(&element.tag, "new"))
            .ok_or_else(|| ParseError::Malformed(format!("<{}> is not a vector update", element.tag)))?;
        let name = element.required_attr("name")?.to_string();

        let values = match kind {
            PropertyKind::Text => UpdateValues::Text(
                value_children(element, kind)
                    .map(|child| {
                        Ok(ValueUpdate::new(
                            child.required_attr("name")?,
                            child.text.trim().to_string(),
                        ))
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Number => UpdateValues::Number(
                value_children(element, kind)
                    .map(|child| {
                        Ok(ValueUpdate::new(
                            child.required_attr("name")?,
                            NumberValue {
                                value: number_body(child)?,
                                text: child.text.trim().to_string(),
                                min: number_attr(child, "min")?,
                                max: number_attr(child, "max")?,
                                step: number_attr(child, "step")?,
                            },
                        ))
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Switch => UpdateValues::Switch(
                value_children(element, kind)
                    .map(|child| Ok(ValueUpdate::new(child.required_attr("name")?, parsed_body(child)?)))
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Light => UpdateValues::Light(
                value_children(element, kind)
                    .map(|child| Ok(ValueUpdate::new(child.required_attr("name")?, parsed_body(child)?)))
                    .collect::<Result<_, ParseError>>()?,
            ),
            PropertyKind::Blob => UpdateValues::Blob(
                value_children(element, kind)
                    .map(|child| {
                        let data = decode_base64(child)?;
                        let size = parse_attr::<usize>(child, "size")?.unwrap_or(data.len());
                        Ok(ValueUpdate::new(
                            child.required_attr("name")?,
                            BlobPayload {
                                size,
                                format: child.attr("format").unwrap_or_default().to_string(),
                                data,
                            },
                        ))
                    })
                    .collect::<Result<_, ParseError>>()?,
            ),
        };

        Ok(Self {
            device: owned_attr(element, "device"),
            name,
            state: parse_attr(element, "state")?,
            timeout: number_attr(element, "timeout")?,
            timestamp: owned_attr(element, "timestamp"),
            message: owned_attr(element, "message"),
            values,
        })
    }

    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        let kind = self.values.kind();
        let mut el = XmlElement::new(format!("set{}Vector", kind.tag_name()));
        if let Some(device) = &self.device {
            el = el.with_attr("device", device);
        }
        el = el.with_attr("name", &self.name);
        if let Some(state) = self.state {
            el = el.with_attr("state", state.as_str());
        }
        if let Some(timeout) = self.timeout {
            el = el.with_attr("timeout", timeout.to_string());
        }
        if let Some(timestamp) = &self.timestamp {
            el = el.with_attr("timestamp", timestamp);
        }
        if let Some(message) = &self.message {
            el = el.with_attr("message", message);
        }

        let child_tag = format!("one{}", kind.tag_name());
        let child = |name: &str| XmlElement::new(child_tag.as_str()).with_attr("name", name);
        el.children = match &self.values {
            UpdateValues::Text(v) => v.iter().map(|u| child(&u.name).with_text(&u.value)).collect(),
            UpdateValues::Number(v) => v
                .iter()
                .map(|u| child(&u.name).with_text(&u.value.text))
                .collect(),
            UpdateValues::Switch(v) => v
                .iter()
                .map(|u| child(&u.name).with_text(u.value.as_str()))
                .collect(),
            UpdateValues::Light(v) => v
                .iter()
                .map(|u| child(&u.name).with_text(u.value.as_str()))
                .collect(),
            UpdateValues::Blob(v) => v
                .iter()
                .map(|u| {
                    child(&u.name)
                        .with_attr("size", u.value.size.to_string())
                        .with_attr("format", &u.value.format)
                        .with_text(STANDARD.encode(&u.value.data))
                })
                .collect(),
        };
        el
    }
}

impl InboundCommand {
    /// Classify a parsed element.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if a recognised command has missing or invalid
    /// contents. Unknown tags are not an error here.
    pub fn from_element(element: &XmlElement) -> Result<Self, ParseError> {
        match element.tag.as_str() {
            "message" => Ok(Self::Message(DeviceMessage {
                device: owned_attr(element, "device"),
                timestamp: owned_attr(element, "timestamp"),
                message: owned_attr(element, "message"),
            })),
            "delProperty" => Ok(Self::DeleteProperty(DeleteProperty {
                device: owned_attr(element, "device"),
                name: owned_attr(element, "name"),
                timestamp: owned_attr(element, "timestamp"),
                message: owned_attr(element, "message"),
            })),
            tag => {
                if let Some(kind) = kind_from_tag(tag, "def") {
                    VectorDefinition::from_element(element, kind).map(Self::Define)
                } else if kind_from_tag(tag, "set").is_some() {
                    VectorUpdate::from_element(element).map(Self::Set)
                } else {
                    Ok(Self::Unrecognized {
                        tag: tag.to_string(),
                        device: owned_attr(element, "device"),
                    })
                }
            }
        }
    }

    /// Protocol name of the device this command refers to, if any.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::Define(def) => def.device.as_deref(),
            Self::Set(update) => update.device.as_deref(),
            Self::Message(msg) => msg.device.as_deref(),
            Self::DeleteProperty(del) => del.device.as_deref(),
            Self::Unrecognized { device, .. } => device.as_deref(),
        }
    }

    /// Element form of the command, used for diagnostics.
    #[must_use]
    pub fn to_element(&self) -> XmlElement {
        fn optional(mut el: XmlElement, key: &str, value: Option<&String>) -> XmlElement {
            if let Some(value) = value {
                el = el.with_attr(key, value);
            }
            el
        }

        match self {
            Self::Define(def) => def.to_element(),
            Self::Set(update) => update.to_element(),
            Self::Message(msg) => {
                let el = optional(XmlElement::new("message"), "device", msg.device.as_ref());
                let el = optional(el, "timestamp", msg.timestamp.as_ref());
                optional(el, "message", msg.message.as_ref())
            }
            Self::DeleteProperty(del) => {
                let el = optional(XmlElement::new("delProperty"), "device", del.device.as_ref());
                let el = optional(el, "name", del.name.as_ref());
                let el = optional(el, "timestamp", del.timestamp.as_ref());
                optional(el, "message", del.message.as_ref())
            }
            Self::Unrecognized { tag, device } => {
                optional(XmlElement::new(tag.as_str()), "device", device.as_ref())
            }
        }
    }
}

/// Commands a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    EnableBlob {
        device: Option<String>,
        name: Option<String>,
        policy: BlobPolicy,
    },
    GetProperties {
        version: String,
        device: Option<String>,
        name: Option<String>,
    },
    NewText {
        device: String,
        name: String,
        elements: Vec<ValueUpdate<String>>,
    },
    NewNumber {
        device: String,
        name: String,
        elements: Vec<ValueUpdate<String>>,
    },
    NewSwitch {
        device: String,
        name: String,
        elements: Vec<ValueUpdate<SwitchState>>,
    },
}

fn wrong_kind(vector: &PropertyVector, expected: PropertyKind) -> CommandError {
    CommandError::WrongKind {
        property: vector.name.clone(),
        expected,
        found: vector.kind(),
    }
}

impl OutboundCommand {
    /// Session-wide blob delivery directive.
    #[must_use]
    pub const fn enable_blob(policy: BlobPolicy) -> Self {
        Self::EnableBlob {
            device: None,
            name: None,
            policy,
        }
    }

    /// Request every property of every device.
    #[must_use]
    pub fn get_properties(version: impl Into<String>) -> Self {
        Self::GetProperties {
            version: version.into(),
            device: None,
            name: None,
        }
    }

    /// Send every element of a text vector.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::WrongKind` if `vector` is not a text vector.
    pub fn new_text(device: &str, vector: &PropertyVector) -> Result<Self, CommandError> {
        let Elements::Text(elements) = &vector.elements else {
            return Err(wrong_kind(vector, PropertyKind::Text));
        };
        Ok(Self::NewText {
            device: device.to_string(),
            name: vector.name.clone(),
            elements: elements
                .iter()
                .map(|e| ValueUpdate::new(&e.name, e.value.clone()))
                .collect(),
        })
    }

    /// Send every element of a number vector, preferring the raw text form.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::WrongKind` if `vector` is not a number vector.
    pub fn new_number(device: &str, vector: &PropertyVector) -> Result<Self, CommandError> {
        let Elements::Number(elements) = &vector.elements else {
            return Err(wrong_kind(vector, PropertyKind::Number));
        };
        Ok(Self::NewNumber {
            device: device.to_string(),
            name: vector.name.clone(),
            elements: elements
                .iter()
                .map(|e| ValueUpdate::new(&e.name, e.wire_value()))
                .collect(),
        })
    }

    /// Send a single switch element of a switch vector.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::WrongKind` for non-switch vectors and
    /// `CommandError::UnknownElement` if the element does not exist.
    pub fn new_switch(
        device: &str,
        vector: &PropertyVector,
        element: &str,
    ) -> Result<Self, CommandError> {
        let Elements::Switch(elements) = &vector.elements else {
            return Err(wrong_kind(vector, PropertyKind::Switch));
        };
        let switch = elements
            .iter()
            .find(|e| e.name == element)
            .ok_or_else(|| CommandError::UnknownElement {
                property: vector.name.clone(),
                element: element.to_string(),
            })?;
        Ok(Self::NewSwitch {
            device: device.to_string(),
            name: vector.name.clone(),
            elements: vec![ValueUpdate::new(&switch.name, switch.state)],
        })
    }

    /// Append the serialized command to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        let mut out = String::new();
        match self {
            Self::EnableBlob {
                device,
                name,
                policy,
            } => {
                out.push_str("<enableBLOB");
                write_optional_attrs(&mut out, device.as_deref(), name.as_deref());
                let _ = writeln!(out, ">{}</enableBLOB>", policy.as_str());
            }
            Self::GetProperties {
                version,
                device,
                name,
            } => {
                let _ = write!(out, "<getProperties version='{}'", escape(version.as_str()));
                write_optional_attrs(&mut out, device.as_deref(), name.as_deref());
                out.push_str("/>\n");
            }
            Self::NewText {
                device,
                name,
                elements,
            } => write_vector(
                &mut out,
                "Text",
                (device.as_str(), name.as_str()),
                elements.iter().map(|e| (&e.name, e.value.as_str())),
            ),
            Self::NewNumber {
                device,
                name,
                elements,
            } => write_vector(
                &mut out,
                "Number",
                (device.as_str(), name.as_str()),
                elements.iter().map(|e| (&e.name, e.value.as_str())),
            ),
            Self::NewSwitch {
                device,
                name,
                elements,
            } => write_vector(
                &mut out,
                "Switch",
                (device.as_str(), name.as_str()),
                elements.iter().map(|e| (&e.name, e.value.as_str())),
            ),
        }
        dst.extend_from_slice(out.as_bytes());
    }
}

fn write_optional_attrs(out: &mut String, device: Option<&str>, name: Option<&str>) {
    if let Some(device) = device {
        let _ = write!(out, " device='{}'", escape(device));
    }
    if let Some(name) = name {
        let _ = write!(out, " name='{}'", escape(name));
    }
}

/// Text and number vectors close the opening tag on a line of its own.
fn write_vector<'a>(
    out: &mut String,
    kind: &str,
    (device, name): (&str, &str),
    elements: impl Iterator<Item = (&'a String, &'a str)>,
) {
    let _ = writeln!(out, "<new{kind}Vector");
    let _ = writeln!(out, "  device='{}'", escape(device));
    if kind == "Switch" {
        let _ = writeln!(out, "  name='{}'>", escape(name));
    } else {
        let _ = writeln!(out, "  name='{}'\n>", escape(name));
    }
    for (element, value) in elements {
        let _ = writeln!(out, "  <one{kind}");
        let _ = writeln!(out, "    name='{}'>", escape(element.as_str()));
        let _ = writeln!(out, "      {}", escape(value));
        let _ = writeln!(out, "  </one{kind}>");
    }
    let _ = writeln!(out, "</new{kind}Vector>");
}
