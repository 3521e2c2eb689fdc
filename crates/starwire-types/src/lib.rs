//! Shared types for starwire components.
//!
//! This crate provides the in-memory model of remote devices used across
//! starwire-proto, starwire-core and the CLI: devices own property vectors,
//! property vectors own typed elements. All types are serializable so the
//! model can be dumped as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A protocol string that does not name any known variant of an enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Identifies the manager (connection) a device was discovered on.
///
/// Devices only hold this id, never the manager itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagerId(pub u64);

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "manager-{}", self.0)
    }
}

/// Element type of a property vector. Fixed when the vector is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyKind {
    /// Name used in protocol tags (`def<Name>Vector`, `one<Name>`).
    #[must_use]
    pub const fn tag_name(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Number => "Number",
            Self::Switch => "Switch",
            Self::Light => "Light",
            Self::Blob => "BLOB",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

/// Current state of a property vector, also the value of a light element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ok => "Ok",
            Self::Busy => "Busy",
            Self::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(Self::Idle),
            "Ok" => Ok(Self::Ok),
            "Busy" => Ok(Self::Busy),
            "Alert" => Ok(Self::Alert),
            other => Err(UnknownValue::new("state", other)),
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may change a property vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "wo")]
    WriteOnly,
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Permission {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::WriteOnly => "wo",
            Self::ReadWrite => "rw",
        }
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl FromStr for Permission {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ro" => Ok(Self::ReadOnly),
            "wo" => Ok(Self::WriteOnly),
            "rw" => Ok(Self::ReadWrite),
            other => Err(UnknownValue::new("permission", other)),
        }
    }
}

/// On/off value of a switch element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "On",
            Self::Off => "Off",
        }
    }
}

impl FromStr for SwitchState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "On" => Ok(Self::On),
            "Off" => Ok(Self::Off),
            other => Err(UnknownValue::new("switch state", other)),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusivity rule of a switch vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchRule {
    #[default]
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneOfMany => "OneOfMany",
            Self::AtMostOne => "AtMostOne",
            Self::AnyOfMany => "AnyOfMany",
        }
    }
}

impl FromStr for SwitchRule {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OneOfMany" => Ok(Self::OneOfMany),
            "AtMostOne" => Ok(Self::AtMostOne),
            "AnyOfMany" => Ok(Self::AnyOfMany),
            other => Err(UnknownValue::new("switch rule", other)),
        }
    }
}

/// Parse a number as sent by device servers.
///
/// Accepts plain decimal notation as well as sexagesimal values such as
/// `12:30:00`, `-5 30 15` or `10;15`. The sign of the first component
/// applies to the whole value.
#[must_use]
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        return value.is_finite().then_some(value);
    }

    let negative = trimmed.starts_with('-');
    let mut total = 0.0;
    let mut divisor = 1.0;
    let mut parts = 0;

    for part in trimmed
        .trim_start_matches(['-', '+'])
        .split([':', ' ', ';'])
        .filter(|p| !p.is_empty())
    {
        let component: f64 = part.parse().ok()?;
        if !component.is_finite() || component < 0.0 {
            return None;
        }
        total += component / divisor;
        divisor *= 60.0;
        parts += 1;
        if parts > 3 {
            return None;
        }
    }

    if parts == 0 {
        return None;
    }

    Some(if negative { -total } else { total })
}

/// Text element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextElement {
    pub name: String,
    pub label: String,
    pub value: String,
}

/// Number element: the numeric value plus the text it was received as.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberElement {
    pub name: String,
    pub label: String,
    /// printf-style display format announced by the driver (`%g`, `%010.6m`...)
    pub format: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
    /// Raw display string; sent in preference to `value` when non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl NumberElement {
    /// Set a new value from protocol text, keeping the raw string around.
    ///
    /// Returns `false` (leaving the element untouched) if the text is not a number.
    pub fn set_from_text(&mut self, text: &str) -> bool {
        let Some(value) = parse_number(text) else {
            return false;
        };
        self.value = value;
        self.text = Some(text.trim().to_string());
        true
    }

    /// Text to put on the wire for this element.
    #[must_use]
    pub fn wire_value(&self) -> String {
        match &self.text {
            Some(text) if !text.is_empty() => text.clone(),
            _ => self.value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchElement {
    pub name: String,
    pub label: String,
    pub state: SwitchState,
}

/// Light element. Read-only on the client side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightElement {
    pub name: String,
    pub label: String,
    pub state: PropertyState,
}

/// Binary payload element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobElement {
    pub name: String,
    pub label: String,
    /// Format tag such as `.fits` or `.fits.z`
    pub format: String,
    /// Size declared by the sender
    pub size: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Elements of a property vector; the variant is the vector's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "elements", rename_all = "snake_case")]
pub enum Elements {
    Text(Vec<TextElement>),
    Number(Vec<NumberElement>),
    Switch(Vec<SwitchElement>),
    Light(Vec<LightElement>),
    Blob(Vec<BlobElement>),
}

impl Elements {
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
    pub fn len(&self) -> usize {
        match self {
            Self::Text(v) => v.len(),
            Self::Number(v) => v.len(),
            Self::Switch(v) => v.len(),
            Self::Light(v) => v.len(),
            Self::Blob(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Text(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Self::Number(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Self::Switch(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Self::Light(v) => v.iter().map(|e| e.name.as_str()).collect(),
            Self::Blob(v) => v.iter().map(|e| e.name.as_str()).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(&name)
    }
}

/// A named, typed group of elements owned by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyVector {
    pub name: String,
    pub label: String,
    pub group: String,
    pub permission: Permission,
    pub state: PropertyState,
    /// Seconds the driver expects an operation on this vector may take
    pub timeout: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Only meaningful for switch vectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<SwitchRule>,
    #[serde(flatten)]
    pub elements: Elements,
}

impl PropertyVector {
    /// New vector with default metadata; label defaults to the name.
    #[must_use]
    pub fn new(name: impl Into<String>, elements: Elements) -> Self {
        let name = name.into();
        let permission = if matches!(elements, Elements::Light(_)) {
            Permission::ReadOnly
        } else {
            Permission::default()
        };
        let rule = matches!(elements, Elements::Switch(_)).then(SwitchRule::default);
        Self {
            label: name.clone(),
            name,
            group: String::new(),
            permission,
            state: PropertyState::default(),
            timeout: 0.0,
            timestamp: None,
            rule,
            elements,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        self.elements.kind()
    }

    /// Current values rendered as text, in element order.
    #[must_use]
    pub fn values(&self) -> Vec<(&str, String)> {
        match &self.elements {
            Elements::Text(v) => v.iter().map(|e| (e.name.as_str(), e.value.clone())).collect(),
            Elements::Number(v) => v.iter().map(|e| (e.name.as_str(), e.wire_value())).collect(),
            Elements::Switch(v) => v
                .iter()
                .map(|e| (e.name.as_str(), e.state.to_string()))
                .collect(),
            Elements::Light(v) => v
                .iter()
                .map(|e| (e.name.as_str(), e.state.to_string()))
                .collect(),
            Elements::Blob(v) => v
                .iter()
                .map(|e| (e.name.as_str(), format!("{} bytes ({})", e.size, e.format)))
                .collect(),
        }
    }

    #[must_use]
    pub fn text(&self, element: &str) -> Option<&str> {
        match &self.elements {
            Elements::Text(v) => v.iter().find(|e| e.name == element).map(|e| e.value.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn number(&self, element: &str) -> Option<f64> {
        match &self.elements {
            Elements::Number(v) => v.iter().find(|e| e.name == element).map(|e| e.value),
            _ => None,
        }
    }

    #[must_use]
    pub fn switch(&self, element: &str) -> Option<SwitchState> {
        match &self.elements {
            Elements::Switch(v) => v.iter().find(|e| e.name == element).map(|e| e.state),
            _ => None,
        }
    }

    #[must_use]
    pub fn light(&self, element: &str) -> Option<PropertyState> {
        match &self.elements {
            Elements::Light(v) => v.iter().find(|e| e.name == element).map(|e| e.state),
            _ => None,
        }
    }

    #[must_use]
    pub fn blob(&self, element: &str) -> Option<&BlobElement> {
        match &self.elements {
            Elements::Blob(v) => v.iter().find(|e| e.name == element),
            _ => None,
        }
    }
}

/// One remote instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Name advertised by the server
    pub name: String,
    /// Locally unique display label
    pub label: String,
    /// Manager this device was discovered on
    pub manager: ManagerId,
    properties: Vec<PropertyVector>,
}

impl Device {
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>, manager: ManagerId) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            manager,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyVector> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyVector> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    /// Properties in definition order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyVector] {
        &self.properties
    }

    /// Attach a property vector.
    ///
    /// # Errors
    ///
    /// Gives the vector back if one with the same name already exists.
    pub fn add_property(&mut self, property: PropertyVector) -> Result<(), PropertyVector> {
        if self.property(&property.name).is_some() {
            return Err(property);
        }
        self.properties.push(property);
        Ok(())
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyVector> {
        let index = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(index))
    }

    /// Property groups in first-seen order.
    #[must_use]
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for property in &self.properties {
            if !groups.contains(&property.group.as_str()) {
                groups.push(&property.group);
            }
        }
        groups
    }
}

/// Lifecycle of a managed device descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorState {
    #[default]
    NotStarted,
    StartRequested,
    Terminated,
}

/// A device a manager is responsible for, declared before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Driver executable handed to the server process
    pub driver: String,
    /// Device name the driver advertises; the identity used for matching
    pub driver_class: String,
    /// Human readable name in the device tree
    pub tree_label: String,
    /// Label the matching device was last given. Remembered, not reserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_label: Option<String>,
    #[serde(default)]
    pub state: DescriptorState,
}

impl DeviceDescriptor {
    #[must_use]
    pub fn new(
        driver: impl Into<String>,
        driver_class: impl Into<String>,
        tree_label: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            driver_class: driver_class.into(),
            tree_label: tree_label.into(),
            unique_label: None,
            state: DescriptorState::NotStarted,
        }
    }
}
