//! Applies inbound commands to the device model.
//!
//! The dispatcher owns the devices discovered on one connection together
//! with the descriptors of the devices the manager was asked to run. It is
//! only ever touched from the manager's receive loop, so nothing in here
//! locks.

use std::fmt::Write as _;
use std::sync::Arc;

use starwire_proto::{DeleteProperty, InboundCommand, UpdateValues, VectorDefinition, VectorUpdate};
use starwire_types::{
    DescriptorState, Device, DeviceDescriptor, Elements, ManagerId, PropertyVector,
};
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::event::{EventSender, ManagerEvent};
use crate::labels::NamingAuthority;

/// Default local timestamp prefix for messages that carry none
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y/%m/%d - %H:%M:%S";

pub struct Dispatcher {
    manager: ManagerId,
    devices: Vec<Device>,
    descriptors: Vec<DeviceDescriptor>,
    naming: Arc<dyn NamingAuthority>,
    events: EventSender,
    timestamp_format: String,
}

fn require_device<'a>(
    tag: &str,
    device: Option<&'a String>,
) -> Result<&'a str, DispatchError> {
    device
        .map(String::as_str)
        .ok_or_else(|| DispatchError::MissingAttribute {
            tag: tag.to_string(),
            attribute: "device",
        })
}

impl Dispatcher {
    #[must_use]
    pub fn new(manager: ManagerId, naming: Arc<dyn NamingAuthority>, events: EventSender) -> Self {
        Self {
            manager,
            devices: Vec::new(),
            descriptors: Vec::new(),
            naming,
            events,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }

    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Declare a device this manager is responsible for. No label is taken
    /// until a device matching it is discovered.
    pub fn add_descriptor(&mut self, descriptor: DeviceDescriptor) {
        self.descriptors.push(descriptor);
    }

    #[must_use]
    pub fn descriptors(&self) -> &[DeviceDescriptor] {
        &self.descriptors
    }

    /// Mark every descriptor as started; called when a connection comes up.
    pub fn start_all(&mut self) {
        for descriptor in &mut self.descriptors {
            descriptor.state = DescriptorState::StartRequested;
        }
    }

    /// Devices in discovery order.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Look up a device by protocol name. Never creates one.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Look up a device by protocol name, creating it on first mention.
    pub fn find_or_create(&mut self, name: &str) -> &mut Device {
        let index = self.index_or_create(name);
        &mut self.devices[index]
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.name == name)
    }

    fn index_or_create(&mut self, name: &str) -> usize {
        if let Some(index) = self.index_of(name) {
            return index;
        }

        // A terminated descriptor first, then any descriptor for this name
        let slot = self
            .descriptors
            .iter()
            .position(|d| d.driver_class == name && d.state == DescriptorState::Terminated)
            .or_else(|| self.descriptors.iter().position(|d| d.driver_class == name));

        let remembered = slot.and_then(|i| self.descriptors[i].unique_label.clone());
        let label = match remembered {
            Some(previous) => {
                let label = self.naming.unique_label(&previous);
                if label == previous {
                    debug!(device = name, label = %label, "Reusing descriptor label");
                    label
                } else {
                    // Someone else holds it now; start over from the device name
                    self.naming.release(&label);
                    self.naming.unique_label(name)
                }
            }
            None => self.naming.unique_label(name),
        };

        if let Some(i) = slot {
            let descriptor = &mut self.descriptors[i];
            descriptor.state = DescriptorState::StartRequested;
            descriptor.unique_label = Some(label.clone());
        }

        info!(manager = %self.manager, device = name, label = %label, "New device");
        self.emit(ManagerEvent::NewDevice {
            manager: self.manager,
            device: name.to_string(),
            label: label.clone(),
        });
        self.devices.push(Device::new(name, label, self.manager));
        self.devices.len() - 1
    }

    /// Remove a device, handing its label back to the naming authority.
    ///
    /// The first live descriptor for the same driver remembers the label so
    /// the device asks for it again when it reappears.
    pub fn remove_device(&mut self, name: &str) -> Option<Device> {
        let index = self.index_of(name)?;
        let device = self.devices.remove(index);
        self.naming.release(&device.label);

        if let Some(descriptor) = self
            .descriptors
            .iter_mut()
            .find(|d| d.driver_class == device.name && d.state != DescriptorState::Terminated)
        {
            descriptor.state = DescriptorState::Terminated;
            descriptor.unique_label = Some(device.label.clone());
        }

        info!(manager = %self.manager, device = %device.name, "Device removed");
        self.emit(ManagerEvent::DeviceRemoved {
            manager: self.manager,
            device: device.name.clone(),
            label: device.label.clone(),
        });
        Some(device)
    }

    /// Remove every device, as on connection teardown.
    pub fn clear(&mut self) {
        let names: Vec<String> = self.devices.iter().map(|d| d.name.clone()).collect();
        for name in names {
            self.remove_device(&name);
        }
    }

    /// Apply one command to the model.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` if the command names an unknown device,
    /// property or element, has the wrong kind, redefines a property, or
    /// lacks its device attribute. The model is left unchanged in that case.
    pub fn dispatch(&mut self, command: &InboundCommand) -> Result<(), DispatchError> {
        match command {
            InboundCommand::Message(msg) => {
                self.forward_message(
                    msg.device.as_deref(),
                    msg.timestamp.as_deref(),
                    msg.message.as_deref(),
                );
                Ok(())
            }
            InboundCommand::DeleteProperty(del) => self.delete_property(del),
            InboundCommand::Define(def) => self.define(def),
            InboundCommand::Set(update) => self.update(update),
            InboundCommand::Unrecognized { tag, .. } => {
                Err(DispatchError::UnknownCommand(tag.clone()))
            }
        }
    }

    fn delete_property(&mut self, del: &DeleteProperty) -> Result<(), DispatchError> {
        let name = require_device("delProperty", del.device.as_ref())?;
        let index = self
            .index_of(name)
            .ok_or_else(|| DispatchError::UnknownDevice(name.to_string()))?;

        let Some(property) = &del.name else {
            self.forward_message(Some(name), del.timestamp.as_deref(), del.message.as_deref());
            self.remove_device(name);
            return Ok(());
        };

        self.devices[index]
            .remove_property(property)
            .ok_or_else(|| DispatchError::UnknownProperty {
                device: name.to_string(),
                property: property.clone(),
            })?;

        debug!(device = name, property = %property, "Property removed");
        self.emit(ManagerEvent::PropertyRemoved {
            manager: self.manager,
            device: name.to_string(),
            property: property.clone(),
        });
        self.forward_message(Some(name), del.timestamp.as_deref(), del.message.as_deref());
        Ok(())
    }

    fn define(&mut self, def: &VectorDefinition) -> Result<(), DispatchError> {
        let tag = format!("def{}Vector", def.vector.kind().tag_name());
        let name = require_device(&tag, def.device.as_ref())?;
        let index = self.index_or_create(name);

        if self.devices[index].add_property(def.vector.clone()).is_err() {
            return Err(DispatchError::DuplicateProperty {
                device: name.to_string(),
                property: def.vector.name.clone(),
            });
        }

        debug!(device = name, property = %def.vector.name, kind = %def.vector.kind(), "Property defined");
        self.emit(ManagerEvent::PropertyDefined {
            manager: self.manager,
            device: name.to_string(),
            vector: def.vector.clone(),
        });
        self.forward_message(Some(name), def.vector.timestamp.as_deref(), def.message.as_deref());
        Ok(())
    }

    fn update(&mut self, update: &VectorUpdate) -> Result<(), DispatchError> {
        let tag = format!("set{}Vector", update.values.kind().tag_name());
        let name = require_device(&tag, update.device.as_ref())?;
        let index = self
            .index_of(name)
            .ok_or_else(|| DispatchError::UnknownDevice(name.to_string()))?;

        let vector = self.devices[index].property_mut(&update.name).ok_or_else(|| {
            DispatchError::UnknownProperty {
                device: name.to_string(),
                property: update.name.clone(),
            }
        })?;

        apply_update(name, vector, update)?;
        let snapshot = vector.clone();

        self.emit(ManagerEvent::PropertyUpdated {
            manager: self.manager,
            device: name.to_string(),
            vector: snapshot,
        });
        self.forward_message(Some(name), update.timestamp.as_deref(), update.message.as_deref());
        Ok(())
    }

    fn forward_message(&self, device: Option<&str>, timestamp: Option<&str>, text: Option<&str>) {
        let Some(text) = text else {
            return;
        };

        let label = device.and_then(|name| self.find(name)).map(|d| d.label.clone());
        let timestamp =
            timestamp.map_or_else(|| local_timestamp(&self.timestamp_format), str::to_string);

        info!(device = label.as_deref().unwrap_or("general"), "{timestamp} {text}");
        self.emit(ManagerEvent::Message {
            manager: self.manager,
            device: label,
            timestamp,
            text: text.to_string(),
        });
    }

    fn emit(&self, event: ManagerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for device in &self.devices {
            self.naming.release(&device.label);
        }
    }
}

/// Current local time in `format`, falling back to the default format if
/// `format` is not a valid strftime string.
fn local_timestamp(format: &str) -> String {
    let now = chrono::Local::now();
    let mut stamp = String::new();
    if write!(stamp, "{}", now.format(format)).is_err() {
        stamp = now.format(DEFAULT_TIMESTAMP_FORMAT).to_string();
    }
    stamp
}

/// Check an update against the vector, then apply it. Nothing is changed
/// unless every element name exists and the kinds agree.
fn apply_update(
    device: &str,
    vector: &mut PropertyVector,
    update: &VectorUpdate,
) -> Result<(), DispatchError> {
    if update.values.kind() != vector.kind() {
        return Err(DispatchError::KindMismatch {
            device: device.to_string(),
            property: vector.name.clone(),
            expected: update.values.kind(),
            found: vector.kind(),
        });
    }

    if let Some(unknown) = update
        .values
        .names()
        .into_iter()
        .find(|n| !vector.elements.contains(n))
    {
        return Err(DispatchError::UnknownElement {
            device: device.to_string(),
            property: vector.name.clone(),
            element: unknown.to_string(),
        });
    }

    if let Some(state) = update.state {
        vector.state = state;
    }
    if let Some(timeout) = update.timeout {
        vector.timeout = timeout;
    }
    if update.timestamp.is_some() {
        vector.timestamp.clone_from(&update.timestamp);
    }

    match (&mut vector.elements, &update.values) {
        (Elements::Text(elements), UpdateValues::Text(values)) => {
            for value in values {
                if let Some(e) = elements.iter_mut().find(|e| e.name == value.name) {
                    e.value.clone_from(&value.value);
                }
            }
        }
        (Elements::Number(elements), UpdateValues::Number(values)) => {
            for value in values {
                if let Some(e) = elements.iter_mut().find(|e| e.name == value.name) {
                    let number = &value.value;
                    e.value = number.value;
                    e.text = Some(number.text.clone());
                    e.min = number.min.unwrap_or(e.min);
                    e.max = number.max.unwrap_or(e.max);
                    e.step = number.step.unwrap_or(e.step);
                }
            }
        }
        (Elements::Switch(elements), UpdateValues::Switch(values)) => {
            for value in values {
                if let Some(e) = elements.iter_mut().find(|e| e.name == value.name) {
                    e.state = value.value;
                }
            }
        }
        (Elements::Light(elements), UpdateValues::Light(values)) => {
            for value in values {
                if let Some(e) = elements.iter_mut().find(|e| e.name == value.name) {
                    e.state = value.value;
                }
            }
        }
        (Elements::Blob(elements), UpdateValues::Blob(values)) => {
            for value in values {
                if let Some(e) = elements.iter_mut().find(|e| e.name == value.name) {
                    let payload = &value.value;
                    e.size = payload.size;
                    e.data.clone_from(&payload.data);
                    if !payload.format.is_empty() {
                        e.format.clone_from(&payload.format);
                    }
                }
            }
        }
        // Kinds were compared above
        _ => {}
    }

    Ok(())
}
