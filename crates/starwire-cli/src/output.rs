//! Human readable rendering of events and property vectors.

use starwire_core::{ManagerEvent, PropertyVector};
use std::fmt::Write as _;

/// One line per element under a header naming the vector.
pub fn format_vector(device: &str, vector: &PropertyVector) -> String {
    let mut out = format!(
        "{device}.{} [{}, {}, {}]",
        vector.name,
        vector.kind(),
        vector.state,
        vector.permission.as_str()
    );
    for (name, value) in vector.values() {
        let _ = write!(out, "\n  {name} = {value}");
    }
    out
}

fn inline_values(vector: &PropertyVector) -> String {
    vector
        .values()
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_event(event: &ManagerEvent) -> String {
    match event {
        ManagerEvent::StateChanged { manager, state } => format!("[{manager}] {state}"),
        ManagerEvent::NewDevice { device, label, .. } => {
            if device == label {
                format!("+ {device}")
            } else {
                format!("+ {device} (as {label})")
            }
        }
        ManagerEvent::DeviceRemoved { device, .. } => format!("- {device}"),
        ManagerEvent::PropertyDefined { device, vector, .. } => format_vector(device, vector),
        ManagerEvent::PropertyUpdated { device, vector, .. } => format!(
            "{device}.{} ({}) {}",
            vector.name,
            vector.state,
            inline_values(vector)
        ),
        ManagerEvent::PropertyRemoved {
            device, property, ..
        } => format!("- {device}.{property}"),
        ManagerEvent::Message {
            device,
            timestamp,
            text,
            ..
        } => format!(
            "{timestamp} {}: {text}",
            device.as_deref().unwrap_or("general")
        ),
        ManagerEvent::ProtocolError { error, .. } => format!("! {error}"),
        ManagerEvent::ConnectionError {
            host, port, error, ..
        } => format!("! {host}:{port}: {error}"),
        ManagerEvent::ServerOutput { line, .. } => format!("server: {line}"),
    }
}

/// Render an event as text or as one JSON object per line.
pub fn render_event(event: &ManagerEvent, json: bool) -> String {
    if json {
        serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    } else {
        format_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starwire_core::{Elements, ManagerId, NumberElement, PropertyState};

    fn eqcoord() -> PropertyVector {
        let mut vector = PropertyVector::new(
            "EQCOORD",
            Elements::Number(vec![NumberElement {
                name: "RA".to_string(),
                label: "RA".to_string(),
                format: "%g".to_string(),
                value: 12.5,
                ..NumberElement::default()
            }]),
        );
        vector.state = PropertyState::Busy;
        vector
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(
            format_vector("Tele", &eqcoord()),
            "Tele.EQCOORD [Number, Busy, rw]\n  RA = 12.5"
        );
    }

    #[test]
    fn test_format_update_is_one_line() {
        let event = ManagerEvent::PropertyUpdated {
            manager: ManagerId(1),
            device: "Tele".to_string(),
            vector: eqcoord(),
        };
        assert_eq!(format_event(&event), "Tele.EQCOORD (Busy) RA=12.5");
    }

    #[test]
    fn test_format_general_message() {
        let event = ManagerEvent::Message {
            manager: ManagerId(1),
            device: None,
            timestamp: "2024-05-01T20:00:00".to_string(),
            text: "Server started".to_string(),
        };
        assert_eq!(format_event(&event), "2024-05-01T20:00:00 general: Server started");
    }

    #[test]
    fn test_render_event_json() {
        let event = ManagerEvent::NewDevice {
            manager: ManagerId(1),
            device: "CCD".to_string(),
            label: "CCD_1".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&render_event(&event, true)).unwrap();
        assert_eq!(json["event"], "new_device");
        assert_eq!(json["label"], "CCD_1");
        assert_eq!(render_event(&event, false), "+ CCD (as CCD_1)");
    }
}
