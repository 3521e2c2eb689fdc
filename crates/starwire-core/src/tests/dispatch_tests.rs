//! Tests for applying inbound commands to the device model
//!
//! Tests the dispatcher including:
//! - Device creation on first definition
//! - Property and device removal
//! - Updates against unknown devices, properties and elements
//! - Message forwarding
//! - Label assignment and reuse through descriptors

use super::fixtures::{
    DEF_CONNECTION, DEF_DRIVER_INFO, DEF_EQCOORD, dispatch_all, drain, make_dispatcher, parse,
    telescope_descriptor,
};
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::event::{ManagerEvent, event_channel};
use crate::labels::{LabelRegistry, NamingAuthority};
use starwire_types::{
    DescriptorState, DeviceDescriptor, ManagerId, PropertyKind, PropertyState, SwitchState,
};
use std::sync::Arc;

#[test]
fn test_def_creates_device_and_vector() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    assert_eq!(dispatcher.devices().len(), 1);
    let device = dispatcher.find("Tele").unwrap();
    assert_eq!(device.label, "Tele");
    assert_eq!(device.manager, ManagerId(1));

    let vector = device.property("EQCOORD").unwrap();
    assert_eq!(vector.kind(), PropertyKind::Number);
    assert_eq!(vector.number("RA"), Some(12.5));
    assert_eq!(vector.number("DEC"), Some(-30.0));

    let events = drain(&mut rx);
    assert!(matches!(&events[0], ManagerEvent::NewDevice { device, label, .. } if device == "Tele" && label == "Tele"));
    assert!(matches!(&events[1], ManagerEvent::PropertyDefined { device, vector, .. } if device == "Tele" && vector.name == "EQCOORD"));
    assert_eq!(events.len(), 2);
}

#[test]
fn test_one_number_children_accepted_in_definition() {
    let (mut dispatcher, _rx, _) = make_dispatcher();

    dispatch_all(
        &mut dispatcher,
        &["<defNumberVector device='Tele' name='EQCOORD'><oneNumber name='RA'>12.5</oneNumber></defNumberVector>"],
    );

    let vector = dispatcher.find("Tele").unwrap().property("EQCOORD").unwrap();
    assert_eq!(vector.number("RA"), Some(12.5));
}

#[test]
fn test_second_def_does_not_create_another_device() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD, DEF_CONNECTION, DEF_DRIVER_INFO]);

    assert_eq!(dispatcher.devices().len(), 1);
    assert_eq!(dispatcher.find("Tele").unwrap().properties().len(), 3);

    let new_devices = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ManagerEvent::NewDevice { .. }))
        .count();
    assert_eq!(new_devices, 1);
}

#[test]
fn test_duplicate_definition_keeps_original() {
    let (mut dispatcher, _rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    let err = dispatcher
        .dispatch(&parse(
            "<defTextVector device='Tele' name='EQCOORD'><defText name='RA'>x</defText></defTextVector>",
        ))
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::DuplicateProperty {
            device: "Tele".to_string(),
            property: "EQCOORD".to_string(),
        }
    );
    let vector = dispatcher.find("Tele").unwrap().property("EQCOORD").unwrap();
    assert_eq!(vector.kind(), PropertyKind::Number);
}

#[test]
fn test_del_property_with_name_removes_only_that_vector() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD, DEF_CONNECTION]);
    drain(&mut rx);

    dispatch_all(&mut dispatcher, &["<delProperty device='Tele' name='EQCOORD'/>"]);

    let device = dispatcher.find("Tele").unwrap();
    assert!(device.property("EQCOORD").is_none());
    assert!(device.property("CONNECTION").is_some());

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![ManagerEvent::PropertyRemoved {
            manager: ManagerId(1),
            device: "Tele".to_string(),
            property: "EQCOORD".to_string(),
        }]
    );
}

#[test]
fn test_del_property_without_name_removes_device() {
    let (mut dispatcher, mut rx, registry) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    assert!(registry.is_taken("Tele"));
    drain(&mut rx);

    dispatch_all(&mut dispatcher, &["<delProperty device='Tele'/>"]);

    assert!(dispatcher.devices().is_empty());
    assert!(!registry.is_taken("Tele"));
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ManagerEvent::DeviceRemoved { device, label, .. }] if device == "Tele" && label == "Tele"
    ));
}

#[test]
fn test_del_property_unknown_names_are_errors() {
    let (mut dispatcher, _rx, _) = make_dispatcher();

    let err = dispatcher
        .dispatch(&parse("<delProperty device='Ghost'/>"))
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownDevice("Ghost".to_string()));

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    let err = dispatcher
        .dispatch(&parse("<delProperty device='Tele' name='NOPE'/>"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownProperty { property, .. } if property == "NOPE"));
}

#[test]
fn test_del_property_message_only_forwarded_on_success() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    drain(&mut rx);

    let err = dispatcher
        .dispatch(&parse("<delProperty device='Tele' name='NOPE' message='gone'/>"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownProperty { .. }));
    assert!(drain(&mut rx).is_empty());

    dispatch_all(
        &mut dispatcher,
        &["<delProperty device='Tele' name='EQCOORD' message='gone'/>"],
    );
    let events = drain(&mut rx);
    assert!(matches!(&events[0], ManagerEvent::PropertyRemoved { property, .. } if property == "EQCOORD"));
    assert!(matches!(&events[1], ManagerEvent::Message { text, .. } if text == "gone"));
}

#[test]
fn test_set_for_unknown_device_creates_nothing() {
    let (mut dispatcher, mut rx, registry) = make_dispatcher();

    let err = dispatcher
        .dispatch(&parse(
            "<setNumberVector device='Ghost' name='EQCOORD'><oneNumber name='RA'>1</oneNumber></setNumberVector>",
        ))
        .unwrap_err();

    assert_eq!(err, DispatchError::UnknownDevice("Ghost".to_string()));
    assert!(dispatcher.devices().is_empty());
    assert!(registry.is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_set_for_unknown_property_is_an_error() {
    let (mut dispatcher, _rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    let err = dispatcher
        .dispatch(&parse(
            "<setNumberVector device='Tele' name='FOCUS'><oneNumber name='POS'>1</oneNumber></setNumberVector>",
        ))
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::UnknownProperty {
            device: "Tele".to_string(),
            property: "FOCUS".to_string(),
        }
    );
}

#[test]
fn test_set_with_unknown_element_leaves_model_unchanged() {
    let (mut dispatcher, _rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    let before = dispatcher.find("Tele").unwrap().clone();

    let err = dispatcher
        .dispatch(&parse(
            "<setNumberVector device='Tele' name='EQCOORD' state='Busy'>\
               <oneNumber name='RA'>3</oneNumber>\
               <oneNumber name='ALT'>45</oneNumber>\
             </setNumberVector>",
        ))
        .unwrap_err();

    assert!(matches!(err, DispatchError::UnknownElement { element, .. } if element == "ALT"));
    assert_eq!(dispatcher.find("Tele").unwrap(), &before);
}

#[test]
fn test_set_with_wrong_kind_is_rejected() {
    let (mut dispatcher, _rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    let err = dispatcher
        .dispatch(&parse(
            "<setTextVector device='Tele' name='EQCOORD'><oneText name='RA'>x</oneText></setTextVector>",
        ))
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::KindMismatch {
            device: "Tele".to_string(),
            property: "EQCOORD".to_string(),
            expected: PropertyKind::Text,
            found: PropertyKind::Number,
        }
    );
}

#[test]
fn test_set_updates_values_in_place() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD, DEF_CONNECTION]);
    drain(&mut rx);

    dispatch_all(
        &mut dispatcher,
        &[
            "<setNumberVector device='Tele' name='EQCOORD' state='Busy' timestamp='2024-01-01T00:00:00'>\
               <oneNumber name='RA'>6:30:00</oneNumber>\
             </setNumberVector>",
            "<setSwitchVector device='Tele' name='CONNECTION' state='Ok'>\
               <oneSwitch name='CONNECT'>On</oneSwitch>\
               <oneSwitch name='DISCONNECT'>Off</oneSwitch>\
             </setSwitchVector>",
        ],
    );

    let device = dispatcher.find("Tele").unwrap();
    let eq = device.property("EQCOORD").unwrap();
    assert_eq!(eq.state, PropertyState::Busy);
    assert_eq!(eq.number("RA"), Some(6.5));
    assert_eq!(eq.number("DEC"), Some(-30.0));
    assert_eq!(eq.timestamp.as_deref(), Some("2024-01-01T00:00:00"));

    let connection = device.property("CONNECTION").unwrap();
    assert_eq!(connection.switch("CONNECT"), Some(SwitchState::On));
    assert_eq!(connection.switch("DISCONNECT"), Some(SwitchState::Off));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ManagerEvent::PropertyUpdated { vector, .. } if vector.number("RA") == Some(6.5)));
}

#[test]
fn test_unrecognized_command_is_an_error() {
    let (mut dispatcher, _rx, _) = make_dispatcher();

    let err = dispatcher
        .dispatch(&parse("<pingRequest uid='1'/>"))
        .unwrap_err();

    assert_eq!(err, DispatchError::UnknownCommand("pingRequest".to_string()));
}

#[test]
fn test_missing_device_attribute_is_an_error() {
    let (mut dispatcher, _rx, _) = make_dispatcher();

    let err = dispatcher
        .dispatch(&parse(
            "<setTextVector name='X'><oneText name='A'>v</oneText></setTextVector>",
        ))
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::MissingAttribute {
            tag: "setTextVector".to_string(),
            attribute: "device",
        }
    );
}

#[test]
fn test_general_message_has_no_device() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();

    dispatch_all(
        &mut dispatcher,
        &["<message timestamp='2024-05-01T20:00:00' message='Server started'/>"],
    );

    assert_eq!(
        drain(&mut rx),
        vec![ManagerEvent::Message {
            manager: ManagerId(1),
            device: None,
            timestamp: "2024-05-01T20:00:00".to_string(),
            text: "Server started".to_string(),
        }]
    );
}

#[test]
fn test_message_for_unknown_device_does_not_create_it() {
    let (mut dispatcher, mut rx, _) = make_dispatcher();

    dispatch_all(&mut dispatcher, &["<message device='Ghost' message='boo'/>"]);

    assert!(dispatcher.devices().is_empty());
    let events = drain(&mut rx);
    let [ManagerEvent::Message { device, timestamp, text, .. }] = events.as_slice() else {
        panic!("expected one message, got {events:?}");
    };
    assert!(device.is_none());
    assert!(!timestamp.is_empty());
    assert_eq!(text, "boo");
}

#[test]
fn test_message_attribute_on_definition_is_forwarded_with_label() {
    let registry = Arc::new(LabelRegistry::new());
    registry.unique_label("Tele");
    let (tx, mut rx) = event_channel();
    let mut dispatcher = Dispatcher::new(ManagerId(2), registry, tx).with_timestamp_format("%Y");

    dispatch_all(
        &mut dispatcher,
        &["<defTextVector device='Tele' name='DRIVER_INFO' message='Driver ready'>\
             <defText name='DRIVER_NAME'>Sim</defText>\
           </defTextVector>"],
    );

    let message = drain(&mut rx)
        .into_iter()
        .find(|e| matches!(e, ManagerEvent::Message { .. }))
        .unwrap();
    let ManagerEvent::Message { device, timestamp, text, .. } = message else {
        unreachable!();
    };
    assert_eq!(device.as_deref(), Some("Tele_1"));
    assert_eq!(timestamp.len(), 4);
    assert_eq!(text, "Driver ready");
}

#[test]
fn test_same_device_name_on_two_managers_gets_distinct_labels() {
    let registry = Arc::new(LabelRegistry::new());
    let (tx, _rx) = event_channel();
    let mut first = Dispatcher::new(ManagerId(1), registry.clone(), tx.clone());
    let mut second = Dispatcher::new(ManagerId(2), registry.clone(), tx);

    dispatch_all(&mut first, &[DEF_EQCOORD]);
    dispatch_all(&mut second, &[DEF_EQCOORD]);

    assert_eq!(first.find("Tele").unwrap().label, "Tele");
    assert_eq!(second.find("Tele").unwrap().label, "Tele_1");

    drop(first);
    assert!(!registry.is_taken("Tele"));
    assert!(registry.is_taken("Tele_1"));
}

#[test]
fn test_descriptor_takes_no_label_until_discovered() {
    let (mut dispatcher, _rx, registry) = make_dispatcher();

    dispatcher.add_descriptor(telescope_descriptor());

    let descriptor = &dispatcher.descriptors()[0];
    assert!(descriptor.unique_label.is_none());
    assert_eq!(descriptor.state, DescriptorState::NotStarted);
    assert!(registry.is_empty());

    dispatcher.start_all();
    assert_eq!(dispatcher.descriptors()[0].state, DescriptorState::StartRequested);
}

#[test]
fn test_device_named_like_its_descriptor_keeps_plain_label() {
    let (mut dispatcher, mut rx, registry) = make_dispatcher();
    dispatcher.add_descriptor(DeviceDescriptor::new("Tele", "Tele", "Tele"));
    dispatcher.start_all();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele");
    assert_eq!(dispatcher.descriptors()[0].unique_label.as_deref(), Some("Tele"));
    assert_eq!(registry.len(), 1);
    assert!(matches!(
        &drain(&mut rx)[0],
        ManagerEvent::NewDevice { label, .. } if label == "Tele"
    ));
}

#[test]
fn test_removed_device_label_is_reused_on_rediscovery() {
    let (mut dispatcher, mut rx, registry) = make_dispatcher();
    dispatcher.add_descriptor(telescope_descriptor());
    dispatcher.start_all();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele");

    dispatch_all(&mut dispatcher, &["<delProperty device='Tele'/>"]);
    let descriptor = &dispatcher.descriptors()[0];
    assert_eq!(descriptor.state, DescriptorState::Terminated);
    assert_eq!(descriptor.unique_label.as_deref(), Some("Tele"));
    assert!(registry.is_empty());
    drain(&mut rx);

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele");
    assert_eq!(dispatcher.descriptors()[0].state, DescriptorState::StartRequested);
    assert_eq!(registry.len(), 1);
    assert!(matches!(
        &drain(&mut rx)[0],
        ManagerEvent::NewDevice { label, .. } if label == "Tele"
    ));
}

#[test]
fn test_label_survives_teardown_and_reconnect() {
    let (mut dispatcher, _rx, registry) = make_dispatcher();
    dispatcher.add_descriptor(telescope_descriptor());

    for _ in 0..3 {
        dispatcher.start_all();
        dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
        assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele");

        dispatcher.clear();
        assert!(registry.is_empty());
    }
}

#[test]
fn test_remembered_label_taken_elsewhere_is_not_suffixed_twice() {
    let (mut dispatcher, _rx, registry) = make_dispatcher();
    registry.unique_label("Tele");
    dispatcher.add_descriptor(telescope_descriptor());
    dispatcher.start_all();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);
    assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele_1");
    dispatcher.clear();

    // Another client grabs the remembered label while the device is gone
    registry.unique_label("Tele_1");
    dispatcher.start_all();
    dispatch_all(&mut dispatcher, &[DEF_EQCOORD]);

    assert_eq!(dispatcher.find("Tele").unwrap().label, "Tele_2");
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_first_matching_descriptor_wins() {
    let (mut dispatcher, _rx, _) = make_dispatcher();
    dispatcher.add_descriptor(telescope_descriptor());
    dispatcher.add_descriptor(telescope_descriptor());
    dispatcher.start_all();

    dispatch_all(&mut dispatcher, &[DEF_EQCOORD, "<delProperty device='Tele'/>"]);

    assert_eq!(dispatcher.descriptors()[0].state, DescriptorState::Terminated);
    assert_eq!(dispatcher.descriptors()[1].state, DescriptorState::StartRequested);
}

#[test]
fn test_clear_removes_every_device() {
    let (mut dispatcher, _rx, registry) = make_dispatcher();
    dispatch_all(
        &mut dispatcher,
        &[
            DEF_EQCOORD,
            "<defLightVector device='CCD' name='STATUS'><defLight name='COOLER'>Ok</defLight></defLightVector>",
        ],
    );
    assert_eq!(registry.len(), 2);

    dispatcher.clear();

    assert!(dispatcher.devices().is_empty());
    assert!(registry.is_empty());
}
