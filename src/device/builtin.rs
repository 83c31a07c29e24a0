//! Builtin device models for the node firmwares deployed on this network.
//!
//! Field layouts mirror what each firmware actually transmits: flag bits 1
//! and up carry telemetry, the high bit carries the optional text field.
//! Centi-degree temperatures decode with a 0.01 scale, millivolt supply
//! rails with 0.001.

use std::time::Duration;

use crate::codec::FieldSpec;
use crate::codec::Schema;
use crate::constants::TEXT_FLAG;
use crate::device::model::{CommandSpec, DeviceModel, Domain};

fn schema(fields: Vec<FieldSpec>) -> Schema {
    // Builtin layouts are fixed at compile time; a collision here is a bug
    // in this file, not a runtime condition.
    Schema::new(fields).expect("builtin schema")
}

/// Mains relay node: temperature, relay state, supply voltage. Polled every
/// minute, switchable, flash-updatable.
pub fn relay_model() -> DeviceModel {
    let rx = schema(vec![
        FieldSpec::scaled(1 << 1, "temp", 2, 0.01),
        FieldSpec::uint(1 << 2, "relay", 1),
        FieldSpec::scaled(1 << 3, "vcc", 2, 0.001),
        FieldSpec::text(TEXT_FLAG, "text"),
    ]);
    let set_relay = CommandSpec::new(
        "set_relay",
        vec![(
            FieldSpec::uint(1 << 2, "state", 1),
            Domain::OneOf(vec![0, 1]),
        )],
        true,
    )
    .expect("builtin command");
    DeviceModel::new(
        "Relay Device v1.0",
        rx,
        vec![set_relay],
        Some(Duration::from_secs(60)),
        true,
    )
}

/// Triac dimmer node: temperature plus output level. Polled every minute,
/// flash-updatable.
pub fn triac_model() -> DeviceModel {
    let rx = schema(vec![
        FieldSpec::scaled(1 << 1, "temp", 2, 0.01),
        FieldSpec::uint(1 << 2, "level", 1),
        FieldSpec::text(TEXT_FLAG, "text"),
    ]);
    let set_level = CommandSpec::new(
        "set_level",
        vec![(
            FieldSpec::uint(1 << 2, "level", 1),
            Domain::Range { min: 0, max: 100 },
        )],
        true,
    )
    .expect("builtin command");
    DeviceModel::new(
        "Triac Control v1.0",
        rx,
        vec![set_level],
        Some(Duration::from_secs(60)),
        true,
    )
}

/// Battery PIR sensor: purely event-driven, never polled.
pub fn pir_model() -> DeviceModel {
    let rx = schema(vec![
        FieldSpec::uint(1 << 1, "pir", 1),
        FieldSpec::scaled(1 << 2, "vcc", 2, 0.001),
        FieldSpec::text(TEXT_FLAG, "text"),
    ]);
    DeviceModel::new("PIR Device v1.0", rx, vec![], None, false)
}

/// Battery humidity/temperature sensor: reports on its own schedule, with a
/// three-way reporting mode.
pub fn humidity_model() -> DeviceModel {
    let rx = schema(vec![
        FieldSpec::scaled(1 << 1, "temp", 2, 0.01),
        FieldSpec::scaled(1 << 2, "humidity", 2, 0.01),
        FieldSpec::text(TEXT_FLAG, "text"),
    ]);
    let set_mode = CommandSpec::new(
        "set_mode",
        vec![(
            FieldSpec::uint(1 << 1, "mode", 1),
            Domain::OneOf(vec![0, 1, 2]),
        )],
        true,
    )
    .expect("builtin command");
    DeviceModel::new("Humidity Device v1.0", rx, vec![set_mode], None, false)
}

/// All builtin models in one list, for seeding a registry.
pub fn builtin_models() -> Vec<DeviceModel> {
    vec![relay_model(), triac_model(), pir_model(), humidity_model()]
}
