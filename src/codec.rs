//! Interpretation of frame payloads per sensor type.
use bytes::Buf;
use std::collections::HashMap;
use std::fmt::{self, Display};

use self::error::{CodecError, RegistryError};

/// Physical unit of a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    RelativeHumidity,
    Rpm,
    NewtonMetre,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Celsius => "C",
            Unit::RelativeHumidity => "%",
            Unit::Rpm => "rpm",
            Unit::NewtonMetre => "Nm",
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Decoded physical quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayValue {
    value: f64,
    unit: Unit,
    /// Decimal places shown.
    precision: usize,
}

impl DisplayValue {
    pub fn new(value: f64, unit: Unit, precision: usize) -> DisplayValue {
        DisplayValue {
            value,
            unit,
            precision,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Value rounded to its precision, without unit.
    pub fn formatted_value(&self) -> String {
        format!("{:.*}", self.precision, self.value)
    }
}

impl Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*} {}", self.precision, self.value, self.unit)
    }
}

/// Decodes a payload of exactly the descriptor's width.
pub type DecodeFn = fn(&[u8]) -> DisplayValue;

/// Layout and interpretation of one sensor type.
#[derive(Clone)]
pub struct SensorTypeDescriptor {
    pub type_id: u8,
    pub name: String,
    pub payload_width: u8,
    pub decode: DecodeFn,
}

impl SensorTypeDescriptor {
    pub fn new(
        type_id: u8,
        name: impl Into<String>,
        payload_width: u8,
        decode: DecodeFn,
    ) -> SensorTypeDescriptor {
        SensorTypeDescriptor {
            type_id,
            name: name.into(),
            payload_width,
            decode,
        }
    }
}

impl fmt::Debug for SensorTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorTypeDescriptor")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .field("payload_width", &self.payload_width)
            .finish_non_exhaustive()
    }
}

/// Decoded sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_type: u8,
    pub sensor_name: String,
    pub value: DisplayValue,
}

impl Reading {
    pub fn unit(&self) -> Unit {
        self.value.unit()
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X}): {}",
            self.sensor_name, self.sensor_type, self.value
        )
    }
}

pub const TEMPERATURE: u8 = 0x01;
pub const HUMIDITY: u8 = 0x02;
pub const OIL_TEMPERATURE: u8 = 0x10;
pub const PRIMARY_AXLE_RPM: u8 = 0x20;
pub const SECONDARY_AXLE_RPM: u8 = 0x21;
pub const GEARBOX_TORQUE: u8 = 0x30;
pub const BRAKE_TORQUE: u8 = 0x31;
pub const AIR_TEMPERATURE: u8 = 0x40;

fn temperature(mut payload: &[u8]) -> DisplayValue {
    DisplayValue::new(payload.get_f32_le().into(), Unit::Celsius, 2)
}

// Humidity is sent in tenths of a percent.
fn humidity(mut payload: &[u8]) -> DisplayValue {
    DisplayValue::new(
        f64::from(payload.get_u16_le()) / 10.,
        Unit::RelativeHumidity,
        1,
    )
}

fn drivetrain_temperature(mut payload: &[u8]) -> DisplayValue {
    DisplayValue::new(payload.get_f32_le().into(), Unit::Celsius, 1)
}

fn rpm(mut payload: &[u8]) -> DisplayValue {
    DisplayValue::new(payload.get_u16_le().into(), Unit::Rpm, 1)
}

fn torque(mut payload: &[u8]) -> DisplayValue {
    DisplayValue::new(payload.get_f32_le().into(), Unit::NewtonMetre, 1)
}

/// Sensor types known to the receiver.
///
/// Built once and then only read. Decoding goes through the registered descriptor, so new sensor
/// types are added by registration.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: HashMap<u8, SensorTypeDescriptor>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registry with the bench sensors and the drivetrain sensors.
    pub fn builtin() -> Registry {
        let descriptors = [
            SensorTypeDescriptor::new(TEMPERATURE, "TEMPERATURE", 4, temperature),
            SensorTypeDescriptor::new(HUMIDITY, "HUMIDITY", 2, humidity),
            SensorTypeDescriptor::new(
                OIL_TEMPERATURE,
                "OIL_TEMPERATURE",
                4,
                drivetrain_temperature,
            ),
            SensorTypeDescriptor::new(PRIMARY_AXLE_RPM, "PRIMARY_AXLE_RPM", 2, rpm),
            SensorTypeDescriptor::new(SECONDARY_AXLE_RPM, "SECONDARY_AXLE_RPM", 2, rpm),
            SensorTypeDescriptor::new(GEARBOX_TORQUE, "GEARBOX_TORQUE", 4, torque),
            SensorTypeDescriptor::new(BRAKE_TORQUE, "BRAKE_TORQUE", 4, torque),
            SensorTypeDescriptor::new(
                AIR_TEMPERATURE,
                "AIR_TEMPERATURE",
                4,
                drivetrain_temperature,
            ),
        ];
        Registry {
            descriptors: descriptors.into_iter().map(|d| (d.type_id, d)).collect(),
        }
    }

    /// Adds a sensor type. Type ids must be unique and layouts at least one byte wide.
    pub fn register(&mut self, descriptor: SensorTypeDescriptor) -> Result<(), RegistryError> {
        if descriptor.payload_width == 0 {
            return Err(RegistryError::ZeroWidth(descriptor.type_id));
        }
        if self.descriptors.contains_key(&descriptor.type_id) {
            return Err(RegistryError::DuplicateSensorType(descriptor.type_id));
        }
        self.descriptors.insert(descriptor.type_id, descriptor);
        Ok(())
    }

    pub fn get(&self, sensor_type: u8) -> Option<&SensorTypeDescriptor> {
        self.descriptors.get(&sensor_type)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Interprets the payload of a validated frame.
    pub fn decode(&self, sensor_type: u8, payload: &[u8]) -> Result<Reading, CodecError> {
        let descriptor = self
            .get(sensor_type)
            .ok_or(CodecError::UnknownSensorType(sensor_type))?;

        if payload.len() != descriptor.payload_width as usize {
            return Err(CodecError::MalformedPayload {
                sensor_type,
                expected_width: descriptor.payload_width,
                actual_width: payload.len(),
            });
        }

        Ok(Reading {
            sensor_type,
            sensor_name: descriptor.name.clone(),
            value: (descriptor.decode)(payload),
        })
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    pub enum CodecError {
        #[error("Unknown sensor type 0x{0:02X}")]
        UnknownSensorType(u8),
        #[error("Malformed payload for sensor type 0x{sensor_type:02X}: expected {expected_width} bytes, got {actual_width}")]
        MalformedPayload {
            sensor_type: u8,
            expected_width: u8,
            actual_width: usize,
        },
    }

    #[derive(Error, Debug, PartialEq)]
    pub enum RegistryError {
        #[error("Sensor type 0x{0:02X} is already registered")]
        DuplicateSensorType(u8),
        #[error("Sensor type 0x{0:02X} has an empty payload layout")]
        ZeroWidth(u8),
    }
}
