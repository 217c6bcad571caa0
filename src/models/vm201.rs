//! Typed records for what the VM201 board exposes.
//!
//! Notes
//! - `DeviceType` is closed; every per-type rule lives in `TypePolicy`.
//! - Unique ids are derived, never parsed from the board.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =====================
// Device types and their policy
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "input")]
    InputSensor,
    #[serde(rename = "output")]
    OutputSensor,
    #[serde(rename = "temp_sensor")]
    TempSensor,
    #[serde(rename = "door_sensor")]
    DoorSensor,
    #[serde(rename = "other")]
    Other,
}

/// How a refresh derives the live state of a device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Decode {
    /// Indicator at index `device_id` of the status page; "1" is on.
    Indicator,
    /// The status page does not attribute input state reliably; always off.
    AlwaysOff,
    /// Nothing on the status page; keep the last known value.
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePolicy {
    pub id_prefix: char,
    pub name_prefix: &'static str,
    pub initial: DeviceState,
    pub decode: Decode,
}

const DOOR_POLICY: TypePolicy = TypePolicy {
    id_prefix: 'D',
    name_prefix: "DoorSensor",
    initial: DeviceState::Binary(false),
    decode: Decode::Indicator,
};
const TEMP_POLICY: TypePolicy = TypePolicy {
    id_prefix: 'T',
    name_prefix: "TempSensor",
    initial: DeviceState::Level(i64::MIN),
    decode: Decode::Retain,
};
const INPUT_POLICY: TypePolicy = TypePolicy {
    id_prefix: 'I',
    name_prefix: "InputSensor",
    initial: DeviceState::Binary(false),
    decode: Decode::AlwaysOff,
};
const OUTPUT_POLICY: TypePolicy = TypePolicy {
    id_prefix: 'O',
    name_prefix: "OutputSensor",
    initial: DeviceState::Binary(false),
    decode: Decode::Indicator,
};
const OTHER_POLICY: TypePolicy = TypePolicy {
    id_prefix: 'Z',
    name_prefix: "OtherSensor",
    initial: DeviceState::Level(i64::MIN),
    decode: Decode::Retain,
};

impl DeviceType {
    pub const ALL: [DeviceType; 5] = [
        DeviceType::InputSensor,
        DeviceType::OutputSensor,
        DeviceType::TempSensor,
        DeviceType::DoorSensor,
        DeviceType::Other,
    ];

    /// Resolve the first word of a names-page row. Unknown words become `Other`.
    pub fn from_token(token: &str) -> DeviceType {
        match token.trim().to_lowercase().as_str() {
            "door" | "door_sensor" => DeviceType::DoorSensor,
            "temp" | "temperature" | "temp_sensor" => DeviceType::TempSensor,
            "input" => DeviceType::InputSensor,
            "output" => DeviceType::OutputSensor,
            _ => DeviceType::Other,
        }
    }

    pub fn policy(self) -> &'static TypePolicy {
        match self {
            DeviceType::DoorSensor => &DOOR_POLICY,
            DeviceType::TempSensor => &TEMP_POLICY,
            DeviceType::InputSensor => &INPUT_POLICY,
            DeviceType::OutputSensor => &OUTPUT_POLICY,
            DeviceType::Other => &OTHER_POLICY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::InputSensor => "input",
            DeviceType::OutputSensor => "output",
            DeviceType::TempSensor => "temp_sensor",
            DeviceType::DoorSensor => "door_sensor",
            DeviceType::Other => "other",
        }
    }

    /// Door, input and output points surface as binary sensors; the rest are numeric.
    pub fn is_binary(self) -> bool {
        matches!(self.policy().initial, DeviceState::Binary(_))
    }
}

impl core::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{controller}_{prefix}{id}`, e.g. `VM201_D3`.
pub fn device_unique_id(controller_name: &str, device_type: DeviceType, device_id: u32) -> String {
    format!("{}_{}{}", controller_name, device_type.policy().id_prefix, device_id)
}

/// Board label with whitespace runs collapsed to `_`; empty labels fall back to the type template.
pub fn device_name(raw: &str, device_type: DeviceType, device_id: u32) -> String {
    let name = raw.split_whitespace().collect::<Vec<_>>().join("_");
    if name.is_empty() {
        format!("{}{}", device_type.policy().name_prefix, device_id)
    } else {
        name
    }
}

// =====================
// Devices
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceState {
    Binary(bool),
    Level(i64),
}

impl core::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceState::Binary(true) => write!(f, "on"),
            DeviceState::Binary(false) => write!(f, "off"),
            DeviceState::Level(i64::MIN) => write!(f, "unknown"),
            DeviceState::Level(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: u32,
    pub device_unique_id: String,
    pub device_type: DeviceType,
    pub name: String,
    pub state: DeviceState,
}

impl Device {
    /// A freshly discovered device carrying the type's placeholder state.
    pub fn discovered(controller_name: &str, device_type: DeviceType, device_id: u32, raw_name: &str) -> Self {
        Device {
            device_id,
            device_unique_id: device_unique_id(controller_name, device_type, device_id),
            device_type,
            name: device_name(raw_name, device_type, device_id),
            state: device_type.policy().initial,
        }
    }
}

pub fn find_device<'a>(devices: &'a [Device], unique_id: &str) -> Option<&'a Device> {
    devices.iter().find(|d| d.device_unique_id == unique_id)
}

/// Freshly decoded states keyed by unique id.
pub type StateMap = BTreeMap<String, DeviceState>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub unique_id: String,
    pub previous: DeviceState,
    pub current: DeviceState,
}

// =====================
// Controller
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub version: String,
}
