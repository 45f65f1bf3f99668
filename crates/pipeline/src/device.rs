use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::engine::InferenceError;

/// A compute device a worker slot is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl FromStr for Device {
    type Err = InferenceError;

    /// Accepts `cpu`, `cuda` (device 0) and `cuda:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| InferenceError::Unsupported(format!("Unknown device '{s}'"))),
        }
    }
}

/// Parse a comma-separated device list such as `cuda:0,cuda:1`.
///
/// The same device may appear more than once to run several slots on it.
pub fn parse_device_list(list: &str) -> Result<Vec<Device>, InferenceError> {
    let devices = list
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Device>, _>>()?;
    if devices.is_empty() {
        return Err(InferenceError::Unsupported(
            "Device list must name at least one device".into(),
        ));
    }
    Ok(devices)
}
