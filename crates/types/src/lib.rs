use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw point values as decoded from registers, before SunSpec scale factors are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Text(String),
}

/// A point value as reported in a [`DeviceSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

impl From<&str> for SnapshotValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Model name -> point name -> value. Only non-null points are present.
pub type DeviceSnapshot = BTreeMap<String, BTreeMap<String, SnapshotValue>>;

/// Network identity of the inverter endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub port: u16,
    /// Unit id addressed by raw control register writes.
    pub control_unit_id: u8,
    /// Unit id the SunSpec model map answers on.
    pub sunspec_unit_id: u8,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            host: "192.168.105.20".to_string(),
            port: 502,
            control_unit_id: 3,
            sunspec_unit_id: 126,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_values_serialize_untagged() {
        let mut points = BTreeMap::new();
        points.insert("W".to_string(), SnapshotValue::Integer(-1200));
        points.insert("Hz".to_string(), SnapshotValue::Float(50.01));
        points.insert("Mn".to_string(), SnapshotValue::from("SMA"));
        let mut snapshot = DeviceSnapshot::new();
        snapshot.insert("inverter".to_string(), points);

        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert_eq!(json, r#"{"inverter":{"Hz":50.01,"Mn":"SMA","W":-1200}}"#);
    }
}
