//! Message-schema resource and signal-level codec.
//!
//! Frame layouts are not hardcoded; they come from an externally supplied
//! schema resource (YAML) keyed by frame identifier. Signals are unsigned
//! little-endian bit fields, which is all this node's traffic uses. The
//! schema is loaded once at startup and a load failure is fatal — running
//! without a usable schema would leave the node unable to honor its own
//! fail-safe contract.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::bus::{MAX_FRAME_DATA, MAX_STANDARD_ID};

// Wire names, fixed by the vehicle network's message catalog.
pub const MSG_PSC_LIGHTS: &str = "PSC_Lights";
pub const MSG_ADAS_LIGHTS: &str = "ADAS_Lights";
pub const MSG_SWITCH_STATUS: &str = "LnS_SwitchStatus";

pub const SIG_PROPULSION_LIGHT: &str = "PropulsionSystemStatusLight";
pub const SIG_HV_LIGHT: &str = "HVSystemStatusLight";
pub const SIG_LONG_CTRL_LIGHT: &str = "CAVLongCtrlStatusLight";
pub const SIG_LAT_CTRL_LIGHT: &str = "CAVLatCtrlStatusLight";
pub const SIG_V2X_LIGHT: &str = "CAVV2XStatusLight";

pub const SIG_REGEN_SWITCH: &str = "LnS_RegenBrakingSwitchStatus";
pub const SIG_LONG_SWITCH: &str = "LnS_CAVLongControlSwitchStatus";
pub const SIG_LAT_SWITCH: &str = "LnS_CAVLatControlSwitchStatus";
pub const SIG_V2X_SWITCH: &str = "LnS_CAVV2XControlSwitchStatus";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema resource: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse schema resource: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid schema: {0}")]
    Invalid(String),
    #[error("unknown frame identifier 0x{0:03X}")]
    UnknownFrame(u32),
    #[error("unknown signal {signal} in message {message}")]
    UnknownSignal { message: String, signal: String },
    #[error("payload too short for {message}: {actual} < {expected} bytes")]
    Truncated {
        message: String,
        expected: usize,
        actual: usize,
    },
    #[error("value {value} overflows signal {signal} ({bits} bits)")]
    Overflow {
        signal: String,
        value: u64,
        bits: u8,
    },
    /// A decoded value fell outside the signal's accepted domain. Treated
    /// exactly like a failed decode, never clamped.
    #[error("value {value} out of range for signal {signal}")]
    OutOfRange { signal: String, value: u64 },
}

/// One unsigned little-endian bit field within a frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSpec {
    pub name: String,
    pub start_bit: u8,
    pub bit_length: u8,
}

impl SignalSpec {
    fn mask(&self) -> u64 {
        if self.bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        }
    }
}

/// Layout of one frame: identifier, payload length, and its signals.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSpec {
    pub name: String,
    pub id: u32,
    pub length: u8,
    pub signals: Vec<SignalSpec>,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    messages: Vec<MessageSpec>,
}

/// Parsed and validated message catalog, keyed by frame identifier.
#[derive(Debug)]
pub struct MessageSchema {
    by_id: HashMap<u32, MessageSpec>,
}

impl MessageSchema {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(text)?;
        Self::build(file.messages)
    }

    fn build(messages: Vec<MessageSpec>) -> Result<Self, SchemaError> {
        let mut by_id = HashMap::new();
        for message in messages {
            if message.id > MAX_STANDARD_ID {
                return Err(SchemaError::Invalid(format!(
                    "message {}: identifier 0x{:X} exceeds standard range",
                    message.name, message.id
                )));
            }
            if message.length == 0 || message.length as usize > MAX_FRAME_DATA {
                return Err(SchemaError::Invalid(format!(
                    "message {}: payload length {} outside 1..=8",
                    message.name, message.length
                )));
            }
            let payload_bits = u16::from(message.length) * 8;
            let mut names = HashMap::new();
            for signal in &message.signals {
                if signal.bit_length == 0 {
                    return Err(SchemaError::Invalid(format!(
                        "signal {}: zero bit length",
                        signal.name
                    )));
                }
                let end = u16::from(signal.start_bit) + u16::from(signal.bit_length);
                if end > payload_bits {
                    return Err(SchemaError::Invalid(format!(
                        "signal {}: bits {}..{} exceed {}-byte payload",
                        signal.name, signal.start_bit, end, message.length
                    )));
                }
                if names.insert(signal.name.clone(), ()).is_some() {
                    return Err(SchemaError::Invalid(format!(
                        "message {}: duplicate signal {}",
                        message.name, signal.name
                    )));
                }
            }
            if by_id.insert(message.id, message.clone()).is_some() {
                return Err(SchemaError::Invalid(format!(
                    "duplicate frame identifier 0x{:03X}",
                    message.id
                )));
            }
        }
        Ok(Self { by_id })
    }

    pub fn message(&self, id: u32) -> Result<&MessageSpec, SchemaError> {
        self.by_id.get(&id).ok_or(SchemaError::UnknownFrame(id))
    }

    /// Decode a payload into raw signal values, keyed by signal name.
    pub fn decode(&self, id: u32, data: &[u8]) -> Result<HashMap<String, u64>, SchemaError> {
        let spec = self.message(id)?;
        if data.len() < spec.length as usize {
            return Err(SchemaError::Truncated {
                message: spec.name.clone(),
                expected: spec.length as usize,
                actual: data.len(),
            });
        }
        let raw = raw_word(data);
        let mut values = HashMap::with_capacity(spec.signals.len());
        for signal in &spec.signals {
            let value = (raw >> signal.start_bit) & signal.mask();
            values.insert(signal.name.clone(), value);
        }
        Ok(values)
    }

    /// Encode named signal values into a payload. Signals not named encode
    /// as zero.
    pub fn encode(&self, id: u32, values: &[(&str, u64)]) -> Result<Vec<u8>, SchemaError> {
        let spec = self.message(id)?;
        let mut raw = 0u64;
        for (name, value) in values {
            let signal = spec
                .signals
                .iter()
                .find(|s| s.name == *name)
                .ok_or_else(|| SchemaError::UnknownSignal {
                    message: spec.name.clone(),
                    signal: (*name).to_string(),
                })?;
            if *value > signal.mask() {
                return Err(SchemaError::Overflow {
                    signal: signal.name.clone(),
                    value: *value,
                    bits: signal.bit_length,
                });
            }
            raw |= value << signal.start_bit;
        }
        Ok(raw.to_le_bytes()[..spec.length as usize].to_vec())
    }
}

fn raw_word(data: &[u8]) -> u64 {
    let mut padded = [0u8; 8];
    let n = data.len().min(8);
    padded[..n].copy_from_slice(&data[..n]);
    u64::from_le_bytes(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r"
messages:
  - name: PSC_Lights
    id: 1792
    length: 8
    signals:
      - { name: PropulsionSystemStatusLight, start_bit: 0, bit_length: 2 }
      - { name: HVSystemStatusLight, start_bit: 2, bit_length: 2 }
";

    #[test]
    fn decode_extracts_bit_fields() {
        let schema = MessageSchema::from_yaml(SCHEMA).unwrap();
        // prop = 1, hv = 2 -> 0b1001
        let values = schema.decode(0x700, &[0b0000_1001, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(values["PropulsionSystemStatusLight"], 1);
        assert_eq!(values["HVSystemStatusLight"], 2);
    }

    #[test]
    fn encode_round_trips() {
        let schema = MessageSchema::from_yaml(SCHEMA).unwrap();
        let data = schema
            .encode(0x700, &[("PropulsionSystemStatusLight", 1), ("HVSystemStatusLight", 2)])
            .unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(data[0], 0b0000_1001);
    }

    #[test]
    fn unknown_frame_and_truncated_payload_are_errors() {
        let schema = MessageSchema::from_yaml(SCHEMA).unwrap();
        assert!(matches!(
            schema.decode(0x7FF, &[0; 8]),
            Err(SchemaError::UnknownFrame(0x7FF))
        ));
        assert!(matches!(
            schema.decode(0x700, &[0; 4]),
            Err(SchemaError::Truncated { .. })
        ));
    }

    #[test]
    fn encode_rejects_overflowing_values() {
        let schema = MessageSchema::from_yaml(SCHEMA).unwrap();
        assert!(matches!(
            schema.encode(0x700, &[("PropulsionSystemStatusLight", 4)]),
            Err(SchemaError::Overflow { .. })
        ));
    }

    #[test]
    fn load_rejects_out_of_bounds_signals() {
        let bad = r"
messages:
  - name: Broken
    id: 16
    length: 1
    signals:
      - { name: TooWide, start_bit: 4, bit_length: 8 }
";
        assert!(matches!(
            MessageSchema::from_yaml(bad),
            Err(SchemaError::Invalid(_))
        ));
    }
}
