//! Best-effort decoding of MeshCore companion packets for event logging
//!
//! The first payload byte is a type tag whose meaning depends on the
//! direction: commands flow to the radio, responses and pushes flow from it.
//! Decoding never fails loudly. Unknown tags and malformed payloads yield
//! `None` and the caller falls back to a hex dump.

mod command;
mod reader;
mod response;

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Which way a packet travels through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Command sent by a TCP client to the radio
    ToRadio,
    /// Response or push received from the radio
    FromRadio,
}

impl Direction {
    /// Label used in JSON event records
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToRadio => "TO_RADIO",
            Direction::FromRadio => "FROM_RADIO",
        }
    }

    /// Arrow used in text event lines
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::ToRadio => "->",
            Direction::FromRadio => "<-",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Integer
    Int(i64),
    /// Scaled or fractional number
    Float(f64),
    /// Text, hex or label
    Text(String),
    /// Boolean flag
    Flag(bool),
    /// Field present in the layout but without a meaningful value
    Missing,
    /// Nested key/value pairs
    Pairs(Vec<(String, String)>),
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Flag(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Text(v) => serializer.serialize_str(v),
            FieldValue::Flag(v) => serializer.serialize_bool(*v),
            FieldValue::Missing => serializer.serialize_none(),
            FieldValue::Pairs(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Ordered field mapping produced by the decoder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields {
    fields: Vec<(&'static str, FieldValue)>,
}

impl DecodedFields {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, builder style
    pub fn with(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.push(key, value);
        self
    }

    /// Append a field
    pub fn push(&mut self, key: &'static str, value: impl Into<FieldValue>) {
        self.fields.push((key, value.into()));
    }

    /// Value of the first field named `key`
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Fields in decode order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when nothing was decoded
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flatten into `key=value | key=value`
    ///
    /// True flags render as the bare key, false flags and missing values are
    /// skipped, floats get two decimals and nested pairs render as
    /// `key={a=1, b=2}`.
    pub fn to_summary(&self) -> String {
        let mut parts = Vec::with_capacity(self.fields.len());
        for (key, value) in &self.fields {
            match value {
                FieldValue::Missing | FieldValue::Flag(false) => {}
                FieldValue::Flag(true) => parts.push((*key).to_string()),
                FieldValue::Float(v) => parts.push(format!("{}={:.2}", key, v)),
                FieldValue::Int(v) => parts.push(format!("{}={}", key, v)),
                FieldValue::Text(v) => parts.push(format!("{}={}", key, v)),
                FieldValue::Pairs(pairs) => {
                    let inner = pairs
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ");
                    parts.push(format!("{}={{{}}}", key, inner));
                }
            }
        }
        parts.join(" | ")
    }
}

impl Serialize for DecodedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Decode a packet payload (tag byte included) travelling in `direction`
///
/// Returns `None` for empty payloads, unknown tags and malformed payloads.
pub fn decode(direction: Direction, packet_type: u8, payload: &[u8]) -> Option<DecodedFields> {
    if payload.is_empty() {
        return None;
    }
    match direction {
        Direction::ToRadio => command::decode_command(packet_type, payload),
        Direction::FromRadio => response::decode_response(packet_type, payload),
    }
}

/// Decode a command sent to the radio
pub fn decode_command(packet_type: u8, payload: &[u8]) -> Option<DecodedFields> {
    decode(Direction::ToRadio, packet_type, payload)
}

/// Decode a response or push received from the radio
pub fn decode_response(packet_type: u8, payload: &[u8]) -> Option<DecodedFields> {
    decode(Direction::FromRadio, packet_type, payload)
}

/// Coordinate in degrees, `Missing` when the radio reports zero
fn coordinate(raw: i64) -> FieldValue {
    if raw == 0 {
        FieldValue::Missing
    } else {
        FieldValue::Float(raw as f64 / 1e6)
    }
}

/// Lookup label or `unknown(n)`
fn label(names: &[(u8, &'static str)], value: u8) -> String {
    names
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("unknown({})", value))
}
