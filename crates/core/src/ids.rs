use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TracehouseError;

/// 128-bit trace identifier carried as two 64-bit halves.
///
/// Renders as 16 lowercase hex digits while the high half is zero, 32
/// otherwise, and parses the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

impl FromStr for TraceId {
    type Err = TracehouseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || input.len() > 32 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TracehouseError::Decode(format!(
                "invalid trace id: {input:?}"
            )));
        }
        if input.len() > 16 {
            let split = input.len() - 16;
            Ok(Self {
                high: parse_hex(&input[..split])?,
                low: parse_hex(&input[split..])?,
            })
        } else {
            Ok(Self {
                high: 0,
                low: parse_hex(input)?,
            })
        }
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 64-bit span identifier, rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = TracehouseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || input.len() > 16 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TracehouseError::Decode(format!("invalid span id: {input:?}")));
        }
        Ok(Self(parse_hex(input)?))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_hex(input: &str) -> Result<u64, TracehouseError> {
    u64::from_str_radix(input, 16)
        .map_err(|e| TracehouseError::Decode(format!("invalid hex id {input:?}: {e}")))
}
