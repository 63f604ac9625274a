//! Human-readable byte sizes.
//!
//! Two dialects live here. [`ByteSize`] is the configuration dialect where
//! every unit is a power of 1024 (`"16MB"` is 16 MiB). [`engine_size`] reads
//! the sizes printed on extraction engine progress lines, where `KiB`/`MiB`
//! are binary and `KB`/`MB`/`kB` are decimal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Byte count parsed from `"128K"`, `"16MB"`, `"1GiB"` or a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn mib(n: u64) -> Self {
        ByteSize(n * MIB)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g. \"16MB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("byte size must not be negative"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        // Environment overrides arrive as strings, so "1048576" lands here too
        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) else {
            return Err(ParseError::InvalidFormat(s));
        };
        let (num_str, unit) = s.split_at(pos);
        if num_str.is_empty() {
            return Err(ParseError::InvalidFormat(s.clone()));
        }

        let num: u64 = num_str.parse()?;
        let multiplier = match unit.trim() {
            "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or(ParseError::InvalidFormat(s))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, divisor) in [("GiB", GIB), ("MiB", MIB), ("KiB", KIB)] {
            if self.0 >= divisor && self.0 % divisor == 0 {
                return write!(f, "{}{}", self.0 / divisor, unit);
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// Convert an engine-reported size such as `("12.5", "MiB")` into bytes.
///
/// Unknown units yield `None`; the caller keeps its previous total.
pub fn engine_size(value: f64, unit: &str) -> Option<u64> {
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" | "k" => 1_000.0,
        "MB" => 1_000_000.0,
        "GB" => 1_000_000_000.0,
        _ => return None,
    };
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_sizes() {
        assert_eq!("1024".parse::<ByteSize>().unwrap().as_u64(), 1024);
        assert_eq!("128K".parse::<ByteSize>().unwrap().as_u64(), 128 * 1024);
        assert_eq!("16MB".parse::<ByteSize>().unwrap().as_u64(), 16 * MIB);
        assert_eq!("1gib".parse::<ByteSize>().unwrap().as_u64(), GIB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "12XB".parse::<ByteSize>(),
            Err(ParseError::InvalidUnit(_))
        ));
        assert!(matches!(
            "MB".parse::<ByteSize>(),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize::mib(16).to_string(), "16MiB");
        assert_eq!(ByteSize(65536).to_string(), "64KiB");
        assert_eq!(ByteSize(1500).to_string(), "1500B");
    }

    #[test]
    fn test_engine_units() {
        assert_eq!(engine_size(1.0, "KiB"), Some(1024));
        assert_eq!(engine_size(1.0, "kB"), Some(1000));
        assert_eq!(engine_size(2.5, "MB"), Some(2_500_000));
        assert_eq!(engine_size(10.0, "MiB"), Some(10 * MIB));
        assert_eq!(engine_size(3.0, "B"), Some(3));
        assert_eq!(engine_size(1.0, "furlongs"), None);
    }

    #[test]
    fn test_deserialize_from_toml_value() {
        #[derive(Deserialize)]
        struct Holder {
            size: ByteSize,
        }
        let holder: Holder = serde_json::from_str(r#"{"size":"64K"}"#).unwrap();
        assert_eq!(holder.size.as_u64(), 64 * 1024);
        let holder: Holder = serde_json::from_str(r#"{"size":4096}"#).unwrap();
        assert_eq!(holder.size.as_u64(), 4096);
    }
}
