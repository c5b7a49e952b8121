//! Schema version numbers
//!
//! Versions are stored in the `info` table as decimal strings such as `"2.0"`.

use crate::error::ScanDbError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `major.minor` schema version
///
/// The stored value looks like a decimal number but is read as two integers:
/// `"1.10"` is minor release 10 of major 1 and sorts after `"1.9"`, and
/// `"1.1"` and `"1.10"` are different versions. Only plain ASCII digits are
/// accepted on either side of the dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    /// The "no-op base" recorded before any migration step has run
    pub const BASE: SchemaVersion = SchemaVersion::new(0, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// Schema version this build of the store expects
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(2, 0);

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = ScanDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ScanDbError::InvalidVersion(s.to_string());
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(major) || !digits(minor) {
            return Err(invalid());
        }
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(SchemaVersion { major, minor })
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: SchemaVersion = "2.0".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(2, 0));
        assert_eq!(v.to_string(), "2.0");

        // bare integers are accepted as N.0
        assert_eq!("3".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(3, 0));
        assert_eq!(" 1.10 ".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(1, 10));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "", "abc", "1.", ".5", "1.x", "-1.0", "+1.0", "1.+0", "1.2.3", "1. 0",
        ] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_ordering_is_numeric() {
        let v1_9: SchemaVersion = "1.9".parse().unwrap();
        let v1_10: SchemaVersion = "1.10".parse().unwrap();
        assert!(v1_9 < v1_10);
        assert_ne!("1.1".parse::<SchemaVersion>().unwrap(), v1_10);
        assert!(v1_10 < CURRENT_SCHEMA_VERSION);
        assert!(SchemaVersion::BASE < v1_9);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&CURRENT_SCHEMA_VERSION).unwrap();
        assert_eq!(json, "\"2.0\"");
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CURRENT_SCHEMA_VERSION);
    }
}
