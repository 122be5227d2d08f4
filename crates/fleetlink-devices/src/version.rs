//! Extension firmware version.

use fleetlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version reported when a status payload has no `version` field.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// `major.minor.patch[-label]` as reported in the `/status` payload.
///
/// Missing numeric components are zero, so `1.2` equals `1.2.0`. The label
/// is everything after the first `-` and may itself contain hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtensionVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub label: Option<String>,
}

impl ExtensionVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            label: None,
        }
    }

    /// Convert to a semver version for ordering comparisons.
    ///
    /// Fails if the label is not a valid semver pre-release identifier.
    pub fn to_semver(&self) -> Result<semver::Version> {
        let mut version = semver::Version::new(self.major, self.minor, self.patch);
        if let Some(label) = &self.label {
            version.pre = semver::Prerelease::new(label)
                .map_err(|e| Error::InvalidVersion(format!("{}: {}", self, e)))?;
        }
        Ok(version)
    }
}

impl Default for ExtensionVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl FromStr for ExtensionVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (numbers, label) = match s.split_once('-') {
            Some((numbers, label)) => (numbers, Some(label.to_string())),
            None => (s, None),
        };

        let mut parts = [0u64; 3];
        for (index, component) in numbers.split('.').enumerate() {
            if index >= parts.len() {
                break;
            }
            parts[index] = component
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
        }

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            label,
        })
    }
}

impl fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.label {
            write!(f, "-{}", label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let v: ExtensionVersion = "1.2.3".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert!(v.label.is_none());
    }

    #[test]
    fn test_parse_missing_components() {
        let v: ExtensionVersion = "1.2".parse().unwrap();
        assert_eq!(v, "1.2.0".parse().unwrap());
    }

    #[test]
    fn test_parse_label() {
        let v: ExtensionVersion = "1.2.3-beta1".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(v.label.as_deref(), Some("beta1"));

        let v: ExtensionVersion = "1.2.3-beta1-ios8".parse().unwrap();
        assert_eq!(v.label.as_deref(), Some("beta1-ios8"));
        assert_eq!(v.to_string(), "1.2.3-beta1-ios8");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("one.two".parse::<ExtensionVersion>().is_err());
        assert!("".parse::<ExtensionVersion>().is_err());
    }

    #[test]
    fn test_semver_ordering() {
        let older: ExtensionVersion = "1.2.3-beta1".parse().unwrap();
        let newer: ExtensionVersion = "1.2.3".parse().unwrap();
        assert!(older.to_semver().unwrap() < newer.to_semver().unwrap());
        assert_eq!(
            DEFAULT_VERSION.parse::<ExtensionVersion>().unwrap(),
            ExtensionVersion::default()
        );
    }
}
