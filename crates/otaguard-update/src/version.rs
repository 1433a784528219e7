//! Firmware version parsing and comparison
//!
//! Versions are a `(major, minor, patch)` triple of bytes so that a version fits
//! the three-byte field of the persistent update record. Ordering is
//! lexicographic over the triple; pre-release and build metadata in release
//! tags are accepted but never take part in comparisons.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VersionError;

/// Firmware version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion {
    major: u8,
    minor: u8,
    patch: u8,
}

impl FirmwareVersion {
    /// Create a version from its components
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version or release tag
    ///
    /// Accepts an optional leading `v`/`V`, full semver strings
    /// (`1.2.3-rc.1+build`), and shortened forms (`1.2`, `4`) where the missing
    /// components are zero.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let stripped = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if stripped.is_empty() {
            return Err(VersionError::Empty);
        }

        if let Ok(version) = semver::Version::parse(stripped) {
            return Ok(Self {
                major: narrow(version.major)?,
                minor: narrow(version.minor)?,
                patch: narrow(version.patch)?,
            });
        }

        let core = stripped.split(['-', '+']).next().unwrap_or(stripped);
        let mut components = [0u8; 3];
        let mut count = 0usize;

        for part in core.split('.') {
            let slot = components
                .get_mut(count)
                .ok_or(VersionError::TooManyComponents)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::InvalidComponent(part.to_string()));
            }
            let value: u64 = part
                .parse()
                .map_err(|_| VersionError::InvalidComponent(part.to_string()))?;
            *slot = narrow(value)?;
            count += 1;
        }

        let [major, minor, patch] = components;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// Major component
    pub fn major(&self) -> u8 {
        self.major
    }

    /// Minor component
    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// Patch component
    pub fn patch(&self) -> u8 {
        self.patch
    }

    /// Persisted three-byte form
    pub fn to_bytes(self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }

    /// Restore from the persisted three-byte form
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        let [major, minor, patch] = bytes;
        Self {
            major,
            minor,
            patch,
        }
    }
}

fn narrow(component: u64) -> Result<u8, VersionError> {
    u8::try_from(component).map_err(|_| VersionError::OutOfRange(component))
}

/// Compare two versions lexicographically over `(major, minor, patch)`
pub fn compare(a: &FirmwareVersion, b: &FirmwareVersion) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
}

/// Check whether `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &FirmwareVersion, current: &FirmwareVersion) -> bool {
    compare(candidate, current) == Ordering::Greater
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FirmwareVersion> for String {
    fn from(version: FirmwareVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_prefixed() -> Result<(), VersionError> {
        assert_eq!(FirmwareVersion::parse("1.2.3")?, FirmwareVersion::new(1, 2, 3));
        assert_eq!(FirmwareVersion::parse("v1.2.3")?, FirmwareVersion::new(1, 2, 3));
        assert_eq!(FirmwareVersion::parse(" V2.0.10 ")?, FirmwareVersion::new(2, 0, 10));
        Ok(())
    }

    #[test]
    fn test_parse_short_forms() -> Result<(), VersionError> {
        assert_eq!(FirmwareVersion::parse("v1.4")?, FirmwareVersion::new(1, 4, 0));
        assert_eq!(FirmwareVersion::parse("7")?, FirmwareVersion::new(7, 0, 0));
        assert_eq!(FirmwareVersion::parse("1.4-beta")?, FirmwareVersion::new(1, 4, 0));
        Ok(())
    }

    #[test]
    fn test_parse_ignores_prerelease_and_build() -> Result<(), VersionError> {
        let version = FirmwareVersion::parse("v3.1.4-rc.1+sha.abcdef")?;
        assert_eq!(version, FirmwareVersion::new(3, 1, 4));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(FirmwareVersion::parse(""), Err(VersionError::Empty));
        assert_eq!(FirmwareVersion::parse("v"), Err(VersionError::Empty));
        assert!(matches!(
            FirmwareVersion::parse("latest"),
            Err(VersionError::InvalidComponent(_))
        ));
        assert!(matches!(
            FirmwareVersion::parse("1..2"),
            Err(VersionError::InvalidComponent(_))
        ));
        assert_eq!(
            FirmwareVersion::parse("1.2.3.4"),
            Err(VersionError::TooManyComponents)
        );
        assert_eq!(
            FirmwareVersion::parse("1.256.0"),
            Err(VersionError::OutOfRange(256))
        );
    }

    #[test]
    fn test_compare_is_lexicographic() {
        let v = FirmwareVersion::new;
        assert_eq!(compare(&v(1, 0, 0), &v(1, 1, 0)), Ordering::Less);
        assert_eq!(compare(&v(1, 10, 0), &v(1, 9, 200)), Ordering::Greater);
        assert_eq!(compare(&v(2, 0, 0), &v(1, 255, 255)), Ordering::Greater);
        assert_eq!(compare(&v(1, 2, 3), &v(1, 2, 3)), Ordering::Equal);
    }

    #[test]
    fn test_is_newer() {
        let current = FirmwareVersion::new(1, 0, 0);
        assert!(is_newer(&FirmwareVersion::new(1, 1, 0), &current));
        assert!(!is_newer(&FirmwareVersion::new(1, 0, 0), &current));
        assert!(!is_newer(&FirmwareVersion::new(0, 9, 9), &current));
    }

    #[test]
    fn test_bytes_and_serde_form() -> Result<(), serde_json::Error> {
        let version = FirmwareVersion::new(4, 5, 6);
        assert_eq!(FirmwareVersion::from_bytes(version.to_bytes()), version);

        let json = serde_json::to_string(&version)?;
        assert_eq!(json, "\"4.5.6\"");
        let back: FirmwareVersion = serde_json::from_str("\"v4.5.6\"")?;
        assert_eq!(back, version);
        Ok(())
    }
}
