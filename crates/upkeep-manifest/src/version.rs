use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// A `Major.Minor.Patch` version where any trailing component may be a
/// wildcard. `None` in a component means "anything from here on".
///
/// Versions are not totally ordered: comparing against a reference that
/// carries a wildcard is an error, see [`Version::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    major: Option<u32>,
    minor: Option<u32>,
    patch: Option<u32>,
}

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            patch: Some(patch),
        }
    }

    /// The all-wildcard version `*`.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            major: None,
            minor: None,
            patch: None,
        }
    }

    /// `major.*`
    #[must_use]
    pub const fn major_only(major: u32) -> Self {
        Self {
            major: Some(major),
            minor: None,
            patch: None,
        }
    }

    /// `major.minor.*`
    #[must_use]
    pub const fn major_minor(major: u32, minor: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            patch: None,
        }
    }

    /// Parse a version string.
    ///
    /// # Errors
    /// Returns [`VersionError::InvalidFormat`] for empty, non-numeric or
    /// over-long inputs.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        input.parse()
    }

    #[must_use]
    pub fn major(&self) -> Option<u32> {
        self.major
    }

    #[must_use]
    pub fn minor(&self) -> Option<u32> {
        self.minor
    }

    #[must_use]
    pub fn patch(&self) -> Option<u32> {
        self.patch
    }

    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.major.is_none() || self.minor.is_none() || self.patch.is_none()
    }

    /// Compare `self` against a concrete `other`.
    ///
    /// A wildcard component in `self` matches anything, so the comparison
    /// short-circuits to [`Ordering::Equal`] once one is reached.
    ///
    /// # Errors
    /// Returns [`VersionError::UnsupportedComparison`] when `other` contains
    /// a wildcard.
    pub fn compare(&self, other: &Version) -> Result<Ordering, VersionError> {
        let (Some(other_major), Some(other_minor), Some(other_patch)) =
            (other.major, other.minor, other.patch)
        else {
            return Err(VersionError::UnsupportedComparison {
                left: self.to_string(),
                right: other.to_string(),
            });
        };

        let pairs = [
            (self.major, other_major),
            (self.minor, other_minor),
            (self.patch, other_patch),
        ];
        for (part, other_part) in pairs {
            let Some(part) = part else {
                return Ok(Ordering::Equal);
            };
            if part != other_part {
                return Ok(part.cmp(&other_part));
            }
        }
        Ok(Ordering::Equal)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidFormat {
            input: s.to_string(),
        };

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid());
        }

        let mut components = [None; 3];
        let mut seen_wildcard = false;
        for (slot, part) in components.iter_mut().zip(&parts) {
            if *part == "*" {
                seen_wildcard = true;
                continue;
            }
            // Concrete components may not follow a wildcard ("1.*.3").
            if seen_wildcard || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = Some(part.parse::<u32>().map_err(|_| invalid())?);
        }

        let [major, minor, patch] = components;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(major) = self.major else {
            return f.write_str("*");
        };
        let Some(minor) = self.minor else {
            return write!(f, "{major}.*");
        };
        let Some(patch) = self.patch else {
            return write!(f, "{major}.{minor}.*");
        };
        write!(f, "{major}.{minor}.{patch}")
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
