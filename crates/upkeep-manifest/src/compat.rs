use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::VersionError;
use crate::version::Version;

/// Outcome of checking an installed version against a [`Compatibility`]
/// range. Variants are declared in ascending order of satisfaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompatibilityLevel {
    Unknown,
    Missing,
    /// Installed version is below the range minimum.
    IncompatibleUnder,
    /// Installed version is above the range maximum.
    IncompatibleOver,
    Compatible,
    Verified,
}

impl CompatibilityLevel {
    /// Anything at or above [`CompatibilityLevel::Compatible`] satisfies a
    /// relationship.
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        self >= Self::Compatible
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::Missing => "missing",
            Self::IncompatibleUnder => "below minimum",
            Self::IncompatibleOver => "above maximum",
            Self::Compatible => "compatible",
            Self::Verified => "verified",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub minimum: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Version>,
}

impl Compatibility {
    #[must_use]
    pub fn at_least(minimum: Version) -> Self {
        Self {
            minimum,
            verified: None,
            maximum: None,
        }
    }

    /// Classify `installed` against this range.
    ///
    /// # Errors
    /// Returns [`VersionError::UnsupportedComparison`] when `installed`
    /// contains a wildcard.
    pub fn check(&self, installed: &Version) -> Result<CompatibilityLevel, VersionError> {
        if let Some(verified) = &self.verified
            && verified.compare(installed)? == Ordering::Equal
        {
            return Ok(CompatibilityLevel::Verified);
        }

        if self.minimum.compare(installed)? == Ordering::Greater {
            return Ok(CompatibilityLevel::IncompatibleUnder);
        }

        if let Some(maximum) = &self.maximum
            && maximum.compare(installed)? == Ordering::Less
        {
            return Ok(CompatibilityLevel::IncompatibleOver);
        }

        Ok(CompatibilityLevel::Compatible)
    }
}

/// A dependency of one resource on another, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    /// Explicit manifest URL for the dependency. Without one the target must
    /// already be present in the loaded store.
    #[serde(rename = "manifest", default, skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    pub compatibility: Compatibility,
}

impl Relationship {
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{Compatibility, CompatibilityLevel};
    use crate::version::Version;

    fn v(input: &str) -> Version {
        input.parse().expect("test version should parse")
    }

    #[test]
    fn check_classifies_installed_versions() {
        let cases = [
            (Compatibility::at_least(v("1.0.0")), "1.0.0", CompatibilityLevel::Compatible),
            (Compatibility::at_least(v("1.0.0")), "1.1.0", CompatibilityLevel::Compatible),
            (
                Compatibility {
                    minimum: v("1.0.0"),
                    verified: Some(v("1.0.0")),
                    maximum: None,
                },
                "1.0.0",
                CompatibilityLevel::Verified,
            ),
            (
                Compatibility {
                    minimum: v("1.0.0"),
                    verified: Some(v("1.1.0")),
                    maximum: None,
                },
                "1.1.0",
                CompatibilityLevel::Verified,
            ),
            (Compatibility::at_least(v("1.0.0")), "0.0.1", CompatibilityLevel::IncompatibleUnder),
            (
                Compatibility {
                    minimum: v("1.0.0"),
                    verified: None,
                    maximum: Some(v("1.0.0")),
                },
                "1.0.1",
                CompatibilityLevel::IncompatibleOver,
            ),
        ];

        for (compat, installed, expected) in cases {
            let actual = compat
                .check(&v(installed))
                .expect("concrete version should be comparable");
            assert_eq!(actual, expected, "installed {installed}");
        }
    }

    #[test]
    fn wildcard_bounds_match_whole_series() {
        let compat = Compatibility {
            minimum: v("1.*"),
            verified: Some(v("1.1.*")),
            maximum: Some(v("1.*")),
        };
        assert_eq!(compat.check(&v("1.1.7")).ok(), Some(CompatibilityLevel::Verified));
        assert_eq!(compat.check(&v("1.4.0")).ok(), Some(CompatibilityLevel::Compatible));
        assert_eq!(compat.check(&v("2.0.0")).ok(), Some(CompatibilityLevel::IncompatibleOver));
    }

    #[test]
    fn check_fails_for_wildcard_installed_version() {
        assert!(Compatibility::at_least(v("1.0.0")).check(&v("1.*")).is_err());
    }

    #[test]
    fn satisfied_levels_start_at_compatible() {
        assert!(!CompatibilityLevel::Unknown.is_satisfied());
        assert!(!CompatibilityLevel::IncompatibleOver.is_satisfied());
        assert!(CompatibilityLevel::Compatible.is_satisfied());
        assert!(CompatibilityLevel::Verified.is_satisfied());
        assert!(CompatibilityLevel::Missing < CompatibilityLevel::IncompatibleUnder);
    }
}
