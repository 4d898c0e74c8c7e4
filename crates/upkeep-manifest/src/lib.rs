//! Resource manifest model for upkeep.
//!
//! - Wildcard-aware versions and compatibility ranges.
//! - The manifest wire format, including unknown-key preservation.
//! - The [`Descriptor`] trait the rest of the workspace is generic over.

mod compat;
mod descriptor;
mod error;
mod manifest;
mod version;

/// Relationship ranges and the level an installed version reaches.
pub use compat::{Compatibility, CompatibilityLevel, Relationship};
/// Abstraction over manifest types.
pub use descriptor::Descriptor;
pub use error::{ManifestError, VersionError};
/// Manifest document and its asset/delta records.
pub use manifest::{DeltaPatch, MANIFEST_FILE_NAME, Manifest, ManifestAssets, PersistOutcome};
pub use version::Version;
