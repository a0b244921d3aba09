//! Identifier and classification types shared across the crate.
//!
//! Remote ids are opaque 64-bit integers. Each kind of id gets its own newtype
//! so an image id can never be passed where a fileset or file id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw remote id.
            #[must_use]
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

remote_id!(
    /// Id of a top-level downloadable object (an image).
    EntityId
);
remote_id!(
    /// Id of a grouping object (a fileset).
    ContainerId
);
remote_id!(
    /// Id of a remote original file.
    FileId
);

/// Role a file plays for the image that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    /// Pixel data file.
    Binary,
    /// Metadata or sidecar file shipped alongside the pixel data.
    Companion,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Companion => f.write_str("companion"),
        }
    }
}

/// Which remote storage convention an image was imported under.
///
/// The two conventions answer "which files does this image use" with
/// different response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLayout {
    /// Image belongs to a fileset.
    New,
    /// Image predates filesets and owns its archived files directly.
    Legacy,
}

/// Selects which file roles are downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileRoleFilter {
    /// Download binary and companion files.
    #[default]
    All,
    /// Download only binary files.
    BinaryOnly,
    /// Download only companion files.
    CompanionOnly,
}

impl FileRoleFilter {
    /// Builds a filter from the two mutually exclusive "only" flags.
    ///
    /// Returns `None` when both flags are set.
    #[must_use]
    pub fn from_flags(only_binary: bool, only_companion: bool) -> Option<Self> {
        match (only_binary, only_companion) {
            (true, true) => None,
            (true, false) => Some(Self::BinaryOnly),
            (false, true) => Some(Self::CompanionOnly),
            (false, false) => Some(Self::All),
        }
    }

    /// Returns true if files with `role` pass this filter.
    #[must_use]
    pub fn admits(self, role: FileRole) -> bool {
        match self {
            Self::All => true,
            Self::BinaryOnly => role == FileRole::Binary,
            Self::CompanionOnly => role == FileRole::Companion,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_raw_value() {
        let mut ids = vec![EntityId(3), EntityId(1), EntityId(2)];
        ids.sort();
        assert_eq!(ids, vec![EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn test_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&FileId(42)).unwrap();
        assert_eq!(json, "42");
        let parsed: ContainerId = serde_json::from_str("10").unwrap();
        assert_eq!(parsed, ContainerId(10));
    }

    #[test]
    fn test_role_filter_from_flags() {
        assert_eq!(FileRoleFilter::from_flags(false, false), Some(FileRoleFilter::All));
        assert_eq!(
            FileRoleFilter::from_flags(true, false),
            Some(FileRoleFilter::BinaryOnly)
        );
        assert_eq!(
            FileRoleFilter::from_flags(false, true),
            Some(FileRoleFilter::CompanionOnly)
        );
        assert_eq!(FileRoleFilter::from_flags(true, true), None);
    }

    #[test]
    fn test_role_filter_admits() {
        assert!(FileRoleFilter::All.admits(FileRole::Binary));
        assert!(FileRoleFilter::All.admits(FileRole::Companion));
        assert!(FileRoleFilter::BinaryOnly.admits(FileRole::Binary));
        assert!(!FileRoleFilter::BinaryOnly.admits(FileRole::Companion));
        assert!(!FileRoleFilter::CompanionOnly.admits(FileRole::Binary));
        assert!(FileRoleFilter::CompanionOnly.admits(FileRole::Companion));
    }
}
