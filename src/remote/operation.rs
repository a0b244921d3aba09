//! Wire types for asynchronous server-side operations.
//!
//! An [`OperationDescriptor`] is submitted, the server hands back a
//! [`RequestHandle`], and polling the handle yields a [`HandleStatus`]. A
//! finished handle carries one of several [`OperationResponse`] shapes; callers
//! name the shape they need through [`ExpectedResponse`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{EntityId, FileId};
use crate::target::{Target, group_by_kind};

/// Model type whose descendants are collected when resolving targets.
pub const IMAGE_TYPE: &str = "Image";

/// Model type at which descendant traversal stops.
pub const ROI_TYPE: &str = "Roi";

/// A fully specified remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationDescriptor {
    /// Find descendants of `child_type` beneath the given targets.
    FindChildren {
        /// Target ids grouped by model type.
        targets: BTreeMap<String, Vec<i64>>,
        /// Descendant type to collect.
        child_type: String,
        /// Types at which traversal stops.
        stop_before: Vec<String>,
    },
    /// List the original files an image uses.
    UsedFiles {
        /// The image to inspect.
        image_id: EntityId,
    },
}

impl OperationDescriptor {
    /// Builds the "which images do these targets contain" operation.
    #[must_use]
    pub fn find_images(targets: &[Target]) -> Self {
        Self::FindChildren {
            targets: group_by_kind(targets),
            child_type: IMAGE_TYPE.to_string(),
            stop_before: vec![ROI_TYPE.to_string()],
        }
    }

    /// Builds the "which files does this image use" operation.
    #[must_use]
    pub fn used_files(image_id: EntityId) -> Self {
        Self::UsedFiles { image_id }
    }
}

/// Opaque handle to a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHandle(pub String);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application-level failure reported by the server for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Broad failure class, e.g. `graph-fail`.
    #[serde(default)]
    pub category: String,
    /// Specific failure name.
    #[serde(default)]
    pub name: String,
    /// Human-readable diagnostic.
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.category.is_empty(), self.name.is_empty()) {
            (true, true) => f.write_str(&self.message),
            (false, true) => write!(f, "{}: {}", self.category, self.message),
            (true, false) => write!(f, "{}: {}", self.name, self.message),
            (false, false) => write!(f, "{}/{}: {}", self.category, self.name, self.message),
        }
    }
}

/// State of a submitted operation as reported by one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HandleStatus {
    /// Still running.
    Running,
    /// Completed with a response payload.
    Finished {
        /// The response payload.
        response: OperationResponse,
    },
    /// Completed with an application-level error.
    Failed {
        /// The server's diagnostic.
        error: RemoteFailure,
    },
}

/// Descendants found for the submitted targets, keyed by model type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FoundChildren {
    /// Descendant ids keyed by model type.
    #[serde(default)]
    pub children: BTreeMap<String, Vec<i64>>,
}

impl FoundChildren {
    /// Returns the image ids found, ascending and without duplicates.
    #[must_use]
    pub fn images(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .children
            .get(IMAGE_TYPE)
            .map(|ids| ids.iter().copied().map(EntityId).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Files used by an image stored in the fileset layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsedFiles {
    /// Binary files of this image's series.
    #[serde(default)]
    pub binary_files_this_series: Vec<FileId>,
    /// Companion files of this image's series.
    #[serde(default)]
    pub companion_files_this_series: Vec<FileId>,
    /// Binary files of other series in the same fileset.
    #[serde(default)]
    pub binary_files_other_series: Vec<FileId>,
    /// Companion files of other series in the same fileset.
    #[serde(default)]
    pub companion_files_other_series: Vec<FileId>,
}

/// Files used by an image stored in the legacy (pre-fileset) layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsedFilesLegacy {
    /// Archived original files.
    #[serde(default)]
    pub archived_files: Vec<FileId>,
    /// Companion files.
    #[serde(default)]
    pub companion_files: Vec<FileId>,
}

/// Every response shape the server can return for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationResponse {
    /// Answer to [`OperationDescriptor::FindChildren`].
    FoundChildren(FoundChildren),
    /// Answer to [`OperationDescriptor::UsedFiles`] for fileset-layout images.
    UsedFiles(UsedFiles),
    /// Answer to [`OperationDescriptor::UsedFiles`] for legacy-layout images.
    UsedFilesLegacy(UsedFilesLegacy),
}

impl OperationResponse {
    /// Returns the shape of this response.
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::FoundChildren(_) => ResponseKind::FoundChildren,
            Self::UsedFiles(_) => ResponseKind::UsedFiles,
            Self::UsedFilesLegacy(_) => ResponseKind::UsedFilesLegacy,
        }
    }
}

/// Names a response shape without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// [`FoundChildren`]
    FoundChildren,
    /// [`UsedFiles`]
    UsedFiles,
    /// [`UsedFilesLegacy`]
    UsedFilesLegacy,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FoundChildren => f.write_str("FoundChildren"),
            Self::UsedFiles => f.write_str("UsedFiles"),
            Self::UsedFilesLegacy => f.write_str("UsedFilesLegacy"),
        }
    }
}

/// A response shape a caller can demand from the request executor.
pub trait ExpectedResponse: Sized {
    /// The shape this type corresponds to.
    const KIND: ResponseKind;

    /// Extracts the payload, handing back the response unchanged on a shape mismatch.
    ///
    /// # Errors
    ///
    /// Returns the original response if its shape is not [`Self::KIND`].
    fn from_response(response: OperationResponse) -> Result<Self, OperationResponse>;
}

impl ExpectedResponse for FoundChildren {
    const KIND: ResponseKind = ResponseKind::FoundChildren;

    fn from_response(response: OperationResponse) -> Result<Self, OperationResponse> {
        match response {
            OperationResponse::FoundChildren(found) => Ok(found),
            other => Err(other),
        }
    }
}

impl ExpectedResponse for UsedFiles {
    const KIND: ResponseKind = ResponseKind::UsedFiles;

    fn from_response(response: OperationResponse) -> Result<Self, OperationResponse> {
        match response {
            OperationResponse::UsedFiles(files) => Ok(files),
            other => Err(other),
        }
    }
}

impl ExpectedResponse for UsedFilesLegacy {
    const KIND: ResponseKind = ResponseKind::UsedFilesLegacy;

    fn from_response(response: OperationResponse) -> Result<Self, OperationResponse> {
        match response {
            OperationResponse::UsedFilesLegacy(files) => Ok(files),
            other => Err(other),
        }
    }
}
