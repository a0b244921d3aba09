//! Local directory layout for downloaded files.
//!
//! ```text
//! <base>/Fileset/<container>/<remote path>/<name> files of container images
//! <base>/Image/<entity>/<remote path>/<name>      files of legacy images
//! <base>/Image/<entity> -> ../Fileset/<container> link per container image
//! ```
//!
//! Paths depend only on the base directory and the remote record, so a re-run
//! resolves every file to the same place and finds what it fetched before.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph::{EntityLink, FileLocation};
use crate::model::{ContainerId, EntityId};
use crate::remote::RemoteFile;

/// Directory holding one subdirectory per container.
pub const CONTAINER_DIR: &str = "Fileset";

/// Directory holding one subdirectory (or link) per entity.
pub const ENTITY_DIR: &str = "Image";

const WRITE_CHECK_NAME: &str = ".omero-downloader-write-check";

/// Errors preparing the local directory tree.
#[derive(Debug, Error)]
pub enum PathError {
    /// The base directory does not exist and could not be created.
    #[error("cannot create base directory {path}: {source}")]
    CreateBase {
        /// The base directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The base path exists but is not a directory.
    #[error("base path {path} is not a directory")]
    NotADirectory {
        /// The base path.
        path: PathBuf,
    },

    /// The base directory cannot be written to.
    #[error("base directory {path} is not writable: {source}")]
    NotWritable {
        /// The base directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// An entity link could not be created.
    #[error("cannot link {path}: {source}")]
    Link {
        /// The link path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// What [`LocalPaths::ensure_entity_link`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link was written.
    Created,
    /// A correct link was already there.
    Unchanged,
    /// Something other than a link occupies the path; left alone.
    Occupied,
    /// Symbolic links are not available on this platform.
    Unsupported,
}

/// Maps remote records to local paths under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPaths {
    base: PathBuf,
}

impl LocalPaths {
    /// Uses `base`, creating it if missing and checking it is writable.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] if the directory cannot be created or written.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, PathError> {
        let base = base.into();
        fs::create_dir_all(&base).map_err(|source| PathError::CreateBase {
            path: base.clone(),
            source,
        })?;
        if !base.is_dir() {
            return Err(PathError::NotADirectory { path: base });
        }
        check_writable(&base)?;
        debug!(base = %base.display(), "base directory ready");
        Ok(Self { base })
    }

    /// Uses the current working directory as the base.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] if the working directory cannot be determined or written.
    pub fn with_default_base() -> Result<Self, PathError> {
        let cwd = std::env::current_dir().map_err(|source| PathError::CreateBase {
            path: PathBuf::from("."),
            source,
        })?;
        Self::new(cwd)
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Returns the directory of a container.
    #[must_use]
    pub fn container_dir(&self, container: ContainerId) -> PathBuf {
        self.base
            .join(CONTAINER_DIR)
            .join(container.get().to_string())
    }

    /// Returns the directory (or link) of an entity.
    #[must_use]
    pub fn entity_dir(&self, entity: EntityId) -> PathBuf {
        self.base.join(ENTITY_DIR).join(entity.get().to_string())
    }

    /// Returns where `file` is stored locally.
    ///
    /// Files keep their remote directory structure below the container
    /// directory, or below the entity directory for legacy images.
    #[must_use]
    pub fn resolve(&self, location: FileLocation, file: &RemoteFile) -> PathBuf {
        let mut path = match location {
            FileLocation::Container(container) => self.container_dir(container),
            FileLocation::Entity(entity) => self.entity_dir(entity),
        };
        path.extend(remote_components(&file.path));
        path.join(sanitize_component(&file.name))
    }

    /// Makes `<base>/Image/<entity>` a relative link to its container directory.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Link`] if the link or its parent cannot be written.
    pub fn ensure_entity_link(&self, link: EntityLink) -> Result<LinkOutcome, PathError> {
        let path = self.entity_dir(link.entity);
        let target = Path::new("..")
            .join(CONTAINER_DIR)
            .join(link.container.get().to_string());
        let link_error = |source| PathError::Link {
            path: path.clone(),
            source,
        };

        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                if fs::read_link(&path).map_err(link_error)? == target {
                    return Ok(LinkOutcome::Unchanged);
                }
                debug!(path = %path.display(), "replacing stale entity link");
                fs::remove_file(&path).map_err(link_error)?;
            }
            Ok(_) => {
                warn!(path = %path.display(), "entity path exists and is not a link, leaving it");
                return Ok(LinkOutcome::Occupied);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(link_error(error)),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(link_error)?;
        }
        create_dir_link(&target, &path).map_err(link_error)
    }
}

#[cfg(unix)]
fn create_dir_link(target: &Path, path: &Path) -> io::Result<LinkOutcome> {
    std::os::unix::fs::symlink(target, path)?;
    info!(link = %path.display(), target = %target.display(), "linked image to fileset");
    Ok(LinkOutcome::Created)
}

#[cfg(not(unix))]
fn create_dir_link(target: &Path, path: &Path) -> io::Result<LinkOutcome> {
    debug!(link = %path.display(), target = %target.display(), "symbolic links unsupported, skipping");
    Ok(LinkOutcome::Unsupported)
}

fn check_writable(base: &Path) -> Result<(), PathError> {
    let marker = base.join(format!("{WRITE_CHECK_NAME}-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)
        .map_err(|source| PathError::NotWritable {
            path: base.to_path_buf(),
            source,
        })?;
    if let Err(error) = fs::remove_file(&marker) {
        debug!(path = %marker.display(), error = %error, "could not remove write check file");
    }
    Ok(())
}

/// Splits a remote directory into safe relative components.
fn remote_components(remote: &str) -> impl Iterator<Item = String> + '_ {
    remote
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .map(sanitize_component)
}

/// Replaces characters invalid on common filesystems and neutralizes dot segments.
fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    let dotted = Path::new(&sanitized).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if dotted {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}
