//! In-memory server implementing the three collaborator traits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use omero_downloader::model::FileId;
use omero_downloader::remote::{
    FoundChildren, HandleStatus, OperationDescriptor, OperationResponse, ParamValue, QueryParams,
    QueryService, RemoteFailure, RemoteFile, RemoteFileStore, RemoteOperationService,
    RequestHandle, Rows, ScalarValue, UsedFiles, UsedFilesLegacy,
};
use omero_downloader::ServiceError;

#[derive(Debug, Clone, Default)]
struct ImageRecord {
    fileset: Option<i64>,
    binary: Vec<i64>,
    companion: Vec<i64>,
}

/// Scripted server state plus call counters.
#[derive(Debug, Default)]
pub struct FakeServer {
    images: BTreeMap<i64, ImageRecord>,
    containers: BTreeMap<(String, i64), Vec<i64>>,
    files: BTreeMap<i64, (RemoteFile, Vec<u8>)>,
    legacy_shape: BTreeSet<i64>,
    reject_file_access: AtomicBool,
    handles: Mutex<HashMap<String, HandleStatus>>,
    submits: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    metadata_calls: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image, in a fileset when `fileset` is given.
    pub fn image(mut self, id: i64, fileset: Option<i64>, binary: &[i64], companion: &[i64]) -> Self {
        self.images.insert(
            id,
            ImageRecord {
                fileset,
                binary: binary.to_vec(),
                companion: companion.to_vec(),
            },
        );
        self
    }

    /// Adds a container object such as `Dataset:7` holding `images`.
    pub fn container(mut self, kind: &str, id: i64, images: &[i64]) -> Self {
        self.containers.insert((kind.to_string(), id), images.to_vec());
        self
    }

    /// Adds a file with a SHA-256 checksum.
    pub fn file(mut self, id: i64, path: &str, name: &str, content: &[u8]) -> Self {
        let record = RemoteFile {
            id: FileId(id),
            name: name.to_string(),
            path: path.to_string(),
            size: content.len() as u64,
            hash: Some(hex(&Sha256::digest(content))),
            hasher: Some("SHA-256".to_string()),
        };
        self.files.insert(id, (record, content.to_vec()));
        self
    }

    /// Answers file listings for `image` in the legacy shape regardless of its layout.
    pub fn answer_legacy_shape(mut self, image: i64) -> Self {
        self.legacy_shape.insert(image);
        self
    }

    /// Rejects every file metadata and read call as if the session had expired.
    pub fn reject_file_access(self) -> Self {
        self.reject_file_access.store(true, Ordering::SeqCst);
        self
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    fn complete(&self, descriptor: &OperationDescriptor) -> HandleStatus {
        match descriptor {
            OperationDescriptor::FindChildren { targets, .. } => {
                let mut found = BTreeSet::new();
                for (kind, ids) in targets {
                    for id in ids {
                        if kind == "Image" {
                            if self.images.contains_key(id) {
                                found.insert(*id);
                            }
                        } else if let Some(images) = self.containers.get(&(kind.clone(), *id)) {
                            found.extend(images.iter().copied());
                        }
                    }
                }
                let mut children = BTreeMap::new();
                if !found.is_empty() {
                    children.insert("Image".to_string(), found.into_iter().collect());
                }
                HandleStatus::Finished {
                    response: OperationResponse::FoundChildren(FoundChildren { children }),
                }
            }
            OperationDescriptor::UsedFiles { image_id } => {
                let Some(image) = self.images.get(&image_id.get()) else {
                    return HandleStatus::Failed {
                        error: RemoteFailure {
                            category: "graph-fail".to_string(),
                            name: "no-image".to_string(),
                            message: format!("image {image_id} not found"),
                        },
                    };
                };
                let ids = |ids: &[i64]| ids.iter().copied().map(FileId).collect::<Vec<_>>();
                let response = if image.fileset.is_none() || self.legacy_shape.contains(&image_id.get())
                {
                    OperationResponse::UsedFilesLegacy(UsedFilesLegacy {
                        archived_files: ids(&image.binary),
                        companion_files: ids(&image.companion),
                    })
                } else {
                    OperationResponse::UsedFiles(UsedFiles {
                        binary_files_this_series: ids(&image.binary),
                        companion_files_this_series: ids(&image.companion),
                        ..UsedFiles::default()
                    })
                };
                HandleStatus::Finished { response }
            }
        }
    }
}

#[async_trait]
impl QueryService for FakeServer {
    async fn projection(&self, _query: &str, params: &QueryParams) -> Result<Rows, ServiceError> {
        let Some(ParamValue::Longs(ids)) = params.get("ids") else {
            return Err(ServiceError::malformed("fake://query", "missing :ids"));
        };
        let filesets: BTreeSet<i64> = ids
            .iter()
            .filter_map(|id| self.images.get(id).and_then(|image| image.fileset))
            .collect();
        Ok(self
            .images
            .iter()
            .filter_map(|(id, image)| image.fileset.map(|fileset| (fileset, *id)))
            .filter(|(fileset, _)| filesets.contains(fileset))
            .map(|(fileset, id)| vec![ScalarValue::Long(fileset), ScalarValue::Long(id)])
            .collect())
    }
}

#[async_trait]
impl RemoteOperationService for FakeServer {
    async fn submit(
        &self,
        descriptor: &OperationDescriptor,
    ) -> Result<RequestHandle, ServiceError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        let handle = format!("handle-{n}");
        let status = self.complete(descriptor);
        self.handles.lock().unwrap().insert(handle.clone(), status);
        Ok(RequestHandle(handle))
    }

    async fn poll(&self, handle: &RequestHandle) -> Result<HandleStatus, ServiceError> {
        self.handles
            .lock()
            .unwrap()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("request {handle}")))
    }

    async fn close(&self, handle: &RequestHandle) -> Result<(), ServiceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().remove(&handle.0);
        Ok(())
    }
}

#[async_trait]
impl RemoteFileStore for FakeServer {
    async fn metadata(&self, id: FileId) -> Result<RemoteFile, ServiceError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_file_access.load(Ordering::SeqCst) {
            return Err(ServiceError::auth_required("fake://files", 401));
        }
        self.files
            .get(&id.get())
            .map(|(record, _)| record.clone())
            .ok_or_else(|| ServiceError::not_found(format!("file {id}")))
    }

    async fn read(&self, id: FileId, offset: u64, length: u64) -> Result<Vec<u8>, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.reject_file_access.load(Ordering::SeqCst) {
            return Err(ServiceError::auth_required("fake://files", 401));
        }
        let (_, content) = self
            .files
            .get(&id.get())
            .ok_or_else(|| ServiceError::not_found(format!("file {id}")))?;
        let start = usize::try_from(offset).unwrap().min(content.len());
        let end = usize::try_from(offset + length).unwrap().min(content.len());
        Ok(content[start..end].to_vec())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
