//! Top-level run: resolve targets, then download every wanted file.
//!
//! [`run`] owns the server session. It connects, hands the session to
//! [`run_with_services`] as the three collaborator traits, and disconnects on
//! every path out, including early failures and interrupts.
//!
//! [`run_with_services`] holds no session state of its own, so tests drive it
//! with in-memory fakes.

mod exit;
mod progress;
mod resolve;

pub use exit::{ProcessExit, RunError};

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::graph::RelationshipGraph;
use crate::model::FileRoleFilter;
use crate::paths::LocalPaths;
use crate::remote::{
    ConnectionSettings, Credentials, HttpSession, QueryService, RemoteFileStore,
    RemoteOperationService,
};
use crate::request::{ExecutorSettings, RequestExecutor};
use crate::target::Target;
use crate::transfer::{DEFAULT_CHUNK_SIZE, TransferError, TransferManager, TransferOutcome};

/// Everything a run needs besides the server connection.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Parsed targets; never empty.
    pub targets: Vec<Target>,
    /// Which file roles to download.
    pub filter: FileRoleFilter,
    /// Download every image of each target image's fileset.
    pub whole_container: bool,
    /// Base download directory; the working directory when `None`.
    pub base_dir: Option<PathBuf>,
    /// Request poll timing.
    pub executor: ExecutorSettings,
    /// Bytes per read.
    pub chunk_size: u64,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl RunSettings {
    /// Creates settings for `targets` with defaults for everything else.
    #[must_use]
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            filter: FileRoleFilter::default(),
            whole_container: false,
            base_dir: None,
            executor: ExecutorSettings::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: false,
        }
    }
}

/// Counts from a completed download phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Wanted images.
    pub images: usize,
    /// Wanted files after filtering.
    pub files: usize,
    /// Files transferred.
    pub downloaded: usize,
    /// Files already present locally.
    pub already_present: usize,
    /// Files that could not be made present.
    pub failed: usize,
    /// Failed files owned by an explicitly requested image.
    pub required_failed: usize,
    /// Bytes transferred.
    pub bytes: u64,
}

/// Connects, runs, disconnects, and maps the outcome to an exit code.
#[instrument(skip_all, fields(server = %connection.server))]
pub async fn run(
    connection: &ConnectionSettings,
    credentials: &Credentials,
    settings: &RunSettings,
    cancel: CancellationToken,
) -> ProcessExit {
    let session = match HttpSession::connect(connection, credentials).await {
        Ok(session) => session,
        Err(source) => {
            let error = RunError::Connect(source);
            error!(error = %error, "run failed");
            return error.exit();
        }
    };

    let result = run_with_services(&session, settings, cancel).await;

    if let Err(error) = session.disconnect().await {
        warn!(error = %error, "failed to disconnect cleanly");
    }

    match result {
        Ok(summary) => exit::determine_exit_outcome(&summary),
        Err(error) => {
            error!(error = %error, "run failed");
            error.exit()
        }
    }
}

/// Resolves `settings.targets` against `service` and downloads the wanted files.
///
/// # Errors
///
/// Returns a [`RunError`] for failures that end the run. Per-file failures
/// are counted in the summary instead.
pub async fn run_with_services<S>(
    service: &S,
    settings: &RunSettings,
    cancel: CancellationToken,
) -> Result<DownloadSummary, RunError>
where
    S: QueryService + RemoteOperationService + RemoteFileStore,
{
    let executor = RequestExecutor::new(service, settings.executor, cancel.clone());
    let mut graph = RelationshipGraph::new();

    let images = resolve::find_images(&executor, &settings.targets).await?;
    graph.assert_wanted_targets(images.iter().copied())?;
    resolve::record_membership(service, &mut graph, &images).await?;
    if settings.whole_container {
        resolve::expand_whole_containers(&mut graph, &images)?;
    }
    resolve::record_files(&executor, &mut graph).await?;

    let paths = match &settings.base_dir {
        Some(base) => LocalPaths::new(base)?,
        None => LocalPaths::with_default_base()?,
    };
    let wanted = graph.list_wanted_files(settings.filter)?;
    for link in graph.entity_links() {
        paths.ensure_entity_link(link)?;
    }

    let mut summary = DownloadSummary {
        images: graph.list_wanted_entities().len(),
        files: wanted.len(),
        ..DownloadSummary::default()
    };
    info!(
        images = summary.images,
        files = summary.files,
        base = %paths.base().display(),
        "downloading"
    );

    let transfers =
        TransferManager::new(service, settings.chunk_size).with_cancel(cancel.clone());
    let bar = progress::file_progress(wanted.len(), settings.show_progress);

    for file in &wanted {
        if cancel.is_cancelled() {
            bar.abandon();
            return Err(RunError::Cancelled);
        }

        let outcome = match transfers.lookup(file.id).await {
            Ok(record) => {
                let local = paths.resolve(file.location, &record);
                bar.set_message(record.name.clone());
                transfers.ensure_local(&record, &local).await
            }
            Err(error) => Err(error),
        };

        match outcome {
            Ok(TransferOutcome::Downloaded { bytes }) => {
                summary.downloaded += 1;
                summary.bytes += bytes;
                graph.mark_fetched(file.id)?;
            }
            Ok(TransferOutcome::AlreadyPresent) => {
                summary.already_present += 1;
                graph.mark_fetched(file.id)?;
            }
            Err(TransferError::Cancelled { .. }) => {
                bar.abandon();
                return Err(RunError::Cancelled);
            }
            Err(error) if error.is_fatal() => {
                bar.abandon();
                return Err(error.into());
            }
            Err(error) => {
                summary.failed += 1;
                if file.required {
                    summary.required_failed += 1;
                }
                warn!(
                    file = %file.id,
                    required = file.required,
                    error = %error,
                    "skipping file"
                );
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
        downloaded = summary.downloaded,
        already_present = summary.already_present,
        failed = summary.failed,
        bytes = summary.bytes,
        "download complete"
    );
    Ok(summary)
}
