//! Resolution phase: turns targets into a populated relationship graph.
//!
//! 1. One `FindChildren` operation maps every target to the images beneath it.
//! 2. One projection query maps those images to their filesets; images with
//!    no fileset use the legacy layout.
//! 3. Optionally, every image's fileset is wanted whole.
//! 4. One `UsedFiles` operation per wanted image lists its files, with the
//!    response shape chosen by the image's recorded layout.

use tracing::{debug, info, instrument};

use super::RunError;
use crate::graph::RelationshipGraph;
use crate::model::{ContainerId, EntityId, FileRole};
use crate::remote::{
    FoundChildren, OperationDescriptor, QueryParams, QueryService, ScalarValue, UsedFiles,
    UsedFilesLegacy,
};
use crate::request::RequestExecutor;
use crate::target::Target;

/// Maps images to their filesets, including fileset mates of the given images.
pub(crate) const MEMBERSHIP_QUERY: &str = "SELECT fileset.id, id FROM Image \
     WHERE fileset IN (SELECT fileset FROM Image WHERE id IN (:ids))";

/// Finds the images contained in `targets`, ascending.
///
/// # Errors
///
/// Returns [`RunError::NoImages`] if nothing matched.
#[instrument(skip_all, fields(targets = targets.len()))]
pub(crate) async fn find_images(
    executor: &RequestExecutor<'_>,
    targets: &[Target],
) -> Result<Vec<EntityId>, RunError> {
    let found: FoundChildren = executor
        .execute("finding images", &OperationDescriptor::find_images(targets))
        .await?;
    let images = found.images();
    if images.is_empty() {
        return Err(RunError::NoImages);
    }
    info!(count = images.len(), images = %join(&images), "found images");
    Ok(images)
}

/// Records fileset membership of `images` and their mates.
///
/// # Errors
///
/// Returns [`RunError::Query`] if the query fails and
/// [`RunError::Protocol`] if a row is not a pair of ids.
#[instrument(skip_all, fields(images = images.len()))]
pub(crate) async fn record_membership(
    query: &dyn QueryService,
    graph: &mut RelationshipGraph,
    images: &[EntityId],
) -> Result<(), RunError> {
    let params = QueryParams::new().add_ids(images.iter().map(|id| id.get()));
    let rows = query
        .projection(MEMBERSHIP_QUERY, &params)
        .await
        .map_err(RunError::Query)?;

    for row in &rows {
        let (container, entity) = parse_membership_row(row)?;
        graph.assert_container_membership(container, entity)?;
    }
    for &image in images {
        if graph.container_of(image).is_none() {
            debug!(image = %image, "no fileset, using legacy layout");
            graph.assert_legacy_layout(image)?;
        }
    }
    debug!(rows = rows.len(), "membership recorded");
    Ok(())
}

/// Wants the whole fileset of every image in `images`.
///
/// # Errors
///
/// Returns [`RunError::Graph`] if an image was never registered.
pub(crate) fn expand_whole_containers(
    graph: &mut RelationshipGraph,
    images: &[EntityId],
) -> Result<(), RunError> {
    for &image in images {
        graph.assert_wanted_container_member(image)?;
    }
    let wanted = graph.list_wanted_entities();
    if wanted.len() > images.len() {
        info!(
            added = wanted.len() - images.len(),
            images = %join(&wanted),
            "expanded to whole filesets"
        );
    }
    Ok(())
}

/// Lists the files of every wanted image and records their ownership.
///
/// # Errors
///
/// Returns [`RunError::Request`] if a listing fails, including a response in
/// the other layout's shape.
#[instrument(skip_all)]
pub(crate) async fn record_files(
    executor: &RequestExecutor<'_>,
    graph: &mut RelationshipGraph,
) -> Result<(), RunError> {
    for image in graph.list_wanted_entities() {
        let description = format!("listing files of image {image}");
        let descriptor = OperationDescriptor::used_files(image);
        let (binary, companion) = if graph.is_using_new_layout(image)? {
            let files: UsedFiles = executor.execute(&description, &descriptor).await?;
            (files.binary_files_this_series, files.companion_files_this_series)
        } else {
            let files: UsedFilesLegacy = executor.execute(&description, &descriptor).await?;
            (files.archived_files, files.companion_files)
        };
        debug!(
            image = %image,
            binary = binary.len(),
            companion = companion.len(),
            "files listed"
        );
        graph.assert_file_ownership(image, binary, FileRole::Binary)?;
        graph.assert_file_ownership(image, companion, FileRole::Companion)?;
    }
    Ok(())
}

fn parse_membership_row(row: &[ScalarValue]) -> Result<(ContainerId, EntityId), RunError> {
    match row {
        [container, entity, ..] => match (container.as_long(), entity.as_long()) {
            (Some(container), Some(entity)) => Ok((ContainerId(container), EntityId(entity))),
            _ => Err(RunError::protocol(format!(
                "membership row is not a pair of ids: {row:?}"
            ))),
        },
        _ => Err(RunError::protocol(format!(
            "membership row has {} columns, expected 2",
            row.len()
        ))),
    }
}

fn join(ids: &[EntityId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
