//! Error types for the relationship graph.
//!
//! Every variant is a contract violation by the caller (asserting facts in the
//! wrong order or contradicting an earlier assertion), never a remote failure.

use thiserror::Error;

use crate::model::{ContainerId, EntityId, FileId};

/// Errors raised by [`RelationshipGraph`](super::RelationshipGraph) assertions and queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The entity was never registered by a wanted-target or membership assertion.
    #[error("entity {entity} was never registered")]
    UnknownEntity {
        /// The unregistered entity.
        entity: EntityId,
    },

    /// Files were requested while some wanted entities have no recorded membership.
    #[error("container membership unknown for wanted entities: {}", join_ids(entities))]
    MembershipUnknown {
        /// Wanted entities lacking membership, ascending.
        entities: Vec<EntityId>,
    },

    /// The entity was already recorded in a different container.
    #[error("entity {entity} already belongs to container {existing}, not {requested}")]
    ConflictingContainer {
        /// The entity.
        entity: EntityId,
        /// Container recorded first.
        existing: ContainerId,
        /// Container asserted now.
        requested: ContainerId,
    },

    /// The entity was recorded under both storage layouts.
    #[error("entity {entity} cannot use both the container and the legacy layout")]
    ConflictingLayout {
        /// The entity.
        entity: EntityId,
    },

    /// The file was never attached to an entity.
    #[error("file {file} was never registered")]
    UnknownFile {
        /// The unregistered file.
        file: FileId,
    },

    /// A mutation was attempted after the wanted files were listed.
    #[error("cannot {operation}: graph is read-only once wanted files are listed")]
    Sealed {
        /// The rejected operation.
        operation: &'static str,
    },
}

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
