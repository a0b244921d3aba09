//! Relationship graph between wanted targets, containers, entities and files.
//!
//! The graph is the single record of what the run has learned about the
//! server: which entities were asked for, which container each belongs to (or
//! that it predates containers), and which files each depends on. Every
//! mutation is an assertion that only ever adds facts; repeating an assertion
//! changes nothing.
//!
//! # Whole-container expansion
//!
//! [`RelationshipGraph::assert_wanted_container_member`] does not enumerate
//! container mates when it is called. It records the request, and
//! [`RelationshipGraph::list_wanted_entities`] computes the closure at read
//! time. Membership asserted before or after the request therefore yields the
//! same wanted set.
//!
//! # Read-only phase
//!
//! [`RelationshipGraph::list_wanted_files`] refuses to run while any wanted
//! entity lacks membership, and seals the graph on success. After that only
//! [`RelationshipGraph::mark_fetched`] is accepted.

mod error;

pub use error::GraphError;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::model::{ContainerId, EntityId, FileId, FileRole, FileRoleFilter, StorageLayout};

/// Where an entity's files live on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Member of a container.
    Container(ContainerId),
    /// Predates containers; owns its files directly.
    Legacy,
}

impl Placement {
    /// Returns the storage layout implied by this placement.
    #[must_use]
    pub fn layout(self) -> StorageLayout {
        match self {
            Self::Container(_) => StorageLayout::New,
            Self::Legacy => StorageLayout::Legacy,
        }
    }
}

/// Directory grouping of a wanted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileLocation {
    /// Stored under the container's directory.
    Container(ContainerId),
    /// Stored under a legacy entity's own directory.
    Entity(EntityId),
}

/// A file the download phase should make present locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WantedFile {
    /// Remote file id.
    pub id: FileId,
    /// Role recorded when the file was first attached.
    pub role: FileRole,
    /// Where the file belongs locally.
    pub location: FileLocation,
    /// True if an explicitly requested entity owns the file.
    pub required: bool,
}

/// A wanted entity stored inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLink {
    /// The entity.
    pub entity: EntityId,
    /// Its container.
    pub container: ContainerId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EntityRecord {
    placement: Option<Placement>,
    files: BTreeSet<FileId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileRecord {
    role: FileRole,
    owners: BTreeSet<EntityId>,
    fetched: bool,
}

/// In-memory bookkeeping for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipGraph {
    entities: BTreeMap<EntityId, EntityRecord>,
    containers: BTreeMap<ContainerId, BTreeSet<EntityId>>,
    explicit: BTreeSet<EntityId>,
    whole_container_of: BTreeSet<EntityId>,
    files: BTreeMap<FileId, FileRecord>,
    sealed: bool,
}

impl RelationshipGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks entities as explicitly wanted, registering them if new.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Sealed`] after [`list_wanted_files`](Self::list_wanted_files).
    pub fn assert_wanted_targets(
        &mut self,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), GraphError> {
        self.ensure_open("assert wanted targets")?;
        for id in ids {
            self.entities.entry(id).or_default();
            if self.explicit.insert(id) {
                trace!(entity = %id, "entity wanted");
            }
        }
        Ok(())
    }

    /// Records that `entity` belongs to `container`, registering the entity if new.
    ///
    /// Entities seen only through membership (container mates of wanted
    /// entities) are registered but not wanted.
    ///
    /// # Errors
    ///
    /// - [`GraphError::ConflictingContainer`] if the entity is in another container
    /// - [`GraphError::ConflictingLayout`] if the entity was recorded as legacy
    /// - [`GraphError::Sealed`] after the wanted files were listed
    pub fn assert_container_membership(
        &mut self,
        container: ContainerId,
        entity: EntityId,
    ) -> Result<(), GraphError> {
        self.ensure_open("assert container membership")?;
        let record = self.entities.entry(entity).or_default();
        match record.placement {
            None => {
                record.placement = Some(Placement::Container(container));
                self.containers.entry(container).or_default().insert(entity);
                trace!(entity = %entity, container = %container, "membership recorded");
                Ok(())
            }
            Some(Placement::Container(existing)) if existing == container => Ok(()),
            Some(Placement::Container(existing)) => Err(GraphError::ConflictingContainer {
                entity,
                existing,
                requested: container,
            }),
            Some(Placement::Legacy) => Err(GraphError::ConflictingLayout { entity }),
        }
    }

    /// Records that `entity` has no container and uses the legacy layout.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownEntity`] if the entity was never registered
    /// - [`GraphError::ConflictingLayout`] if it was recorded in a container
    /// - [`GraphError::Sealed`] after the wanted files were listed
    pub fn assert_legacy_layout(&mut self, entity: EntityId) -> Result<(), GraphError> {
        self.ensure_open("assert legacy layout")?;
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(GraphError::UnknownEntity { entity })?;
        match record.placement {
            None => {
                record.placement = Some(Placement::Legacy);
                trace!(entity = %entity, "legacy layout recorded");
                Ok(())
            }
            Some(Placement::Legacy) => Ok(()),
            Some(Placement::Container(_)) => Err(GraphError::ConflictingLayout { entity }),
        }
    }

    /// Wants every entity sharing `entity`'s container, and `entity` itself.
    ///
    /// Expansion is computed when the wanted set is read, so container mates
    /// recorded later are included too. A legacy entity has no mates.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownEntity`] if the entity was never registered
    /// - [`GraphError::Sealed`] after the wanted files were listed
    pub fn assert_wanted_container_member(&mut self, entity: EntityId) -> Result<(), GraphError> {
        self.ensure_open("assert wanted container member")?;
        if !self.entities.contains_key(&entity) {
            return Err(GraphError::UnknownEntity { entity });
        }
        if self.whole_container_of.insert(entity) {
            trace!(entity = %entity, "whole container wanted");
        }
        Ok(())
    }

    /// Records that `entity` depends on `files`, all with `role`.
    ///
    /// A file shared between entities is stored once. If a file is asserted
    /// with different roles, the first role is kept.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownEntity`] if the entity was never registered
    /// - [`GraphError::Sealed`] after the wanted files were listed
    pub fn assert_file_ownership(
        &mut self,
        entity: EntityId,
        files: impl IntoIterator<Item = FileId>,
        role: FileRole,
    ) -> Result<(), GraphError> {
        self.ensure_open("assert file ownership")?;
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(GraphError::UnknownEntity { entity })?;
        for file in files {
            record.files.insert(file);
            let file_record = self.files.entry(file).or_insert_with(|| FileRecord {
                role,
                owners: BTreeSet::new(),
                fetched: false,
            });
            if file_record.role != role {
                debug!(
                    file = %file,
                    kept = %file_record.role,
                    ignored = %role,
                    "file asserted with a second role"
                );
            }
            file_record.owners.insert(entity);
        }
        Ok(())
    }

    /// Returns true if `entity` was explicitly requested.
    #[must_use]
    pub fn is_explicitly_wanted(&self, entity: EntityId) -> bool {
        self.explicit.contains(&entity)
    }

    /// Returns every wanted entity, ascending.
    ///
    /// The set is the explicitly wanted entities, the entities whose container
    /// was wanted whole, and every recorded member of those containers.
    #[must_use]
    pub fn list_wanted_entities(&self) -> Vec<EntityId> {
        self.wanted_closure().into_iter().collect()
    }

    /// Returns wanted entities whose container membership is not yet known, ascending.
    #[must_use]
    pub fn entities_missing_membership(&self) -> Vec<EntityId> {
        self.wanted_closure()
            .into_iter()
            .filter(|id| {
                self.entities
                    .get(id)
                    .is_none_or(|record| record.placement.is_none())
            })
            .collect()
    }

    /// Returns the files owned by any wanted entity that pass `filter`, ascending by id.
    ///
    /// Seals the graph: afterwards every assertion fails with
    /// [`GraphError::Sealed`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MembershipUnknown`] if any wanted entity has no
    /// recorded membership; the graph stays open in that case.
    pub fn list_wanted_files(
        &mut self,
        filter: FileRoleFilter,
    ) -> Result<Vec<WantedFile>, GraphError> {
        let missing = self.entities_missing_membership();
        if !missing.is_empty() {
            return Err(GraphError::MembershipUnknown { entities: missing });
        }
        if !self.sealed {
            debug!(
                entities = self.entities.len(),
                files = self.files.len(),
                "sealing relationship graph"
            );
            self.sealed = true;
        }

        let wanted = self.wanted_closure();
        let mut result = Vec::new();
        for (&id, record) in &self.files {
            if !filter.admits(record.role) {
                continue;
            }
            let Some(&owner) = record.owners.iter().find(|owner| wanted.contains(owner)) else {
                continue;
            };
            let location = match self.placement_of(owner) {
                Some(Placement::Container(container)) => FileLocation::Container(container),
                _ => FileLocation::Entity(owner),
            };
            let required = record.owners.iter().any(|owner| self.explicit.contains(owner));
            result.push(WantedFile {
                id,
                role: record.role,
                location,
                required,
            });
        }
        Ok(result)
    }

    /// Flips a file's fetched flag.
    ///
    /// Returns `true` on the first call for a file and `false` on every later one.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownFile`] if no entity owns the file.
    pub fn mark_fetched(&mut self, file: FileId) -> Result<bool, GraphError> {
        let record = self
            .files
            .get_mut(&file)
            .ok_or(GraphError::UnknownFile { file })?;
        if record.fetched {
            return Ok(false);
        }
        record.fetched = true;
        Ok(true)
    }

    /// Returns true if the file has been marked fetched.
    #[must_use]
    pub fn is_fetched(&self, file: FileId) -> bool {
        self.files.get(&file).is_some_and(|record| record.fetched)
    }

    /// Returns the storage layout recorded for `entity`, if any.
    #[must_use]
    pub fn layout_of(&self, entity: EntityId) -> Option<StorageLayout> {
        self.placement_of(entity).map(Placement::layout)
    }

    /// Reports whether `entity` lists its files through the container protocol.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownEntity`] if the entity was never registered
    /// - [`GraphError::MembershipUnknown`] if its placement is not recorded yet
    pub fn is_using_new_layout(&self, entity: EntityId) -> Result<bool, GraphError> {
        let record = self
            .entities
            .get(&entity)
            .ok_or(GraphError::UnknownEntity { entity })?;
        match record.placement {
            Some(placement) => Ok(placement.layout() == StorageLayout::New),
            None => Err(GraphError::MembershipUnknown {
                entities: vec![entity],
            }),
        }
    }

    /// Returns the container recorded for `entity`, if it has one.
    #[must_use]
    pub fn container_of(&self, entity: EntityId) -> Option<ContainerId> {
        match self.placement_of(entity) {
            Some(Placement::Container(container)) => Some(container),
            _ => None,
        }
    }

    /// Returns every wanted entity stored in a container, ascending by entity.
    #[must_use]
    pub fn entity_links(&self) -> Vec<EntityLink> {
        self.wanted_closure()
            .into_iter()
            .filter_map(|entity| {
                self.container_of(entity)
                    .map(|container| EntityLink { entity, container })
            })
            .collect()
    }

    /// Returns true once the wanted files have been listed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn placement_of(&self, entity: EntityId) -> Option<Placement> {
        self.entities.get(&entity).and_then(|record| record.placement)
    }

    fn wanted_closure(&self) -> BTreeSet<EntityId> {
        let mut wanted = self.explicit.clone();
        for &entity in &self.whole_container_of {
            wanted.insert(entity);
            if let Some(members) = self
                .container_of(entity)
                .and_then(|container| self.containers.get(&container))
            {
                wanted.extend(members.iter().copied());
            }
        }
        wanted
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), GraphError> {
        if self.sealed {
            Err(GraphError::Sealed { operation })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids(raw: &[i64]) -> Vec<EntityId> {
        raw.iter().copied().map(EntityId).collect()
    }

    fn file_ids(files: &[WantedFile]) -> Vec<i64> {
        files.iter().map(|file| file.id.get()).collect()
    }

    /// Targets `Image:1,2`, container 10 holding {1, 2, 3}.
    fn scenario(whole_container: bool) -> RelationshipGraph {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2])).unwrap();
        for entity in [1, 2, 3] {
            graph
                .assert_container_membership(ContainerId(10), EntityId(entity))
                .unwrap();
        }
        if whole_container {
            for entity in ids(&[1, 2]) {
                graph.assert_wanted_container_member(entity).unwrap();
            }
        }
        graph
    }

    #[test]
    fn test_without_whole_container_only_targets_wanted() {
        assert_eq!(scenario(false).list_wanted_entities(), ids(&[1, 2]));
    }

    #[test]
    fn test_whole_container_pulls_in_mates() {
        assert_eq!(scenario(true).list_wanted_entities(), ids(&[1, 2, 3]));
    }

    #[test]
    fn test_whole_container_before_membership_is_order_independent() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2])).unwrap();
        graph.assert_wanted_container_member(EntityId(1)).unwrap();
        graph.assert_wanted_container_member(EntityId(2)).unwrap();
        for entity in [3, 2, 1] {
            graph
                .assert_container_membership(ContainerId(10), EntityId(entity))
                .unwrap();
        }
        assert_eq!(
            graph.list_wanted_entities(),
            scenario(true).list_wanted_entities()
        );
    }

    #[test]
    fn test_shared_file_listed_once() {
        let mut graph = scenario(false);
        graph
            .assert_file_ownership(EntityId(1), [FileId(42), FileId(7)], FileRole::Binary)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(2), [FileId(42)], FileRole::Binary)
            .unwrap();

        let files = graph.list_wanted_files(FileRoleFilter::All).unwrap();

        assert_eq!(file_ids(&files), vec![7, 42]);
        assert!(files.iter().all(|file| file.required));
        assert!(
            files
                .iter()
                .all(|file| file.location == FileLocation::Container(ContainerId(10)))
        );
    }

    #[test]
    fn test_files_of_unwanted_mates_excluded() {
        let mut graph = scenario(false);
        graph
            .assert_file_ownership(EntityId(3), [FileId(99)], FileRole::Binary)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(1), [FileId(5)], FileRole::Binary)
            .unwrap();

        let files = graph.list_wanted_files(FileRoleFilter::All).unwrap();

        assert_eq!(file_ids(&files), vec![5]);
    }

    #[test]
    fn test_files_of_expanded_mates_are_not_required() {
        let mut graph = scenario(true);
        graph
            .assert_file_ownership(EntityId(3), [FileId(99)], FileRole::Binary)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(1), [FileId(5)], FileRole::Binary)
            .unwrap();

        let files = graph.list_wanted_files(FileRoleFilter::All).unwrap();

        assert_eq!(file_ids(&files), vec![5, 99]);
        assert!(files[0].required);
        assert!(!files[1].required);
    }

    #[test]
    fn test_role_filter_applies_to_both_layouts() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2])).unwrap();
        graph
            .assert_container_membership(ContainerId(10), EntityId(1))
            .unwrap();
        graph.assert_legacy_layout(EntityId(2)).unwrap();
        graph
            .assert_file_ownership(EntityId(1), [FileId(1)], FileRole::Binary)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(1), [FileId(2)], FileRole::Companion)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(2), [FileId(3)], FileRole::Binary)
            .unwrap();
        graph
            .assert_file_ownership(EntityId(2), [FileId(4)], FileRole::Companion)
            .unwrap();

        let binary = graph.clone().list_wanted_files(FileRoleFilter::BinaryOnly).unwrap();
        let companion = graph
            .clone()
            .list_wanted_files(FileRoleFilter::CompanionOnly)
            .unwrap();

        assert_eq!(file_ids(&binary), vec![1, 3]);
        assert_eq!(file_ids(&companion), vec![2, 4]);
        assert_eq!(companion[1].location, FileLocation::Entity(EntityId(2)));
    }

    #[test]
    fn test_list_wanted_files_requires_membership() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2])).unwrap();
        graph
            .assert_container_membership(ContainerId(10), EntityId(1))
            .unwrap();

        let error = graph.list_wanted_files(FileRoleFilter::All).unwrap_err();

        assert_eq!(
            error,
            GraphError::MembershipUnknown {
                entities: ids(&[2])
            }
        );
        assert!(!graph.is_sealed());
    }

    #[test]
    fn test_listing_files_seals_graph() {
        let mut graph = scenario(false);
        graph.list_wanted_files(FileRoleFilter::All).unwrap();

        assert!(graph.is_sealed());
        assert!(matches!(
            graph.assert_wanted_targets(ids(&[9])),
            Err(GraphError::Sealed { .. })
        ));
        assert!(matches!(
            graph.assert_container_membership(ContainerId(10), EntityId(4)),
            Err(GraphError::Sealed { .. })
        ));
        assert!(matches!(
            graph.assert_file_ownership(EntityId(1), [FileId(1)], FileRole::Binary),
            Err(GraphError::Sealed { .. })
        ));
    }

    #[test]
    fn test_mark_fetched_flips_once() {
        let mut graph = scenario(false);
        graph
            .assert_file_ownership(EntityId(1), [FileId(42)], FileRole::Binary)
            .unwrap();
        graph.list_wanted_files(FileRoleFilter::All).unwrap();

        assert!(!graph.is_fetched(FileId(42)));
        assert!(graph.mark_fetched(FileId(42)).unwrap());
        assert!(!graph.mark_fetched(FileId(42)).unwrap());
        assert!(graph.is_fetched(FileId(42)));
        assert_eq!(
            graph.mark_fetched(FileId(1)),
            Err(GraphError::UnknownFile { file: FileId(1) })
        );
    }

    #[test]
    fn test_assertions_are_idempotent() {
        let mut once = RelationshipGraph::new();
        let mut twice = RelationshipGraph::new();
        for graph in [&mut once, &mut twice] {
            graph.assert_wanted_targets(ids(&[1])).unwrap();
            graph
                .assert_container_membership(ContainerId(10), EntityId(1))
                .unwrap();
            graph.assert_wanted_container_member(EntityId(1)).unwrap();
            graph
                .assert_file_ownership(EntityId(1), [FileId(3), FileId(3)], FileRole::Binary)
                .unwrap();
        }
        twice.assert_wanted_targets(ids(&[1])).unwrap();
        twice
            .assert_container_membership(ContainerId(10), EntityId(1))
            .unwrap();
        twice.assert_wanted_container_member(EntityId(1)).unwrap();
        twice
            .assert_file_ownership(EntityId(1), [FileId(3)], FileRole::Binary)
            .unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let mut graph = RelationshipGraph::new();
        assert_eq!(
            graph.assert_wanted_container_member(EntityId(5)),
            Err(GraphError::UnknownEntity {
                entity: EntityId(5)
            })
        );
        assert_eq!(
            graph.assert_file_ownership(EntityId(5), [FileId(1)], FileRole::Binary),
            Err(GraphError::UnknownEntity {
                entity: EntityId(5)
            })
        );
        assert_eq!(
            graph.assert_legacy_layout(EntityId(5)),
            Err(GraphError::UnknownEntity {
                entity: EntityId(5)
            })
        );
        assert!(matches!(
            graph.is_using_new_layout(EntityId(5)),
            Err(GraphError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_membership_registers_unseen_mate() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1])).unwrap();
        graph
            .assert_container_membership(ContainerId(10), EntityId(9))
            .unwrap();

        assert!(graph.is_using_new_layout(EntityId(9)).unwrap());
        assert_eq!(graph.list_wanted_entities(), ids(&[1]));
        graph
            .assert_file_ownership(EntityId(9), [FileId(3)], FileRole::Binary)
            .unwrap();
    }

    #[test]
    fn test_conflicting_assertions_rejected() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2])).unwrap();
        graph
            .assert_container_membership(ContainerId(10), EntityId(1))
            .unwrap();
        graph.assert_legacy_layout(EntityId(2)).unwrap();

        assert!(matches!(
            graph.assert_container_membership(ContainerId(11), EntityId(1)),
            Err(GraphError::ConflictingContainer { .. })
        ));
        assert_eq!(
            graph.assert_legacy_layout(EntityId(1)),
            Err(GraphError::ConflictingLayout {
                entity: EntityId(1)
            })
        );
        assert_eq!(
            graph.assert_container_membership(ContainerId(10), EntityId(2)),
            Err(GraphError::ConflictingLayout {
                entity: EntityId(2)
            })
        );
    }

    #[test]
    fn test_layout_queries() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[1, 2, 3])).unwrap();
        graph
            .assert_container_membership(ContainerId(10), EntityId(1))
            .unwrap();
        graph.assert_legacy_layout(EntityId(2)).unwrap();

        assert!(graph.is_using_new_layout(EntityId(1)).unwrap());
        assert!(!graph.is_using_new_layout(EntityId(2)).unwrap());
        assert!(matches!(
            graph.is_using_new_layout(EntityId(3)),
            Err(GraphError::MembershipUnknown { .. })
        ));
        assert_eq!(graph.layout_of(EntityId(2)), Some(StorageLayout::Legacy));
        assert_eq!(graph.container_of(EntityId(1)), Some(ContainerId(10)));
        assert_eq!(graph.container_of(EntityId(2)), None);
        assert_eq!(
            graph.entity_links(),
            vec![EntityLink {
                entity: EntityId(1),
                container: ContainerId(10)
            }]
        );
    }

    #[test]
    fn test_legacy_entity_whole_container_wants_only_itself() {
        let mut graph = RelationshipGraph::new();
        graph.assert_wanted_targets(ids(&[5])).unwrap();
        graph.assert_legacy_layout(EntityId(5)).unwrap();
        graph.assert_wanted_container_member(EntityId(5)).unwrap();

        assert_eq!(graph.list_wanted_entities(), ids(&[5]));
    }
}
