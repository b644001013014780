//! # Repository
//!
//! The entry point. A `Repository` wraps a storage backend and runs every
//! mutating operation inside one `ReadWrite` transaction:
//!
//! ```text
//! check input + permission → PlaceReconciler recomputes the affected
//! domain(s) → places written back → commit → affected entities re-indexed
//! ```
//!
//! Operations are split by what they touch: literal values live in
//! `literal.rs`, relationships in `relationship.rs`.

mod literal;
mod relationship;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::auth::Caller;
use crate::config::RepositoryConfig;
use crate::index::{IndexDocument, IndexSink};
use crate::model::*;
use crate::place::{merge_field, PlaceDomain, PlaceReconciler};
use crate::projection::{Projected, VirtualMetadataProjector};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::tx::TxMode;
use crate::{Error, Result};

pub use relationship::DetachOptions;

// ============================================================================
// Repository handle
// ============================================================================

/// Relationship-aware metadata repository over a storage backend.
pub struct Repository<B: StorageBackend> {
    backend: B,
    config: RepositoryConfig,
    index: Option<Arc<dyn IndexSink>>,
}

impl<B: StorageBackend> Repository<B> {
    /// Create a repository with the given backend and default config.
    pub fn with_backend(backend: B) -> Self {
        Self { backend, config: RepositoryConfig::default(), index: None }
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Notify `sink` after every committed write.
    pub fn with_index(mut self, sink: Arc<dyn IndexSink>) -> Self {
        self.index = Some(sink);
        self
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Create an entity. Entities never change type.
    pub async fn create_entity(&self, entity_type: impl Into<EntityType>) -> Result<EntityId> {
        self.create_entity_with(entity_type, Vec::<(FieldKey, NewValue)>::new()).await
    }

    /// Create an entity with initial literal values, each appended to its
    /// field in the given order.
    pub async fn create_entity_with<V: Into<NewValue>>(
        &self,
        entity_type: impl Into<EntityType>,
        metadata: impl IntoIterator<Item = (FieldKey, V)>,
    ) -> Result<EntityId> {
        let entity_type = entity_type.into();
        let values: Vec<(FieldKey, NewValue)> = metadata.into_iter().map(|(f, v)| (f, v.into())).collect();
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            let id = self.backend.create_entity(&mut tx, &entity_type).await?;
            let reconciler = PlaceReconciler::new(&self.backend);
            for (field, value) in values {
                validate_value(&value)?;
                let domain = PlaceDomain::Field { entity: id, field: field.clone() };
                let place = reconciler.next_place(&tx, &domain).await?;
                self.backend.insert_metadata(&mut tx, id, &field, value, place).await?;
            }
            Ok::<_, Error>(id)
        }
        .await;
        let id = self.finish(tx, outcome).await?;
        tracing::info!(entity = %id, entity_type = %entity_type, "created entity");
        self.reindex(&[id]).await;
        Ok(id)
    }

    /// Register a relationship type.
    pub async fn register_relationship_type(&self, def: RelationshipTypeDef) -> Result<RelationshipTypeId> {
        if def.leftward_label.trim().is_empty() || def.rightward_label.trim().is_empty() {
            return Err(Error::InvalidInput("relationship type labels must not be empty".into()));
        }
        for (side, projections) in [(Side::Left, &def.left_projections), (Side::Right, &def.right_projections)] {
            let mut seen = HashSet::new();
            if let Some(dup) = projections.iter().find(|p| !seen.insert(&p.field)) {
                return Err(Error::InvalidInput(format!(
                    "{side} side projects {} more than once", dup.field
                )));
            }
        }
        let labels = format!("{}/{}", def.leftward_label, def.rightward_label);
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.backend.create_relationship_type(&mut tx, def).await;
        let id = self.finish(tx, outcome).await?;
        tracing::info!(type_id = %id, labels = %labels, "registered relationship type");
        Ok(id)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.get_entity(&tx, id).await;
        self.finish(tx, outcome).await
    }

    pub async fn relationship_type(&self, id: RelationshipTypeId) -> Result<Option<RelationshipType>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.get_relationship_type(&tx, id).await;
        self.finish(tx, outcome).await
    }

    /// Merged literal and virtual values of one field, in display order.
    pub async fn metadata(&self, entity: EntityId, field: &FieldKey) -> Result<Vec<MetadataValue>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.merged_field(&tx, entity, field).await
        }
        .await;
        self.finish(tx, outcome).await
    }

    /// Merged values of every field of an entity, grouped by field.
    pub async fn all_metadata(&self, entity: EntityId) -> Result<Vec<MetadataValue>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.merged_entity(&tx, entity).await
        }
        .await;
        self.finish(tx, outcome).await
    }

    pub async fn relationship(&self, id: RelId) -> Result<Option<Relationship>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.get_relationship(&tx, id).await;
        self.finish(tx, outcome).await
    }

    /// Relationships of an entity, optionally of one type, ordered by id.
    pub async fn relationships_of(
        &self,
        entity: EntityId,
        type_id: Option<RelationshipTypeId>,
    ) -> Result<Vec<Relationship>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.relationships_of(&tx, entity, type_id, None).await;
        self.finish(tx, outcome).await
    }

    pub async fn relationships_by_type(&self, type_id: RelationshipTypeId) -> Result<Vec<Relationship>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.relationships_by_type(&tx, type_id).await;
        self.finish(tx, outcome).await
    }

    /// Place domains of `entity` whose places are not exactly `0..n-1`.
    /// Empty after every committed operation.
    pub async fn non_dense_domains(&self, entity: EntityId) -> Result<Vec<PlaceDomain>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = async {
            let reconciler = PlaceReconciler::new(&self.backend);
            let mut out = Vec::new();
            for domain in self.domains_of(&tx, entity).await? {
                if !reconciler.is_dense(&tx, &domain).await? {
                    out.push(domain);
                }
            }
            Ok::<_, Error>(out)
        }
        .await;
        self.finish(tx, outcome).await
    }

    // ========================================================================
    // Internals shared by the operation modules
    // ========================================================================

    /// Commit on success, roll back on failure.
    pub(crate) async fn finish<T>(&self, tx: B::Tx, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.backend.commit_tx(tx).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.backend.rollback_tx(tx).await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn require_entity(&self, tx: &B::Tx, id: EntityId) -> Result<Entity> {
        self.backend
            .get_entity(tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Entity {id}")))
    }

    async fn require_type(&self, tx: &B::Tx, id: RelationshipTypeId) -> Result<RelationshipType> {
        self.backend
            .get_relationship_type(tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Relationship type {id}")))
    }

    async fn require_relationship(&self, tx: &B::Tx, id: RelId) -> Result<Relationship> {
        self.backend
            .get_relationship(tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))
    }

    fn require_write(&self, caller: &Caller, entity: EntityId, action: &str) -> Result<()> {
        if caller.can_write(entity) {
            Ok(())
        } else {
            tracing::warn!(user = %caller.user, entity = %entity, action, "write denied");
            Err(Error::Forbidden(format!("{} may not {action} on entity {entity}", caller.user)))
        }
    }

    async fn merged_field(&self, tx: &B::Tx, entity: EntityId, field: &FieldKey) -> Result<Vec<MetadataValue>> {
        let literals = self.backend.list_metadata(tx, entity, field).await?;
        let virtuals = VirtualMetadataProjector::new(&self.backend)
            .virtual_metadata(tx, entity, Some(field))
            .await?;
        Ok(merge_field(literals, virtuals))
    }

    pub(crate) async fn merged_entity(&self, tx: &B::Tx, entity: EntityId) -> Result<Vec<MetadataValue>> {
        let mut literals: BTreeMap<FieldKey, Vec<MetadataValue>> = BTreeMap::new();
        for value in self.backend.entity_metadata(tx, entity).await? {
            literals.entry(value.field.clone()).or_default().push(value);
        }
        let mut virtuals: BTreeMap<FieldKey, Vec<Projected>> = BTreeMap::new();
        for projected in VirtualMetadataProjector::new(&self.backend).virtual_metadata(tx, entity, None).await? {
            virtuals.entry(projected.value.field.clone()).or_default().push(projected);
        }
        let fields: BTreeSet<FieldKey> = literals.keys().chain(virtuals.keys()).cloned().collect();
        let mut out = Vec::new();
        for field in fields {
            out.extend(merge_field(
                literals.remove(&field).unwrap_or_default(),
                virtuals.remove(&field).unwrap_or_default(),
            ));
        }
        Ok(out)
    }

    /// Every place domain `entity` has members in.
    async fn domains_of(&self, tx: &B::Tx, entity: EntityId) -> Result<Vec<PlaceDomain>> {
        let mut domains: Vec<PlaceDomain> = Vec::new();
        let mut push = |d: PlaceDomain| {
            if !domains.contains(&d) {
                domains.push(d);
            }
        };
        for value in self.backend.entity_metadata(tx, entity).await? {
            push(PlaceDomain::Field { entity, field: value.field });
        }
        let mut types: HashMap<RelationshipTypeId, RelationshipType> = HashMap::new();
        for rel in self.backend.relationships_of(tx, entity, None, None).await? {
            if !types.contains_key(&rel.type_id) {
                let rel_type = self.require_type(tx, rel.type_id).await?;
                types.insert(rel.type_id, rel_type);
            }
            let Some(rel_type) = types.get(&rel.type_id) else { continue };
            for side in rel.sides_of(entity) {
                push(PlaceDomain::of_relationship(&rel, rel_type, side));
            }
        }
        Ok(domains)
    }

    // ========================================================================
    // Index propagation
    // ========================================================================

    /// Re-index `seeds` and the entities inheriting virtual metadata from
    /// them. Failures are logged; the write has already committed.
    async fn reindex(&self, seeds: &[EntityId]) {
        let Some(sink) = self.index.as_ref() else { return };
        if !self.config.index_on_write {
            return;
        }
        match self.try_reindex(sink.as_ref(), seeds).await {
            Ok(count) => tracing::debug!(count, "re-indexed entities"),
            Err(e) => tracing::warn!(error = %e, "post-commit index update failed"),
        }
    }

    async fn try_reindex(&self, sink: &dyn IndexSink, seeds: &[EntityId]) -> Result<usize> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = async {
            let mut seen: HashSet<EntityId> = HashSet::new();
            let mut queue: VecDeque<(EntityId, usize)> = VecDeque::new();
            for seed in seeds {
                if seen.insert(*seed) {
                    queue.push_back((*seed, 0));
                }
            }
            let mut related = 0usize;
            let mut types: HashMap<RelationshipTypeId, RelationshipType> = HashMap::new();
            let mut indexed = 0usize;
            while let Some((entity, depth)) = queue.pop_front() {
                let Some(found) = self.backend.get_entity(&tx, entity).await? else { continue };
                let values = self.merged_entity(&tx, entity).await?;
                sink.index(IndexDocument::from_values(entity, found.entity_type, &values))?;
                indexed += 1;
                if depth >= self.config.related_items_max_depth {
                    continue;
                }
                for rel in self.backend.relationships_of(&tx, entity, None, None).await? {
                    if !types.contains_key(&rel.type_id) {
                        let rel_type = self.require_type(&tx, rel.type_id).await?;
                        types.insert(rel.type_id, rel_type);
                    }
                    let Some(rel_type) = types.get(&rel.type_id) else { continue };
                    for side in rel.sides_of(entity) {
                        // The other end inherits values from this entity
                        // only if its side projects something.
                        let heir = side.opposite();
                        if rel_type.projections(heir).is_empty() {
                            continue;
                        }
                        let other = rel.entity(heir);
                        if related >= self.config.related_items_max || !seen.insert(other) {
                            continue;
                        }
                        related += 1;
                        queue.push_back((other, depth + 1));
                    }
                }
            }
            Ok::<_, Error>(indexed)
        }
        .await;
        self.finish(tx, outcome).await
    }
}

/// In-memory repository for testing and embedding.
impl Repository<MemoryBackend> {
    pub fn open_memory() -> Self {
        Self::with_backend(MemoryBackend::new())
    }
}

fn validate_value(value: &NewValue) -> Result<()> {
    if value.value.trim().is_empty() {
        Err(Error::InvalidInput("metadata value must not be empty".into()))
    } else {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
