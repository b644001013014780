//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//!
//! ## Isolation
//!
//! - **Readers** get an immutable snapshot (`Arc<MemoryState>`) taken at
//!   `begin_tx`. They never block and never see a half-applied write.
//! - **Writers** are serialised by an async mutex held for the whole
//!   transaction. Each writer works on a private copy of the state which is
//!   published atomically by `commit_tx`. `rollback_tx` (or dropping the
//!   transaction) discards the copy.
//!
//! ## Limitations
//!
//! - Beginning a write transaction clones the whole state. Fine for tests
//!   and embedding; not meant for large repositories.
//! - No persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode};
use crate::{Error, Result};
use super::{shifted, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory repository storage.
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    committed: RwLock<Arc<MemoryState>>,
    writer: Arc<Mutex<()>>,
    next_tx_id: AtomicU64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entities: HashMap<EntityId, Entity>,
    types: HashMap<RelationshipTypeId, RelationshipType>,
    metadata: HashMap<MetadataId, MetadataValue>,
    /// (entity, field) → literal ids
    field_index: HashMap<(EntityId, FieldKey), SmallVec<[MetadataId; 4]>>,
    relationships: HashMap<RelId, Relationship>,
    /// entity → ids of relationships touching it
    adjacency: HashMap<EntityId, SmallVec<[RelId; 4]>>,
    next_entity_id: u64,
    next_metadata_id: u64,
    next_rel_id: u64,
    next_type_id: u64,
}

impl MemoryState {
    fn require_entity(&self, id: EntityId) -> Result<()> {
        if self.entities.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Entity {id}")))
        }
    }

    fn link(&mut self, rel: &Relationship) {
        for entity in [rel.left, rel.right] {
            let ids = self.adjacency.entry(entity).or_default();
            if !ids.contains(&rel.id) {
                ids.push(rel.id);
            }
        }
    }

    fn unlink(&mut self, rel: &Relationship) {
        for entity in [rel.left, rel.right] {
            if let Some(ids) = self.adjacency.get_mut(&entity) {
                ids.retain(|rid| *rid != rel.id);
            }
        }
    }

    fn touching(&self, entity: EntityId) -> impl Iterator<Item = &Relationship> + '_ {
        self.adjacency
            .get(&entity)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.relationships.get(id))
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                committed: RwLock::new(Arc::new(MemoryState {
                    next_entity_id: 1,
                    next_metadata_id: 1,
                    next_rel_id: 1,
                    next_type_id: 1,
                    ..MemoryState::default()
                })),
                writer: Arc::new(Mutex::new(())),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    fn snapshot(&self) -> Arc<MemoryState> {
        self.inner.committed.read().clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction: a snapshot for readers, a private working copy
/// plus the writer lock for writers.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    view: TxView,
}

enum TxView {
    Snapshot(Arc<MemoryState>),
    Working {
        state: Box<MemoryState>,
        writer: OwnedMutexGuard<()>,
    },
}

impl MemoryTx {
    fn state(&self) -> &MemoryState {
        match &self.view {
            TxView::Snapshot(state) => &**state,
            TxView::Working { state, .. } => &**state,
        }
    }

    fn state_mut(&mut self) -> Result<&mut MemoryState> {
        match &mut self.view {
            TxView::Working { state, .. } => Ok(&mut **state),
            TxView::Snapshot(_) => Err(Error::TxError(format!(
                "write attempted in read-only transaction {}",
                self.id
            ))),
        }
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        let view = match mode {
            TxMode::ReadOnly => TxView::Snapshot(self.snapshot()),
            TxMode::ReadWrite => {
                // Take the writer lock before copying so the copy is current.
                let writer = self.inner.writer.clone().lock_owned().await;
                let state = Box::new(MemoryState::clone(&self.snapshot()));
                TxView::Working { state, writer }
            }
        };
        Ok(MemoryTx { id, mode, view })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        if let TxView::Working { state, writer } = tx.view {
            *self.inner.committed.write() = Arc::new(*state);
            drop(writer);
            tracing::debug!(tx = %tx.id, "committed");
        }
        Ok(())
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        if tx.mode.allows_writes() {
            tracing::debug!(tx = %tx.id, "rolled back");
        }
        Ok(())
    }

    // ========================================================================
    // Entities
    // ========================================================================

    async fn create_entity(&self, tx: &mut MemoryTx, entity_type: &EntityType) -> Result<EntityId> {
        let state = tx.state_mut()?;
        let id = EntityId(state.next_entity_id);
        state.next_entity_id += 1;
        state.entities.insert(id, Entity::new(id, entity_type.clone()));
        Ok(id)
    }

    async fn get_entity(&self, tx: &MemoryTx, id: EntityId) -> Result<Option<Entity>> {
        Ok(tx.state().entities.get(&id).cloned())
    }

    async fn all_entities(&self, tx: &MemoryTx) -> Result<Vec<Entity>> {
        let mut all: Vec<Entity> = tx.state().entities.values().cloned().collect();
        all.sort_by_key(|e| e.id);
        Ok(all)
    }

    // ========================================================================
    // Relationship types
    // ========================================================================

    async fn create_relationship_type(
        &self,
        tx: &mut MemoryTx,
        def: RelationshipTypeDef,
    ) -> Result<RelationshipTypeId> {
        let state = tx.state_mut()?;
        let id = RelationshipTypeId(state.next_type_id);
        state.next_type_id += 1;
        state.types.insert(id, RelationshipType { id, def });
        Ok(id)
    }

    async fn get_relationship_type(
        &self,
        tx: &MemoryTx,
        id: RelationshipTypeId,
    ) -> Result<Option<RelationshipType>> {
        Ok(tx.state().types.get(&id).cloned())
    }

    async fn relationship_types(&self, tx: &MemoryTx) -> Result<Vec<RelationshipType>> {
        let mut all: Vec<RelationshipType> = tx.state().types.values().cloned().collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }

    // ========================================================================
    // Metadata store
    // ========================================================================

    async fn list_metadata(
        &self,
        tx: &MemoryTx,
        entity: EntityId,
        field: &FieldKey,
    ) -> Result<Vec<MetadataValue>> {
        let state = tx.state();
        let mut values: Vec<MetadataValue> = state
            .field_index
            .get(&(entity, field.clone()))
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| state.metadata.get(id).cloned())
            .collect();
        values.sort_by_key(|v| (v.place, v.literal_id()));
        Ok(values)
    }

    async fn entity_metadata(&self, tx: &MemoryTx, entity: EntityId) -> Result<Vec<MetadataValue>> {
        let mut values: Vec<MetadataValue> = tx
            .state()
            .metadata
            .values()
            .filter(|v| v.entity == entity)
            .cloned()
            .collect();
        values.sort_by(|a, b| {
            (&a.field, a.place, a.literal_id()).cmp(&(&b.field, b.place, b.literal_id()))
        });
        Ok(values)
    }

    async fn insert_metadata(
        &self,
        tx: &mut MemoryTx,
        entity: EntityId,
        field: &FieldKey,
        value: NewValue,
        place: u32,
    ) -> Result<MetadataId> {
        let state = tx.state_mut()?;
        state.require_entity(entity)?;
        let id = MetadataId(state.next_metadata_id);
        state.next_metadata_id += 1;
        state.metadata.insert(id, MetadataValue {
            entity,
            field: field.clone(),
            value: value.value,
            language: value.language,
            place,
            origin: Origin::Literal(id),
        });
        state.field_index.entry((entity, field.clone())).or_default().push(id);
        Ok(id)
    }

    async fn remove_metadata(&self, tx: &mut MemoryTx, id: MetadataId) -> Result<Option<MetadataValue>> {
        let state = tx.state_mut()?;
        let removed = state.metadata.remove(&id);
        if let Some(row) = &removed {
            if let Some(ids) = state.field_index.get_mut(&(row.entity, row.field.clone())) {
                ids.retain(|mid| *mid != id);
            }
        }
        Ok(removed)
    }

    async fn set_metadata_place(&self, tx: &mut MemoryTx, id: MetadataId, place: u32) -> Result<()> {
        let state = tx.state_mut()?;
        let row = state.metadata.get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Metadata value {id}")))?;
        row.place = place;
        Ok(())
    }

    async fn shift_metadata_from(
        &self,
        tx: &mut MemoryTx,
        entity: EntityId,
        field: &FieldKey,
        from: u32,
        delta: i64,
    ) -> Result<()> {
        let state = tx.state_mut()?;
        let ids = state.field_index.get(&(entity, field.clone())).cloned().unwrap_or_default();
        for id in ids {
            if let Some(row) = state.metadata.get_mut(&id) {
                if row.place >= from {
                    row.place = shifted(row.place, delta);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Relationship store
    // ========================================================================

    async fn insert_relationship(
        &self,
        tx: &mut MemoryTx,
        type_id: RelationshipTypeId,
        left: EntityId,
        right: EntityId,
        left_place: u32,
        right_place: u32,
        leftward_value: Option<String>,
        rightward_value: Option<String>,
    ) -> Result<RelId> {
        let state = tx.state_mut()?;
        state.require_entity(left)?;
        state.require_entity(right)?;
        if !state.types.contains_key(&type_id) {
            return Err(Error::NotFound(format!("Relationship type {type_id}")));
        }

        let id = RelId(state.next_rel_id);
        state.next_rel_id += 1;
        let rel = Relationship {
            id,
            type_id,
            left,
            right,
            left_place,
            right_place,
            leftward_value,
            rightward_value,
            created_at: Utc::now(),
        };
        state.link(&rel);
        state.relationships.insert(id, rel);
        Ok(id)
    }

    async fn get_relationship(&self, tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(tx.state().relationships.get(&id).cloned())
    }

    async fn update_relationship(&self, tx: &mut MemoryTx, rel: &Relationship) -> Result<()> {
        let state = tx.state_mut()?;
        state.require_entity(rel.left)?;
        state.require_entity(rel.right)?;
        let old = state.relationships.get(&rel.id).cloned()
            .ok_or_else(|| Error::NotFound(format!("Relationship {}", rel.id)))?;
        if old.left != rel.left || old.right != rel.right {
            state.unlink(&old);
            state.link(rel);
        }
        state.relationships.insert(rel.id, rel.clone());
        Ok(())
    }

    async fn remove_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        let state = tx.state_mut()?;
        let removed = state.relationships.remove(&id);
        if let Some(rel) = &removed {
            state.unlink(rel);
        }
        Ok(removed)
    }

    async fn relationships_of(
        &self,
        tx: &MemoryTx,
        entity: EntityId,
        type_id: Option<RelationshipTypeId>,
        side: Option<Side>,
    ) -> Result<Vec<Relationship>> {
        let mut result: Vec<Relationship> = tx
            .state()
            .touching(entity)
            .filter(|r| type_id.is_none_or(|t| r.type_id == t))
            .filter(|r| side.is_none_or(|s| r.entity(s) == entity))
            .cloned()
            .collect();
        match side {
            Some(s) => result.sort_by_key(|r| (r.place(s), r.id)),
            None => result.sort_by_key(|r| r.id),
        }
        Ok(result)
    }

    async fn shift_relationships_from(
        &self,
        tx: &mut MemoryTx,
        entity: EntityId,
        type_id: RelationshipTypeId,
        side: Side,
        from: u32,
        delta: i64,
    ) -> Result<()> {
        let state = tx.state_mut()?;
        let ids: Vec<RelId> = state
            .touching(entity)
            .filter(|r| r.type_id == type_id && r.entity(side) == entity && r.place(side) >= from)
            .map(|r| r.id)
            .collect();
        for id in ids {
            if let Some(rel) = state.relationships.get_mut(&id) {
                let place = shifted(rel.place(side), delta);
                rel.set_place(side, place);
            }
        }
        Ok(())
    }

    async fn relationships_by_type(
        &self,
        tx: &MemoryTx,
        type_id: RelationshipTypeId,
    ) -> Result<Vec<Relationship>> {
        let mut result: Vec<Relationship> = tx
            .state()
            .relationships
            .values()
            .filter(|r| r.type_id == type_id)
            .cloned()
            .collect();
        result.sort_by_key(|r| r.id);
        Ok(result)
    }

    async fn relationship_count(&self, tx: &MemoryTx) -> Result<u64> {
        Ok(tx.state().relationships.len() as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn author_type(db: &MemoryBackend, tx: &mut MemoryTx) -> RelationshipTypeId {
        db.create_relationship_type(
            tx,
            RelationshipTypeDef::new("Publication", "Person", "isAuthorOfPublication", "isPublicationOfAuthor"),
        ).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_entity() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let id = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let entity = db.get_entity(&tx, id).await.unwrap().unwrap();

        assert_eq!(entity.entity_type, EntityType::from("Publication"));
        assert!(db.get_entity(&tx, EntityId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_to_readers() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let id = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();

        let reader = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_entity(&reader, id).await.unwrap().is_none());

        db.commit_tx(tx).await.unwrap();
        // Old snapshot stays stable; a new one sees the commit.
        assert!(db.get_entity(&reader, id).await.unwrap().is_none());
        let reader2 = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_entity(&reader2, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let id = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        db.rollback_tx(tx).await.unwrap();

        let reader = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_entity(&reader, id).await.unwrap().is_none());
        assert!(db.all_entities(&reader).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        let err = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap_err();
        assert!(matches!(err, Error::TxError(_)));
    }

    #[tokio::test]
    async fn test_writers_are_serialised() {
        let db = MemoryBackend::new();
        let first = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), db.begin_tx(TxMode::ReadWrite)).await;
        assert!(blocked.is_err(), "second writer must wait for the first");

        db.commit_tx(first).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(500), db.begin_tx(TxMode::ReadWrite)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_metadata_listing_and_shift() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let e = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let field = FieldKey::of("dc.subject");

        db.insert_metadata(&mut tx, e, &field, NewValue::new("b"), 1).await.unwrap();
        db.insert_metadata(&mut tx, e, &field, NewValue::new("a"), 0).await.unwrap();
        db.insert_metadata(&mut tx, e, &field, NewValue::new("c"), 2).await.unwrap();

        let values: Vec<String> = db.list_metadata(&tx, e, &field).await.unwrap()
            .into_iter().map(|v| v.value).collect();
        assert_eq!(values, vec!["a", "b", "c"]);

        db.shift_metadata_from(&mut tx, e, &field, 1, 1).await.unwrap();
        let places: Vec<u32> = db.list_metadata(&tx, e, &field).await.unwrap()
            .into_iter().map(|v| v.place).collect();
        assert_eq!(places, vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_insert_metadata_requires_entity() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let err = db.insert_metadata(&mut tx, EntityId(42), &FieldKey::of("dc.title"), NewValue::new("x"), 0)
            .await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_relationships_ordered_by_side_place() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let t = author_type(&db, &mut tx).await;
        let publication = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let a = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        let b = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();

        let r1 = db.insert_relationship(&mut tx, t, publication, a, 1, 0, None, None).await.unwrap();
        let r2 = db.insert_relationship(&mut tx, t, publication, b, 0, 0, None, None).await.unwrap();

        let left: Vec<RelId> = db.relationships_of(&tx, publication, Some(t), Some(Side::Left)).await.unwrap()
            .into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec![r2, r1]);
        assert!(db.relationships_of(&tx, publication, Some(t), Some(Side::Right)).await.unwrap().is_empty());
        assert_eq!(db.relationships_of(&tx, a, None, None).await.unwrap().len(), 1);

        db.shift_relationships_from(&mut tx, publication, t, Side::Left, 1, -1).await.unwrap();
        let moved = db.get_relationship(&tx, r1).await.unwrap().unwrap();
        assert_eq!(moved.left_place, 0);
    }

    #[tokio::test]
    async fn test_update_relationship_moves_adjacency() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let t = author_type(&db, &mut tx).await;
        let p1 = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let p2 = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let a = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        let id = db.insert_relationship(&mut tx, t, p1, a, 0, 0, None, None).await.unwrap();

        let mut rel = db.get_relationship(&tx, id).await.unwrap().unwrap();
        rel.set_entity(Side::Left, p2);
        db.update_relationship(&mut tx, &rel).await.unwrap();

        assert!(db.relationships_of(&tx, p1, None, None).await.unwrap().is_empty());
        assert_eq!(db.relationships_of(&tx, p2, None, None).await.unwrap().len(), 1);
        assert_eq!(db.relationships_of(&tx, a, None, None).await.unwrap().len(), 1);

        assert!(db.remove_relationship(&mut tx, id).await.unwrap().is_some());
        assert!(db.relationships_of(&tx, a, None, None).await.unwrap().is_empty());
        assert_eq!(db.relationship_count(&tx).await.unwrap(), 0);
    }
}
