//! # Storage Backend Trait
//!
//! This is THE contract between the repository and any storage engine.
//! It exposes two plain ordered stores plus the entity and type registries:
//!
//! - **metadata store**: literal values keyed by `(entity, field)`
//! - **relationship store**: typed edges keyed by `(entity, type, side)`
//!
//! Backends maintain stored order and nothing else. All place invariants
//! live in [`crate::place`].
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory, snapshot reads, serialised writers |

pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::MemoryBackend;

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// Write methods take `&mut Self::Tx` and must fail on a read-only
/// transaction. Writes become visible to other transactions only on commit.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction. A `ReadWrite` transaction excludes every
    /// other `ReadWrite` transaction until it commits or rolls back.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction, publishing its writes atomically.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction, discarding its writes.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Entities
    // ========================================================================

    /// Create an entity of the given type.
    async fn create_entity(&self, tx: &mut Self::Tx, entity_type: &EntityType) -> Result<EntityId>;

    /// Get an entity by ID. Returns None if not found.
    async fn get_entity(&self, tx: &Self::Tx, id: EntityId) -> Result<Option<Entity>>;

    /// All entities, ordered by id.
    async fn all_entities(&self, tx: &Self::Tx) -> Result<Vec<Entity>>;

    // ========================================================================
    // Relationship types
    // ========================================================================

    /// Register a relationship type.
    async fn create_relationship_type(
        &self,
        tx: &mut Self::Tx,
        def: RelationshipTypeDef,
    ) -> Result<RelationshipTypeId>;

    /// Get a relationship type by ID.
    async fn get_relationship_type(
        &self,
        tx: &Self::Tx,
        id: RelationshipTypeId,
    ) -> Result<Option<RelationshipType>>;

    /// All relationship types, ordered by id.
    async fn relationship_types(&self, tx: &Self::Tx) -> Result<Vec<RelationshipType>>;

    /// Relationship types that accept `entity_type` on either side.
    ///
    /// Default: filters `relationship_types()`.
    async fn relationship_types_for(
        &self,
        tx: &Self::Tx,
        entity_type: &EntityType,
    ) -> Result<Vec<RelationshipType>> {
        let all = self.relationship_types(tx).await?;
        Ok(all
            .into_iter()
            .filter(|t| Side::BOTH.iter().any(|s| t.entity_type(*s) == entity_type))
            .collect())
    }

    // ========================================================================
    // Metadata store
    // ========================================================================

    /// Literal values of `(entity, field)`, ordered by place then id.
    async fn list_metadata(
        &self,
        tx: &Self::Tx,
        entity: EntityId,
        field: &FieldKey,
    ) -> Result<Vec<MetadataValue>>;

    /// Every literal value of an entity, ordered by field then place.
    async fn entity_metadata(&self, tx: &Self::Tx, entity: EntityId) -> Result<Vec<MetadataValue>>;

    /// Store a literal value at `place`. Existing rows are not moved.
    async fn insert_metadata(
        &self,
        tx: &mut Self::Tx,
        entity: EntityId,
        field: &FieldKey,
        value: NewValue,
        place: u32,
    ) -> Result<MetadataId>;

    /// Remove a literal value. Returns the removed row if it existed.
    async fn remove_metadata(&self, tx: &mut Self::Tx, id: MetadataId) -> Result<Option<MetadataValue>>;

    /// Overwrite the place of one literal value.
    async fn set_metadata_place(&self, tx: &mut Self::Tx, id: MetadataId, place: u32) -> Result<()>;

    /// Add `delta` to the place of every literal of `(entity, field)` whose
    /// place is `>= from`.
    async fn shift_metadata_from(
        &self,
        tx: &mut Self::Tx,
        entity: EntityId,
        field: &FieldKey,
        from: u32,
        delta: i64,
    ) -> Result<()>;

    // ========================================================================
    // Relationship store
    // ========================================================================

    /// Store a relationship with explicit places.
    #[allow(clippy::too_many_arguments)]
    async fn insert_relationship(
        &self,
        tx: &mut Self::Tx,
        type_id: RelationshipTypeId,
        left: EntityId,
        right: EntityId,
        left_place: u32,
        right_place: u32,
        leftward_value: Option<String>,
        rightward_value: Option<String>,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    async fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Overwrite a relationship row (endpoints, places, custom values).
    async fn update_relationship(&self, tx: &mut Self::Tx, rel: &Relationship) -> Result<()>;

    /// Delete a relationship. Returns the removed row if it existed.
    async fn remove_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Relationships of an entity, optionally filtered by type and by the
    /// side the entity is on. With a side filter the result is ordered by
    /// that side's place, otherwise by id.
    async fn relationships_of(
        &self,
        tx: &Self::Tx,
        entity: EntityId,
        type_id: Option<RelationshipTypeId>,
        side: Option<Side>,
    ) -> Result<Vec<Relationship>>;

    /// Overwrite one side's place of a relationship.
    async fn set_relationship_place(
        &self,
        tx: &mut Self::Tx,
        id: RelId,
        side: Side,
        place: u32,
    ) -> Result<()> {
        let mut rel = self
            .get_relationship(tx, id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("Relationship {id}")))?;
        rel.set_place(side, place);
        self.update_relationship(tx, &rel).await
    }

    /// Add `delta` to `side`'s place of every relationship of `type_id` whose
    /// `side` entity is `entity` and whose place is `>= from`.
    async fn shift_relationships_from(
        &self,
        tx: &mut Self::Tx,
        entity: EntityId,
        type_id: RelationshipTypeId,
        side: Side,
        from: u32,
        delta: i64,
    ) -> Result<()>;

    /// All relationships of a given type, ordered by id.
    async fn relationships_by_type(
        &self,
        tx: &Self::Tx,
        type_id: RelationshipTypeId,
    ) -> Result<Vec<Relationship>>;

    /// Total number of relationships.
    async fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;
}

/// Apply a signed delta to a place, saturating at zero.
pub(crate) fn shifted(place: u32, delta: i64) -> u32 {
    (i64::from(place) + delta).clamp(0, i64::from(u32::MAX)) as u32
}
