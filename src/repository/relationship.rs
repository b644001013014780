//! Relationship operations: attach, detach, repoint and custom values.
//!
//! A relationship holds one place per side. A side whose type projects a
//! `use_for_place` field competes with that field's literal values; any
//! other side is numbered among relationships of the same type and side.

use crate::auth::Caller;
use crate::model::*;
use crate::place::{PlaceDomain, PlaceReconciler};
use crate::projection::VirtualMetadataProjector;
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};

use super::Repository;

/// Whether to keep a deleted relationship's virtual values as literals.
/// `None` falls back to the relationship type's `copy_to_*` setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachOptions {
    pub copy_to_left: Option<bool>,
    pub copy_to_right: Option<bool>,
}

impl DetachOptions {
    pub fn copy(to_left: bool, to_right: bool) -> Self {
        Self { copy_to_left: Some(to_left), copy_to_right: Some(to_right) }
    }

    fn resolve(self, rel_type: &RelationshipType, side: Side) -> bool {
        let explicit = match side {
            Side::Left => self.copy_to_left,
            Side::Right => self.copy_to_right,
        };
        explicit.unwrap_or_else(|| rel_type.copy_to(side))
    }
}

impl<B: StorageBackend> Repository<B> {
    /// Create a relationship. Each side without a place hint is appended at
    /// the end of its domain; a hint inserts there and shifts the rest.
    pub async fn attach_relationship(&self, caller: &Caller, new: NewRelationship) -> Result<Relationship> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            let rel_type = self.require_type(&tx, new.type_id).await?;
            for side in Side::BOTH {
                let entity = self.require_entity(&tx, new.entity(side)).await?;
                check_side_type(&rel_type, side, &entity)?;
            }
            if new.left == new.right {
                return Err(Error::InvalidRelationship(format!(
                    "entity {} cannot be related to itself", new.left
                )));
            }
            if !caller.can_write(new.left) && !caller.can_write(new.right) {
                tracing::warn!(user = %caller.user, left = %new.left, right = %new.right, "relationship create denied");
                return Err(Error::Forbidden(format!(
                    "{} may not relate {} and {}", caller.user, new.left, new.right
                )));
            }
            let mut places = [0u32; 2];
            for (i, side) in Side::BOTH.into_iter().enumerate() {
                self.check_cardinality(&tx, &rel_type, side, new.entity(side)).await?;
                let domain = PlaceDomain::for_side(new.entity(side), &rel_type, side);
                let reconciler = PlaceReconciler::new(&self.backend);
                places[i] = match new.place_hint(side) {
                    Some(hint) => reconciler.open_gap(&mut tx, &domain, hint).await?,
                    None => reconciler.next_place(&tx, &domain).await?,
                };
            }
            let id = self
                .backend
                .insert_relationship(
                    &mut tx,
                    new.type_id,
                    new.left,
                    new.right,
                    places[0],
                    places[1],
                    new.leftward_value.clone(),
                    new.rightward_value.clone(),
                )
                .await?;
            self.require_relationship(&tx, id).await
        }
        .await;
        let rel = self.finish(tx, outcome).await?;
        tracing::info!(
            relationship = %rel.id,
            left = %rel.left,
            right = %rel.right,
            left_place = rel.left_place,
            right_place = rel.right_place,
            "created relationship"
        );
        self.reindex(&[rel.left, rel.right]).await;
        Ok(rel)
    }

    /// Delete a relationship. Elements after it on each side move down one
    /// place. Sides selected by `options` first get their virtual values
    /// copied into literals, the place-holding one at the same place.
    pub async fn detach_relationship(
        &self,
        caller: &Caller,
        id: RelId,
        options: DetachOptions,
    ) -> Result<Relationship> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            let rel = self.require_relationship(&tx, id).await?;
            let rel_type = self.require_type(&tx, rel.type_id).await?;
            if !caller.can_write(rel.left) && !caller.can_write(rel.right) {
                tracing::warn!(user = %caller.user, relationship = %id, "relationship delete denied");
                return Err(Error::Forbidden(format!("{} may not delete relationship {id}", caller.user)));
            }
            for side in Side::BOTH {
                self.check_min_cardinality(&tx, &rel_type, side, rel.entity(side)).await?;
            }
            let reconciler = PlaceReconciler::new(&self.backend);
            let projector = VirtualMetadataProjector::new(&self.backend);
            for side in Side::BOTH {
                if !options.resolve(&rel_type, side) {
                    continue;
                }
                let entity = rel.entity(side);
                self.require_write(caller, entity, "copy virtual metadata")?;
                for projected in projector.project(&tx, &rel, &rel_type, side).await? {
                    let value = projected.value;
                    let place = if projected.use_for_place {
                        value.place
                    } else {
                        let domain = PlaceDomain::Field { entity, field: value.field.clone() };
                        reconciler.next_place(&tx, &domain).await?
                    };
                    self.backend
                        .insert_metadata(&mut tx, entity, &value.field, NewValue::new(value.value), place)
                        .await?;
                }
                tracing::debug!(relationship = %id, entity = %entity, "copied virtual values");
            }
            self.backend.remove_relationship(&mut tx, id).await?;
            for side in Side::BOTH {
                reconciler.compact(&mut tx, &PlaceDomain::of_relationship(&rel, &rel_type, side)).await?;
            }
            Ok::<_, Error>(rel)
        }
        .await;
        let rel = self.finish(tx, outcome).await?;
        tracing::info!(relationship = %rel.id, left = %rel.left, right = %rel.right, "deleted relationship");
        self.reindex(&[rel.left, rel.right]).await;
        Ok(rel)
    }

    /// Point `side` of a relationship at another entity. The other side
    /// keeps its place; the moved side is appended to the new entity's
    /// domain and the old entity's domain is compacted.
    pub async fn repoint(
        &self,
        caller: &Caller,
        id: RelId,
        side: Side,
        new_entity: EntityId,
    ) -> Result<Relationship> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            let mut rel = self.require_relationship(&tx, id).await?;
            let rel_type = self.require_type(&tx, rel.type_id).await?;
            let target = self
                .backend
                .get_entity(&tx, new_entity)
                .await?
                .ok_or_else(|| Error::InvalidReference(format!("Entity {new_entity}")))?;
            let old_entity = rel.entity(side);
            if old_entity == new_entity {
                return Ok((rel, old_entity));
            }
            check_side_type(&rel_type, side, &target)?;
            let unmoved = rel.entity(side.opposite());
            if unmoved == new_entity {
                return Err(Error::InvalidRelationship(format!(
                    "entity {new_entity} cannot be related to itself"
                )));
            }
            if !self.config.repoint_policy.permits(caller, unmoved, old_entity, new_entity) {
                tracing::warn!(
                    user = %caller.user,
                    relationship = %id,
                    policy = ?self.config.repoint_policy,
                    "repoint denied"
                );
                return Err(Error::Forbidden(format!(
                    "{} may not move relationship {id} from {old_entity} to {new_entity}", caller.user
                )));
            }
            self.check_cardinality(&tx, &rel_type, side, new_entity).await?;

            let reconciler = PlaceReconciler::new(&self.backend);
            let old_domain = PlaceDomain::of_relationship(&rel, &rel_type, side);
            let new_place = reconciler
                .next_place(&tx, &PlaceDomain::for_side(new_entity, &rel_type, side))
                .await?;
            rel.set_entity(side, new_entity);
            rel.set_place(side, new_place);
            self.backend.update_relationship(&mut tx, &rel).await?;
            reconciler.compact(&mut tx, &old_domain).await?;
            Ok::<_, Error>((rel, old_entity))
        }
        .await;
        let (rel, old_entity) = self.finish(tx, outcome).await?;
        tracing::info!(
            relationship = %rel.id,
            side = %side,
            from = %old_entity,
            to = %new_entity,
            place = rel.place(side),
            "repointed relationship"
        );
        self.reindex(&[old_entity, rel.left, rel.right]).await;
        Ok(rel)
    }

    /// Replace the custom values shown instead of the projected ones.
    pub async fn set_relationship_values(
        &self,
        caller: &Caller,
        id: RelId,
        leftward_value: Option<String>,
        rightward_value: Option<String>,
    ) -> Result<Relationship> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            let mut rel = self.require_relationship(&tx, id).await?;
            if !caller.can_write(rel.left) && !caller.can_write(rel.right) {
                tracing::warn!(user = %caller.user, relationship = %id, "relationship update denied");
                return Err(Error::Forbidden(format!("{} may not update relationship {id}", caller.user)));
            }
            rel.leftward_value = leftward_value;
            rel.rightward_value = rightward_value;
            self.backend.update_relationship(&mut tx, &rel).await?;
            Ok::<_, Error>(rel)
        }
        .await;
        let rel = self.finish(tx, outcome).await?;
        tracing::info!(relationship = %rel.id, "updated relationship values");
        self.reindex(&[rel.left, rel.right]).await;
        Ok(rel)
    }

    async fn check_cardinality(
        &self,
        tx: &B::Tx,
        rel_type: &RelationshipType,
        side: Side,
        entity: EntityId,
    ) -> Result<()> {
        let Some(max) = rel_type.max_cardinality(side) else { return Ok(()) };
        let held = self.backend.relationships_of(tx, entity, Some(rel_type.id), Some(side)).await?.len();
        if held as u64 >= u64::from(max) {
            return Err(Error::InvalidRelationship(format!(
                "entity {entity} already has {held} {} relationships (max {max})",
                rel_type.label(side)
            )));
        }
        Ok(())
    }

    /// Refuse a delete that would leave `entity` below the side's minimum.
    async fn check_min_cardinality(
        &self,
        tx: &B::Tx,
        rel_type: &RelationshipType,
        side: Side,
        entity: EntityId,
    ) -> Result<()> {
        let Some(min) = rel_type.min_cardinality(side) else { return Ok(()) };
        let held = self.backend.relationships_of(tx, entity, Some(rel_type.id), Some(side)).await?.len();
        if held as u64 <= u64::from(min) {
            return Err(Error::InvalidRelationship(format!(
                "entity {entity} needs at least {min} {} relationships",
                rel_type.label(side)
            )));
        }
        Ok(())
    }
}

fn check_side_type(rel_type: &RelationshipType, side: Side, entity: &Entity) -> Result<()> {
    let expected = rel_type.entity_type(side);
    if entity.is_a(expected) {
        Ok(())
    } else {
        Err(Error::InvalidRelationship(format!(
            "{side} of type {} must be {expected}, entity {} is {}",
            rel_type.id, entity.id, entity.entity_type
        )))
    }
}
