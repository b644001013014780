//! # Place Reconciliation
//!
//! Keeps every place domain dense (`0..n-1`) across structural changes.
//!
//! A **place domain** is the ordered sequence one place ordinal ranges over:
//!
//! | Domain | Members |
//! |--------|---------|
//! | `Field` | literal values of `(entity, field)` + relationships whose side uses `field` for place |
//! | `RelationshipSide` | relationships of one type on one side of an entity (`use_for_place = false`) |
//!
//! Order inside a domain is `(place, literal before relationship, id)`.
//! Ids are allocated monotonically, so the last key is attachment order.
//!
//! Every method here runs inside the caller's write transaction: the caller
//! reads, computes and writes back before committing, so two writers can
//! never hand out the same place.

use std::cmp::Ordering;
use std::fmt;

use hashbrown::HashMap;

use crate::model::*;
use crate::projection::Projected;
use crate::storage::StorageBackend;
use crate::{Error, Result};

// ============================================================================
// Domains and members
// ============================================================================

/// One independently numbered place sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceDomain {
    Field { entity: EntityId, field: FieldKey },
    RelationshipSide { entity: EntityId, type_id: RelationshipTypeId, side: Side },
}

impl PlaceDomain {
    /// Domain that `side` of `rel` is numbered in.
    pub fn of_relationship(rel: &Relationship, rel_type: &RelationshipType, side: Side) -> Self {
        Self::for_side(rel.entity(side), rel_type, side)
    }

    /// Domain a relationship of `rel_type` would join with `entity` on `side`.
    pub fn for_side(entity: EntityId, rel_type: &RelationshipType, side: Side) -> Self {
        match rel_type.place_field(side) {
            Some(field) => PlaceDomain::Field { entity, field: field.clone() },
            None => PlaceDomain::RelationshipSide { entity, type_id: rel_type.id, side },
        }
    }

    pub fn entity(&self) -> EntityId {
        match self {
            PlaceDomain::Field { entity, .. } | PlaceDomain::RelationshipSide { entity, .. } => *entity,
        }
    }
}

impl fmt::Display for PlaceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceDomain::Field { entity, field } => write!(f, "{entity}/{field}"),
            PlaceDomain::RelationshipSide { entity, type_id, side } => {
                write!(f, "{entity}/type:{type_id}/{side}")
            }
        }
    }
}

/// What occupies a place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Literal(MetadataId),
    Relationship { id: RelId, side: Side },
}

impl Slot {
    fn rank(&self) -> (u8, u64) {
        match self {
            Slot::Literal(id) => (0, id.0),
            Slot::Relationship { id, .. } => (1, id.0),
        }
    }
}

/// A slot and its current place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub slot: Slot,
    pub place: u32,
}

/// Total order of a domain: place, then literal before relationship, then id.
pub fn member_order(a: &Member, b: &Member) -> Ordering {
    (a.place, a.slot.rank()).cmp(&(b.place, b.slot.rank()))
}

fn origin_rank(origin: &Origin) -> (u8, u64) {
    match origin {
        Origin::Literal(id) => (0, id.0),
        Origin::Virtual(id) => (1, id.0),
    }
}

/// Merged view of one field: literal values and the virtual values that
/// compete with them for place, in domain order, followed by the virtual
/// values that keep their own numbering.
pub fn merge_field(literals: Vec<MetadataValue>, virtuals: Vec<Projected>) -> Vec<MetadataValue> {
    let (competing, own): (Vec<Projected>, Vec<Projected>) =
        virtuals.into_iter().partition(|p| p.use_for_place);
    let mut merged: Vec<MetadataValue> = literals;
    merged.extend(competing.into_iter().map(|p| p.value));
    merged.sort_by(|a, b| (a.place, origin_rank(&a.origin)).cmp(&(b.place, origin_rank(&b.origin))));
    let mut rest: Vec<MetadataValue> = own.into_iter().map(|p| p.value).collect();
    rest.sort_by(|a, b| (a.place, origin_rank(&a.origin)).cmp(&(b.place, origin_rank(&b.origin))));
    merged.extend(rest);
    merged
}

// ============================================================================
// PlaceReconciler
// ============================================================================

/// Reads and rewrites place domains through a storage backend.
pub struct PlaceReconciler<'b, B: StorageBackend> {
    backend: &'b B,
}

impl<'b, B: StorageBackend> PlaceReconciler<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Members of a domain in order.
    pub async fn members(&self, tx: &B::Tx, domain: &PlaceDomain) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        match domain {
            PlaceDomain::Field { entity, field } => {
                for value in self.backend.list_metadata(tx, *entity, field).await? {
                    if let Some(id) = value.literal_id() {
                        members.push(Member { slot: Slot::Literal(id), place: value.place });
                    }
                }
                let mut types: HashMap<RelationshipTypeId, RelationshipType> = HashMap::new();
                for rel in self.backend.relationships_of(tx, *entity, None, None).await? {
                    let rel_type = self.cached_type(tx, &mut types, rel.type_id).await?;
                    for side in rel.sides_of(*entity) {
                        if rel_type.place_field(side) == Some(field) {
                            members.push(Member {
                                slot: Slot::Relationship { id: rel.id, side },
                                place: rel.place(side),
                            });
                        }
                    }
                }
            }
            PlaceDomain::RelationshipSide { entity, type_id, side } => {
                for rel in self.backend.relationships_of(tx, *entity, Some(*type_id), Some(*side)).await? {
                    members.push(Member {
                        slot: Slot::Relationship { id: rel.id, side: *side },
                        place: rel.place(*side),
                    });
                }
            }
        }
        members.sort_by(member_order);
        Ok(members)
    }

    /// Place for a new element appended at the end of the domain:
    /// the highest current place plus one.
    pub async fn next_place(&self, tx: &B::Tx, domain: &PlaceDomain) -> Result<u32> {
        let members = self.members(tx, domain).await?;
        Ok(members.last().map_or(0, |m| m.place + 1))
    }

    /// Make room at `at` by shifting every member at or after it up by one.
    /// Returns the place actually opened (`at` clamped to the domain length).
    pub async fn open_gap(&self, tx: &mut B::Tx, domain: &PlaceDomain, at: u32) -> Result<u32> {
        let members = self.members(tx, domain).await?;
        let at = at.min(members.len() as u32);
        match domain {
            PlaceDomain::Field { entity, field } => {
                self.backend.shift_metadata_from(tx, *entity, field, at, 1).await?;
                for m in members.iter().filter(|m| m.place >= at) {
                    if let Slot::Relationship { id, side } = m.slot {
                        self.backend.set_relationship_place(tx, id, side, m.place + 1).await?;
                    }
                }
            }
            PlaceDomain::RelationshipSide { entity, type_id, side } => {
                self.backend.shift_relationships_from(tx, *entity, *type_id, *side, at, 1).await?;
            }
        }
        tracing::debug!(domain = %domain, place = at, "opened gap");
        Ok(at)
    }

    /// Renumber the domain to `0..n-1`, keeping member order.
    pub async fn compact(&self, tx: &mut B::Tx, domain: &PlaceDomain) -> Result<()> {
        let members = self.members(tx, domain).await?;
        let mut changed = 0usize;
        for (i, m) in members.iter().enumerate() {
            let place = i as u32;
            if m.place != place {
                self.write_place(tx, m.slot, place).await?;
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(domain = %domain, changed, "compacted");
        }
        Ok(())
    }

    /// Move the member at `from` to `to`, shifting the members in between.
    pub async fn move_member(&self, tx: &mut B::Tx, domain: &PlaceDomain, from: u32, to: u32) -> Result<Slot> {
        let mut members = self.members(tx, domain).await?;
        let len = members.len() as u32;
        if from == to {
            return Err(Error::InvalidInput(format!("move from {from} to itself in {domain}")));
        }
        if from >= len || to >= len {
            return Err(Error::InvalidInput(format!(
                "move {from} -> {to} out of range 0..{len} in {domain}"
            )));
        }
        let moved = members.remove(from as usize);
        members.insert(to as usize, moved);
        for (i, m) in members.iter().enumerate() {
            let place = i as u32;
            if m.place != place {
                self.write_place(tx, m.slot, place).await?;
            }
        }
        tracing::debug!(domain = %domain, from, to, "moved member");
        Ok(moved.slot)
    }

    /// True when the domain's places are exactly `0..n-1`.
    pub async fn is_dense(&self, tx: &B::Tx, domain: &PlaceDomain) -> Result<bool> {
        let members = self.members(tx, domain).await?;
        Ok(members.iter().enumerate().all(|(i, m)| m.place == i as u32))
    }

    async fn write_place(&self, tx: &mut B::Tx, slot: Slot, place: u32) -> Result<()> {
        match slot {
            Slot::Literal(id) => self.backend.set_metadata_place(tx, id, place).await,
            Slot::Relationship { id, side } => self.backend.set_relationship_place(tx, id, side, place).await,
        }
    }

    async fn cached_type<'c>(
        &self,
        tx: &B::Tx,
        cache: &'c mut HashMap<RelationshipTypeId, RelationshipType>,
        id: RelationshipTypeId,
    ) -> Result<&'c RelationshipType> {
        if !cache.contains_key(&id) {
            let rel_type = self
                .backend
                .get_relationship_type(tx, id)
                .await?
                .ok_or_else(|| Error::StorageError(format!("relationship references unknown type {id}")))?;
            cache.insert(id, rel_type);
        }
        cache
            .get(&id)
            .ok_or_else(|| Error::StorageError(format!("type cache miss for {id}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
