//! Relationship (typed edge) between two entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityId, RelationshipTypeId};

/// Opaque relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// End of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// A directed typed edge. `left_place` orders it among the left entity's
/// relationships, `right_place` among the right entity's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub type_id: RelationshipTypeId,
    pub left: EntityId,
    pub right: EntityId,
    pub left_place: u32,
    pub right_place: u32,
    /// Custom label for the leftward direction, shown on the right entity.
    pub leftward_value: Option<String>,
    /// Custom label for the rightward direction, shown on the left entity.
    pub rightward_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn entity(&self, side: Side) -> EntityId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn place(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left_place,
            Side::Right => self.right_place,
        }
    }

    pub fn set_place(&mut self, side: Side, place: u32) {
        match side {
            Side::Left => self.left_place = place,
            Side::Right => self.right_place = place,
        }
    }

    pub fn set_entity(&mut self, side: Side, entity: EntityId) {
        match side {
            Side::Left => self.left = entity,
            Side::Right => self.right = entity,
        }
    }

    /// Custom value to display on the entity at `side`, if any.
    pub fn custom_value_for(&self, side: Side) -> Option<&str> {
        match side {
            Side::Left => self.rightward_value.as_deref(),
            Side::Right => self.leftward_value.as_deref(),
        }
    }

    /// Sides on which `entity` participates (both for a self-relationship).
    pub fn sides_of(&self, entity: EntityId) -> impl Iterator<Item = Side> + '_ {
        Side::BOTH.into_iter().filter(move |s| self.entity(*s) == entity)
    }

    /// The "other" end of the relationship from the given entity.
    pub fn other_entity(&self, from: EntityId) -> Option<EntityId> {
        if from == self.left { Some(self.right) }
        else if from == self.right { Some(self.left) }
        else { None }
    }
}

/// Request to create a relationship.
///
/// `None` places append at the end of the side's place domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelationship {
    pub type_id: RelationshipTypeId,
    pub left: EntityId,
    pub right: EntityId,
    pub left_place: Option<u32>,
    pub right_place: Option<u32>,
    pub leftward_value: Option<String>,
    pub rightward_value: Option<String>,
}

impl NewRelationship {
    pub fn new(type_id: RelationshipTypeId, left: EntityId, right: EntityId) -> Self {
        Self {
            type_id,
            left,
            right,
            left_place: None,
            right_place: None,
            leftward_value: None,
            rightward_value: None,
        }
    }

    pub fn with_left_place(mut self, place: u32) -> Self {
        self.left_place = Some(place);
        self
    }

    pub fn with_right_place(mut self, place: u32) -> Self {
        self.right_place = Some(place);
        self
    }

    pub fn with_leftward_value(mut self, value: impl Into<String>) -> Self {
        self.leftward_value = Some(value.into());
        self
    }

    pub fn with_rightward_value(mut self, value: impl Into<String>) -> Self {
        self.rightward_value = Some(value.into());
        self
    }

    pub fn entity(&self, side: Side) -> EntityId {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn place_hint(&self, side: Side) -> Option<u32> {
        match side {
            Side::Left => self.left_place,
            Side::Right => self.right_place,
        }
    }
}
