//! Relationship types and their virtual-metadata projections.

use serde::{Deserialize, Serialize};

use super::{EntityType, FieldKey, Side};

/// Opaque relationship type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipTypeId(pub u64);

impl std::fmt::Display for RelationshipTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a projected value is derived from the other entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectionRule {
    /// First value of each source field, joined by `separator`.
    /// Missing fields are skipped.
    Concatenate { fields: Vec<FieldKey>, separator: String },
    /// The other entity's identifier (e.g. `relation.isAuthorOfPublication`).
    RelatedEntityId,
}

/// One virtual field materialised on the entity at a relationship side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub field: FieldKey,
    pub rule: ProjectionRule,
    /// Relationships compete with literal values of `field` for place.
    #[serde(default)]
    pub use_for_place: bool,
    /// Prefer the relationship's custom value when one is set.
    #[serde(default)]
    pub use_relationship_value: bool,
}

impl Projection {
    pub fn concatenate(field: FieldKey, fields: Vec<FieldKey>, separator: impl Into<String>) -> Self {
        Self {
            field,
            rule: ProjectionRule::Concatenate { fields, separator: separator.into() },
            use_for_place: false,
            use_relationship_value: false,
        }
    }

    pub fn related_id(field: FieldKey) -> Self {
        Self {
            field,
            rule: ProjectionRule::RelatedEntityId,
            use_for_place: false,
            use_relationship_value: false,
        }
    }

    pub fn for_place(mut self) -> Self {
        self.use_for_place = true;
        self
    }

    pub fn with_relationship_value(mut self) -> Self {
        self.use_relationship_value = true;
        self
    }
}

/// Configuration of a relationship type.
///
/// `left_projections` are shown on the LEFT entity and derived from the
/// RIGHT one (keyed by `leftward_label`), and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub id: RelationshipTypeId,
    #[serde(flatten)]
    pub def: RelationshipTypeDef,
}

/// Everything about a relationship type except its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    pub left_type: EntityType,
    pub right_type: EntityType,
    pub leftward_label: String,
    pub rightward_label: String,
    #[serde(default)]
    pub left_min_cardinality: Option<u32>,
    #[serde(default)]
    pub right_min_cardinality: Option<u32>,
    #[serde(default)]
    pub left_max_cardinality: Option<u32>,
    #[serde(default)]
    pub right_max_cardinality: Option<u32>,
    #[serde(default)]
    pub copy_to_left: bool,
    #[serde(default)]
    pub copy_to_right: bool,
    #[serde(default)]
    pub left_projections: Vec<Projection>,
    #[serde(default)]
    pub right_projections: Vec<Projection>,
}

impl RelationshipTypeDef {
    pub fn new(
        left_type: impl Into<EntityType>,
        right_type: impl Into<EntityType>,
        leftward_label: impl Into<String>,
        rightward_label: impl Into<String>,
    ) -> Self {
        Self {
            left_type: left_type.into(),
            right_type: right_type.into(),
            leftward_label: leftward_label.into(),
            rightward_label: rightward_label.into(),
            left_min_cardinality: None,
            right_min_cardinality: None,
            left_max_cardinality: None,
            right_max_cardinality: None,
            copy_to_left: false,
            copy_to_right: false,
            left_projections: Vec::new(),
            right_projections: Vec::new(),
        }
    }

    pub fn project(mut self, side: Side, projection: Projection) -> Self {
        match side {
            Side::Left => self.left_projections.push(projection),
            Side::Right => self.right_projections.push(projection),
        }
        self
    }

    /// Deletes may not take an entity's count on `side` below `min`.
    pub fn with_min_cardinality(mut self, side: Side, min: u32) -> Self {
        match side {
            Side::Left => self.left_min_cardinality = Some(min),
            Side::Right => self.right_min_cardinality = Some(min),
        }
        self
    }

    pub fn with_max_cardinality(mut self, side: Side, max: u32) -> Self {
        match side {
            Side::Left => self.left_max_cardinality = Some(max),
            Side::Right => self.right_max_cardinality = Some(max),
        }
        self
    }

    pub fn with_copy(mut self, to_left: bool, to_right: bool) -> Self {
        self.copy_to_left = to_left;
        self.copy_to_right = to_right;
        self
    }
}

impl RelationshipType {
    pub fn entity_type(&self, side: Side) -> &EntityType {
        match side {
            Side::Left => &self.def.left_type,
            Side::Right => &self.def.right_type,
        }
    }

    pub fn label(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.def.leftward_label,
            Side::Right => &self.def.rightward_label,
        }
    }

    pub fn min_cardinality(&self, side: Side) -> Option<u32> {
        match side {
            Side::Left => self.def.left_min_cardinality,
            Side::Right => self.def.right_min_cardinality,
        }
    }

    pub fn max_cardinality(&self, side: Side) -> Option<u32> {
        match side {
            Side::Left => self.def.left_max_cardinality,
            Side::Right => self.def.right_max_cardinality,
        }
    }

    pub fn copy_to(&self, side: Side) -> bool {
        match side {
            Side::Left => self.def.copy_to_left,
            Side::Right => self.def.copy_to_right,
        }
    }

    pub fn projections(&self, side: Side) -> &[Projection] {
        match side {
            Side::Left => &self.def.left_projections,
            Side::Right => &self.def.right_projections,
        }
    }

    /// The field this side's relationships compete for place on, if any.
    pub fn place_field(&self, side: Side) -> Option<&FieldKey> {
        self.projections(side)
            .iter()
            .find(|p| p.use_for_place)
            .map(|p| &p.field)
    }

    pub fn use_for_place(&self, side: Side) -> bool {
        self.place_field(side).is_some()
    }
}
