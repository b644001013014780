//! # Repository Model
//!
//! Clean DTOs for entities, metadata and relationships.
//! These types cross every boundary: storage ↔ reconciler ↔ projector ↔ user.
//!
//! Design rule: this module is pure data. No I/O, no state, no async.

pub mod entity;
pub mod field;
pub mod metadata;
pub mod relationship;
pub mod relationship_type;

pub use entity::{Entity, EntityId, EntityType};
pub use field::FieldKey;
pub use metadata::{MetadataId, MetadataValue, NewValue, Origin};
pub use relationship::{NewRelationship, RelId, Relationship, Side};
pub use relationship_type::{
    Projection, ProjectionRule, RelationshipType, RelationshipTypeDef, RelationshipTypeId,
};
