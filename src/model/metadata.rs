//! Metadata values, literal and virtual.

use serde::{Deserialize, Serialize};

use super::{EntityId, FieldKey, RelId};

/// Opaque identifier of a stored literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetadataId(pub u64);

impl std::fmt::Display for MetadataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum Origin {
    /// Authored directly; stored as a row.
    Literal(MetadataId),
    /// Derived from a relationship; never stored, never edited directly.
    Virtual(RelId),
}

/// One value of a metadata field on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub entity: EntityId,
    pub field: FieldKey,
    pub value: String,
    pub language: Option<String>,
    pub place: u32,
    pub origin: Origin,
}

impl MetadataValue {
    pub fn is_virtual(&self) -> bool {
        matches!(self.origin, Origin::Virtual(_))
    }

    pub fn literal_id(&self) -> Option<MetadataId> {
        match self.origin {
            Origin::Literal(id) => Some(id),
            Origin::Virtual(_) => None,
        }
    }

    pub fn relationship(&self) -> Option<RelId> {
        match self.origin {
            Origin::Virtual(id) => Some(id),
            Origin::Literal(_) => None,
        }
    }
}

/// A literal value about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValue {
    pub value: String,
    pub language: Option<String>,
}

impl NewValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), language: None }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl From<&str> for NewValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NewValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
