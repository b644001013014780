//! # relmeta — Relationship-Ordered Virtual Metadata
//!
//! Entities carry ordered metadata fields. Typed relationships between
//! entities project read-only *virtual* values onto each other, and those
//! values can compete with plain literal values for position in a field.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the repository and storage
//! 2. **Dense places**: every place domain is numbered `0..n-1` after every operation
//! 3. **Live projection**: virtual values are derived on read, never cached
//! 4. **Explicit authorization**: every write takes a `Caller` with its `PermissionOracle`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relmeta::{Caller, FieldKey, NewRelationship, Projection, RelationshipTypeDef, Repository, Side};
//!
//! # async fn example() -> relmeta::Result<()> {
//! let repo = Repository::open_memory();
//! let system = Caller::system();
//!
//! let author = FieldKey::of("dc.contributor.author");
//! let is_author = repo.register_relationship_type(
//!     RelationshipTypeDef::new("Publication", "Person", "isAuthorOfPublication", "isPublicationOfAuthor")
//!         .project(Side::Left, Projection::concatenate(
//!             author.clone(),
//!             vec![FieldKey::of("person.familyName"), FieldKey::of("person.givenName")],
//!             ", ",
//!         ).for_place()),
//! ).await?;
//!
//! let publication = repo.create_entity("Publication").await?;
//! let person = repo.create_entity_with("Person", [
//!     (FieldKey::of("person.familyName"), "Smith"),
//!     (FieldKey::of("person.givenName"), "Donald"),
//! ]).await?;
//!
//! repo.attach_relationship(&system, NewRelationship::new(is_author, publication, person)).await?;
//! repo.attach_literal(&system, publication, &author, "plain text").await?;
//!
//! for value in repo.metadata(publication, &author).await? {
//!     println!("{} @ {}", value.value, value.place); // "Smith, Donald @ 0", "plain text @ 1"
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | (default) | In-memory store for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod storage;
pub mod tx;
pub mod place;
pub mod projection;
pub mod auth;
pub mod config;
pub mod index;
pub mod repository;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Entity, EntityId, EntityType, FieldKey, MetadataId, MetadataValue, NewValue, Origin,
    NewRelationship, Projection, ProjectionRule, RelId, Relationship, RelationshipType,
    RelationshipTypeDef, RelationshipTypeId, Side,
};

// ============================================================================
// Re-exports: Storage & Transactions
// ============================================================================

pub use storage::{MemoryBackend, StorageBackend};
pub use tx::{Transaction, TxId, TxMode};

// ============================================================================
// Re-exports: Repository
// ============================================================================

pub use auth::{AccessList, Caller, PermissionOracle, RepointPolicy, Unrestricted, UserId};
pub use config::RepositoryConfig;
pub use index::{IndexDocument, IndexSink, MemoryIndex};
pub use place::{PlaceDomain, PlaceReconciler};
pub use projection::VirtualMetadataProjector;
pub use repository::{DetachOptions, Repository};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Relationship type does not accept the entity pair, or a side is full.
    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An id in a request body that does not resolve.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Attempt to edit a value projected from a relationship.
    #[error("Virtual metadata is read-only: {0}")]
    VirtualMetadata(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a caller should treat an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Forbidden,
    Unprocessable,
    Internal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::Forbidden(_) => ErrorClass::Forbidden,
            Error::InvalidRelationship(_)
            | Error::InvalidReference(_)
            | Error::InvalidInput(_)
            | Error::VirtualMetadata(_) => ErrorClass::Unprocessable,
            Error::StorageError(_) | Error::TxError(_) | Error::Io(_) | Error::Json(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::NotFound("x".into()).class(), ErrorClass::NotFound);
        assert_eq!(Error::InvalidReference("x".into()).class(), ErrorClass::Unprocessable);
        assert_eq!(Error::VirtualMetadata("x".into()).class(), ErrorClass::Unprocessable);
        assert_eq!(Error::Forbidden("x".into()).class(), ErrorClass::Forbidden);
        assert_eq!(Error::TxError("x".into()).class(), ErrorClass::Internal);
    }
}
