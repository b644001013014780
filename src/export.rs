//! JSON-lines export, one record per line.
//!
//! ```text
//! {"kind":"relationship_type", ...}   every registered type
//! {"kind":"entity", ...}              then per entity, in id order:
//! {"kind":"metadata", ...}            its merged values (literal + virtual)
//! {"kind":"relationship", ...}        every relationship, in id order
//! ```
//!
//! Virtual values are exported for reading convenience; an importer only
//! needs the literal rows and the relationships to rebuild them.

use std::io::Write;

use serde::Serialize;

use crate::model::*;
use crate::repository::Repository;
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    RelationshipType(&'a RelationshipType),
    Entity(&'a Entity),
    Metadata(&'a MetadataValue),
    Relationship(&'a Relationship),
}

/// Write the whole repository as JSON lines. Returns the record count.
///
/// Everything is read from one snapshot, so relationship places always
/// agree with the virtual values in the metadata records.
pub async fn export_json_lines<B: StorageBackend>(
    repo: &Repository<B>,
    writer: &mut dyn Write,
) -> Result<usize> {
    let backend = repo.backend();
    let tx = backend.begin_tx(TxMode::ReadOnly).await?;
    let outcome = async {
        let types = backend.relationship_types(&tx).await?;
        let mut entities = Vec::new();
        for entity in backend.all_entities(&tx).await? {
            let values = repo.merged_entity(&tx, entity.id).await?;
            entities.push((entity, values));
        }
        let mut relationships = Vec::new();
        for t in &types {
            relationships.extend(backend.relationships_by_type(&tx, t.id).await?);
        }
        relationships.sort_by_key(|r| r.id);
        Ok::<_, Error>((types, entities, relationships))
    }
    .await;
    let (types, entities, relationships) = repo.finish(tx, outcome).await?;

    let mut count = 0usize;
    let mut emit = |record: Record<'_>| -> Result<()> {
        serde_json::to_writer(&mut *writer, &record)?;
        writeln!(writer)?;
        count += 1;
        Ok(())
    };
    for t in &types {
        emit(Record::RelationshipType(t))?;
    }
    for (entity, values) in &entities {
        emit(Record::Entity(entity))?;
        for value in values {
            emit(Record::Metadata(value))?;
        }
    }
    for rel in &relationships {
        emit(Record::Relationship(rel))?;
    }
    tracing::debug!(records = count, "exported repository");
    Ok(count)
}
