//! Search index notification.
//!
//! The repository hands an [`IndexDocument`] per affected entity to an
//! [`IndexSink`] after each committed write. The sink owns the index; the
//! document only carries the merged view in place order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{EntityId, EntityType, MetadataValue};
use crate::Result;

/// Indexable form of one entity: field name to values in place order,
/// literal and virtual values merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub entity: EntityId,
    pub entity_type: EntityType,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl IndexDocument {
    /// Build from merged values. `values` must already be in place order
    /// within each field.
    pub fn from_values(entity: EntityId, entity_type: EntityType, values: &[MetadataValue]) -> Self {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for v in values {
            fields.entry(v.field.to_string()).or_default().push(v.value.clone());
        }
        Self { entity, entity_type, fields }
    }

    pub fn values(&self, field: &str) -> &[String] {
        self.fields.get(field).map_or(&[], Vec::as_slice)
    }
}

/// Receiver of index documents.
pub trait IndexSink: Send + Sync {
    fn index(&self, doc: IndexDocument) -> Result<()>;
}

/// In-process index keeping the latest document per entity.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: RwLock<HashMap<EntityId, IndexDocument>>,
    writes: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityId) -> Option<IndexDocument> {
        self.docs.read().get(&entity).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Number of documents received since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl IndexSink for MemoryIndex {
    fn index(&self, doc: IndexDocument) -> Result<()> {
        self.docs.write().insert(doc.entity, doc);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
