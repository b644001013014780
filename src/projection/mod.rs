//! # Virtual Metadata Projection
//!
//! Materialises read-only metadata on an entity from its relationships.
//! Values are derived live from the other entity's current literal metadata
//! on every read; nothing is cached, so edits to a person's name show up on
//! every publication that projects it without any invalidation step.

use hashbrown::HashMap;

use crate::model::*;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// A projected value and whether it competes with literals for place.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub value: MetadataValue,
    pub use_for_place: bool,
}

/// Builds virtual values for relationships.
pub struct VirtualMetadataProjector<'b, B: StorageBackend> {
    backend: &'b B,
}

impl<'b, B: StorageBackend> VirtualMetadataProjector<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Virtual values `rel` contributes to the entity at `side`, one per
    /// projection configured for that side. Each takes the relationship's
    /// place on `side`.
    pub async fn project(
        &self,
        tx: &B::Tx,
        rel: &Relationship,
        rel_type: &RelationshipType,
        side: Side,
    ) -> Result<Vec<Projected>> {
        let target = rel.entity(side);
        let source = rel.entity(side.opposite());
        let place_field = rel_type.place_field(side);
        let mut out = Vec::with_capacity(rel_type.projections(side).len());
        for projection in rel_type.projections(side) {
            let value = self.derive(tx, rel, side, source, projection).await?;
            out.push(Projected {
                value: MetadataValue {
                    entity: target,
                    field: projection.field.clone(),
                    value,
                    language: None,
                    place: rel.place(side),
                    origin: Origin::Virtual(rel.id),
                },
                use_for_place: place_field == Some(&projection.field),
            });
        }
        Ok(out)
    }

    /// Every virtual value of `entity`, optionally limited to one field,
    /// ordered by field, place and relationship id.
    pub async fn virtual_metadata(
        &self,
        tx: &B::Tx,
        entity: EntityId,
        field: Option<&FieldKey>,
    ) -> Result<Vec<Projected>> {
        let mut types: HashMap<RelationshipTypeId, RelationshipType> = HashMap::new();
        let mut out = Vec::new();
        for rel in self.backend.relationships_of(tx, entity, None, None).await? {
            if !types.contains_key(&rel.type_id) {
                let rel_type = self
                    .backend
                    .get_relationship_type(tx, rel.type_id)
                    .await?
                    .ok_or_else(|| Error::StorageError(format!(
                        "relationship {} references unknown type {}", rel.id, rel.type_id
                    )))?;
                types.insert(rel.type_id, rel_type);
            }
            let Some(rel_type) = types.get(&rel.type_id) else { continue };
            for side in rel.sides_of(entity) {
                let projected = self.project(tx, &rel, rel_type, side).await?;
                out.extend(projected.into_iter().filter(|p| field.is_none_or(|f| &p.value.field == f)));
            }
        }
        out.sort_by(|a, b| {
            (&a.value.field, a.value.place, a.value.relationship())
                .cmp(&(&b.value.field, b.value.place, b.value.relationship()))
        });
        Ok(out)
    }

    async fn derive(
        &self,
        tx: &B::Tx,
        rel: &Relationship,
        side: Side,
        source: EntityId,
        projection: &Projection,
    ) -> Result<String> {
        if projection.use_relationship_value {
            if let Some(custom) = rel.custom_value_for(side) {
                return Ok(custom.to_string());
            }
        }
        match &projection.rule {
            ProjectionRule::RelatedEntityId => Ok(source.to_string()),
            ProjectionRule::Concatenate { fields, separator } => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    // Literal values only: projecting virtual values would
                    // follow relationship chains and can cycle.
                    let values = self.backend.list_metadata(tx, source, field).await?;
                    if let Some(first) = values.into_iter().next() {
                        parts.push(first.value);
                    }
                }
                if parts.is_empty() {
                    tracing::debug!(
                        relationship = %rel.id,
                        field = %projection.field,
                        "no source values, projecting related entity id"
                    );
                    Ok(source.to_string())
                } else {
                    Ok(parts.join(separator))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tx::TxMode;

    fn author_def() -> RelationshipTypeDef {
        RelationshipTypeDef::new("Publication", "Person", "isAuthorOfPublication", "isPublicationOfAuthor")
            .project(
                Side::Left,
                Projection::concatenate(
                    FieldKey::of("dc.contributor.author"),
                    vec![FieldKey::of("person.familyName"), FieldKey::of("person.givenName")],
                    ", ",
                )
                .for_place()
                .with_relationship_value(),
            )
            .project(Side::Left, Projection::related_id(FieldKey::of("relation.isAuthorOfPublication")))
            .project(
                Side::Right,
                Projection::concatenate(
                    FieldKey::of("relation.isPublicationOfAuthor.title"),
                    vec![FieldKey::of("dc.title")],
                    "",
                ),
            )
    }

    #[tokio::test]
    async fn test_concatenates_other_entity_metadata() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let t = db.create_relationship_type(&mut tx, author_def()).await.unwrap();
        let publication = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let person = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        db.insert_metadata(&mut tx, person, &FieldKey::of("person.familyName"), "Smith".into(), 0).await.unwrap();
        db.insert_metadata(&mut tx, person, &FieldKey::of("person.givenName"), "Donald".into(), 0).await.unwrap();
        db.insert_metadata(&mut tx, publication, &FieldKey::of("dc.title"), "Paper".into(), 0).await.unwrap();
        let rel_id = db.insert_relationship(&mut tx, t, publication, person, 4, 2, None, None).await.unwrap();

        let projector = VirtualMetadataProjector::new(&db);
        let on_publication = projector.virtual_metadata(&tx, publication, None).await.unwrap();
        let values: Vec<(String, String, u32)> = on_publication
            .iter()
            .map(|p| (p.value.field.to_string(), p.value.value.clone(), p.value.place))
            .collect();
        assert_eq!(values, vec![
            ("dc.contributor.author".to_string(), "Smith, Donald".to_string(), 4),
            ("relation.isAuthorOfPublication".to_string(), person.to_string(), 4),
        ]);
        assert!(on_publication[0].use_for_place);
        assert_eq!(on_publication[0].value.origin, Origin::Virtual(rel_id));

        let on_person = projector
            .virtual_metadata(&tx, person, Some(&FieldKey::of("relation.isPublicationOfAuthor.title")))
            .await
            .unwrap();
        assert_eq!(on_person.len(), 1);
        assert_eq!(on_person[0].value.value, "Paper");
        assert_eq!(on_person[0].value.place, 2);
    }

    #[tokio::test]
    async fn test_relationship_value_overrides_projection() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let t = db.create_relationship_type(&mut tx, author_def()).await.unwrap();
        let publication = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let person = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        db.insert_metadata(&mut tx, person, &FieldKey::of("person.familyName"), "Smith".into(), 0).await.unwrap();
        db.insert_relationship(
            &mut tx, t, publication, person, 0, 0,
            Some("leftward label".into()), Some("Smith, D.".into()),
        ).await.unwrap();

        let projector = VirtualMetadataProjector::new(&db);
        let authors = projector
            .virtual_metadata(&tx, publication, Some(&FieldKey::of("dc.contributor.author")))
            .await
            .unwrap();
        assert_eq!(authors[0].value.value, "Smith, D.");
    }

    #[tokio::test]
    async fn test_missing_sources_fall_back_to_entity_id() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let t = db.create_relationship_type(&mut tx, author_def()).await.unwrap();
        let publication = db.create_entity(&mut tx, &EntityType::from("Publication")).await.unwrap();
        let person = db.create_entity(&mut tx, &EntityType::from("Person")).await.unwrap();
        db.insert_relationship(&mut tx, t, publication, person, 0, 0, None, None).await.unwrap();

        let projector = VirtualMetadataProjector::new(&db);
        let authors = projector
            .virtual_metadata(&tx, publication, Some(&FieldKey::of("dc.contributor.author")))
            .await
            .unwrap();
        assert_eq!(authors[0].value.value, person.to_string());
    }
}
