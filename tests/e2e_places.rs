//! End-to-end tests for place ordering of literal and virtual metadata.
//!
//! Each test drives the public `Repository` API against `MemoryBackend` and
//! checks the merged field view plus the stored relationship places.

use pretty_assertions::assert_eq;
use relmeta::{
    Caller, DetachOptions, EntityId, Error, FieldKey, MemoryBackend, NewRelationship, Projection,
    RelationshipTypeDef, RelationshipTypeId, Repository, Side,
};

// ============================================================================
// Helper: publication/person/project schema
// ============================================================================

struct Fixture {
    repo: Repository<MemoryBackend>,
    system: Caller,
    is_author: RelationshipTypeId,
    is_project: RelationshipTypeId,
}

fn author() -> FieldKey {
    FieldKey::of("dc.contributor.author")
}

async fn setup() -> Fixture {
    let repo = Repository::open_memory();
    let is_author = repo
        .register_relationship_type(
            RelationshipTypeDef::new("Publication", "Person", "isAuthorOfPublication", "isPublicationOfAuthor")
                .project(
                    Side::Left,
                    Projection::concatenate(
                        author(),
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
                ),
        )
        .await
        .unwrap();
    let is_project = repo
        .register_relationship_type(
            RelationshipTypeDef::new("Publication", "Project", "isProjectOfPublication", "isPublicationOfProject")
                .project(Side::Left, Projection::related_id(FieldKey::of("relation.isProjectOfPublication"))),
        )
        .await
        .unwrap();
    Fixture { repo, system: Caller::system(), is_author, is_project }
}

impl Fixture {
    async fn person(&self, family: &str, given: &str) -> EntityId {
        self.repo
            .create_entity_with("Person", [
                (FieldKey::of("person.familyName"), family),
                (FieldKey::of("person.givenName"), given),
            ])
            .await
            .unwrap()
    }

    async fn publication(&self) -> EntityId {
        self.repo.create_entity_with("Publication", [(FieldKey::of("dc.title"), "Paper")]).await.unwrap()
    }

    async fn authors(&self, publication: EntityId) -> Vec<(String, u32, bool)> {
        self.repo
            .metadata(publication, &author())
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.value.clone(), v.place, v.is_virtual()))
            .collect()
    }

    async fn assert_dense(&self, entity: EntityId) {
        assert!(self.repo.non_dense_domains(entity).await.unwrap().is_empty(), "entity {entity} not dense");
    }
}

fn row(value: &str, place: u32, is_virtual: bool) -> (String, u32, bool) {
    (value.to_string(), place, is_virtual)
}

// ============================================================================
// 1. Relationship, literal, relationship interleave in attach order
// ============================================================================

#[tokio::test]
async fn test_relationship_then_literal_then_relationship() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let doe = f.person("Doe", "Jane").await;

    let r0 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "plain text").await.unwrap();
    let r2 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, doe)).await.unwrap();

    assert_eq!(r0.left_place, 0);
    assert_eq!(r2.left_place, 2);
    assert_eq!(f.authors(publication).await, vec![
        row("Smith, Donald", 0, true),
        row("plain text", 1, false),
        row("Doe, Jane", 2, true),
    ]);
    f.assert_dense(publication).await;
}

// ============================================================================
// 2. Removing a literal shifts later elements, virtual ones included
// ============================================================================

#[tokio::test]
async fn test_removing_literal_shifts_relationship_down() {
    let f = setup().await;
    let publication = f.publication().await;
    let people = [f.person("A", "a").await, f.person("B", "b").await, f.person("C", "c").await];

    f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, people[0])).await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "lit one").await.unwrap();
    f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, people[1])).await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "lit three").await.unwrap();
    let r4 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, people[2])).await.unwrap();
    assert_eq!(r4.left_place, 4);

    f.repo.remove_literal(&f.system, publication, &author(), "lit three").await.unwrap();

    assert_eq!(f.authors(publication).await, vec![
        row("A, a", 0, true),
        row("lit one", 1, false),
        row("B, b", 2, true),
        row("C, c", 3, true),
    ]);
    assert_eq!(f.repo.relationship(r4.id).await.unwrap().unwrap().left_place, 3);
    f.assert_dense(publication).await;
}

// ============================================================================
// 3. Repointing the left side keeps right places
// ============================================================================

#[tokio::test]
async fn test_repoint_left_keeps_right_places() {
    let f = setup().await;
    let pub1 = f.publication().await;
    let pub2 = f.publication().await;
    let author1 = f.person("Smith", "Donald").await;

    let r1 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, pub1, author1)).await.unwrap();
    let r2 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, pub2, author1)).await.unwrap();
    assert_eq!((r1.right_place, r2.right_place), (0, 1));

    let moved = f.repo.repoint(&f.system, r1.id, Side::Left, pub2).await.unwrap();
    assert_eq!(moved.left, pub2);
    assert_eq!(moved.right_place, 0);
    assert_eq!(moved.left_place, 1);

    let r2_after = f.repo.relationship(r2.id).await.unwrap().unwrap();
    assert_eq!((r2_after.left_place, r2_after.right_place), (0, 1));
    assert!(f.authors(pub1).await.is_empty());
    for entity in [pub1, pub2, author1] {
        f.assert_dense(entity).await;
    }
}

// ============================================================================
// 4. Non-place relationships number independently of literals
// ============================================================================

#[tokio::test]
async fn test_non_place_type_numbers_from_zero() {
    let f = setup().await;
    let publication = f.publication().await;
    f.repo
        .attach_literal(&f.system, publication, &FieldKey::of("relation.isProjectOfPublication"), "legacy")
        .await
        .unwrap();

    let mut places = Vec::new();
    for _ in 0..3 {
        let project = f.repo.create_entity("Project").await.unwrap();
        let rel = f.repo
            .attach_relationship(&f.system, NewRelationship::new(f.is_project, publication, project))
            .await
            .unwrap();
        places.push(rel.left_place);
    }
    assert_eq!(places, vec![0, 1, 2]);
    f.assert_dense(publication).await;
}

// ============================================================================
// 5. Reads are idempotent
// ============================================================================

#[tokio::test]
async fn test_reads_are_stable() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    f.repo.attach_literal(&f.system, publication, &author(), "plain").await.unwrap();
    f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();

    let first = f.repo.all_metadata(publication).await.unwrap();
    let second = f.repo.all_metadata(publication).await.unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// 6. Explicit places insert and shift
// ============================================================================

#[tokio::test]
async fn test_place_hint_inserts_before_existing() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let doe = f.person("Doe", "Jane").await;
    f.repo.attach_literal(&f.system, publication, &author(), "first").await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "second").await.unwrap();

    f.repo
        .attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith).with_left_place(1))
        .await
        .unwrap();
    f.repo
        .attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, doe).with_left_place(99))
        .await
        .unwrap();

    assert_eq!(f.authors(publication).await, vec![
        row("first", 0, false),
        row("Smith, Donald", 1, true),
        row("second", 2, false),
        row("Doe, Jane", 3, true),
    ]);
}

// ============================================================================
// 7. Detach closes the gap; copy keeps the values as literals
// ============================================================================

#[tokio::test]
async fn test_detach_shifts_following() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let r0 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "plain").await.unwrap();

    f.repo.detach_relationship(&f.system, r0.id, DetachOptions::default()).await.unwrap();
    assert_eq!(f.authors(publication).await, vec![row("plain", 0, false)]);
    assert!(f.repo.relationship(r0.id).await.unwrap().is_none());
    f.assert_dense(smith).await;
}

#[tokio::test]
async fn test_detach_with_copy_materialises_values() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    f.repo.attach_literal(&f.system, publication, &author(), "plain").await.unwrap();
    let r1 = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "last").await.unwrap();

    f.repo.detach_relationship(&f.system, r1.id, DetachOptions::copy(true, false)).await.unwrap();

    assert_eq!(f.authors(publication).await, vec![
        row("plain", 0, false),
        row("Smith, Donald", 1, false),
        row("last", 2, false),
    ]);
    let related = f.repo
        .metadata(publication, &FieldKey::of("relation.isAuthorOfPublication"))
        .await
        .unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].value, smith.to_string());
    assert!(!related[0].is_virtual());
    f.assert_dense(publication).await;
}

// ============================================================================
// 8. Moving a virtual value rewrites its relationship place
// ============================================================================

#[tokio::test]
async fn test_move_virtual_value() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    f.repo.attach_literal(&f.system, publication, &author(), "a").await.unwrap();
    f.repo.attach_literal(&f.system, publication, &author(), "b").await.unwrap();
    let rel = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();

    f.repo.move_value(&f.system, publication, &author(), 2, 0).await.unwrap();
    assert_eq!(f.authors(publication).await, vec![
        row("Smith, Donald", 0, true),
        row("a", 1, false),
        row("b", 2, false),
    ]);
    assert_eq!(f.repo.relationship(rel.id).await.unwrap().unwrap().left_place, 0);

    let err = f.repo.remove_value_at(&f.system, publication, &author(), 0).await.unwrap_err();
    assert!(matches!(err, Error::VirtualMetadata(_)));
}

// ============================================================================
// 9. Live projection and custom relationship values
// ============================================================================

#[tokio::test]
async fn test_projection_follows_source_edits() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let rel = f.repo.attach_relationship(&f.system, NewRelationship::new(f.is_author, publication, smith)).await.unwrap();

    f.repo.remove_literal(&f.system, smith, &FieldKey::of("person.givenName"), "Donald").await.unwrap();
    f.repo.attach_literal(&f.system, smith, &FieldKey::of("person.givenName"), "D.").await.unwrap();
    assert_eq!(f.authors(publication).await, vec![row("Smith, D.", 0, true)]);

    f.repo
        .set_relationship_values(&f.system, rel.id, None, Some("Smith, Donald J.".into()))
        .await
        .unwrap();
    assert_eq!(f.authors(publication).await, vec![row("Smith, Donald J.", 0, true)]);

    let titles = f.repo
        .metadata(smith, &FieldKey::of("relation.isPublicationOfAuthor.title"))
        .await
        .unwrap();
    assert_eq!(titles[0].value, "Paper");
}

// ============================================================================
// 10. Type and cardinality checks
// ============================================================================

#[tokio::test]
async fn test_rejects_wrong_entity_types() {
    let f = setup().await;
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let err = f.repo
        .attach_relationship(&f.system, NewRelationship::new(f.is_author, smith, publication))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRelationship(_)));
    assert!(f.repo.relationships_of(publication, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_max_cardinality() {
    let f = setup().await;
    let single = f.repo
        .register_relationship_type(
            RelationshipTypeDef::new("Publication", "Person", "isSupervisedBy", "isSupervisorOf")
                .with_max_cardinality(Side::Left, 1),
        )
        .await
        .unwrap();
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let doe = f.person("Doe", "Jane").await;
    f.repo.attach_relationship(&f.system, NewRelationship::new(single, publication, smith)).await.unwrap();
    let err = f.repo
        .attach_relationship(&f.system, NewRelationship::new(single, publication, doe))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRelationship(_)));
    assert_eq!(f.repo.relationships_by_type(single).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_min_cardinality() {
    let f = setup().await;
    let funded = f.repo
        .register_relationship_type(
            RelationshipTypeDef::new("Publication", "Person", "isFundedBy", "funds")
                .with_min_cardinality(Side::Left, 1),
        )
        .await
        .unwrap();
    let publication = f.publication().await;
    let smith = f.person("Smith", "Donald").await;
    let doe = f.person("Doe", "Jane").await;
    let first = f.repo.attach_relationship(&f.system, NewRelationship::new(funded, publication, smith)).await.unwrap();
    let err = f.repo
        .detach_relationship(&f.system, first.id, DetachOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRelationship(_)));
    assert_eq!(f.repo.relationships_by_type(funded).await.unwrap().len(), 1);

    f.repo.attach_relationship(&f.system, NewRelationship::new(funded, publication, doe)).await.unwrap();
    f.repo.detach_relationship(&f.system, first.id, DetachOptions::default()).await.unwrap();
    let funders: Vec<EntityId> = f.repo.relationships_by_type(funded).await.unwrap().iter().map(|r| r.right).collect();
    assert_eq!(funders, vec![doe]);
}
