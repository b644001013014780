//! Literal value operations: attach, insert, remove and move.

use crate::auth::Caller;
use crate::model::*;
use crate::place::{PlaceDomain, PlaceReconciler, Slot};
use crate::storage::StorageBackend;
use crate::tx::TxMode;
use crate::{Error, Result};

use super::{validate_value, Repository};

impl<B: StorageBackend> Repository<B> {
    /// Append a literal value after every existing element of the field,
    /// virtual values included. Existing places are not touched.
    pub async fn attach_literal(
        &self,
        caller: &Caller,
        entity: EntityId,
        field: &FieldKey,
        value: impl Into<NewValue>,
    ) -> Result<MetadataId> {
        let value = value.into();
        validate_value(&value)?;
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.require_write(caller, entity, "add metadata")?;
            let domain = PlaceDomain::Field { entity, field: field.clone() };
            let place = PlaceReconciler::new(&self.backend).next_place(&tx, &domain).await?;
            let id = self.backend.insert_metadata(&mut tx, entity, field, value, place).await?;
            tracing::debug!(entity = %entity, field = %field, place, "attached literal");
            Ok::<_, Error>(id)
        }
        .await;
        let id = self.finish(tx, outcome).await?;
        self.reindex(&[entity]).await;
        Ok(id)
    }

    /// Insert a literal value at `place`, shifting the element there and
    /// everything after it. A place past the end appends.
    pub async fn insert_literal_at(
        &self,
        caller: &Caller,
        entity: EntityId,
        field: &FieldKey,
        value: impl Into<NewValue>,
        place: u32,
    ) -> Result<MetadataId> {
        let value = value.into();
        validate_value(&value)?;
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.require_write(caller, entity, "add metadata")?;
            let domain = PlaceDomain::Field { entity, field: field.clone() };
            let place = PlaceReconciler::new(&self.backend).open_gap(&mut tx, &domain, place).await?;
            let id = self.backend.insert_metadata(&mut tx, entity, field, value, place).await?;
            tracing::debug!(entity = %entity, field = %field, place, "inserted literal");
            Ok::<_, Error>(id)
        }
        .await;
        let id = self.finish(tx, outcome).await?;
        self.reindex(&[entity]).await;
        Ok(id)
    }

    /// Remove the first literal of the field equal to `value` and close the
    /// gap it leaves.
    pub async fn remove_literal(
        &self,
        caller: &Caller,
        entity: EntityId,
        field: &FieldKey,
        value: &str,
    ) -> Result<MetadataValue> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.require_write(caller, entity, "remove metadata")?;
            let target = self
                .backend
                .list_metadata(&tx, entity, field)
                .await?
                .into_iter()
                .find(|v| v.value == value)
                .and_then(|v| v.literal_id())
                .ok_or_else(|| Error::NotFound(format!("value {value:?} in {entity}/{field}")))?;
            self.remove_and_compact(&mut tx, entity, field, target).await
        }
        .await;
        let removed = self.finish(tx, outcome).await?;
        self.reindex(&[entity]).await;
        Ok(removed)
    }

    /// Remove the literal at `place` of the field. Virtual values cannot be
    /// removed this way; detach their relationship instead.
    pub async fn remove_value_at(
        &self,
        caller: &Caller,
        entity: EntityId,
        field: &FieldKey,
        place: u32,
    ) -> Result<MetadataValue> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.require_write(caller, entity, "remove metadata")?;
            let domain = PlaceDomain::Field { entity, field: field.clone() };
            let members = PlaceReconciler::new(&self.backend).members(&tx, &domain).await?;
            let member = members.iter().find(|m| m.place == place).ok_or_else(|| {
                Error::InvalidInput(format!("no value at place {place} of {domain} (len {})", members.len()))
            })?;
            match member.slot {
                Slot::Literal(id) => self.remove_and_compact(&mut tx, entity, field, id).await,
                Slot::Relationship { id, .. } => Err(Error::VirtualMetadata(format!(
                    "place {place} of {domain} is projected from relationship {id}"
                ))),
            }
        }
        .await;
        let removed = self.finish(tx, outcome).await?;
        self.reindex(&[entity]).await;
        Ok(removed)
    }

    /// Move the element at `from` to `to` within the field's place order.
    /// A virtual element's new place is written to its relationship.
    pub async fn move_value(
        &self,
        caller: &Caller,
        entity: EntityId,
        field: &FieldKey,
        from: u32,
        to: u32,
    ) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = async {
            self.require_entity(&tx, entity).await?;
            self.require_write(caller, entity, "move metadata")?;
            let domain = PlaceDomain::Field { entity, field: field.clone() };
            let slot = PlaceReconciler::new(&self.backend).move_member(&mut tx, &domain, from, to).await?;
            tracing::info!(entity = %entity, field = %field, from, to, slot = ?slot, "moved value");
            Ok::<_, Error>(())
        }
        .await;
        self.finish(tx, outcome).await?;
        self.reindex(&[entity]).await;
        Ok(())
    }

    async fn remove_and_compact(
        &self,
        tx: &mut B::Tx,
        entity: EntityId,
        field: &FieldKey,
        id: MetadataId,
    ) -> Result<MetadataValue> {
        let removed = self
            .backend
            .remove_metadata(tx, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Metadata value {id}")))?;
        let domain = PlaceDomain::Field { entity, field: field.clone() };
        PlaceReconciler::new(&self.backend).compact(tx, &domain).await?;
        tracing::debug!(entity = %entity, field = %field, place = removed.place, "removed literal");
        Ok(removed)
    }
}
