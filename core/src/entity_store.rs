//! Entity & Label Store (C3): persistent mapping from address to entity
//! metadata, with an in-memory cache over the durable `storage` backend.

use dashmap::DashMap;
use protocols::{AddressKey, AddressRecord, Entity, FlowDirection, Label};
use rust_decimal::Decimal;
use storage::{RecordCollection, StorageBackend, StorageError};
use uuid::Uuid;

/// Address/entity/label persistence, cache-over-durable-store per
/// `StorageManager`'s JSON convenience layer. The cache is a pure
/// performance optimisation — every write lands in `storage` first.
pub struct EntityStore<T: StorageBackend> {
    addresses: RecordCollection<T>,
    entities: RecordCollection<T>,
    labels: RecordCollection<T>,
    address_cache: DashMap<String, AddressRecord>,
    address_entity: DashMap<String, Uuid>,
}

impl<T: StorageBackend + Clone> EntityStore<T> {
    pub fn new(backend: T) -> Self {
        EntityStore {
            addresses: RecordCollection::new(backend.clone(), "address:"),
            entities: RecordCollection::new(backend.clone(), "entity:"),
            labels: RecordCollection::new(backend, "label:"),
            address_cache: DashMap::new(),
            address_entity: DashMap::new(),
        }
    }

    fn address_cache_key(key: &AddressKey) -> String {
        key.to_string()
    }

    pub async fn get_address(&self, key: &AddressKey) -> Result<Option<AddressRecord>, StorageError> {
        let cache_key = Self::address_cache_key(key);
        if let Some(record) = self.address_cache.get(&cache_key) {
            return Ok(Some(record.clone()));
        }
        let id = address_uuid(key);
        let record: Option<AddressRecord> = self.addresses.get(&id).await?;
        if let Some(ref r) = record {
            self.address_cache.insert(cache_key, r.clone());
        }
        Ok(record)
    }

    /// Fold a sighting into an address's aggregate, creating it if absent.
    pub async fn observe_address(
        &self,
        key: &AddressKey,
        at: chrono::DateTime<chrono::Utc>,
        direction: FlowDirection,
        asset: &str,
        amount: Decimal,
    ) -> Result<AddressRecord, StorageError> {
        let mut record = self
            .get_address(key)
            .await?
            .unwrap_or_else(|| AddressRecord::new(key.clone(), at));
        record.observe(at, direction, asset, amount);

        let id = address_uuid(key);
        self.addresses.put(&id, &record).await?;
        self.address_cache.insert(Self::address_cache_key(key), record.clone());
        Ok(record)
    }

    pub async fn set_risk_score(&self, key: &AddressKey, score: f64) -> Result<(), StorageError> {
        if let Some(mut record) = self.get_address(key).await? {
            record.risk_score = score;
            let id = address_uuid(key);
            self.addresses.put(&id, &record).await?;
            self.address_cache.insert(Self::address_cache_key(key), record);
        }
        Ok(())
    }

    pub async fn attach_label(&self, target: &AddressKey, label: Label) -> Result<(), StorageError> {
        self.labels.put(&label.id, &label).await?;
        if let Some(mut record) = self.get_address(target).await? {
            if !record.labels.contains(&label.kind) {
                record.labels.push(label.kind.clone());
            }
            let id = address_uuid(target);
            self.addresses.put(&id, &record).await?;
            self.address_cache.insert(Self::address_cache_key(target), record);
        }
        Ok(())
    }

    pub async fn labels_for(&self, kind: &str) -> Result<Vec<Label>, StorageError> {
        let ids = self.labels.list_ids().await?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(label) = self.labels.get::<Label>(&id).await? {
                if label.kind == kind {
                    out.push(label);
                }
            }
        }
        Ok(out)
    }

    pub async fn put_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        self.entities.put(&entity.id, entity).await?;
        for member in &entity.member_addresses {
            self.address_entity.insert(member.to_string(), entity.id);
        }
        Ok(())
    }

    pub async fn get_entity(&self, id: &Uuid) -> Result<Option<Entity>, StorageError> {
        self.entities.get(id).await
    }

    pub fn entity_for_address(&self, key: &AddressKey) -> Option<Uuid> {
        self.address_entity.get(&key.to_string()).map(|id| *id)
    }
}

fn address_uuid(key: &AddressKey) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storage::MemoryStorage;

    #[tokio::test]
    async fn test_observe_address_creates_and_accumulates() {
        let store = EntityStore::new(MemoryStorage::new());
        let key = AddressKey::new("btc", "addr1");

        store
            .observe_address(&key, Utc::now(), FlowDirection::In, "BTC", Decimal::from(5))
            .await
            .unwrap();
        let record = store
            .observe_address(&key, Utc::now(), FlowDirection::In, "BTC", Decimal::from(3))
            .await
            .unwrap();

        assert_eq!(record.in_count, 2);
        assert_eq!(record.in_volume["BTC"], Decimal::from(8));
    }

    #[tokio::test]
    async fn test_attach_label_updates_cached_address() {
        let store = EntityStore::new(MemoryStorage::new());
        let key = AddressKey::new("btc", "addr1");
        store
            .observe_address(&key, Utc::now(), FlowDirection::In, "BTC", Decimal::from(1))
            .await
            .unwrap();

        let label = Label {
            id: Uuid::new_v4(),
            kind: "sanctions_list".to_string(),
            source: protocols::LabelSource::SanctionsList { list_id: "ofac".to_string() },
            fetched_at: Utc::now(),
            provenance_hash: "abc".to_string(),
        };
        store.attach_label(&key, label).await.unwrap();

        let record = store.get_address(&key).await.unwrap().unwrap();
        assert!(record.labels.contains(&"sanctions_list".to_string()));
    }
}
