//! Attribution Engine (C6): union-find clustering of addresses into
//! entities, reconstructible from an append-only heuristic link log.

use chrono::Utc;
use dashmap::DashMap;
use protocols::{AddressKey, Entity, EntityType};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub a: AddressKey,
    pub b: AddressKey,
    pub reason: String,
    pub confidence: f64,
    pub recorded_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SplitRecord {
    pub entity: Uuid,
    pub reason: String,
    pub recorded_at: chrono::DateTime<Utc>,
}

/// A minimal union-find over address keys, keyed by their string form so
/// it stays chain-agnostic. Rank is tracked for near-constant-time
/// unions; path compression keeps lookups fast after many merges.
struct UnionFind {
    parent: std::collections::HashMap<String, String>,
    rank: std::collections::HashMap<String, u32>,
}

impl UnionFind {
    fn new() -> Self {
        UnionFind { parent: std::collections::HashMap::new(), rank: std::collections::HashMap::new() }
    }

    fn find(&mut self, key: &str) -> String {
        if !self.parent.contains_key(key) {
            self.parent.insert(key.to_string(), key.to_string());
            self.rank.insert(key.to_string(), 0);
            return key.to_string();
        }
        let parent = self.parent.get(key).unwrap().clone();
        if parent == key {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(key.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let rank_a = *self.rank.get(&ra).unwrap_or(&0);
        let rank_b = *self.rank.get(&rb).unwrap_or(&0);
        if rank_a < rank_b {
            self.parent.insert(ra, rb);
        } else if rank_a > rank_b {
            self.parent.insert(rb, ra.clone());
        } else {
            self.parent.insert(rb, ra.clone());
            self.rank.insert(ra, rank_a + 1);
        }
    }
}

/// Merge threshold above which two addresses linked by one or more
/// heuristics are unioned into the same component.
const MERGE_CONFIDENCE_THRESHOLD: f64 = 0.5;

pub struct AttributionEngine {
    links: Mutex<Vec<LinkRecord>>,
    splits: Mutex<Vec<SplitRecord>>,
    union_find: Mutex<UnionFind>,
    link_confidence: DashMap<(String, String), f64>,
    entities: DashMap<Uuid, Entity>,
    component_entity: DashMap<String, Uuid>,
}

impl AttributionEngine {
    pub fn new() -> Self {
        AttributionEngine {
            links: Mutex::new(Vec::new()),
            splits: Mutex::new(Vec::new()),
            union_find: Mutex::new(UnionFind::new()),
            link_confidence: DashMap::new(),
            entities: DashMap::new(),
            component_entity: DashMap::new(),
        }
    }

    fn link_key(a: &AddressKey, b: &AddressKey) -> (String, String) {
        let (a, b) = (a.to_string(), b.to_string());
        if a < b { (a, b) } else { (b, a) }
    }

    /// Record a heuristic link between two addresses. If the accumulated
    /// confidence for the pair exceeds the merge threshold, unions their
    /// components and (re)builds the entity for the resulting cluster.
    pub fn merge(&self, a: AddressKey, b: AddressKey, reason: impl Into<String>, confidence: f64) {
        let reason = reason.into();
        self.links.lock().unwrap().push(LinkRecord {
            a: a.clone(),
            b: b.clone(),
            reason,
            confidence,
            recorded_at: Utc::now(),
        });

        let key = Self::link_key(&a, &b);
        let mut entry = self.link_confidence.entry(key).or_insert(0.0);
        *entry += confidence;
        let total = *entry;
        drop(entry);

        if total >= MERGE_CONFIDENCE_THRESHOLD {
            let mut uf = self.union_find.lock().unwrap();
            uf.union(&a.to_string(), &b.to_string());
            let root = uf.find(&a.to_string());
            drop(uf);
            self.rebuild_entity_for_root(&root, &a, &b);
        }
    }

    fn rebuild_entity_for_root(&self, root: &str, a: &AddressKey, b: &AddressKey) {
        let existing_id = self
            .component_entity
            .get(root)
            .map(|id| *id)
            .or_else(|| self.component_entity.get(&a.to_string()).map(|id| *id))
            .or_else(|| self.component_entity.get(&b.to_string()).map(|id| *id));

        let id = existing_id.unwrap_or_else(Uuid::new_v4);
        let mut entity = self.entities.get(&id).map(|e| e.clone()).unwrap_or_else(|| Entity {
            id,
            canonical_name: None,
            entity_type: EntityType::Unknown,
            confidence: 0.0,
            member_addresses: Vec::new(),
            evidence: Vec::new(),
            created_at: Utc::now(),
        });

        for member in [a, b] {
            if !entity.member_addresses.contains(member) {
                entity.member_addresses.push(member.clone());
            }
            self.component_entity.insert(member.to_string(), id);
        }
        entity.confidence = (entity.confidence + 0.1).min(1.0);
        self.component_entity.insert(root.to_string(), id);
        self.entities.insert(id, entity);
    }

    pub fn attribute(&self, address: &AddressKey) -> Option<Entity> {
        self.component_entity.get(&address.to_string()).and_then(|id| self.entities.get(&id).map(|e| e.clone()))
    }

    /// Admin-only reversal: appends a split record rather than mutating
    /// the union-find history, per §4.4's invariant that the structure
    /// is fully reconstructible from the append-only link log.
    pub fn split(&self, entity: Uuid, reason: impl Into<String>) {
        self.splits.lock().unwrap().push(SplitRecord { entity, reason: reason.into(), recorded_at: Utc::now() });
        self.entities.remove(&entity);
        self.component_entity.retain(|_, id| *id != entity);
    }

    pub fn link_log(&self) -> Vec<LinkRecord> {
        self.links.lock().unwrap().clone()
    }
}

impl Default for AttributionEngine {
    fn default() -> Self {
        Self::new()
    }
}
