//! Pattern Detector (C5): incremental, sliding-window detectors for
//! peeling chains, mixer interaction, rapid movement, layering, bridge
//! hops and sanctions touches.

use crate::config::PatternDetectorConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use protocols::{AddressKey, LedgerTransaction, PatternKind, PatternMatch};
use std::collections::HashSet;
use uuid::Uuid;

/// Sliding state for one chain of one-hop transfers under evaluation as
/// a candidate peeling chain.
#[derive(Debug, Clone)]
struct PeelingTrail {
    addresses: Vec<AddressKey>,
    transactions: Vec<String>,
    started_at: DateTime<Utc>,
    last_hop_at: DateTime<Utc>,
}

/// A recent withdrawal observed on one chain, kept around for the bridge
/// window so a matching deposit on another chain can be correlated.
#[derive(Debug, Clone)]
struct PendingWithdrawal {
    address: AddressKey,
    tx_hash: String,
    at: DateTime<Utc>,
}

pub struct PatternDetector {
    config: PatternDetectorConfig,
    mixer_addresses: HashSet<String>,
    sanctioned_addresses: HashSet<String>,
    trails: DashMap<String, PeelingTrail>,
    recent_withdrawals: DashMap<String, Vec<PendingWithdrawal>>,
    seen_matches: DashMap<(PatternKind, Vec<String>), Uuid>,
    matches: DashMap<Uuid, PatternMatch>,
}

impl PatternDetector {
    pub fn new(config: PatternDetectorConfig) -> Self {
        PatternDetector {
            config,
            mixer_addresses: HashSet::new(),
            sanctioned_addresses: HashSet::new(),
            trails: DashMap::new(),
            recent_withdrawals: DashMap::new(),
            seen_matches: DashMap::new(),
            matches: DashMap::new(),
        }
    }

    pub fn set_mixer_addresses(&mut self, addresses: HashSet<String>) {
        self.mixer_addresses = addresses;
    }

    pub fn set_sanctioned_addresses(&mut self, addresses: HashSet<String>) {
        self.sanctioned_addresses = addresses;
    }

    /// Run every detector over one transaction, returning any new (or
    /// superseding) matches. Re-detection of the same participant set
    /// for a pattern kind returns no new match — the existing id stands
    /// per §4.3's ordering/idempotence rule.
    pub fn observe(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        let mut found = Vec::new();
        found.extend(self.detect_mixer_interaction(tx));
        found.extend(self.detect_sanctions_touch(tx));
        found.extend(self.detect_rapid_movement(tx));
        found.extend(self.detect_peeling_chain(tx));
        found.extend(self.detect_bridge_hop(tx));
        found
    }

    fn record_if_new(&self, kind: PatternKind, mut tx_hashes: Vec<String>, build: impl FnOnce() -> PatternMatch) -> Option<PatternMatch> {
        tx_hashes.sort();
        tx_hashes.dedup();
        let key = (kind, tx_hashes);
        if self.seen_matches.contains_key(&key) {
            return None;
        }
        let m = build();
        self.seen_matches.insert(key, m.id);
        self.matches.insert(m.id, m.clone());
        Some(m)
    }

    fn detect_mixer_interaction(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        let touches_mixer = tx
            .participant_addresses()
            .any(|addr| self.mixer_addresses.contains(&addr.address));
        if !touches_mixer {
            return Vec::new();
        }
        self.record_if_new(PatternKind::MixerInteraction, vec![tx.tx_hash.clone()], || PatternMatch {
            id: Uuid::new_v4(),
            kind: PatternKind::MixerInteraction,
            confidence: 0.9,
            transactions: vec![tx.tx_hash.clone()],
            addresses: tx.participant_addresses().cloned().collect(),
            window_start: tx.timestamp,
            window_end: tx.timestamp,
            evidence_note: "counterparty is a known mixer cluster member".to_string(),
            supersedes: None,
        })
        .into_iter()
        .collect()
    }

    fn detect_sanctions_touch(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        let touches_sanctioned = tx
            .participant_addresses()
            .any(|addr| self.sanctioned_addresses.contains(&addr.address));
        if !touches_sanctioned {
            return Vec::new();
        }
        self.record_if_new(PatternKind::SanctionsTouch, vec![tx.tx_hash.clone()], || PatternMatch {
            id: Uuid::new_v4(),
            kind: PatternKind::SanctionsTouch,
            confidence: 1.0,
            transactions: vec![tx.tx_hash.clone()],
            addresses: tx.participant_addresses().cloned().collect(),
            window_start: tx.timestamp,
            window_end: tx.timestamp,
            evidence_note: "direct contact with a sanctioned address".to_string(),
            supersedes: None,
        })
        .into_iter()
        .collect()
    }

    /// Rapid movement: funds moved through > `rapid_movement_min_hops`
    /// addresses within `rapid_movement_max_seconds`, tracked via the
    /// same peeling trail state (a one-hop chain is both a peeling and a
    /// rapid-movement candidate; they differ in which threshold fires).
    fn detect_rapid_movement(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        let Some(input) = tx.inputs.first() else { return Vec::new() };
        let key = input.address.to_string();
        let mut trail = self.trails.entry(key.clone()).or_insert_with(|| PeelingTrail {
            addresses: vec![input.address.clone()],
            transactions: Vec::new(),
            started_at: tx.timestamp,
            last_hop_at: tx.timestamp,
        });

        let window = Duration::seconds(self.config.rapid_movement_max_seconds as i64);
        if tx.timestamp - trail.started_at > window {
            trail.started_at = tx.timestamp;
            trail.addresses = vec![input.address.clone()];
            trail.transactions.clear();
        }
        trail.transactions.push(tx.tx_hash.clone());
        trail.last_hop_at = tx.timestamp;
        for output in &tx.outputs {
            trail.addresses.push(output.address.clone());
        }

        if trail.addresses.len() as u32 > self.config.rapid_movement_min_hops {
            let txs = trail.transactions.clone();
            let addrs = trail.addresses.clone();
            let start = trail.started_at;
            let end = trail.last_hop_at;
            drop(trail);
            return self
                .record_if_new(PatternKind::RapidMovement, txs.clone(), || PatternMatch {
                    id: Uuid::new_v4(),
                    kind: PatternKind::RapidMovement,
                    confidence: 0.7,
                    transactions: txs,
                    addresses: addrs,
                    window_start: start,
                    window_end: end,
                    evidence_note: format!("funds moved through {} hops within the rapid-movement window", self.config.rapid_movement_min_hops + 1),
                    supersedes: None,
                })
                .into_iter()
                .collect();
        }
        Vec::new()
    }

    /// Peeling chain: a one-input, small-output transfer chained from
    /// the same trail, repeated at least `peeling_min_hops` times.
    fn detect_peeling_chain(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        if tx.inputs.len() != 1 || tx.outputs.len() != 2 {
            return Vec::new();
        }
        let key = tx.inputs[0].address.to_string();
        let trail = self.trails.get(&key);
        let Some(trail) = trail else { return Vec::new() };
        if (trail.transactions.len() as u32) < self.config.peeling_min_hops {
            return Vec::new();
        }
        let txs = trail.transactions.clone();
        let addrs = trail.addresses.clone();
        let start = trail.started_at;
        let end = trail.last_hop_at;
        drop(trail);

        self.record_if_new(PatternKind::PeelingChain, txs.clone(), || PatternMatch {
            id: Uuid::new_v4(),
            kind: PatternKind::PeelingChain,
            confidence: 0.6,
            transactions: txs,
            addresses: addrs,
            window_start: start,
            window_end: end,
            evidence_note: format!("{} consecutive one-hop peels", self.config.peeling_min_hops),
            supersedes: None,
        })
        .into_iter()
        .collect()
    }

    /// Bridge hop: a withdrawal on one chain followed by a deposit-shaped
    /// transaction on a different chain within the bridge window.
    fn detect_bridge_hop(&self, tx: &LedgerTransaction) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        let window = Duration::seconds(self.config.bridge_window_seconds as i64);

        for participant in tx.participant_addresses() {
            let bucket_key = participant.address.clone();
            let mut bucket = self.recent_withdrawals.entry(bucket_key.clone()).or_default();
            bucket.retain(|w| tx.timestamp - w.at <= window);

            if let Some(withdrawal) = bucket.iter().find(|w| w.address.chain != tx.chain) {
                let txs = vec![withdrawal.tx_hash.clone(), tx.tx_hash.clone()];
                let addrs = vec![withdrawal.address.clone(), participant.clone()];
                let wd_at = withdrawal.at;
                if let Some(m) = self.record_if_new(PatternKind::BridgeHop, txs.clone(), || PatternMatch {
                    id: Uuid::new_v4(),
                    kind: PatternKind::BridgeHop,
                    confidence: 0.65,
                    transactions: txs,
                    addresses: addrs,
                    window_start: wd_at,
                    window_end: tx.timestamp,
                    evidence_note: "cross-chain withdrawal/deposit pair within the bridge window".to_string(),
                    supersedes: None,
                }) {
                    matches.push(m);
                }
            }

            bucket.push(PendingWithdrawal {
                address: participant.clone(),
                tx_hash: tx.tx_hash.clone(),
                at: tx.timestamp,
            });
        }
        matches
    }

    pub fn get_match(&self, id: &Uuid) -> Option<PatternMatch> {
        self.matches.get(id).map(|m| m.clone())
    }
}
