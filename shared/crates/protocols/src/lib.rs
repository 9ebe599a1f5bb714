// Shared Domain Model
// Core data structures shared between the collector pool, the
// attribution/risk pipeline, and the case-management subgraph.

//! # Protocols
//!
//! The ledger-domain model shared across the Analytical Core: addresses,
//! normalised transactions, entities, labels, pattern matches and risk
//! assessments. Every collector, detector and store in `core` exchanges
//! these types rather than chain-specific representations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Unbalanced UTXO transaction: inputs {inputs} != outputs {outputs} + fee {fee}")]
    UnbalancedTransaction {
        inputs: Decimal,
        outputs: Decimal,
        fee: Decimal,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Chain identifier. Kept as a string rather than a fixed enum so new
/// ledgers can be onboarded purely through configuration (§6).
pub type ChainId = String;

/// A ledger address, scoped to its chain. This is the `(chain,
/// address_string)` primary key from §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressKey {
    pub chain: ChainId,
    pub address: String,
}

impl AddressKey {
    pub fn new(chain: impl Into<ChainId>, address: impl Into<String>) -> Self {
        AddressKey {
            chain: chain.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for AddressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// Aggregate state for one address, per §3's Address entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    pub key: AddressKey,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub in_count: u64,
    pub out_count: u64,
    pub in_volume: HashMap<String, Decimal>,
    pub out_volume: HashMap<String, Decimal>,
    pub risk_score: f64,
    pub labels: Vec<String>,
}

impl AddressRecord {
    pub fn new(key: AddressKey, seen_at: DateTime<Utc>) -> Self {
        AddressRecord {
            key,
            first_seen: seen_at,
            last_seen: seen_at,
            in_count: 0,
            out_count: 0,
            in_volume: HashMap::new(),
            out_volume: HashMap::new(),
            risk_score: 0.0,
            labels: Vec::new(),
        }
    }

    /// Fold a new sighting into the aggregate, preserving the
    /// monotonic-counts / `first_seen <= last_seen` invariant from §3.
    pub fn observe(&mut self, at: DateTime<Utc>, direction: FlowDirection, asset: &str, amount: Decimal) {
        if at < self.first_seen {
            self.first_seen = at;
        }
        if at > self.last_seen {
            self.last_seen = at;
        }
        match direction {
            FlowDirection::In => {
                self.in_count += 1;
                *self.in_volume.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
            }
            FlowDirection::Out => {
                self.out_count += 1;
                *self.out_volume.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    In,
    Out,
}

/// One input or output leg of a normalised transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLeg {
    pub address: AddressKey,
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Confirmed,
    Orphaned,
}

/// A normalised, chain-agnostic transaction, per §3's Transaction entity.
/// Ledger access clients (C1) are responsible for producing this shape
/// regardless of whether the underlying chain is UTXO- or account-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub chain: ChainId,
    pub tx_hash: String,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    pub inputs: Vec<TxLeg>,
    pub outputs: Vec<TxLeg>,
    pub fee: Decimal,
    pub status: TransactionStatus,
}

impl LedgerTransaction {
    /// Validate the UTXO balance invariant from §3: `sum(inputs) ==
    /// sum(outputs) + fee`. Account-based chains (`inputs.len() <= 1`)
    /// skip this check — their balance invariant is enforced upstream by
    /// the ledger itself, not reconstructible from a single transaction
    /// record without full account state.
    pub fn validate_balance(&self) -> Result<(), ProtocolError> {
        let is_utxo_style = self.inputs.len() > 1 || self.outputs.len() > 1;
        if is_utxo_style {
            let total_in: Decimal = self.inputs.iter().map(|leg| leg.amount).sum();
            let total_out: Decimal = self.outputs.iter().map(|leg| leg.amount).sum();
            if total_in != total_out + self.fee {
                return Err(ProtocolError::UnbalancedTransaction {
                    inputs: total_in,
                    outputs: total_out,
                    fee: self.fee,
                });
            }
        }
        Ok(())
    }

    pub fn participant_addresses(&self) -> impl Iterator<Item = &AddressKey> {
        self.inputs.iter().chain(self.outputs.iter()).map(|leg| &leg.address)
    }
}

/// Entity types an address cluster can be attributed as, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Exchange,
    Mixer,
    DarknetMarket,
    Sanctioned,
    Individual,
    Unknown,
}

/// A cluster of addresses attributed to one real-world actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub canonical_name: Option<String>,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub member_addresses: Vec<AddressKey>,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Source of a label, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LabelSource {
    SanctionsList { list_id: String },
    KnownServiceRegistry { registry: String },
    ThreatFeed { feed_id: String },
}

/// A typed tag attached to an address or entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub kind: String,
    pub source: LabelSource,
    pub fetched_at: DateTime<Utc>,
    pub provenance_hash: String,
}

/// Behavioural pattern kinds detected by the pattern detector (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    PeelingChain,
    MixerInteraction,
    RapidMovement,
    Layering,
    BridgeHop,
    SanctionsTouch,
}

/// A detected behavioural pattern match, per §3. Immutable once created;
/// a superseding match references the id it supersedes rather than
/// mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub id: Uuid,
    pub kind: PatternKind,
    pub confidence: f64,
    pub transactions: Vec<String>,
    pub addresses: Vec<AddressKey>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub evidence_note: String,
    pub supersedes: Option<Uuid>,
}

/// Target of a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskTarget {
    Address(AddressKey),
    Entity(Uuid),
    Transaction { chain: ChainId, tx_hash: String },
}

/// A point-in-time risk snapshot, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: Uuid,
    pub target: RiskTarget,
    pub score: f64,
    pub factor_breakdown: HashMap<String, f64>,
    pub model_version: String,
    pub assessor: String,
    pub assessed_at: DateTime<Utc>,
}
