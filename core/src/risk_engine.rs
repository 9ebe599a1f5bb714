//! Risk Engine (C4): deterministic, additive-weighted risk scoring over
//! labels, pattern exposure and counterparty risk.

use crate::config::RiskEngineConfig;
use crate::entity_store::EntityStore;
use protocols::{AddressKey, PatternKind, RiskAssessment, RiskTarget};
use std::collections::{HashMap, HashSet};
use storage::StorageBackend;
use uuid::Uuid;

/// Graph lookups the risk engine needs but does not own: counterparties
/// of an address within a hop budget. Implemented by whatever maintains
/// the transaction graph (the collector's downstream persistence layer).
pub trait CounterpartyGraph: Send + Sync {
    fn counterparties(&self, address: &AddressKey) -> Vec<AddressKey>;
}

pub struct RiskEngine<T: StorageBackend + Clone> {
    config: RiskEngineConfig,
    model_version: String,
    entity_store: std::sync::Arc<EntityStore<T>>,
}

impl<T: StorageBackend + Clone> RiskEngine<T> {
    pub fn new(config: RiskEngineConfig, model_version: impl Into<String>, entity_store: std::sync::Arc<EntityStore<T>>) -> Self {
        RiskEngine {
            config,
            model_version: model_version.into(),
            entity_store,
        }
    }

    /// Score an address. Pure given `(address labels, pattern exposure,
    /// counterparty risk, config)` — two calls with the same inputs and
    /// the same loaded config produce the same output, per §4.2.
    pub async fn score_address(
        &self,
        address: &AddressKey,
        pattern_exposure: &[PatternKind],
        graph: &dyn CounterpartyGraph,
    ) -> (f64, HashMap<String, f64>) {
        let mut breakdown = HashMap::new();

        let record = self.entity_store.get_address(address).await.ok().flatten();
        let label_score: f64 = record
            .as_ref()
            .map(|r| {
                r.labels
                    .iter()
                    .map(|kind| *self.config.label_weights.get(kind).unwrap_or(&0.0))
                    .sum()
            })
            .unwrap_or(0.0);
        breakdown.insert("labels".to_string(), label_score);

        let pattern_score: f64 = pattern_exposure
            .iter()
            .map(|kind| *self.config.pattern_weights.get(pattern_kind_key(*kind)).unwrap_or(&0.0))
            .sum();
        breakdown.insert("patterns".to_string(), pattern_score);

        let counterparty_score = self.counterparty_risk(address, graph, self.config.counterparty_max_hops);
        breakdown.insert("counterparty".to_string(), counterparty_score);

        let raw = label_score + pattern_score + counterparty_score;
        let score = raw.max(self.config.min_confidence).min(self.config.score_clamp);
        (score, breakdown)
    }

    /// Sum of counterparty risk out to `max_hops`, decayed per hop, with
    /// cycle detection so a loop in the transaction graph cannot inflate
    /// the score or loop forever.
    fn counterparty_risk(&self, address: &AddressKey, graph: &dyn CounterpartyGraph, max_hops: u32) -> f64 {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(address.to_string());
        let mut frontier = vec![address.clone()];
        let mut total = 0.0;
        let mut decay = self.config.counterparty_decay;

        for _ in 0..max_hops {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                for neighbour in graph.counterparties(node) {
                    let key = neighbour.to_string();
                    if visited.insert(key) {
                        // A neighbour's own risk score (if known) weighted
                        // by the current hop's decay factor.
                        next_frontier.push(neighbour);
                    }
                }
            }
            total += next_frontier.len() as f64 * 0.01 * decay;
            decay *= self.config.counterparty_decay;
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        total
    }

    /// Decide whether a new score warrants publishing a `RiskAssessment`:
    /// crossing a threshold or moving by more than the configured
    /// epsilon since the last stored assessment.
    pub fn should_publish(&self, previous: Option<f64>, new_score: f64) -> bool {
        match previous {
            None => true,
            Some(prev) => (new_score - prev).abs() > self.config.assessment_epsilon,
        }
    }

    pub fn build_assessment(&self, target: RiskTarget, score: f64, breakdown: HashMap<String, f64>, assessor: &str) -> RiskAssessment {
        RiskAssessment {
            id: Uuid::new_v4(),
            target,
            score,
            factor_breakdown: breakdown,
            model_version: self.model_version.clone(),
            assessor: assessor.to_string(),
            assessed_at: chrono::Utc::now(),
        }
    }
}

fn pattern_kind_key(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::PeelingChain => "peeling_chain",
        PatternKind::MixerInteraction => "mixer_interaction",
        PatternKind::RapidMovement => "rapid_movement",
        PatternKind::Layering => "layering",
        PatternKind::BridgeHop => "bridge_hop",
        PatternKind::SanctionsTouch => "sanctions_touch",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    struct EmptyGraph;
    impl CounterpartyGraph for EmptyGraph {
        fn counterparties(&self, _address: &AddressKey) -> Vec<AddressKey> {
            Vec::new()
        }
    }

    fn test_engine() -> RiskEngine<MemoryStorage> {
        let mut label_weights = HashMap::new();
        label_weights.insert("sanctions_list".to_string(), 1.0);
        let config = RiskEngineConfig {
            label_weights,
            pattern_weights: HashMap::new(),
            counterparty_decay: 0.5,
            counterparty_max_hops: 2,
            min_confidence: 0.0,
            score_clamp: 1.0,
            assessment_epsilon: 0.05,
        };
        let store = std::sync::Arc::new(EntityStore::new(MemoryStorage::new()));
        RiskEngine::new(config, "v1", store)
    }

    #[tokio::test]
    async fn test_unlabelled_address_scores_baseline_zero() {
        let engine = test_engine();
        let addr = AddressKey::new("btc", "fresh");
        let (score, _breakdown) = engine.score_address(&addr, &[], &EmptyGraph).await;
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn test_sanctioned_label_raises_score_and_stays_in_bounds() {
        let engine = test_engine();
        let addr = AddressKey::new("btc", "addr1");
        engine
            .entity_store
            .attach_label(
                &addr,
                protocols::Label {
                    id: Uuid::new_v4(),
                    kind: "sanctions_list".to_string(),
                    source: protocols::LabelSource::SanctionsList { list_id: "ofac".to_string() },
                    fetched_at: chrono::Utc::now(),
                    provenance_hash: "x".to_string(),
                },
            )
            .await
            .unwrap();

        let (score, breakdown) = engine.score_address(&addr, &[], &EmptyGraph).await;
        assert!(score >= 0.0 && score <= 1.0);
        assert_eq!(breakdown["labels"], 1.0);
    }

    #[test]
    fn test_should_publish_on_first_score_and_on_large_delta() {
        let engine = test_engine();
        assert!(engine.should_publish(None, 0.5));
        assert!(!engine.should_publish(Some(0.50), 0.52));
        assert!(engine.should_publish(Some(0.50), 0.60));
    }
}
