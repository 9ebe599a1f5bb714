//! Integration tests exercising the public API of `chainwatch-core`
//! against the invariants and end-to-end scenarios of the forensic
//! compliance backend.

use chainwatch_core::alert_engine::{AlertEngine, AlertRule, Condition, ConditionOperator, Event, Severity};
use chainwatch_core::attribution::AttributionEngine;
use chainwatch_core::case_store::{CaseStatus, CaseStore, Priority};
use chainwatch_core::court_assessor::{Admissibility, CourtComplianceAssessor, EvidenceAttributes, Jurisdiction, CourtType, LegalStandard};
use chainwatch_core::entity_store::EntityStore;
use chainwatch_core::evidence_vault::{CustodyAction, EvidenceError, EvidenceVault, IntegrityStatus};
use chainwatch_core::risk_engine::{CounterpartyGraph, RiskEngine};
use chainwatch_core::webhook_dispatcher::{PayloadFormat, WebhookDispatchConfig, WebhookDispatcher, WebhookSink};
use protocols::AddressKey;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use storage::MemoryStorage;
use uuid::Uuid;

struct EmptyGraph;
impl CounterpartyGraph for EmptyGraph {
    fn counterparties(&self, _address: &AddressKey) -> Vec<AddressKey> {
        Vec::new()
    }
}

fn risk_config() -> chainwatch_core::config::RiskEngineConfig {
    let mut label_weights = HashMap::new();
    label_weights.insert("sanctions_list".to_string(), 0.9);
    chainwatch_core::config::RiskEngineConfig {
        label_weights,
        pattern_weights: HashMap::new(),
        counterparty_decay: 0.5,
        counterparty_max_hops: 2,
        min_confidence: 0.0,
        score_clamp: 1.0,
        assessment_epsilon: 0.05,
    }
}

// Testable Property 4: score(input, config_version) is deterministic and within [0.0, 1.0].
#[tokio::test]
async fn test_property_4_score_is_deterministic_and_bounded() {
    let store = Arc::new(EntityStore::new(MemoryStorage::new()));
    let engine = RiskEngine::new(risk_config(), "v1", store.clone());
    let addr = AddressKey::new("btc", "property-test-addr");

    store
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

    let (score_a, _) = engine.score_address(&addr, &[], &EmptyGraph).await;
    let (score_b, _) = engine.score_address(&addr, &[], &EmptyGraph).await;

    assert_eq!(score_a, score_b);
    assert!((0.0..=1.0).contains(&score_a));
}

// E2 Evidence tamper scenario.
#[tokio::test]
async fn test_e2_evidence_tamper_marks_inadmissible_with_authentication_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let vault = EvidenceVault::new(MemoryStorage::new(), dir.path().to_path_buf(), None);
    let case_id = Uuid::new_v4();

    let (evidence_id, digest) = vault
        .put(case_id, b"hello", "document", "field collection", "investigator-a", HashMap::new())
        .await
        .unwrap();
    assert_eq!(digest, crypto_primitives::evidence_digest(b"hello"));

    let item = vault.get_item(&evidence_id).await.unwrap().unwrap();
    tokio::fs::write(&item.storage_pointer, b"goodbye").await.unwrap();

    let status = vault.verify(&evidence_id).await.unwrap();
    assert_eq!(status, IntegrityStatus::Tampered);

    let assessor = CourtComplianceAssessor::new(MemoryStorage::new());
    // Tampering breaks authentication; with hearsay/originality also
    // unresolved the only surviving requirement is bare relevance, which
    // should drive the verdict all the way down to Inadmissible.
    let attrs = EvidenceAttributes {
        has_unbroken_custody_chain: true,
        custody_chain_verified: false,
        hearsay_exception_applies: false,
        is_original: false,
        relevant_to_case: true,
    };
    let record = assessor
        .assess(case_id, evidence_id, Jurisdiction::FederalUs, CourtType::Criminal, LegalStandard::Preponderance, &attrs, 0.0)
        .await
        .unwrap();

    assert_eq!(record.admissibility, Admissibility::Inadmissible);
    let auth_challenge = record.challenges.iter().find(|c| matches!(c.challenge_type, chainwatch_core::court_assessor::RequirementKind::Authentication));
    assert!(auth_challenge.is_some());
    assert!(auth_challenge.unwrap().likelihood >= 0.5);
}

// E3 Case lifecycle scenario.
#[tokio::test]
async fn test_e3_case_lifecycle_sets_closed_date_and_blocks_non_admin_reopen() {
    let store = CaseStore::new(MemoryStorage::new());
    let case = store.open("investigation", "desc", Priority::High, "US", "FRE-901").await.unwrap();
    assert_eq!(case.status, CaseStatus::Open);

    let case = store.transition(&case.id, CaseStatus::InProgress, "analyst", "start", false).await.unwrap();
    let case = store.transition(&case.id, CaseStatus::EvidenceCollection, "analyst", "collect", false).await.unwrap();
    let case = store.transition(&case.id, CaseStatus::Analysis, "analyst", "analyze", false).await.unwrap();
    let case = store.transition(&case.id, CaseStatus::Review, "analyst", "review", false).await.unwrap();
    let case = store.transition(&case.id, CaseStatus::Closed, "analyst", "close", false).await.unwrap();
    assert!(case.closed_date.is_some());

    let case = store.transition(&case.id, CaseStatus::Archived, "admin", "archive", false).await.unwrap();
    assert_eq!(case.status, CaseStatus::Archived);

    let result = store.transition(&case.id, CaseStatus::Open, "analyst", "reopen attempt", false).await;
    assert!(result.is_err());
}

// Testable Property 3, derived from the same case-store invariant E3 exercises.
#[tokio::test]
async fn test_property_3_closed_date_iff_closed_or_archived() {
    let store = CaseStore::new(MemoryStorage::new());
    let case = store.open("c", "d", Priority::Low, "US", "FRE-901").await.unwrap();
    assert!(case.closed_date.is_none());

    let case = store.transition(&case.id, CaseStatus::Closed, "admin", "admin close", true).await.unwrap();
    assert!(case.closed_date.is_some());

    let case = store.transition(&case.id, CaseStatus::InProgress, "admin", "reopen", true).await.unwrap();
    assert!(case.closed_date.is_none());
}

// E4 Alert + webhook scenario (rate-limit boundary collapsed to milliseconds for test speed).
#[tokio::test]
async fn test_e4_alert_fires_once_then_is_rate_limited_then_fires_again() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let alert_engine = AlertEngine::new(tx);
    alert_engine.register_rule(AlertRule {
        id: Uuid::new_v4(),
        name: "parity_critical".to_string(),
        event_type: "metric".to_string(),
        condition: Condition::Leaf { field: "overall_parity".to_string(), operator: ConditionOperator::Lt, value: json!(70) },
        severity: Severity::Critical,
        message_template: "parity breach on {event_type}".to_string(),
        rate_limit: chrono::Duration::milliseconds(40),
        enabled: true,
    });

    let dispatcher = Arc::new(WebhookDispatcher::new(WebhookDispatchConfig {
        request_timeout: std::time::Duration::from_millis(200),
        max_attempts: 1,
        backoff_base: std::time::Duration::from_millis(1),
    }));
    dispatcher.register_sink(WebhookSink {
        id: Uuid::new_v4(),
        name: "ops".to_string(),
        url: "http://127.0.0.1:1/webhook".to_string(),
        format: PayloadFormat::Passthrough,
        event_filter: vec!["metric".to_string()],
        severity_filter: vec![Severity::Critical],
        rate_limit: chrono::Duration::seconds(0),
        enabled: true,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::channel(8);
    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(dispatch_rx, shutdown_rx).await })
    };

    let event = Event { event_type: "metric".to_string(), timestamp: chrono::Utc::now(), fields: json!({"overall_parity": 65}) };
    let fired = alert_engine.submit(event.clone()).await;
    assert_eq!(fired.len(), 1);
    dispatch_tx.send(rx.recv().await.unwrap()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(dispatcher.outcomes().len(), 1);

    let _ = shutdown_tx.send(true);
    let _ = dispatcher_handle.await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let fired_again = alert_engine.submit(event.clone()).await;
    assert!(fired_again.is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(40)).await;
    let fired_later = alert_engine.submit(event).await;
    assert_eq!(fired_later.len(), 1);
}

// Testable Property 8: a sink whose event filter excludes a type receives nothing.
#[tokio::test]
async fn test_property_8_event_filter_excludes_unrelated_notifications() {
    let dispatcher = Arc::new(WebhookDispatcher::new(WebhookDispatchConfig {
        request_timeout: std::time::Duration::from_millis(100),
        max_attempts: 1,
        backoff_base: std::time::Duration::from_millis(1),
    }));
    dispatcher.register_sink(WebhookSink {
        id: Uuid::new_v4(),
        name: "cases-only".to_string(),
        url: "http://127.0.0.1:1/webhook".to_string(),
        format: PayloadFormat::Passthrough,
        event_filter: vec!["case_opened".to_string()],
        severity_filter: vec![],
        rate_limit: chrono::Duration::seconds(0),
        enabled: true,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::channel(8);
    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(dispatch_rx, shutdown_rx).await })
    };

    let notification = chainwatch_core::alert_engine::Notification {
        id: Uuid::new_v4(),
        rule_id: Uuid::new_v4(),
        event_type: "risk_assessment".to_string(),
        severity: Severity::Critical,
        message: "x".to_string(),
        data: json!({}),
        enqueued_at: chrono::Utc::now(),
    };
    dispatch_tx.send(notification).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(dispatcher.outcomes().is_empty());

    let _ = shutdown_tx.send(true);
    let _ = dispatcher_handle.await;
}

// E5 Chain-of-custody append scenario.
#[tokio::test]
async fn test_e5_custody_append_with_stale_prev_hash_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let vault = EvidenceVault::new(MemoryStorage::new(), dir.path().to_path_buf(), None);
    let case_id = Uuid::new_v4();
    let (evidence_id, _digest) = vault.put(case_id, b"hello", "document", "collection", "investigator-a", HashMap::new()).await.unwrap();

    let h0 = vault.get_custody(&evidence_id).await.unwrap()[0].entry_hash.clone();
    let h1_entry = vault.append_custody(&evidence_id, "investigator-b", CustodyAction::Transferred, "lab", "transfer for analysis", &h0).await.unwrap();
    assert_ne!(h1_entry.entry_hash, h0);

    let rejected = vault.append_custody(&evidence_id, "investigator-c", CustodyAction::Analyzed, "lab", "duplicate prev_hash", &h0).await;
    assert!(matches!(rejected, Err(EvidenceError::CustodyMismatch)));

    // Testable Property 2: recomputing entry hashes from genesis reproduces the stored head.
    assert!(vault.verify_custody_chain(&evidence_id).await.unwrap());
}

// Testable Property 1: recomputed digest equals recorded digest unless tampered/corrupted.
#[tokio::test]
async fn test_property_1_untampered_evidence_always_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let vault = EvidenceVault::new(MemoryStorage::new(), dir.path().to_path_buf(), None);
    let case_id = Uuid::new_v4();
    let (evidence_id, _digest) = vault.put(case_id, b"untouched bytes", "document", "collection", "investigator-a", HashMap::new()).await.unwrap();

    assert_eq!(vault.verify(&evidence_id).await.unwrap(), IntegrityStatus::Verified);
}

// Testable Property 5: at most one non-superseded pattern match per (kind, tx-set).
#[tokio::test]
async fn test_property_5_pattern_match_is_idempotent_across_duplicate_observation() {
    use chainwatch_core::config::PatternDetectorConfig;
    use chainwatch_core::pattern_detector::PatternDetector;
    use protocols::{ChainId, LedgerTransaction, TransactionStatus, TxLeg};
    use rust_decimal::Decimal;

    let mut detector = PatternDetector::new(PatternDetectorConfig {
        peeling_min_hops: 4,
        rapid_movement_max_seconds: 600,
        rapid_movement_min_hops: 3,
        bridge_window_seconds: 3600,
        sanctions_touch_max_hops: 2,
    });
    let mut sanctioned = std::collections::HashSet::new();
    sanctioned.insert("sanctioned-addr".to_string());
    detector.set_sanctioned_addresses(sanctioned);

    let chain: ChainId = "eth".to_string();
    let tx = LedgerTransaction {
        chain: chain.clone(),
        tx_hash: "tx1".to_string(),
        block_height: 10,
        timestamp: chrono::Utc::now(),
        inputs: vec![TxLeg { address: AddressKey::new(chain.clone(), "sender"), asset: "ETH".to_string(), amount: Decimal::from(10) }],
        outputs: vec![TxLeg { address: AddressKey::new(chain, "sanctioned-addr"), asset: "ETH".to_string(), amount: Decimal::from(10) }],
        fee: Decimal::ZERO,
        status: TransactionStatus::Confirmed,
    };

    let first = detector.observe(&tx);
    let second = detector.observe(&tx);

    assert!(!first.is_empty());
    assert!(second.is_empty(), "re-observing the same transaction must not duplicate a pattern match");
}

// Attribution: confirm a merge above threshold unifies two addresses, consistent with
// the entity graph the risk/case pipeline relies on.
#[tokio::test]
async fn test_attribution_links_are_reconstructible_from_the_log() {
    let engine = AttributionEngine::new();
    let a = AddressKey::new("btc", "x1");
    let b = AddressKey::new("btc", "x2");
    engine.merge(a.clone(), b.clone(), "common input heuristic", 0.7);

    let entity_a = engine.attribute(&a).unwrap();
    let entity_b = engine.attribute(&b).unwrap();
    assert_eq!(entity_a.id, entity_b.id);
    assert_eq!(engine.link_log().len(), 1);
}
