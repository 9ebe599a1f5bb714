use anyhow::Result;
use chainwatch_core::alert_engine::{AlertEngine, Event as AlertEvent};
use chainwatch_core::api::{self, AppState, Components};
use chainwatch_core::attribution::AttributionEngine;
use chainwatch_core::case_store::CaseStore;
use chainwatch_core::collector::{AnalysisTask, CollectorPool};
use chainwatch_core::config::AppConfig;
use chainwatch_core::court_assessor::CourtComplianceAssessor;
use chainwatch_core::entity_store::EntityStore;
use chainwatch_core::pattern_detector::PatternDetector;
use chainwatch_core::risk_engine::{CounterpartyGraph, RiskEngine};
use chainwatch_core::scheduler::{JobSpec, ScheduledJob, Scheduler};
use chainwatch_core::webhook_dispatcher::{WebhookDispatchConfig, WebhookDispatcher};
use clap::Parser;
use ledger_clients::{HttpLedgerClient, HttpLedgerClientConfig, LedgerClient};
use protocols::{AddressKey, FlowDirection, RiskTarget};
use std::sync::Arc;
use storage::MemoryStorage;
use tracing::{error, info, warn};

/// Chainwatch Analytical Core server.
#[derive(Parser)]
#[command(name = "chainwatch-core")]
#[command(about = "Blockchain compliance and forensics analytical core")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(false).with_level(true))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    Ok(())
}

/// No counterparty graph is wired for the in-memory demo deployment —
/// the production persistence layer's property-graph store fills this
/// role (§6's persistence layout, store (b)).
struct NoGraph;
impl CounterpartyGraph for NoGraph {
    fn counterparties(&self, _address: &AddressKey) -> Vec<AddressKey> {
        Vec::new()
    }
}

struct LoggingJob {
    name: &'static str,
}

#[async_trait::async_trait]
impl ScheduledJob for LoggingJob {
    fn name(&self) -> &str {
        self.name
    }
    async fn run(&self) -> Result<()> {
        info!(job = self.name, "periodic sync tick (external feed integration is a thin collaborator)");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    info!("starting chainwatch-core v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    let backend = MemoryStorage::new();

    let entity_store = Arc::new(EntityStore::new(backend.clone()));
    let risk_engine = Arc::new(RiskEngine::new(config.risk_engine.clone(), "v1", entity_store.clone()));
    let case_store = Arc::new(CaseStore::new(backend.clone()));
    let court_assessor = Arc::new(CourtComplianceAssessor::new(backend.clone()));
    let evidence_vault = Arc::new(chainwatch_core::evidence_vault::EvidenceVault::new(
        backend.clone(),
        config.evidence_vault.root_path.clone(),
        config.evidence_vault.backup_root.clone().map(std::path::PathBuf::from),
    ));
    let attribution_engine = Arc::new(AttributionEngine::new());
    let pattern_detector = Arc::new(PatternDetector::new(config.pattern_detector.clone()));

    let (notification_tx, notification_rx) = tokio::sync::mpsc::channel(1024);
    let alert_engine = Arc::new(AlertEngine::new(notification_tx));
    let webhook_dispatcher = Arc::new(WebhookDispatcher::new(WebhookDispatchConfig {
        request_timeout: config.webhook_dispatch.request_timeout,
        max_attempts: config.webhook_dispatch.max_retries,
        backoff_base: std::time::Duration::from_millis(config.webhook_dispatch.retry_backoff_base_ms),
    }));

    let (shutdown_tx, dispatcher_shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let dispatcher = webhook_dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(notification_rx, dispatcher_shutdown_rx).await });
    }

    let clients: Vec<Arc<dyn LedgerClient>> = config
        .chains
        .iter()
        .map(|c| {
            let client = HttpLedgerClient::new(HttpLedgerClientConfig {
                chain: c.chain.clone(),
                endpoint: c.endpoint.clone(),
                api_key: c.api_key.clone(),
                request_timeout: std::time::Duration::from_secs(10),
            })?;
            Ok::<_, ledger_clients::LedgerClientError>(Arc::new(client) as Arc<dyn LedgerClient>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (task_tx, mut task_rx) = tokio::sync::mpsc::channel::<AnalysisTask>(4096);
    let collector_pool = Arc::new(CollectorPool::new(config.collector.clone(), clients, task_tx));
    collector_pool.start_all().await;

    {
        let entity_store = entity_store.clone();
        let risk_engine = risk_engine.clone();
        let pattern_detector = pattern_detector.clone();
        let attribution_engine = attribution_engine.clone();
        let alert_engine = alert_engine.clone();

        tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                match task {
                    AnalysisTask::Transactions(txs) => {
                        for tx in &txs {
                            if let Err(e) = tx.validate_balance() {
                                warn!(error = %e, tx_hash = %tx.tx_hash, "dropping unbalanced transaction");
                                continue;
                            }

                            for leg in tx.inputs.iter().map(|l| (l, FlowDirection::Out)).chain(tx.outputs.iter().map(|l| (l, FlowDirection::In))) {
                                let (leg, direction) = leg;
                                if let Err(e) = entity_store.observe_address(&leg.address, tx.timestamp, direction, &leg.asset, leg.amount).await {
                                    error!(error = %e, "failed to persist address observation");
                                }
                            }

                            let matches = pattern_detector.observe(tx);
                            for pattern_match in &matches {
                                for pair in pattern_match.addresses.windows(2) {
                                    attribution_engine.merge(pair[0].clone(), pair[1].clone(), "co-occurring in pattern match", pattern_match.confidence);
                                }
                            }

                            for address in tx.participant_addresses() {
                                let (score, breakdown) = risk_engine.score_address(address, &[], &NoGraph).await;
                                if risk_engine.should_publish(None, score) {
                                    let assessment = risk_engine.build_assessment(RiskTarget::Address(address.clone()), score, breakdown, "risk-engine");
                                    alert_engine
                                        .submit(AlertEvent {
                                            event_type: "risk_assessment".to_string(),
                                            timestamp: assessment.assessed_at,
                                            fields: serde_json::json!({ "score": assessment.score, "address": address.to_string() }),
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                    AnalysisTask::Orphaned(orphans) => {
                        warn!(count = orphans.len(), "transactions orphaned by reorg");
                    }
                }
            }
        });
    }

    let mut scheduler = Scheduler::new();
    scheduler.register(JobSpec { job: Arc::new(LoggingJob { name: "sanctions_resync" }), interval: config.scheduler.sanctions_sync_interval, initial_delay: config.scheduler.warmup_delay });
    scheduler.register(JobSpec { job: Arc::new(LoggingJob { name: "label_resync" }), interval: config.scheduler.label_sync_interval, initial_delay: config.scheduler.warmup_delay });
    scheduler.register(JobSpec { job: Arc::new(LoggingJob { name: "retention_cleanup" }), interval: config.scheduler.retention_cleanup_interval, initial_delay: config.scheduler.warmup_delay });
    let scheduler_handles = scheduler.start_all();

    let db = sqlx::SqlitePool::connect(&config.database_url).await?;
    api::run_migrations(&db).await?;

    let app_state = AppState {
        db,
        jwt_secret: Arc::new(config.jwt_secret.clone()),
        components: Arc::new(Components {
            entity_store,
            risk_engine,
            case_store,
            court_assessor,
            evidence_vault,
            attribution_engine,
            alert_engine,
            webhook_dispatcher: webhook_dispatcher.clone(),
        }),
    };

    let router = api::router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    if let Err(e) = server.await {
        error!(error = %e, "server exited with error");
    }

    collector_pool.stop_all(std::time::Duration::from_secs(5)).await;
    scheduler.shutdown();
    let _ = shutdown_tx.send(true);
    for handle in scheduler_handles {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }

    Ok(())
}
