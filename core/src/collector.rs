//! Collector Pool (C2): one long-running collector per configured chain,
//! fetching new blocks, normalising them, and enqueueing analysis tasks.

use crate::config::CollectorConfig;
use ledger_clients::{LedgerClient, LedgerClientError};
use protocols::LedgerTransaction;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CollectorStatus {
    pub chain: String,
    pub cursor: u64,
    pub last_error: Option<String>,
    pub lag: u64,
    pub health: HealthState,
}

/// A transaction that fell off the canonical chain during a reorg.
#[derive(Debug, Clone)]
pub struct OrphanEvent {
    pub chain: String,
    pub tx_hash: String,
    pub block_height: u64,
}

pub enum AnalysisTask {
    Transactions(Vec<LedgerTransaction>),
    Orphaned(Vec<OrphanEvent>),
}

struct CollectorState {
    cursor: u64,
    stored_hash: Option<String>,
    /// (height, hash) for recently confirmed blocks, ascending, trimmed to
    /// the last `reorg_max_depth` heights below `cursor`. Lets a reorg walk
    /// back to the true divergence point instead of assuming a fixed depth.
    recent: VecDeque<(u64, String)>,
    consecutive_failures: u32,
    last_error: Option<String>,
    health: HealthState,
    head: u64,
}

/// One chain's collector: owns a cursor, backoff state, and the queue it
/// publishes normalised transactions onto.
struct Collector {
    client: Arc<dyn LedgerClient>,
    config: CollectorConfig,
    state: Arc<RwLock<CollectorState>>,
    out: mpsc::Sender<AnalysisTask>,
    shutdown: watch::Receiver<bool>,
}

impl Collector {
    fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exp = self.config.backoff_base_ms.saturating_mul(1u64 << consecutive_failures.min(20));
        Duration::from_millis(exp.min(self.config.backoff_cap_ms))
    }

    async fn run(self) {
        let chain = self.client.chain().to_string();
        loop {
            if *self.shutdown.borrow() {
                info!(chain = %chain, "collector observed shutdown, draining and exiting");
                return;
            }

            match self.poll_once().await {
                Ok(progressed) => {
                    let mut state = self.state.write().await;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                    if state.health != HealthState::Stopped {
                        state.health = HealthState::Healthy;
                    }
                    drop(state);
                    if !progressed {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(500)) => {},
                            _ = self.wait_for_shutdown() => return,
                        }
                    }
                }
                Err(e) => {
                    let mut state = self.state.write().await;
                    state.consecutive_failures += 1;
                    state.last_error = Some(e.to_string());
                    if state.consecutive_failures >= self.config.degraded_after_failures {
                        state.health = HealthState::Degraded;
                    }
                    let delay = self.backoff_delay(state.consecutive_failures);
                    drop(state);
                    warn!(chain = %chain, error = %e, delay_ms = delay.as_millis() as u64, "collector fetch failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = self.wait_for_shutdown() => return,
                    }
                }
            }
        }
    }

    async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// One iteration of the algorithm in §4.1: check the cursor height for
    /// a reorg, fetch head, fetch the next batch, normalise and publish.
    /// Returns whether any progress was made (used only to avoid a hot
    /// spin when idle).
    async fn poll_once(&self) -> Result<bool, LedgerClientError> {
        let (cursor, stored_hash, recent) = {
            let state = self.state.read().await;
            (state.cursor, state.stored_hash.clone(), state.recent.clone())
        };

        if let Some(stored_hash) = stored_hash {
            if cursor > 0 {
                if let Ok(current) = self.client.fetch_blocks(cursor, cursor).await {
                    if let Some(block) = current.first() {
                        if block.block_hash != stored_hash {
                            let ancestor = self.find_ancestor(cursor, &recent).await;
                            let orphaned: Vec<u64> = (ancestor + 1..=cursor).collect();
                            self.rewind(ancestor, orphaned).await;
                        }
                    }
                }
            }
        }

        let head = self.client.current_head().await?;
        let mut state = self.state.write().await;
        state.head = head.height;
        let cursor = state.cursor;
        drop(state);

        if head.height <= cursor {
            return Ok(false);
        }

        let to = head.height.min(cursor + self.config.batch_size);
        let blocks = self.client.fetch_blocks(cursor + 1, to).await?;

        let mut txs = Vec::new();
        let mut last_hash = None;
        let mut confirmed: Vec<(u64, String)> = Vec::new();
        for block in &blocks {
            for tx in &block.transactions {
                if let Err(e) = tx.validate_balance() {
                    warn!(chain = %self.client.chain(), tx_hash = %tx.tx_hash, error = %e, "dropping unbalanced transaction");
                    continue;
                }
                txs.push(tx.clone());
            }
            last_hash = Some(block.block_hash.clone());
            confirmed.push((block.height, block.block_hash.clone()));
        }

        if !txs.is_empty() {
            self.out
                .send(AnalysisTask::Transactions(txs))
                .await
                .map_err(|_| LedgerClientError::RequestFailed("analysis queue closed".to_string()))?;
        }
        let mut state = self.state.write().await;
        state.cursor = to;
        if let Some(hash) = last_hash {
            state.stored_hash = Some(hash);
        }
        state.recent.extend(confirmed);
        let floor = to.saturating_sub(self.config.reorg_max_depth);
        while state.recent.front().is_some_and(|(h, _)| *h < floor) {
            state.recent.pop_front();
        }
        Ok(true)
    }

    /// Walk backward through the tracked window to find the highest height
    /// whose upstream hash still matches what was recorded when it was
    /// confirmed — the nearest common ancestor of the reorg, per §4.1.
    /// Bounded by `reorg_max_depth` below `cursor`; if no match is found
    /// within the window, falls back to the depth floor.
    async fn find_ancestor(&self, cursor: u64, recent: &VecDeque<(u64, String)>) -> u64 {
        let floor = cursor.saturating_sub(self.config.reorg_max_depth);
        for (height, recorded_hash) in recent.iter().rev() {
            if *height >= cursor {
                continue;
            }
            if *height < floor {
                break;
            }
            match self.client.fetch_blocks(*height, *height).await {
                Ok(fetched) => {
                    if let Some(block) = fetched.first() {
                        if &block.block_hash == recorded_hash {
                            return *height;
                        }
                    }
                }
                Err(_) => break,
            }
        }
        floor
    }

    /// Handle a detected reorg: rewind the cursor to `ancestor` and emit
    /// orphan events for the heights being reprocessed.
    async fn rewind(&self, ancestor: u64, orphaned_heights: Vec<u64>) {
        let chain = self.client.chain().to_string();
        warn!(chain = %chain, ancestor, "reorg detected, rewinding cursor");
        let orphans: Vec<OrphanEvent> = orphaned_heights
            .into_iter()
            .map(|h| OrphanEvent { chain: chain.clone(), tx_hash: String::new(), block_height: h })
            .collect();
        let _ = self.out.send(AnalysisTask::Orphaned(orphans)).await;
        let mut state = self.state.write().await;
        state.cursor = ancestor;
        state.stored_hash = state.recent.iter().find(|(h, _)| *h == ancestor).map(|(_, hash)| hash.clone());
        state.recent.retain(|(h, _)| *h <= ancestor);
    }
}

/// Supervises one collector task per configured chain.
pub struct CollectorPool {
    config: CollectorConfig,
    clients: Vec<Arc<dyn LedgerClient>>,
    states: Arc<RwLock<HashMap<String, Arc<RwLock<CollectorState>>>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
    out: mpsc::Sender<AnalysisTask>,
}

impl CollectorPool {
    pub fn new(config: CollectorConfig, clients: Vec<Arc<dyn LedgerClient>>, out: mpsc::Sender<AnalysisTask>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        CollectorPool {
            config,
            clients,
            states: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
            handles: RwLock::new(Vec::new()),
            out,
        }
    }

    /// Begin all configured collectors. Idempotent: a second call is a
    /// no-op once collectors are already running.
    pub async fn start_all(&self) {
        let mut handles = self.handles.write().await;
        if !handles.is_empty() {
            return;
        }
        for client in &self.clients {
            let chain = client.chain().to_string();
            let state = Arc::new(RwLock::new(CollectorState {
                cursor: 0,
                stored_hash: None,
                recent: VecDeque::new(),
                consecutive_failures: 0,
                last_error: None,
                health: HealthState::Starting,
                head: 0,
            }));
            self.states.write().await.insert(chain.clone(), state.clone());

            let collector = Collector {
                client: client.clone(),
                config: self.config.clone(),
                state,
                out: self.out.clone(),
                shutdown: self.shutdown_rx.clone(),
            };
            info!(chain = %chain, "starting collector");
            handles.push(tokio::spawn(collector.run()));
        }
    }

    /// Request graceful cancellation of all collectors, waiting up to
    /// `grace` for them to drain before abandoning outstanding tasks.
    pub async fn stop_all(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.write().await;
        let drain = async {
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            error!("collector pool did not drain within grace period, abandoning");
        }
        for state in self.states.read().await.values() {
            state.write().await.health = HealthState::Stopped;
        }
    }

    pub async fn status(&self) -> Vec<CollectorStatus> {
        let states = self.states.read().await;
        let mut out = Vec::with_capacity(states.len());
        for (chain, state) in states.iter() {
            let s = state.read().await;
            out.push(CollectorStatus {
                chain: chain.clone(),
                cursor: s.cursor,
                last_error: s.last_error.clone(),
                lag: s.head.saturating_sub(s.cursor),
                health: s.health,
            });
        }
        out
    }
}
