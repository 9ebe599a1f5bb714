// Ledger Access Clients
// Per-chain adapters over external ledger data sources.

//! # Ledger Clients
//!
//! A `LedgerClient` submits queries to a chain's upstream data source (a
//! node RPC endpoint, an indexer API, ...) and returns normalised blocks,
//! transactions and balances. The collector pool is the only consumer; it
//! never talks to a ledger endpoint directly, so a chain can be onboarded
//! or a fixture substituted in tests without touching collector logic.

use async_trait::async_trait;
use protocols::{AddressKey, LedgerTransaction};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerClientError {
    #[error("upstream request failed: {0}")]
    RequestFailed(String),
    #[error("upstream returned malformed data: {0}")]
    MalformedResponse(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

/// The current chain tip, as reported by the upstream data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub height: u64,
    pub block_hash: String,
}

/// A fetched, normalised block: height, canonical hash, and the
/// transactions it contains in intra-block order.
#[derive(Debug, Clone)]
pub struct NormalizedBlock {
    pub height: u64,
    pub block_hash: String,
    pub transactions: Vec<LedgerTransaction>,
}

/// Submits queries to one chain's ledger data source. Implementations
/// are expected to be cheap to clone (an HTTP client inside is already
/// an `Arc`) so the collector pool can hold one per configured chain.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn chain(&self) -> &str;

    /// Current head height and block hash.
    async fn current_head(&self) -> Result<ChainHead, LedgerClientError>;

    /// Fetch and normalise blocks `[from, to]` inclusive. Callers are
    /// responsible for bounding the range to the collector's configured
    /// batch size.
    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<NormalizedBlock>, LedgerClientError>;

    /// Current balance per asset for an address, used by on-demand
    /// lookups outside the main collector loop (e.g. case enrichment).
    async fn get_balance(&self, address: &AddressKey) -> Result<HashMap<String, String>, LedgerClientError>;
}

/// HTTP configuration for one chain's upstream endpoint.
#[derive(Debug, Clone)]
pub struct HttpLedgerClientConfig {
    pub chain: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

/// A `LedgerClient` backed by a JSON HTTP API. The request/response
/// shapes are left to each chain's actual indexer API in a real
/// deployment; this adapter owns only the transport and normalisation
/// boundary.
pub struct HttpLedgerClient {
    config: HttpLedgerClientConfig,
    http: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(config: HttpLedgerClientConfig) -> Result<Self, LedgerClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LedgerClientError::RequestFailed(e.to_string()))?;
        Ok(HttpLedgerClient { config, http })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[derive(serde::Deserialize)]
struct HeadResponse {
    height: u64,
    block_hash: String,
}

#[derive(serde::Deserialize)]
struct RawBlock {
    height: u64,
    block_hash: String,
    transactions: Vec<LedgerTransaction>,
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn chain(&self) -> &str {
        &self.config.chain
    }

    async fn current_head(&self) -> Result<ChainHead, LedgerClientError> {
        let url = format!("{}/head", self.config.endpoint);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| LedgerClientError::RequestFailed(e.to_string()))?;

        let body: HeadResponse = resp
            .json()
            .await
            .map_err(|e| LedgerClientError::MalformedResponse(e.to_string()))?;

        Ok(ChainHead {
            height: body.height,
            block_hash: body.block_hash,
        })
    }

    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<NormalizedBlock>, LedgerClientError> {
        let url = format!("{}/blocks?from={}&to={}", self.config.endpoint, from, to);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| LedgerClientError::RequestFailed(e.to_string()))?;

        let raw: Vec<RawBlock> = resp
            .json()
            .await
            .map_err(|e| LedgerClientError::MalformedResponse(e.to_string()))?;

        Ok(raw
            .into_iter()
            .map(|b| NormalizedBlock {
                height: b.height,
                block_hash: b.block_hash,
                transactions: b.transactions,
            })
            .collect())
    }

    async fn get_balance(&self, address: &AddressKey) -> Result<HashMap<String, String>, LedgerClientError> {
        let url = format!("{}/balance/{}", self.config.endpoint, address.address);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| LedgerClientError::RequestFailed(e.to_string()))?;

        resp.json()
            .await
            .map_err(|e| LedgerClientError::MalformedResponse(e.to_string()))
    }
}

/// An in-memory `LedgerClient` for collector tests: blocks are
/// registered up front and served back without any network I/O,
/// including forced error injection for backoff tests.
pub struct MockLedgerClient {
    chain: String,
    blocks: tokio::sync::Mutex<Vec<NormalizedBlock>>,
    fail_next_fetch: tokio::sync::Mutex<bool>,
}

impl MockLedgerClient {
    pub fn new(chain: impl Into<String>) -> Self {
        MockLedgerClient {
            chain: chain.into(),
            blocks: tokio::sync::Mutex::new(Vec::new()),
            fail_next_fetch: tokio::sync::Mutex::new(false),
        }
    }

    pub async fn push_block(&self, block: NormalizedBlock) {
        self.blocks.lock().await.push(block);
    }

    pub async fn fail_next_fetch(&self) {
        *self.fail_next_fetch.lock().await = true;
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn current_head(&self) -> Result<ChainHead, LedgerClientError> {
        let blocks = self.blocks.lock().await;
        match blocks.last() {
            Some(b) => Ok(ChainHead {
                height: b.height,
                block_hash: b.block_hash.clone(),
            }),
            None => Ok(ChainHead {
                height: 0,
                block_hash: "genesis".to_string(),
            }),
        }
    }

    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<NormalizedBlock>, LedgerClientError> {
        let mut should_fail = self.fail_next_fetch.lock().await;
        if *should_fail {
            *should_fail = false;
            return Err(LedgerClientError::RequestFailed("injected failure".to_string()));
        }
        drop(should_fail);
        let blocks = self.blocks.lock().await;
        // Re-pushing a height models a fork replacing that block; the
        // most recently pushed entry for a height wins.
        let mut by_height: HashMap<u64, NormalizedBlock> = HashMap::new();
        for block in blocks.iter().filter(|b| b.height >= from && b.height <= to) {
            by_height.insert(block.height, block.clone());
        }
        let mut result: Vec<NormalizedBlock> = by_height.into_values().collect();
        result.sort_by_key(|b| b.height);
        Ok(result)
    }

    async fn get_balance(&self, _address: &AddressKey) -> Result<HashMap<String, String>, LedgerClientError> {
        Ok(HashMap::new())
    }
}
