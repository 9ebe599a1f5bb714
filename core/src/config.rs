//! Environment-driven configuration, loaded once at process start and
//! shared behind an `Arc`. Every "recognised options ENUMERATED" list
//! from the external-interfaces section has a field here.

use std::collections::HashMap;
use std::time::Duration;

fn env_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: String,
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub batch_size: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub degraded_after_failures: u32,
    pub reorg_max_depth: u64,
}

#[derive(Debug, Clone)]
pub struct RiskEngineConfig {
    pub label_weights: HashMap<String, f64>,
    pub pattern_weights: HashMap<String, f64>,
    pub counterparty_decay: f64,
    pub counterparty_max_hops: u32,
    pub min_confidence: f64,
    pub score_clamp: f64,
    pub assessment_epsilon: f64,
}

#[derive(Debug, Clone)]
pub struct PatternDetectorConfig {
    pub peeling_min_hops: u32,
    pub rapid_movement_max_seconds: u64,
    pub rapid_movement_min_hops: u32,
    pub bridge_window_seconds: u64,
    pub sanctions_touch_max_hops: u32,
}

#[derive(Debug, Clone)]
pub struct EvidenceVaultConfig {
    pub root_path: String,
    pub backup_root: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sanctions_sync_interval: Duration,
    pub label_sync_interval: Duration,
    pub retention_cleanup_interval: Duration,
    pub warmup_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookDispatchConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiry: Duration,
    pub trusted_proxy: bool,
    pub chains: Vec<ChainConfig>,
    pub collector: CollectorConfig,
    pub risk_engine: RiskEngineConfig,
    pub pattern_detector: PatternDetectorConfig,
    pub evidence_vault: EvidenceVaultConfig,
    pub scheduler: SchedulerConfig,
    pub webhook_dispatch: WebhookDispatchConfig,
}

impl AppConfig {
    /// Load configuration from the process environment, falling back to
    /// development-friendly defaults for anything unset.
    pub fn from_env() -> Self {
        let chains = env_var("CHAINWATCH_CHAINS", "btc,eth")
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|chain| {
                let upper = chain.to_uppercase();
                ChainConfig {
                    chain: chain.to_string(),
                    endpoint: env_var(
                        &format!("CHAINWATCH_{}_ENDPOINT", upper),
                        &format!("http://localhost:8545/{}", chain),
                    ),
                    api_key: std::env::var(format!("CHAINWATCH_{}_API_KEY", upper)).ok(),
                }
            })
            .collect();

        let mut label_weights = HashMap::new();
        label_weights.insert("sanctions_list".to_string(), env_f64("CHAINWATCH_RISK_WEIGHT_SANCTIONS", 1.0));
        label_weights.insert("known_service_registry".to_string(), env_f64("CHAINWATCH_RISK_WEIGHT_SERVICE", 0.2));
        label_weights.insert("threat_feed".to_string(), env_f64("CHAINWATCH_RISK_WEIGHT_THREAT_FEED", 0.5));

        let mut pattern_weights = HashMap::new();
        pattern_weights.insert("peeling_chain".to_string(), 0.3);
        pattern_weights.insert("mixer_interaction".to_string(), 0.6);
        pattern_weights.insert("rapid_movement".to_string(), 0.25);
        pattern_weights.insert("layering".to_string(), 0.4);
        pattern_weights.insert("bridge_hop".to_string(), 0.2);
        pattern_weights.insert("sanctions_touch".to_string(), 1.0);

        AppConfig {
            bind_addr: env_var("CHAINWATCH_BIND_ADDR", "0.0.0.0:8088"),
            database_url: env_var("CHAINWATCH_DATABASE_URL", "sqlite::memory:"),
            jwt_secret: env_var("CHAINWATCH_JWT_SECRET", "dev-secret-change-me"),
            jwt_expiry: Duration::from_secs(env_u64("CHAINWATCH_JWT_EXPIRY_SECS", 3600)),
            trusted_proxy: env_var("CHAINWATCH_TRUSTED_PROXY", "false") == "true",
            chains,
            collector: CollectorConfig {
                batch_size: env_u64("CHAINWATCH_COLLECTOR_BATCH_SIZE", 50),
                backoff_base_ms: env_u64("CHAINWATCH_COLLECTOR_BACKOFF_BASE_MS", 500),
                backoff_cap_ms: env_u64("CHAINWATCH_COLLECTOR_BACKOFF_CAP_MS", 60_000),
                degraded_after_failures: env_u32("CHAINWATCH_COLLECTOR_DEGRADED_AFTER", 5),
                reorg_max_depth: env_u64("CHAINWATCH_COLLECTOR_REORG_MAX_DEPTH", 100),
            },
            risk_engine: RiskEngineConfig {
                label_weights,
                pattern_weights,
                counterparty_decay: env_f64("CHAINWATCH_RISK_COUNTERPARTY_DECAY", 0.5),
                counterparty_max_hops: env_u32("CHAINWATCH_RISK_MAX_HOPS", 2),
                min_confidence: env_f64("CHAINWATCH_RISK_MIN_CONFIDENCE", 0.0),
                score_clamp: env_f64("CHAINWATCH_RISK_SCORE_CLAMP", 1.0),
                assessment_epsilon: env_f64("CHAINWATCH_RISK_ASSESSMENT_EPSILON", 0.05),
            },
            pattern_detector: PatternDetectorConfig {
                peeling_min_hops: env_u32("CHAINWATCH_PATTERN_PEELING_MIN_HOPS", 4),
                rapid_movement_max_seconds: env_u64("CHAINWATCH_PATTERN_RAPID_MAX_SECONDS", 600),
                rapid_movement_min_hops: env_u32("CHAINWATCH_PATTERN_RAPID_MIN_HOPS", 3),
                bridge_window_seconds: env_u64("CHAINWATCH_PATTERN_BRIDGE_WINDOW_SECONDS", 3600),
                sanctions_touch_max_hops: env_u32("CHAINWATCH_PATTERN_SANCTIONS_MAX_HOPS", 2),
            },
            evidence_vault: EvidenceVaultConfig {
                root_path: env_var("CHAINWATCH_EVIDENCE_ROOT", "./data/evidence"),
                backup_root: std::env::var("CHAINWATCH_EVIDENCE_BACKUP_ROOT").ok(),
            },
            scheduler: SchedulerConfig {
                sanctions_sync_interval: Duration::from_secs(env_u64("CHAINWATCH_SCHEDULER_SANCTIONS_SECS", 6 * 3600)),
                label_sync_interval: Duration::from_secs(env_u64("CHAINWATCH_SCHEDULER_LABEL_SECS", 24 * 3600)),
                retention_cleanup_interval: Duration::from_secs(env_u64("CHAINWATCH_SCHEDULER_RETENTION_SECS", 24 * 3600)),
                warmup_delay: Duration::from_secs(env_u64("CHAINWATCH_SCHEDULER_WARMUP_SECS", 30)),
            },
            webhook_dispatch: WebhookDispatchConfig {
                request_timeout: Duration::from_secs(env_u64("CHAINWATCH_WEBHOOK_TIMEOUT_SECS", 30)),
                max_retries: env_u32("CHAINWATCH_WEBHOOK_MAX_RETRIES", 3),
                retry_backoff_base_ms: env_u64("CHAINWATCH_WEBHOOK_RETRY_BASE_MS", 500),
            },
        }
    }
}
