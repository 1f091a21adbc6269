use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{Network, DEFAULT_SLIPPAGE_BPS, MAX_SLIPPAGE_BPS};
use crate::execution::ExecutionConfig;
use crate::jupiter::{ensure_slippage_bounds, AggregatorConfig};
use crate::ports::{BroadcastOptions, Commitment};
use crate::risk::ImpactThresholds;

const REDACTED: &str = "***";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Chain
    pub network: Network,
    pub rpc_url: String,

    // Aggregator
    pub jupiter_endpoints: Vec<String>,
    pub jupiter_api_key: Option<String>,
    pub jupiter_price_url: Option<String>,
    pub aggregator_timeout_ms: u64,
    pub aggregator_max_attempts: usize,
    pub wrap_and_unwrap_sol: Option<bool>,
    pub dynamic_compute_unit_limit: Option<bool>,

    // Quoting
    pub slippage_bps: u16,
    pub max_slippage_bps: u16,
    pub debounce_ms: u64,
    pub quote_ttl_secs: u64,
    pub impact_medium_pct: f64,
    pub impact_high_pct: f64,

    // Execution
    pub commitment: Commitment,
    pub confirm_timeout_secs: u64,
    pub broadcast_max_retries: usize,
    pub skip_preflight: bool,

    // Keys
    pub sol_keypair_path: Option<String>,

    // Persistence
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub token_cache_path: String,
    pub token_api_url: String,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_str(get: Lookup, key: &str) -> Option<String> {
    get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_opt_bool(get: Lookup, key: &str) -> Option<bool> {
    match env_str(get, key)?.to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(get: Lookup, key: &str, default: bool) -> bool {
    env_opt_bool(get, key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(get: Lookup, key: &str) -> Option<T> {
    env_str(get, key).and_then(|x| x.parse().ok())
}

/// Read before the config so that config errors are logged in the chosen format.
pub fn log_json_enabled() -> bool {
    env_bool(&|k: &str| std::env::var(k).ok(), "TERMINAL_LOG_JSON", false)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|k: &str| std::env::var(k).ok())
    }

    pub fn from_lookup(get: Lookup) -> Result<Self> {
        // Chain
        let network: Network = match env_str(get, "TERMINAL_NETWORK") {
            Some(v) => v.parse().context("TERMINAL_NETWORK")?,
            None => Network::Mainnet,
        };
        let rpc_url = env_str(get, "TERMINAL_RPC_URL").unwrap_or_else(|| network.default_rpc_url().to_string());

        // Aggregator
        let jupiter_endpoints: Vec<String> = env_str(get, "JUPITER_ENDPOINTS")
            .or_else(|| env_str(get, "JUPITER_BASE_URL"))
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| AggregatorConfig::default().endpoints);
        if jupiter_endpoints.is_empty() {
            return Err(anyhow!("JUPITER_ENDPOINTS lists no endpoints"));
        }
        let jupiter_api_key = env_str(get, "JUPITER_API_KEY");
        let jupiter_price_url = env_str(get, "JUPITER_PRICE_URL");
        let aggregator_timeout_ms = env_parse::<u64>(get, "TERMINAL_AGGREGATOR_TIMEOUT_MS").unwrap_or(8_000);
        let aggregator_max_attempts =
            env_parse::<usize>(get, "TERMINAL_AGGREGATOR_MAX_ATTEMPTS").unwrap_or(jupiter_endpoints.len());
        let wrap_and_unwrap_sol = env_opt_bool(get, "TERMINAL_WRAP_UNWRAP_SOL");
        let dynamic_compute_unit_limit = env_opt_bool(get, "TERMINAL_DYNAMIC_COMPUTE_LIMIT");

        // Quoting
        let slippage_bps = env_parse::<u16>(get, "TERMINAL_SLIPPAGE_BPS").unwrap_or(DEFAULT_SLIPPAGE_BPS);
        let max_slippage_bps = env_parse::<u16>(get, "TERMINAL_MAX_SLIPPAGE_BPS").unwrap_or(MAX_SLIPPAGE_BPS);
        if max_slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(anyhow!("TERMINAL_MAX_SLIPPAGE_BPS cannot exceed {MAX_SLIPPAGE_BPS}"));
        }
        ensure_slippage_bounds(slippage_bps, max_slippage_bps).context("TERMINAL_SLIPPAGE_BPS")?;
        let debounce_ms = env_parse::<u64>(get, "TERMINAL_DEBOUNCE_MS").unwrap_or(450);
        let quote_ttl_secs = env_parse::<u64>(get, "TERMINAL_QUOTE_TTL_SECS").unwrap_or(60);
        let impact_medium_pct = env_parse::<f64>(get, "TERMINAL_IMPACT_MEDIUM_PCT").unwrap_or(1.0);
        let impact_high_pct = env_parse::<f64>(get, "TERMINAL_IMPACT_HIGH_PCT").unwrap_or(3.0);
        if !(impact_medium_pct >= 0.0 && impact_medium_pct <= impact_high_pct) {
            return Err(anyhow!("TERMINAL_IMPACT_MEDIUM_PCT must be between 0 and TERMINAL_IMPACT_HIGH_PCT"));
        }

        // Execution
        let commitment: Commitment = match env_str(get, "TERMINAL_COMMITMENT") {
            Some(v) => v.parse().context("TERMINAL_COMMITMENT")?,
            None => Commitment::Confirmed,
        };
        let confirm_timeout_secs = env_parse::<u64>(get, "TERMINAL_CONFIRM_TIMEOUT_SECS").unwrap_or(60);
        let broadcast_max_retries = env_parse::<usize>(get, "TERMINAL_BROADCAST_MAX_RETRIES").unwrap_or(2);
        let skip_preflight = env_bool(get, "TERMINAL_SKIP_PREFLIGHT", true);

        let sol_keypair_path = env_str(get, "SOL_KEYPAIR_PATH");

        // Persistence
        let supabase_url = env_str(get, "SUPABASE_URL");
        let supabase_anon_key = env_str(get, "SUPABASE_ANON_KEY");
        if supabase_url.is_some() != supabase_anon_key.is_some() {
            return Err(anyhow!("SUPABASE_URL and SUPABASE_ANON_KEY must be set together"));
        }
        let token_cache_path =
            env_str(get, "TERMINAL_TOKEN_CACHE_PATH").unwrap_or_else(|| "./token_cache.json".to_string());
        let token_api_url =
            env_str(get, "TOKEN_API_URL").unwrap_or_else(|| "https://lite-api.jup.ag/tokens/v1/token".to_string());

        Ok(Self {
            network,
            rpc_url,
            jupiter_endpoints,
            jupiter_api_key,
            jupiter_price_url,
            aggregator_timeout_ms,
            aggregator_max_attempts,
            wrap_and_unwrap_sol,
            dynamic_compute_unit_limit,
            slippage_bps,
            max_slippage_bps,
            debounce_ms,
            quote_ttl_secs,
            impact_medium_pct,
            impact_high_pct,
            commitment,
            confirm_timeout_secs,
            broadcast_max_retries,
            skip_preflight,
            sol_keypair_path,
            supabase_url,
            supabase_anon_key,
            token_cache_path,
            token_api_url,
        })
    }

    /// Copy safe to log.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.jupiter_api_key.is_some() {
            cfg.jupiter_api_key = Some(REDACTED.to_string());
        }
        if cfg.supabase_anon_key.is_some() {
            cfg.supabase_anon_key = Some(REDACTED.to_string());
        }
        cfg
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        let headers = self
            .jupiter_api_key
            .iter()
            .map(|key| ("x-api-key".to_string(), key.clone()))
            .collect();
        AggregatorConfig {
            endpoints: self.jupiter_endpoints.clone(),
            timeout_ms: self.aggregator_timeout_ms,
            max_attempts: self.aggregator_max_attempts,
            headers,
            price_url: self.jupiter_price_url.clone(),
            wrap_and_unwrap_sol: self.wrap_and_unwrap_sol,
            dynamic_compute_unit_limit: self.dynamic_compute_unit_limit,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            network: self.network,
            quote_ttl: Duration::from_secs(self.quote_ttl_secs),
            commitment: self.commitment,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
            broadcast: BroadcastOptions {
                skip_preflight: self.skip_preflight,
                max_retries: self.broadcast_max_retries,
            },
        }
    }

    pub fn impact_thresholds(&self) -> ImpactThresholds {
        ImpactThresholds { medium_pct: self.impact_medium_pct, high_pct: self.impact_high_pct }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
