// Configuration for a single tally run:
// - RPC endpoint and cluster label
// - monitored collection addresses and the tracked token mint
// - pagination / batching / retry tuning knobs
// - output artifact path

use crate::validation::{validate_solana_address, ValidationError};
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No monitored addresses configured (set MONITORED_ADDRESSES)")]
    NoMonitoredAddresses,

    #[error("Invalid monitored address: {0}")]
    InvalidMonitoredAddress(#[source] ValidationError),

    #[error("Invalid token mint: {0}")]
    InvalidTokenMint(#[source] ValidationError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub solana_rpc_url: String,
    pub cluster: String,
    pub solana_commitment_level: String,
    /// Collection accounts whose incoming deposits are tallied. Duplicates
    /// are tolerated; the pipeline deduplicates internally.
    pub monitored_addresses: Vec<String>,
    /// The token mint being tallied. Explicit configuration, never inferred.
    pub token_mint: String,
    pub signature_page_size: usize,
    pub max_pages_per_address: usize,
    pub max_total_signatures: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub rpc_timeout: Duration,
    pub rpc_retries: u32,
    pub rpc_rate_limit: Option<u32>,
    pub cache_ttl: Duration,
    pub cache_max_capacity: u64,
    pub output_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let solana_rpc_url = env::var("SOLANA_RPC_URL")
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());
        let cluster = env::var("SOLANA_CLUSTER").unwrap_or_else(|_| "mainnet-beta".to_string());
        let solana_commitment_level =
            env::var("SOLANA_COMMITMENT_LEVEL").unwrap_or_else(|_| "confirmed".to_string());
        let monitored_addresses = env::var("MONITORED_ADDRESSES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let token_mint = env::var("TOKEN_MINT").unwrap_or_default();
        let signature_page_size = env::var("SIGNATURE_PAGE_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        let max_pages_per_address = env::var("MAX_PAGES_PER_ADDRESS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let max_total_signatures = env::var("MAX_TOTAL_SIGNATURES")
            .unwrap_or_else(|_| "15000".to_string())
            .parse()
            .unwrap_or(15000);
        let batch_size = env::var("BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);
        let batch_delay = env::var("BATCH_DELAY_MS")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(100));
        let rpc_timeout = env::var("RPC_TIMEOUT_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(15));
        let rpc_retries = env::var("RPC_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let rpc_rate_limit = env::var("RPC_RATE_LIMIT")
            .map(|v| v.parse().ok())
            .unwrap_or(None);
        let cache_ttl = env::var("CACHE_TTL")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(600));
        let cache_max_capacity = env::var("CACHE_MAX_CAPACITY")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .unwrap_or(10000);
        let output_path = env::var("OUTPUT_PATH")
            .unwrap_or_else(|_| "public/leaderboard.json".to_string())
            .into();

        Self {
            solana_rpc_url,
            cluster,
            solana_commitment_level,
            monitored_addresses,
            token_mint,
            signature_page_size,
            max_pages_per_address,
            max_total_signatures,
            batch_size,
            batch_delay,
            rpc_timeout,
            rpc_retries,
            rpc_rate_limit,
            cache_ttl,
            cache_max_capacity,
            output_path,
        }
    }

    /// Fatal-configuration checks. Everything else in the pipeline degrades
    /// per item; a bad address list or mint aborts the whole run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitored_addresses.is_empty() {
            return Err(ConfigError::NoMonitoredAddresses);
        }
        for address in &self.monitored_addresses {
            validate_solana_address(address).map_err(ConfigError::InvalidMonitoredAddress)?;
        }
        validate_solana_address(&self.token_mint).map_err(ConfigError::InvalidTokenMint)?;
        Ok(())
    }
}
