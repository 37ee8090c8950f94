use crate::blockchain::collector::SignatureSource;
use crate::blockchain::extractor::AccountSource;
use crate::blockchain::fetcher::RecordSource;
use crate::blockchain::models::{normalize_record, TransactionRecord};
use crate::config::Config;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::future::Future;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Base delay for the linear retry backoff (`base * attempt`).
const BACKOFF_BASE_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid signature: {0}")]
    SignatureError(String),

    #[error("Invalid public key: {0}")]
    PubkeyError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote unavailable after {attempts} attempts ({operation}): {message}")]
    Unavailable {
        operation: String,
        attempts: u32,
        message: String,
    },
}

/// The one place timeout/retry policy lives. Every remote operation is
/// admitted through the optional rate limiter, raced against a fixed timeout,
/// and retried with linear backoff; callers only ever see success,
/// `NotFound`, or `Unavailable`.
pub struct SolanaClient {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
    timeout: Duration,
    retries: u32,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl SolanaClient {
    pub fn new(config: &Config) -> Self {
        let commitment = match config.solana_commitment_level.as_str() {
            "processed" => CommitmentConfig::processed(),
            "confirmed" => CommitmentConfig::confirmed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        };

        info!(
            "Initializing Solana client with RPC endpoint: {}, commitment: {:?}",
            config.solana_rpc_url, commitment
        );

        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.solana_rpc_url.clone(),
            config.rpc_timeout,
            commitment,
        ));

        let rate_limiter = config
            .rpc_rate_limit
            .and_then(NonZeroU32::new)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            rpc,
            commitment,
            timeout: config.rpc_timeout,
            retries: config.rpc_retries,
            rate_limiter,
        }
    }

    /// Get one page of signature history for an address, newest first,
    /// starting after the `before` cursor.
    pub async fn get_signature_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ClientError> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|_| ClientError::PubkeyError(address.to_string()))?;

        let before_sig = match before {
            Some(sig) => Some(
                Signature::from_str(sig)
                    .map_err(|_| ClientError::SignatureError(sig.to_string()))?,
            ),
            None => None,
        };

        let commitment = self.commitment;
        let statuses = self
            .call_with_retry("getSignaturesForAddress", || {
                let rpc = Arc::clone(&self.rpc);
                async move {
                    rpc.get_signatures_for_address_with_config(
                        &pubkey,
                        GetConfirmedSignaturesForAddress2Config {
                            before: before_sig,
                            until: None,
                            limit: Some(limit),
                            commitment: Some(commitment),
                        },
                    )
                    .await
                }
            })
            .await?;

        Ok(statuses.into_iter().map(|status| status.signature).collect())
    }

    /// Get the full transaction record for a signature, in parsed encoding.
    pub async fn get_transaction(
        &self,
        signature_str: &str,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta, ClientError> {
        let signature = Signature::from_str(signature_str)
            .map_err(|_| ClientError::SignatureError(signature_str.to_string()))?;

        let commitment = self.commitment;
        self.call_with_retry("getTransaction", || {
            let rpc = Arc::clone(&self.rpc);
            async move {
                rpc.get_transaction_with_config(
                    &signature,
                    RpcTransactionConfig {
                        encoding: Some(UiTransactionEncoding::JsonParsed),
                        commitment: Some(commitment),
                        max_supported_transaction_version: Some(0),
                    },
                )
                .await
            }
        })
        .await
    }

    /// Get raw account data; a missing account is a normal negative result.
    pub async fn get_account(&self, address: &str) -> Result<Option<Account>, ClientError> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|_| ClientError::PubkeyError(address.to_string()))?;

        let result = self
            .call_with_retry("getAccountInfo", || {
                let rpc = Arc::clone(&self.rpc);
                async move { rpc.get_account(&pubkey).await }
            })
            .await;

        match result {
            Ok(account) => Ok(Some(account)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn call_with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, solana_client::client_error::ClientError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let failure = match timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if is_not_found_message(&e.to_string()) => {
                    return Err(ClientError::NotFound(format!("{}: {}", operation, e)));
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            if attempt > self.retries {
                return Err(ClientError::Unavailable {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }

            warn!("  Retry {}/{} for {}: {}", attempt, self.retries, operation, failure);
            sleep(backoff_delay(attempt)).await;
        }
    }
}

impl SignatureSource for SolanaClient {
    async fn signature_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ClientError> {
        self.get_signature_page(address, before, limit).await
    }
}

impl RecordSource for SolanaClient {
    async fn fetch_record(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionRecord>, ClientError> {
        let encoded = self.get_transaction(signature).await?;
        match normalize_record(signature, &encoded) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!("Skipping transaction {}: {}", signature, e);
                Ok(None)
            }
        }
    }
}

impl AccountSource for SolanaClient {
    async fn token_account_owner(&self, address: &str) -> Result<Option<String>, ClientError> {
        let Some(account) = self.get_account(address).await? else {
            return Ok(None);
        };
        Ok(spl_token::state::Account::unpack_from_slice(&account.data)
            .ok()
            .map(|token_account| token_account.owner.to_string()))
    }

    async fn mint_decimals(&self, mint: &str) -> Result<Option<u8>, ClientError> {
        let Some(account) = self.get_account(mint).await? else {
            return Ok(None);
        };
        Ok(spl_token::state::Mint::unpack_from_slice(&account.data)
            .ok()
            .map(|mint_account| mint_account.decimals))
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * attempt as u64)
}

fn is_not_found_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("not found") || message.contains("accountnotfound")
}
