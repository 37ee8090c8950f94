use crate::blockchain::client::ClientError;
use crate::blockchain::models::TransactionRecord;
use crate::config::Config;
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{info, warn};

/// Full-record retrieval, abstracted so batching semantics are testable
/// without a live RPC endpoint. `Ok(None)` means the transaction was fetched
/// but is unusable for extraction (failed on-chain, unsupported encoding).
#[allow(async_fn_in_trait)]
pub trait RecordSource {
    async fn fetch_record(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionRecord>, ClientError>;
}

#[derive(Debug)]
pub enum FetchOutcome {
    Record(TransactionRecord),
    /// Fetched, but nothing extractable.
    Skipped,
    NotFound,
    Failed,
}

/// Fetch records for the work set in fixed-size batches.
///
/// Fetches within a batch run concurrently; each outcome is captured
/// independently so one bad signature never aborts its batch. A fixed pacing
/// delay separates batches. Outcomes come back in input order, which keeps
/// the downstream fold stable.
pub async fn fetch_transactions<S: RecordSource>(
    source: &S,
    signatures: &[String],
    config: &Config,
) -> Vec<(String, FetchOutcome)> {
    let total = signatures.len();
    let batch_size = config.batch_size.max(1);
    let mut outcomes = Vec::with_capacity(total);

    for chunk in signatures.chunks(batch_size) {
        let fetches: Vec<_> = chunk
            .iter()
            .map(|signature| source.fetch_record(signature))
            .collect();

        for (signature, result) in chunk.iter().zip(join_all(fetches).await) {
            let outcome = match result {
                Ok(Some(record)) => FetchOutcome::Record(record),
                Ok(None) => FetchOutcome::Skipped,
                Err(ClientError::NotFound(_)) => FetchOutcome::NotFound,
                Err(e) => {
                    warn!("Failed to get transaction {}: {}", signature, e);
                    FetchOutcome::Failed
                }
            };
            outcomes.push((signature.clone(), outcome));
        }

        let processed = outcomes.len();
        if processed % 500 == 0 || processed == total {
            info!("  Processed {}/{} transactions", processed, total);
        }

        // Pacing between batches keeps us under the remote's implicit rate
        // limit.
        if processed < total {
            sleep(config.batch_delay).await;
        }
    }

    outcomes
}
