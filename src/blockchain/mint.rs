use crate::blockchain::extractor::AccountSource;
use crate::blockchain::models::TransactionRecord;
use tracing::warn;

/// Decimals for `mint` as recorded in a transaction's balance snapshots.
pub fn decimals_from_record(record: &TransactionRecord, mint: &str) -> Option<u8> {
    record
        .token_balances
        .values()
        .find(|entry| entry.mint == mint)
        .and_then(|entry| entry.decimals)
}

/// Fallback when no snapshot carried the decimals: read the mint account
/// itself. An unreadable mint degrades to raw base units (decimals = 0),
/// never a failed run.
pub async fn resolve_decimals<S: AccountSource>(source: &S, mint: &str) -> u8 {
    match source.mint_decimals(mint).await {
        Ok(Some(decimals)) => decimals,
        Ok(None) => {
            warn!(
                "Mint account {} not found or not a token mint; reporting raw base units",
                mint
            );
            0
        }
        Err(e) => {
            warn!(
                "Could not resolve decimals for {}: {}; reporting raw base units",
                mint, e
            );
            0
        }
    }
}
