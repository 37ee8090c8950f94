//! One full tally run: collect -> fetch -> extract/fold -> rank -> snapshot.
//!
//! Per-item failures degrade locally inside their component; the returned
//! snapshot is always valid. Generic over the remote-source seams so the
//! whole pipeline runs against fixtures in tests.

use crate::blockchain::collector::{collect_signatures, SignatureSource};
use crate::blockchain::extractor::{AccountSource, DepositExtractor};
use crate::blockchain::fetcher::{fetch_transactions, FetchOutcome, RecordSource};
use crate::blockchain::mint;
use crate::cache::init_owner_cache;
use crate::config::Config;
use crate::leaderboard::aggregator::DepositLedger;
use crate::leaderboard::snapshot::{build_snapshot, error_snapshot};
use crate::models::Snapshot;
use std::collections::HashSet;
use tracing::{info, warn};

pub async fn run<S>(source: &S, config: &Config) -> Snapshot
where
    S: SignatureSource + RecordSource + AccountSource,
{
    info!(
        "Collecting deposit transactions for {} monitored addresses",
        config.monitored_addresses.len()
    );

    let collected = collect_signatures(source, config).await;
    if collected.signatures.is_empty() {
        if collected.failed_addresses > 0 {
            warn!("Signature history unavailable for every monitored address");
            return error_snapshot(
                config,
                "signature history unavailable for all monitored addresses",
            );
        }
        info!("No signatures found; writing empty leaderboard");
        let unit_decimals = mint::resolve_decimals(source, &config.token_mint).await;
        return build_snapshot(config, unit_decimals, Vec::new());
    }

    info!("Processing {} unique transactions", collected.signatures.len());
    let outcomes = fetch_transactions(source, &collected.signatures, config).await;

    let monitored: HashSet<String> = config.monitored_addresses.iter().cloned().collect();
    let extractor = DepositExtractor::new(
        source,
        &monitored,
        &config.token_mint,
        init_owner_cache(config),
    );

    let mut ledger = DepositLedger::default();
    let mut unit_decimals: Option<u8> = None;
    let mut inspected = 0usize;
    let mut skipped = 0usize;

    // Stable reduction pass: outcomes are in input order, so the resulting
    // leaderboard does not depend on fetch completion order.
    for (_, outcome) in &outcomes {
        match outcome {
            FetchOutcome::Record(record) => {
                inspected += 1;
                if unit_decimals.is_none() {
                    unit_decimals = mint::decimals_from_record(record, &config.token_mint);
                }
                let events = extractor.extract(record).await;
                if events.is_empty() {
                    skipped += 1;
                }
                for event in &events {
                    ledger.record(event);
                }
            }
            FetchOutcome::Skipped | FetchOutcome::NotFound | FetchOutcome::Failed => {
                skipped += 1;
            }
        }
    }

    let unit_decimals = match unit_decimals {
        Some(decimals) => decimals,
        None => mint::resolve_decimals(source, &config.token_mint).await,
    };

    info!(
        "Found {} depositors across {} deposits ({} records inspected, {} skipped)",
        ledger.depositor_count(),
        ledger.total_deposits(),
        inspected,
        skipped
    );

    let rows = ledger.into_rows(unit_decimals);
    build_snapshot(config, unit_decimals, rows)
}
