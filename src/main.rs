use deposit_tally_service::blockchain::client::SolanaClient;
use deposit_tally_service::config::Config;
use deposit_tally_service::leaderboard::snapshot::{error_snapshot, write_snapshot};
use deposit_tally_service::pipeline;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Starting deposit tally for mint {} on {}",
        config.token_mint, config.cluster
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        // Leave a valid, parseable artifact behind even on a fatal start.
        let snapshot = error_snapshot(&config, &e.to_string());
        match write_snapshot(&config.output_path, &snapshot) {
            Ok(path) => error!("Wrote error state: {}", path.display()),
            Err(write_err) => error!("Failed to write error snapshot: {}", write_err),
        }
        std::process::exit(1);
    }

    let client = SolanaClient::new(&config);
    let snapshot = pipeline::run(&client, &config).await;

    match write_snapshot(&config.output_path, &snapshot) {
        Ok(path) => {
            if let Some(message) = &snapshot.error {
                error!("Run degraded: {}", message);
            }
            info!(
                "Total deposited: {} (decimals {})",
                snapshot.total_deposited, snapshot.unit_decimals
            );
            info!("Total deposits: {}", snapshot.total_deposits);
            info!("Total depositors: {}", snapshot.leaderboard.all.len());
            for (rank, row) in snapshot.leaderboard.all.iter().take(3).enumerate() {
                info!(
                    "  #{}: {} deposited {} over {} deposits",
                    rank + 1,
                    shorten(&row.owner),
                    row.display_amount,
                    row.deposit_count
                );
            }
            info!("Output: {}", path.display());
        }
        Err(e) => {
            error!("Failed to write snapshot: {}", e);
            std::process::exit(1);
        }
    }
}

fn shorten(wallet: &str) -> String {
    if wallet.len() > 12 {
        format!("{}...{}", &wallet[..6], &wallet[wallet.len() - 6..])
    } else {
        wallet.to_string()
    }
}
