pub mod blockchain;
pub mod cache;
pub mod config;
pub mod leaderboard;
pub mod models;
pub mod pipeline;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use blockchain::client::SolanaClient;
pub use blockchain::models::TransactionRecord;
pub use config::Config;
pub use leaderboard::aggregator::DepositLedger;
pub use models::{DepositEvent, LeaderboardRow, Snapshot};
pub use validation::validate_solana_address;
