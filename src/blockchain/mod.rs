pub mod client;
pub mod collector;
pub mod extractor;
pub mod fetcher;
pub mod mint;
pub mod models;

// Re-exports for convenience
pub use client::SolanaClient;
pub use models::TransactionRecord;
