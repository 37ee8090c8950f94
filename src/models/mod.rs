// Core data model: deposit events produced by the extractor and the
// leaderboard/snapshot shapes written to the output artifact.

use serde::{Deserialize, Serialize};

/// Owner bucket used when a depositor cannot be attributed.
pub const UNKNOWN_OWNER: &str = "unknown";

/// One detected transfer of token value into a monitored collection account.
/// Produced by the extractor and folded immediately into the ledger; never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    /// The monitored identity that received the deposit (owner of the
    /// receiving token account, or the raw account key when no owner is
    /// recorded).
    pub fee_account: String,
    pub mint: String,
    pub amount_base_units: u128,
    /// Depositing party, if it could be attributed.
    pub source_owner: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub owner: String,
    /// Exact cumulative total in base units, as a decimal string. Base-unit
    /// totals routinely exceed what an f64 can represent exactly.
    pub total_base_units: String,
    /// Total scaled by the mint decimals, as an exact decimal string.
    pub display_amount: String,
    pub deposit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardSection {
    pub top: Option<LeaderboardRow>,
    pub rows: Vec<LeaderboardRow>,
    pub all: Vec<LeaderboardRow>,
}

/// The output artifact. The same schema is written on every run; degraded runs
/// carry an empty leaderboard and a populated `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generated_at: String,
    pub cluster: String,
    pub mint: String,
    pub unit_decimals: u8,
    pub total_deposited: String,
    pub total_deposits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub leaderboard: LeaderboardSection,
}
