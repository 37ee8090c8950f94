use crate::config::Config;
use crate::leaderboard::aggregator::format_display_amount;
use crate::models::{LeaderboardRow, LeaderboardSection, Snapshot};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub fn build_snapshot(config: &Config, unit_decimals: u8, rows: Vec<LeaderboardRow>) -> Snapshot {
    let total_deposits = rows.iter().map(|row| row.deposit_count).sum();
    let total_base_units: u128 = rows
        .iter()
        .filter_map(|row| row.total_base_units.parse::<u128>().ok())
        .sum();

    Snapshot {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        cluster: config.cluster.clone(),
        mint: config.token_mint.clone(),
        unit_decimals,
        total_deposited: format_display_amount(total_base_units, unit_decimals),
        total_deposits,
        error: None,
        leaderboard: LeaderboardSection {
            top: rows.first().cloned(),
            rows: rows.iter().skip(1).take(2).cloned().collect(),
            all: rows,
        },
    }
}

/// Same schema, empty leaderboard, populated error message. Written on any
/// run-fatal failure so consumers always find a parseable artifact.
pub fn error_snapshot(config: &Config, message: &str) -> Snapshot {
    let mut snapshot = build_snapshot(config, 0, Vec::new());
    snapshot.error = Some(message.to_string());
    snapshot
}

/// Write the artifact, creating missing output directories first.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            info!("Creating output directory {}", parent.display());
            fs::create_dir_all(parent)?;
        }
    }
    let body = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
