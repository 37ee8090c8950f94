use crate::models::{DepositEvent, LeaderboardRow, UNKNOWN_OWNER};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DepositTotal {
    base_units: u128,
    deposits: u64,
}

/// Single-writer accumulator for the fold step.
///
/// Exact integer arithmetic only: base-unit totals routinely exceed the range
/// an f64 can represent exactly, so floating point never touches them.
#[derive(Debug, Default)]
pub struct DepositLedger {
    totals: HashMap<String, DepositTotal>,
}

impl DepositLedger {
    pub fn record(&mut self, event: &DepositEvent) {
        let owner = event
            .source_owner
            .clone()
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string());
        let total = self.totals.entry(owner).or_default();
        total.base_units += event.amount_base_units;
        total.deposits += 1;
    }

    pub fn depositor_count(&self) -> usize {
        self.totals.len()
    }

    pub fn total_base_units(&self) -> u128 {
        self.totals.values().map(|total| total.base_units).sum()
    }

    pub fn total_deposits(&self) -> u64 {
        self.totals.values().map(|total| total.deposits).sum()
    }

    /// Ranked rows: totals descending, owner ascending between equals so the
    /// output is deterministic regardless of map iteration order.
    pub fn into_rows(self, decimals: u8) -> Vec<LeaderboardRow> {
        let mut entries: Vec<(String, DepositTotal)> = self.totals.into_iter().collect();
        entries.sort_by(|a, b| {
            b.1.base_units
                .cmp(&a.1.base_units)
                .then_with(|| a.0.cmp(&b.0))
        });
        entries
            .into_iter()
            .map(|(owner, total)| LeaderboardRow {
                owner,
                total_base_units: total.base_units.to_string(),
                display_amount: format_display_amount(total.base_units, decimals),
                deposit_count: total.deposits,
            })
            .collect()
    }
}

/// Exact integer division plus a zero-padded truncated remainder.
pub fn format_display_amount(base_units: u128, decimals: u8) -> String {
    let Some(scale) = 10u128.checked_pow(decimals as u32) else {
        return base_units.to_string();
    };
    if scale == 1 {
        return base_units.to_string();
    }
    let whole = base_units / scale;
    let fraction = base_units % scale;
    format!("{}.{:0width$}", whole, fraction, width = decimals as usize)
}
