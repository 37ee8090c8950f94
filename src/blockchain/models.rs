//! Canonical transaction shape produced at the ingestion boundary.
//!
//! All source-specific naming and encoding variance is absorbed here, in one
//! normalization step; downstream extraction logic never touches RPC types.

use serde_json::Value;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInnerInstructions,
    UiInstruction, UiMessage, UiParsedInstruction, UiTransactionTokenBalance,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Transaction record missing expected fields: {0}")]
    Malformed(String),

    #[error("Transaction failed on-chain")]
    Failed,
}

/// Pre/post token balance for one account index, amounts as exact integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceEntry {
    pub mint: String,
    pub owner: Option<String>,
    pub pre_amount: u128,
    pub post_amount: u128,
    pub decimals: Option<u8>,
}

impl TokenBalanceEntry {
    pub fn delta(&self) -> i128 {
        self.post_amount as i128 - self.pre_amount as i128
    }
}

/// One parsed instruction, top-level or inner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionView {
    pub program: String,
    pub program_id: String,
    /// Decoded arguments: `{ "type": ..., "info": {...} }`.
    pub parsed: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub signature: String,
    pub account_keys: Vec<String>,
    /// Token balance entries keyed by index into `account_keys`.
    pub token_balances: BTreeMap<u8, TokenBalanceEntry>,
    /// Parsed top-level and inner instructions, flattened in execution order.
    pub instructions: Vec<InstructionView>,
}

impl TransactionRecord {
    pub fn key_index(&self, address: &str) -> Option<u8> {
        self.account_keys
            .iter()
            .position(|key| key == address)
            .and_then(|index| u8::try_from(index).ok())
    }

    /// Balance entry for an account referenced by address rather than index.
    pub fn balance_for_address(&self, address: &str) -> Option<&TokenBalanceEntry> {
        self.key_index(address)
            .and_then(|index| self.token_balances.get(&index))
    }
}

/// Normalize an encoded transaction into the canonical record.
///
/// Failed transactions move no token value and are rejected here; a record
/// with an unsupported encoding or missing metadata is rejected as malformed.
/// Both are local, skippable conditions for the caller.
pub fn normalize_record(
    signature: &str,
    tx_data: &EncodedConfirmedTransactionWithStatusMeta,
) -> Result<TransactionRecord, RecordError> {
    let meta = tx_data
        .transaction
        .meta
        .as_ref()
        .ok_or_else(|| RecordError::Malformed("no metadata".to_string()))?;
    if meta.err.is_some() {
        return Err(RecordError::Failed);
    }

    let transaction = match &tx_data.transaction.transaction {
        EncodedTransaction::Json(tx) => tx,
        _ => return Err(RecordError::Malformed("unsupported encoding".to_string())),
    };

    let (account_keys, mut instructions) = match &transaction.message {
        UiMessage::Parsed(message) => (
            message
                .account_keys
                .iter()
                .map(|key| key.pubkey.clone())
                .collect::<Vec<_>>(),
            collect_parsed(&message.instructions),
        ),
        // Raw messages still carry account keys and balance metadata; only
        // the instruction view is unavailable.
        UiMessage::Raw(message) => (message.account_keys.clone(), Vec::new()),
    };

    if account_keys.is_empty() {
        return Err(RecordError::Malformed("no account keys".to_string()));
    }

    let mut token_balances: BTreeMap<u8, TokenBalanceEntry> = BTreeMap::new();

    let pre_balances: Vec<UiTransactionTokenBalance> =
        Option::from(meta.pre_token_balances.clone()).unwrap_or_default();
    for balance in &pre_balances {
        // Amounts that cannot be parsed as integers are dropped, not fatal.
        let Some(amount) = parse_base_units(&balance.ui_token_amount.amount) else {
            continue;
        };
        token_balances.insert(
            balance.account_index,
            TokenBalanceEntry {
                mint: balance.mint.clone(),
                owner: Option::from(balance.owner.clone()),
                pre_amount: amount,
                post_amount: 0,
                decimals: Some(balance.ui_token_amount.decimals),
            },
        );
    }

    let post_balances: Vec<UiTransactionTokenBalance> =
        Option::from(meta.post_token_balances.clone()).unwrap_or_default();
    for balance in &post_balances {
        let Some(amount) = parse_base_units(&balance.ui_token_amount.amount) else {
            continue;
        };
        let entry = token_balances
            .entry(balance.account_index)
            .or_insert_with(|| TokenBalanceEntry {
                mint: balance.mint.clone(),
                owner: Option::from(balance.owner.clone()),
                pre_amount: 0,
                post_amount: 0,
                decimals: Some(balance.ui_token_amount.decimals),
            });
        entry.post_amount = amount;
        if entry.owner.is_none() {
            entry.owner = Option::from(balance.owner.clone());
        }
    }

    let inner_groups: Vec<UiInnerInstructions> =
        Option::from(meta.inner_instructions.clone()).unwrap_or_default();
    for group in &inner_groups {
        instructions.extend(collect_parsed(&group.instructions));
    }

    Ok(TransactionRecord {
        signature: signature.to_string(),
        account_keys,
        token_balances,
        instructions,
    })
}

fn collect_parsed(instructions: &[UiInstruction]) -> Vec<InstructionView> {
    instructions
        .iter()
        .filter_map(|instruction| match instruction {
            UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) => Some(InstructionView {
                program: parsed.program.clone(),
                program_id: parsed.program_id.clone(),
                parsed: parsed.parsed.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn parse_base_units(amount: &str) -> Option<u128> {
    amount.parse::<u128>().ok()
}
