//! Deposit extraction: one transaction record in, zero or more deposit
//! events out.
//!
//! Two strategies, tried in order; the first to yield anything wins and the
//! result sets are never merged. Balance deltas are authoritative when the
//! snapshots are present; the instruction walk only covers records that carry
//! no usable snapshot.

use crate::blockchain::client::ClientError;
use crate::blockchain::models::{parse_base_units, TokenBalanceEntry, TransactionRecord};
use crate::cache::OwnerCache;
use crate::models::DepositEvent;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Account-info lookups used when balance snapshots don't carry the data:
/// token-account owner resolution and mint metadata.
#[allow(async_fn_in_trait)]
pub trait AccountSource {
    async fn token_account_owner(&self, address: &str) -> Result<Option<String>, ClientError>;

    async fn mint_decimals(&self, mint: &str) -> Result<Option<u8>, ClientError>;
}

const TRANSFER_INSTRUCTIONS: [&str; 4] = ["transfer", "transferChecked", "mintTo", "mintToChecked"];

pub struct DepositExtractor<'a, S> {
    source: &'a S,
    monitored: &'a HashSet<String>,
    mint: &'a str,
    owner_cache: OwnerCache,
}

impl<'a, S: AccountSource> DepositExtractor<'a, S> {
    pub fn new(
        source: &'a S,
        monitored: &'a HashSet<String>,
        mint: &'a str,
        owner_cache: OwnerCache,
    ) -> Self {
        Self {
            source,
            monitored,
            mint,
            owner_cache,
        }
    }

    pub async fn extract(&self, record: &TransactionRecord) -> Vec<DepositEvent> {
        let events = self.balance_delta_deposits(record);
        if !events.is_empty() {
            return events;
        }
        self.instruction_deposits(record).await
    }

    /// Preferred strategy: pair positive balance deltas on monitored accounts
    /// with negative deltas elsewhere in the same record.
    ///
    /// Each depleted non-monitored account contributes one event carrying the
    /// exact magnitude of its loss, so the event stream conserves the value
    /// that arrived at the monitored side.
    fn balance_delta_deposits(&self, record: &TransactionRecord) -> Vec<DepositEvent> {
        let mut fee_account: Option<String> = None;
        let mut received: u128 = 0;
        for (index, entry) in &record.token_balances {
            if entry.mint != self.mint {
                continue;
            }
            let Some(identity) = self.monitored_identity(record, *index, entry) else {
                continue;
            };
            let delta = entry.delta();
            if delta <= 0 {
                continue;
            }
            received += delta.unsigned_abs();
            if fee_account.is_none() {
                fee_account = Some(identity);
            }
        }
        let Some(fee_account) = fee_account else {
            return Vec::new();
        };
        debug!(
            "{}: monitored accounts received {} base units",
            record.signature, received
        );

        let mut events = Vec::new();
        for (index, entry) in &record.token_balances {
            if entry.mint != self.mint {
                continue;
            }
            // Monitored-to-monitored movement is an internal shuffle, not a
            // deposit.
            if self.monitored_identity(record, *index, entry).is_some() {
                continue;
            }
            let delta = entry.delta();
            if delta >= 0 {
                continue;
            }
            let source_owner = entry
                .owner
                .clone()
                .or_else(|| record.account_keys.get(*index as usize).cloned());
            events.push(DepositEvent {
                fee_account: fee_account.clone(),
                mint: self.mint.to_string(),
                amount_base_units: delta.unsigned_abs(),
                source_owner,
                signature: record.signature.clone(),
            });
        }
        events
    }

    /// Fallback strategy: walk the flattened parsed instructions for
    /// transfer-like operations landing on a monitored address.
    async fn instruction_deposits(&self, record: &TransactionRecord) -> Vec<DepositEvent> {
        let token_program = spl_token::ID.to_string();
        let mut events = Vec::new();

        for instruction in &record.instructions {
            if instruction.program != "spl-token" && instruction.program_id != token_program {
                continue;
            }
            let Some(kind) = instruction.parsed.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !TRANSFER_INSTRUCTIONS.contains(&kind) {
                continue;
            }
            let Some(info) = instruction.parsed.get("info") else {
                continue;
            };

            let destination = match kind {
                "mintTo" | "mintToChecked" => info.get("account").and_then(Value::as_str),
                _ => info.get("destination").and_then(Value::as_str),
            };
            let Some(destination) = destination else {
                continue;
            };
            let Some(fee_account) = self.monitored_destination(record, destination) else {
                continue;
            };

            // An unparseable amount drops this event, never the record.
            let amount = match kind {
                "transferChecked" | "mintToChecked" => info
                    .get("tokenAmount")
                    .and_then(|token_amount| token_amount.get("amount"))
                    .and_then(Value::as_str)
                    .and_then(parse_base_units),
                _ => info.get("amount").and_then(Value::as_str).and_then(parse_base_units),
            };
            let Some(amount) = amount else {
                continue;
            };

            // Events that cannot be pinned to the tracked mint are dropped
            // rather than guessed at.
            match self.resolve_mint(record, info, destination) {
                Some(mint) if mint == self.mint => {}
                _ => continue,
            }

            let source_owner = self.resolve_source_owner(record, info, kind).await;
            events.push(DepositEvent {
                fee_account,
                mint: self.mint.to_string(),
                amount_base_units: amount,
                source_owner,
                signature: record.signature.clone(),
            });
        }

        events
    }

    /// The monitored identity behind a balance entry: its recorded owner if
    /// monitored, else the raw account key if monitored.
    fn monitored_identity(
        &self,
        record: &TransactionRecord,
        index: u8,
        entry: &TokenBalanceEntry,
    ) -> Option<String> {
        if let Some(owner) = &entry.owner {
            if self.monitored.contains(owner) {
                return Some(owner.clone());
            }
        }
        let key = record.account_keys.get(index as usize)?;
        if self.monitored.contains(key) {
            return Some(key.clone());
        }
        None
    }

    fn monitored_destination(
        &self,
        record: &TransactionRecord,
        destination: &str,
    ) -> Option<String> {
        if self.monitored.contains(destination) {
            return Some(destination.to_string());
        }
        let owner = record.balance_for_address(destination)?.owner.as_ref()?;
        if self.monitored.contains(owner) {
            return Some(owner.clone());
        }
        None
    }

    fn resolve_mint(
        &self,
        record: &TransactionRecord,
        info: &Value,
        destination: &str,
    ) -> Option<String> {
        if let Some(mint) = info.get("mint").and_then(Value::as_str) {
            return Some(mint.to_string());
        }
        if let Some(entry) = record.balance_for_address(destination) {
            return Some(entry.mint.clone());
        }
        let source = info.get("source").and_then(Value::as_str)?;
        record
            .balance_for_address(source)
            .map(|entry| entry.mint.clone())
    }

    async fn resolve_source_owner(
        &self,
        record: &TransactionRecord,
        info: &Value,
        kind: &str,
    ) -> Option<String> {
        if kind == "mintTo" || kind == "mintToChecked" {
            // Issuance has no source account; the mint authority is the
            // depositing party.
            return info
                .get("mintAuthority")
                .or_else(|| info.get("multisigMintAuthority"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        if let Some(authority) = info
            .get("authority")
            .or_else(|| info.get("multisigAuthority"))
            .and_then(Value::as_str)
        {
            return Some(authority.to_string());
        }

        let source = info.get("source").and_then(Value::as_str)?;
        if let Some(owner) = record
            .balance_for_address(source)
            .and_then(|entry| entry.owner.clone())
        {
            return Some(owner);
        }
        self.lookup_owner(source).await
    }

    /// Memoized account-info lookup. A failed lookup leaves the owner
    /// unresolved; the event is kept and bucketed under "unknown" downstream.
    async fn lookup_owner(&self, address: &str) -> Option<String> {
        if let Some(cached) = self.owner_cache.get(address).await {
            return cached;
        }
        let owner = match self.source.token_account_owner(address).await {
            Ok(owner) => owner,
            Err(e) => {
                debug!("Owner lookup failed for {}: {}", address, e);
                // Transient failures are not cached.
                return None;
            }
        };
        self.owner_cache
            .insert(address.to_string(), owner.clone())
            .await;
        owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::models::InstructionView;
    use moka::future::Cache;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const MINT: &str = "MintAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    const FEE_OWNER: &str = "FeeOwner111111111111111111111111111111111111";
    const FEE_TOKEN_ACCOUNT: &str = "FeeTok111111111111111111111111111111111111";
    const PAYER: &str = "Payer111111111111111111111111111111111111111";
    const PAYER_TOKEN_ACCOUNT: &str = "PayerTok11111111111111111111111111111111111";

    struct StubAccounts {
        owners: HashMap<String, String>,
        fail: bool,
        lookups: Mutex<usize>,
    }

    impl StubAccounts {
        fn empty() -> Self {
            Self {
                owners: HashMap::new(),
                fail: false,
                lookups: Mutex::new(0),
            }
        }

        fn with_owner(address: &str, owner: &str) -> Self {
            let mut stub = Self::empty();
            stub.owners.insert(address.to_string(), owner.to_string());
            stub
        }

        fn failing() -> Self {
            let mut stub = Self::empty();
            stub.fail = true;
            stub
        }
    }

    impl AccountSource for StubAccounts {
        async fn token_account_owner(
            &self,
            address: &str,
        ) -> Result<Option<String>, ClientError> {
            *self.lookups.lock().unwrap() += 1;
            if self.fail {
                return Err(ClientError::Unavailable {
                    operation: "getAccountInfo".to_string(),
                    attempts: 1,
                    message: "boom".to_string(),
                });
            }
            Ok(self.owners.get(address).cloned())
        }

        async fn mint_decimals(&self, _mint: &str) -> Result<Option<u8>, ClientError> {
            Ok(None)
        }
    }

    fn monitored() -> HashSet<String> {
        [FEE_OWNER.to_string()].into_iter().collect()
    }

    fn extractor<'a>(
        source: &'a StubAccounts,
        monitored: &'a HashSet<String>,
    ) -> DepositExtractor<'a, StubAccounts> {
        DepositExtractor::new(source, monitored, MINT, Cache::new(100))
    }

    fn balance(mint: &str, owner: Option<&str>, pre: u128, post: u128) -> TokenBalanceEntry {
        TokenBalanceEntry {
            mint: mint.to_string(),
            owner: owner.map(String::from),
            pre_amount: pre,
            post_amount: post,
            decimals: Some(6),
        }
    }

    fn record(
        balances: Vec<(u8, TokenBalanceEntry)>,
        instructions: Vec<InstructionView>,
    ) -> TransactionRecord {
        TransactionRecord {
            signature: "sig".to_string(),
            account_keys: vec![
                PAYER.to_string(),
                PAYER_TOKEN_ACCOUNT.to_string(),
                FEE_TOKEN_ACCOUNT.to_string(),
                spl_token::ID.to_string(),
            ],
            token_balances: balances.into_iter().collect::<BTreeMap<_, _>>(),
            instructions,
        }
    }

    fn transfer_instruction(info: Value) -> InstructionView {
        InstructionView {
            program: "spl-token".to_string(),
            program_id: spl_token::ID.to_string(),
            parsed: json!({"type": "transfer", "info": info}),
        }
    }

    #[tokio::test]
    async fn balance_delta_attributes_deposit_to_source_owner() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        let record = record(
            vec![
                (1, balance(MINT, Some(PAYER), 5_000_000, 3_000_000)),
                (2, balance(MINT, Some(FEE_OWNER), 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fee_account, FEE_OWNER);
        assert_eq!(events[0].amount_base_units, 2_000_000);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER));
        assert_eq!(events[0].signature, "sig");
    }

    #[tokio::test]
    async fn split_across_monitored_accounts_counts_the_source_once() {
        // One payer funds several monitored accounts in a single transaction;
        // the payer's loss must not be multiplied by the number of receivers.
        let source = StubAccounts::empty();
        let monitored: HashSet<String> =
            [FEE_OWNER.to_string(), "FeeOwner2".to_string()].into_iter().collect();
        let record = record(
            vec![
                (0, balance(MINT, Some(PAYER), 2_000_000, 0)),
                (1, balance(MINT, Some(FEE_OWNER), 0, 1_000_000)),
                (2, balance(MINT, Some("FeeOwner2"), 0, 1_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount_base_units, 2_000_000);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER));
    }

    #[tokio::test]
    async fn conservation_holds_for_multiple_sources() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        let record = record(
            vec![
                (0, balance(MINT, Some("W1"), 1_500_000, 0)),
                (1, balance(MINT, Some("W2"), 1_000_000, 500_000)),
                (2, balance(MINT, Some(FEE_OWNER), 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 2);
        let total: u128 = events.iter().map(|e| e.amount_base_units).sum();
        assert_eq!(total, 2_000_000);
        assert!(events
            .iter()
            .any(|e| e.source_owner.as_deref() == Some("W1") && e.amount_base_units == 1_500_000));
        assert!(events
            .iter()
            .any(|e| e.source_owner.as_deref() == Some("W2") && e.amount_base_units == 500_000));
    }

    #[tokio::test]
    async fn non_monitored_destination_yields_nothing() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        let record = record(
            vec![
                (0, balance(MINT, Some(PAYER), 2_000_000, 0)),
                (1, balance(MINT, Some("SomeoneElse"), 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn other_mints_are_ignored() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        let record = record(
            vec![
                (0, balance("OtherMint", Some(PAYER), 2_000_000, 0)),
                (1, balance("OtherMint", Some(FEE_OWNER), 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn source_owner_falls_back_to_raw_account_key() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        let record = record(
            vec![
                (1, balance(MINT, None, 2_000_000, 0)),
                (2, balance(MINT, Some(FEE_OWNER), 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER_TOKEN_ACCOUNT));
    }

    #[tokio::test]
    async fn monitored_raw_account_key_matches_without_owner_metadata() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![
                (1, balance(MINT, Some(PAYER), 2_000_000, 0)),
                (2, balance(MINT, None, 0, 2_000_000)),
            ],
            vec![],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fee_account, FEE_TOKEN_ACCOUNT);
    }

    #[tokio::test]
    async fn instruction_fallback_used_only_without_balance_deltas() {
        let source = StubAccounts::empty();
        let monitored = monitored();
        // Balance snapshot present and conclusive; the (contradictory)
        // instruction must not add a second event.
        let record = record(
            vec![
                (1, balance(MINT, Some(PAYER), 5_000_000, 3_000_000)),
                (2, balance(MINT, Some(FEE_OWNER), 0, 2_000_000)),
            ],
            vec![transfer_instruction(json!({
                "source": PAYER_TOKEN_ACCOUNT,
                "destination": FEE_TOKEN_ACCOUNT,
                "authority": PAYER,
                "amount": "999"
            }))],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount_base_units, 2_000_000);
    }

    #[tokio::test]
    async fn instruction_transfer_to_monitored_destination() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![(2, balance(MINT, None, 0, 0))],
            vec![transfer_instruction(json!({
                "source": PAYER_TOKEN_ACCOUNT,
                "destination": FEE_TOKEN_ACCOUNT,
                "authority": PAYER,
                "amount": "750000"
            }))],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fee_account, FEE_TOKEN_ACCOUNT);
        assert_eq!(events[0].amount_base_units, 750_000);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER));
    }

    #[tokio::test]
    async fn transfer_checked_carries_its_own_mint_and_amount() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![],
            vec![InstructionView {
                program: "spl-token".to_string(),
                program_id: spl_token::ID.to_string(),
                parsed: json!({
                    "type": "transferChecked",
                    "info": {
                        "source": PAYER_TOKEN_ACCOUNT,
                        "destination": FEE_TOKEN_ACCOUNT,
                        "authority": PAYER,
                        "mint": MINT,
                        "tokenAmount": {"amount": "500000", "decimals": 6, "uiAmount": 0.5, "uiAmountString": "0.5"}
                    }
                }),
            }],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount_base_units, 500_000);
    }

    #[tokio::test]
    async fn wrong_mint_transfer_checked_is_dropped() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![],
            vec![InstructionView {
                program: "spl-token".to_string(),
                program_id: spl_token::ID.to_string(),
                parsed: json!({
                    "type": "transferChecked",
                    "info": {
                        "source": PAYER_TOKEN_ACCOUNT,
                        "destination": FEE_TOKEN_ACCOUNT,
                        "authority": PAYER,
                        "mint": "SomeOtherMint",
                        "tokenAmount": {"amount": "500000", "decimals": 6, "uiAmount": 0.5, "uiAmountString": "0.5"}
                    }
                }),
            }],
        );

        let events = extractor(&source, &monitored).extract(&record).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn unparseable_amount_drops_the_event_only() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![(2, balance(MINT, None, 0, 0))],
            vec![
                transfer_instruction(json!({
                    "source": PAYER_TOKEN_ACCOUNT,
                    "destination": FEE_TOKEN_ACCOUNT,
                    "authority": PAYER,
                    "amount": "garbage"
                })),
                transfer_instruction(json!({
                    "source": PAYER_TOKEN_ACCOUNT,
                    "destination": FEE_TOKEN_ACCOUNT,
                    "authority": PAYER,
                    "amount": "250000"
                })),
            ],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount_base_units, 250_000);
    }

    #[tokio::test]
    async fn missing_authority_resolves_owner_via_account_lookup() {
        let source = StubAccounts::with_owner(PAYER_TOKEN_ACCOUNT, PAYER);
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![(2, balance(MINT, None, 0, 0))],
            vec![transfer_instruction(json!({
                "source": PAYER_TOKEN_ACCOUNT,
                "destination": FEE_TOKEN_ACCOUNT,
                "amount": "100000"
            }))],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER));
        assert_eq!(*source.lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn owner_lookups_are_memoized() {
        let source = StubAccounts::with_owner(PAYER_TOKEN_ACCOUNT, PAYER);
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let stub_extractor = extractor(&source, &monitored);
        let record = record(
            vec![(2, balance(MINT, None, 0, 0))],
            vec![transfer_instruction(json!({
                "source": PAYER_TOKEN_ACCOUNT,
                "destination": FEE_TOKEN_ACCOUNT,
                "amount": "100000"
            }))],
        );

        stub_extractor.extract(&record).await;
        stub_extractor.extract(&record).await;

        assert_eq!(*source.lookups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_owner_lookup_keeps_the_event_unattributed() {
        let source = StubAccounts::failing();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![(2, balance(MINT, None, 0, 0))],
            vec![transfer_instruction(json!({
                "source": PAYER_TOKEN_ACCOUNT,
                "destination": FEE_TOKEN_ACCOUNT,
                "amount": "100000"
            }))],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert!(events[0].source_owner.is_none());
    }

    #[tokio::test]
    async fn mint_issuance_to_monitored_account_is_a_deposit() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![],
            vec![InstructionView {
                program: "spl-token".to_string(),
                program_id: spl_token::ID.to_string(),
                parsed: json!({
                    "type": "mintTo",
                    "info": {
                        "mint": MINT,
                        "account": FEE_TOKEN_ACCOUNT,
                        "mintAuthority": PAYER,
                        "amount": "42"
                    }
                }),
            }],
        );

        let events = extractor(&source, &monitored).extract(&record).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount_base_units, 42);
        assert_eq!(events[0].source_owner.as_deref(), Some(PAYER));
    }

    #[tokio::test]
    async fn non_token_program_instructions_are_ignored() {
        let source = StubAccounts::empty();
        let monitored: HashSet<String> = [FEE_TOKEN_ACCOUNT.to_string()].into_iter().collect();
        let record = record(
            vec![],
            vec![InstructionView {
                program: "system".to_string(),
                program_id: "11111111111111111111111111111111".to_string(),
                parsed: json!({
                    "type": "transfer",
                    "info": {
                        "source": PAYER,
                        "destination": FEE_TOKEN_ACCOUNT,
                        "lamports": 100000
                    }
                }),
            }],
        );

        let events = extractor(&source, &monitored).extract(&record).await;
        assert!(events.is_empty());
    }
}
