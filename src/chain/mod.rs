use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::Arc,
};

use ed25519_dalek::SigningKey;
use fundme_core::{
    mock::{MockFeedState, MockV3Aggregator},
    Address, FeedHandle, FundMe, FundMeError, FundMeState, NativeAmount, TransferError,
    ValueTransfer, WithdrawReceipt,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, NetworkConfig},
    tx::{self, Call, SignatureError, Transaction, UnsignedTx, DEFAULT_GAS_LIMIT},
};

pub const GAS_TX: u64 = 21_000;
pub const GAS_SLOAD: u64 = 2_100;
pub const GAS_SSTORE_SET: u64 = 22_100;
pub const GAS_SSTORE_RESET: u64 = 5_000;
pub const GAS_CALL_VALUE: u64 = 9_000;
pub const BLOCK_TIME: u64 = 12;

#[derive(Debug, thiserror::Error)]
pub enum DevnetError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("transaction for chain {actual}, devnet is chain {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
    #[error("unknown account {0}")]
    UnknownAccount(Address),
    #[error("unknown development account #{0}")]
    UnknownSigner(u32),
    #[error("nonce mismatch for {account}: expected {expected}, got {actual}")]
    NonceMismatch {
        account: Address,
        expected: u64,
        actual: u64,
    },
    #[error("insufficient funds in account {account}")]
    InsufficientFunds { account: Address },
    #[error("contract state: {0}")]
    Contract(#[from] FundMeError),
    #[error("state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("state root does not match the persisted chain metadata, accounts and ledger")]
    StateRootMismatch,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountState {
    pub balance: NativeAmount,
    pub nonce: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainMeta {
    pub network: String,
    pub chain_id: u64,
    pub gas_price: u128,
    pub seed: String,
    pub height: u64,
    pub timestamp: u64,
    pub fees_burned: NativeAmount,
    #[serde(with = "hex_digest")]
    pub previous_tx: Option<[u8; 32]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployments {
    pub deployer: Address,
    pub mock_v3_aggregator: Address,
    pub fund_me: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainEvent {
    Deployed {
        contract: String,
        address: Address,
        by: Address,
    },
    Funded {
        funder: Address,
        amount: NativeAmount,
    },
    Withdrawn {
        owner: Address,
        amount: NativeAmount,
        cleared: usize,
        cheaper: bool,
    },
    AnswerUpdated {
        round_id: u64,
        answer: i128,
    },
    Reverted {
        from: Address,
        call: String,
        reason: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Reverted { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxReceipt {
    #[serde(with = "hex_digest::required")]
    pub tx_hash: [u8; 32],
    pub block: u64,
    pub from: Address,
    pub call: String,
    pub status: TxStatus,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub withdraw: Option<WithdrawReceipt>,
}

impl TxReceipt {
    pub fn gas_cost(&self) -> NativeAmount {
        u128::from(self.gas_used) * self.effective_gas_price
    }

    pub fn succeeded(&self) -> bool {
        self.status == TxStatus::Success
    }
}

/// Persisted form of a [`Devnet`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevnetSnapshot {
    pub meta: ChainMeta,
    pub deployments: Deployments,
    pub accounts: BTreeMap<Address, AccountState>,
    pub feed: MockFeedState,
    pub fund_me: FundMeState,
    pub events: Vec<ChainEvent>,
    #[serde(with = "hex_digest::required")]
    pub state_root: [u8; 32],
}

/// Pays out of the ledger into devnet accounts.
struct Payout<'a> {
    accounts: &'a mut BTreeMap<Address, AccountState>,
}

impl ValueTransfer for Payout<'_> {
    fn transfer(&mut self, to: &Address, amount: NativeAmount) -> Result<(), TransferError> {
        let account = self.accounts.entry(*to).or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| TransferError(format!("balance overflow for {to}")))?;
        Ok(())
    }
}

/// Single-process development chain hosting one mock feed and one ledger.
///
/// Every transaction is applied atomically: a reverted call leaves accounts
/// and ledger as they were, apart from the gas fee and the sender nonce.
pub struct Devnet {
    meta: ChainMeta,
    deployments: Deployments,
    accounts: BTreeMap<Address, AccountState>,
    feed: Arc<MockV3Aggregator>,
    fund_me: FundMe,
    events: Vec<ChainEvent>,
}

impl Devnet {
    /// Creates the development accounts, then deploys the mock feed and the
    /// ledger from account #0.
    pub fn deploy(network: &NetworkConfig, genesis_timestamp: u64) -> Result<Self, DevnetError> {
        network.ensure_development()?;
        let seed = network.seed_bytes()?;
        if network.accounts == 0 {
            return Err(ConfigError::NoAccounts(network.name.clone()).into());
        }

        let mut accounts = BTreeMap::new();
        for index in 0..network.accounts {
            let address = tx::address_of(&tx::dev_signer(&seed, index));
            accounts.insert(
                address,
                AccountState {
                    balance: network.initial_balance,
                    nonce: 0,
                },
            );
        }
        let deployer = tx::address_of(&tx::dev_signer(&seed, 0));

        info!(network = %network.name, "development chain detected, deploying mocks");
        let feed_address = deployer.derive(0);
        let feed = Arc::new(MockV3Aggregator::new(
            network.feed.decimals,
            network.feed.initial_answer,
        ));

        let fund_me_address = deployer.derive(1);
        let fund_me = FundMe::new(deployer, FeedHandle::new(feed_address, feed.clone()))?;
        if let Some(account) = accounts.get_mut(&deployer) {
            account.nonce = 2;
        }

        let events = vec![
            ChainEvent::Deployed {
                contract: "MockV3Aggregator".into(),
                address: feed_address,
                by: deployer,
            },
            ChainEvent::Deployed {
                contract: "FundMe".into(),
                address: fund_me_address,
                by: deployer,
            },
        ];

        Ok(Self {
            meta: ChainMeta {
                network: network.name.clone(),
                chain_id: network.chain_id,
                gas_price: network.gas_price,
                seed: network.seed.clone(),
                height: 0,
                timestamp: genesis_timestamp,
                fees_burned: 0,
                previous_tx: None,
            },
            deployments: Deployments {
                deployer,
                mock_v3_aggregator: feed_address,
                fund_me: fund_me_address,
            },
            accounts,
            feed,
            fund_me,
            events,
        })
    }

    pub fn meta(&self) -> &ChainMeta {
        &self.meta
    }

    pub fn deployments(&self) -> &Deployments {
        &self.deployments
    }

    pub fn fund_me(&self) -> &FundMe {
        &self.fund_me
    }

    pub fn feed(&self) -> &MockV3Aggregator {
        &self.feed
    }

    pub fn events(&self) -> &[ChainEvent] {
        &self.events
    }

    pub fn accounts(&self) -> &BTreeMap<Address, AccountState> {
        &self.accounts
    }

    pub fn balance_of(&self, account: &Address) -> NativeAmount {
        self.accounts.get(account).map(|a| a.balance).unwrap_or(0)
    }

    /// Development signer `index`, as derived from the network seed.
    pub fn signer(&self, index: u32) -> Result<SigningKey, DevnetError> {
        let seed = seed_from_hex(&self.meta.seed)?;
        let key = tx::dev_signer(&seed, index);
        if !self.accounts.contains_key(&tx::address_of(&key)) {
            return Err(DevnetError::UnknownSigner(index));
        }
        Ok(key)
    }

    /// Builds and signs `call` from development signer `index` with its
    /// current nonce.
    pub fn sign_call(&self, index: u32, call: Call) -> Result<Transaction, DevnetError> {
        let key = self.signer(index)?;
        let from = tx::address_of(&key);
        let nonce = self.accounts.get(&from).map(|a| a.nonce).unwrap_or(0);
        Ok(UnsignedTx {
            chain_id: self.meta.chain_id,
            from,
            nonce,
            gas_limit: DEFAULT_GAS_LIMIT,
            call,
        }
        .sign(&key))
    }

    fn debit_account(&mut self, account: &Address, amount: NativeAmount) -> Result<(), DevnetError> {
        let state = self
            .accounts
            .get_mut(account)
            .ok_or(DevnetError::UnknownAccount(*account))?;
        if state.balance < amount {
            return Err(DevnetError::InsufficientFunds { account: *account });
        }
        state.balance -= amount;
        Ok(())
    }

    /// Validates and applies one transaction.
    ///
    /// Errors are returned only for transactions rejected before execution
    /// (bad signature, nonce, funds). A call that fails inside the ledger
    /// still produces a receipt with [`TxStatus::Reverted`].
    pub fn execute(&mut self, tx: &Transaction) -> Result<TxReceipt, DevnetError> {
        tx.verify()?;
        let body = &tx.body;
        if body.chain_id != self.meta.chain_id {
            return Err(DevnetError::ChainMismatch {
                expected: self.meta.chain_id,
                actual: body.chain_id,
            });
        }
        let sender = self
            .accounts
            .get(&body.from)
            .ok_or(DevnetError::UnknownAccount(body.from))?;
        if sender.nonce != body.nonce {
            return Err(DevnetError::NonceMismatch {
                account: body.from,
                expected: sender.nonce,
                actual: body.nonce,
            });
        }
        let value = body.call.value();
        let max_fee = u128::from(body.gas_limit)
            .checked_mul(self.meta.gas_price)
            .and_then(|fee| fee.checked_add(value))
            .ok_or(DevnetError::InsufficientFunds { account: body.from })?;
        if sender.balance < max_fee {
            return Err(DevnetError::InsufficientFunds { account: body.from });
        }

        let accounts_checkpoint = self.accounts.clone();
        let ledger_checkpoint = self.fund_me.to_state();
        let events_checkpoint = self.events.len();

        self.debit_account(&body.from, value)?;
        self.meta.timestamp += BLOCK_TIME;
        let outcome = match self.apply_call(&body.from, &body.call) {
            Ok((gas, _)) if gas > body.gas_limit => Err(CallFailure::OutOfGas),
            other => other,
        };

        let (status, gas_used, withdraw) = match outcome {
            Ok((gas, withdraw)) => (TxStatus::Success, gas, withdraw),
            Err(failure) => {
                self.accounts = accounts_checkpoint;
                self.fund_me =
                    FundMe::restore(ledger_checkpoint, self.fund_me.price_feed().clone())?;
                self.events.truncate(events_checkpoint);
                let (reason, gas) = match failure {
                    CallFailure::Reverted(err) => {
                        (err.to_string(), (GAS_TX + GAS_SLOAD).min(body.gas_limit))
                    }
                    CallFailure::OutOfGas => ("out of gas".to_string(), body.gas_limit),
                };
                warn!(from = %body.from, call = body.call.name(), %reason, "call reverted");
                self.events.push(ChainEvent::Reverted {
                    from: body.from,
                    call: body.call.name().into(),
                    reason: reason.clone(),
                });
                (TxStatus::Reverted { reason }, gas, None)
            }
        };

        let fee = u128::from(gas_used) * self.meta.gas_price;
        self.debit_account(&body.from, fee)?;
        self.meta.fees_burned += fee;
        if let Some(sender) = self.accounts.get_mut(&body.from) {
            sender.nonce += 1;
        }

        let tx_hash = tx.hash();
        self.meta.height += 1;
        self.meta.previous_tx = Some(tx_hash);
        debug!(height = self.meta.height, gas_used, "transaction applied");

        Ok(TxReceipt {
            tx_hash,
            block: self.meta.height,
            from: body.from,
            call: body.call.name().into(),
            status,
            gas_used,
            effective_gas_price: self.meta.gas_price,
            withdraw,
        })
    }

    fn apply_call(
        &mut self,
        from: &Address,
        call: &Call,
    ) -> Result<(u64, Option<WithdrawReceipt>), CallFailure> {
        match call {
            Call::Fund { amount } => {
                let first = self.fund_me.address_to_amount_funded(from) == 0;
                self.fund_me.fund(*from, *amount)?;
                self.events.push(ChainEvent::Funded {
                    funder: *from,
                    amount: *amount,
                });
                let storage = if first {
                    2 * GAS_SSTORE_SET
                } else {
                    GAS_SSTORE_RESET
                };
                Ok((GAS_TX + 2 * GAS_SLOAD + storage + GAS_SSTORE_RESET, None))
            }
            Call::Withdraw | Call::CheaperWithdraw => {
                let cheaper = matches!(call, Call::CheaperWithdraw);
                let mut payout = Payout {
                    accounts: &mut self.accounts,
                };
                let receipt = if cheaper {
                    self.fund_me.cheaper_withdraw(from, &mut payout)?
                } else {
                    self.fund_me.withdraw(from, &mut payout)?
                };
                self.events.push(ChainEvent::Withdrawn {
                    owner: *from,
                    amount: receipt.amount,
                    cleared: receipt.cleared,
                    cheaper,
                });
                let gas = GAS_TX
                    + GAS_SLOAD
                    + GAS_CALL_VALUE
                    + receipt.storage_reads * GAS_SLOAD
                    + receipt.storage_writes * GAS_SSTORE_RESET;
                Ok((gas, Some(receipt)))
            }
            Call::UpdateAnswer { answer } => {
                if *from != self.deployments.deployer {
                    return Err(FundMeError::Unauthorized.into());
                }
                let round_id = self.feed.update_answer(*answer, self.meta.timestamp);
                self.events.push(ChainEvent::AnswerUpdated {
                    round_id,
                    answer: *answer,
                });
                Ok((GAS_TX + 2 * GAS_SSTORE_SET, None))
            }
        }
    }

    pub fn snapshot(&self) -> DevnetSnapshot {
        let fund_me = self.fund_me.to_state();
        DevnetSnapshot {
            meta: self.meta.clone(),
            deployments: self.deployments.clone(),
            accounts: self.accounts.clone(),
            feed: self.feed.to_state(),
            state_root: compute_state_root(
                &self.meta,
                &self.deployments,
                &self.accounts,
                &fund_me,
            ),
            fund_me,
            events: self.events.clone(),
        }
    }

    pub fn from_snapshot(snapshot: DevnetSnapshot) -> Result<Self, DevnetError> {
        let root = compute_state_root(
            &snapshot.meta,
            &snapshot.deployments,
            &snapshot.accounts,
            &snapshot.fund_me,
        );
        if root != snapshot.state_root {
            return Err(DevnetError::StateRootMismatch);
        }
        let feed = Arc::new(MockV3Aggregator::from_state(snapshot.feed));
        let handle = FeedHandle::new(snapshot.deployments.mock_v3_aggregator, feed.clone());
        let fund_me = FundMe::restore(snapshot.fund_me, handle)?;
        Ok(Self {
            meta: snapshot.meta,
            deployments: snapshot.deployments,
            accounts: snapshot.accounts,
            feed,
            fund_me,
            events: snapshot.events,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), DevnetError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DevnetError> {
        let bytes = fs::read(path)?;
        let snapshot: DevnetSnapshot = serde_json::from_slice(&bytes)?;
        Self::from_snapshot(snapshot)
    }
}

enum CallFailure {
    Reverted(FundMeError),
    OutOfGas,
}

impl From<FundMeError> for CallFailure {
    fn from(err: FundMeError) -> Self {
        CallFailure::Reverted(err)
    }
}

fn seed_from_hex(seed: &str) -> Result<[u8; 32], DevnetError> {
    let bytes = hex::decode(seed).map_err(|e| ConfigError::Seed(e.to_string()))?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ConfigError::Seed(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(seed)
}

fn compute_state_root(
    meta: &ChainMeta,
    deployments: &Deployments,
    accounts: &BTreeMap<Address, AccountState>,
    fund_me: &FundMeState,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"meta");
    hasher.update(meta.network.as_bytes());
    hasher.update(meta.chain_id.to_le_bytes());
    hasher.update(meta.gas_price.to_le_bytes());
    hasher.update(meta.seed.as_bytes());
    hasher.update(meta.height.to_le_bytes());
    hasher.update(meta.timestamp.to_le_bytes());
    hasher.update(meta.fees_burned.to_le_bytes());
    hasher.update(meta.previous_tx.unwrap_or_default());
    hasher.update(deployments.deployer.as_bytes());
    hasher.update(deployments.mock_v3_aggregator.as_bytes());
    hasher.update(deployments.fund_me.as_bytes());
    leaves.push(hasher.finalize().into());

    for (address, account) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(address.as_bytes());
        hasher.update(account.balance.to_le_bytes());
        hasher.update(account.nonce.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    let mut hasher = Sha256::new();
    hasher.update(b"fundme");
    hasher.update(fund_me.owner.as_bytes());
    hasher.update(fund_me.price_feed.as_bytes());
    hasher.update(fund_me.balance.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (index, funder) in fund_me.funders.iter().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(b"funder");
        hasher.update((index as u64).to_le_bytes());
        hasher.update(funder.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (funder, amount) in &fund_me.amounts {
        let mut hasher = Sha256::new();
        hasher.update(b"amount");
        hasher.update(funder.as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"fundme-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(digest) => serializer.serialize_some(&hex::encode(digest)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| decode(&encoded).map_err(D::Error::custom))
            .transpose()
    }

    fn decode(encoded: &str) -> Result<[u8; 32], String> {
        let bytes = hex::decode(encoded).map_err(|e| e.to_string())?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
    }

    pub mod required {
        use super::*;

        pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&hex::encode(value))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
        where
            D: Deserializer<'de>,
        {
            let encoded = String::deserialize(deserializer)?;
            decode(&encoded).map_err(D::Error::custom)
        }
    }
}
