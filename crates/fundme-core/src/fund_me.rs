use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    address::Address,
    error::FundMeError,
    oracle::{self, FeedHandle},
    units::{NativeAmount, ReferenceAmount, MINIMUM_USD},
};

/// Failure reported by the environment's value-transfer primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransferError(pub String);

/// Moves native value out of the ledger's custody.
pub trait ValueTransfer {
    fn transfer(&mut self, to: &Address, amount: NativeAmount) -> Result<(), TransferError>;
}

/// Outcome of a successful withdrawal.
///
/// `storage_reads` and `storage_writes` count accesses to the funder list and
/// registry. They are the only thing that differs between the two withdraw
/// entry points.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WithdrawReceipt {
    pub amount: NativeAmount,
    pub cleared: usize,
    pub storage_reads: u64,
    pub storage_writes: u64,
}

/// How settlement walks the funder list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Traversal {
    /// Re-read list length and entry from storage on every iteration.
    Storage,
    /// Copy the list once, then iterate over the local copy.
    Snapshot,
}

/// Serializable ledger contents, without the live feed capability.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundMeState {
    pub owner: Address,
    pub price_feed: Address,
    pub funders: Vec<Address>,
    pub amounts: BTreeMap<Address, NativeAmount>,
    pub balance: NativeAmount,
}

impl FundMeState {
    fn check_invariants(&self) -> Result<(), FundMeError> {
        if self.owner.is_zero() {
            return Err(FundMeError::CorruptState("zero owner"));
        }
        let mut seen = BTreeSet::new();
        let mut total: NativeAmount = 0;
        for funder in &self.funders {
            if !seen.insert(*funder) {
                return Err(FundMeError::CorruptState("duplicate funder"));
            }
            let amount = match self.amounts.get(funder) {
                Some(&amount) if amount > 0 => amount,
                Some(_) => return Err(FundMeError::CorruptState("zero registry entry")),
                None => return Err(FundMeError::CorruptState("funder missing from registry")),
            };
            total = total
                .checked_add(amount)
                .ok_or(FundMeError::ArithmeticOverflow("registry total"))?;
        }
        if self.amounts.len() != seen.len() {
            return Err(FundMeError::CorruptState("registry entry without funder"));
        }
        if total != self.balance {
            return Err(FundMeError::CorruptState("balance differs from registry total"));
        }
        Ok(())
    }
}

/// Funding ledger: contributions gated by a reference-value minimum,
/// withdrawals gated by ownership.
#[derive(Debug)]
pub struct FundMe {
    owner: Address,
    price_feed: FeedHandle,
    funders: Vec<Address>,
    amounts: BTreeMap<Address, NativeAmount>,
    balance: NativeAmount,
}

impl FundMe {
    /// Creates a ledger owned by `owner` (the deploying identity).
    pub fn new(owner: Address, price_feed: FeedHandle) -> Result<Self, FundMeError> {
        price_feed.validate()?;
        info!(%owner, feed = %price_feed.address(), "fund me deployed");
        Ok(Self {
            owner,
            price_feed,
            funders: Vec::new(),
            amounts: BTreeMap::new(),
            balance: 0,
        })
    }

    /// Rebuilds a ledger from persisted state and a live feed handle.
    ///
    /// The funder list and the registry must describe the same identities,
    /// each with a non-zero amount, and the balance must be their sum.
    pub fn restore(state: FundMeState, price_feed: FeedHandle) -> Result<Self, FundMeError> {
        price_feed.validate()?;
        if state.price_feed != price_feed.address() {
            return Err(FundMeError::InvalidFeed(
                "feed handle does not match persisted feed address",
            ));
        }
        state.check_invariants()?;
        Ok(Self {
            owner: state.owner,
            price_feed,
            funders: state.funders,
            amounts: state.amounts,
            balance: state.balance,
        })
    }

    pub fn to_state(&self) -> FundMeState {
        FundMeState {
            owner: self.owner,
            price_feed: self.price_feed.address(),
            funders: self.funders.clone(),
            amounts: self.amounts.clone(),
            balance: self.balance,
        }
    }

    /// Records a contribution of `amount` from `caller`.
    ///
    /// Nothing is recorded unless the reference value clears [`MINIMUM_USD`].
    /// An unreadable feed rejects the contribution.
    pub fn fund(&mut self, caller: Address, amount: NativeAmount) -> Result<(), FundMeError> {
        let usd_value = if amount == 0 {
            0
        } else {
            oracle::get_conversion_rate(self.price_feed.feed(), amount)?
        };
        if usd_value < MINIMUM_USD {
            warn!(%caller, amount, usd_value, "contribution below minimum");
            return Err(FundMeError::InsufficientContribution {
                usd_value,
                minimum: MINIMUM_USD,
            });
        }

        let previous = self.amounts.get(&caller).copied();
        let recorded = previous
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or(FundMeError::ArithmeticOverflow("funder balance"))?;
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(FundMeError::ArithmeticOverflow("ledger balance"))?;

        if previous.is_none() {
            self.funders.push(caller);
        }
        self.amounts.insert(caller, recorded);
        self.balance = balance;
        debug!(%caller, amount, recorded, "contribution recorded");
        Ok(())
    }

    /// Pays the whole balance to the owner and clears the books.
    pub fn withdraw<T>(
        &mut self,
        caller: &Address,
        payout: &mut T,
    ) -> Result<WithdrawReceipt, FundMeError>
    where
        T: ValueTransfer + ?Sized,
    {
        self.settle(caller, payout, Traversal::Storage)
    }

    /// Same contract as [`FundMe::withdraw`], with fewer storage reads.
    pub fn cheaper_withdraw<T>(
        &mut self,
        caller: &Address,
        payout: &mut T,
    ) -> Result<WithdrawReceipt, FundMeError>
    where
        T: ValueTransfer + ?Sized,
    {
        self.settle(caller, payout, Traversal::Snapshot)
    }

    fn only_owner(&self, caller: &Address) -> Result<(), FundMeError> {
        if *caller != self.owner {
            warn!(%caller, "withdraw attempted by non-owner");
            return Err(FundMeError::Unauthorized);
        }
        Ok(())
    }

    fn settle<T>(
        &mut self,
        caller: &Address,
        payout: &mut T,
        traversal: Traversal,
    ) -> Result<WithdrawReceipt, FundMeError>
    where
        T: ValueTransfer + ?Sized,
    {
        self.only_owner(caller)?;

        // Pay first: the bookkeeping reset below cannot fail, so a rejected
        // transfer leaves the ledger exactly as it was.
        let amount = self.balance;
        payout
            .transfer(&self.owner, amount)
            .map_err(|e| FundMeError::TransferFailed(e.0))?;

        let mut receipt = match traversal {
            Traversal::Storage => self.clear_funders_from_storage(),
            Traversal::Snapshot => self.clear_funders_from_snapshot(),
        };
        self.balance = 0;
        receipt.amount = amount;
        receipt.storage_writes += 1;
        info!(owner = %self.owner, amount, cleared = receipt.cleared, "withdrawal settled");
        Ok(receipt)
    }

    fn clear_funders_from_storage(&mut self) -> WithdrawReceipt {
        let mut receipt = WithdrawReceipt::default();
        let mut index = 0;
        loop {
            receipt.storage_reads += 1;
            if index >= self.funders.len() {
                break;
            }
            receipt.storage_reads += 1;
            let funder = self.funders[index];
            self.amounts.remove(&funder);
            receipt.storage_writes += 1;
            index += 1;
        }
        self.funders.clear();
        receipt.storage_writes += 1;
        receipt.cleared = index;
        receipt
    }

    fn clear_funders_from_snapshot(&mut self) -> WithdrawReceipt {
        let funders = std::mem::take(&mut self.funders);
        let mut receipt = WithdrawReceipt {
            storage_reads: 1 + funders.len() as u64,
            storage_writes: 1,
            ..Default::default()
        };
        for funder in &funders {
            self.amounts.remove(funder);
            receipt.storage_writes += 1;
        }
        receipt.cleared = funders.len();
        receipt
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn price_feed(&self) -> &FeedHandle {
        &self.price_feed
    }

    /// Recorded contribution of `funder` since the last withdrawal.
    pub fn address_to_amount_funded(&self, funder: &Address) -> NativeAmount {
        self.amounts.get(funder).copied().unwrap_or(0)
    }

    pub fn funder(&self, index: usize) -> Result<Address, FundMeError> {
        self.funders
            .get(index)
            .copied()
            .ok_or(FundMeError::IndexOutOfRange {
                index,
                len: self.funders.len(),
            })
    }

    pub fn funders(&self) -> &[Address] {
        &self.funders
    }

    /// Native value held in custody.
    pub fn balance(&self) -> NativeAmount {
        self.balance
    }

    pub fn minimum_usd(&self) -> ReferenceAmount {
        MINIMUM_USD
    }

    /// Reference value of `amount` at the current feed price.
    pub fn conversion_rate(&self, amount: NativeAmount) -> Result<ReferenceAmount, FundMeError> {
        oracle::get_conversion_rate(self.price_feed.feed(), amount)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{mock::MockV3Aggregator, units::NATIVE_UNIT};

    const OWNER: Address = Address::from_bytes([1u8; 32]);
    const ALICE: Address = Address::from_bytes([2u8; 32]);
    const BOB: Address = Address::from_bytes([3u8; 32]);
    const FEED: Address = Address::from_bytes([0xfe; 32]);

    #[derive(Default)]
    struct Wallet {
        received: BTreeMap<Address, NativeAmount>,
        reject: bool,
    }

    impl ValueTransfer for Wallet {
        fn transfer(&mut self, to: &Address, amount: NativeAmount) -> Result<(), TransferError> {
            if self.reject {
                return Err(TransferError("recipient rejected payment".into()));
            }
            *self.received.entry(*to).or_default() += amount;
            Ok(())
        }
    }

    fn ledger_with(mock: Arc<MockV3Aggregator>) -> FundMe {
        FundMe::new(OWNER, FeedHandle::new(FEED, mock)).unwrap()
    }

    fn ledger() -> FundMe {
        ledger_with(Arc::new(MockV3Aggregator::new(8, 2_000 * 10i128.pow(8))))
    }

    #[test]
    fn constructor_sets_owner_and_feed() {
        let fund_me = ledger();
        assert_eq!(fund_me.owner(), OWNER);
        assert_eq!(fund_me.price_feed().address(), FEED);
        assert_eq!(fund_me.balance(), 0);
    }

    #[test]
    fn constructor_rejects_zero_feed() {
        let mock = Arc::new(MockV3Aggregator::new(8, 1));
        let err = FundMe::new(OWNER, FeedHandle::new(Address::ZERO, mock)).unwrap_err();
        assert!(matches!(err, FundMeError::InvalidFeed(_)));
    }

    #[test]
    fn zero_amount_is_insufficient() {
        let mut fund_me = ledger();
        assert!(matches!(
            fund_me.fund(ALICE, 0),
            Err(FundMeError::InsufficientContribution { usd_value: 0, .. })
        ));
        assert!(fund_me.funders().is_empty());
    }

    #[test]
    fn minimum_is_inclusive() {
        let mut fund_me = ledger();
        // 0.025 native at 2000 is exactly 50 reference units.
        fund_me.fund(ALICE, NATIVE_UNIT / 40).unwrap();
        assert!(fund_me.fund(BOB, NATIVE_UNIT / 40 - 1).is_err());
        assert_eq!(fund_me.funders(), &[ALICE]);
    }

    #[test]
    fn repeat_contributions_accumulate_without_duplicates() {
        let mut fund_me = ledger();
        fund_me.fund(ALICE, NATIVE_UNIT).unwrap();
        fund_me.fund(BOB, NATIVE_UNIT).unwrap();
        fund_me.fund(ALICE, 2 * NATIVE_UNIT).unwrap();
        assert_eq!(fund_me.funders(), &[ALICE, BOB]);
        assert_eq!(fund_me.address_to_amount_funded(&ALICE), 3 * NATIVE_UNIT);
        assert_eq!(fund_me.balance(), 4 * NATIVE_UNIT);
    }

    #[test]
    fn unavailable_feed_fails_closed() {
        let mock = Arc::new(MockV3Aggregator::new(8, 2_000 * 10i128.pow(8)));
        let mut fund_me = ledger_with(mock.clone());
        mock.set_available(false);
        assert!(matches!(
            fund_me.fund(ALICE, NATIVE_UNIT),
            Err(FundMeError::OracleUnavailable(_))
        ));
        mock.set_available(true);
        mock.update_answer(0, 1);
        assert!(matches!(
            fund_me.fund(ALICE, NATIVE_UNIT),
            Err(FundMeError::OracleUnavailable(_))
        ));
        assert_eq!(fund_me.balance(), 0);
        assert!(fund_me.funders().is_empty());
    }

    #[test]
    fn price_changes_move_the_threshold() {
        let mock = Arc::new(MockV3Aggregator::new(8, 2_000 * 10i128.pow(8)));
        let mut fund_me = ledger_with(mock.clone());
        assert!(fund_me.fund(ALICE, NATIVE_UNIT / 100).is_err());
        mock.update_answer(10_000 * 10i128.pow(8), 1);
        fund_me.fund(ALICE, NATIVE_UNIT / 100).unwrap();
    }

    #[test]
    fn failed_transfer_leaves_books_untouched() {
        for cheaper in [false, true] {
            let mut fund_me = ledger();
            fund_me.fund(ALICE, NATIVE_UNIT).unwrap();
            let before = fund_me.to_state();
            let mut wallet = Wallet {
                reject: true,
                ..Default::default()
            };
            let err = if cheaper {
                fund_me.cheaper_withdraw(&OWNER, &mut wallet)
            } else {
                fund_me.withdraw(&OWNER, &mut wallet)
            }
            .unwrap_err();
            assert!(matches!(err, FundMeError::TransferFailed(_)));
            assert_eq!(fund_me.to_state(), before);
        }
    }

    #[test]
    fn cheaper_withdraw_reads_less_storage() {
        let mut a = ledger();
        let mut b = ledger();
        for seed in 10u8..15 {
            let funder = Address::from_bytes([seed; 32]);
            a.fund(funder, NATIVE_UNIT).unwrap();
            b.fund(funder, NATIVE_UNIT).unwrap();
        }
        let ra = a.withdraw(&OWNER, &mut Wallet::default()).unwrap();
        let rb = b.cheaper_withdraw(&OWNER, &mut Wallet::default()).unwrap();
        assert_eq!((ra.amount, ra.cleared), (rb.amount, rb.cleared));
        assert_eq!(ra.storage_writes, rb.storage_writes);
        assert_eq!(ra.storage_reads, 11);
        assert_eq!(rb.storage_reads, 6);
        assert_eq!(a.to_state(), b.to_state());
    }

    #[test]
    fn state_restores_with_matching_feed() {
        let mock = Arc::new(MockV3Aggregator::new(8, 2_000 * 10i128.pow(8)));
        let mut fund_me = ledger_with(mock.clone());
        fund_me.fund(ALICE, NATIVE_UNIT).unwrap();
        let state = fund_me.to_state();

        let restored = FundMe::restore(state.clone(), FeedHandle::new(FEED, mock.clone())).unwrap();
        assert_eq!(restored.to_state(), state);

        let other = Address::from_bytes([0xee; 32]);
        assert!(FundMe::restore(state, FeedHandle::new(other, mock)).is_err());
    }

    #[test]
    fn restore_rejects_inconsistent_books() {
        let mock = Arc::new(MockV3Aggregator::new(8, 2_000 * 10i128.pow(8)));
        let mut fund_me = ledger_with(mock.clone());
        fund_me.fund(ALICE, NATIVE_UNIT).unwrap();
        fund_me.fund(BOB, 2 * NATIVE_UNIT).unwrap();
        let good = fund_me.to_state();
        let restore =
            |state: FundMeState| FundMe::restore(state, FeedHandle::new(FEED, mock.clone()));

        let mut stray = good.clone();
        stray.amounts.insert(Address::from_bytes([0x77; 32]), 5 * NATIVE_UNIT);
        stray.balance += 5 * NATIVE_UNIT;
        assert_eq!(
            restore(stray).unwrap_err(),
            FundMeError::CorruptState("registry entry without funder")
        );

        let mut duplicate = good.clone();
        duplicate.funders.push(ALICE);
        assert_eq!(
            restore(duplicate).unwrap_err(),
            FundMeError::CorruptState("duplicate funder")
        );

        let mut missing = good.clone();
        missing.amounts.remove(&BOB);
        assert_eq!(
            restore(missing).unwrap_err(),
            FundMeError::CorruptState("funder missing from registry")
        );

        let mut zero = good.clone();
        zero.amounts.insert(BOB, 0);
        zero.balance = NATIVE_UNIT;
        assert_eq!(
            restore(zero).unwrap_err(),
            FundMeError::CorruptState("zero registry entry")
        );

        let mut skewed = good.clone();
        skewed.balance -= 1;
        assert_eq!(
            restore(skewed).unwrap_err(),
            FundMeError::CorruptState("balance differs from registry total")
        );

        let mut overflow = good;
        overflow.amounts.insert(BOB, u128::MAX);
        assert_eq!(
            restore(overflow).unwrap_err(),
            FundMeError::ArithmeticOverflow("registry total")
        );
    }
}
