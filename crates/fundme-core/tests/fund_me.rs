use std::{collections::BTreeMap, sync::Arc};

use fundme_core::{
    mock::MockV3Aggregator,
    units::{parse_native, NATIVE_UNIT},
    Address, FeedHandle, FundMe, FundMeError, NativeAmount, TransferError, ValueTransfer,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const DECIMALS: u8 = 8;
const INITIAL_ANSWER: i128 = 200_000_000_000;

/// Stand-in for the hosting environment: tracks external balances and pays
/// out of the ledger's custody into them.
#[derive(Default)]
struct Host {
    balances: BTreeMap<Address, NativeAmount>,
}

impl ValueTransfer for Host {
    fn transfer(&mut self, to: &Address, amount: NativeAmount) -> Result<(), TransferError> {
        let balance = self.balances.entry(*to).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError("balance overflow".into()))?;
        Ok(())
    }
}

fn account(seed: u8) -> Address {
    Address::from_bytes([seed; 32])
}

fn deploy(owner: Address) -> FundMe {
    let feed_address = owner.derive(0);
    let mock = Arc::new(MockV3Aggregator::new(DECIMALS, INITIAL_ANSWER));
    FundMe::new(owner, FeedHandle::new(feed_address, mock)).unwrap()
}

#[derive(Clone, Copy, Debug)]
enum Path {
    Withdraw,
    Cheaper,
}

const PATHS: [Path; 2] = [Path::Withdraw, Path::Cheaper];

fn run(path: Path, fund_me: &mut FundMe, caller: &Address, host: &mut Host) -> Result<u128, FundMeError> {
    let receipt = match path {
        Path::Withdraw => fund_me.withdraw(caller, host)?,
        Path::Cheaper => fund_me.cheaper_withdraw(caller, host)?,
    };
    Ok(receipt.amount)
}

#[test]
fn scripted_scenario() {
    let owner = account(1);
    let alice = account(2);
    let bob = account(3);
    let mut fund_me = deploy(owner);
    let mut host = Host::default();

    assert_eq!(fund_me.price_feed().address(), owner.derive(0));

    let err = fund_me.fund(alice, parse_native("0.01").unwrap()).unwrap_err();
    assert!(matches!(err, FundMeError::InsufficientContribution { .. }));
    assert_eq!(fund_me.address_to_amount_funded(&alice), 0);

    let one = parse_native("1.0").unwrap();
    fund_me.fund(alice, one).unwrap();
    assert_eq!(fund_me.address_to_amount_funded(&alice), one);
    assert_eq!(fund_me.funder(0).unwrap(), alice);

    assert_eq!(fund_me.withdraw(&bob, &mut host).unwrap_err(), FundMeError::Unauthorized);
    assert_eq!(fund_me.balance(), one);

    let receipt = fund_me.withdraw(&owner, &mut host).unwrap();
    assert_eq!(receipt.amount, one);
    assert_eq!(fund_me.balance(), 0);
    assert_eq!(fund_me.address_to_amount_funded(&alice), 0);
    assert_eq!(
        fund_me.funder(0).unwrap_err(),
        FundMeError::IndexOutOfRange { index: 0, len: 0 }
    );
    assert_eq!(host.balances[&owner], one);
}

#[test]
fn withdraw_paths_share_properties() {
    for path in PATHS {
        let owner = account(1);
        let mut fund_me = deploy(owner);
        let mut host = Host::default();

        let funders: Vec<Address> = (10..16).map(account).collect();
        for funder in &funders {
            fund_me.fund(*funder, NATIVE_UNIT).unwrap();
        }
        let held = fund_me.balance();

        let paid = run(path, &mut fund_me, &owner, &mut host).unwrap();
        assert_eq!(paid, held, "{path:?}");
        assert_eq!(host.balances[&owner], held, "{path:?}");
        assert_eq!(fund_me.balance(), 0);
        assert!(fund_me.funders().is_empty());
        for funder in &funders {
            assert_eq!(fund_me.address_to_amount_funded(funder), 0, "{path:?}");
        }
    }
}

#[test]
fn non_owner_withdraw_changes_nothing() {
    for path in PATHS {
        let owner = account(1);
        let mut fund_me = deploy(owner);
        let mut host = Host::default();
        fund_me.fund(account(2), NATIVE_UNIT).unwrap();
        fund_me.fund(account(3), 2 * NATIVE_UNIT).unwrap();
        let before = fund_me.to_state();

        for attacker in [account(2), account(3), account(99)] {
            let err = run(path, &mut fund_me, &attacker, &mut host).unwrap_err();
            assert_eq!(err, FundMeError::Unauthorized, "{path:?}");
        }
        assert_eq!(fund_me.to_state(), before);
        assert!(host.balances.is_empty());
    }
}

#[test]
fn random_contributions_sum_exactly() {
    let mut rng = StdRng::seed_from_u64(7);
    let owner = account(1);
    let mut fund_me = deploy(owner);
    let mut expected: BTreeMap<Address, NativeAmount> = BTreeMap::new();
    let mut order = Vec::new();

    for _ in 0..200 {
        let funder = account(rng.gen_range(2..8));
        let amount: NativeAmount = rng.gen_range(0..3 * NATIVE_UNIT);
        match fund_me.fund(funder, amount) {
            Ok(()) => {
                if !expected.contains_key(&funder) {
                    order.push(funder);
                }
                *expected.entry(funder).or_default() += amount;
            }
            Err(FundMeError::InsufficientContribution { .. }) => {
                assert!(amount < NATIVE_UNIT / 40);
            }
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    for (funder, total) in &expected {
        assert_eq!(fund_me.address_to_amount_funded(funder), *total);
    }
    assert_eq!(fund_me.funders(), order.as_slice());
    assert_eq!(fund_me.balance(), expected.values().sum::<u128>());
}

#[test]
fn repeated_cycles_return_to_empty_state() {
    for path in PATHS {
        let owner = account(1);
        let mut fund_me = deploy(owner);
        let mut host = Host::default();
        let empty = fund_me.to_state();
        let mut paid_total = 0;

        for cycle in 1..=5u8 {
            for seed in 0..cycle {
                fund_me.fund(account(20 + seed), NATIVE_UNIT).unwrap();
                // returning contributors never get a second list entry
                fund_me.fund(account(20 + seed), NATIVE_UNIT).unwrap();
            }
            assert_eq!(fund_me.funders().len(), cycle as usize);
            paid_total += run(path, &mut fund_me, &owner, &mut host).unwrap();
            assert_eq!(fund_me.to_state(), empty, "{path:?} cycle {cycle}");
        }
        assert_eq!(host.balances[&owner], paid_total);
        assert_eq!(paid_total, 30 * NATIVE_UNIT);
    }
}

#[test]
fn funder_lookup_past_end_fails() {
    let mut fund_me = deploy(account(1));
    fund_me.fund(account(2), NATIVE_UNIT).unwrap();
    assert_eq!(fund_me.funder(0).unwrap(), account(2));
    assert_eq!(
        fund_me.funder(1).unwrap_err(),
        FundMeError::IndexOutOfRange { index: 1, len: 1 }
    );
}
