//! Deterministic price feed for development chains and tests.

use std::{
    collections::BTreeMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};

use crate::oracle::{FeedError, PriceFeed, RoundData};

pub const MOCK_VERSION: u64 = 0;

/// Serializable contents of a [`MockV3Aggregator`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockFeedState {
    pub decimals: u8,
    pub latest_round: u64,
    pub rounds: BTreeMap<u64, RoundData>,
    pub available: bool,
}

/// Mock aggregator that answers with whatever was last pushed into it.
///
/// Rounds are kept behind a lock so a shared `Arc` handle held by a ledger
/// can still be updated by whoever deployed the mock.
#[derive(Debug)]
pub struct MockV3Aggregator {
    state: RwLock<MockFeedState>,
}

impl MockV3Aggregator {
    pub fn new(decimals: u8, initial_answer: i128) -> Self {
        let mock = Self {
            state: RwLock::new(MockFeedState {
                decimals,
                latest_round: 0,
                rounds: BTreeMap::new(),
                available: true,
            }),
        };
        mock.update_answer(initial_answer, 0);
        mock
    }

    pub fn from_state(state: MockFeedState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn to_state(&self) -> MockFeedState {
        self.read().clone()
    }

    /// Starts a new round with `answer`.
    pub fn update_answer(&self, answer: i128, timestamp: u64) -> u64 {
        let mut state = self.write();
        let round_id = state.latest_round + 1;
        state.latest_round = round_id;
        state.rounds.insert(
            round_id,
            RoundData {
                round_id,
                answer,
                started_at: timestamp,
                updated_at: timestamp,
                answered_in_round: round_id,
            },
        );
        tracing::debug!(round_id, answer, "mock feed answer updated");
        round_id
    }

    /// Overwrites (or inserts) a specific round and makes it the latest one.
    pub fn update_round_data(&self, round_id: u64, answer: i128, timestamp: u64, started_at: u64) {
        let mut state = self.write();
        state.latest_round = round_id;
        state.rounds.insert(
            round_id,
            RoundData {
                round_id,
                answer,
                started_at,
                updated_at: timestamp,
                answered_in_round: round_id,
            },
        );
    }

    /// Simulates the feed going offline.
    pub fn set_available(&self, available: bool) {
        self.write().available = available;
    }

    fn read(&self) -> RwLockReadGuard<'_, MockFeedState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MockFeedState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PriceFeed for MockV3Aggregator {
    fn decimals(&self) -> u8 {
        self.read().decimals
    }

    fn description(&self) -> String {
        "v0.8/tests/MockV3Aggregator.sol".into()
    }

    fn version(&self) -> u64 {
        MOCK_VERSION
    }

    fn latest_round_data(&self) -> Result<RoundData, FeedError> {
        let state = self.read();
        if !state.available {
            return Err(FeedError::Unreachable("mock feed disabled".into()));
        }
        state
            .rounds
            .get(&state.latest_round)
            .copied()
            .ok_or(FeedError::NoData)
    }

    fn get_round_data(&self, round_id: u64) -> Result<RoundData, FeedError> {
        let state = self.read();
        if !state.available {
            return Err(FeedError::Unreachable("mock feed disabled".into()));
        }
        state
            .rounds
            .get(&round_id)
            .copied()
            .ok_or(FeedError::UnknownRound(round_id))
    }
}
