//! Price oracle adapter.
//!
//! A [`PriceFeed`] reports the latest native/reference quote as a signed
//! fixed-point integer with its own decimal scale. The free functions here
//! normalize that quote onto the 18-decimal native scale and convert native
//! amounts into reference units. Nothing in this module holds state.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    address::Address,
    error::FundMeError,
    units::{NativeAmount, ReferenceAmount, NATIVE_DECIMALS, NATIVE_UNIT},
};

/// One price round as reported by a feed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: u64,
    pub answer: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("feed has no data")]
    NoData,
    #[error("unknown round {0}")]
    UnknownRound(u64),
}

/// Read-only view of an external price feed.
pub trait PriceFeed: Send + Sync {
    /// Decimal scale of `answer`.
    fn decimals(&self) -> u8;

    fn description(&self) -> String;

    fn version(&self) -> u64;

    fn latest_round_data(&self) -> Result<RoundData, FeedError>;

    fn get_round_data(&self, round_id: u64) -> Result<RoundData, FeedError>;
}

/// Address of a feed together with the capability used to read it.
#[derive(Clone)]
pub struct FeedHandle {
    address: Address,
    feed: Arc<dyn PriceFeed>,
}

impl FeedHandle {
    pub fn new(address: Address, feed: Arc<dyn PriceFeed>) -> Self {
        Self { address, feed }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn feed(&self) -> &dyn PriceFeed {
        self.feed.as_ref()
    }

    /// Checks that the handle can back a ledger.
    pub fn validate(&self) -> Result<(), FundMeError> {
        if self.address.is_zero() {
            return Err(FundMeError::InvalidFeed("feed address is zero"));
        }
        if u32::from(self.feed.decimals()) > NATIVE_DECIMALS {
            return Err(FundMeError::InvalidFeed(
                "feed scale exceeds the native scale",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHandle")
            .field("address", &self.address)
            .field("decimals", &self.feed.decimals())
            .finish()
    }
}

/// Latest positive answer of `feed`, still in the feed's own scale.
fn latest_answer(feed: &dyn PriceFeed) -> Result<u128, FundMeError> {
    let round = feed
        .latest_round_data()
        .map_err(|e| FundMeError::OracleUnavailable(e.to_string()))?;
    if round.answer <= 0 {
        return Err(FundMeError::OracleUnavailable(format!(
            "non-positive answer {} in round {}",
            round.answer, round.round_id
        )));
    }
    Ok(round.answer as u128)
}

fn feed_scale(feed: &dyn PriceFeed) -> Result<u128, FundMeError> {
    let decimals = u32::from(feed.decimals());
    if decimals > NATIVE_DECIMALS {
        return Err(FundMeError::InvalidFeed(
            "feed scale exceeds the native scale",
        ));
    }
    Ok(10u128.pow(decimals))
}

/// Latest price normalized to 18 decimals.
pub fn get_price(feed: &dyn PriceFeed) -> Result<u128, FundMeError> {
    let answer = latest_answer(feed)?;
    let scale = feed_scale(feed)?;
    answer
        .checked_mul(NATIVE_UNIT / scale)
        .ok_or(FundMeError::ArithmeticOverflow("price normalization"))
}

/// Reference value of `amount` native base units, truncated toward zero.
///
/// `amount * price / 10^18` with `price` on the 18-decimal scale reduces to
/// `amount * answer / 10^decimals`, which keeps the intermediate product
/// small enough for realistic balances.
pub fn get_conversion_rate(
    feed: &dyn PriceFeed,
    amount: NativeAmount,
) -> Result<ReferenceAmount, FundMeError> {
    let answer = latest_answer(feed)?;
    let scale = feed_scale(feed)?;
    amount
        .checked_mul(answer)
        .map(|product| product / scale)
        .ok_or(FundMeError::ArithmeticOverflow("conversion"))
}

/// Smallest native amount whose reference value reaches `minimum`.
pub fn minimum_native(
    feed: &dyn PriceFeed,
    minimum: ReferenceAmount,
) -> Result<NativeAmount, FundMeError> {
    let answer = latest_answer(feed)?;
    let scale = feed_scale(feed)?;
    minimum
        .checked_mul(scale)
        .map(|product| product.div_ceil(answer))
        .ok_or(FundMeError::ArithmeticOverflow("minimum contribution"))
}
