//! Core of the FundMe funding ledger.
//!
//! The crate is split along the two components of the system:
//!
//! * [`oracle`] — the price adapter: a [`oracle::PriceFeed`] capability and
//!   the conversion from native units into reference (USD-like) units.
//! * [`fund_me`] — the ledger itself: minimum-gated contributions, the funder
//!   registry, and owner-only withdrawals.
//!
//! Supporting modules provide the [`address::Address`] identity type,
//! fixed-point [`units`], and a deterministic [`mock::MockV3Aggregator`] for
//! development chains and tests. The hosting environment (caller identity,
//! value transfers, persistence) lives outside this crate.

pub mod address;
pub mod fund_me;
pub mod mock;
pub mod oracle;
pub mod units;

mod error;

pub use address::Address;
pub use error::FundMeError;
pub use fund_me::{FundMe, FundMeState, TransferError, ValueTransfer, WithdrawReceipt};
pub use oracle::{FeedHandle, PriceFeed};
pub use units::{NativeAmount, ReferenceAmount, MINIMUM_USD};
