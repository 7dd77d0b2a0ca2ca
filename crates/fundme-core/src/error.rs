use thiserror::Error;

/// Canonical error type exposed by the funding ledger and the price adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FundMeError {
    /// The feed could not be read or reported a non-positive answer.
    #[error("price oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The contribution is worth less than the minimum in reference units.
    #[error("you need to spend more: contribution worth {usd_value} is below minimum {minimum}")]
    InsufficientContribution { usd_value: u128, minimum: u128 },

    /// Caller is not the ledger owner.
    #[error("caller is not the owner")]
    Unauthorized,

    /// The environment rejected the payout to the owner.
    #[error("transfer to owner failed: {0}")]
    TransferFailed(String),

    /// The feed handle cannot back a ledger.
    #[error("invalid price feed: {0}")]
    InvalidFeed(&'static str),

    /// Funder lookup past the end of the funder list.
    #[error("funder index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Persisted ledger contents violate the funder list and registry invariants.
    #[error("corrupt ledger state: {0}")]
    CorruptState(&'static str),

    /// Checked arithmetic failed.
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),
}
