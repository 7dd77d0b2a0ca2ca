use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_NETWORK;

/// FundMe local devnet
///
/// Deploys a mock price feed and a FundMe ledger onto a single-process
/// development chain persisted in a JSON state file, then drives the ledger
/// with signed calls from the deterministic development accounts.
#[derive(Debug, Parser)]
#[clap(name = "fundme", version)]
pub struct CliOptions {
    /// Devnet state file
    #[clap(long, default_value = "fundme-devnet.json", value_name = "PATH")]
    pub state: PathBuf,

    /// Network to deploy on (must be a development chain)
    #[clap(long, short, default_value = DEFAULT_NETWORK, value_name = "NAME")]
    pub network: String,

    /// JSON file with additional or overriding network definitions
    #[clap(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a fresh devnet: accounts, MockV3Aggregator and FundMe
    Deploy {
        /// Overwrite an existing state file
        #[clap(long)]
        force: bool,
    },
    /// List development accounts with balances and nonces
    Accounts,
    /// Contribute native value from a development account
    Fund {
        #[clap(long, short, default_value = "0", value_name = "INDEX")]
        account: u32,
        /// Amount in whole native units, e.g. 0.05
        #[clap(long, value_name = "AMOUNT")]
        amount: String,
    },
    /// Withdraw the whole balance to the owner
    Withdraw {
        #[clap(long, short, default_value = "0", value_name = "INDEX")]
        account: u32,
    },
    /// Withdraw through the snapshot-iterating path
    CheaperWithdraw {
        #[clap(long, short, default_value = "0", value_name = "INDEX")]
        account: u32,
    },
    /// Push a new answer into the mock feed (deployer only)
    UpdateAnswer {
        #[clap(long, short, default_value = "0", value_name = "INDEX")]
        account: u32,
        #[clap(long, allow_hyphen_values = true, value_name = "ANSWER")]
        answer: i128,
    },
    /// Current feed price and the minimum contribution it implies
    Price,
    /// Recorded contribution of a development account
    AmountFunded {
        #[clap(long, short, value_name = "INDEX")]
        account: u32,
    },
    /// Funder at a position of the funder list
    Funder {
        #[clap(long, short, value_name = "INDEX")]
        index: usize,
    },
    /// Print the ledger state and deployment addresses
    Show,
}
