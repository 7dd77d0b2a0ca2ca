use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use clap::Parser;
use fundme_core::{
    oracle,
    units::{format_native, parse_native},
    MINIMUM_USD,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    chain::{Devnet, TxStatus},
    cli::{CliOptions, Command},
    config::Config,
    tx::{address_of, Call},
};

mod chain;
mod cli;
mod config;
mod tx;

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(opts: &CliOptions) -> anyhow::Result<Devnet> {
    Devnet::load(&opts.state).with_context(|| {
        format!(
            "loading devnet state from {} (run `fundme deploy` first)",
            opts.state.display()
        )
    })
}

/// Signs `call` from development account `index`, applies it and persists
/// the resulting state.
fn transact(opts: &CliOptions, index: u32, call: Call) -> anyhow::Result<()> {
    let mut devnet = load(opts)?;
    let tx = devnet.sign_call(index, call)?;
    let receipt = devnet.execute(&tx)?;
    devnet.save(&opts.state)?;
    print_json(&receipt)?;
    if let TxStatus::Reverted { reason } = &receipt.status {
        bail!("{} reverted: {reason}", receipt.call);
    }
    Ok(())
}

fn deploy_cmd(opts: &CliOptions, force: bool) -> anyhow::Result<()> {
    if opts.state.exists() && !force {
        bail!(
            "{} already exists, pass --force to redeploy",
            opts.state.display()
        );
    }
    let config = Config::load(opts.config.as_deref())?;
    let network = config.network(&opts.network)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let devnet = Devnet::deploy(network, now)?;
    devnet.save(&opts.state)?;
    info!(state = %opts.state.display(), "devnet deployed");
    print_json(devnet.deployments())
}

fn accounts_cmd(opts: &CliOptions) -> anyhow::Result<()> {
    let devnet = load(opts)?;
    let mut rows = Vec::new();
    for index in 0.. {
        let Ok(key) = devnet.signer(index) else {
            break;
        };
        let address = address_of(&key);
        let account = devnet.accounts().get(&address).cloned().unwrap_or_default();
        rows.push(json!({
            "index": index,
            "address": address,
            "balance": format_native(account.balance),
            "nonce": account.nonce,
        }));
    }
    print_json(&rows)
}

fn price_cmd(opts: &CliOptions) -> anyhow::Result<()> {
    let devnet = load(opts)?;
    let feed = devnet.fund_me().price_feed().feed();
    let round = feed.latest_round_data()?;
    let price = oracle::get_price(feed)?;
    let minimum_native = oracle::minimum_native(feed, MINIMUM_USD)?;
    print_json(&json!({
        "feed": devnet.fund_me().price_feed().address(),
        "description": feed.description(),
        "round_id": round.round_id,
        "answer": round.answer.to_string(),
        "decimals": feed.decimals(),
        "price": format_native(price),
        "minimum_usd": format_native(MINIMUM_USD),
        "minimum_native": format_native(minimum_native),
    }))
}

fn amount_funded_cmd(opts: &CliOptions, index: u32) -> anyhow::Result<()> {
    let devnet = load(opts)?;
    let funder = address_of(&devnet.signer(index)?);
    let amount = devnet.fund_me().address_to_amount_funded(&funder);
    print_json(&json!({
        "funder": funder,
        "amount": format_native(amount),
    }))
}

fn funder_cmd(opts: &CliOptions, index: usize) -> anyhow::Result<()> {
    let devnet = load(opts)?;
    let funder = devnet.fund_me().funder(index)?;
    print_json(&json!({ "index": index, "funder": funder }))
}

fn show_cmd(opts: &CliOptions) -> anyhow::Result<()> {
    let devnet = load(opts)?;
    let fund_me = devnet.fund_me();
    let funders: Vec<_> = fund_me
        .funders()
        .iter()
        .map(|funder| {
            json!({
                "funder": funder,
                "amount": format_native(fund_me.address_to_amount_funded(funder)),
            })
        })
        .collect();
    print_json(&json!({
        "network": devnet.meta().network,
        "chain_id": devnet.meta().chain_id,
        "height": devnet.meta().height,
        "deployments": devnet.deployments(),
        "owner": fund_me.owner(),
        "price_feed": fund_me.price_feed().address(),
        "balance": format_native(fund_me.balance()),
        "funders": funders,
        "state_root": hex::encode(devnet.snapshot().state_root),
    }))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = CliOptions::parse();
    match &opts.command {
        Command::Deploy { force } => deploy_cmd(&opts, *force),
        Command::Accounts => accounts_cmd(&opts),
        Command::Fund { account, amount } => {
            let amount = parse_native(amount)?;
            transact(&opts, *account, Call::Fund { amount })
        }
        Command::Withdraw { account } => transact(&opts, *account, Call::Withdraw),
        Command::CheaperWithdraw { account } => transact(&opts, *account, Call::CheaperWithdraw),
        Command::UpdateAnswer { account, answer } => {
            transact(&opts, *account, Call::UpdateAnswer { answer: *answer })
        }
        Command::Price => price_cmd(&opts),
        Command::AmountFunded { account } => amount_funded_cmd(&opts, *account),
        Command::Funder { index } => funder_cmd(&opts, *index),
        Command::Show => show_cmd(&opts),
    }
}
