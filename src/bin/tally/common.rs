use tracing_subscriber::{filter::Targets, prelude::*};

use tally::prelude::*;
use tally_core::{
    config::{HarnessConfig, LoggingConfig, Network},
    AccountDirectory,
};
use tally_testing::EmulatedLedger;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new()
        .with_target("tally", level)
        .with_target("tally_core", level);

    if config.include_emulator {
        filter = filter.with_target("tally_testing", level);
    }

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish()
        .with(filter)
        .init();

    Ok(())
}

pub fn open_directory(config: &HarnessConfig) -> Result<AccountDirectory, Error> {
    Ok(AccountDirectory::from_config(&config.accounts)?)
}

/// The ledger scenarios run against. Only the emulated devnet is built in;
/// public networks need a client the harness doesn't ship.
pub fn open_ledger(
    config: &HarnessConfig,
    directory: &AccountDirectory,
) -> Result<EmulatedLedger, Error> {
    match config.network.network {
        Network::Devnet => Ok(EmulatedLedger::with_directory(
            directory,
            config.network.initial_hbars,
        )),
        other => Err(Error::config(format!(
            "no ledger client available for {other}, only devnet is supported"
        ))),
    }
}
