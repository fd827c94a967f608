use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use tally_core::config::HarnessConfig;

mod accounts;
mod common;
mod run;

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs feature scenarios against the configured ledger
    Run(run::Args),

    /// Lists the configured fixture accounts
    Accounts(accounts::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "Tally")]
#[clap(bin_name = "tally")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

pub fn load_config(explicit_file: &Option<PathBuf>) -> Result<HarnessConfig, config::ConfigError> {
    let mut s = config::Config::builder();

    // our base config will always be in /etc/tally
    s = s.add_source(config::File::with_name("/etc/tally/tally.toml").required(false));

    // but we can override it by having a file in the working dir
    s = s.add_source(config::File::with_name("tally.toml").required(false));

    // if an explicit file was passed, then we load it as mandatory
    if let Some(explicit) = explicit_file.as_ref().and_then(|x| x.to_str()) {
        s = s.add_source(config::File::with_name(explicit).required(true));
    }

    // finally, we use env vars to make some last-step overrides
    s = s.add_source(
        config::Environment::with_prefix("TALLY")
            .prefix_separator("_")
            .separator("__"),
    );

    s.build()?.try_deserialize()
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = load_config(&args.config).into_diagnostic()?;

    match args.command {
        Command::Run(x) => run::run(config, &x)?,
        Command::Accounts(x) => accounts::run(&config, &x)?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();

        writeln!(
            file,
            r#"
            [watch]
            timeout_secs = 5
            lookback_secs = 10

            [logging]
            max_level = "debug"
            "#
        )
        .unwrap();

        let config = load_config(&Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.watch.timeout_secs, 5);
        assert_eq!(config.watch.lookback_secs, 10);
        assert_eq!(config.logging.max_level, tracing::Level::DEBUG);
        assert_eq!(config.accounts.entries.len(), 5);
    }

    #[test]
    fn single_watch_field_falls_back_for_the_other() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();

        writeln!(
            file,
            r#"
            [watch]
            timeout_secs = 7
            "#
        )
        .unwrap();

        let config = load_config(&Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.watch.timeout_secs, 7);
        assert_eq!(config.watch.lookback_secs, 60);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/tally-config.toml");
        assert!(load_config(&Some(path)).is_err());
    }
}
