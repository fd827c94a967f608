use comfy_table::Table;
use tracing::info;

use tally::{
    prelude::*,
    scenarios::{run_feature, Feature, ScenarioOutcome},
};
use tally_core::config::HarnessConfig;

use crate::common::{open_directory, open_ledger, setup_tracing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FeatureArg {
    TokenService,
    Topics,
    All,
}

impl FeatureArg {
    fn features(&self) -> Vec<Feature> {
        match self {
            FeatureArg::TokenService => vec![Feature::TokenService],
            FeatureArg::Topics => vec![Feature::Topics],
            FeatureArg::All => Feature::all(),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Which feature suite to run
    #[arg(long, value_enum, default_value_t = FeatureArg::All)]
    feature: FeatureArg,
}

fn print_summary(outcomes: &[ScenarioOutcome]) {
    let mut table = Table::new();
    table.set_header(vec!["feature", "scenario", "outcome", "elapsed"]);

    for outcome in outcomes {
        let result = match &outcome.result {
            Ok(()) => "passed".to_string(),
            Err(err) => format!("failed: {err}"),
        };

        table.add_row(vec![
            outcome.feature.name().to_string(),
            outcome.scenario.to_string(),
            result,
            format!("{:.2?}", outcome.elapsed),
        ]);
    }

    println!("{table}");
}

#[tokio::main]
pub async fn run(config: HarnessConfig, args: &Args) -> miette::Result<()> {
    setup_tracing(&config.logging)?;

    let directory = open_directory(&config)?;
    let ledger = open_ledger(&config, &directory)?;

    info!(
        network = %config.network.network,
        accounts = directory.len(),
        "running scenarios"
    );

    let mut outcomes = vec![];

    for feature in args.feature.features() {
        let mut batch = run_feature(feature, &ledger, &directory, &config.watch).await;
        outcomes.append(&mut batch);
    }

    print_summary(&outcomes);

    let failed = outcomes.iter().filter(|x| !x.passed()).count();

    if failed > 0 {
        return Err(Error::message(format!(
            "{failed} of {} scenarios failed",
            outcomes.len()
        ))
        .into());
    }

    Ok(())
}
