//! Step definitions for the token service and consensus topic features.
//!
//! Each scenario starts from a fresh [`ScenarioContext`] and drives a ledger
//! client through the same steps a feature file would, failing on the first
//! step that doesn't hold.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use tally_core::{
    config::WatchConfig, Account, AccountDirectory, BalanceReconciler, LedgerClient,
    ScenarioContext, TransactionComposer,
};

use crate::prelude::*;

pub mod token_service;
pub mod topics;

pub use token_service::TokenScenario;
pub use topics::TopicScenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    TokenService,
    Topics,
}

impl Feature {
    pub fn all() -> Vec<Feature> {
        vec![Feature::TokenService, Feature::Topics]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Feature::TokenService => "token service",
            Feature::Topics => "consensus topics",
        }
    }
}

/// The state a step acts on: the ledger, the scenario's context and the
/// watch settings for topic steps.
pub struct Steps<'a, C> {
    pub client: &'a C,
    pub context: ScenarioContext,
    pub watch: WatchConfig,
}

impl<'a, C: LedgerClient> Steps<'a, C> {
    pub fn new(client: &'a C, directory: AccountDirectory, watch: WatchConfig) -> Self {
        Self {
            client,
            context: ScenarioContext::new(directory),
            watch,
        }
    }

    /// Fixture account by position, zero being the first account.
    pub fn account(&self, index: usize) -> Result<Account, Error> {
        Ok(self.context.directory.get(index)?.clone())
    }

    pub(crate) fn composer(&self) -> TransactionComposer<'_, C> {
        TransactionComposer::new(self.client, &self.context.directory)
    }

    pub(crate) fn reconciler(&self) -> BalanceReconciler<'_, C> {
        BalanceReconciler::new(self.client, &self.context.directory)
    }

    /// Holds when the account's hbar balance is strictly above `min_hbars`
    /// whole hbars.
    pub async fn account_has_more_than_hbars(
        &self,
        index: usize,
        min_hbars: u64,
    ) -> Result<(), Error> {
        let account = self.account(index)?;
        let balance = self.client.query_balance(&account.id).await?;

        ensure(balance.whole_hbars() > min_hbars, || {
            format!(
                "{} holds {} hbar, expected more than {min_hbars}",
                account.id,
                balance.whole_hbars()
            )
        })
    }
}

pub(crate) fn ensure(condition: bool, describe: impl FnOnce() -> String) -> Result<(), Error> {
    if condition {
        Ok(())
    } else {
        Err(Error::expectation(describe()))
    }
}

pub struct ScenarioOutcome {
    pub feature: Feature,
    pub scenario: &'static str,
    pub elapsed: Duration,
    pub result: Result<(), Error>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs every scenario of `feature`, each against its own context.
pub async fn run_feature<C: LedgerClient>(
    feature: Feature,
    client: &C,
    directory: &AccountDirectory,
    watch: &WatchConfig,
) -> Vec<ScenarioOutcome> {
    let mut outcomes = vec![];

    match feature {
        Feature::TokenService => {
            for scenario in TokenScenario::all() {
                let mut steps = Steps::new(client, directory.clone(), watch.clone());
                let started = Instant::now();
                let result = scenario.run(&mut steps).await;

                outcomes.push(outcome(feature, scenario.name(), started, result));
            }
        }
        Feature::Topics => {
            for scenario in TopicScenario::all() {
                let mut steps = Steps::new(client, directory.clone(), watch.clone());
                let started = Instant::now();
                let result = scenario.run(&mut steps).await;

                outcomes.push(outcome(feature, scenario.name(), started, result));
            }
        }
    }

    outcomes
}

fn outcome(
    feature: Feature,
    scenario: &'static str,
    started: Instant,
    result: Result<(), Error>,
) -> ScenarioOutcome {
    match &result {
        Ok(()) => info!(feature = feature.name(), scenario, "scenario passed"),
        Err(err) => warn!(feature = feature.name(), scenario, %err, "scenario failed"),
    }

    ScenarioOutcome {
        feature,
        scenario,
        elapsed: started.elapsed(),
        result,
    }
}
