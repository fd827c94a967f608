use std::time::Duration;

use tally::{
    prelude::*,
    scenarios::{run_feature, Feature, Steps, TopicScenario},
};
use tally_core::config::WatchConfig;
use tally_testing::{devnet, TestAccount};

fn quick_watch() -> WatchConfig {
    WatchConfig {
        timeout_secs: 5,
        lookback_secs: 60,
    }
}

#[tokio::test]
async fn every_topic_scenario_passes_on_devnet() {
    let (ledger, directory) = devnet();

    for scenario in TopicScenario::all() {
        let mut steps = Steps::new(&ledger, directory.clone(), quick_watch());

        if let Err(err) = scenario.run(&mut steps).await {
            panic!("{} failed: {err}", scenario.name());
        }
    }

    assert_eq!(ledger.active_subscriptions(), 0);
}

#[tokio::test]
async fn feature_runner_reports_each_scenario() {
    let (ledger, directory) = devnet();

    let outcomes = run_feature(Feature::Topics, &ledger, &directory, &quick_watch()).await;

    assert_eq!(outcomes.len(), TopicScenario::all().len());
    assert!(outcomes.iter().all(|x| x.passed()));
}

#[tokio::test]
async fn received_message_matches_published_text() {
    let (ledger, directory) = devnet();
    let mut steps = Steps::new(&ledger, directory, quick_watch());

    steps.create_topic_with_account_key("rides", 0).await.unwrap();
    steps.publish("first ride").await.unwrap();
    steps.publish("second ride").await.unwrap();

    let message = steps.receive("second ride").await.unwrap();

    assert_eq!(message.contents_utf8(), "second ride");
    assert_eq!(message.sequence_number, 2);
    assert_eq!(ledger.active_subscriptions(), 0);
}

#[tokio::test]
async fn publish_signs_with_the_second_key_of_a_threshold() {
    let (ledger, directory) = devnet();
    let second = TestAccount::Second.resolve(&directory).public_key();
    let mut steps = Steps::new(&ledger, directory, quick_watch());

    // the first account is not part of the policy, only the payer
    steps.create_threshold_key(1, &[1, 2]).unwrap();
    steps.create_topic_with_threshold_key("gated").await.unwrap();
    steps.publish("signed by second").await.unwrap();

    let submitted = ledger.submitted();
    let last = submitted.last().unwrap();

    assert!(last.signatures.contains_key(&second));
}

#[tokio::test(start_paused = true)]
async fn unpublished_message_times_out() {
    let (ledger, directory) = devnet();
    let mut steps = Steps::new(&ledger, directory, quick_watch());

    steps.create_topic_with_account_key("quiet", 0).await.unwrap();
    steps.publish("noise").await.unwrap();

    let started = tokio::time::Instant::now();
    let err = steps.receive("never sent").await.unwrap_err();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(matches!(
        err,
        Error::Harness(HarnessError::Watch(WatchError::Timeout { .. }))
    ));
    assert_eq!(ledger.active_subscriptions(), 0);
}

#[tokio::test]
async fn invalid_threshold_is_rejected() {
    let (ledger, directory) = devnet();
    let mut steps = Steps::new(&ledger, directory, quick_watch());

    let err = steps.create_threshold_key(3, &[0, 1]).unwrap_err();
    assert!(matches!(err, Error::Harness(HarnessError::InvalidPolicy(_))));

    let err = steps.create_topic_with_threshold_key("none").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Harness(HarnessError::MissingContext(_))
    ));
}
