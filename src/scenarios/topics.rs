use chrono::Utc;
use tracing::info;

use tally_core::{
    Key, LedgerClient, Operation, OperationSpec, PendingOperation, SubscriptionWatcher,
    ThresholdPolicy, TopicMessage,
};

use super::{ensure, Steps};
use crate::prelude::*;

const FIRST: usize = 0;
const SECOND: usize = 1;

const MEMO: &str = "Taxi rides";
const MESSAGE: &str = "Hello World";

impl<C: LedgerClient> Steps<'_, C> {
    pub async fn create_topic_with_account_key(
        &mut self,
        memo: &str,
        index: usize,
    ) -> Result<(), Error> {
        let key = self.account(index)?.public_key();
        self.create_topic(memo, key.into()).await
    }

    /// Builds an M-of-N policy over the keys of the given accounts.
    pub fn create_threshold_key(
        &mut self,
        threshold: usize,
        accounts: &[usize],
    ) -> Result<(), Error> {
        let keys = accounts
            .iter()
            .map(|x| self.account(*x).map(|a| a.public_key()))
            .collect::<Result<Vec<_>, Error>>()?;

        self.context.threshold = Some(ThresholdPolicy::new(threshold, keys)?);

        Ok(())
    }

    pub async fn create_topic_with_threshold_key(&mut self, memo: &str) -> Result<(), Error> {
        let policy = self.context.require_threshold()?.clone();
        self.create_topic(memo, policy.into()).await
    }

    async fn create_topic(&mut self, memo: &str, submit_key: Key) -> Result<(), Error> {
        let payer = self.context.directory.treasury().clone();

        let operation = Operation::TopicCreate {
            memo: memo.to_owned(),
            submit_key: Some(submit_key),
        };

        let pending = self.composer().single(operation, &[])?;
        let receipt = self.composer().submit(pending, &payer).await?;

        let topic = receipt
            .topic_id()
            .ok_or_else(|| Error::expectation("topic create receipt names no topic"))?;

        info!(topic = %topic, memo, "topic created");

        self.context.topic = Some(topic);
        self.context.last_receipt = Some(receipt);

        Ok(())
    }

    /// Publishes `message` to the active topic, signed by whichever fixture
    /// accounts its submit key calls for.
    pub async fn publish(&mut self, message: &str) -> Result<(), Error> {
        let topic = self.context.require_topic()?;
        let payer = self.context.directory.treasury().clone();
        let info = self.client.query_topic_info(&topic).await?;

        let operation = Operation::TopicMessageSubmit {
            topic,
            message: message.as_bytes().to_vec(),
        };

        let pending = self.authorize(operation, info.submit_key)?;
        let receipt = self.composer().submit(pending, &payer).await?;

        self.context.last_receipt = Some(receipt);

        Ok(())
    }

    fn authorize(
        &self,
        operation: Operation,
        submit_key: Option<Key>,
    ) -> Result<PendingOperation, Error> {
        let directory = &self.context.directory;
        let composer = self.composer();

        let pending = match submit_key {
            None => composer.single(operation, &[])?,
            Some(Key::Single(key)) => {
                let signer = directory
                    .by_public_key(&key)
                    .ok_or_else(|| Error::expectation("submit key is held by no fixture account"))?;

                composer.single(operation, &[signer])?
            }
            Some(Key::Threshold(policy)) => {
                let signers: Vec<_> = policy
                    .keys()
                    .iter()
                    .filter_map(|key| directory.by_public_key(key))
                    .take(policy.threshold())
                    .collect();

                let mut pending = composer.build(OperationSpec::Threshold { operation, policy })?;

                for signer in signers {
                    pending.sign(&signer.key);
                }

                pending
            }
        };

        Ok(pending)
    }

    /// Waits for `message` on the active topic, replaying the configured
    /// look-back window, and returns it.
    pub async fn receive(&self, message: &str) -> Result<TopicMessage, Error> {
        let topic = self.context.require_topic()?;

        let lookback = chrono::Duration::from_std(self.watch.lookback()).map_err(Error::config)?;
        let since = Utc::now() - lookback;

        let matched = SubscriptionWatcher::new(self.client)
            .wait_for(
                &topic,
                since,
                |x: &TopicMessage| x.contents == message.as_bytes(),
                self.watch.timeout(),
            )
            .await?;

        info!(
            topic = %topic,
            sequence = matched.message.sequence_number,
            contents = %matched.message.contents_utf8(),
            "message received"
        );

        ensure(matched.message.contents_utf8() == message, || {
            format!("received {:?}, expected {message:?}", matched.message.contents_utf8())
        })?;

        Ok(matched.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicScenario {
    AccountSubmitKey,
    ThresholdSubmitKey,
}

impl TopicScenario {
    pub fn all() -> Vec<TopicScenario> {
        vec![TopicScenario::AccountSubmitKey, TopicScenario::ThresholdSubmitKey]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TopicScenario::AccountSubmitKey => "publish with the first account as submit key",
            TopicScenario::ThresholdSubmitKey => "publish with a 1 of 2 threshold submit key",
        }
    }

    pub async fn run<C: LedgerClient>(&self, steps: &mut Steps<'_, C>) -> Result<(), Error> {
        match self {
            TopicScenario::AccountSubmitKey => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_topic_with_account_key(MEMO, FIRST).await?;
                steps.publish(MESSAGE).await?;
                steps.receive(MESSAGE).await?;
            }
            TopicScenario::ThresholdSubmitKey => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.account_has_more_than_hbars(SECOND, 10).await?;
                steps.create_threshold_key(1, &[FIRST, SECOND])?;
                steps.create_topic_with_threshold_key(MEMO).await?;
                steps.publish(MESSAGE).await?;
                steps.receive(MESSAGE).await?;
            }
        }

        Ok(())
    }
}
