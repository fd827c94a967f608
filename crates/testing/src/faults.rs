use std::{
    pin::Pin,
    task::{Context, Poll},
};

use chrono::{DateTime, Utc};
use futures_core::Stream;

use tally_core::{
    AccountBalance, AccountId, LedgerClient, LedgerError, Receipt, Record, SignedOperation,
    TokenId, TokenInfo, TopicId, TopicInfo, TopicMessage, TxId,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TestFault {
    #[default]
    None,
    QueryError,
    SubmitError,
    ReceiptError,
    SubscribeError,

    /// The subscription opens, then fails on its first poll
    StreamError,
}

/// Wraps a ledger client, failing the calls selected by the fault.
#[derive(Clone)]
pub struct FaultyLedger<L> {
    inner: L,
    fault: TestFault,
}

impl<L> FaultyLedger<L> {
    pub fn new(inner: L, fault: TestFault) -> Self {
        Self { inner, fault }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn should_fault(&self, fault: TestFault) -> bool {
        self.fault == fault
    }

    fn fault_err(&self) -> LedgerError {
        LedgerError::Transport(format!("fault injection: {:?}", self.fault))
    }

    fn check(&self, fault: TestFault) -> Result<(), LedgerError> {
        if self.should_fault(fault) {
            return Err(self.fault_err());
        }

        Ok(())
    }
}

/// A subscription that may yield an injected error before the inner stream.
pub struct FaultyStream<S> {
    inner: S,
    pending_fault: Option<LedgerError>,
}

impl<S> Stream for FaultyStream<S>
where
    S: Stream<Item = Result<TopicMessage, LedgerError>> + Unpin,
{
    type Item = Result<TopicMessage, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(err) = self.pending_fault.take() {
            return Poll::Ready(Some(Err(err)));
        }

        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<L: LedgerClient> LedgerClient for FaultyLedger<L> {
    type Subscription = FaultyStream<L::Subscription>;

    async fn query_balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError> {
        self.check(TestFault::QueryError)?;
        self.inner.query_balance(account).await
    }

    async fn query_token_info(&self, token: &TokenId) -> Result<TokenInfo, LedgerError> {
        self.check(TestFault::QueryError)?;
        self.inner.query_token_info(token).await
    }

    async fn query_topic_info(&self, topic: &TopicId) -> Result<TopicInfo, LedgerError> {
        self.check(TestFault::QueryError)?;
        self.inner.query_topic_info(topic).await
    }

    async fn submit(&self, operation: SignedOperation) -> Result<TxId, LedgerError> {
        self.check(TestFault::SubmitError)?;
        self.inner.submit(operation).await
    }

    async fn receipt(&self, tx: &TxId) -> Result<Receipt, LedgerError> {
        self.check(TestFault::ReceiptError)?;
        self.inner.receipt(tx).await
    }

    async fn record(&self, tx: &TxId) -> Result<Record, LedgerError> {
        self.check(TestFault::ReceiptError)?;
        self.inner.record(tx).await
    }

    fn subscribe(
        &self,
        topic: &TopicId,
        since: DateTime<Utc>,
    ) -> Result<Self::Subscription, LedgerError> {
        self.check(TestFault::SubscribeError)?;

        let inner = self.inner.subscribe(topic, since)?;

        let pending_fault = self
            .should_fault(TestFault::StreamError)
            .then(|| self.fault_err());

        Ok(FaultyStream {
            inner,
            pending_fault,
        })
    }
}
