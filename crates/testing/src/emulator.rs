//! In-memory ledger implementing [`LedgerClient`].
//!
//! Operations are validated, applied and finalized at submission time, so a
//! receipt is available as soon as `submit` returns. Topic messages are kept
//! in a log per topic and fanned out to live subscriptions through a
//! broadcast channel.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    task::{Context, Poll},
};

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use tally_core::*;

/// Fee charged to the payer of every processed operation.
pub const DEFAULT_FEE: Tinybar = 100_000;

const FIRST_ENTITY: u64 = 5000;

#[derive(Debug, Clone)]
struct AccountEntry {
    key: PublicKey,
    hbars: Tinybar,
    tokens: BTreeMap<TokenId, TokenAmount>,
}

#[derive(Debug, Clone)]
struct TopicEntry {
    memo: String,
    submit_key: Option<Key>,
    messages: Vec<TopicMessage>,
}

#[derive(Default)]
struct LedgerState {
    accounts: BTreeMap<AccountId, AccountEntry>,
    tokens: BTreeMap<TokenId, TokenInfo>,
    topics: BTreeMap<TopicId, TopicEntry>,
    receipts: HashMap<TxId, Receipt>,
    records: HashMap<TxId, Record>,
    submitted: Vec<SignedOperation>,
    next_entity: u64,
    next_seq: u64,
    last_consensus: Option<DateTime<Utc>>,
}

impl LedgerState {
    fn next_entity(&mut self) -> u64 {
        self.next_entity += 1;
        FIRST_ENTITY + self.next_entity
    }

    /// Strictly increasing consensus timestamps, even within one clock tick.
    fn consensus_now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();

        let at = match self.last_consensus {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };

        self.last_consensus = Some(at);
        at
    }

    fn account(&self, id: &AccountId) -> Result<&AccountEntry, Status> {
        self.accounts.get(id).ok_or(Status::InvalidAccountId)
    }
}

/// Keys that signed an operation, after signature verification.
struct Authorization {
    signers: std::collections::BTreeSet<PublicKey>,
}

impl Authorization {
    fn require(&self, key: &PublicKey) -> Result<(), Status> {
        if self.signers.contains(key) {
            Ok(())
        } else {
            Err(Status::InvalidSignature)
        }
    }

    fn require_key(&self, key: &Key) -> Result<(), Status> {
        if key.is_satisfied_by(&self.signers) {
            Ok(())
        } else {
            Err(Status::InvalidSignature)
        }
    }
}

/// An in-memory ledger network.
#[derive(Clone)]
pub struct EmulatedLedger {
    state: Arc<RwLock<LedgerState>>,
    messages: broadcast::Sender<TopicMessage>,
    active_subscriptions: Arc<AtomicUsize>,
    fee: Tinybar,
}

impl EmulatedLedger {
    pub fn new() -> Self {
        let state = Arc::new(RwLock::new(LedgerState::default()));
        let (messages, _) = broadcast::channel(64);

        Self {
            state,
            messages,
            active_subscriptions: Default::default(),
            fee: DEFAULT_FEE,
        }
    }

    /// A ledger with every directory account opened and funded.
    pub fn with_directory(directory: &AccountDirectory, hbars: u64) -> Self {
        let ledger = Self::new();

        for account in directory.iter() {
            ledger.open_account(account.id, account.public_key(), hbars * TINYBARS_PER_HBAR);
        }

        ledger
    }

    pub fn with_fee(self, fee: Tinybar) -> Self {
        Self { fee, ..self }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Transport("ledger state poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::Transport("ledger state poisoned".into()))
    }

    pub fn open_account(&self, id: AccountId, key: PublicKey, hbars: Tinybar) {
        let entry = AccountEntry {
            key,
            hbars,
            tokens: BTreeMap::new(),
        };

        if let Ok(mut state) = self.write() {
            state.accounts.insert(id, entry);
            debug!(account = %id, hbars, "account opened");
        }
    }

    /// Number of subscriptions currently alive.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Every operation accepted for processing, in submission order.
    pub fn submitted(&self) -> Vec<SignedOperation> {
        self.read()
            .map(|state| state.submitted.clone())
            .unwrap_or_default()
    }

    pub fn submitted_kinds(&self) -> Vec<OperationKind> {
        self.submitted()
            .iter()
            .map(|x| x.operation.kind())
            .collect()
    }

    fn verify(signed: &SignedOperation) -> Result<Authorization, Status> {
        let payload = signed
            .operation
            .payload()
            .map_err(|_| Status::InvalidSignature)?;

        for (key, signature) in &signed.signatures {
            if !key.verify(&payload, signature) {
                return Err(Status::InvalidSignature);
            }
        }

        Ok(Authorization {
            signers: signed.signers(),
        })
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        operation: &Operation,
        auth: &Authorization,
        consensus_at: DateTime<Utc>,
    ) -> Result<Option<CreatedEntity>, Status> {
        match operation {
            Operation::TokenCreate(x) => {
                if x.name.trim().is_empty() {
                    return Err(Status::MissingTokenName);
                }

                if x.symbol.trim().is_empty() {
                    return Err(Status::MissingTokenSymbol);
                }

                auth.require(&state.account(&x.treasury)?.key)?;

                if let Some(admin) = &x.admin_key {
                    auth.require(admin)?;
                }

                let token = TokenId::from_num(state.next_entity());

                state.tokens.insert(
                    token,
                    TokenInfo {
                        token,
                        name: x.name.clone(),
                        symbol: x.symbol.clone(),
                        decimals: x.decimals,
                        total_supply: x.initial_supply,
                        treasury: x.treasury,
                        admin_key: x.admin_key,
                        supply_key: x.supply_key,
                    },
                );

                if let Some(treasury) = state.accounts.get_mut(&x.treasury) {
                    treasury.tokens.insert(token, x.initial_supply);
                }

                Ok(Some(CreatedEntity::Token(token)))
            }
            Operation::TokenAssociate { account, tokens } => {
                let entry = state.account(account)?;
                auth.require(&entry.key)?;

                for token in tokens {
                    if !state.tokens.contains_key(token) {
                        return Err(Status::InvalidTokenId);
                    }

                    if entry.tokens.contains_key(token) {
                        return Err(Status::TokenAlreadyAssociatedToAccount);
                    }
                }

                if let Some(entry) = state.accounts.get_mut(account) {
                    for token in tokens {
                        entry.tokens.insert(*token, 0);
                    }
                }

                Ok(None)
            }
            Operation::TokenMint { token, amount } => {
                let info = state.tokens.get(token).ok_or(Status::InvalidTokenId)?;
                let supply_key = info.supply_key.ok_or(Status::TokenHasNoSupplyKey)?;

                auth.require(&supply_key)?;

                if *amount == 0 {
                    return Err(Status::InvalidTokenMintAmount);
                }

                let treasury = info.treasury;

                if let Some(info) = state.tokens.get_mut(token) {
                    info.total_supply += amount;
                }

                if let Some(entry) = state.accounts.get_mut(&treasury) {
                    *entry.tokens.entry(*token).or_default() += amount;
                }

                Ok(None)
            }
            Operation::TokenTransfer { token, transfers } => {
                if !state.tokens.contains_key(token) {
                    return Err(Status::InvalidTokenId);
                }

                if transfers.is_empty() {
                    return Err(Status::EmptyTokenTransferAccountAmounts);
                }

                let sum: i128 = transfers.iter().map(|(_, x)| *x as i128).sum();

                if sum != 0 {
                    return Err(Status::TransfersNotZeroSumForToken);
                }

                for (account, delta) in transfers {
                    let entry = state.account(account)?;

                    let Some(held) = entry.tokens.get(token) else {
                        return Err(Status::TokenNotAssociatedToAccount);
                    };

                    if *delta < 0 {
                        auth.require(&entry.key)?;

                        if *held < delta.unsigned_abs() {
                            return Err(Status::InsufficientTokenBalance);
                        }
                    }
                }

                for (account, delta) in transfers {
                    if let Some(held) = state
                        .accounts
                        .get_mut(account)
                        .and_then(|x| x.tokens.get_mut(token))
                    {
                        *held = held.saturating_add_signed(*delta);
                    }
                }

                Ok(None)
            }
            Operation::TopicCreate { memo, submit_key } => {
                let topic = TopicId::from_num(state.next_entity());

                state.topics.insert(
                    topic,
                    TopicEntry {
                        memo: memo.clone(),
                        submit_key: submit_key.clone(),
                        messages: vec![],
                    },
                );

                Ok(Some(CreatedEntity::Topic(topic)))
            }
            Operation::TopicMessageSubmit { topic, message } => {
                let entry = state.topics.get_mut(topic).ok_or(Status::InvalidTopicId)?;

                if message.is_empty() {
                    return Err(Status::InvalidTopicMessage);
                }

                if let Some(key) = &entry.submit_key {
                    auth.require_key(key)?;
                }

                let message = TopicMessage {
                    topic: *topic,
                    sequence_number: entry.messages.len() as u64 + 1,
                    consensus_at,
                    contents: message.clone(),
                };

                entry.messages.push(message.clone());

                if self.messages.send(message).is_err() {
                    debug!("no live topic subscribers");
                }

                Ok(None)
            }
        }
    }
}

impl Default for EmulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the live subscription count when dropped.
struct SubscriptionGuard(Arc<AtomicUsize>);

impl SubscriptionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replays the topic log from the requested start time, then follows live
/// messages.
pub struct EmulatedSubscription {
    topic: TopicId,
    backlog: VecDeque<TopicMessage>,
    live: BroadcastStream<TopicMessage>,
    _guard: SubscriptionGuard,
}

impl futures_core::Stream for EmulatedSubscription {
    type Item = Result<TopicMessage, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(message) = self.backlog.pop_front() {
            return Poll::Ready(Some(Ok(message)));
        }

        loop {
            match self.live.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(x))) if x.topic == self.topic => {
                    return Poll::Ready(Some(Ok(x)))
                }
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(n)))) => {
                    return Poll::Ready(Some(Err(LedgerError::Lagged(n))))
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl LedgerClient for EmulatedLedger {
    type Subscription = EmulatedSubscription;

    async fn query_balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError> {
        let state = self.read()?;

        let entry = state
            .accounts
            .get(account)
            .ok_or(LedgerError::UnknownAccount(*account))?;

        Ok(AccountBalance {
            hbars: entry.hbars,
            tokens: entry.tokens.clone(),
        })
    }

    async fn query_token_info(&self, token: &TokenId) -> Result<TokenInfo, LedgerError> {
        let state = self.read()?;

        state
            .tokens
            .get(token)
            .cloned()
            .ok_or(LedgerError::UnknownToken(*token))
    }

    async fn query_topic_info(&self, topic: &TopicId) -> Result<TopicInfo, LedgerError> {
        let state = self.read()?;

        let entry = state
            .topics
            .get(topic)
            .ok_or(LedgerError::UnknownTopic(*topic))?;

        Ok(TopicInfo {
            topic: *topic,
            memo: entry.memo.clone(),
            submit_key: entry.submit_key.clone(),
            sequence_number: entry.messages.len() as u64,
        })
    }

    async fn submit(&self, operation: SignedOperation) -> Result<TxId, LedgerError> {
        let mut state = self.write()?;

        let payer_key = state
            .accounts
            .get(&operation.payer)
            .map(|x| x.key)
            .ok_or(LedgerError::UnknownAccount(operation.payer))?;

        state.next_seq += 1;

        let tx = TxId {
            payer: operation.payer,
            seq: state.next_seq,
        };

        let consensus_at = state.consensus_now();

        let outcome = Self::verify(&operation).and_then(|auth| {
            auth.require(&payer_key)?;

            let payer = state.account(&operation.payer)?;

            if payer.hbars < self.fee {
                return Err(Status::InsufficientPayerBalance);
            }

            if let Some(payer) = state.accounts.get_mut(&operation.payer) {
                payer.hbars -= self.fee;
            }

            self.apply(&mut state, &operation.operation, &auth, consensus_at)
        });

        let (status, created) = match outcome {
            Ok(created) => (Status::Success, created),
            Err(status) => (status, None),
        };

        match status {
            Status::Success => info!(%tx, kind = %operation.operation.kind(), "operation applied"),
            _ => warn!(%tx, kind = %operation.operation.kind(), %status, "operation failed"),
        }

        state.receipts.insert(tx, Receipt { tx, status, created });

        state.records.insert(
            tx,
            Record {
                tx,
                payer: operation.payer,
                status,
                consensus_at,
                fee: self.fee,
            },
        );

        state.submitted.push(operation);

        Ok(tx)
    }

    async fn receipt(&self, tx: &TxId) -> Result<Receipt, LedgerError> {
        let state = self.read()?;

        state
            .receipts
            .get(tx)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(*tx))
    }

    async fn record(&self, tx: &TxId) -> Result<Record, LedgerError> {
        let state = self.read()?;

        state
            .records
            .get(tx)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(*tx))
    }

    fn subscribe(
        &self,
        topic: &TopicId,
        since: DateTime<Utc>,
    ) -> Result<Self::Subscription, LedgerError> {
        // holding the lock while subscribing keeps backlog and live messages
        // from overlapping or leaving a gap
        let state = self.read()?;

        let entry = state
            .topics
            .get(topic)
            .ok_or(LedgerError::UnknownTopic(*topic))?;

        let backlog = entry
            .messages
            .iter()
            .filter(|x| x.consensus_at >= since)
            .cloned()
            .collect();

        let live = BroadcastStream::new(self.messages.subscribe());

        debug!(%topic, %since, "subscription opened");

        Ok(EmulatedSubscription {
            topic: *topic,
            backlog,
            live,
            _guard: SubscriptionGuard::new(self.active_subscriptions.clone()),
        })
    }
}
