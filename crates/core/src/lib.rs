use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    str::FromStr,
};
use thiserror::Error;

pub mod compose;
pub mod config;
pub mod context;
pub mod directory;
pub mod keys;
pub mod reconcile;
pub mod submit;
pub mod watch;

pub use compose::{OperationSpec, PendingOperation, PendingStage, TransactionComposer};
pub use context::{ScenarioContext, TokenState};
pub use directory::{Account, AccountDirectory, Role};
pub use keys::*;
pub use reconcile::{BalanceReconciler, Reconciliation};
pub use watch::{Matched, SubscriptionWatcher, WatchError};

/// The smallest hbar denomination
pub type Tinybar = u64;

pub const TINYBARS_PER_HBAR: Tinybar = 100_000_000;

/// A token amount in the token's smallest unit
pub type TokenAmount = u64;

/// The order of a message within a topic
pub type SequenceNumber = u64;

#[derive(Debug, Error)]
#[error("invalid entity id {0:?}")]
pub struct InvalidEntityId(pub String);

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            pub shard: u64,
            pub realm: u64,
            pub num: u64,
        }

        impl $name {
            pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
                Self { shard, realm, num }
            }

            pub const fn from_num(num: u64) -> Self {
                Self::new(0, 0, num)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
            }
        }

        impl FromStr for $name {
            type Err = InvalidEntityId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let parts: Vec<_> = s.trim().split('.').collect();

                let [shard, realm, num] = parts.as_slice() else {
                    return Err(InvalidEntityId(s.to_owned()));
                };

                let parse = |x: &str| x.parse::<u64>().map_err(|_| InvalidEntityId(s.to_owned()));

                Ok(Self::new(parse(shard)?, parse(realm)?, parse(num)?))
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidEntityId;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

entity_id!(AccountId);
entity_id!(TokenId);
entity_id!(TopicId);

/// Identifies a submitted operation by its payer and the ledger-assigned
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId {
    pub payer: AccountId,
    pub seq: u64,
}

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.payer, self.seq)
    }
}

/// Response codes reported by the ledger in receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    InvalidSignature,
    InvalidAccountId,
    InvalidTokenId,
    InvalidTopicId,
    InvalidTokenMintAmount,
    InsufficientPayerBalance,
    InsufficientTokenBalance,
    TokenHasNoSupplyKey,
    TokenAlreadyAssociatedToAccount,
    TokenNotAssociatedToAccount,
    TransfersNotZeroSumForToken,
    EmptyTokenTransferAccountAmounts,
    MissingTokenSymbol,
    MissingTokenName,
    InvalidTopicMessage,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidAccountId => "INVALID_ACCOUNT_ID",
            Self::InvalidTokenId => "INVALID_TOKEN_ID",
            Self::InvalidTopicId => "INVALID_TOPIC_ID",
            Self::InvalidTokenMintAmount => "INVALID_TOKEN_MINT_AMOUNT",
            Self::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
            Self::InsufficientTokenBalance => "INSUFFICIENT_TOKEN_BALANCE",
            Self::TokenHasNoSupplyKey => "TOKEN_HAS_NO_SUPPLY_KEY",
            Self::TokenAlreadyAssociatedToAccount => "TOKEN_ALREADY_ASSOCIATED_TO_ACCOUNT",
            Self::TokenNotAssociatedToAccount => "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT",
            Self::TransfersNotZeroSumForToken => "TRANSFERS_NOT_ZERO_SUM_FOR_TOKEN",
            Self::EmptyTokenTransferAccountAmounts => "EMPTY_TOKEN_TRANSFER_ACCOUNT_AMOUNTS",
            Self::MissingTokenSymbol => "MISSING_TOKEN_SYMBOL",
            Self::MissingTokenName => "MISSING_TOKEN_NAME",
            Self::InvalidTopicMessage => "INVALID_TOPIC_MESSAGE",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCreate {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub initial_supply: TokenAmount,
    pub treasury: AccountId,
    pub admin_key: Option<PublicKey>,
    pub freeze_key: Option<PublicKey>,
    pub kyc_key: Option<PublicKey>,
    pub wipe_key: Option<PublicKey>,

    /// Absent for fixed-supply tokens
    pub supply_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    TokenCreate(TokenCreate),
    TokenAssociate {
        account: AccountId,
        tokens: Vec<TokenId>,
    },
    TokenMint {
        token: TokenId,
        amount: TokenAmount,
    },
    TokenTransfer {
        token: TokenId,
        transfers: Vec<(AccountId, i64)>,
    },
    TopicCreate {
        memo: String,
        submit_key: Option<Key>,
    },
    TopicMessageSubmit {
        topic: TopicId,
        message: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    TokenCreate,
    TokenAssociate,
    TokenMint,
    TokenTransfer,
    TopicCreate,
    TopicMessageSubmit,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::TokenCreate => "token create",
            Self::TokenAssociate => "token associate",
            Self::TokenMint => "token mint",
            Self::TokenTransfer => "token transfer",
            Self::TopicCreate => "topic create",
            Self::TopicMessageSubmit => "topic message submit",
        };

        f.write_str(label)
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::TokenCreate(_) => OperationKind::TokenCreate,
            Self::TokenAssociate { .. } => OperationKind::TokenAssociate,
            Self::TokenMint { .. } => OperationKind::TokenMint,
            Self::TokenTransfer { .. } => OperationKind::TokenTransfer,
            Self::TopicCreate { .. } => OperationKind::TopicCreate,
            Self::TopicMessageSubmit { .. } => OperationKind::TopicMessageSubmit,
        }
    }

    /// Human readable summary used as context in errors and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::TokenCreate(x) => format!(
                "create {} ({}) with supply {} held by {}",
                x.name, x.symbol, x.initial_supply, x.treasury
            ),
            Self::TokenAssociate { account, tokens } => {
                let tokens = tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>();
                format!("associate {} with [{}]", account, tokens.join(", "))
            }
            Self::TokenMint { token, amount } => format!("mint {amount} of {token}"),
            Self::TokenTransfer { token, transfers } => {
                let legs = transfers
                    .iter()
                    .map(|(account, delta)| format!("{account}:{delta:+}"))
                    .collect::<Vec<_>>();
                format!("transfer {} [{}]", token, legs.join(" "))
            }
            Self::TopicCreate { memo, .. } => format!("create topic {memo:?}"),
            Self::TopicMessageSubmit { topic, message } => {
                format!("submit {} bytes to {}", message.len(), topic)
            }
        }
    }

    /// Canonical bytes covered by signatures.
    pub fn payload(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

/// An operation together with the signatures collected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub operation: Operation,
    pub payer: AccountId,
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl SignedOperation {
    pub fn signers(&self) -> BTreeSet<PublicKey> {
        self.signatures.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedEntity {
    Token(TokenId),
    Topic(TopicId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx: TxId,
    pub status: Status,
    pub created: Option<CreatedEntity>,
}

impl Receipt {
    pub fn token_id(&self) -> Option<TokenId> {
        match self.created {
            Some(CreatedEntity::Token(x)) => Some(x),
            _ => None,
        }
    }

    pub fn topic_id(&self) -> Option<TopicId> {
        match self.created {
            Some(CreatedEntity::Topic(x)) => Some(x),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub tx: TxId,
    pub payer: AccountId,
    pub status: Status,
    pub consensus_at: DateTime<Utc>,
    pub fee: Tinybar,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub hbars: Tinybar,

    /// Associated tokens only; an associated token with nothing held maps to
    /// zero.
    pub tokens: BTreeMap<TokenId, TokenAmount>,
}

impl AccountBalance {
    pub fn token(&self, token: &TokenId) -> TokenAmount {
        self.tokens.get(token).copied().unwrap_or_default()
    }

    pub fn is_associated(&self, token: &TokenId) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn whole_hbars(&self) -> u64 {
        self.hbars / TINYBARS_PER_HBAR
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token: TokenId,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub total_supply: TokenAmount,
    pub treasury: AccountId,
    pub admin_key: Option<PublicKey>,
    pub supply_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: TopicId,
    pub memo: String,
    pub submit_key: Option<Key>,
    pub sequence_number: SequenceNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: TopicId,
    pub sequence_number: SequenceNumber,
    pub consensus_at: DateTime<Utc>,
    pub contents: Vec<u8>,
}

impl TopicMessage {
    pub fn contents_utf8(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("unknown token {0}")]
    UnknownToken(TokenId),

    #[error("unknown topic {0}")]
    UnknownTopic(TopicId),

    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),

    #[error("subscription lagged behind by {0} messages")]
    Lagged(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The capability set of a ledger network client.
///
/// Implementations carry no notion of an "operator": every submission names
/// its payer and carries its own signatures.
#[trait_variant::make(Send)]
pub trait LedgerClient: Clone + Send + Sync + 'static {
    /// A live topic subscription. Dropping it unsubscribes.
    type Subscription: futures_core::Stream<Item = Result<TopicMessage, LedgerError>>
        + Unpin
        + Send;

    async fn query_balance(&self, account: &AccountId) -> Result<AccountBalance, LedgerError>;

    async fn query_token_info(&self, token: &TokenId) -> Result<TokenInfo, LedgerError>;

    async fn query_topic_info(&self, topic: &TopicId) -> Result<TopicInfo, LedgerError>;

    async fn submit(&self, operation: SignedOperation) -> Result<TxId, LedgerError>;

    async fn receipt(&self, tx: &TxId) -> Result<Receipt, LedgerError>;

    async fn record(&self, tx: &TxId) -> Result<Record, LedgerError>;

    fn subscribe(
        &self,
        topic: &TopicId,
        since: DateTime<Utc>,
    ) -> Result<Self::Subscription, LedgerError>;
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("{operation} is missing signatures from {missing:?}")]
    MissingSignatures {
        operation: OperationKind,
        missing: Vec<AccountId>,
    },

    #[error("{operation} carries {present} of the {required} threshold signatures it needs")]
    ThresholdNotMet {
        operation: OperationKind,
        required: usize,
        present: usize,
    },

    #[error("token {token} has no supply key")]
    NoSupplyKey { token: TokenId },

    #[error("no source can provide {shortfall} of fixed-supply token {token} to {account}")]
    SupplyExhausted {
        token: TokenId,
        account: AccountId,
        shortfall: TokenAmount,
    },
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("insufficient authority: {0}")]
    InsufficientAuthority(#[from] AuthorityError),

    #[error("transfer of {token} does not conserve supply, deltas sum to {sum}")]
    ConservationViolation { token: TokenId, sum: i128 },

    #[error("associating {account} with {token} failed: {status}")]
    AssociationFailure {
        account: AccountId,
        token: TokenId,
        status: Status,
    },

    #[error("{operation} rejected with {status} ({summary}, tx {tx})")]
    LedgerRejected {
        operation: OperationKind,
        summary: String,
        tx: TxId,
        status: Status,
    },

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("invalid threshold policy: {0}")]
    InvalidPolicy(String),

    #[error("unknown fixture account {0}")]
    UnknownAccount(String),

    #[error("an operation is already pending")]
    PendingConflict,

    #[error("no operation is pending")]
    NoPending,

    #[error("scenario context is missing {0}")]
    MissingContext(&'static str),
}

impl HarnessError {
    /// The raw ledger status behind the error, if the ledger produced one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::LedgerRejected { status, .. } => Some(*status),
            Self::AssociationFailure { status, .. } => Some(*status),
            _ => None,
        }
    }
}
