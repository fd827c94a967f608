//! Per-scenario state threaded through steps.

use tracing::debug;

use crate::{
    AccountDirectory, AccountId, HarnessError, PendingOperation, PublicKey, Receipt, Record,
    ThresholdPolicy, TokenAmount, TokenId, TokenInfo, TopicId,
};

/// The active token as last observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub token: TokenId,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub total_supply: TokenAmount,
    pub treasury: AccountId,
    pub supply_key: Option<PublicKey>,
}

impl TokenState {
    /// Tokens without a supply key have a fixed supply.
    pub fn is_mintable(&self) -> bool {
        self.supply_key.is_some()
    }
}

impl From<TokenInfo> for TokenState {
    fn from(value: TokenInfo) -> Self {
        Self {
            token: value.token,
            name: value.name,
            symbol: value.symbol,
            decimals: value.decimals,
            total_supply: value.total_supply,
            treasury: value.treasury,
            supply_key: value.supply_key,
        }
    }
}

/// Created at scenario start and dropped at scenario end; nothing in it
/// outlives a scenario.
#[derive(Debug)]
pub struct ScenarioContext {
    pub directory: AccountDirectory,
    pub token: Option<TokenState>,
    pub topic: Option<TopicId>,
    pub threshold: Option<ThresholdPolicy>,
    pub last_receipt: Option<Receipt>,
    pub last_record: Option<Record>,
    pending: Option<PendingOperation>,
}

impl ScenarioContext {
    pub fn new(directory: AccountDirectory) -> Self {
        Self {
            directory,
            token: None,
            topic: None,
            threshold: None,
            last_receipt: None,
            last_record: None,
            pending: None,
        }
    }

    /// Holds an operation until a later step submits it. Only one operation
    /// can wait at a time.
    pub fn stage_pending(&mut self, pending: PendingOperation) -> Result<(), HarnessError> {
        if self.pending.is_some() {
            return Err(HarnessError::PendingConflict);
        }

        debug!(kind = %pending.kind(), stage = ?pending.stage(), "operation staged");
        self.pending = Some(pending);

        Ok(())
    }

    pub fn take_pending(&mut self) -> Result<PendingOperation, HarnessError> {
        self.pending.take().ok_or(HarnessError::NoPending)
    }

    pub fn pending(&self) -> Option<&PendingOperation> {
        self.pending.as_ref()
    }

    pub fn require_token(&self) -> Result<&TokenState, HarnessError> {
        self.token.as_ref().ok_or(HarnessError::MissingContext("token"))
    }

    pub fn require_topic(&self) -> Result<TopicId, HarnessError> {
        self.topic.ok_or(HarnessError::MissingContext("topic"))
    }

    pub fn require_threshold(&self) -> Result<&ThresholdPolicy, HarnessError> {
        self.threshold
            .as_ref()
            .ok_or(HarnessError::MissingContext("threshold policy"))
    }
}
