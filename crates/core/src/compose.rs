//! Multi-party transaction composition.
//!
//! A [`PendingOperation`] is built once, collects signatures, and is consumed
//! by submission. There is no way back from a submitted operation to a
//! pending one, so an operation can't be submitted twice.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::{
    submit, Account, AccountDirectory, AccountId, AuthorityError, HarnessError, LedgerClient,
    Operation, OperationKind, PrivateKey, PublicKey, Receipt, Record, Signature, SignedOperation,
    ThresholdPolicy, TokenId,
};

/// What to compose.
#[derive(Debug, Clone)]
pub enum OperationSpec {
    /// A token transfer between several accounts. Every debited account
    /// must sign.
    Transfer {
        token: TokenId,
        deltas: Vec<(AccountId, i64)>,
    },

    /// An operation gated by an M-of-N policy.
    Threshold {
        operation: Operation,
        policy: ThresholdPolicy,
    },

    /// An operation requiring the signature of each listed account.
    Single {
        operation: Operation,
        signers: Vec<AccountId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStage {
    /// No signature attached yet
    Built,

    /// Some signatures attached, more required
    Signing,

    /// Every requirement met; the next step is submission
    Ready,
}

#[derive(Debug, Clone)]
pub struct PendingOperation {
    operation: Operation,
    payload: Vec<u8>,
    required: Vec<(AccountId, PublicKey)>,
    policy: Option<ThresholdPolicy>,
    signatures: BTreeMap<PublicKey, Signature>,
}

impl PendingOperation {
    fn new(
        operation: Operation,
        required: Vec<(AccountId, PublicKey)>,
        policy: Option<ThresholdPolicy>,
    ) -> Result<Self, HarnessError> {
        let payload = operation.payload()?;

        Ok(Self {
            operation,
            payload,
            required,
            policy,
            signatures: BTreeMap::new(),
        })
    }

    /// Assembles a pending operation, resolving required signers through
    /// the directory.
    pub fn build(spec: OperationSpec, directory: &AccountDirectory) -> Result<Self, HarnessError> {
        match spec {
            OperationSpec::Transfer { token, deltas } => {
                let transfers = merge_deltas(token, deltas)?;

                let required = transfers
                    .iter()
                    .filter(|(_, delta)| *delta < 0)
                    .map(|(account, _)| {
                        directory
                            .by_id(account)
                            .map(|x| (x.id, x.public_key()))
                    })
                    .collect::<Result<Vec<_>, HarnessError>>()?;

                let operation = Operation::TokenTransfer { token, transfers };

                Self::new(operation, required, None)
            }
            OperationSpec::Threshold { operation, policy } => {
                Self::new(operation, vec![], Some(policy))
            }
            OperationSpec::Single { operation, signers } => {
                let required = signers
                    .iter()
                    .map(|id| directory.by_id(id).map(|x| (x.id, x.public_key())))
                    .collect::<Result<Vec<_>, HarnessError>>()?;

                Self::new(operation, required, None)
            }
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn policy(&self) -> Option<&ThresholdPolicy> {
        self.policy.as_ref()
    }

    /// Attaches a signature over the payload. Signing twice with the same
    /// key has no further effect.
    pub fn sign(&mut self, key: &PrivateKey) {
        let public_key = key.public_key();

        self.signatures
            .entry(public_key)
            .or_insert_with(|| key.sign(&self.payload));
    }

    pub fn signers(&self) -> BTreeSet<PublicKey> {
        self.signatures.keys().copied().collect()
    }

    /// Required accounts that haven't signed yet.
    pub fn missing(&self) -> Vec<AccountId> {
        self.required
            .iter()
            .filter(|(_, key)| !self.signatures.contains_key(key))
            .map(|(account, _)| *account)
            .collect()
    }

    pub fn check_ready(&self) -> Result<(), AuthorityError> {
        let missing = self.missing();

        if !missing.is_empty() {
            return Err(AuthorityError::MissingSignatures {
                operation: self.kind(),
                missing,
            });
        }

        if let Some(policy) = &self.policy {
            let present = policy.satisfied_count(&self.signers());

            if present < policy.threshold() {
                return Err(AuthorityError::ThresholdNotMet {
                    operation: self.kind(),
                    required: policy.threshold(),
                    present,
                });
            }
        }

        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.check_ready().is_ok()
    }

    pub fn stage(&self) -> PendingStage {
        if self.is_ready() {
            PendingStage::Ready
        } else if self.signatures.is_empty() {
            PendingStage::Built
        } else {
            PendingStage::Signing
        }
    }

    /// Finalizes the operation for submission, adding the payer's
    /// signature. Fails without side effects if the operation isn't ready.
    pub fn into_signed(mut self, payer: &Account) -> Result<SignedOperation, HarnessError> {
        self.check_ready()?;
        self.sign(&payer.key);

        Ok(SignedOperation {
            operation: self.operation,
            payer: payer.id,
            signatures: self.signatures,
        })
    }
}

/// Merges duplicate accounts and drops zero legs, keeping first-seen order.
fn merge_deltas(
    token: TokenId,
    deltas: Vec<(AccountId, i64)>,
) -> Result<Vec<(AccountId, i64)>, HarnessError> {
    let sum: i128 = deltas.iter().map(|(_, delta)| *delta as i128).sum();

    if sum != 0 {
        return Err(HarnessError::ConservationViolation { token, sum });
    }

    let mut merged: Vec<(AccountId, i128)> = Vec::with_capacity(deltas.len());

    for (account, delta) in deltas {
        match merged.iter_mut().find(|(x, _)| *x == account) {
            Some((_, total)) => *total += delta as i128,
            None => merged.push((account, delta as i128)),
        }
    }

    merged
        .into_iter()
        .filter(|(_, total)| *total != 0)
        .map(|(account, total)| {
            i64::try_from(total)
                .map(|x| (account, x))
                .map_err(|_| HarnessError::ConservationViolation { token, sum: total })
        })
        .collect()
}

/// Composes and submits operations on behalf of fixture accounts.
///
/// Signing authority is always explicit: every submission names its payer
/// and every signature is attached by the caller.
pub struct TransactionComposer<'a, C> {
    client: &'a C,
    directory: &'a AccountDirectory,
}

impl<'a, C> TransactionComposer<'a, C> {
    pub fn new(client: &'a C, directory: &'a AccountDirectory) -> Self {
        Self { client, directory }
    }

    pub fn directory(&self) -> &AccountDirectory {
        self.directory
    }

    pub fn build(&self, spec: OperationSpec) -> Result<PendingOperation, HarnessError> {
        PendingOperation::build(spec, self.directory)
    }

    /// Shorthand for an operation authorized by the given accounts.
    pub fn single(
        &self,
        operation: Operation,
        signers: &[&Account],
    ) -> Result<PendingOperation, HarnessError> {
        let spec = OperationSpec::Single {
            operation,
            signers: signers.iter().map(|x| x.id).collect(),
        };

        let mut pending = self.build(spec)?;

        for signer in signers {
            pending.sign(&signer.key);
        }

        Ok(pending)
    }

    pub fn add_signature(&self, mut pending: PendingOperation, signer: &PrivateKey) -> PendingOperation {
        pending.sign(signer);
        pending
    }

    pub fn is_ready(&self, pending: &PendingOperation) -> bool {
        pending.is_ready()
    }
}

impl<C: LedgerClient> TransactionComposer<'_, C> {
    /// Submits a ready operation and returns its successful receipt.
    #[instrument(skip_all, fields(kind = %pending.kind(), payer = %payer.id))]
    pub async fn submit(
        &self,
        pending: PendingOperation,
        payer: &Account,
    ) -> Result<Receipt, HarnessError> {
        let signed = pending.into_signed(payer)?;
        debug!(signers = signed.signatures.len(), "operation ready");

        submit::execute(self.client, signed).await
    }

    /// Submits a ready operation and returns the receipt whatever its
    /// status.
    pub async fn submit_unchecked(
        &self,
        pending: PendingOperation,
        payer: &Account,
    ) -> Result<Receipt, HarnessError> {
        let signed = pending.into_signed(payer)?;
        submit::execute_unchecked(self.client, signed).await
    }

    pub async fn submit_for_record(
        &self,
        pending: PendingOperation,
        payer: &Account,
    ) -> Result<Record, HarnessError> {
        let signed = pending.into_signed(payer)?;
        submit::execute_for_record(self.client, signed).await
    }
}
