//! Bringing an account's token balance to a target.
//!
//! Supply is never burned: a surplus is moved to the parking account and a
//! shortfall is covered from parking, then from the treasury, and only then
//! by minting. Every sub-operation is confirmed before the next one starts.

use std::cmp::Ordering;

use tracing::{debug, info, instrument, warn};

use crate::{
    Account, AccountBalance, AccountDirectory, AccountId, AuthorityError, HarnessError,
    LedgerClient, Operation, OperationSpec, Receipt, Status, TokenAmount, TokenId, TokenState,
    TransactionComposer,
};

/// Where the tokens of an adjustment came from or went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// The balance already matched
    None,

    /// Surplus moved out to the given account
    Parked { to: AccountId, amount: TokenAmount },

    /// Shortfall moved in from an account holding enough
    Transferred { from: AccountId, amount: TokenAmount },

    /// Shortfall minted to the treasury, then moved in if needed
    Minted { amount: TokenAmount },
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub account: AccountId,
    pub token: TokenId,
    pub previous: TokenAmount,
    pub target: TokenAmount,
    pub adjustment: Adjustment,

    /// Receipts of every mutating sub-operation, in submission order
    pub receipts: Vec<Receipt>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.receipts.is_empty()
    }
}

pub struct BalanceReconciler<'a, C> {
    client: &'a C,
    directory: &'a AccountDirectory,
}

impl<'a, C: LedgerClient> BalanceReconciler<'a, C> {
    pub fn new(client: &'a C, directory: &'a AccountDirectory) -> Self {
        Self { client, directory }
    }

    fn composer(&self) -> TransactionComposer<'a, C> {
        TransactionComposer::new(self.client, self.directory)
    }

    #[instrument(skip_all, fields(account = %account.id, token = %token.token, target_balance = target))]
    pub async fn reconcile(
        &self,
        token: &TokenState,
        account: &Account,
        target: TokenAmount,
    ) -> Result<Reconciliation, HarnessError> {
        let snapshot = self.client.query_balance(&account.id).await?;
        let previous = snapshot.token(&token.token);

        let mut receipts = vec![];

        let adjustment = match target.cmp(&previous) {
            Ordering::Equal => {
                debug!(previous, "balance already at target");
                Adjustment::None
            }
            Ordering::Less => {
                let surplus = previous - target;
                info!(delta = -(surplus as i128), "moving surplus out");

                self.park(token, account, surplus, &mut receipts).await?
            }
            Ordering::Greater => {
                let shortfall = target - previous;
                info!(delta = shortfall, "covering shortfall");

                self.ensure_associated(account, &token.token, Some(&snapshot), &mut receipts)
                    .await?;

                self.fund(token, account, shortfall, &mut receipts).await?
            }
        };

        Ok(Reconciliation {
            account: account.id,
            token: token.token,
            previous,
            target,
            adjustment,
            receipts,
        })
    }

    /// Makes sure `account` can hold `token`, returning the receipt when an
    /// association had to be submitted.
    pub async fn associate(
        &self,
        account: &Account,
        token: &TokenId,
    ) -> Result<Option<Receipt>, HarnessError> {
        let mut receipts = vec![];
        self.ensure_associated(account, token, None, &mut receipts)
            .await?;

        Ok(receipts.pop())
    }

    async fn park(
        &self,
        token: &TokenState,
        account: &Account,
        amount: TokenAmount,
        receipts: &mut Vec<Receipt>,
    ) -> Result<Adjustment, HarnessError> {
        let parking = self.directory.parking();

        // the parking account itself hands its surplus back to the treasury
        let sink = if parking.id == account.id {
            self.directory.by_id(&token.treasury)?
        } else {
            parking
        };

        self.ensure_associated(sink, &token.token, None, receipts)
            .await?;

        let receipt = self.transfer(&token.token, account, sink.id, amount).await?;
        receipts.push(receipt);

        Ok(Adjustment::Parked {
            to: sink.id,
            amount,
        })
    }

    async fn fund(
        &self,
        token: &TokenState,
        account: &Account,
        amount: TokenAmount,
        receipts: &mut Vec<Receipt>,
    ) -> Result<Adjustment, HarnessError> {
        let parking = self.directory.parking();
        let treasury = self.directory.by_id(&token.treasury).ok();

        // a fixed supply may only be drawn back from parking
        let sources = std::iter::once(parking)
            .chain(treasury.filter(|_| token.is_mintable()))
            .filter(|x| x.id != account.id);

        for source in sources {
            let held = self
                .client
                .query_balance(&source.id)
                .await?
                .token(&token.token);

            if held >= amount {
                let receipt = self.transfer(&token.token, source, account.id, amount).await?;
                receipts.push(receipt);

                return Ok(Adjustment::Transferred {
                    from: source.id,
                    amount,
                });
            }

            debug!(source = %source.id, held, "source can't cover shortfall");
        }

        let supply_holder = token
            .supply_key
            .and_then(|key| self.directory.by_public_key(&key));

        let (Some(holder), Some(treasury)) = (supply_holder, treasury) else {
            warn!(mintable = token.is_mintable(), "no source can cover shortfall");

            return Err(AuthorityError::SupplyExhausted {
                token: token.token,
                account: account.id,
                shortfall: amount,
            }
            .into());
        };

        let mint = Operation::TokenMint {
            token: token.token,
            amount,
        };

        let pending = self.composer().single(mint, &[holder])?;
        receipts.push(self.composer().submit(pending, holder).await?);

        if treasury.id != account.id {
            let receipt = self
                .transfer(&token.token, treasury, account.id, amount)
                .await?;

            receipts.push(receipt);
        }

        Ok(Adjustment::Minted { amount })
    }

    /// Associates `account` with `token` unless the snapshot shows it
    /// already is. A duplicate association reported by the ledger counts as
    /// success.
    async fn ensure_associated(
        &self,
        account: &Account,
        token: &TokenId,
        snapshot: Option<&AccountBalance>,
        receipts: &mut Vec<Receipt>,
    ) -> Result<(), HarnessError> {
        let associated = match snapshot {
            Some(x) => x.is_associated(token),
            None => self
                .client
                .query_balance(&account.id)
                .await?
                .is_associated(token),
        };

        if associated {
            return Ok(());
        }

        let operation = Operation::TokenAssociate {
            account: account.id,
            tokens: vec![*token],
        };

        let pending = self.composer().single(operation, &[account])?;
        let receipt = self.composer().submit_unchecked(pending, account).await?;

        match receipt.status {
            Status::Success => {
                debug!(account = %account.id, "associated");
                receipts.push(receipt);
                Ok(())
            }
            Status::TokenAlreadyAssociatedToAccount => {
                debug!(account = %account.id, "already associated");
                Ok(())
            }
            status => Err(HarnessError::AssociationFailure {
                account: account.id,
                token: *token,
                status,
            }),
        }
    }

    async fn transfer(
        &self,
        token: &TokenId,
        from: &Account,
        to: AccountId,
        amount: TokenAmount,
    ) -> Result<Receipt, HarnessError> {
        let delta = i64::try_from(amount).map_err(|_| HarnessError::ConservationViolation {
            token: *token,
            sum: amount as i128,
        })?;

        let spec = OperationSpec::Transfer {
            token: *token,
            deltas: vec![(from.id, -delta), (to, delta)],
        };

        let composer = self.composer();
        let mut pending = composer.build(spec)?;
        pending.sign(&from.key);

        composer.submit(pending, from).await
    }
}
