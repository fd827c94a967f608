use tracing::info;

use tally_core::{
    AuthorityError, LedgerClient, Operation, OperationSpec, Status, TokenAmount, TokenState,
};
use tally_testing::test_token;

use super::{ensure, Steps};
use crate::prelude::*;

const FIRST: usize = 0;
const SECOND: usize = 1;
const THIRD: usize = 2;
const FOURTH: usize = 3;

fn signed(amount: TokenAmount) -> Result<i64, Error> {
    i64::try_from(amount).map_err(|_| Error::expectation(format!("amount {amount} out of range")))
}

impl<C: LedgerClient> Steps<'_, C> {
    /// Creates "Test Token" (HTT) held and keyed by the treasury account.
    /// Without `mintable` the token has no supply key.
    pub async fn create_token(
        &mut self,
        initial_supply: TokenAmount,
        mintable: bool,
    ) -> Result<(), Error> {
        let owner = self.context.directory.treasury().clone();
        let operation = Operation::TokenCreate(test_token(&owner, initial_supply, mintable));

        let pending = self.composer().single(operation, &[&owner])?;
        let receipt = self.composer().submit(pending, &owner).await?;

        let token = receipt
            .token_id()
            .ok_or_else(|| Error::expectation("token create receipt names no token"))?;

        let state: TokenState = self.client.query_token_info(&token).await?.into();
        info!(token = %token, supply = state.total_supply, mintable, "token created");

        self.context.token = Some(state);
        self.context.last_receipt = Some(receipt);

        Ok(())
    }

    pub fn token_has_name(&self, expected: &str) -> Result<(), Error> {
        let token = self.context.require_token()?;

        ensure(token.name == expected, || {
            format!("token is named {:?}, expected {expected:?}", token.name)
        })
    }

    pub fn token_has_symbol(&self, expected: &str) -> Result<(), Error> {
        let token = self.context.require_token()?;

        ensure(token.symbol == expected, || {
            format!("token symbol is {:?}, expected {expected:?}", token.symbol)
        })
    }

    pub fn token_has_decimals(&self, expected: u32) -> Result<(), Error> {
        let token = self.context.require_token()?;

        ensure(token.decimals == expected, || {
            format!("token has {} decimals, expected {expected}", token.decimals)
        })
    }

    pub fn token_owned_by(&self, index: usize) -> Result<(), Error> {
        let token = self.context.require_token()?;
        let account = self.account(index)?;

        ensure(token.treasury == account.id, || {
            format!("token treasury is {}, expected {}", token.treasury, account.id)
        })
    }

    pub async fn total_supply_is(&mut self, expected: TokenAmount) -> Result<(), Error> {
        let token = self.context.require_token()?.token;
        let state: TokenState = self.client.query_token_info(&token).await?.into();

        let actual = state.total_supply;
        self.context.token = Some(state);

        ensure(actual == expected, || {
            format!("total supply is {actual}, expected {expected}")
        })
    }

    /// Mints `amount` signed by the holder of the supply key and checks that
    /// the supply grew by exactly that much.
    pub async fn mint(&mut self, amount: TokenAmount) -> Result<(), Error> {
        let token = self.context.require_token()?.clone();

        let supply_key = token.supply_key.ok_or(HarnessError::InsufficientAuthority(
            AuthorityError::NoSupplyKey { token: token.token },
        ))?;

        let holder = self
            .context
            .directory
            .by_public_key(&supply_key)
            .cloned()
            .ok_or_else(|| Error::expectation("supply key is held by no fixture account"))?;

        let operation = Operation::TokenMint {
            token: token.token,
            amount,
        };

        let pending = self.composer().single(operation, &[&holder])?;
        let receipt = self.composer().submit(pending, &holder).await?;
        self.context.last_receipt = Some(receipt);

        self.total_supply_is(token.total_supply + amount).await
    }

    /// Attempts a mint and expects the ledger to refuse it with `expected`.
    pub async fn mint_fails_with(&mut self, expected: Status) -> Result<(), Error> {
        let token = self.context.require_token()?.token;
        let payer = self.context.directory.treasury().clone();

        let operation = Operation::TokenMint { token, amount: 1 };

        let pending = self.composer().single(operation, &[])?;
        let receipt = self.composer().submit_unchecked(pending, &payer).await?;

        let status = receipt.status;
        self.context.last_receipt = Some(receipt);

        ensure(status == expected, || {
            format!("mint finished with {status}, expected {expected}")
        })
    }

    /// Brings the account to exactly `amount` of the active token, associating
    /// it first when needed.
    pub async fn account_holds(&mut self, index: usize, amount: TokenAmount) -> Result<(), Error> {
        let account = self.account(index)?;
        let token = self.context.require_token()?.clone();

        let reconciler = self.reconciler();
        reconciler.associate(&account, &token.token).await?;
        let outcome = reconciler.reconcile(&token, &account, amount).await?;

        if let Some(receipt) = outcome.receipts.last() {
            self.context.last_receipt = Some(receipt.clone());
        }

        Ok(())
    }

    pub async fn expect_token_balance(
        &self,
        index: usize,
        expected: TokenAmount,
    ) -> Result<(), Error> {
        let account = self.account(index)?;
        let token = self.context.require_token()?.token;

        let actual = self.client.query_balance(&account.id).await?.token(&token);

        ensure(actual == expected, || {
            format!("{} holds {actual} of {token}, expected {expected}", account.id)
        })
    }

    /// Composes a transfer of `amount` from one account to another, signed by
    /// the sender, and leaves it pending.
    pub fn create_transfer(
        &mut self,
        from: usize,
        to: usize,
        amount: TokenAmount,
    ) -> Result<(), Error> {
        let sender = self.account(from)?;
        let receiver = self.account(to)?;
        let token = self.context.require_token()?.token;
        let delta = signed(amount)?;

        let spec = OperationSpec::Transfer {
            token,
            deltas: vec![(sender.id, -delta), (receiver.id, delta)],
        };

        let composer = self.composer();
        let pending = composer.add_signature(composer.build(spec)?, &sender.key);

        self.context.stage_pending(pending)?;

        Ok(())
    }

    /// Composes the four party transfer: `out` leaves both the first and the
    /// second account, `to_third` and `to_fourth` arrive. Signed by both
    /// senders and left pending.
    pub fn create_split_transfer(
        &mut self,
        out: TokenAmount,
        to_third: TokenAmount,
        to_fourth: TokenAmount,
    ) -> Result<(), Error> {
        let first = self.account(FIRST)?;
        let second = self.account(SECOND)?;
        let third = self.account(THIRD)?;
        let fourth = self.account(FOURTH)?;
        let token = self.context.require_token()?.token;

        let spec = OperationSpec::Transfer {
            token,
            deltas: vec![
                (first.id, -signed(out)?),
                (second.id, -signed(out)?),
                (third.id, signed(to_third)?),
                (fourth.id, signed(to_fourth)?),
            ],
        };

        let composer = self.composer();
        let pending = composer.build(spec)?;
        let pending = composer.add_signature(pending, &first.key);
        let pending = composer.add_signature(pending, &second.key);

        self.context.stage_pending(pending)?;

        Ok(())
    }

    /// Submits the pending operation paid by the given account and keeps its
    /// record.
    pub async fn submit_pending(&mut self, payer: usize) -> Result<(), Error> {
        let payer = self.account(payer)?;
        let pending = self.context.take_pending()?;

        let record = self.composer().submit_for_record(pending, &payer).await?;
        info!(tx = %record.tx, fee = record.fee, "pending operation submitted");

        self.context.last_record = Some(record);

        Ok(())
    }

    pub fn fee_paid_by(&self, index: usize) -> Result<(), Error> {
        let account = self.account(index)?;

        let record = self
            .context
            .last_record
            .as_ref()
            .ok_or(HarnessError::MissingContext("record"))?;

        ensure(record.payer == account.id && record.fee > 0, || {
            format!(
                "fee of {} was paid by {}, expected {}",
                record.fee, record.payer, account.id
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScenario {
    MintableToken,
    FixedSupplyToken,
    TransferBetweenAccounts,
    RecipientPaysFee,
    MultiPartyTransfer,
}

impl TokenScenario {
    pub fn all() -> Vec<TokenScenario> {
        vec![
            TokenScenario::MintableToken,
            TokenScenario::FixedSupplyToken,
            TokenScenario::TransferBetweenAccounts,
            TokenScenario::RecipientPaysFee,
            TokenScenario::MultiPartyTransfer,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TokenScenario::MintableToken => "create a mintable token",
            TokenScenario::FixedSupplyToken => "create a fixed supply token",
            TokenScenario::TransferBetweenAccounts => "transfer tokens between 2 accounts",
            TokenScenario::RecipientPaysFee => "create a token transaction paid for by the recipient",
            TokenScenario::MultiPartyTransfer => "create a multi party token transfer transaction",
        }
    }

    pub async fn run<C: LedgerClient>(&self, steps: &mut Steps<'_, C>) -> Result<(), Error> {
        match self {
            TokenScenario::MintableToken => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_token(0, true).await?;
                steps.token_has_name("Test Token")?;
                steps.token_has_symbol("HTT")?;
                steps.token_has_decimals(2)?;
                steps.token_owned_by(FIRST)?;
                steps.mint(1_000).await?;
            }
            TokenScenario::FixedSupplyToken => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_token(1_000_000, false).await?;
                steps.total_supply_is(1_000_000).await?;
                steps.mint_fails_with(Status::TokenHasNoSupplyKey).await?;
            }
            TokenScenario::TransferBetweenAccounts => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_token(100, true).await?;
                steps.account_holds(FIRST, 100).await?;
                steps.account_holds(SECOND, 0).await?;
                steps.create_transfer(FIRST, SECOND, 10)?;
                steps.submit_pending(FIRST).await?;
                steps.expect_token_balance(FIRST, 90).await?;
                steps.expect_token_balance(SECOND, 10).await?;
            }
            TokenScenario::RecipientPaysFee => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_token(100, true).await?;
                // the treasury funds the second account first, then mints
                // its own share back
                steps.account_holds(SECOND, 100).await?;
                steps.account_holds(FIRST, 100).await?;
                steps.create_transfer(SECOND, FIRST, 10)?;
                steps.submit_pending(FIRST).await?;
                steps.fee_paid_by(FIRST)?;
                steps.expect_token_balance(FIRST, 110).await?;
                steps.expect_token_balance(SECOND, 90).await?;
            }
            TokenScenario::MultiPartyTransfer => {
                steps.account_has_more_than_hbars(FIRST, 10).await?;
                steps.create_token(100, true).await?;
                steps.account_holds(SECOND, 100).await?;
                steps.account_holds(THIRD, 5).await?;
                steps.account_holds(FOURTH, 0).await?;
                steps.account_holds(FIRST, 100).await?;
                steps.create_split_transfer(10, 5, 15)?;
                steps.submit_pending(FIRST).await?;
                steps.expect_token_balance(FIRST, 90).await?;
                steps.expect_token_balance(SECOND, 90).await?;
                steps.expect_token_balance(THIRD, 10).await?;
                steps.expect_token_balance(FOURTH, 15).await?;
            }
        }

        Ok(())
    }
}
