use tally_core::{
    reconcile::Adjustment, AuthorityError, BalanceReconciler, HarnessError, LedgerError,
    Operation, OperationKind, Status, TokenId,
};
use tally_testing::{create_token, devnet, token_balance, FaultyLedger, TestAccount, TestFault};

fn kinds_after(kinds: &[OperationKind], skip: usize) -> Vec<OperationKind> {
    kinds.iter().skip(skip).copied().collect()
}

#[tokio::test]
async fn mints_shortfall_when_account_is_treasury() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 0, true).await;
    let before = ledger.submitted().len();

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    let outcome = reconciler.reconcile(&token, first, 10).await.unwrap();

    assert_eq!(outcome.previous, 0);
    assert_eq!(outcome.adjustment, Adjustment::Minted { amount: 10 });
    assert_eq!(
        kinds_after(&ledger.submitted_kinds(), before),
        vec![OperationKind::TokenMint]
    );
    assert_eq!(token_balance(&ledger, first, &token.token).await, 10);
}

#[tokio::test]
async fn parks_surplus_of_fixed_supply_token() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let parking = TestAccount::Parking.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 15, false).await;
    let before = ledger.submitted().len();

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    let outcome = reconciler.reconcile(&token, first, 5).await.unwrap();

    assert_eq!(
        outcome.adjustment,
        Adjustment::Parked {
            to: parking.id,
            amount: 10
        }
    );

    let submitted = ledger.submitted();
    let transfers: Vec<_> = submitted[before..]
        .iter()
        .filter_map(|x| match &x.operation {
            Operation::TokenTransfer { transfers, .. } => Some(transfers.clone()),
            _ => None,
        })
        .collect();

    assert_eq!(transfers, vec![vec![(first.id, -10), (parking.id, 10)]]);
    assert_eq!(token_balance(&ledger, first, &token.token).await, 5);
    assert_eq!(token_balance(&ledger, parking, &token.token).await, 10);
}

#[tokio::test]
async fn second_reconciliation_is_a_noop() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, true).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    let outcome = reconciler.reconcile(&token, second, 25).await.unwrap();
    assert!(!outcome.is_noop());

    let before = ledger.submitted().len();
    let outcome = reconciler.reconcile(&token, second, 25).await.unwrap();

    assert!(outcome.is_noop());
    assert_eq!(outcome.adjustment, Adjustment::None);
    assert_eq!(ledger.submitted().len(), before);
    assert_eq!(token_balance(&ledger, second, &token.token).await, 25);
}

#[tokio::test]
async fn fixed_supply_shortfall_never_attempts_a_mint() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 15, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    let err = reconciler.reconcile(&token, second, 20).await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::InsufficientAuthority(AuthorityError::SupplyExhausted { shortfall: 20, .. })
    ));
    assert!(!ledger.submitted_kinds().contains(&OperationKind::TokenMint));
    assert_eq!(token_balance(&ledger, first, &token.token).await, 15);
}

#[tokio::test]
async fn shortfall_is_covered_from_parking_first() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let parking = TestAccount::Parking.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 15, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    reconciler.reconcile(&token, first, 5).await.unwrap();
    let outcome = reconciler.reconcile(&token, first, 12).await.unwrap();

    assert_eq!(
        outcome.adjustment,
        Adjustment::Transferred {
            from: parking.id,
            amount: 7
        }
    );
    assert_eq!(token_balance(&ledger, first, &token.token).await, 12);
    assert_eq!(token_balance(&ledger, parking, &token.token).await, 3);
}

#[tokio::test]
async fn ordinary_account_is_associated_and_funded_from_treasury() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let third = TestAccount::Third.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, true).await;
    let before = ledger.submitted().len();

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    let outcome = reconciler.reconcile(&token, third, 30).await.unwrap();

    assert_eq!(
        outcome.adjustment,
        Adjustment::Transferred {
            from: first.id,
            amount: 30
        }
    );
    assert_eq!(
        kinds_after(&ledger.submitted_kinds(), before),
        vec![OperationKind::TokenAssociate, OperationKind::TokenTransfer]
    );
    assert_eq!(token_balance(&ledger, first, &token.token).await, 70);
    assert_eq!(token_balance(&ledger, third, &token.token).await, 30);
}

#[tokio::test]
async fn mints_then_forwards_when_treasury_runs_short() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 5, true).await;
    let before = ledger.submitted().len();

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    let outcome = reconciler.reconcile(&token, second, 25).await.unwrap();

    assert_eq!(outcome.adjustment, Adjustment::Minted { amount: 25 });
    assert_eq!(outcome.receipts.len(), 3);
    assert_eq!(
        kinds_after(&ledger.submitted_kinds(), before),
        vec![
            OperationKind::TokenAssociate,
            OperationKind::TokenMint,
            OperationKind::TokenTransfer
        ]
    );
    assert_eq!(token_balance(&ledger, first, &token.token).await, 5);
    assert_eq!(token_balance(&ledger, second, &token.token).await, 25);
}

#[tokio::test]
async fn parking_surplus_returns_to_treasury() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let parking = TestAccount::Parking.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 20, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    reconciler.reconcile(&token, first, 12).await.unwrap();
    assert_eq!(token_balance(&ledger, parking, &token.token).await, 8);

    let outcome = reconciler.reconcile(&token, parking, 2).await.unwrap();

    assert_eq!(
        outcome.adjustment,
        Adjustment::Parked {
            to: first.id,
            amount: 6
        }
    );
    assert_eq!(token_balance(&ledger, first, &token.token).await, 18);
}

#[tokio::test]
async fn query_failure_propagates_without_mutation() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 10, true).await;
    let before = ledger.submitted().len();

    let faulty = FaultyLedger::new(ledger.clone(), TestFault::QueryError);
    let reconciler = BalanceReconciler::new(&faulty, &directory);

    let err = reconciler.reconcile(&token, first, 3).await.unwrap_err();

    assert!(matches!(err, HarnessError::Ledger(LedgerError::Transport(_))));
    assert_eq!(ledger.submitted().len(), before);
}

#[tokio::test]
async fn association_happens_once() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let fourth = TestAccount::Fourth.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 10, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    let receipt = reconciler.associate(fourth, &token.token).await.unwrap();
    assert!(receipt.is_some());

    let receipt = reconciler.associate(fourth, &token.token).await.unwrap();
    assert!(receipt.is_none());

    assert_eq!(token_balance(&ledger, fourth, &token.token).await, 0);
}

#[tokio::test]
async fn fixed_supply_is_never_drawn_from_treasury() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    reconciler.associate(second, &token.token).await.unwrap();
    let before = ledger.submitted().len();

    let err = reconciler.reconcile(&token, second, 10).await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::InsufficientAuthority(AuthorityError::SupplyExhausted { shortfall: 10, .. })
    ));
    assert_eq!(ledger.submitted().len(), before);
    assert_eq!(token_balance(&ledger, first, &token.token).await, 100);
    assert_eq!(token_balance(&ledger, second, &token.token).await, 0);
}

#[tokio::test]
async fn parking_shortfall_on_fixed_supply_is_exhausted() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let parking = TestAccount::Parking.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, false).await;
    let reconciler = BalanceReconciler::new(&ledger, &directory);

    let err = reconciler.reconcile(&token, parking, 10).await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::InsufficientAuthority(AuthorityError::SupplyExhausted { .. })
    ));
    assert_eq!(token_balance(&ledger, first, &token.token).await, 100);
}

#[tokio::test]
async fn association_failure_keeps_ledger_status() {
    let (ledger, directory) = devnet();
    let fourth = TestAccount::Fourth.resolve(&directory);

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    let err = reconciler
        .associate(fourth, &TokenId::from_num(404))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::AssociationFailure {
            status: Status::InvalidTokenId,
            ..
        }
    ));
    assert_eq!(err.status(), Some(Status::InvalidTokenId));
}
