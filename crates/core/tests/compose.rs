use tally_core::{
    AuthorityError, BalanceReconciler, HarnessError, Operation, OperationSpec, Status,
    ThresholdPolicy, TransactionComposer,
};
use tally_testing::{create_token, devnet, token_balance, TestAccount};

#[tokio::test]
async fn multi_party_transfer_moves_every_leg() {
    let (ledger, directory) = devnet();
    let [first, second, third, fourth] = [
        TestAccount::First,
        TestAccount::Second,
        TestAccount::Third,
        TestAccount::Fourth,
    ]
    .map(|x| x.resolve(&directory));

    let token = create_token(&ledger, &directory, first, 100, true).await;

    let reconciler = BalanceReconciler::new(&ledger, &directory);
    for (account, target) in [(second, 20), (third, 5), (fourth, 0)] {
        reconciler.associate(account, &token.token).await.unwrap();
        reconciler.reconcile(&token, account, target).await.unwrap();
    }
    reconciler.reconcile(&token, first, 20).await.unwrap();

    let composer = TransactionComposer::new(&ledger, &directory);

    let pending = composer
        .build(OperationSpec::Transfer {
            token: token.token,
            deltas: vec![
                (first.id, -10),
                (second.id, -10),
                (third.id, 15),
                (fourth.id, 5),
            ],
        })
        .unwrap();

    let pending = composer.add_signature(pending, &first.key);
    assert!(!composer.is_ready(&pending));

    let pending = composer.add_signature(pending, &second.key);
    assert!(composer.is_ready(&pending));

    let record = composer.submit_for_record(pending, first).await.unwrap();

    assert_eq!(record.payer, first.id);
    assert_eq!(record.status, Status::Success);
    assert_eq!(token_balance(&ledger, first, &token.token).await, 10);
    assert_eq!(token_balance(&ledger, second, &token.token).await, 10);
    assert_eq!(token_balance(&ledger, third, &token.token).await, 20);
    assert_eq!(token_balance(&ledger, fourth, &token.token).await, 5);
}

#[tokio::test]
async fn unready_operation_never_reaches_the_ledger() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);
    let third = TestAccount::Third.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, true).await;
    let before = ledger.submitted().len();

    let composer = TransactionComposer::new(&ledger, &directory);

    let pending = composer
        .build(OperationSpec::Transfer {
            token: token.token,
            deltas: vec![(first.id, -10), (second.id, -10), (third.id, 20)],
        })
        .unwrap();

    let pending = composer.add_signature(pending, &first.key);
    let err = composer.submit(pending, first).await.unwrap_err();

    assert!(matches!(
        err,
        HarnessError::InsufficientAuthority(AuthorityError::MissingSignatures { ref missing, .. })
            if missing == &vec![second.id]
    ));
    assert_eq!(ledger.submitted().len(), before);
}

#[tokio::test]
async fn non_zero_sum_fails_before_any_submission() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, true).await;
    let before = ledger.submitted().len();

    let composer = TransactionComposer::new(&ledger, &directory);
    let err = composer
        .build(OperationSpec::Transfer {
            token: token.token,
            deltas: vec![(first.id, -10), (second.id, 11)],
        })
        .unwrap_err();

    assert!(matches!(err, HarnessError::ConservationViolation { sum: 1, .. }));
    assert_eq!(ledger.submitted().len(), before);
}

#[tokio::test]
async fn rejected_operation_keeps_ledger_status() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 100, true).await;
    BalanceReconciler::new(&ledger, &directory)
        .reconcile(&token, second, 0)
        .await
        .unwrap();

    let composer = TransactionComposer::new(&ledger, &directory);

    let mut pending = composer
        .build(OperationSpec::Transfer {
            token: token.token,
            deltas: vec![(second.id, -50), (first.id, 50)],
        })
        .unwrap();
    pending.sign(&second.key);

    let err = composer.submit(pending, second).await.unwrap_err();

    // second was never associated, the reconciler had nothing to do
    assert_eq!(err.status(), Some(Status::TokenNotAssociatedToAccount));
}

#[tokio::test]
async fn mint_on_fixed_supply_reports_missing_supply_key() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);

    let token = create_token(&ledger, &directory, first, 1_000, false).await;
    let composer = TransactionComposer::new(&ledger, &directory);

    let mint = Operation::TokenMint {
        token: token.token,
        amount: 10,
    };

    let pending = composer.single(mint, &[]).unwrap();
    let receipt = composer.submit_unchecked(pending, first).await.unwrap();

    assert_eq!(receipt.status, Status::TokenHasNoSupplyKey);
}

#[tokio::test]
async fn threshold_gated_message_needs_m_signatures() {
    let (ledger, directory) = devnet();
    let first = TestAccount::First.resolve(&directory);
    let second = TestAccount::Second.resolve(&directory);
    let third = TestAccount::Third.resolve(&directory);

    let policy = ThresholdPolicy::new(
        2,
        vec![first.public_key(), second.public_key(), third.public_key()],
    )
    .unwrap();

    let composer = TransactionComposer::new(&ledger, &directory);

    let create = Operation::TopicCreate {
        memo: "gated".into(),
        submit_key: Some(policy.clone().into()),
    };

    let receipt = composer
        .submit(composer.single(create, &[]).unwrap(), first)
        .await
        .unwrap();
    let topic = receipt.topic_id().unwrap();

    let pending = composer
        .build(OperationSpec::Threshold {
            operation: Operation::TopicMessageSubmit {
                topic,
                message: b"two of three".to_vec(),
            },
            policy,
        })
        .unwrap();

    let pending = composer.add_signature(pending, &third.key);
    assert!(!pending.is_ready());

    let pending = composer.add_signature(pending, &second.key);
    assert!(pending.is_ready());

    // paid by first, whose key adds nothing the policy still needs
    let receipt = composer.submit(pending, first).await.unwrap();
    assert_eq!(receipt.status, Status::Success);
}
