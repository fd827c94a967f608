use tally_core::{config::AccountsConfig, *};

pub mod emulator;
pub mod faults;
pub mod streams;

pub use emulator::EmulatedLedger;
pub use faults::{FaultyLedger, TestFault};
pub use streams::{noop_waker, scripted_topic, topic_message, ScriptedStream, TeardownProbe};

/// Whole hbars credited to every fixture account of a test ledger.
pub const FIXTURE_HBARS: u64 = 1_000;

/// The fixture accounts of the default devnet directory, by position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestAccount {
    First,
    Second,
    Third,
    Fourth,
    Parking,
}

impl TestAccount {
    pub fn everyone() -> Vec<Self> {
        vec![
            TestAccount::First,
            TestAccount::Second,
            TestAccount::Third,
            TestAccount::Fourth,
            TestAccount::Parking,
        ]
    }

    pub fn ordinal(&self) -> usize {
        match self {
            TestAccount::First => 0,
            TestAccount::Second => 1,
            TestAccount::Third => 2,
            TestAccount::Fourth => 3,
            TestAccount::Parking => 4,
        }
    }

    /// # Panics
    ///
    /// If the directory has fewer accounts than the devnet default.
    pub fn resolve<'a>(&self, directory: &'a AccountDirectory) -> &'a Account {
        directory
            .get(self.ordinal())
            .expect("fixture account missing from directory")
    }
}

pub fn devnet_directory() -> AccountDirectory {
    AccountDirectory::from_config(&AccountsConfig::default())
        .expect("default devnet accounts are valid")
}

/// A funded emulated ledger together with the directory of its accounts.
pub fn devnet() -> (EmulatedLedger, AccountDirectory) {
    let directory = devnet_directory();
    let ledger = EmulatedLedger::with_directory(&directory, FIXTURE_HBARS);

    (ledger, directory)
}

/// The token definition used throughout the token scenarios: "Test Token"
/// (HTT) with two decimals, fully keyed by `owner`, treasury at `owner`.
pub fn test_token(owner: &Account, initial_supply: TokenAmount, mintable: bool) -> TokenCreate {
    let key = owner.public_key();

    TokenCreate {
        name: "Test Token".into(),
        symbol: "HTT".into(),
        decimals: 2,
        initial_supply,
        treasury: owner.id,
        admin_key: Some(key),
        freeze_key: Some(key),
        kyc_key: Some(key),
        wipe_key: Some(key),
        supply_key: mintable.then_some(key),
    }
}

/// Creates a token on `client` owned by `owner` and returns its observed
/// state.
///
/// # Panics
///
/// If the ledger rejects the creation.
pub async fn create_token<C: LedgerClient>(
    client: &C,
    directory: &AccountDirectory,
    owner: &Account,
    initial_supply: TokenAmount,
    mintable: bool,
) -> TokenState {
    let composer = TransactionComposer::new(client, directory);

    let operation = Operation::TokenCreate(test_token(owner, initial_supply, mintable));
    let pending = composer
        .single(operation, &[owner])
        .expect("token create composes");

    let receipt = composer
        .submit(pending, owner)
        .await
        .expect("token create succeeds");

    let token = receipt.token_id().expect("receipt names the token");

    client
        .query_token_info(&token)
        .await
        .expect("token info available")
        .into()
}

/// Current balance of `token` held by `account`.
///
/// # Panics
///
/// If the account is unknown to the ledger.
pub async fn token_balance<C: LedgerClient>(
    client: &C,
    account: &Account,
    token: &TokenId,
) -> TokenAmount {
    client
        .query_balance(&account.id)
        .await
        .expect("balance query succeeds")
        .token(token)
}
