//! Fixture account resolution.

use serde::{Deserialize, Serialize};

use crate::{config::AccountsConfig, AccountId, HarnessError, PrivateKey, PublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Treasury,
    Ordinary,
    Parking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub key: PrivateKey,
    pub role: Role,
}

impl Account {
    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }
}

/// Read-only lookup of the accounts a scenario may act as.
#[derive(Debug, Clone)]
pub struct AccountDirectory {
    accounts: Vec<Account>,
    treasury: usize,
    parking: usize,
}

impl AccountDirectory {
    pub fn from_config(config: &AccountsConfig) -> Result<Self, HarnessError> {
        let count = config.entries.len();

        for (label, index) in [("treasury", config.treasury), ("parking", config.parking)] {
            if index >= count {
                return Err(HarnessError::UnknownAccount(format!(
                    "{label} index {index} with {count} configured accounts"
                )));
            }
        }

        if config.treasury == config.parking {
            return Err(HarnessError::UnknownAccount(format!(
                "treasury and parking share index {}",
                config.parking
            )));
        }

        let accounts = config
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Account {
                id: entry.id,
                key: entry.private_key.clone(),
                role: match index {
                    x if x == config.treasury => Role::Treasury,
                    x if x == config.parking => Role::Parking,
                    _ => Role::Ordinary,
                },
            })
            .collect();

        Ok(Self {
            accounts,
            treasury: config.treasury,
            parking: config.parking,
        })
    }

    /// Account by its position in the configuration (zero based).
    pub fn get(&self, index: usize) -> Result<&Account, HarnessError> {
        self.accounts
            .get(index)
            .ok_or_else(|| HarnessError::UnknownAccount(format!("index {index}")))
    }

    pub fn by_id(&self, id: &AccountId) -> Result<&Account, HarnessError> {
        self.accounts
            .iter()
            .find(|x| x.id == *id)
            .ok_or_else(|| HarnessError::UnknownAccount(id.to_string()))
    }

    pub fn by_public_key(&self, key: &PublicKey) -> Option<&Account> {
        self.accounts.iter().find(|x| x.public_key() == *key)
    }

    pub fn treasury(&self) -> &Account {
        &self.accounts[self.treasury]
    }

    pub fn parking(&self) -> &Account {
        &self.accounts[self.parking]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_follow_configured_indexes() {
        let directory = AccountDirectory::from_config(&AccountsConfig::devnet(5)).unwrap();

        assert_eq!(directory.treasury().role, Role::Treasury);
        assert_eq!(directory.parking().role, Role::Parking);
        assert_eq!(directory.get(1).unwrap().role, Role::Ordinary);
        assert_eq!(directory.parking().id, AccountId::from_num(1005));
    }

    #[test]
    fn lookups_resolve_by_id_and_key() {
        let directory = AccountDirectory::from_config(&AccountsConfig::devnet(5)).unwrap();
        let second = directory.get(1).unwrap().clone();

        assert_eq!(directory.by_id(&second.id).unwrap(), &second);
        assert_eq!(
            directory.by_public_key(&second.public_key()).unwrap(),
            &second
        );
        assert!(directory.by_id(&AccountId::from_num(1)).is_err());
        assert!(directory.get(9).is_err());
    }

    #[test]
    fn rejects_out_of_range_roles() {
        let mut config = AccountsConfig::devnet(3);
        assert!(AccountDirectory::from_config(&config).is_err());

        config.parking = 2;
        assert!(AccountDirectory::from_config(&config).is_ok());

        config.treasury = 2;
        assert!(AccountDirectory::from_config(&config).is_err());
    }
}
