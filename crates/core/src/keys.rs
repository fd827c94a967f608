//! Key material and authorization policies.
//!
//! Signing here is a tamper-evident digest over the operation payload, keyed
//! by the signer's public key. It stands in for the ledger's real signature
//! scheme, which belongs to the client capability and is out of reach of the
//! harness.

use std::{collections::BTreeSet, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xxhash_rust::xxh3::{xxh3_128, xxh3_128_with_seed};

use crate::HarnessError;

/// DER header of an ED25519 private key as exported by ledger tooling.
const ED25519_DER_PREFIX: &str = "302e020100300506032b657004220420";

#[derive(Debug, Error)]
pub enum InvalidKey {
    #[error("key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("key must be 32 bytes, got {0}")]
    Length(usize),
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Parses a raw hex key or a DER-wrapped ED25519 key.
    pub fn from_hex(value: &str) -> Result<Self, InvalidKey> {
        let value = value.trim().trim_start_matches("0x");
        let value = value.strip_prefix(ED25519_DER_PREFIX).unwrap_or(value);

        let bytes = hex::decode(value)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| InvalidKey::Length(bytes.len()))?;

        Ok(Self(bytes))
    }

    /// Deterministically derives a key from a seed phrase. Meant for fixture
    /// accounts only.
    pub fn derive(seed: &str) -> Self {
        let low = xxh3_128(seed.as_bytes()).to_be_bytes();
        let high = xxh3_128_with_seed(seed.as_bytes(), 0x7a11).to_be_bytes();

        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&low);
        bytes[16..].copy_from_slice(&high);

        Self(bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(xxh3_128(&self.0))
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        let public_key = self.public_key();

        Signature {
            public_key,
            digest: public_key.digest(payload),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

impl TryFrom<String> for PrivateKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PrivateKey> for String {
    fn from(value: PrivateKey) -> Self {
        value.to_hex()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(u128);

impl PublicKey {
    fn digest(&self, payload: &[u8]) -> u128 {
        xxh3_128_with_seed(payload, self.0 as u64)
    }

    pub fn verify(&self, payload: &[u8], signature: &Signature) -> bool {
        signature.public_key == *self && signature.digest == self.digest(payload)
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        let bytes: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| InvalidKey::Length(bytes.len()))?;

        Ok(Self(u128::from_be_bytes(bytes)))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: PublicKey,
    pub digest: u128,
}

/// An M-of-N authorization rule.
///
/// Satisfied by any `threshold` distinct keys of the set; no particular
/// subset is privileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholdPolicy")]
pub struct ThresholdPolicy {
    threshold: usize,
    keys: Vec<PublicKey>,
}

#[derive(Deserialize)]
struct RawThresholdPolicy {
    threshold: usize,
    keys: Vec<PublicKey>,
}

impl TryFrom<RawThresholdPolicy> for ThresholdPolicy {
    type Error = HarnessError;

    fn try_from(value: RawThresholdPolicy) -> Result<Self, Self::Error> {
        Self::new(value.threshold, value.keys)
    }
}

impl ThresholdPolicy {
    pub fn new(threshold: usize, keys: Vec<PublicKey>) -> Result<Self, HarnessError> {
        let distinct: BTreeSet<_> = keys.iter().collect();

        if distinct.len() != keys.len() {
            return Err(HarnessError::InvalidPolicy(
                "key set contains duplicates".into(),
            ));
        }

        if threshold == 0 || threshold > keys.len() {
            return Err(HarnessError::InvalidPolicy(format!(
                "threshold {threshold} outside 1..={}",
                keys.len()
            )));
        }

        Ok(Self { threshold, keys })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Number of distinct policy keys among `signers`.
    pub fn satisfied_count(&self, signers: &BTreeSet<PublicKey>) -> usize {
        self.keys.iter().filter(|k| signers.contains(k)).count()
    }

    pub fn is_satisfied_by(&self, signers: &BTreeSet<PublicKey>) -> bool {
        self.satisfied_count(signers) >= self.threshold
    }
}

/// A key as attached to ledger entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Single(PublicKey),
    Threshold(ThresholdPolicy),
}

impl Key {
    pub fn is_satisfied_by(&self, signers: &BTreeSet<PublicKey>) -> bool {
        match self {
            Self::Single(key) => signers.contains(key),
            Self::Threshold(policy) => policy.is_satisfied_by(signers),
        }
    }
}

impl From<PublicKey> for Key {
    fn from(value: PublicKey) -> Self {
        Self::Single(value)
    }
}

impl From<ThresholdPolicy> for Key {
    fn from(value: ThresholdPolicy) -> Self {
        Self::Threshold(value)
    }
}
