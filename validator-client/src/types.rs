//! Core types for the validator client
//!
//! All persisted types serialize to self-describing JSON:
//! - 256-bit job ids as decimal strings
//! - hashes and addresses as `0x`-prefixed hex
//! - secret key material as hex, never printed by `Debug`

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Job identifier (uint256 on the ledger)
pub type JobId = U256;

/// Parse a job id from decimal or `0x` hex
pub fn parse_job_id(s: &str) -> Result<JobId> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None if s.is_empty() => None,
        None => U256::from_dec_str(s).ok(),
    };
    parsed.ok_or_else(|| Error::Validation(format!("invalid job id: {:?}", s)))
}

/// Parse a 32-byte hash from hex (`0x` prefix optional)
pub fn parse_hash(s: &str) -> Result<H256> {
    let s = s.trim();
    let hex_str = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::Validation(format!("invalid hex {:?}: {}", s, e)))?;
    if bytes.len() != 32 {
        return Err(Error::Validation(format!(
            "expected 32 bytes, got {} in {:?}",
            bytes.len(),
            s
        )));
    }
    Ok(H256::from_slice(&bytes))
}

/// Parse a 20-byte address from hex (`0x` prefix optional)
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let hex_str = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::Validation(format!("invalid address {:?}: {}", s, e)))?;
    if bytes.len() != 20 {
        return Err(Error::Validation(format!("invalid address length in {:?}", s)));
    }
    Ok(Address::from_slice(&bytes))
}

/// Staking role on the stake ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Agent performing jobs
    Agent = 0,
    /// Validator adjudicating job outcomes
    Validator = 1,
    /// Platform operator
    Platform = 2,
}

impl Role {
    /// On-chain role discriminant
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Agent => "agent",
            Role::Validator => "validator",
            Role::Platform => "platform",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" | "0" => Ok(Role::Agent),
            "validator" | "1" => Ok(Role::Validator),
            "platform" | "2" => Ok(Role::Platform),
            other => Err(Error::Validation(format!(
                "unknown role {:?} (expected agent, validator or platform)",
                other
            ))),
        }
    }
}

/// Validation round deadlines (read from the ledger)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Unix timestamp closing the commit phase (0 = no active round)
    pub commit_deadline: u64,
    /// Unix timestamp closing the reveal phase
    pub reveal_deadline: u64,
}

impl Round {
    /// Whether an active round exists for the job
    pub fn is_active(&self) -> bool {
        self.commit_deadline != 0
    }

    /// Phase of the round at `now`
    pub fn phase(&self, now: u64) -> VotePhase {
        if !self.is_active() {
            VotePhase::NoRound
        } else if now <= self.commit_deadline {
            VotePhase::Commit
        } else if now <= self.reveal_deadline {
            VotePhase::Reveal
        } else {
            VotePhase::Closed
        }
    }
}

/// Local view of where a round stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotePhase {
    /// No round exists for the job
    NoRound,
    /// Commitments are accepted
    Commit,
    /// Reveals are accepted
    Reveal,
    /// Both windows have closed
    Closed,
}

impl fmt::Display for VotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VotePhase::NoRound => "no active round",
            VotePhase::Commit => "commit",
            VotePhase::Reveal => "reveal",
            VotePhase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Dispute state (read from the ledger)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Party that raised the dispute
    pub claimant: Address,
    /// Unix timestamp the dispute was raised (0 = never raised)
    pub raised_at: u64,
    /// Whether the dispute has been resolved
    pub resolved: bool,
    /// Free-text reason
    pub reason: String,
    /// Hash of the supporting evidence
    pub evidence_hash: H256,
}

impl Dispute {
    /// Whether a dispute was ever raised
    pub fn is_raised(&self) -> bool {
        self.raised_at != 0
    }
}

/// Non-fatal timing warning
///
/// The ledger's own phase checks are authoritative, so these are printed and
/// execution continues (except where the reveal guard turns one into
/// [`Error::PhaseNotReached`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhaseWarning {
    /// Commit submitted after the commit deadline
    #[error("commit deadline {commit_deadline} has passed (now {now}); the ledger is expected to reject the commit")]
    CommitDeadlinePassed {
        /// Local clock
        now: u64,
        /// Round commit deadline
        commit_deadline: u64,
    },

    /// Reveal attempted while the commit phase is still open
    #[error("commit phase is open until {commit_deadline} (now {now}); reveals are not accepted yet")]
    RevealBeforeCommitDeadline {
        /// Local clock
        now: u64,
        /// Round commit deadline
        commit_deadline: u64,
    },

    /// Reveal submitted after the reveal deadline
    #[error("reveal deadline {reveal_deadline} has passed (now {now}); the ledger is expected to reject the reveal")]
    RevealDeadlinePassed {
        /// Local clock
        now: u64,
        /// Round reveal deadline
        reveal_deadline: u64,
    },
}

/// Secret signing key material (32-byte secp256k1 scalar)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes (USE WITH CAUTION)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let hash = parse_hash(&s).map_err(serde::de::Error::custom)?;
        Ok(Self(hash.0))
    }
}

/// Serde adapter writing `U256` as a decimal string
pub mod u256_dec {
    use super::parse_job_id;
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as decimal
    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize from decimal or `0x` hex
    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_job_id(&s).map_err(serde::de::Error::custom)
    }
}

/// A validator's local credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Operator-chosen unique name
    pub label: String,
    /// Fully-qualified membership name
    pub ens: String,
    /// First dot-separated segment of `ens`, lower-cased
    pub subdomain: String,
    /// Signing address
    pub address: Address,
    /// Signing key
    pub private_key: SecretKey,
    /// Membership proof hashes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Vec<H256>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Membership proof, empty when none has been set
    pub fn proof_or_empty(&self) -> Vec<H256> {
        self.proof.clone().unwrap_or_default()
    }
}

/// The validator's private memory of an unrevealed vote
///
/// Holds every input hashed into `commit_hash`, so a reveal never has to
/// re-derive anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Job voted on
    #[serde(with = "u256_dec")]
    pub job_id: JobId,
    /// Validator address the commitment is bound to
    pub validator: Address,
    /// Vote outcome
    pub approve: bool,
    /// Burn receipt hash (zero hash when no burn receipt)
    pub burn_tx_hash: H256,
    /// Blinding value
    pub salt: H256,
    /// Round nonce at commit time
    #[serde(with = "u256_dec")]
    pub nonce: U256,
    /// Job spec hash at commit time
    pub spec_hash: H256,
    /// Chain id the commitment is bound to
    pub chain_id: u64,
    /// Protocol domain separator the commitment is bound to
    pub domain_separator: H256,
    /// Value submitted to the ledger
    pub commit_hash: H256,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Commit transaction hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
}
