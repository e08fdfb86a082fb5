//! Cryptographic operations for the validator client
//!
//! This module provides:
//! - The two-level vote commitment (outcome hash, commit hash)
//! - Salt generation and evidence hashing
//! - The [`ValidatorSigner`] capability and its local-key implementation
//!
//! Hashes follow Solidity `keccak256(abi.encodePacked(...))` packing:
//! `uint256` and `bytes32` take 32 bytes, `address` 20 bytes, `bool` 1 byte.

use crate::{
    types::{CommitRecord, JobId, SecretKey},
    Error, Result,
};
use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Signature, H256, U256},
    utils::keccak256,
};

fn word(value: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

/// `H(nonce, specHash, approve, burnTxHash)`
pub fn outcome_hash(nonce: U256, spec_hash: H256, approve: bool, burn_tx_hash: H256) -> H256 {
    let mut packed = Vec::with_capacity(32 + 32 + 1 + 32);
    packed.extend_from_slice(&word(nonce));
    packed.extend_from_slice(spec_hash.as_bytes());
    packed.push(u8::from(approve));
    packed.extend_from_slice(burn_tx_hash.as_bytes());
    H256(keccak256(&packed))
}

/// `H(jobId, outcomeHash, salt, validator, chainId, domainSeparator)`
pub fn commit_hash(
    job_id: JobId,
    outcome_hash: H256,
    salt: H256,
    validator: Address,
    chain_id: u64,
    domain_separator: H256,
) -> H256 {
    let mut packed = Vec::with_capacity(32 * 5 + 20);
    packed.extend_from_slice(&word(job_id));
    packed.extend_from_slice(outcome_hash.as_bytes());
    packed.extend_from_slice(salt.as_bytes());
    packed.extend_from_slice(validator.as_bytes());
    packed.extend_from_slice(&word(U256::from(chain_id)));
    packed.extend_from_slice(domain_separator.as_bytes());
    H256(keccak256(&packed))
}

/// Every value bound into a vote commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentInputs {
    /// Job voted on
    pub job_id: JobId,
    /// Round nonce
    pub nonce: U256,
    /// Job spec hash
    pub spec_hash: H256,
    /// Vote outcome
    pub approve: bool,
    /// Burn receipt hash
    pub burn_tx_hash: H256,
    /// Blinding value
    pub salt: H256,
    /// Validator address
    pub validator: Address,
    /// Chain id
    pub chain_id: u64,
    /// Protocol domain separator
    pub domain_separator: H256,
}

impl CommitmentInputs {
    /// Outcome hash for these inputs
    pub fn outcome_hash(&self) -> H256 {
        outcome_hash(self.nonce, self.spec_hash, self.approve, self.burn_tx_hash)
    }

    /// Commit hash for these inputs
    pub fn commit_hash(&self) -> H256 {
        commit_hash(
            self.job_id,
            self.outcome_hash(),
            self.salt,
            self.validator,
            self.chain_id,
            self.domain_separator,
        )
    }
}

impl From<&CommitRecord> for CommitmentInputs {
    fn from(record: &CommitRecord) -> Self {
        Self {
            job_id: record.job_id,
            nonce: record.nonce,
            spec_hash: record.spec_hash,
            approve: record.approve,
            burn_tx_hash: record.burn_tx_hash,
            salt: record.salt,
            validator: record.validator,
            chain_id: record.chain_id,
            domain_separator: record.domain_separator,
        }
    }
}

/// 32 cryptographically random bytes
pub fn random_salt() -> H256 {
    H256(rand::random::<[u8; 32]>())
}

/// Evidence hash for an evidence URI
pub fn evidence_hash_from_uri(uri: &str) -> H256 {
    H256(keccak256(uri.as_bytes()))
}

/// Signing capability
///
/// Protocol logic only ever sees this trait, so key custody (in-memory key,
/// hardware wallet, remote signer) can change without touching the engines.
#[async_trait]
pub trait ValidatorSigner: Send + Sync {
    /// Address transactions are sent from
    fn address(&self) -> Address;

    /// Sign a transaction request
    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature>;
}

/// In-memory secp256k1 signer
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    wallet: LocalWallet,
}

impl LocalKeySigner {
    /// Generate a new random key, returning the signer and its secret
    pub fn generate() -> (Self, SecretKey) {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let bytes: [u8; 32] = wallet.signer().to_bytes().into();
        (Self { wallet }, SecretKey::from_bytes(bytes))
    }

    /// Create from stored key material
    pub fn from_secret(secret: &SecretKey) -> Result<Self> {
        let wallet = LocalWallet::from_bytes(secret.as_bytes())
            .map_err(|e| Error::Validation(format!("invalid secp256k1 key: {}", e)))?;
        Ok(Self { wallet })
    }

    /// Parse an operator-supplied hex key (`0x` prefix optional)
    pub fn import_hex(key: &str) -> Result<(Self, SecretKey)> {
        let secret = crate::types::parse_hash(key)
            .map(|h| SecretKey::from_bytes(h.0))
            .map_err(|_| Error::Validation("imported key must be 32 bytes of hex".to_string()))?;
        let signer = Self::from_secret(&secret)?;
        Ok((signer, secret))
    }

    /// Bind signatures to `chain_id` when the transaction carries none
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.wallet = self.wallet.with_chain_id(chain_id);
        self
    }
}

#[async_trait]
impl ValidatorSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature> {
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| Error::Ledger(format!("signing failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::TransactionRequest;

    fn sample_inputs() -> CommitmentInputs {
        CommitmentInputs {
            job_id: U256::from(42),
            nonce: U256::from(1),
            spec_hash: H256::repeat_byte(0x11),
            approve: true,
            burn_tx_hash: H256::zero(),
            salt: H256::repeat_byte(0x22),
            validator: Address::repeat_byte(0x33),
            chain_id: 1,
            domain_separator: H256::repeat_byte(0x44),
        }
    }

    #[test]
    fn test_outcome_hash_packing() {
        let mut packed = vec![0u8; 31];
        packed.push(1); // nonce = 1
        packed.extend_from_slice(&[0x11; 32]);
        packed.push(1); // approve
        packed.extend_from_slice(&[0u8; 32]);

        let expected = H256(keccak256(&packed));
        assert_eq!(
            outcome_hash(U256::one(), H256::repeat_byte(0x11), true, H256::zero()),
            expected
        );
    }

    #[test]
    fn test_commit_hash_packing() {
        let inputs = sample_inputs();

        let mut packed = Vec::new();
        packed.extend_from_slice(&word(U256::from(42)));
        packed.extend_from_slice(inputs.outcome_hash().as_bytes());
        packed.extend_from_slice(&[0x22; 32]);
        packed.extend_from_slice(&[0x33; 20]);
        packed.extend_from_slice(&word(U256::one()));
        packed.extend_from_slice(&[0x44; 32]);

        assert_eq!(packed.len(), 32 * 5 + 20);
        assert_eq!(inputs.commit_hash(), H256(keccak256(&packed)));
    }

    #[test]
    fn test_commit_hash_binds_every_input() {
        let base = sample_inputs();
        let base_hash = base.commit_hash();

        let variants = [
            CommitmentInputs { job_id: U256::from(43), ..base },
            CommitmentInputs { nonce: U256::from(2), ..base },
            CommitmentInputs { spec_hash: H256::repeat_byte(0x12), ..base },
            CommitmentInputs { approve: false, ..base },
            CommitmentInputs { burn_tx_hash: H256::repeat_byte(1), ..base },
            CommitmentInputs { salt: H256::repeat_byte(0x23), ..base },
            CommitmentInputs { validator: Address::repeat_byte(0x34), ..base },
            CommitmentInputs { chain_id: 5, ..base },
            CommitmentInputs { domain_separator: H256::repeat_byte(0x45), ..base },
        ];

        for variant in variants {
            assert_ne!(variant.commit_hash(), base_hash, "{:?}", variant);
        }
    }

    #[test]
    fn test_random_salt_unique() {
        assert_ne!(random_salt(), random_salt());
    }

    #[test]
    fn test_evidence_hash_from_uri() {
        let uri = "ipfs://bafy/evidence.json";
        assert_eq!(evidence_hash_from_uri(uri), H256(keccak256(uri.as_bytes())));
        assert_ne!(evidence_hash_from_uri(uri), evidence_hash_from_uri("ipfs://other"));
    }

    #[test]
    fn test_generated_key_roundtrip() {
        let (signer, secret) = LocalKeySigner::generate();
        let restored = LocalKeySigner::from_secret(&secret).unwrap();
        assert_eq!(signer.address(), restored.address());
    }

    #[test]
    fn test_import_known_key() {
        // Well-known development key (account #0 of the default test mnemonic)
        let (signer, _) = LocalKeySigner::import_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            format!("{:?}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_import_rejects_malformed_key() {
        assert!(matches!(
            LocalKeySigner::import_hex("0x1234"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            LocalKeySigner::import_hex(&"00".repeat(32)),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_transaction_recovers_signer() {
        let (signer, _) = LocalKeySigner::generate();
        let tx: TypedTransaction = TransactionRequest::new()
            .to(Address::zero())
            .value(1u64)
            .nonce(0u64)
            .gas(21_000u64)
            .gas_price(1u64)
            .chain_id(1u64)
            .into();

        let signature = signer.sign_transaction(&tx).await.unwrap();
        assert_eq!(signature.recover(tx.sighash()).unwrap(), signer.address());
    }
}
