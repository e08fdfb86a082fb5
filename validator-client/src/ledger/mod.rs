//! Ledger access boundary
//!
//! [`LedgerClient`] is the only way protocol logic reaches the chain. It is
//! transport-agnostic; adapters implement it:
//!
//! - [`rpc::RpcLedger`] - JSON-RPC adapter signing through a [`ValidatorSigner`]
//! - [`mock::MockLedger`] - deterministic in-memory ledger for tests and dry runs
//!
//! Every mutating method awaits confirmation before returning, so a returned
//! transaction hash always refers to a mined, successful transaction.
//!
//! [`ValidatorSigner`]: crate::crypto::ValidatorSigner

pub mod mock;
pub mod rpc;

use crate::{
    types::{Dispute, JobId, Role, Round},
    Error, Result,
};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

/// Hash of a confirmed transaction
pub type TxHash = H256;

/// Arguments of a vote reveal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealRequest {
    /// Job voted on
    pub job_id: JobId,
    /// Vote outcome
    pub approve: bool,
    /// Burn receipt hash
    pub burn_tx_hash: H256,
    /// Blinding value used at commit time
    pub salt: H256,
    /// Validator subdomain
    pub subdomain: String,
    /// Membership proof
    pub proof: Vec<H256>,
}

/// Read/write access to the protocol contracts
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address mutating calls are sent from
    fn sender(&self) -> Address;

    /// Chain id of the connected ledger
    async fn chain_id(&self) -> Result<u64>;

    // Validation module

    /// Round deadlines for a job
    async fn round_info(&self, job_id: JobId) -> Result<Round>;

    /// Current round nonce for a job
    async fn job_nonce(&self, job_id: JobId) -> Result<U256>;

    /// Protocol domain separator
    async fn domain_separator(&self) -> Result<H256>;

    /// Submit a vote commitment
    async fn commit(
        &self,
        job_id: JobId,
        commit_hash: H256,
        subdomain: &str,
        proof: &[H256],
    ) -> Result<TxHash>;

    /// Reveal a committed vote
    async fn reveal(&self, request: &RevealRequest) -> Result<TxHash>;

    // Job registry

    /// Spec hash of a job
    async fn spec_hash(&self, job_id: JobId) -> Result<H256>;

    /// Raise a dispute over a job outcome
    async fn raise_dispute(&self, job_id: JobId, evidence_hash: H256, reason: &str)
        -> Result<TxHash>;

    // Dispute module

    /// Dispute state for a job (`raised_at == 0` when none)
    async fn dispute_info(&self, job_id: JobId) -> Result<Dispute>;

    /// Submit evidence to an open dispute
    async fn submit_evidence(&self, job_id: JobId, evidence_hash: H256, note: &str)
        -> Result<TxHash>;

    // Stake manager and staking token

    /// Stake manager address (approval spender)
    fn stake_manager(&self) -> Address;

    /// Deposit stake for a role
    async fn deposit_stake(&self, role: Role, amount: U256) -> Result<TxHash>;

    /// Request a stake withdrawal for a role
    async fn withdraw_stake(&self, role: Role, amount: U256) -> Result<TxHash>;

    /// Token allowance granted by `owner` to `spender`
    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256>;

    /// Approve `spender` for `amount`
    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash>;
}

/// Fail unless the ledger signs as `identity` (and `expected`, when given)
pub fn ensure_signer(
    ledger: &dyn LedgerClient,
    identity: Address,
    expected: Option<Address>,
) -> Result<()> {
    if let Some(expected) = expected {
        if expected != identity {
            return Err(Error::SignerMismatch {
                expected,
                actual: identity,
            });
        }
    }

    let sender = ledger.sender();
    if sender != identity {
        return Err(Error::SignerMismatch {
            expected: identity,
            actual: sender,
        });
    }
    Ok(())
}
