//! JSON-RPC ledger adapter
//!
//! Contract bindings are generated from human-readable ABIs. Transactions are
//! built by the bindings, filled by the node, signed through the injected
//! [`ValidatorSigner`] and broadcast raw; each call returns only once its
//! receipt is mined with the configured number of confirmations.

use super::{LedgerClient, RevealRequest, TxHash};
use crate::{
    config::LedgerConfig,
    crypto::ValidatorSigner,
    types::{Dispute, JobId, Role, Round},
    Error, Result,
};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{transaction::eip2718::TypedTransaction, Address, H256, U256, U64},
};
use std::sync::Arc;
use tracing::{debug, info};

use bindings::{DisputeModule, JobRegistry, StakeManager, StakingToken, ValidationModule};

#[allow(missing_docs)]
mod bindings {
    use ethers::contract::abigen;

    abigen!(
        ValidationModule,
        r#"[
            function rounds(uint256 jobId) external view returns (uint256 commitDeadline, uint256 revealDeadline)
            function jobNonce(uint256 jobId) external view returns (uint256)
            function DOMAIN_SEPARATOR() external view returns (bytes32)
            function commitValidation(uint256 jobId, bytes32 commitHash, string subdomain, bytes32[] proof) external
            function revealValidation(uint256 jobId, bool approve, bytes32 burnTxHash, bytes32 salt, string subdomain, bytes32[] proof) external
        ]"#
    );

    abigen!(
        JobRegistry,
        r#"[
            function getSpecHash(uint256 jobId) external view returns (bytes32)
            function raiseDispute(uint256 jobId, bytes32 evidenceHash, string reason) external
        ]"#
    );

    abigen!(
        DisputeModule,
        r#"[
            function disputes(uint256 jobId) external view returns (address claimant, uint256 raisedAt, bool resolved, string reason, bytes32 evidenceHash)
            function submitEvidence(uint256 jobId, bytes32 evidenceHash, string note) external
        ]"#
    );

    abigen!(
        StakeManager,
        r#"[
            function depositStake(uint8 role, uint256 amount) external
            function withdrawStake(uint8 role, uint256 amount) external
        ]"#
    );

    abigen!(
        StakingToken,
        r#"[
            function allowance(address owner, address spender) external view returns (uint256)
            function approve(address spender, uint256 amount) external returns (bool)
        ]"#
    );
}

type Client = Provider<Http>;

/// Ledger reached over JSON-RPC
pub struct RpcLedger {
    provider: Arc<Client>,
    signer: Arc<dyn ValidatorSigner>,
    chain_id: u64,
    confirmations: usize,
    stake_manager_address: Address,
    validation: ValidationModule<Client>,
    registry: JobRegistry<Client>,
    disputes: DisputeModule<Client>,
    stake: StakeManager<Client>,
    token: StakingToken<Client>,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("sender", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

fn rpc_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Ledger(format!("{}: {}", context, e))
}

fn to_u64(value: U256, field: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(Error::Ledger(format!("{} {} does not fit in u64", field, value)));
    }
    Ok(value.as_u64())
}

impl RpcLedger {
    /// Connect to the configured endpoint and bind the protocol contracts
    ///
    /// Fails with [`Error::Ledger`] when the node reports a chain id other
    /// than the configured one.
    pub async fn connect(config: &LedgerConfig, signer: Arc<dyn ValidatorSigner>) -> Result<Self> {
        let contracts = config.contracts()?;
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| Error::Config(format!("invalid rpc url {}: {}", config.rpc_url, e)))?;
        let provider = Arc::new(provider);

        let remote = provider
            .get_chainid()
            .await
            .map_err(|e| rpc_err("eth_chainId", e))?;
        let remote = to_u64(remote, "chain id")?;
        if let Some(expected) = config.chain_id {
            if expected != remote {
                return Err(Error::Ledger(format!(
                    "connected to chain {} but configuration expects {}",
                    remote, expected
                )));
            }
        }

        info!(
            rpc_url = %config.rpc_url,
            chain_id = remote,
            sender = ?signer.address(),
            "Connected to ledger"
        );

        Ok(Self {
            validation: ValidationModule::new(contracts.validation_module, provider.clone()),
            registry: JobRegistry::new(contracts.job_registry, provider.clone()),
            disputes: DisputeModule::new(contracts.dispute_module, provider.clone()),
            stake: StakeManager::new(contracts.stake_manager, provider.clone()),
            token: StakingToken::new(contracts.staking_token, provider.clone()),
            stake_manager_address: contracts.stake_manager,
            confirmations: config.confirmations.max(1),
            chain_id: remote,
            provider,
            signer,
        })
    }

    /// Fill, sign, broadcast and await a transaction
    async fn send(&self, what: &str, mut tx: TypedTransaction) -> Result<TxHash> {
        tx.set_from(self.signer.address());
        tx.set_chain_id(self.chain_id);

        // Gas estimation runs the call, so reverts surface here
        self.provider
            .fill_transaction(&mut tx, None)
            .await
            .map_err(|e| rpc_err(what, e))?;

        let signature = self.signer.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| rpc_err(what, e))?;
        debug!(tx = ?pending.tx_hash(), "{} broadcast", what);

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| rpc_err(what, e))?
            .ok_or_else(|| Error::Ledger(format!("{}: tx dropped from mempool", what)))?;

        if receipt.status != Some(U64::from(1)) {
            return Err(Error::Ledger(format!(
                "{}: tx {:?} reverted",
                what, receipt.transaction_hash
            )));
        }

        info!(tx = ?receipt.transaction_hash, block = ?receipt.block_number, "{} confirmed", what);
        Ok(receipt.transaction_hash)
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    fn sender(&self) -> Address {
        self.signer.address()
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn round_info(&self, job_id: JobId) -> Result<Round> {
        let (commit, reveal) = self
            .validation
            .rounds(job_id)
            .call()
            .await
            .map_err(|e| rpc_err("rounds", e))?;
        Ok(Round {
            commit_deadline: to_u64(commit, "commit deadline")?,
            reveal_deadline: to_u64(reveal, "reveal deadline")?,
        })
    }

    async fn job_nonce(&self, job_id: JobId) -> Result<U256> {
        self.validation
            .job_nonce(job_id)
            .call()
            .await
            .map_err(|e| rpc_err("jobNonce", e))
    }

    async fn domain_separator(&self) -> Result<H256> {
        self.validation
            .domain_separator()
            .call()
            .await
            .map(H256)
            .map_err(|e| rpc_err("DOMAIN_SEPARATOR", e))
    }

    async fn commit(
        &self,
        job_id: JobId,
        commit_hash: H256,
        subdomain: &str,
        proof: &[H256],
    ) -> Result<TxHash> {
        let call = self.validation.commit_validation(
            job_id,
            commit_hash.0,
            subdomain.to_string(),
            proof.iter().map(|h| h.0).collect(),
        );
        self.send("commitValidation", call.tx).await
    }

    async fn reveal(&self, request: &RevealRequest) -> Result<TxHash> {
        let call = self.validation.reveal_validation(
            request.job_id,
            request.approve,
            request.burn_tx_hash.0,
            request.salt.0,
            request.subdomain.clone(),
            request.proof.iter().map(|h| h.0).collect(),
        );
        self.send("revealValidation", call.tx).await
    }

    async fn spec_hash(&self, job_id: JobId) -> Result<H256> {
        self.registry
            .get_spec_hash(job_id)
            .call()
            .await
            .map(H256)
            .map_err(|e| rpc_err("getSpecHash", e))
    }

    async fn raise_dispute(
        &self,
        job_id: JobId,
        evidence_hash: H256,
        reason: &str,
    ) -> Result<TxHash> {
        let call = self
            .registry
            .raise_dispute(job_id, evidence_hash.0, reason.to_string());
        self.send("raiseDispute", call.tx).await
    }

    async fn dispute_info(&self, job_id: JobId) -> Result<Dispute> {
        let (claimant, raised_at, resolved, reason, evidence_hash) = self
            .disputes
            .disputes(job_id)
            .call()
            .await
            .map_err(|e| rpc_err("disputes", e))?;
        Ok(Dispute {
            claimant,
            raised_at: to_u64(raised_at, "raisedAt")?,
            resolved,
            reason,
            evidence_hash: H256(evidence_hash),
        })
    }

    async fn submit_evidence(
        &self,
        job_id: JobId,
        evidence_hash: H256,
        note: &str,
    ) -> Result<TxHash> {
        let call = self
            .disputes
            .submit_evidence(job_id, evidence_hash.0, note.to_string());
        self.send("submitEvidence", call.tx).await
    }

    fn stake_manager(&self) -> Address {
        self.stake_manager_address
    }

    async fn deposit_stake(&self, role: Role, amount: U256) -> Result<TxHash> {
        let call = self.stake.deposit_stake(role.as_u8(), amount);
        self.send("depositStake", call.tx).await
    }

    async fn withdraw_stake(&self, role: Role, amount: U256) -> Result<TxHash> {
        let call = self.stake.withdraw_stake(role.as_u8(), amount);
        self.send("withdrawStake", call.tx).await
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        self.token
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| rpc_err("allowance", e))
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let call = self.token.approve(spender, amount);
        self.send("approve", call.tx).await
    }
}
