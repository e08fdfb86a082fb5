//! Vote commitment
//!
//! Builds the commitment for one `(job, validator, vote, salt)` and submits it
//! with a single ledger call. The local [`CommitRecord`] is written only after
//! the ledger confirms, and carries every input hashed into the commitment.

use crate::{
    clock::Clock,
    crypto::{random_salt, CommitmentInputs},
    error::{Error, Result},
    ledger::{ensure_signer, LedgerClient, TxHash},
    storage::{RecordKey, RecordStore, RecordStoreExt},
    types::{CommitRecord, IdentityRecord, JobId, PhaseWarning},
};
use chrono::Utc;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Vote to commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Job voted on
    pub job_id: JobId,
    /// Vote outcome
    pub approve: bool,
    /// Burn receipt hash; the zero hash stands for "no burn receipt"
    pub burn_tx_hash: Option<H256>,
    /// Blinding value; 32 random bytes when absent
    pub salt: Option<H256>,
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Record persisted for the later reveal
    pub record: CommitRecord,
    /// Commit transaction
    pub tx_hash: TxHash,
    /// Timing warnings raised before submission
    pub warnings: Vec<PhaseWarning>,
}

/// Commit phase of the vote
pub struct CommitmentEngine {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    expected_signer: Option<Address>,
}

impl CommitmentEngine {
    /// Create a new engine
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            store,
            clock,
            expected_signer: None,
        }
    }

    /// Require the resolved identity to sign as `address`
    pub fn with_expected_signer(mut self, address: Option<Address>) -> Self {
        self.expected_signer = address;
        self
    }

    /// Commit a vote for `identity`
    ///
    /// Exactly one mutating ledger call is made. Any failure before it leaves
    /// both the ledger and the local store untouched.
    pub async fn commit(
        &self,
        identity: &IdentityRecord,
        request: &CommitRequest,
    ) -> Result<CommitOutcome> {
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;
        let job_id = request.job_id;
        let key = RecordKey::commit(&identity.label, job_id)?;

        let round = self.ledger.round_info(job_id).await?;
        if !round.is_active() {
            return Err(Error::NotFound(format!("no active round for job {}", job_id)));
        }

        let mut warnings = Vec::new();
        let now = self.clock.now();
        if now > round.commit_deadline {
            let warning = PhaseWarning::CommitDeadlinePassed {
                now,
                commit_deadline: round.commit_deadline,
            };
            warn!(job_id = %job_id, "{}", warning);
            warnings.push(warning);
        }

        let nonce = self.ledger.job_nonce(job_id).await?;
        let spec_hash = self.ledger.spec_hash(job_id).await?;
        let chain_id = self.ledger.chain_id().await?;
        let domain_separator = self.ledger.domain_separator().await?;

        let inputs = CommitmentInputs {
            job_id,
            nonce,
            spec_hash,
            approve: request.approve,
            burn_tx_hash: request.burn_tx_hash.unwrap_or_else(H256::zero),
            salt: request.salt.unwrap_or_else(random_salt),
            validator: identity.address,
            chain_id,
            domain_separator,
        };
        let commit_hash = inputs.commit_hash();

        let tx_hash = self
            .ledger
            .commit(job_id, commit_hash, &identity.subdomain, &identity.proof_or_empty())
            .await?;

        let record = CommitRecord {
            job_id,
            validator: inputs.validator,
            approve: inputs.approve,
            burn_tx_hash: inputs.burn_tx_hash,
            salt: inputs.salt,
            nonce,
            spec_hash,
            chain_id,
            domain_separator,
            commit_hash,
            created_at: Utc::now(),
            tx_hash: Some(tx_hash),
        };

        if let Err(e) = self.store.save(&key, &record) {
            // The commitment is on-chain; without the record it cannot be revealed
            error!(job_id = %job_id, label = %identity.label, tx = ?tx_hash, "Commit record not saved: {}", e);
            return Err(Error::Storage(format!(
                "commit confirmed in {:?} but record {} could not be saved: {}",
                tx_hash, key, e
            )));
        }

        info!(
            job_id = %job_id,
            label = %identity.label,
            commit_hash = ?commit_hash,
            tx = ?tx_hash,
            "Vote committed"
        );

        Ok(CommitOutcome {
            record,
            tx_hash,
            warnings,
        })
    }
}
