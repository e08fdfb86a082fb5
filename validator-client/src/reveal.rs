//! Vote reveal and vote status
//!
//! A reveal submits the values stored at commit time verbatim. The salt only
//! ever comes from the local [`CommitRecord`]; a lost record cannot be
//! revealed.

use crate::{
    clock::Clock,
    crypto::CommitmentInputs,
    error::{Error, Result},
    ledger::{ensure_signer, LedgerClient, RevealRequest, TxHash},
    storage::{RecordKey, RecordStore, RecordStoreExt},
    types::{CommitRecord, IdentityRecord, JobId, PhaseWarning, Round, VotePhase},
};
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a successful reveal
#[derive(Debug, Clone)]
pub struct RevealOutcome {
    /// Record the reveal was built from
    pub record: CommitRecord,
    /// Reveal transaction
    pub tx_hash: TxHash,
    /// Timing warnings raised before submission
    pub warnings: Vec<PhaseWarning>,
}

/// Local and on-chain view of one vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteStatus {
    /// Job
    pub job_id: JobId,
    /// Round deadlines
    pub round: Round,
    /// Phase at `now`
    pub phase: VotePhase,
    /// Local clock
    pub now: u64,
    /// Commitment stored locally, if any
    pub local_commit: Option<H256>,
    /// Transaction that carried the local commitment
    pub commit_tx: Option<H256>,
}

/// Reveal phase of the vote
pub struct RevealEngine {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    expected_signer: Option<Address>,
}

impl RevealEngine {
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

    fn load_record(&self, label: &str, job_id: JobId) -> Result<Option<CommitRecord>> {
        let key = RecordKey::commit(label, job_id)?;
        match self.store.load(&key) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reveal the vote `identity` committed for `job_id`
    ///
    /// While the commit phase is still open the reveal is refused with
    /// [`Error::PhaseNotReached`] unless `force` is set.
    pub async fn reveal(
        &self,
        identity: &IdentityRecord,
        job_id: JobId,
        force: bool,
    ) -> Result<RevealOutcome> {
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;

        let record = self.load_record(&identity.label, job_id)?.ok_or_else(|| {
            Error::NotFound(format!(
                "no commit record for {} on job {}",
                identity.label, job_id
            ))
        })?;
        if record.validator != identity.address {
            return Err(Error::SignerMismatch {
                expected: record.validator,
                actual: identity.address,
            });
        }
        if CommitmentInputs::from(&record).commit_hash() != record.commit_hash {
            return Err(Error::Storage(format!(
                "commit record for {} on job {} is inconsistent",
                identity.label, job_id
            )));
        }

        let chain_id = self.ledger.chain_id().await?;
        if chain_id != record.chain_id {
            return Err(Error::Conflict(format!(
                "vote was committed on chain {} but the ledger is chain {}",
                record.chain_id, chain_id
            )));
        }

        let round = self.ledger.round_info(job_id).await?;
        if !round.is_active() {
            return Err(Error::NotFound(format!("no active round for job {}", job_id)));
        }

        let mut warnings = Vec::new();
        let now = self.clock.now();
        if now <= round.commit_deadline {
            let warning = PhaseWarning::RevealBeforeCommitDeadline {
                now,
                commit_deadline: round.commit_deadline,
            };
            warn!(job_id = %job_id, "{}", warning);
            if !force {
                return Err(Error::PhaseNotReached(warning));
            }
            warnings.push(warning);
        }
        if now > round.reveal_deadline {
            let warning = PhaseWarning::RevealDeadlinePassed {
                now,
                reveal_deadline: round.reveal_deadline,
            };
            warn!(job_id = %job_id, "{}", warning);
            warnings.push(warning);
        }

        let request = RevealRequest {
            job_id,
            approve: record.approve,
            burn_tx_hash: record.burn_tx_hash,
            salt: record.salt,
            subdomain: identity.subdomain.clone(),
            proof: identity.proof_or_empty(),
        };
        let tx_hash = self.ledger.reveal(&request).await?;

        info!(
            job_id = %job_id,
            label = %identity.label,
            tx = ?tx_hash,
            "Vote revealed"
        );

        Ok(RevealOutcome {
            record,
            tx_hash,
            warnings,
        })
    }

    /// Round phase and local commit state for `(label, job_id)`
    pub async fn status(&self, label: &str, job_id: JobId) -> Result<VoteStatus> {
        let record = self.load_record(label, job_id)?;
        let round = self.ledger.round_info(job_id).await?;
        let now = self.clock.now();

        Ok(VoteStatus {
            job_id,
            round,
            phase: round.phase(now),
            now,
            local_commit: record.as_ref().map(|r| r.commit_hash),
            commit_tx: record.and_then(|r| r.tx_hash),
        })
    }
}
