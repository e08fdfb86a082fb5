//! Dispute actions on contested job outcomes

use crate::{
    crypto::evidence_hash_from_uri,
    error::{Error, Result},
    ledger::{ensure_signer, LedgerClient, TxHash},
    types::{Dispute, IdentityRecord, JobId},
};
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::info;

/// Supporting material for a dispute action
///
/// `uri` fills in whatever is missing: its keccak hash stands in for an absent
/// evidence hash and its text for an absent reason or note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    /// Reason (raise) or note (respond)
    pub text: Option<String>,
    /// Evidence hash
    pub evidence_hash: Option<H256>,
    /// Evidence location
    pub uri: Option<String>,
}

impl Evidence {
    /// Evidence with only a reason or note
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Evidence with only a hash
    pub fn hash(evidence_hash: H256) -> Self {
        Self {
            evidence_hash: Some(evidence_hash),
            ..Self::default()
        }
    }

    /// Resolve to the `(evidence_hash, text)` pair sent to the ledger
    ///
    /// Fails with [`Error::Validation`] when neither text nor a hash is
    /// available. A zero hash counts as missing. A missing hash is sent as
    /// zero, missing text as "".
    pub fn resolve(&self, what: &str) -> Result<(H256, String)> {
        let text = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let uri = self
            .uri
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let hash = self
            .evidence_hash
            .filter(|h| !h.is_zero())
            .or_else(|| uri.map(evidence_hash_from_uri));
        let text = text.or_else(|| uri.map(str::to_string));

        match (hash, text) {
            (None, None) => Err(Error::Validation(format!(
                "{} needs a {} or an evidence hash",
                what,
                if what == "raise" { "reason" } else { "note" }
            ))),
            (hash, text) => Ok((hash.unwrap_or_else(H256::zero), text.unwrap_or_default())),
        }
    }
}

/// Dispute actions for one validator
pub struct DisputeController {
    ledger: Arc<dyn LedgerClient>,
    expected_signer: Option<Address>,
}

impl DisputeController {
    /// Create a new controller
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            expected_signer: None,
        }
    }

    /// Require the resolved identity to sign as `address`
    pub fn with_expected_signer(mut self, address: Option<Address>) -> Self {
        self.expected_signer = address;
        self
    }

    /// Raise a dispute over the outcome of `job_id`
    pub async fn raise(
        &self,
        identity: &IdentityRecord,
        job_id: JobId,
        evidence: &Evidence,
    ) -> Result<TxHash> {
        let (evidence_hash, reason) = evidence.resolve("raise")?;
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;

        let tx_hash = self
            .ledger
            .raise_dispute(job_id, evidence_hash, &reason)
            .await?;
        info!(
            job_id = %job_id,
            label = %identity.label,
            evidence = ?evidence_hash,
            tx = ?tx_hash,
            "Dispute raised"
        );
        Ok(tx_hash)
    }

    /// Submit a response to the open dispute on `job_id`
    ///
    /// [`Error::NotFound`] when no dispute was raised, [`Error::Conflict`]
    /// when it is already resolved; neither issues a transaction.
    pub async fn respond(
        &self,
        identity: &IdentityRecord,
        job_id: JobId,
        evidence: &Evidence,
    ) -> Result<TxHash> {
        let (evidence_hash, note) = evidence.resolve("respond")?;
        ensure_signer(self.ledger.as_ref(), identity.address, self.expected_signer)?;

        let dispute = self.ledger.dispute_info(job_id).await?;
        if !dispute.is_raised() {
            return Err(Error::NotFound(format!("no dispute for job {}", job_id)));
        }
        if dispute.resolved {
            return Err(Error::Conflict(format!(
                "dispute for job {} is already resolved",
                job_id
            )));
        }

        let tx_hash = self
            .ledger
            .submit_evidence(job_id, evidence_hash, &note)
            .await?;
        info!(
            job_id = %job_id,
            label = %identity.label,
            evidence = ?evidence_hash,
            tx = ?tx_hash,
            "Dispute evidence submitted"
        );
        Ok(tx_hash)
    }

    /// Dispute on `job_id`, or `None` when none was raised
    pub async fn status(&self, job_id: JobId) -> Result<Option<Dispute>> {
        let dispute = self.ledger.dispute_info(job_id).await?;
        Ok(dispute.is_raised().then_some(dispute))
    }
}
