//! Validator client for commit-reveal job validation
//!
//! A validator stakes collateral, then votes on submitted job results. Votes
//! are concealed as commitments during the commit window and disclosed during
//! the reveal window; contested outcomes go through a separate dispute flow.
//!
//! # Components
//!
//! - **Identity**: signing key bound to a label and a membership name
//! - **Commit / Reveal**: the two timed phases of a vote
//! - **Stake**: collateral deposits with idempotent allowance handling
//! - **Dispute**: contested outcomes
//! - **Storage**: whole-record overwrites keyed by label and job
//!
//! # Invariants
//!
//! - A commitment binds job, round nonce, spec, vote, burn receipt, salt,
//!   validator, chain and protocol deployment
//! - A reveal submits the stored commit inputs bit-for-bit
//! - Precondition failures abort before any mutating ledger call
//! - Every mutating ledger call is awaited to confirmation

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod cli;
pub mod clock;
pub mod commit;
pub mod config;
pub mod crypto;
pub mod dispute;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod reveal;
pub mod stake;
pub mod storage;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use commit::{CommitOutcome, CommitRequest, CommitmentEngine};
pub use config::Config;
pub use crypto::{CommitmentInputs, LocalKeySigner, ValidatorSigner};
pub use dispute::{DisputeController, Evidence};
pub use error::{Error, Result};
pub use identity::IdentityStore;
pub use ledger::LedgerClient;
pub use reveal::{RevealEngine, RevealOutcome, VoteStatus};
pub use stake::{DepositOutcome, StakeController};
pub use storage::{RecordKey, RecordStore, RecordStoreExt};
pub use types::{
    CommitRecord, Dispute, IdentityRecord, JobId, PhaseWarning, Role, Round, VotePhase,
};
