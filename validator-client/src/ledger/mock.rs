//! Deterministic in-memory ledger for tests and offline dry runs.
//!
//! Emulates the contract rules the client relies on. Phase deadlines are only
//! enforced once a clock is attached. Every mutating call is recorded, so
//! tests can assert on what was sent and what was not.

use super::{LedgerClient, RevealRequest, TxHash};
use crate::{
    clock::Clock,
    crypto,
    types::{Dispute, JobId, Role, Round},
    Error, Result,
};
use async_trait::async_trait;
use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutating call issued to the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    /// `validation.commit`
    Commit {
        /// Job id
        job_id: JobId,
        /// Submitted commitment
        commit_hash: H256,
    },
    /// `validation.reveal`
    Reveal {
        /// Job id
        job_id: JobId,
        /// Revealed outcome
        approve: bool,
    },
    /// `registry.raiseDispute`
    RaiseDispute {
        /// Job id
        job_id: JobId,
    },
    /// `dispute.submitEvidence`
    SubmitEvidence {
        /// Job id
        job_id: JobId,
    },
    /// `stake.deposit`
    DepositStake {
        /// Role
        role: Role,
        /// Amount in base units
        amount: U256,
    },
    /// `stake.withdraw`
    WithdrawStake {
        /// Role
        role: Role,
        /// Amount in base units
        amount: U256,
    },
    /// `token.approve`
    Approve {
        /// Spender
        spender: Address,
        /// Amount in base units
        amount: U256,
    },
}

#[derive(Debug, Default)]
struct State {
    rounds: HashMap<JobId, Round>,
    nonces: HashMap<JobId, U256>,
    spec_hashes: HashMap<JobId, H256>,
    commits: HashMap<(JobId, Address), H256>,
    reveals: HashMap<(JobId, Address), bool>,
    disputes: HashMap<JobId, Dispute>,
    evidence: Vec<(JobId, H256, String)>,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    stakes: HashMap<(Address, Role), U256>,
    calls: Vec<LedgerCall>,
    tx_count: u64,
    fail_next: Option<String>,
}

/// In-memory [`LedgerClient`]
pub struct MockLedger {
    sender: Address,
    chain_id: u64,
    domain_separator: H256,
    stake_manager: Address,
    clock: Option<Arc<dyn Clock>>,
    state: Mutex<State>,
}

impl std::fmt::Debug for MockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLedger")
            .field("sender", &self.sender)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl MockLedger {
    /// Ledger sending as `sender` on chain 31337
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            chain_id: 31337,
            domain_separator: H256(keccak256(b"mock-validation-module")),
            stake_manager: Address::from_low_u64_be(0x57a4e),
            clock: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Enforce round deadlines against `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the chain id
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Open a round for `job_id`
    pub fn set_round(&self, job_id: JobId, commit_deadline: u64, reveal_deadline: u64) {
        self.state.lock().rounds.insert(
            job_id,
            Round {
                commit_deadline,
                reveal_deadline,
            },
        );
    }

    /// Set the round nonce for `job_id`
    pub fn set_nonce(&self, job_id: JobId, nonce: U256) {
        self.state.lock().nonces.insert(job_id, nonce);
    }

    /// Set the spec hash for `job_id`
    pub fn set_spec_hash(&self, job_id: JobId, spec_hash: H256) {
        self.state.lock().spec_hashes.insert(job_id, spec_hash);
    }

    /// Replace the dispute state for `job_id`
    pub fn set_dispute(&self, job_id: JobId, dispute: Dispute) {
        self.state.lock().disputes.insert(job_id, dispute);
    }

    /// Credit staking tokens to `owner`
    pub fn mint(&self, owner: Address, amount: U256) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(owner).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Set the allowance `owner` grants `spender`
    pub fn set_allowance(&self, owner: Address, spender: Address, amount: U256) {
        self.state.lock().allowances.insert((owner, spender), amount);
    }

    /// Make the next mutating call revert with `reason`
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().fail_next = Some(reason.into());
    }

    /// Mutating calls issued so far
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().calls.clone()
    }

    /// Number of approval transactions issued so far
    pub fn approval_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, LedgerCall::Approve { .. }))
            .count()
    }

    /// Stake held by `owner` for `role`
    pub fn stake_of(&self, owner: Address, role: Role) -> U256 {
        self.state
            .lock()
            .stakes
            .get(&(owner, role))
            .copied()
            .unwrap_or_default()
    }

    /// Commitment stored for `(job_id, validator)`
    pub fn commitment_of(&self, job_id: JobId, validator: Address) -> Option<H256> {
        self.state.lock().commits.get(&(job_id, validator)).copied()
    }

    /// Revealed vote for `(job_id, validator)`
    pub fn revealed_vote(&self, job_id: JobId, validator: Address) -> Option<bool> {
        self.state.lock().reveals.get(&(job_id, validator)).copied()
    }

    /// Evidence submitted for `job_id`
    pub fn evidence_for(&self, job_id: JobId) -> Vec<(H256, String)> {
        self.state
            .lock()
            .evidence
            .iter()
            .filter(|(j, _, _)| *j == job_id)
            .map(|(_, h, n)| (*h, n.clone()))
            .collect()
    }

    fn now(&self) -> Option<u64> {
        self.clock.as_ref().map(|c| c.now())
    }

    // Log the call, honour an injected failure, and mint a tx hash
    fn begin_tx(&self, state: &mut State, call: LedgerCall) -> Result<TxHash> {
        state.calls.push(call);
        if let Some(reason) = state.fail_next.take() {
            return Err(Error::Ledger(reason));
        }
        state.tx_count += 1;
        let mut preimage = self.sender.as_bytes().to_vec();
        preimage.extend_from_slice(&state.tx_count.to_be_bytes());
        Ok(H256(keccak256(&preimage)))
    }

    fn revert(reason: &str) -> Error {
        Error::Ledger(format!("execution reverted: {}", reason))
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn round_info(&self, job_id: JobId) -> Result<Round> {
        Ok(self
            .state
            .lock()
            .rounds
            .get(&job_id)
            .copied()
            .unwrap_or_default())
    }

    async fn job_nonce(&self, job_id: JobId) -> Result<U256> {
        Ok(self
            .state
            .lock()
            .nonces
            .get(&job_id)
            .copied()
            .unwrap_or_default())
    }

    async fn domain_separator(&self) -> Result<H256> {
        Ok(self.domain_separator)
    }

    async fn commit(
        &self,
        job_id: JobId,
        commit_hash: H256,
        _subdomain: &str,
        _proof: &[H256],
    ) -> Result<TxHash> {
        let now = self.now();
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::Commit { job_id, commit_hash })?;

        let round = state.rounds.get(&job_id).copied().unwrap_or_default();
        if !round.is_active() {
            return Err(Self::revert("NoActiveRound"));
        }
        if matches!(now, Some(now) if now > round.commit_deadline) {
            return Err(Self::revert("CommitPhaseClosed"));
        }

        state.commits.insert((job_id, self.sender), commit_hash);
        Ok(tx)
    }

    async fn reveal(&self, request: &RevealRequest) -> Result<TxHash> {
        let now = self.now();
        let mut state = self.state.lock();
        let tx = self.begin_tx(
            &mut state,
            LedgerCall::Reveal {
                job_id: request.job_id,
                approve: request.approve,
            },
        )?;

        let round = state.rounds.get(&request.job_id).copied().unwrap_or_default();
        if let Some(now) = now {
            if now <= round.commit_deadline {
                return Err(Self::revert("CommitPhaseActive"));
            }
            if now > round.reveal_deadline {
                return Err(Self::revert("RevealPhaseClosed"));
            }
        }

        let committed = state
            .commits
            .get(&(request.job_id, self.sender))
            .copied()
            .ok_or_else(|| Self::revert("CommitMissing"))?;

        let nonce = state.nonces.get(&request.job_id).copied().unwrap_or_default();
        let spec_hash = state
            .spec_hashes
            .get(&request.job_id)
            .copied()
            .unwrap_or_default();
        let outcome = crypto::outcome_hash(nonce, spec_hash, request.approve, request.burn_tx_hash);
        let expected = crypto::commit_hash(
            request.job_id,
            outcome,
            request.salt,
            self.sender,
            self.chain_id,
            self.domain_separator,
        );
        if expected != committed {
            return Err(Self::revert("InvalidReveal"));
        }

        state.reveals.insert((request.job_id, self.sender), request.approve);
        Ok(tx)
    }

    async fn spec_hash(&self, job_id: JobId) -> Result<H256> {
        Ok(self
            .state
            .lock()
            .spec_hashes
            .get(&job_id)
            .copied()
            .unwrap_or_default())
    }

    async fn raise_dispute(
        &self,
        job_id: JobId,
        evidence_hash: H256,
        reason: &str,
    ) -> Result<TxHash> {
        let now = self.now().unwrap_or(1);
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::RaiseDispute { job_id })?;

        if matches!(state.disputes.get(&job_id), Some(d) if d.is_raised() && !d.resolved) {
            return Err(Self::revert("DisputeAlreadyRaised"));
        }

        state.disputes.insert(
            job_id,
            Dispute {
                claimant: self.sender,
                raised_at: now.max(1),
                resolved: false,
                reason: reason.to_string(),
                evidence_hash,
            },
        );
        Ok(tx)
    }

    async fn dispute_info(&self, job_id: JobId) -> Result<Dispute> {
        Ok(self
            .state
            .lock()
            .disputes
            .get(&job_id)
            .cloned()
            .unwrap_or(Dispute {
                claimant: Address::zero(),
                raised_at: 0,
                resolved: false,
                reason: String::new(),
                evidence_hash: H256::zero(),
            }))
    }

    async fn submit_evidence(
        &self,
        job_id: JobId,
        evidence_hash: H256,
        note: &str,
    ) -> Result<TxHash> {
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::SubmitEvidence { job_id })?;

        match state.disputes.get(&job_id) {
            Some(d) if d.is_raised() && !d.resolved => {}
            _ => return Err(Self::revert("NoActiveDispute")),
        }

        state.evidence.push((job_id, evidence_hash, note.to_string()));
        Ok(tx)
    }

    fn stake_manager(&self) -> Address {
        self.stake_manager
    }

    async fn deposit_stake(&self, role: Role, amount: U256) -> Result<TxHash> {
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::DepositStake { role, amount })?;

        let key = (self.sender, self.stake_manager);
        let allowance = state.allowances.get(&key).copied().unwrap_or_default();
        if allowance < amount {
            return Err(Self::revert("ERC20: insufficient allowance"));
        }
        let balance = state.balances.get(&self.sender).copied().unwrap_or_default();
        if balance < amount {
            return Err(Self::revert("ERC20: transfer amount exceeds balance"));
        }

        state.allowances.insert(key, allowance - amount);
        state.balances.insert(self.sender, balance - amount);
        let stake = state.stakes.entry((self.sender, role)).or_default();
        *stake = stake.saturating_add(amount);
        Ok(tx)
    }

    async fn withdraw_stake(&self, role: Role, amount: U256) -> Result<TxHash> {
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::WithdrawStake { role, amount })?;

        let stake = state
            .stakes
            .get(&(self.sender, role))
            .copied()
            .unwrap_or_default();
        if stake < amount {
            return Err(Self::revert("InsufficientStake"));
        }
        state.stakes.insert((self.sender, role), stake - amount);
        Ok(tx)
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        Ok(self
            .state
            .lock()
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let mut state = self.state.lock();
        let tx = self.begin_tx(&mut state, LedgerCall::Approve { spender, amount })?;
        state.allowances.insert((self.sender, spender), amount);
        Ok(tx)
    }
}
