//! End-to-end flows against the in-memory ledger

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tempfile::TempDir;
use validator_client::{
    config::{StorageConfig, StoreBackend},
    ledger::mock::{LedgerCall, MockLedger},
    storage::{open_store, RecordStore},
    CommitRecord, CommitRequest, CommitmentEngine, DisputeController, Error, Evidence,
    IdentityStore, JobId, LedgerClient, ManualClock, PhaseWarning, RecordKey, RecordStoreExt, RevealEngine,
    Role, StakeController,
};

const COMMIT_DEADLINE: u64 = 1_700_000_100;
const REVEAL_DEADLINE: u64 = 1_700_000_200;

fn open(dir: &TempDir, backend: StoreBackend) -> Arc<dyn RecordStore> {
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        backend,
    };
    Arc::from(open_store(&config).unwrap())
}

fn reveals(ledger: &MockLedger) -> usize {
    ledger
        .calls()
        .iter()
        .filter(|c| matches!(c, LedgerCall::Reveal { .. }))
        .count()
}

async fn commit_then_reveal(backend: StoreBackend) {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, backend);
    let identities = IdentityStore::new(store.clone());
    let alice = identities
        .generate("alice", "alice.club.agi.eth", None, None)
        .unwrap();
    assert_eq!(alice.subdomain, "alice");

    let clock = Arc::new(ManualClock::new(COMMIT_DEADLINE - 50));
    let ledger = Arc::new(MockLedger::new(alice.address).with_clock(clock.clone()));
    let job = JobId::from(42);
    ledger.set_round(job, COMMIT_DEADLINE, REVEAL_DEADLINE);
    ledger.set_nonce(job, U256::from(1));
    ledger.set_spec_hash(job, H256::repeat_byte(0x5c));

    let committed = CommitmentEngine::new(ledger.clone(), store.clone(), clock.clone())
        .commit(
            &alice,
            &CommitRequest {
                job_id: job,
                approve: true,
                burn_tx_hash: Some(H256::zero()),
                salt: None,
            },
        )
        .await
        .unwrap();

    let reveal = RevealEngine::new(ledger.clone(), store.clone(), clock.clone());

    // Too early: refused locally, nothing sent
    let err = reveal.reveal(&alice, job, false).await.unwrap_err();
    assert!(matches!(
        err,
        Error::PhaseNotReached(PhaseWarning::RevealBeforeCommitDeadline { .. })
    ));
    assert_eq!(reveals(&ledger), 0);

    clock.set(COMMIT_DEADLINE + 1);
    let revealed = reveal.reveal(&alice, job, false).await.unwrap();
    assert!(revealed.warnings.is_empty());
    assert_eq!(revealed.record.salt, committed.record.salt);
    assert_eq!(ledger.revealed_vote(job, alice.address), Some(true));

    // The record on disk is the one the reveal used
    let stored: CommitRecord = store.load(&RecordKey::commit("alice", job).unwrap()).unwrap();
    assert_eq!(stored, committed.record);
}

#[tokio::test]
async fn test_commit_reveal_scenario_file_store() {
    commit_then_reveal(StoreBackend::File).await;
}

#[tokio::test]
async fn test_commit_reveal_scenario_rocksdb_store() {
    commit_then_reveal(StoreBackend::RocksDb).await;
}

#[tokio::test]
async fn test_reveal_with_tampered_record_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, StoreBackend::File);
    let alice = IdentityStore::new(store.clone())
        .generate("alice", "alice.club.agi.eth", None, None)
        .unwrap();

    let clock = Arc::new(ManualClock::new(10));
    let ledger = Arc::new(MockLedger::new(alice.address).with_clock(clock.clone()));
    let job = JobId::from(5);
    ledger.set_round(job, 20, 30);

    CommitmentEngine::new(ledger.clone(), store.clone(), clock.clone())
        .commit(
            &alice,
            &CommitRequest {
                job_id: job,
                approve: false,
                burn_tx_hash: None,
                salt: Some(H256::repeat_byte(1)),
            },
        )
        .await
        .unwrap();

    let key = RecordKey::commit("alice", job).unwrap();
    let mut record: CommitRecord = store.load(&key).unwrap();
    record.approve = true;
    store.save(&key, &record).unwrap();

    clock.set(25);
    let err = RevealEngine::new(ledger.clone(), store, clock)
        .reveal(&alice, job, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(reveals(&ledger), 0);
}

#[tokio::test]
async fn test_identity_from_other_signer_is_refused() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, StoreBackend::File);
    let identities = IdentityStore::new(store.clone());
    let alice = identities
        .generate("alice", "alice.club.agi.eth", None, None)
        .unwrap();

    // Ledger session signing as someone else
    let ledger = Arc::new(MockLedger::new(Address::repeat_byte(0x99)));
    ledger.set_round(JobId::from(1), 100, 200);

    let err = CommitmentEngine::new(ledger.clone(), store, Arc::new(ManualClock::new(0)))
        .commit(
            &alice,
            &CommitRequest {
                job_id: JobId::from(1),
                approve: true,
                burn_tx_hash: None,
                salt: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SignerMismatch { .. }));
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn test_repeated_deposits_reuse_allowance() {
    let me = Address::repeat_byte(0x11);
    let ledger = Arc::new(MockLedger::new(me));
    ledger.mint(me, U256::from(10_000));
    ledger.set_allowance(me, ledger.stake_manager(), U256::from(10_000));

    let dir = TempDir::new().unwrap();
    let store = open(&dir, StoreBackend::File);
    let identity = IdentityStore::new(store.clone())
        .generate("alice", "alice.club.agi.eth", None, None)
        .unwrap();
    let identity = validator_client::IdentityRecord {
        address: me,
        ..identity
    };

    let controller = StakeController::new(ledger.clone());
    for _ in 0..2 {
        let outcome = controller
            .deposit(&identity, Role::Validator, U256::from(1_000))
            .await
            .unwrap();
        assert!(outcome.approval_tx.is_none());
    }
    assert_eq!(ledger.approval_count(), 0);
    assert_eq!(ledger.stake_of(me, Role::Validator), U256::from(2_000));
}

#[tokio::test]
async fn test_dispute_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, StoreBackend::File);
    let bob = IdentityStore::new(store)
        .generate("bob", "bob.club.agi.eth", None, None)
        .unwrap();
    let ledger = Arc::new(MockLedger::new(bob.address));
    let disputes = DisputeController::new(ledger.clone());
    let job = JobId::from(7);

    disputes
        .raise(&bob, job, &Evidence::text("bad output"))
        .await
        .unwrap();
    let open = disputes.status(job).await.unwrap().unwrap();
    assert_eq!(open.reason, "bad output");
    assert_eq!(open.evidence_hash, H256::zero());

    disputes
        .respond(
            &bob,
            job,
            &Evidence {
                uri: Some("ipfs://bafyreport".to_string()),
                ..Evidence::default()
            },
        )
        .await
        .unwrap();

    ledger.set_dispute(
        job,
        validator_client::Dispute {
            resolved: true,
            ..open
        },
    );
    let calls_before = ledger.calls().len();
    let err = disputes
        .respond(&bob, job, &Evidence::text("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(ledger.calls().len(), calls_before);
}
