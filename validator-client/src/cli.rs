//! Command-line surface
//!
//! Every argument is parsed into its domain type by clap before any component
//! runs, so malformed input never reaches the ledger.

use crate::{
    clock::{Clock, SystemClock},
    commit::{CommitRequest, CommitmentEngine},
    config::Config,
    crypto::{LocalKeySigner, ValidatorSigner},
    dispute::{DisputeController, Evidence},
    error::{Error, Result},
    identity::{read_proof_file, IdentityStore},
    ledger::{rpc::RpcLedger, LedgerClient},
    reveal::RevealEngine,
    stake::{format_amount, parse_amount, StakeController},
    storage::{normalize_label, open_store, RecordStore},
    types::{parse_hash, parse_job_id, IdentityRecord, JobId, Role},
};
use clap::{ArgAction, Args, Parser, Subcommand};
use ethers::types::H256;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

fn job_id_arg(s: &str) -> std::result::Result<JobId, String> {
    parse_job_id(s).map_err(|e| e.to_string())
}

fn hash_arg(s: &str) -> std::result::Result<H256, String> {
    parse_hash(s).map_err(|e| e.to_string())
}

fn label_arg(s: &str) -> std::result::Result<String, String> {
    normalize_label(s).map_err(|e| e.to_string())
}

/// Validator client for commit-reveal job validation
#[derive(Debug, Parser)]
#[command(name = "validator-cli", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "VALIDATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Record directory (overrides configuration)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON-RPC endpoint (overrides configuration)
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level command groups
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage validator identities
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Deposit or withdraw stake
    #[command(subcommand)]
    Stake(StakeCommand),
    /// Commit and reveal votes
    #[command(subcommand)]
    Vote(VoteCommand),
    /// Raise and answer disputes
    #[command(subcommand)]
    Challenge(ChallengeCommand),
}

/// Identity selection shared by signing commands
#[derive(Debug, Clone, Args)]
pub struct LabelArg {
    /// Identity label (defaults to identity.default_label)
    #[arg(long, value_parser = label_arg)]
    pub label: Option<String>,
}

/// `identity` subcommands
#[derive(Debug, Subcommand)]
pub enum IdentityCommand {
    /// Create a new identity
    Generate {
        /// Identity label
        #[arg(long, value_parser = label_arg)]
        label: String,
        /// Membership name, e.g. alice.club.agi.eth
        #[arg(long)]
        ens: String,
        /// JSON array of 32-byte proof hashes
        #[arg(long)]
        proof_file: Option<PathBuf>,
        /// Existing 32-byte secp256k1 key in hex
        #[arg(long)]
        import_key: Option<String>,
    },
    /// List identity labels
    List,
    /// Show an identity (never the key)
    Show {
        /// Identity label
        #[arg(long, value_parser = label_arg)]
        label: String,
    },
    /// Replace an identity's membership proof
    SetProof {
        /// Identity label
        #[arg(long, value_parser = label_arg)]
        label: String,
        /// JSON array of 32-byte proof hashes
        #[arg(long)]
        proof_file: PathBuf,
    },
}

/// Arguments of `stake deposit|withdraw`
#[derive(Debug, Clone, Args)]
pub struct StakeArgs {
    /// Identity
    #[command(flatten)]
    pub label: LabelArg,
    /// agent, validator or platform
    #[arg(long, default_value = "validator")]
    pub role: Role,
    /// Token amount, e.g. 12.5
    #[arg(long)]
    pub amount: String,
}

/// `stake` subcommands
#[derive(Debug, Subcommand)]
pub enum StakeCommand {
    /// Deposit stake, approving the stake manager if needed
    Deposit(StakeArgs),
    /// Request a stake withdrawal
    Withdraw(StakeArgs),
}

/// `vote` subcommands
#[derive(Debug, Subcommand)]
pub enum VoteCommand {
    /// Round phase and local commit state
    Status {
        /// Identity
        #[command(flatten)]
        label: LabelArg,
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
    },
    /// Commit a vote
    Commit {
        /// Identity
        #[command(flatten)]
        label: LabelArg,
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
        /// Vote outcome (`--approve` alone means true)
        #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
        approve: bool,
        /// Burn receipt hash (zero hash when omitted)
        #[arg(long, value_parser = hash_arg)]
        burn: Option<H256>,
        /// 32-byte salt (random when omitted)
        #[arg(long, value_parser = hash_arg)]
        salt: Option<H256>,
        /// Replace the stored membership proof before committing
        #[arg(long)]
        proof_file: Option<PathBuf>,
    },
    /// Reveal a committed vote
    Reveal {
        /// Identity
        #[command(flatten)]
        label: LabelArg,
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
        /// Submit even while the commit phase is open
        #[arg(long)]
        force: bool,
        /// Replace the stored membership proof before revealing
        #[arg(long)]
        proof_file: Option<PathBuf>,
    },
}

/// Evidence flags shared by `challenge raise|respond`
#[derive(Debug, Clone, Args)]
pub struct EvidenceArgs {
    /// 32-byte evidence hash
    #[arg(long, value_parser = hash_arg)]
    pub evidence: Option<H256>,
    /// Evidence URI (hashed when no --evidence is given)
    #[arg(long)]
    pub uri: Option<String>,
}

/// `challenge` subcommands
#[derive(Debug, Subcommand)]
pub enum ChallengeCommand {
    /// Raise a dispute
    Raise {
        /// Identity
        #[command(flatten)]
        label: LabelArg,
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
        /// Reason for the dispute
        #[arg(long)]
        reason: Option<String>,
        /// Evidence
        #[command(flatten)]
        evidence: EvidenceArgs,
    },
    /// Respond to an open dispute
    Respond {
        /// Identity
        #[command(flatten)]
        label: LabelArg,
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
        /// Response note
        #[arg(long)]
        note: Option<String>,
        /// Evidence
        #[command(flatten)]
        evidence: EvidenceArgs,
    },
    /// Show dispute state
    Status {
        /// Job id (decimal or 0x hex)
        #[arg(long, value_parser = job_id_arg)]
        job: JobId,
    },
}

impl EvidenceArgs {
    fn with_text(&self, text: Option<String>) -> Evidence {
        Evidence {
            text,
            evidence_hash: self.evidence,
            uri: self.uri.clone(),
        }
    }
}

/// Resolved configuration and local state for one invocation
struct Session {
    config: Config,
    store: Arc<dyn RecordStore>,
    identities: IdentityStore,
    clock: Arc<dyn Clock>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Config::from_file(path)?.with_env()?,
            None => Config::from_env()?,
        };
        if let Some(dir) = &cli.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if let Some(url) = &cli.rpc_url {
            config.ledger.rpc_url = url.clone();
        }
        config.validate()?;

        let store: Arc<dyn RecordStore> = Arc::from(open_store(&config.storage)?);
        debug!(data_dir = %config.storage.data_dir.display(), "Session opened");
        Ok(Self {
            identities: IdentityStore::new(store.clone()),
            store,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    fn label(&self, arg: &LabelArg) -> Result<String> {
        match (&arg.label, &self.config.identity.default_label) {
            (Some(label), _) => Ok(label.clone()),
            (None, Some(default)) => normalize_label(default),
            (None, None) => Err(Error::Validation(
                "--label is required (or set identity.default_label)".to_string(),
            )),
        }
    }

    /// Identity and a ledger signing as it
    ///
    /// A proof read from `proof_file` only replaces the proof in the returned
    /// record; [`Session::keep_proof`] stores it once the transaction lands.
    async fn signing(
        &self,
        arg: &LabelArg,
        proof_file: Option<&PathBuf>,
    ) -> Result<(IdentityRecord, Arc<dyn LedgerClient>)> {
        let label = self.label(arg)?;
        let proof = proof_file.map(read_proof_file).transpose()?;
        let (mut identity, signer) = self.identities.signer(&label)?;
        if proof.is_some() {
            identity.proof = proof;
        }
        let ledger = self.connect(Arc::new(signer)).await?;
        Ok((identity, ledger))
    }

    /// Persist a proof supplied with a confirmed vote transaction
    fn keep_proof(&self, identity: &IdentityRecord, proof_file: Option<&PathBuf>) -> Result<()> {
        if proof_file.is_some() {
            self.identities
                .replace_proof(&identity.label, identity.proof_or_empty())?;
        }
        Ok(())
    }

    /// Ledger for read-only queries
    async fn read_only(&self) -> Result<Arc<dyn LedgerClient>> {
        let (signer, _) = LocalKeySigner::generate();
        self.connect(Arc::new(signer)).await
    }

    async fn connect(&self, signer: Arc<dyn ValidatorSigner>) -> Result<Arc<dyn LedgerClient>> {
        let ledger = RpcLedger::connect(&self.config.ledger, signer).await?;
        Ok(Arc::new(ledger))
    }

    fn expected_signer(&self) -> Result<Option<ethers::types::Address>> {
        self.config.identity.expected_address()
    }
}

/// Run one command
pub async fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli)?;
    match &cli.command {
        Command::Identity(cmd) => run_identity(&session, cmd),
        Command::Stake(cmd) => run_stake(&session, cmd).await,
        Command::Vote(cmd) => run_vote(&session, cmd).await,
        Command::Challenge(cmd) => run_challenge(&session, cmd).await,
    }
}

fn run_identity(session: &Session, cmd: &IdentityCommand) -> Result<()> {
    let identities = &session.identities;
    match cmd {
        IdentityCommand::Generate {
            label,
            ens,
            proof_file,
            import_key,
        } => {
            let proof = proof_file.as_ref().map(read_proof_file).transpose()?;
            let record = identities.generate(label, ens, proof, import_key.as_deref())?;
            println!("label:     {}", record.label);
            println!("ens:       {}", record.ens);
            println!("subdomain: {}", record.subdomain);
            println!("address:   {:?}", record.address);
        }
        IdentityCommand::List => {
            let labels = identities.list()?;
            if labels.is_empty() {
                println!("no identities");
            }
            for label in &labels {
                println!("{}", label);
            }
        }
        IdentityCommand::Show { label } => {
            let record = identities.show(label)?;
            println!("label:     {}", record.label);
            println!("ens:       {}", record.ens);
            println!("subdomain: {}", record.subdomain);
            println!("address:   {:?}", record.address);
            match &record.proof {
                Some(proof) => println!("proof:     {} entries", proof.len()),
                None => println!("proof:     none"),
            }
            println!("created:   {}", record.created_at.to_rfc3339());
            println!("updated:   {}", record.updated_at.to_rfc3339());
        }
        IdentityCommand::SetProof { label, proof_file } => {
            let record = identities.set_proof(label, proof_file)?;
            println!(
                "proof for {} updated ({} entries)",
                record.label,
                record.proof_or_empty().len()
            );
        }
    }
    Ok(())
}

async fn run_stake(session: &Session, cmd: &StakeCommand) -> Result<()> {
    let decimals = session.config.ledger.token_decimals;
    let (args, deposit) = match cmd {
        StakeCommand::Deposit(args) => (args, true),
        StakeCommand::Withdraw(args) => (args, false),
    };
    let amount = parse_amount(&args.amount, decimals)?;

    let (identity, ledger) = session.signing(&args.label, None).await?;
    let controller = StakeController::new(ledger).with_expected_signer(session.expected_signer()?);
    let shown = format_amount(amount, decimals);

    if deposit {
        let outcome = controller.deposit(&identity, args.role, amount).await?;
        if let Some(tx) = outcome.approval_tx {
            println!("approved {} for the stake manager: {:?}", shown, tx);
        }
        println!("deposited {} as {}: {:?}", shown, args.role, outcome.tx_hash);
    } else {
        let tx = controller.withdraw(&identity, args.role, amount).await?;
        println!("withdrawal of {} as {} requested: {:?}", shown, args.role, tx);
    }
    Ok(())
}

async fn run_vote(session: &Session, cmd: &VoteCommand) -> Result<()> {
    let expected = session.expected_signer()?;
    match cmd {
        VoteCommand::Status { label, job } => {
            let label = session.label(label)?;
            let ledger = session.read_only().await?;
            let status = RevealEngine::new(ledger, session.store.clone(), session.clock.clone())
                .status(&label, *job)
                .await?;

            println!("job:             {}", status.job_id);
            println!("phase:           {}", status.phase);
            if status.round.is_active() {
                println!("commit deadline: {}", status.round.commit_deadline);
                println!("reveal deadline: {}", status.round.reveal_deadline);
            }
            println!("now:             {}", status.now);
            match status.local_commit {
                Some(hash) => println!("local commit:    {:?}", hash),
                None => println!("local commit:    none"),
            }
            if let Some(tx) = status.commit_tx {
                println!("commit tx:       {:?}", tx);
            }
        }
        VoteCommand::Commit {
            label,
            job,
            approve,
            burn,
            salt,
            proof_file,
        } => {
            let (identity, ledger) = session.signing(label, proof_file.as_ref()).await?;
            let outcome =
                CommitmentEngine::new(ledger, session.store.clone(), session.clock.clone())
                    .with_expected_signer(expected)
                    .commit(
                        &identity,
                        &CommitRequest {
                            job_id: *job,
                            approve: *approve,
                            burn_tx_hash: *burn,
                            salt: *salt,
                        },
                    )
                    .await?;
            session.keep_proof(&identity, proof_file.as_ref())?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("committed job {}: {:?}", job, outcome.tx_hash);
            println!("commit hash: {:?}", outcome.record.commit_hash);
        }
        VoteCommand::Reveal {
            label,
            job,
            force,
            proof_file,
        } => {
            let (identity, ledger) = session.signing(label, proof_file.as_ref()).await?;
            let outcome = RevealEngine::new(ledger, session.store.clone(), session.clock.clone())
                .with_expected_signer(expected)
                .reveal(&identity, *job, *force)
                .await?;
            session.keep_proof(&identity, proof_file.as_ref())?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("revealed job {}: {:?}", job, outcome.tx_hash);
        }
    }
    Ok(())
}

async fn run_challenge(session: &Session, cmd: &ChallengeCommand) -> Result<()> {
    let expected = session.expected_signer()?;
    match cmd {
        ChallengeCommand::Raise {
            label,
            job,
            reason,
            evidence,
        } => {
            let evidence = evidence.with_text(reason.clone());
            evidence.resolve("raise")?;
            let (identity, ledger) = session.signing(label, None).await?;
            let tx = DisputeController::new(ledger)
                .with_expected_signer(expected)
                .raise(&identity, *job, &evidence)
                .await?;
            println!("dispute raised on job {}: {:?}", job, tx);
        }
        ChallengeCommand::Respond {
            label,
            job,
            note,
            evidence,
        } => {
            let evidence = evidence.with_text(note.clone());
            evidence.resolve("respond")?;
            let (identity, ledger) = session.signing(label, None).await?;
            let tx = DisputeController::new(ledger)
                .with_expected_signer(expected)
                .respond(&identity, *job, &evidence)
                .await?;
            println!("evidence submitted on job {}: {:?}", job, tx);
        }
        ChallengeCommand::Status { job } => {
            let ledger = session.read_only().await?;
            match DisputeController::new(ledger).status(*job).await? {
                None => println!("no dispute for job {}", job),
                Some(dispute) => {
                    println!("claimant: {:?}", dispute.claimant);
                    println!("raised:   {}", dispute.raised_at);
                    println!("resolved: {}", dispute.resolved);
                    println!("reason:   {}", dispute.reason);
                    println!("evidence: {:?}", dispute.evidence_hash);
                }
            }
        }
    }
    Ok(())
}
