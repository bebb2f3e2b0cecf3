// crates/nrollup-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nrollup_core::{
    io::{ensure_parent_dir, load_config, read_auto, read_state_auto, write_auto, write_state_auto},
    submit_sealed, InMemoryLedger, LedgerCall, LedgerEvent, ProcessDepositsCall, RollupState,
    TransferRequest, TxLeafHashing,
};
use nrollup_crypto::{CircomPoseidon, FieldElement, PublicKey, SchnorrSigner, SchnorrVerifier, Signer};
use nrollup_merkle::zero_cache;
use nrollup_witness::{check_witness, encode, io::write_witness_auto, CheckParams, EncodeOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "nrollup",
    about = "nrollup state engine CLI",
    long_about = "nrollup state engine CLI.\n\nKeeps the rollup state in a JSON/CBOR file: queue and flush deposits, apply transfer batches, write circuit witnesses and ledger calls, and reconcile ledger events.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the zero-subtree cache for a tree depth
    ZeroCache {
        /// Tree depth (1..=32)
        #[arg(long, default_value_t = 4)]
        depth: usize,
    },

    /// Create an empty state file
    Init {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Config file (CBOR/JSON); falls back to $NROLLUP_CONFIG, then defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the balance tree depth
        #[arg(long)]
        balance_depth: Option<usize>,

        /// Override the transaction tree depth
        #[arg(long)]
        tx_depth: Option<usize>,

        /// Override log2 of the deposit batch size
        #[arg(long)]
        deposit_batch_log2: Option<u32>,

        /// Override the transaction-leaf hashing convention
        #[arg(long, value_enum)]
        tx_leaf_hashing: Option<HashingOpt>,

        /// Overwrite an existing state file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Generate a signing key file
    Keygen {
        /// Output key path (JSON)
        #[arg(long, default_value = "key.json")]
        out: PathBuf,

        /// Derive the key from this seed instead of the OS RNG
        #[arg(long)]
        seed: Option<String>,
    },

    /// Queue a deposit (or, with --genesis, the reserved empty leaf)
    Deposit {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Queue the reserved empty leaf at index 0
        #[arg(long, default_value_t = false, conflicts_with_all = ["key", "amount"])]
        genesis: bool,

        /// Key file of the account owner (only the public key is read)
        #[arg(long, required_unless_present = "genesis")]
        key: Option<PathBuf>,

        /// Amount to credit (decimal or 0x-hex)
        #[arg(long, required_unless_present = "genesis")]
        amount: Option<FieldElement>,

        /// Token type (decimal or 0x-hex)
        #[arg(long, default_value = "1")]
        token_type: FieldElement,

        /// Write the ledger `deposit` call here (CBOR/JSON)
        #[arg(long)]
        out_call: Option<PathBuf>,
    },

    /// Merge the full pending deposit batch into the balance tree
    FlushDeposits {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Output path for the ledger `processDeposits` call (CBOR/JSON)
        #[arg(long, default_value = "process_deposits.json")]
        out_call: PathBuf,
    },

    /// Apply a transfers file as one batch and write the circuit witness
    Batch {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Transfers (CBOR/JSON): [{from_index, to_index, amount, token_type, secret}]
        #[arg(long)]
        transfers: PathBuf,

        /// Witness output; `.toml` writes Prover.toml, otherwise CBOR/JSON
        #[arg(long, default_value = "Prover.toml")]
        witness: PathBuf,

        /// Also write the sealed batch (proofs, leaves, roots) here
        #[arg(long)]
        sealed: Option<PathBuf>,

        /// Output path for the ledger batch-submission call (CBOR/JSON)
        #[arg(long, default_value = "submit_batch.json")]
        out_call: PathBuf,

        /// Proof bytes (hex) to carry in the submission call
        #[arg(long, default_value = "")]
        proof_hex: String,

        /// Zero-pad balance paths to this width
        #[arg(long)]
        balance_path_width: Option<usize>,

        /// Zero-pad transaction paths to this width
        #[arg(long)]
        tx_path_width: Option<usize>,
    },

    /// Check ledger events (CBOR/JSON list) against the expected confirmations
    Reconcile {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Events emitted by the ledger, in order
        #[arg(long)]
        events: PathBuf,
    },

    /// Clear a halt once the local root equals the ledger root
    ResolveHalt {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// Root currently held by the ledger
        #[arg(long)]
        ledger_root: FieldElement,
    },

    /// Summarize a state file
    Inspect {
        /// State path (CBOR/JSON)
        #[arg(long, default_value = "state.json")]
        state: PathBuf,

        /// List every account
        #[arg(long, default_value_t = false)]
        accounts: bool,
    },

    /// Deposit, flush, transfer, and submit against an in-memory ledger
    Demo {
        /// Write the demo batch witness here (.toml/.json/.cbor)
        #[arg(long)]
        witness: Option<PathBuf>,

        /// Per-submission timeout in milliseconds
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum HashingOpt {
    /// H(H(first four fields), H(last four fields))
    Split,
    /// H(all eight fields)
    Flat,
}

impl From<HashingOpt> for TxLeafHashing {
    fn from(o: HashingOpt) -> Self {
        match o {
            HashingOpt::Split => Self::Split,
            HashingOpt::Flat => Self::Flat,
        }
    }
}

/// Key file written by `keygen`.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    secret: String,
    public_key: PublicKey,
}

/// One entry of a `batch` transfers file.
#[derive(Debug, Deserialize)]
struct TransferEntry {
    from_index: u64,
    to_index: u64,
    amount: FieldElement,
    token_type: FieldElement,
    /// Sender secret key (hex).
    secret: String,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::ZeroCache { depth } => print_zero_cache(depth),

        Cmd::Init {
            state,
            config,
            balance_depth,
            tx_depth,
            deposit_batch_log2,
            tx_leaf_hashing,
            force,
        } => init(
            &state,
            config.as_deref(),
            balance_depth,
            tx_depth,
            deposit_batch_log2,
            tx_leaf_hashing,
            force,
        ),

        Cmd::Keygen { out, seed } => keygen(&out, seed.as_deref()),

        Cmd::Deposit {
            state,
            genesis,
            key,
            amount,
            token_type,
            out_call,
        } => deposit(&state, genesis, key.as_deref(), amount, token_type, out_call.as_deref()),

        Cmd::FlushDeposits { state, out_call } => flush_deposits(&state, &out_call),

        Cmd::Batch {
            state,
            transfers,
            witness,
            sealed,
            out_call,
            proof_hex,
            balance_path_width,
            tx_path_width,
        } => batch(
            &state,
            &transfers,
            &witness,
            sealed.as_deref(),
            &out_call,
            &proof_hex,
            EncodeOptions {
                balance_path_width,
                tx_path_width,
            },
        ),

        Cmd::Reconcile { state, events } => reconcile(&state, &events),

        Cmd::ResolveHalt { state, ledger_root } => resolve_halt(&state, ledger_root),

        Cmd::Inspect { state, accounts } => inspect(&state, accounts),

        Cmd::Demo {
            witness,
            timeout_ms,
        } => demo(witness.as_deref(), Duration::from_millis(timeout_ms)),
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn load_state(path: &Path) -> Result<RollupState> {
    let snap = read_state_auto(path)?;
    RollupState::from_snapshot(snap, CircomPoseidon)
        .with_context(|| format!("restoring state from {}", path.display()))
}

fn save_state(path: &Path, st: &RollupState) -> Result<()> {
    let snap = st.snapshot().context("snapshotting state")?;
    write_state_auto(path, &snap)
}

/// Decimal for values that fit in 128 bits, hex otherwise.
fn num(v: &FieldElement) -> String {
    v.to_u128().map_or_else(|| v.to_hex(), |x| x.to_string())
}

fn print_zero_cache(depth: usize) -> Result<()> {
    let zc = zero_cache(depth, &CircomPoseidon, FieldElement::zero())
        .with_context(|| format!("zero cache for depth {depth}"))?;
    for (level, v) in zc.iter().enumerate() {
        println!("{level:>2}  {v}");
    }
    Ok(())
}

fn init(
    state: &Path,
    config: Option<&Path>,
    balance_depth: Option<usize>,
    tx_depth: Option<usize>,
    deposit_batch_log2: Option<u32>,
    tx_leaf_hashing: Option<HashingOpt>,
    force: bool,
) -> Result<()> {
    if state.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", state.display());
    }
    let mut cfg = load_config(config)?;
    if let Some(d) = balance_depth {
        cfg.balance_depth = d;
    }
    if let Some(d) = tx_depth {
        cfg.tx_depth = d;
    }
    if let Some(k) = deposit_batch_log2 {
        cfg.deposit_batch_log2 = k;
    }
    if let Some(h) = tx_leaf_hashing {
        cfg.tx_leaf_hashing = h.into();
    }
    info!(?cfg, state=%state.display(), "initializing state");
    let st = RollupState::new(cfg).context("invalid configuration")?;
    save_state(state, &st)?;

    println!(
        "Initialized {} (balance depth {}, tx depth {}, deposit batch {}) root {}",
        state.display(),
        cfg.balance_depth,
        cfg.tx_depth,
        cfg.deposit_batch_size(),
        st.root()
    );
    Ok(())
}

fn keygen(out: &Path, seed: Option<&str>) -> Result<()> {
    let signer = match seed {
        Some(s) => SchnorrSigner::from_seed(s.as_bytes())?,
        None => SchnorrSigner::generate(&mut rand::rng())?,
    };
    let key = KeyFile {
        secret: signer.secret_hex(),
        public_key: signer.public_key(),
    };
    ensure_parent_dir(out)?;
    let json = serde_json::to_string_pretty(&key).context("serialize key file")?;
    std::fs::write(out, json).with_context(|| format!("write {}", out.display()))?;

    println!(
        "Wrote {} (pubkey x={} y={})",
        out.display(),
        key.public_key.x,
        key.public_key.y
    );
    Ok(())
}

fn read_key(path: &Path) -> Result<KeyFile> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse key file {}", path.display()))
}

fn deposit(
    state: &Path,
    genesis: bool,
    key: Option<&Path>,
    amount: Option<FieldElement>,
    token_type: FieldElement,
    out_call: Option<&Path>,
) -> Result<()> {
    let mut st = load_state(state)?;
    let call = if genesis {
        st.genesis_deposit()?
    } else {
        let key = key.ok_or_else(|| anyhow!("--key is required"))?;
        let amount = amount.ok_or_else(|| anyhow!("--amount is required"))?;
        let owner = read_key(key)?.public_key;
        st.deposit(owner, amount, token_type)?
    };
    info!(amount = %num(&call.amount), token_type = %call.token_type, "deposit queued");
    save_state(state, &st)?;
    if let Some(p) = out_call {
        write_auto(p, &LedgerCall::Deposit(call.clone()))?;
    }

    let q = st.deposit_queue();
    println!(
        "Queued deposit of {} ({} of {} pending)",
        num(&call.amount),
        q.len(),
        q.batch_size()
    );
    Ok(())
}

fn flush_deposits(state: &Path, out_call: &Path) -> Result<()> {
    let mut st = load_state(state)?;
    let flush = st.process_deposits().context("flushing deposits")?;
    write_auto(out_call, &LedgerCall::ProcessDeposits(ProcessDepositsCall::from(&flush)))?;
    save_state(state, &st)?;

    println!(
        "Flushed {} deposits at position {}: {} → {} (call → {})",
        flush.count,
        flush.position,
        flush.old_root,
        flush.new_root,
        out_call.display()
    );
    Ok(())
}

fn batch(
    state: &Path,
    transfers: &Path,
    witness_out: &Path,
    sealed_out: Option<&Path>,
    out_call: &Path,
    proof_hex: &str,
    opts: EncodeOptions,
) -> Result<()> {
    let mut st = load_state(state)?;
    let entries: Vec<TransferEntry> = read_auto(transfers)
        .with_context(|| format!("reading transfers {}", transfers.display()))?;
    if entries.is_empty() {
        bail!("{} holds no transfers", transfers.display());
    }
    let signers = entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            SchnorrSigner::from_secret_hex(&e.secret).with_context(|| format!("transfer {i}: secret"))
        })
        .collect::<Result<Vec<_>>>()?;
    let proof = hex::decode(proof_hex.trim_start_matches("0x")).context("--proof-hex is not hex")?;

    info!(count = entries.len(), root=%st.root(), "building batch");
    let sealed = {
        let mut builder = st.begin_batch(&SchnorrVerifier)?;
        for (i, (e, signer)) in entries.iter().zip(&signers).enumerate() {
            let req = TransferRequest {
                from_index: e.from_index,
                to_index: e.to_index,
                amount: e.amount,
                token_type: e.token_type,
            };
            match builder.add_transfer(&req, signer) {
                Ok(tx_index) => info!(i, tx_index, "transfer applied"),
                Err(err) => warn!(i, %err, "transfer rejected"),
            }
        }
        if builder.is_empty() {
            bail!("no transfer in {} was accepted", transfers.display());
        }
        builder.seal()?
    };

    let cw = encode(&sealed, &opts)?;
    check_witness(&cw, &CheckParams::from(&sealed), st.hasher(), &SchnorrVerifier)
        .context("encoded witness failed replay")?;
    write_witness_auto(witness_out, &cw)?;
    if let Some(p) = sealed_out {
        write_auto(p, &sealed)?;
    }
    write_auto(out_call, &LedgerCall::SubmitBatch(sealed.submit_call(proof)))?;
    save_state(state, &st)?;

    println!(
        "Sealed {} of {} transfers: {} → {} (witness → {}, call → {})",
        sealed.len(),
        entries.len(),
        sealed.old_root,
        sealed.new_root,
        witness_out.display(),
        out_call.display()
    );
    Ok(())
}

fn reconcile(state: &Path, events: &Path) -> Result<()> {
    let mut st = load_state(state)?;
    let evs: Vec<LedgerEvent> =
        read_auto(events).with_context(|| format!("reading events {}", events.display()))?;

    let mut outcome = Ok(());
    for (i, ev) in evs.iter().enumerate() {
        if let Err(e) = st.reconcile(ev) {
            outcome = Err(anyhow::Error::new(e).context(format!("event {i}")));
            break;
        }
    }
    // A halt must survive the process, so save before reporting.
    save_state(state, &st)?;
    outcome?;

    println!(
        "Reconciled {} events; confirmed root {}",
        evs.len(),
        st.confirmed_root()
    );
    Ok(())
}

fn resolve_halt(state: &Path, ledger_root: FieldElement) -> Result<()> {
    let mut st = load_state(state)?;
    st.resolve_halt(ledger_root)?;
    save_state(state, &st)?;
    println!("OK: state resumed at {ledger_root}");
    Ok(())
}

fn inspect(state: &Path, list_accounts: bool) -> Result<()> {
    let st = load_state(state)?;
    let cfg = st.config();
    println!("state:          {}", state.display());
    println!(
        "config:         balance depth {}, tx depth {}, deposit batch {}, tx leaves {:?}",
        cfg.balance_depth,
        cfg.tx_depth,
        cfg.deposit_batch_size(),
        cfg.tx_leaf_hashing
    );
    println!("root:           {}", st.root());
    println!("confirmed root: {}", st.confirmed_root());
    println!("accounts:       {}", st.accounts().len());
    println!("pending:        {} deposits", st.deposit_queue().len());
    println!("expected:       {} confirmations", st.pending_confirmations().count());
    match st.halt_reason() {
        Some(r) => println!("HALTED:         {r}"),
        None => println!("status:         live"),
    }
    if list_accounts {
        for (i, a) in st.accounts().iter() {
            println!(
                "  [{i:>3}] x={} balance={} nonce={} token={}",
                a.pubkey.x,
                num(&a.balance),
                num(&a.nonce),
                num(&a.token_type)
            );
        }
    }
    Ok(())
}

fn demo(witness_out: Option<&Path>, timeout: Duration) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("building tokio runtime")?;
    rt.block_on(run_demo(witness_out, timeout))
}

/// Submit `call` and reconcile whatever the ledger emits.
async fn relay(
    ledger: &InMemoryLedger,
    st: &mut RollupState,
    call: &LedgerCall,
    timeout: Duration,
) -> Result<()> {
    let events = submit_sealed(ledger, call, timeout)
        .await
        .context("ledger submission")?;
    for ev in &events {
        st.reconcile(ev)?;
    }
    Ok(())
}

async fn run_demo(witness_out: Option<&Path>, timeout: Duration) -> Result<()> {
    let mut st = RollupState::new(nrollup_core::RollupConfig::default())?;
    let ledger = InMemoryLedger::new(st.config().balance_depth)?;
    let keys = ["alice", "bob", "carol"]
        .iter()
        .map(|s| SchnorrSigner::from_seed(s.as_bytes()))
        .collect::<Result<Vec<_>, _>>()?;
    let token = FieldElement::from_u64(1);

    let mut calls = vec![LedgerCall::Deposit(st.genesis_deposit()?)];
    for (k, amount) in keys.iter().zip([100u64, 200, 0]) {
        let call = st.deposit(k.public_key(), FieldElement::from_u64(amount), token)?;
        calls.push(LedgerCall::Deposit(call));
    }
    let flush = st.process_deposits()?;
    calls.push(LedgerCall::ProcessDeposits(ProcessDepositsCall::from(&flush)));
    for call in &calls {
        relay(&ledger, &mut st, call, timeout).await?;
    }
    info!(root=%st.root(), "deposits confirmed");

    let sealed = {
        let mut builder = st.begin_batch(&SchnorrVerifier)?;
        for (from, to, amount, signer) in [(2, 1, 200, &keys[1]), (1, 3, 50, &keys[0])] {
            let req = TransferRequest {
                from_index: from,
                to_index: to,
                amount: FieldElement::from_u64(amount),
                token_type: token,
            };
            builder.add_transfer(&req, signer)?;
        }
        builder.seal()?
    };
    let cw = encode(&sealed, &EncodeOptions::default())?;
    check_witness(&cw, &CheckParams::from(&sealed), st.hasher(), &SchnorrVerifier)?;
    if let Some(p) = witness_out {
        write_witness_auto(p, &cw)?;
    }
    relay(&ledger, &mut st, &LedgerCall::SubmitBatch(sealed.submit_call(Vec::new())), timeout)
        .await?;

    let ledger_root = ledger.root().await;
    if st.confirmed_root() != ledger_root {
        bail!("confirmed root {} != ledger root {ledger_root}", st.confirmed_root());
    }
    println!("Deposits: {} leaves, root {}", flush.count, flush.new_root);
    println!("Batch:    {} transfers, root {}", sealed.len(), sealed.new_root);
    for (i, a) in st.accounts().iter().skip(1) {
        println!("  [{i}] balance={} nonce={}", num(&a.balance), num(&a.nonce));
    }
    println!("OK: ledger and local state agree at {ledger_root}");
    Ok(())
}
