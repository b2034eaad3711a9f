use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, Seek, Write};
use std::path::{Path, PathBuf};
use zkp_mpc_vote::{
    field::{parse_field_element, to_decimal_string},
    CancelToken, CommitmentTree, Config, PoseidonHasher, ProofOrchestrator, ProofResult,
    VoteCalldata, VoteWitness, VoterCredentials,
};

/// Registry files beyond this size are refused; a depth-20 tree holds ~1M
/// commitments of at most 78 decimal digits each.
const MAX_REGISTRY_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "mpc.toml", env = "MPC_PROVER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create voter credentials and append their commitment to the registry.
    Register {
        #[arg(short, long)]
        registry: PathBuf,
        #[arg(short = 'o', long, default_value = "voter.json")]
        credentials_out: PathBuf,
    },
    /// Build the vote witness from the registry and the voter's credentials.
    Witness {
        #[arg(short, long)]
        registry: PathBuf,
        #[arg(short = 'k', long)]
        credentials: PathBuf,
        #[arg(long)]
        choice: u64,
        #[arg(short, long, default_value = "witness.json")]
        output: PathBuf,
    },
    /// Secret-share the witness to the MPC parties and collect the proof.
    Prove {
        #[arg(short, long)]
        witness: PathBuf,
        #[arg(short, long, default_value = "proof.json")]
        output: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProveOutput<'a> {
    result: &'a ProofResult,
    calldata: &'a VoteCalldata,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {what} file: {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {what}"))?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write {what} to {}", path.display()))
}

fn load_registry(path: &Path) -> Result<Vec<zkp_mpc_vote::FieldElement>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read registry metadata: {}", path.display()))?;
    if metadata.len() > MAX_REGISTRY_FILE_SIZE {
        return Err(anyhow::anyhow!(
            "Registry file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_REGISTRY_FILE_SIZE
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read registry: {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            parse_field_element(line)
                .with_context(|| format!("Invalid commitment on line {} of registry", n + 1))
        })
        .collect()
}

/// Appends `commitment` to the registry unless it is already present.
fn append_commitment(path: &Path, commitment: &str) -> Result<()> {
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open registry: {}", path.display()))?;

    let reader = BufReader::new(&file);
    for line in reader.lines() {
        let line = line.context("Failed to read line from registry")?;
        if line.trim() == commitment {
            return Err(anyhow::anyhow!("Commitment already registered"));
        }
    }

    let mut writer = std::io::BufWriter::new(&file);
    writer
        .seek(std::io::SeekFrom::End(0))
        .context("Failed to seek to end of registry")?;
    writeln!(writer, "{commitment}").context("Failed to write commitment")?;
    writer.flush().context("Failed to flush registry")?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn register(hasher: &PoseidonHasher, registry: &Path, credentials_out: &Path) -> Result<()> {
    let credentials = VoterCredentials::random(&mut rand::rngs::OsRng);
    let commitment = to_decimal_string(&credentials.commitment(hasher));

    // The registry is append-only, so the secrets must be on disk before
    // their commitment is published.
    let staged = staging_path(credentials_out);
    write_json(&staged, &credentials, "voter credentials")?;
    if let Err(e) = append_commitment(registry, &commitment) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    fs::rename(&staged, credentials_out).with_context(|| {
        format!(
            "Commitment registered but credentials remain at {}",
            staged.display()
        )
    })?;

    info!("Registered commitment {}", commitment);
    println!("Voter commitment: {commitment}");
    println!("Credentials written to {} (keep this file private)", credentials_out.display());
    Ok(())
}

fn build_witness(
    hasher: &PoseidonHasher,
    config: &Config,
    registry: &Path,
    credentials: &Path,
    choice: u64,
    output: &Path,
) -> Result<()> {
    let leaves = load_registry(registry)?;
    info!("Loaded {} commitments from {}", leaves.len(), registry.display());

    let tree = CommitmentTree::from_leaves(hasher, config.tree.depth, &leaves)
        .context("Failed to build commitment tree")?;
    println!("Merkle root: {}", to_decimal_string(&tree.root()));

    let credentials: VoterCredentials = read_json(credentials, "voter credentials")?;
    let commitment = credentials.commitment(hasher);
    let index = tree.position(&commitment).with_context(|| {
        format!(
            "Voter commitment {} not found in registry '{}'",
            to_decimal_string(&commitment),
            registry.display()
        )
    })?;
    debug!("Voter commitment found at slot {}", index);

    let proof = tree.proof(index).context("Failed to generate Merkle proof")?;
    let witness = VoteWitness::build(hasher, &credentials, choice, &proof, tree.root())
        .context("Failed to build vote witness")?;

    write_json(output, &witness, "witness")?;
    println!("Nullifier hash: {}", to_decimal_string(&witness.nullifier_hash));
    println!("Witness written to {}", output.display());
    Ok(())
}

async fn prove(hasher: &PoseidonHasher, config: &Config, witness: &Path, output: &Path) -> Result<()> {
    let witness: VoteWitness = read_json(witness, "witness")?;
    let orchestrator = ProofOrchestrator::from_config(config)?;
    info!(
        "Proving with {:?} strategy over {} parties",
        orchestrator.strategy(),
        orchestrator.parties().len()
    );

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling proof session");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator
        .generate_proof(&witness, &cancel)
        .await
        .context("MPC proof generation failed")?;
    let calldata = VoteCalldata::prepare(hasher, &result, &witness)
        .context("Failed to format proof for the verifier")?;

    write_json(
        output,
        &ProveOutput {
            result: &result,
            calldata: &calldata,
        },
        "proof",
    )?;
    println!("\n✓ Proof generated");
    println!("Vote commitment: 0x{}", hex::encode(calldata.vote_commitment));
    println!("Proof written to {}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let hasher = PoseidonHasher::new().context("Failed to initialize Poseidon hasher")?;

    match args.command {
        Command::Register {
            registry,
            credentials_out,
        } => register(&hasher, &registry, &credentials_out),
        Command::Witness {
            registry,
            credentials,
            choice,
            output,
        } => {
            let config = Config::load_from_file_or_default(&args.config)?;
            config.tree.validate()?;
            build_witness(&hasher, &config, &registry, &credentials, choice, &output)
        }
        Command::Prove { witness, output } => {
            let config = Config::load_from_file(&args.config)?;
            prove(&hasher, &config, &witness, &output).await
        }
    }
}
