use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use usdt_vault::{
    config::NetworkConfig,
    contracts::ReserveAsset,
    gateway::{Gateway, Role, Wallet},
    identity::{Identity, MspRegistry},
    ledger::PrivateLedger,
    peer::{Peer, ProposalResponse, STATUS_BAD_REQUEST},
};

#[derive(Parser)]
#[command(name = "vault", version, about = "USDT reserve vault chaincode on a simulated peer")]
struct Cli {
    /// Ledger snapshot file.
    #[arg(long, env = "VAULT_STATE", default_value = "vault-state.json", global = true)]
    state: PathBuf,

    /// Network config (JSON). Defaults to the built-in three-bank network.
    #[arg(long, env = "VAULT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding `<mspid>/sk.hex` and `<mspid>/pk.hex`.
    #[arg(long, env = "VAULT_CRYPTO_DIR", default_value = "crypto", global = true)]
    crypto_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate signing keys for every configured organisation.
    Keygen {
        /// Replace keys that already exist.
        #[arg(long)]
        force: bool,
    },
    /// Submit Mint as an organisation.
    Mint {
        #[arg(long)]
        org: String,
    },
    /// Evaluate ReadBalance as an organisation.
    ReadBalance {
        #[arg(long)]
        org: String,
    },
    /// Run the gateway balance query for a bank role.
    Balance {
        /// BankA, BankB, Regulator or Outsider.
        #[arg(long)]
        user: Role,
    },
    /// Answer JSON-line requests from stdin until EOF.
    Serve,
}

/// One line of `vault serve` input.
#[derive(Deserialize)]
struct ServeRequest {
    function: String,
    #[serde(default)]
    args: Vec<String>,
    org: String,
    #[serde(default)]
    submit: bool,
}

struct Node {
    config: NetworkConfig,
    wallet: Wallet,
    peer: Peer,
    state: PathBuf,
}

impl Node {
    fn open(cli: &Cli) -> Result<Self> {
        let config = NetworkConfig::load_or_default(cli.config.as_deref())?;
        let registry = MspRegistry::from_crypto_dir(&cli.crypto_dir, &config.organizations)?;
        if registry.msp_ids().is_empty() {
            bail!(
                "no enrolled organisations under {}; run `vault keygen` first",
                cli.crypto_dir.display()
            );
        }
        let wallet = Wallet::load(&cli.crypto_dir, &config.organizations)?;
        let ledger = PrivateLedger::load(&cli.state, &config.collections)?;
        let peer = Peer::new(&config, registry, ledger);
        Ok(Self {
            config,
            wallet,
            peer,
            state: cli.state.clone(),
        })
    }

    fn save(&self) -> Result<()> {
        self.peer
            .ledger()
            .save(&self.state)
            .with_context(|| format!("saving ledger to {}", self.state.display()))
    }

    fn handle(&mut self, line: &str) -> Result<ProposalResponse> {
        let request: ServeRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "malformed request");
                return Ok(ProposalResponse::error(
                    String::new(),
                    STATUS_BAD_REQUEST,
                    format!("malformed request: {err}"),
                ));
            }
        };
        let signed = match Gateway::new(&self.config, &self.wallet).proposal(
            &request.org,
            &request.function,
            request.args,
        ) {
            Ok(signed) => signed,
            Err(err) => {
                return Ok(ProposalResponse::error(
                    String::new(),
                    STATUS_BAD_REQUEST,
                    err.to_string(),
                ))
            }
        };
        if !request.submit {
            return Ok(self.peer.evaluate(&signed));
        }
        let response = self.peer.submit(&signed);
        if response.is_success() {
            self.save()?;
        }
        Ok(response)
    }
}

fn keygen_cmd(cli: &Cli, force: bool) -> Result<()> {
    let config = NetworkConfig::load_or_default(cli.config.as_deref())?;
    for org in &config.organizations {
        if cli.crypto_dir.join(&org.msp_id).join("sk.hex").exists() && !force {
            info!(msp = %org.msp_id, "keeping existing key");
            continue;
        }
        let dir = Identity::generate(&org.msp_id, &org.admin).save(&cli.crypto_dir)?;
        println!("keypair written → {}", dir.display());
    }
    Ok(())
}

fn mint_cmd(cli: &Cli, org: &str) -> Result<()> {
    let mut node = Node::open(cli)?;
    let signed = Gateway::new(&node.config, &node.wallet).proposal(org, "Mint", Vec::new())?;
    let response = node.peer.submit(&signed);
    if !response.is_success() {
        bail!(response.message);
    }
    node.save()?;
    println!("reserve minted (tx {})", response.tx_id);
    Ok(())
}

fn read_balance_cmd(cli: &Cli, org: &str) -> Result<()> {
    let node = Node::open(cli)?;
    let signed =
        Gateway::new(&node.config, &node.wallet).proposal(org, "ReadBalance", Vec::new())?;
    let response = node.peer.evaluate(&signed);
    if !response.is_success() {
        bail!(response.message);
    }
    let asset: ReserveAsset =
        serde_json::from_slice(&response.payload).context("decoding ReadBalance payload")?;
    println!("{}", serde_json::to_string_pretty(&asset)?);
    Ok(())
}

fn balance_cmd(cli: &Cli, role: Role) -> Result<()> {
    let node = Node::open(cli)?;
    let report = Gateway::new(&node.config, &node.wallet).query_balance(&node.peer, role)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn serve_cmd(cli: &Cli) -> Result<()> {
    let mut node = Node::open(cli)?;
    info!(
        channel = %node.config.channel,
        chaincode = %node.config.chaincode,
        "serving requests on stdin"
    );
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = node.handle(&line)?;
        serde_json::to_writer(&mut stdout, &response)?;
        writeln!(stdout)?;
        stdout.flush()?;
    }
    info!("stdin closed, shutting down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Command::Keygen { force } => keygen_cmd(&cli, *force),
        Command::Mint { org } => mint_cmd(&cli, org),
        Command::ReadBalance { org } => read_balance_cmd(&cli, org),
        Command::Balance { user } => balance_cmd(&cli, *user),
        Command::Serve => serve_cmd(&cli),
    }
}
