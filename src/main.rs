use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use head_mirror::commit::CommitRequest;
use head_mirror::{ClientCommand, ClientConfig, HeadClient, SessionSignal};

#[derive(Parser)]
#[command(author, version, about = "Client-side mirror of a remote head node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default client configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/client.toml")]
        path: PathBuf,
    },
    /// Connect, replay history and log every live event until interrupted
    Follow {
        #[arg(short, long, default_value = "config/client.toml")]
        config: PathBuf,
    },
    /// Connect, send a single command and disconnect
    Send {
        #[arg(short, long, default_value = "config/client.toml")]
        config: PathBuf,
        #[command(subcommand)]
        command: CommandArg,
    },
    /// Request a draft commit transaction from the node
    Commit {
        #[arg(short, long, default_value = "config/client.toml")]
        config: PathBuf,
        /// JSON file mapping output references to the outputs to commit
        #[arg(short, long)]
        request: PathBuf,
    },
}

#[derive(Subcommand)]
enum CommandArg {
    Init,
    Abort,
    GetUtxo,
    Close,
    Fanout,
    Contest,
    NewTx {
        #[arg(long)]
        transaction: String,
    },
}

impl From<CommandArg> for ClientCommand {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::Init => ClientCommand::Init,
            CommandArg::Abort => ClientCommand::Abort,
            CommandArg::GetUtxo => ClientCommand::GetUtxo,
            CommandArg::Close => ClientCommand::Close,
            CommandArg::Fanout => ClientCommand::Fanout,
            CommandArg::Contest => ClientCommand::Contest,
            CommandArg::NewTx { transaction } => ClientCommand::NewTx { transaction },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Follow { config } => follow(config).await?,
        Commands::Send { config, command } => send(config, command.into()).await?,
        Commands::Commit { config, request } => commit(config, request).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ClientConfig> {
    if path.exists() {
        ClientConfig::load(path).with_context(|| format!("loading config from {path:?}"))
    } else {
        warn!(?path, "config file not found, using defaults");
        Ok(ClientConfig::default())
    }
}

fn generate_config(path: PathBuf) -> Result<()> {
    ClientConfig::default().save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

async fn follow(config_path: PathBuf) -> Result<()> {
    let client = HeadClient::new(load_config(&config_path)?)?;
    client.subscribe(|message| {
        let encoded = serde_json::to_string(message)?;
        info!(tag = %message.tag(), seq = message.seq, event = %encoded, "head event");
        Ok(())
    });
    let mut signals = client.signals();

    client.launch().await.context("launching head client")?;
    info!(client = %client.name(), phase = %client.phase(), "history replayed, following live events");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            received = signals.recv() => match received {
                Ok(SessionSignal::Disconnected | SessionSignal::Closed) => break,
                Ok(SessionSignal::TransportFailed { reason })
                | Ok(SessionSignal::ProtocolViolation { reason }) => {
                    warn!(%reason, "head session ended");
                    break;
                }
                Ok(other) => info!(signal = %other, "session signal"),
                Err(err) => warn!(error = %err, "missed session signals"),
            },
        }
    }

    let state = client.state();
    client.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn send(config_path: PathBuf, command: ClientCommand) -> Result<()> {
    let client = HeadClient::new(load_config(&config_path)?)?;
    client.launch().await.context("launching head client")?;
    client
        .send(&command)
        .with_context(|| format!("sending {}", command.name()))?;
    info!(command = command.name(), phase = %client.phase(), "command sent");
    client.shutdown().await;
    Ok(())
}

async fn commit(config_path: PathBuf, request_path: PathBuf) -> Result<()> {
    let client = HeadClient::new(load_config(&config_path)?)?;
    let raw = fs::read_to_string(&request_path)
        .with_context(|| format!("reading commit request {request_path:?}"))?;
    let request: CommitRequest =
        serde_json::from_str(&raw).context("parsing commit request")?;
    let draft = client.commit(&request).await?;
    println!("{}", serde_json::to_string_pretty(&draft)?);
    Ok(())
}
