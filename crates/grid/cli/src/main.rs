//! gridctl - Gridline command-line client
//!
//! Plays the grid game from a terminal:
//! - join the board and move, signed by a session key where allowed
//! - delegate the player to the rollup and back
//! - manage the session key lifecycle
//! - watch the reconciled player view and the board roster

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use grid_credential::{
    CacheProtection, CredentialCache, FileStore, LocalKeypairSigner, SealingKey,
    TransactionOnly, TransactionSigner,
};
use grid_ledger::{DualLedgerView, LedgerClient, RosterEntry, RosterPoller, RpcLedgerClient};
use grid_session::{GameClient, Outcome, SessionLifecycleManager, TracingNotifier};
use grid_types::LedgerKind;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{GridConfig, PASSPHRASE_ENV};

/// gridctl CLI
#[derive(Parser)]
#[command(name = "gridctl")]
#[command(about = "Gridline - grid game client with session keys", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GRIDLINE_CONFIG")]
    config: Option<String>,

    /// Wallet keypair file (JSON array of 64 bytes)
    #[arg(short, long, env = "GRIDLINE_KEYPAIR")]
    keypair: Option<PathBuf>,

    /// Treat the wallet as unable to sign plain messages
    #[arg(long)]
    transaction_only: bool,

    /// Log level
    #[arg(long, env = "GRIDLINE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "GRIDLINE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the session and the reconciled player view
    Status,

    /// Create the shared board account
    InitBoard,

    /// Join the board
    Join,

    /// Move by (dx, dy)
    #[command(allow_negative_numbers = true)]
    Move { dx: i8, dy: i8 },

    /// List every player on the board
    Roster,

    /// Follow the player until interrupted
    Watch {
        /// Poll and print the roster as well
        #[arg(long)]
        roster: bool,
    },

    /// Hand the player to the rollup
    Delegate,

    /// Return the player to the primary ledger
    Undelegate,

    /// Request lamports for the wallet on the primary ledger
    Airdrop { lamports: u64 },

    /// Session key lifecycle
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Derive and cache the session key
    Create,
    /// Register the session key for the player
    Register,
    /// Move the fee reserve to the session wallet
    Fund,
    /// Re-derive a key registered from another device
    Activate,
    /// Forget the session key here and on the ledger
    Revoke,
    /// Show the session state
    Status,
}

#[derive(Serialize)]
struct StatusReport {
    session: Option<grid_session::SessionStatus>,
    player: grid_ledger::ReconciledView,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GridConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }

    let signer = load_signer(&cli)?;
    let primary: Arc<dyn LedgerClient> =
        Arc::new(RpcLedgerClient::new(LedgerKind::Primary, config.primary.clone())?);
    let rollup: Arc<dyn LedgerClient> =
        Arc::new(RpcLedgerClient::new(LedgerKind::Rollup, config.rollup.clone())?);

    let sessions = Arc::new(SessionLifecycleManager::new(
        config.session.clone(),
        primary.clone(),
        rollup.clone(),
        config.programs,
        build_cache(&config)?,
        Arc::new(TracingNotifier),
    ));
    let view = Arc::new(DualLedgerView::new(
        primary,
        rollup,
        config.programs,
        config.view.clone(),
    ));
    let game = GameClient::new(view, sessions.clone()).await;

    let identity = signer.address();
    finish(sessions.connect(signer).await, |state| {
        tracing::info!(identity = %identity, state = %state, "connected");
    })?;

    match cli.command {
        Commands::Status => {
            let report = StatusReport {
                session: sessions.status().await,
                player: game.refresh().await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::InitBoard => finish(game.init_board().await, |tx| println!("✓ board initialized ({tx})")),
        Commands::Join => finish(game.join().await, |tx| println!("✓ joined ({tx})")),
        Commands::Move { dx, dy } => {
            finish(game.move_player(dx, dy).await, |tx| println!("✓ moved ({tx})"))?;
            if let Some(position) = game.view().current().await.position() {
                println!("  position: {position}");
            }
            Ok(())
        }
        Commands::Roster => {
            print_roster(&game.roster().await?);
            Ok(())
        }
        Commands::Watch { roster } => watch(&game, roster, config.view.roster_interval_secs).await,
        Commands::Delegate => finish(game.delegate().await, |tx| println!("✓ delegated ({tx})")),
        Commands::Undelegate => {
            finish(game.undelegate().await, |tx| println!("✓ undelegation requested ({tx})"))
        }
        Commands::Airdrop { lamports } => {
            let tx = game
                .view()
                .client(LedgerKind::Primary)
                .request_airdrop(&identity, lamports)
                .await?;
            println!("✓ airdrop of {lamports} lamports requested ({tx})");
            Ok(())
        }
        Commands::Session { command } => match command {
            SessionCommands::Create => match sessions.create_session_key().await {
                Some(credential) => {
                    println!("✓ session key {}", credential.address());
                    Ok(())
                }
                None => bail!("session key was not created"),
            },
            SessionCommands::Register => finish(sessions.register_session_key().await, |key| {
                println!("✓ session key {key} registered")
            }),
            SessionCommands::Fund => finish(sessions.fund_session_key_wallet().await, |tx| {
                println!("✓ session wallet funded ({tx})")
            }),
            SessionCommands::Activate => {
                finish(sessions.activate().await, |state| println!("✓ session {state}"))
            }
            SessionCommands::Revoke => {
                finish(sessions.revoke_session_key().await, |()| println!("✓ session key revoked"))
            }
            SessionCommands::Status => {
                println!("{}", serde_json::to_string_pretty(&sessions.status().await)?);
                Ok(())
            }
        },
    }
}

fn load_signer(cli: &Cli) -> anyhow::Result<Arc<dyn TransactionSigner>> {
    let path = cli
        .keypair
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config/solana/id.json")))
        .ok_or_else(|| anyhow!("no keypair given and no home directory"))?;
    let local = LocalKeypairSigner::from_file(&path)?;
    let signer: Arc<dyn TransactionSigner> = if cli.transaction_only {
        Arc::new(TransactionOnly::new(local))
    } else {
        Arc::new(local)
    };
    Ok(signer)
}

fn build_cache(config: &GridConfig) -> anyhow::Result<CredentialCache> {
    let origin = &config.session.origin;
    let store = match &config.cache.dir {
        Some(dir) => FileStore::for_origin(dir, origin),
        None => FileStore::default_location(origin)
            .ok_or_else(|| anyhow!("no data directory for the session cache"))?,
    };
    let protection = if config.cache.sealed {
        let passphrase = std::env::var(PASSPHRASE_ENV)
            .with_context(|| format!("cache sealing needs {PASSPHRASE_ENV}"))?;
        CacheProtection::Sealed(SealingKey::from_passphrase(&passphrase))
    } else {
        CacheProtection::Plaintext
    };
    tracing::debug!(dir = %store.dir().display(), sealed = config.cache.sealed, "session cache");
    Ok(CredentialCache::new(Arc::new(store), protection))
}

/// Print a successful outcome, turn anything else into an error.
fn finish<T>(outcome: Outcome<T>, done: impl FnOnce(T)) -> anyhow::Result<()> {
    match outcome {
        Outcome::Done(value) => {
            done(value);
            Ok(())
        }
        Outcome::Busy => bail!("another command is in progress"),
        Outcome::Failed(failure) => bail!("{failure}"),
        Outcome::Unresolved(message) => {
            bail!("could not confirm the outcome, check again later: {message}")
        }
    }
}

fn print_roster(entries: &[RosterEntry]) {
    if entries.is_empty() {
        println!("no players");
        return;
    }
    for entry in entries {
        println!(
            "{:<44} {:>9}  {}{}",
            entry.authority,
            entry.position.to_string(),
            if entry.delegated { "rollup" } else { "primary" },
            if entry.session_key.is_some() { "  session" } else { "" },
        );
    }
}

async fn watch(game: &GameClient, roster: bool, interval_secs: u64) -> anyhow::Result<()> {
    let identity = game
        .sessions()
        .identity()
        .await
        .ok_or_else(|| anyhow!("no wallet connected"))?;
    let view = game.view().clone();
    let mut updates = view.watch();
    view.subscribe(&identity).await?;
    let initial = view.refresh_entity(&identity).await?;
    println!("{}", serde_json::to_string(&initial)?);

    let poller = roster.then(|| RosterPoller::spawn(view.clone(), Duration::from_secs(interval_secs)));
    let mut rosters = poller.as_ref().map(|p| p.subscribe());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(player) => {
                    let at = chrono::Local::now().format("%H:%M:%S");
                    println!("[{at}] {}", serde_json::to_string(&player)?);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "view updates lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            entries = async {
                match rosters.as_mut() {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending().await,
                }
            } => {
                if let Some(entries) = entries {
                    print_roster(&entries);
                }
            }
        }
    }

    view.detach().await;
    if let Some(poller) = poller {
        poller.stop().await;
    }
    Ok(())
}
