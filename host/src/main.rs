/// FHE Quest Host
///
/// Plays a treasure hunt against the in-process devnet: the owner account
/// encrypts a treasure cell and creates the game, then the player account
/// searches cells until it finds the treasure or runs out of guesses.
/// A JSON report of every attempt is written at the end.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use fhe_quest::creator::{DEFAULT_DURATION_SECONDS, DEFAULT_TREASURE_ETHER};
use fhe_quest::encryption::EncryptionGateway;
use fhe_quest::format::{format_address, format_ether, format_time, parse_ether};
use fhe_quest::grid::GridState;
use fhe_quest::resolver::ResolverState;
use fhe_quest::session::ensure_network;
use fhe_quest::sim::{Devnet, DevnetConfig, SimOracle, SimWallet};
use fhe_quest::store::StoreSnapshot;
use fhe_quest::{Command, Outcome, OutcomeKind, QuestClient, QuestConfig, Session, Update};
use fhe_quest_protocol::{Address, Coordinate, GRID_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type Client = QuestClient<Devnet, SimOracle>;
type Commands = mpsc::Sender<Command<Devnet, SimOracle>>;

#[derive(Parser)]
#[command(name = "fhe-quest", about = "Encrypted treasure hunt on a local devnet")]
struct Cli {
    /// JSON file with `client`, `devnet`, `owner` and `player` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the attempt report is written
    #[arg(long, default_value = "output.json")]
    output: PathBuf,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Create a game and search for its treasure
    Play {
        /// Treasure cell as `x,y`
        #[arg(long, value_parser = parse_cell, default_value = "7,3")]
        treasure: Coordinate,

        /// Cells to search, in order (`--guess 1,2 --guess 4,4`)
        #[arg(long = "guess", value_parser = parse_cell)]
        guesses: Vec<Coordinate>,

        /// Search every cell row by row after the explicit guesses
        #[arg(long)]
        sweep: bool,

        /// Prize in ETH
        #[arg(long, default_value = DEFAULT_TREASURE_ETHER)]
        prize: String,
    },
    /// Print the default configuration file
    DefaultConfig,
}

fn parse_cell(raw: &str) -> Result<Coordinate, String> {
    let (x, y) = raw.split_once(',').ok_or("expected `x,y`")?;
    let x = x.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let y = y.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Coordinate::new(x, y).map_err(|e| e.to_string())
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct HostConfig {
    client: QuestConfig,
    devnet: DevnetConfig,
    owner: Address,
    player: Address,
}

impl Default for HostConfig {
    fn default() -> Self {
        let mut client = QuestConfig::default();
        client.contract_address = Address::from_bytes([0xc0; 20]);
        Self {
            client,
            devnet: DevnetConfig::default(),
            owner: Address::from_bytes([0x0a; 20]),
            player: Address::from_bytes([0xb0; 20]),
        }
    }
}

#[derive(Serialize)]
struct AttemptReport {
    coordinate: Coordinate,
    message: String,
    /// Settled by the fallback timer rather than an oracle event.
    assumed: bool,
}

#[derive(Serialize)]
struct PlayReport {
    contract: Address,
    treasure: Coordinate,
    attempts: Vec<AttemptReport>,
    found: bool,
    wrong_cells: usize,
    final_state: Option<StoreSnapshot>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("failed to parse host config")?
        }
        None => HostConfig::default(),
    };

    match cli.command {
        Action::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&HostConfig::default())?);
            Ok(())
        }
        Action::Play { treasure, guesses, sweep, prize } => {
            let mut order = guesses;
            if sweep {
                for y in 0..GRID_SIZE as u32 {
                    for x in 0..GRID_SIZE as u32 {
                        order.push(Coordinate::new(x, y)?);
                    }
                }
            }
            if order.is_empty() {
                bail!("nothing to search: pass --guess x,y or --sweep");
            }
            let prize = parse_ether(&prize).map_err(|e| anyhow!("invalid prize: {e}"))?;

            let report = tokio::select! {
                report = play(&config, treasure, order, prize) => report?,
                _ = tokio::signal::ctrl_c() => bail!("interrupted"),
            };
            std::fs::write(&cli.output, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("failed to write {}", cli.output.display()))?;
            println!("\n✅ Report written to {}", cli.output.display());
            Ok(())
        }
    }
}

async fn play(
    config: &HostConfig,
    treasure: Coordinate,
    order: Vec<Coordinate>,
    prize: fhe_quest::Wei,
) -> Result<PlayReport> {
    let contract = config.client.contract_address.clone();
    let devnet = Arc::new(Devnet::new(&config.devnet, config.owner.clone(), contract.clone()));
    let oracle = Arc::new(SimOracle::new());
    let wallet = SimWallet::new(vec![config.owner.clone()], 1);

    println!("🗺️  FHE Quest");
    println!("  Contract: {}", format_address(&contract));
    println!("  Owner:    {}", format_address(&config.owner));
    println!("  Player:   {}", format_address(&config.player));

    ensure_network(&wallet, &config.client).await?;
    let owner_session =
        Session::open(&wallet, devnet.clone(), EncryptionGateway::new(oracle.clone()), &config.client)
            .await?;

    let (commands, command_rx) = mpsc::channel(16);
    let (update_tx, mut updates) = mpsc::channel(256);
    let client: Client = QuestClient::new(config.client.clone());
    let loop_handle = tokio::spawn(client.run(command_rx, update_tx));

    send(&commands, Command::SwitchSession(owner_session)).await?;
    expect_connected(&mut updates).await?;

    println!("\n🔒 Encrypting treasure at {treasure}...");
    send(&commands, Command::EncryptTreasure(treasure)).await?;
    wait_for(&mut updates, |u| matches!(u, Update::TreasureEncrypted)).await?;
    send(
        &commands,
        Command::CreateGame { treasure: prize, duration_seconds: DEFAULT_DURATION_SECONDS },
    )
    .await?;
    if let Update::GameCreated(receipt) =
        wait_for(&mut updates, |u| matches!(u, Update::GameCreated(_))).await?
    {
        println!("  Game created in block {} ({})", receipt.block_number, receipt.tx_hash);
    }

    wallet.set_accounts(vec![config.player.clone()]);
    let player_session =
        Session::open(&wallet, devnet.clone(), EncryptionGateway::new(oracle), &config.client).await?;
    send(&commands, Command::SwitchSession(player_session)).await?;
    let mut last_snapshot = expect_connected(&mut updates).await?;
    if let Some(snapshot) = &last_snapshot {
        println!(
            "\n🎮 Game #{} - prize {} ETH - fee {} ETH - {} left",
            snapshot.game.as_ref().map(|g| g.id).unwrap_or_default(),
            format_ether(prize),
            format_ether(snapshot.attempt_fee),
            format_time(snapshot.remaining_seconds),
        );
    }

    let mut attempts = Vec::new();
    let mut grid = GridState::new();
    let mut found = false;
    for coordinate in order {
        if grid.is_wrong(coordinate) {
            debug!(%coordinate, "skipping known-wrong cell");
            continue;
        }
        match search(&commands, &mut updates, coordinate, &mut grid, &mut last_snapshot).await? {
            Ok(outcome) => {
                println!("  {coordinate}: {outcome}");
                found = outcome.kind != OutcomeKind::WrongAttempt;
                attempts.push(AttemptReport {
                    coordinate,
                    message: outcome.to_string(),
                    assumed: !outcome.is_authoritative(),
                });
                if found {
                    break;
                }
            }
            Err(reason) => {
                println!("  {coordinate}: ❌ {reason}");
                attempts.push(AttemptReport { coordinate, message: reason, assumed: false });
                if last_snapshot.as_ref().is_some_and(|s| !s.is_active) {
                    break;
                }
            }
        }
    }

    send(&commands, Command::Shutdown).await?;
    loop_handle.await.context("client loop panicked")?;

    let balance = devnet.balance(&config.player);
    println!("\n📊 {} attempts, {} wrong cells", attempts.len(), grid.wrong_count());
    println!("  Player balance: {} ETH", format_ether(balance));
    if devnet.is_decryption_pending() {
        println!("  ⚠️  A decryption is still pending on-chain");
    }

    Ok(PlayReport {
        contract,
        treasure,
        attempts,
        found,
        wrong_cells: grid.wrong_count(),
        final_state: last_snapshot,
    })
}

async fn send(commands: &Commands, command: Command<Devnet, SimOracle>) -> Result<()> {
    commands.send(command).await.map_err(|_| anyhow!("client loop is gone"))
}

/// Waits for `Connected` and the snapshot of the refresh that follows it.
async fn expect_connected(updates: &mut mpsc::Receiver<Update>) -> Result<Option<StoreSnapshot>> {
    wait_for(updates, |u| matches!(u, Update::Connected { .. })).await?;
    match wait_for(updates, |u| matches!(u, Update::Snapshot(_))).await? {
        Update::Snapshot(snapshot) => Ok(Some(snapshot)),
        _ => Ok(None),
    }
}

/// Runs one attempt. The inner error is a user-facing failure that does
/// not stop the game loop.
async fn search(
    commands: &Commands,
    updates: &mut mpsc::Receiver<Update>,
    coordinate: Coordinate,
    grid: &mut GridState,
    snapshot: &mut Option<StoreSnapshot>,
) -> Result<std::result::Result<Outcome, String>> {
    send(commands, Command::Select(coordinate)).await?;
    loop {
        match next_update(updates).await? {
            Update::Failed(err) => return Ok(Err(err.to_string())),
            Update::State(ResolverState::Selected(selected)) if selected == coordinate => break,
            Update::Snapshot(latest) => *snapshot = Some(latest),
            _ => {}
        }
    }
    send(commands, Command::Start).await?;

    let mut outcome = None;
    loop {
        let update = next_update(updates).await?;
        match update {
            Update::Failed(err) => return Ok(Err(err.to_string())),
            Update::State(ResolverState::InFlight(status)) => info!(%coordinate, ?status, "attempt in flight"),
            Update::Resolved(resolved) => outcome = Some(resolved),
            Update::Grid(latest) => *grid = latest,
            Update::Snapshot(latest) => {
                *snapshot = Some(latest);
                if let Some(outcome) = outcome.take() {
                    return Ok(Ok(outcome));
                }
            }
            Update::GameEnded(event) => info!(?event, "game ended by another player"),
            Update::Countdown { remaining_seconds } => {
                debug!(remaining = %format_time(remaining_seconds), "countdown")
            }
            _ => {}
        }
    }
}

async fn wait_for(
    updates: &mut mpsc::Receiver<Update>,
    wanted: impl Fn(&Update) -> bool,
) -> Result<Update> {
    loop {
        let update = next_update(updates).await?;
        if let Update::Failed(err) = &update {
            bail!("{err}");
        }
        if wanted(&update) {
            return Ok(update);
        }
    }
}

async fn next_update(updates: &mut mpsc::Receiver<Update>) -> Result<Update> {
    tokio::time::timeout(Duration::from_secs(60), updates.recv())
        .await
        .context("no update from the client loop for 60s")?
        .ok_or_else(|| anyhow!("client loop closed its update channel"))
}
