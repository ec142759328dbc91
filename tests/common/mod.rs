#![allow(dead_code)]

use fhe_quest::config::SEPOLIA_CHAIN_ID;
use fhe_quest::creator::CreatorFlow;
use fhe_quest::encryption::EncryptionGateway;
use fhe_quest::grid::GridState;
use fhe_quest::resolver::ResolverState;
use fhe_quest::sim::{Devnet, DevnetConfig, SimOracle};
use fhe_quest::store::{SessionStore, StoreSnapshot};
use fhe_quest::{Address, AttemptStatus, Command, Coordinate, QuestClient, QuestConfig, Session, Update, Wei};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PRIZE: Wei = Wei(10_000_000_000_000_000);

pub type SimSession = Session<Devnet, SimOracle>;

pub fn owner() -> Address {
    Address::from_bytes([0x0a; 20])
}

pub fn player() -> Address {
    Address::from_bytes([0xb0; 20])
}

pub fn rival() -> Address {
    Address::from_bytes([0xb1; 20])
}

pub fn cell(x: u32, y: u32) -> Coordinate {
    Coordinate::new(x, y).unwrap()
}

pub fn treasure() -> Coordinate {
    cell(7, 3)
}

pub struct World {
    pub config: QuestConfig,
    pub devnet: Arc<Devnet>,
    pub oracle: Arc<SimOracle>,
}

impl World {
    pub fn new(oracle_delay_ms: Option<u64>) -> Self {
        Self::with_devnet(DevnetConfig { oracle_delay_ms, ..DevnetConfig::default() })
    }

    pub fn with_devnet(devnet_config: DevnetConfig) -> Self {
        let config = QuestConfig {
            contract_address: Address::from_bytes([0xc0; 20]),
            ..QuestConfig::default()
        };
        let devnet = Arc::new(Devnet::new(&devnet_config, owner(), config.contract_address.clone()));
        Self { config, devnet, oracle: Arc::new(SimOracle::new()) }
    }

    pub fn session(&self, account: Address) -> SimSession {
        Session::assemble(
            account,
            SEPOLIA_CHAIN_ID,
            self.devnet.clone(),
            EncryptionGateway::new(self.oracle.clone()),
            &self.config,
        )
    }

    /// Creates a game with the treasure at [`treasure`] as the owner.
    pub async fn create_game(&self) {
        let session = self.session(owner());
        let mut creator = CreatorFlow::new();
        creator.encrypt_treasure(&session, treasure()).await.unwrap();
        creator
            .create_game(&session, &mut SessionStore::new(), &mut GridState::new(), PRIZE, 3600)
            .await
            .unwrap();
    }

    /// Spawns a client loop connected as `account`.
    pub async fn connect(&self, account: Address) -> Harness {
        let (commands, command_rx) = mpsc::channel(16);
        let (update_tx, updates) = mpsc::channel(1024);
        let client = QuestClient::new(self.config.clone());
        let handle = tokio::spawn(client.run(command_rx, update_tx));
        let mut harness = Harness { commands, updates, handle };
        harness.send(Command::SwitchSession(self.session(account))).await;
        harness.wait_for(|u| matches!(u, Update::Connected { .. })).await;
        harness.snapshot().await;
        harness
    }
}

pub struct Harness {
    pub commands: mpsc::Sender<Command<Devnet, SimOracle>>,
    pub updates: mpsc::Receiver<Update>,
    pub handle: JoinHandle<()>,
}

impl Harness {
    pub async fn send(&self, command: Command<Devnet, SimOracle>) {
        assert!(self.commands.send(command).await.is_ok(), "client loop is gone");
    }

    pub async fn next(&mut self) -> Update {
        self.updates.recv().await.expect("client loop closed its updates")
    }

    pub async fn wait_for(&mut self, wanted: impl Fn(&Update) -> bool) -> Update {
        loop {
            let update = self.next().await;
            if wanted(&update) {
                return update;
            }
        }
    }

    pub async fn snapshot(&mut self) -> StoreSnapshot {
        match self.wait_for(|u| matches!(u, Update::Snapshot(_))).await {
            Update::Snapshot(snapshot) => snapshot,
            _ => unreachable!(),
        }
    }

    pub async fn failure(&mut self) -> fhe_quest::QuestError {
        match self.wait_for(|u| matches!(u, Update::Failed(_))).await {
            Update::Failed(err) => err,
            _ => unreachable!(),
        }
    }

    pub async fn outcome(&mut self) -> fhe_quest::Outcome {
        match self.wait_for(|u| matches!(u, Update::Resolved(_))).await {
            Update::Resolved(outcome) => outcome,
            _ => unreachable!(),
        }
    }

    /// Selects `cell` and waits until the resolver acknowledges it.
    pub async fn select(&mut self, coordinate: Coordinate) {
        self.send(Command::Select(coordinate)).await;
        self.wait_for(|u| {
            matches!(u, Update::State(ResolverState::Selected(c)) if *c == coordinate)
        })
        .await;
    }

    /// Sends `Start` and waits for the attempt to reach `AwaitingOracle`.
    pub async fn start_awaiting(&mut self) -> tokio::time::Instant {
        self.send(Command::Start).await;
        self.wait_in_flight(AttemptStatus::AwaitingOracle).await;
        tokio::time::Instant::now()
    }

    /// Waits for the attempt to report `status`, failing on any error first.
    pub async fn wait_in_flight(&mut self, status: AttemptStatus) {
        match self
            .wait_for(|u| {
                matches!(u, Update::State(ResolverState::InFlight(s)) if *s == status)
                    || matches!(u, Update::Failed(_))
            })
            .await
        {
            Update::State(_) => {}
            other => panic!("attempt did not reach {status:?}: {other:?}"),
        }
    }

    /// Every update published within `window`.
    pub async fn collect_for(&mut self, window: std::time::Duration) -> Vec<Update> {
        let mut seen = Vec::new();
        let _ = tokio::time::timeout(window, async {
            loop {
                let update = self.next().await;
                seen.push(update);
            }
        })
        .await;
        seen
    }

    /// True if a `Resolved` update shows up within `window`.
    pub async fn resolves_within(&mut self, window: std::time::Duration) -> bool {
        tokio::time::timeout(window, async {
            loop {
                if let Update::Resolved(_) = self.next().await {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }
}
