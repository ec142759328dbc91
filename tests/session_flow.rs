mod common;

use common::*;
use fhe_quest::config::SEPOLIA_CHAIN_ID;
use fhe_quest::creator::{CreatorFlow, CreatorState};
use fhe_quest::encryption::EncryptionGateway;
use fhe_quest::grid::GridState;
use fhe_quest::session::ensure_network;
use fhe_quest::sim::{SimOracle, SimSigner, SimWallet};
use fhe_quest::store::SessionStore;
use fhe_quest::{Command, QuestError, Session, Update};
use std::time::Duration;

#[tokio::test]
async fn open_requires_account_and_target_chain() {
    let world = World::new(None);
    let gateway = EncryptionGateway::new(world.oracle.clone());

    let empty = SimWallet::new(vec![], SEPOLIA_CHAIN_ID);
    let err = Session::open(&empty, world.devnet.clone(), gateway.clone(), &world.config)
        .await
        .err();
    assert_eq!(err, Some(QuestError::NotConnected));

    let mainnet = SimWallet::new(vec![player()], 1);
    let err = Session::open(&mainnet, world.devnet.clone(), gateway.clone(), &world.config)
        .await
        .err();
    assert_eq!(err, Some(QuestError::NetworkMismatch { expected: SEPOLIA_CHAIN_ID, actual: 1 }));

    ensure_network(&mainnet, &world.config).await.unwrap();
    let session = Session::open(&mainnet, world.devnet.clone(), gateway, &world.config)
        .await
        .unwrap();
    assert_eq!(session.account(), &player());
    assert_eq!(session.chain_id(), SEPOLIA_CHAIN_ID);
}

#[tokio::test(start_paused = true)]
async fn switching_accounts_drops_the_pending_attempt() {
    let world = World::new(None);
    world.create_game().await;
    let mut client = world.connect(player()).await;

    client.select(cell(6, 6)).await;
    client.start_awaiting().await;

    client.send(Command::SwitchSession(world.session(rival()))).await;
    match client.wait_for(|u| matches!(u, Update::Connected { .. })).await {
        Update::Connected { account, .. } => assert_eq!(account, rival()),
        _ => unreachable!(),
    }
    client.snapshot().await;

    // The old attempt's deadline passes without touching the new session.
    assert!(!client.resolves_within(Duration::from_secs(15)).await);

    // The contract still has the old decryption queued.
    client.select(cell(1, 1)).await;
    client.send(Command::Start).await;
    assert_eq!(client.failure().await, QuestError::AttemptAlreadyPending);
}

#[tokio::test(start_paused = true)]
async fn commands_without_a_session_are_refused() {
    let world = World::new(None);
    let mut client = world.connect(player()).await;
    client.send(Command::Disconnect).await;
    client.wait_for(|u| matches!(u, Update::Disconnected)).await;

    client.send(Command::Select(cell(0, 0))).await;
    assert_eq!(client.failure().await, QuestError::NotConnected);
    client.send(Command::Refresh).await;
    assert_eq!(client.failure().await, QuestError::NotConnected);
}

#[tokio::test]
async fn every_cell_encrypts_to_prefixed_hex() {
    let world = World::new(None);
    let session = world.session(player());
    for y in 0..10 {
        for x in 0..10 {
            let encrypted = session
                .gateway()
                .encrypt_coordinate(session.contract(), session.account(), cell(x, y))
                .await
                .unwrap();
            for value in [&encrypted.x, &encrypted.y] {
                let handle = value.handle.to_hex();
                let proof = value.proof.to_hex();
                assert!(handle.starts_with("0x") && proof.starts_with("0x"));
                assert_eq!(handle.len(), 2 + 64);
                assert_eq!(proof.len() % 2, 0);
                assert!(handle[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            }
        }
    }
}

#[tokio::test]
async fn uninitialized_oracle_blocks_encryption() {
    let world = World::new(None);
    let session = Session::assemble(
        player(),
        SEPOLIA_CHAIN_ID,
        world.devnet.clone(),
        EncryptionGateway::<SimOracle>::uninitialized(),
        &world.config,
    );
    let err = session
        .gateway()
        .encrypt_coordinate(session.contract(), session.account(), cell(0, 0))
        .await
        .unwrap_err();
    assert_eq!(err, QuestError::EncryptionUnavailable);
}

#[tokio::test(start_paused = true)]
async fn creator_flow_requires_encrypted_coordinates() {
    let world = World::new(None);
    let session = world.session(owner());
    let mut store = SessionStore::new();
    let mut grid = GridState::new();
    let mut creator = CreatorFlow::new();

    let err = creator
        .create_game(&session, &mut store, &mut grid, PRIZE, 3600)
        .await
        .unwrap_err();
    assert_eq!(err, QuestError::MissingEncryptedCoordinates);
    assert_eq!(creator.state(), CreatorState::Idle);

    creator.encrypt_treasure(&session, treasure()).await.unwrap();
    assert_eq!(creator.state(), CreatorState::CoordinatesEncrypted);
    let receipt = creator.create_game(&session, &mut store, &mut grid, PRIZE, 3600).await.unwrap();
    assert!(receipt.is_success());
    assert_eq!(creator.state(), CreatorState::GameCreated);
    assert!(store.is_active());
    assert!(store.is_creator());
    assert_eq!(store.game().map(|g| g.treasure_amount), Some(PRIZE));
}

#[tokio::test(start_paused = true)]
async fn only_the_owner_can_create() {
    let world = World::new(None);
    let session = world.session(player());
    let mut creator = CreatorFlow::new();
    creator.encrypt_treasure(&session, treasure()).await.unwrap();
    let err = creator
        .create_game(&session, &mut SessionStore::new(), &mut GridState::new(), PRIZE, 3600)
        .await
        .unwrap_err();
    assert_eq!(err, QuestError::TransactionReverted("only owner can create games".into()));
    // Ciphertexts survive a failed creation.
    assert_eq!(creator.state(), CreatorState::CoordinatesEncrypted);
}

#[tokio::test]
async fn players_can_decrypt_only_their_own_inputs() {
    let world = World::new(None);
    let session = world.session(player());
    let encrypted = session
        .gateway()
        .encrypt(session.contract(), session.account(), 6)
        .await
        .unwrap();

    let clear = session
        .gateway()
        .user_decrypt(session.contract(), &encrypted.handle, &SimSigner::new(player()), 1_700_000_000)
        .await
        .unwrap();
    assert_eq!(clear, 6);

    let err = session
        .gateway()
        .user_decrypt(session.contract(), &encrypted.handle, &SimSigner::new(rival()), 1_700_000_000)
        .await
        .unwrap_err();
    assert!(matches!(err, QuestError::EncryptionFailure(_)));

    let public = session.gateway().public_decrypt(&[encrypted.handle.clone()]).await.unwrap();
    assert_eq!(public.get(&encrypted.handle), Some(&6));
}
