//! `SdkAdapter` driving the real subprocess transport.

use std::sync::Arc;
use std::time::Duration;

use cordlink_sdk::{AdapterConfig, MemoryLobbyStore, SdkAdapter};
use cordlink_types::{ConnectionState, Credentials, LobbyId};

use crate::common::{transport, write_fake_subprocess};

fn adapter_over(dir: &std::path::Path) -> Arc<SdkAdapter> {
    let (transport, events) = transport(write_fake_subprocess(dir));
    let adapter = Arc::new(SdkAdapter::new(
        Arc::new(transport),
        Arc::new(MemoryLobbyStore::default()),
        AdapterConfig::default(),
    ));
    tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.pump_events(events).await }
    });
    adapter
}

#[tokio::test]
async fn initialize_forwards_token_and_serves_lobbies() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter_over(dir.path());
    let mut tokens = adapter.subscribe_tokens();

    adapter
        .initialize(Credentials::new("1234", "tok"))
        .await
        .unwrap();
    assert_eq!(adapter.state(), ConnectionState::Ready);

    let token = tokio::time::timeout(Duration::from_secs(5), tokens.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token.access_token, "acc-123");

    assert_eq!(
        adapter.get_lobby_ids().await.unwrap(),
        vec![LobbyId::new(42), LobbyId::new(43)]
    );
    assert!(!adapter.leave_lobby(LobbyId::new(99)).await.unwrap());
    assert!(adapter.leave_lobby(LobbyId::new(42)).await.unwrap());
    assert!(adapter.drain_message_events().await.unwrap().is_empty());

    adapter.disconnect().await;
    assert_eq!(adapter.state(), ConnectionState::Disconnected);
    assert!(adapter.caches_are_empty());
}

#[tokio::test]
async fn subprocess_crash_moves_adapter_to_error_and_reinit_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter_over(dir.path());
    adapter
        .initialize(Credentials::new("1234", "tok"))
        .await
        .unwrap();
    let mut state = adapter.subscribe_state();

    assert!(adapter.get_deaf_status().await.is_err());
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Error),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!adapter.is_ready());

    adapter
        .initialize(Credentials::new("1234", "tok"))
        .await
        .unwrap();
    assert!(adapter.is_ready());
    assert!(adapter.ping().await.unwrap());
    adapter.disconnect().await;
}
