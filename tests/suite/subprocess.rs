//! Real process lifecycle against the fake subprocess.

use std::time::Instant;

use serde_json::json;

use cordlink_transport::{
    Command, SecretString, StartOptions, Transport, TransportError, TransportEvent,
};

use crate::common::{expect_event, transport, write_fake_subprocess};

fn initialize() -> Command {
    Command::Initialize {
        app_id: "1234".to_string(),
        token: SecretString::new("tok"),
    }
}

#[tokio::test]
async fn round_trip_and_token_marker() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = transport(write_fake_subprocess(dir.path()));

    transport.start(StartOptions::default()).await.unwrap();
    assert!(transport.is_running());
    assert_eq!(
        transport.send(initialize()).await.unwrap(),
        json!({"status": "ok"})
    );

    let event = expect_event(&mut events, |e| matches!(e, TransportEvent::TokenReceived(_))).await;
    let TransportEvent::TokenReceived(token) = event else {
        unreachable!()
    };
    assert_eq!(token.access_token, "acc-123");
    assert_eq!(token.refresh_token, None);
    assert_eq!(token.expires_in_secs, 3600);

    assert_eq!(
        transport.send(Command::GetLobbyIds).await.unwrap(),
        json!({"lobby_ids": ["42", "43"]})
    );
    transport.shutdown().await;
}

#[tokio::test]
async fn garbage_lines_and_failures_do_not_break_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, _events) = transport(write_fake_subprocess(dir.path()));
    transport.start(StartOptions::default()).await.unwrap();

    let err = transport.send(Command::GetMuteStatus).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Command { command: "get_mute_status", ref message } if message == "unsupported"
    ));
    assert_eq!(
        transport.send(Command::Ping).await.unwrap(),
        json!({"pong": true})
    );
    transport.shutdown().await;
}

#[tokio::test]
async fn unanswered_command_times_out_and_transport_survives() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, _events) = transport(write_fake_subprocess(dir.path()));
    transport.start(StartOptions::default()).await.unwrap();

    let started = Instant::now();
    let err = transport.send(Command::GetGuilds).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(err.to_string(), "Command timeout: get_guilds (300ms)");
    assert!(started.elapsed().as_millis() >= 300);

    assert_eq!(
        transport.send(Command::Ping).await.unwrap(),
        json!({"pong": true})
    );
    transport.shutdown().await;
}

#[tokio::test]
async fn crash_rejects_in_flight_and_reports_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = transport(write_fake_subprocess(dir.path()));
    transport.start(StartOptions::default()).await.unwrap();

    let err = transport.send(Command::GetDeafStatus).await.unwrap_err();
    assert!(err.is_connection_lost(), "{err}");

    // The reader and the supervisor race to report.
    let mut lost = false;
    let mut exit_code = None;
    while !lost || exit_code.is_none() {
        match expect_event(&mut events, |_| true).await {
            TransportEvent::ConnectionLost { .. } => lost = true,
            TransportEvent::Exited { code } => exit_code = Some(code),
            TransportEvent::TokenReceived(_) => {}
        }
    }
    assert_eq!(exit_code, Some(Some(3)));

    assert!(!transport.is_running());
    assert!(transport.send(Command::Ping).await.unwrap_err().is_connection_lost());
    transport.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_process_and_rejects_later_sends() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = transport(write_fake_subprocess(dir.path()));
    transport.start(StartOptions::default()).await.unwrap();
    transport.send(Command::Ping).await.unwrap();

    transport.shutdown().await;
    assert!(!transport.is_running());
    assert!(matches!(
        transport.send(Command::Ping).await,
        Err(TransportError::NotRunning)
    ));
    // The stopped instance is silenced: no ConnectionLost or Exited leaks out.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn restart_replaces_the_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, mut events) = transport(write_fake_subprocess(dir.path()));
    transport.start(StartOptions::default()).await.unwrap();
    transport.start(StartOptions::default()).await.unwrap();

    assert!(transport.is_running());
    assert_eq!(
        transport.send(Command::Ping).await.unwrap(),
        json!({"pong": true})
    );
    assert!(events.try_recv().is_err());
    transport.shutdown().await;
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, _events) = transport(dir.path().join("absent"));
    let err = transport.start(StartOptions::default()).await.unwrap_err();
    assert!(matches!(err, TransportError::Spawn { .. }));
    assert!(!transport.is_running());
}
