//! Fake `discord-subprocess` scripts for exercising the real process
//! lifecycle without the vendor SDK.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

use cordlink_transport::{SubprocessTransport, TimeoutPolicy, TransportConfig, TransportEvent};

/// Token line printed to stderr after `initialize`.
pub const TOKEN_LINE: &str =
    "[sdk] OAuth_TOKEN_FOR_STORAGE: access=acc-123,refresh=NONE,expires=3600,type=1";

/// Answers a fixed command set. `get_guilds` never answers,
/// `get_deaf_status` exits with status 3 without replying, and `disconnect`
/// replies and exits 0. Anything else gets a garbage line and a failure.
const SCRIPT: &str = r#"#!/bin/sh
reply() {
    printf '{"id":%s,"success":true,"result":%s}\n' "$1" "$2"
}
while IFS= read -r line; do
    id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
    case "$line" in
        *'"command":"initialize"'*)
            reply "$id" '{"status":"ok"}'
            echo "__TOKEN_LINE__" >&2
            ;;
        *'"command":"ping"'*) reply "$id" '{"pong":true}' ;;
        *'"command":"get_lobby_ids"'*) reply "$id" '{"lobby_ids":["42","43"]}' ;;
        *'"command":"leave_lobby"'*) reply "$id" '{"left":true}' ;;
        *'"command":"get_message_events"'*)
            echo "polling get_message_events" >&2
            reply "$id" '{"messages":[]}'
            ;;
        *'"command":"get_guilds"'*) ;;
        *'"command":"get_deaf_status"'*) exit 3 ;;
        *'"command":"disconnect"'*)
            reply "$id" '{"status":"disconnected"}'
            exit 0
            ;;
        *)
            printf 'not json at all\n'
            printf '{"id":%s,"success":false,"error":"unsupported"}\n' "$id"
            ;;
    esac
done
"#;

/// Write the fake subprocess into `dir` and return its path.
pub fn write_fake_subprocess(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("discord-subprocess");
    std::fs::write(&path, SCRIPT.replace("__TOKEN_LINE__", TOKEN_LINE)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Short timeouts so hang cases finish quickly.
pub fn fast_config(binary: PathBuf) -> TransportConfig {
    let mut config = TransportConfig::new(binary);
    config.timeouts = TimeoutPolicy {
        interactive: Duration::from_secs(5),
        lobby_creation: Duration::from_secs(2),
        status_query: Duration::from_secs(2),
        default: Duration::from_millis(300),
    };
    config.shutdown_grace = Duration::from_millis(300);
    config
}

pub fn transport(binary: PathBuf) -> (SubprocessTransport, mpsc::Receiver<TransportEvent>) {
    let (tx, rx) = mpsc::channel(32);
    (SubprocessTransport::new(fast_config(binary), tx), rx)
}

/// Wait for the first event matching `pred`, failing after five seconds.
pub async fn expect_event(
    events: &mut mpsc::Receiver<TransportEvent>,
    pred: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for transport event")
}
