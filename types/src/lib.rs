//! Domain types shared by every cordlink crate: snowflake ids, connection
//! state, credentials, and the lobby, social and message shapes returned by
//! the subprocess. No IO and no async.

#![allow(clippy::missing_errors_doc)]

mod ids;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub use ids::{
    ChannelId, GuildId, InvalidSnowflake, LobbyId, MessageId, UserId, optional_snowflake,
};

// ============================================================================
// Connection state
// ============================================================================

/// Lifecycle of the single logical SDK connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Connecting,
    Ready,
    Error,
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }

    /// `Connecting` or `Ready`: a connection attempt owns the subprocess.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Application id plus bearer token used to initialize the SDK.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    app_id: String,
    token: String,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            token: token.into(),
        }
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

// Manual Debug impl to prevent leaking tokens in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// OAuth token material reported by the subprocess out of band.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: u64,
    pub token_type: i32,
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &if self.refresh_token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("expires_in_secs", &self.expires_in_secs)
            .field("token_type", &self.token_type)
            .finish()
    }
}

// ============================================================================
// Lobbies
// ============================================================================

/// The "current lobby" record persisted by the host.
///
/// The core reads and writes this record but never owns its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyRef {
    pub id: LobbyId,
    pub secret: String,
    #[serde(default)]
    pub title: String,
}

/// Lobby metadata as returned by `get_lobby`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LobbyInfo {
    pub lobby_id: LobbyId,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LobbyInfo {
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

// ============================================================================
// Social graph
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Friend {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuildChannel {
    pub id: ChannelId,
    pub name: String,
    /// Vendor channel type code.
    #[serde(rename = "type", default)]
    pub kind: i32,
}

// ============================================================================
// Messages
// ============================================================================

/// Full message details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author_id: UserId,
    /// `None` for lobby and DM messages, which the subprocess reports as `0`.
    #[serde(default, deserialize_with = "optional_snowflake")]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    pub timestamp: String,
}

/// A pending "message created" event drained from the SDK queue.
///
/// Carries no content; details must be fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    pub message_id: MessageId,
    #[serde(default, deserialize_with = "opaque_timestamp")]
    pub timestamp: String,
}

/// Timestamps are opaque to the core: the subprocess emits epoch numbers for
/// some payloads and strings for others. Both are kept as text.
pub fn opaque_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Display form for an author whose name could not be resolved.
#[must_use]
pub fn fallback_display_name(id: UserId) -> String {
    const VISIBLE: usize = 8;
    let text = id.to_string();
    if text.len() <= VISIBLE {
        return text;
    }
    format!("{}…", &text[..VISIBLE])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials::new("app1", "super-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("app1"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn oauth_token_debug_redacts_both_tokens() {
        let token = OAuthToken {
            access_token: "acc".to_string(),
            refresh_token: Some("ref".to_string()),
            expires_in_secs: 600,
            token_type: 1,
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("acc\""));
        assert!(!debug.contains("ref\""));
        assert!(debug.contains("600"));
    }

    #[test]
    fn message_accepts_numeric_timestamp() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "id": "10",
            "author_id": "20",
            "channel_id": "30",
            "content": "hi",
            "timestamp": 1_700_000_000_000_u64
        }))
        .unwrap();
        assert_eq!(msg.timestamp, "1700000000000");
        assert_eq!(msg.channel_id, Some(ChannelId::new(30)));
    }

    #[test]
    fn zero_channel_id_does_not_reject_a_message_batch() {
        let messages: Vec<Message> = serde_json::from_value(serde_json::json!([
            {"id": "1", "author_id": "2", "channel_id": "0", "content": "lobby", "timestamp": 1},
            {"id": "3", "author_id": "2", "channel_id": "88", "content": "guild", "timestamp": 2}
        ]))
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].channel_id, None);
        assert_eq!(messages[1].channel_id, Some(ChannelId::new(88)));
    }

    #[test]
    fn message_event_accepts_string_timestamp() {
        let event: MessageEvent = serde_json::from_value(serde_json::json!({
            "message_id": "5",
            "timestamp": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(event.message_id, MessageId::new(5));
        assert_eq!(event.timestamp, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn lobby_info_title_from_metadata() {
        let info: LobbyInfo = serde_json::from_value(serde_json::json!({
            "lobby_id": 42,
            "metadata": { "title": "pairing", "description": "" }
        }))
        .unwrap();
        assert_eq!(info.lobby_id, LobbyId::new(42));
        assert_eq!(info.title(), Some("pairing"));
    }

    #[test]
    fn guild_channel_reads_type_field() {
        let ch: GuildChannel = serde_json::from_value(serde_json::json!({
            "id": "7", "name": "general", "type": 0
        }))
        .unwrap();
        assert_eq!(ch.kind, 0);
        assert_eq!(ch.name, "general");
    }

    #[test]
    fn fallback_display_name_truncates_long_ids() {
        assert_eq!(
            fallback_display_name(UserId::new(123_456_789_012_345_678)),
            "12345678…"
        );
        assert_eq!(fallback_display_name(UserId::new(42)), "42");
    }

    #[test]
    fn connection_state_liveness() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Ready.is_live());
        assert!(!ConnectionState::Error.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
        assert_eq!(ConnectionState::default(), ConnectionState::Uninitialized);
    }
}
