//! Wire protocol: request/response envelopes and the closed command set.
//!
//! Requests go out as `{"id":N,"command":"name","args":{...}}\n` on stdin.
//! Responses come back as `{"id":N,"success":bool,"result":..,"error":".."}\n`
//! on stdout. Every command the adapter may send is a [`Command`] variant;
//! results are decoded into typed structs at this boundary so a malformed
//! vendor reply fails with [`TransportError::Schema`] instead of flowing on.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};

use cordlink_types::{
    ChannelId, Friend, Guild, GuildChannel, GuildId, LobbyId, Message, MessageEvent, MessageId,
    UserId,
};

use crate::error::TransportError;

/// Default history page size for message fetches.
pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;

/// A string that must never appear in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Every command understood by the subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    Initialize {
        app_id: String,
        token: SecretString,
    },
    Disconnect,
    Ping,
    GetGuilds,
    GetGuildChannels {
        guild_id: GuildId,
    },
    GetRelationships,
    SendDm {
        recipient_id: UserId,
        content: String,
    },
    CreateLobby {
        secret: String,
        title: String,
        description: String,
    },
    CreateOrJoinLobby {
        secret: String,
    },
    SendLobbyMessage {
        lobby_id: LobbyId,
        content: String,
    },
    /// Post to a guild channel found through `get_guild_channels`.
    SendMessage {
        channel_id: ChannelId,
        content: String,
    },
    GetLobbyIds,
    GetLobby {
        lobby_id: LobbyId,
    },
    LeaveLobby {
        lobby_id: LobbyId,
    },
    SetMute {
        mute: bool,
    },
    GetMuteStatus,
    SetDeaf {
        deaf: bool,
    },
    GetDeafStatus,
    GetLobbyMessages {
        lobby_id: LobbyId,
        limit: u32,
    },
    GetMessage {
        message_id: MessageId,
    },
    GetMessageEvents,
    GetUserMessages {
        recipient_id: UserId,
        limit: u32,
    },
    ConnectLobbyVoice {
        lobby_id: LobbyId,
    },
    DisconnectLobbyVoice {
        lobby_id: LobbyId,
    },
    SetActivity {
        details: String,
        state: String,
    },
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::GetGuilds => "get_guilds",
            Self::GetGuildChannels { .. } => "get_guild_channels",
            Self::GetRelationships => "get_relationships",
            Self::SendDm { .. } => "send_dm",
            Self::CreateLobby { .. } => "create_lobby",
            Self::CreateOrJoinLobby { .. } => "create_or_join_lobby",
            Self::SendLobbyMessage { .. } => "send_lobby_message",
            Self::SendMessage { .. } => "send_message",
            Self::GetLobbyIds => "get_lobby_ids",
            Self::GetLobby { .. } => "get_lobby",
            Self::LeaveLobby { .. } => "leave_lobby",
            Self::SetMute { .. } => "set_mute",
            Self::GetMuteStatus => "get_mute_status",
            Self::SetDeaf { .. } => "set_deaf",
            Self::GetDeafStatus => "get_deaf_status",
            Self::GetLobbyMessages { .. } => "get_lobby_messages",
            Self::GetMessage { .. } => "get_message",
            Self::GetMessageEvents => "get_message_events",
            Self::GetUserMessages { .. } => "get_user_messages",
            Self::ConnectLobbyVoice { .. } => "connect_lobby_voice",
            Self::DisconnectLobbyVoice { .. } => "disconnect_lobby_voice",
            Self::SetActivity { .. } => "set_activity",
        }
    }

    #[must_use]
    pub const fn timeout_class(&self) -> TimeoutClass {
        match self {
            Self::Initialize { .. } => TimeoutClass::Interactive,
            Self::CreateLobby { .. } | Self::CreateOrJoinLobby { .. } => {
                TimeoutClass::LobbyCreation
            }
            Self::GetMuteStatus
            | Self::GetDeafStatus
            | Self::GetMessageEvents
            | Self::GetLobbyIds
            | Self::Ping => TimeoutClass::StatusQuery,
            _ => TimeoutClass::Default,
        }
    }

    /// High-frequency polling commands whose traffic is logged at trace level.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        matches!(self, Self::GetMessageEvents | Self::Ping)
    }
}

/// Deadline category for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Requires external user approval (OAuth consent).
    Interactive,
    LobbyCreation,
    /// Read-only, idempotent status queries.
    StatusQuery,
    Default,
}

/// Per-class command deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub interactive: Duration,
    pub lobby_creation: Duration,
    pub status_query: Duration,
    pub default: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            interactive: Duration::from_secs(60),
            lobby_creation: Duration::from_secs(20),
            status_query: Duration::from_secs(5),
            default: Duration::from_secs(15),
        }
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Interactive => self.interactive,
            TimeoutClass::LobbyCreation => self.lobby_creation,
            TimeoutClass::StatusQuery => self.status_query,
            TimeoutClass::Default => self.default,
        }
    }

    #[must_use]
    pub fn for_command(&self, command: &Command) -> Duration {
        self.for_class(command.timeout_class())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub command: &'a Command,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    /// Convert into the caller-facing outcome for `command`.
    pub fn into_outcome(self, command: &'static str) -> Result<serde_json::Value, TransportError> {
        if self.success {
            Ok(self.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(TransportError::Command {
                command,
                message: self
                    .error
                    .unwrap_or_else(|| "unknown subprocess error".to_string()),
            })
        }
    }
}

/// Decode a raw command result into its typed shape.
pub fn decode<T: DeserializeOwned>(
    command: &'static str,
    value: serde_json::Value,
) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|source| TransportError::Schema { command, source })
}

// ============================================================================
// Typed results
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PongReply {
    pub pong: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildsReply {
    pub guilds: Vec<Guild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsReply {
    pub channels: Vec<GuildChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendsReply {
    pub friends: Vec<Friend>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageIdReply {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LobbyIdReply {
    pub lobby_id: LobbyId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LobbyIdsReply {
    pub lobby_ids: Vec<LobbyId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentReply {
    pub sent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeftReply {
    pub left: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedReply {
    pub updated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MuteReply {
    pub muted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeafReply {
    pub deafened: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesReply {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEventsReply {
    pub messages: Vec<MessageEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConnectReply {
    pub connected: bool,
    #[serde(default)]
    pub callback_fired: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceDisconnectReply {
    pub disconnected: bool,
}
