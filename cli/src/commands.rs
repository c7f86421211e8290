use anyhow::{Context, Result};
use clap::Subcommand;

use cordlink_config::CordlinkConfig;
use cordlink_delivery::{Delivery, DeliveryChannel, Notification};
use cordlink_sdk::SdkAdapter;
use cordlink_transport::protocol::DEFAULT_MESSAGE_LIMIT;
use cordlink_types::{ChannelId, GuildId, LobbyId, UserId};

use crate::runtime::{self, Runtime};

#[derive(Debug, Subcommand)]
pub(crate) enum Cmd {
    /// Connect and report connection, mute and deafen state.
    Status,
    /// List the lobbies the account is in.
    Lobbies,
    /// Show a lobby's metadata.
    Lobby { lobby_id: LobbyId },
    /// List friends.
    Friends,
    /// List guilds, or the channels of one guild.
    Guilds {
        #[arg(long)]
        channels: Option<GuildId>,
    },
    /// Create a lobby with a fresh secret.
    CreateLobby {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Join (or create) the lobby behind a secret.
    JoinLobby { secret: String },
    LeaveLobby { lobby_id: LobbyId },
    SendLobby { lobby_id: LobbyId, content: String },
    SendDm { user_id: UserId, content: String },
    /// Post to a guild channel (see `guilds --channels`).
    SendChannel {
        channel_id: ChannelId,
        content: String,
    },
    /// Print recent lobby history.
    History {
        lobby_id: LobbyId,
        #[arg(long, default_value_t = DEFAULT_MESSAGE_LIMIT)]
        limit: u32,
    },
    Mute {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    Deafen {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    /// Join or leave lobby voice.
    Voice {
        lobby_id: LobbyId,
        #[arg(long)]
        leave: bool,
    },
    /// Set rich presence.
    Activity { details: String, state: String },
    /// Stream new messages until interrupted.
    Watch {
        /// Relay lobbies to watch in addition to the ones the account is in.
        #[arg(long = "lobby")]
        lobbies: Vec<LobbyId>,
    },
}

pub(crate) async fn run(runtime: &Runtime, config: &CordlinkConfig, cmd: Cmd) -> Result<()> {
    let adapter = runtime.adapter();
    adapter
        .initialize(runtime::credentials(config)?)
        .await
        .context("failed to connect to Discord")?;

    match cmd {
        Cmd::Status => {
            println!("state: {}", adapter.state());
            println!("alive: {}", adapter.ping().await?);
            println!("muted: {}", adapter.get_mute_status().await?);
            println!("deafened: {}", adapter.get_deaf_status().await?);
        }
        Cmd::Lobbies => {
            for lobby_id in adapter.get_lobby_ids().await? {
                println!("{lobby_id}");
            }
        }
        Cmd::Lobby { lobby_id } => {
            let info = adapter.get_lobby(lobby_id).await?;
            println!("{} {}", info.lobby_id, info.title().unwrap_or("(untitled)"));
            for (key, value) in &info.metadata {
                println!("  {key} = {value}");
            }
        }
        Cmd::Friends => {
            for friend in adapter.get_friends().await? {
                println!("{}\t{}", friend.id, friend.username);
            }
        }
        Cmd::Guilds { channels: None } => {
            for guild in adapter.get_guilds().await? {
                println!("{}\t{}", guild.id, guild.name);
            }
        }
        Cmd::Guilds {
            channels: Some(guild_id),
        } => {
            for channel in adapter.get_guild_channels(guild_id).await? {
                println!("{}\t{}\t(type {})", channel.id, channel.name, channel.kind);
            }
        }
        Cmd::CreateLobby { title, description } => {
            let lobby = adapter.create_lobby(title, description).await?;
            println!("created lobby {} (secret {})", lobby.id, lobby.secret);
        }
        Cmd::JoinLobby { secret } => {
            let lobby = adapter.join_lobby(secret).await?;
            println!("joined lobby {}", lobby.id);
        }
        Cmd::LeaveLobby { lobby_id } => {
            if adapter.leave_lobby(lobby_id).await? {
                println!("left lobby {lobby_id}");
            } else {
                println!("lobby {lobby_id} was not active");
            }
        }
        Cmd::SendLobby { lobby_id, content } => {
            let sent = adapter.send_lobby_message(lobby_id, content).await?;
            anyhow::ensure!(sent, "lobby {lobby_id} rejected the message");
        }
        Cmd::SendDm { user_id, content } => {
            let message_id = adapter.send_dm(user_id, content).await?;
            println!("sent {message_id}");
        }
        Cmd::SendChannel {
            channel_id,
            content,
        } => {
            let sent = adapter.send_channel_message(channel_id, content).await?;
            anyhow::ensure!(sent, "channel {channel_id} rejected the message");
        }
        Cmd::History { lobby_id, limit } => {
            for message in adapter.get_lobby_messages(lobby_id, limit).await? {
                let author = adapter.display_name(message.author_id).await;
                println!("[{}] {author}: {}", message.timestamp, message.content);
            }
        }
        Cmd::Mute { on } => println!("muted: {}", adapter.set_mute(on).await?),
        Cmd::Deafen { on } => println!("deafened: {}", adapter.set_deaf(on).await?),
        Cmd::Voice {
            lobby_id,
            leave: false,
        } => println!("connected: {}", adapter.connect_lobby_voice(lobby_id).await?),
        Cmd::Voice {
            lobby_id,
            leave: true,
        } => println!(
            "disconnected: {}",
            adapter.disconnect_lobby_voice(lobby_id).await?
        ),
        Cmd::Activity { details, state } => {
            println!("updated: {}", adapter.set_activity(details, state).await?);
        }
        Cmd::Watch { lobbies } => watch(runtime, config, &adapter, lobbies).await?,
    }
    Ok(())
}

async fn watch(
    runtime: &Runtime,
    config: &CordlinkConfig,
    adapter: &SdkAdapter,
    extra: Vec<LobbyId>,
) -> Result<()> {
    let monitored = runtime.lobbies();
    match adapter.get_lobby_ids().await {
        Ok(ids) => {
            for lobby_id in ids {
                monitored.insert(lobby_id);
            }
        }
        Err(e) => tracing::warn!("Could not list lobbies to monitor: {e}"),
    }
    for lobby_id in extra {
        monitored.insert(lobby_id);
    }

    let relay = runtime::relay_client(config)?;
    let (delivery, mut notifications) = Delivery::spawn(
        &runtime::delivery_config(config),
        runtime.slot(),
        relay,
        monitored,
    );
    let mut tokens = adapter.subscribe_tokens();
    let mut state = adapter.subscribe_state();
    eprintln!("watching for messages; Ctrl-C to stop");

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                println!("{}", render(&notification));
            }
            token = tokens.recv() => {
                if let Ok(token) = token {
                    tracing::info!(expires_in_secs = token.expires_in_secs, "OAuth token refreshed");
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if !current.is_live() {
                    eprintln!("connection {current}; stopping");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    delivery.stop().await;
    Ok(())
}

fn render(notification: &Notification) -> String {
    let origin = match &notification.channel {
        DeliveryChannel::EventQueue => "sdk".to_string(),
        DeliveryChannel::Relay { lobby_id } => format!("lobby {lobby_id}"),
        DeliveryChannel::DirectMessage { user_id } => format!("dm {user_id}"),
    };
    format!(
        "[{origin}] {}: {}",
        notification.author_display, notification.message.content
    )
}

#[cfg(test)]
mod tests {
    use cordlink_types::Message;

    use super::*;

    #[test]
    fn render_names_origin_and_author() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "1", "author_id": "2", "content": "hey", "timestamp": "t"
        }))
        .unwrap();
        let line = render(&Notification {
            message,
            author_display: "ada".to_string(),
            channel: DeliveryChannel::Relay {
                lobby_id: LobbyId::new(9),
            },
        });
        assert_eq!(line, "[lobby 9] ada: hey");
    }
}
