//! The SDK adapter: one logical connection, cached reads, typed operations.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use cordlink_transport::protocol::{
    ChannelsReply, DeafReply, FriendsReply, GuildsReply, LeftReply, LobbyIdReply, LobbyIdsReply,
    MessageEventsReply, MessageIdReply, MessagesReply, MuteReply, PongReply, SentReply,
    StatusReply, UpdatedReply, VoiceConnectReply, VoiceDisconnectReply,
};
use cordlink_transport::{
    Command, SecretString, StartOptions, Transport, TransportError, TransportEvent, decode,
};
use cordlink_types::{
    ChannelId, ConnectionState, Credentials, Friend, Guild, GuildChannel, GuildId, LobbyId,
    LobbyInfo, LobbyRef, Message, MessageEvent, MessageId, OAuthToken, UserId,
    fallback_display_name,
};

use crate::SdkError;
use crate::cache::TtlCache;
use crate::store::LobbyStore;

const TOKEN_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub lobby_ids_ttl: Duration,
    pub friends_ttl: Duration,
    pub channels_ttl: Duration,
    pub sdk_lib_dir: Option<PathBuf>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            lobby_ids_ttl: Duration::from_secs(5),
            friends_ttl: Duration::from_secs(60),
            channels_ttl: Duration::from_secs(300),
            sdk_lib_dir: None,
        }
    }
}

struct Inner {
    state: ConnectionState,
    credentials: Option<Credentials>,
    /// Bumped whenever caches are wiped; a refetch that started under an
    /// older epoch must not repopulate them.
    epoch: u64,
    lobby_ids: TtlCache<Vec<LobbyId>>,
    friends: TtlCache<Vec<Friend>>,
    usernames: HashMap<UserId, String>,
    channels: HashMap<GuildId, TtlCache<Vec<GuildChannel>>>,
}

impl Inner {
    fn new(config: &AdapterConfig) -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            credentials: None,
            epoch: 0,
            lobby_ids: TtlCache::new(config.lobby_ids_ttl),
            friends: TtlCache::new(config.friends_ttl),
            usernames: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    fn clear_caches(&mut self) {
        self.epoch += 1;
        self.lobby_ids.clear();
        self.friends.clear();
        self.usernames.clear();
        self.channels.clear();
    }

    fn caches_empty(&self) -> bool {
        self.lobby_ids.is_empty()
            && self.friends.is_empty()
            && self.usernames.is_empty()
            && self.channels.is_empty()
    }
}

/// Façade over a [`Transport`] enforcing one logical SDK connection.
///
/// State transitions and cache wipes happen under the same lock, so no
/// reader ever observes `Ready` alongside caches from a torn-down session.
pub struct SdkAdapter {
    transport: Arc<dyn Transport>,
    store: Arc<dyn LobbyStore>,
    config: AdapterConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    tokens: broadcast::Sender<OAuthToken>,
    init_gate: tokio::sync::Mutex<()>,
    lobby_ids_gate: tokio::sync::Mutex<()>,
    friends_gate: tokio::sync::Mutex<()>,
    channels_gate: tokio::sync::Mutex<()>,
}

impl SdkAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn LobbyStore>,
        config: AdapterConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        let (tokens, _) = broadcast::channel(TOKEN_CHANNEL_CAPACITY);
        Self {
            transport,
            store,
            inner: Mutex::new(Inner::new(&config)),
            config,
            state_tx,
            tokens,
            init_gate: tokio::sync::Mutex::new(()),
            lobby_ids_gate: tokio::sync::Mutex::new(()),
            friends_gate: tokio::sync::Mutex::new(()),
            channels_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            tracing::info!(from = %inner.state, to = %state, "SDK connection state changed");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// OAuth token material reported by the subprocess.
    #[must_use]
    pub fn subscribe_tokens(&self) -> broadcast::Receiver<OAuthToken> {
        self.tokens.subscribe()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock().state == ConnectionState::Ready && self.transport.is_running()
    }

    #[must_use]
    pub fn caches_are_empty(&self) -> bool {
        self.lock().caches_empty()
    }

    #[must_use]
    pub fn current_lobby(&self) -> Option<LobbyRef> {
        self.store.current()
    }

    fn ensure_ready(&self) -> Result<(), SdkError> {
        let state = self.lock().state;
        if state == ConnectionState::Ready && self.transport.is_running() {
            Ok(())
        } else {
            Err(SdkError::NotReady { state })
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Connect with `credentials`.
    ///
    /// Repeating the call with the same credentials while connecting or
    /// connected shares the existing attempt. Different credentials tear the
    /// current subprocess down first.
    pub async fn initialize(&self, credentials: Credentials) -> Result<(), SdkError> {
        if let Some(outcome) = self.join_existing(&credentials).await {
            return outcome;
        }
        let _gate = self.init_gate.lock().await;
        if let Some(outcome) = self.join_existing(&credentials).await {
            return outcome;
        }

        let was_live = self.lock().state.is_live();
        if was_live || self.transport.is_running() {
            tracing::info!("Tearing down existing SDK connection before initialize");
            self.transport.shutdown().await;
        }

        let epoch = {
            let mut inner = self.lock();
            inner.clear_caches();
            inner.credentials = Some(credentials.clone());
            self.set_state(&mut inner, ConnectionState::Connecting);
            inner.epoch
        };

        let result = self.connect(&credentials).await;

        let superseded = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                true
            } else {
                match &result {
                    Ok(()) => self.set_state(&mut inner, ConnectionState::Ready),
                    Err(_) => {
                        inner.credentials = None;
                        self.set_state(&mut inner, ConnectionState::Error);
                    }
                }
                false
            }
        };

        if superseded {
            // A disconnect raced this attempt; do not leave its subprocess behind.
            self.transport.shutdown().await;
            return Err(SdkError::Superseded);
        }
        match result {
            Ok(()) => Ok(()),
            Err(source) => {
                tracing::warn!("SDK initialize failed: {source}");
                self.transport.shutdown().await;
                Err(SdkError::Initialize { source })
            }
        }
    }

    /// Outcome of an existing attempt with the same credentials, if any.
    async fn join_existing(&self, credentials: &Credentials) -> Option<Result<(), SdkError>> {
        let mut rx = self.state_tx.subscribe();
        {
            let inner = self.lock();
            if inner.credentials.as_ref() != Some(credentials) {
                return None;
            }
            match inner.state {
                ConnectionState::Ready if self.transport.is_running() => return Some(Ok(())),
                ConnectionState::Connecting => {}
                _ => return None,
            }
        }
        let settled = match rx.wait_for(|s| *s != ConnectionState::Connecting).await {
            Ok(state) => *state,
            Err(_) => return Some(Err(SdkError::Superseded)),
        };
        Some(match settled {
            ConnectionState::Ready => Ok(()),
            state => Err(SdkError::NotReady { state }),
        })
    }

    async fn connect(&self, credentials: &Credentials) -> Result<(), TransportError> {
        self.transport
            .start(StartOptions {
                sdk_lib_dir: self.config.sdk_lib_dir.clone(),
            })
            .await?;
        let value = self
            .transport
            .send(Command::Initialize {
                app_id: credentials.app_id().to_string(),
                token: SecretString::new(credentials.token()),
            })
            .await?;
        let reply: StatusReply = decode("initialize", value)?;
        tracing::debug!(status = %reply.status, "SDK initialized");
        Ok(())
    }

    /// Tear down the subprocess and forget everything cached for the session.
    pub async fn disconnect(&self) {
        {
            let mut inner = self.lock();
            inner.clear_caches();
            inner.credentials = None;
            self.set_state(&mut inner, ConnectionState::Disconnected);
        }
        self.transport.shutdown().await;
    }

    /// React to an asynchronous transport notification.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::TokenReceived(token) => {
                tracing::info!("OAuth token received from subprocess");
                let _ = self.tokens.send(token);
            }
            TransportEvent::ConnectionLost { reason } => self.mark_lost(&reason),
            TransportEvent::Exited { code } => {
                self.mark_lost(&format!("subprocess exited with code {code:?}"));
            }
        }
    }

    fn mark_lost(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.state == ConnectionState::Ready {
            tracing::warn!("SDK connection lost: {reason}");
            self.set_state(&mut inner, ConnectionState::Error);
        }
    }

    /// Feed transport events into the adapter until the channel closes.
    pub async fn pump_events(&self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_transport_event(event);
        }
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    async fn call<T: DeserializeOwned>(&self, command: Command) -> Result<T, SdkError> {
        self.ensure_ready()?;
        let name = command.name();
        let value = self
            .transport
            .send(command)
            .await
            .map_err(SdkError::operation(name))?;
        decode(name, value).map_err(SdkError::operation(name))
    }

    /// Read through a TTL slot with single-flight refetch and stale fallback.
    async fn cached<T, S, F, Fut>(
        &self,
        gate: &tokio::sync::Mutex<()>,
        slot: S,
        fetch: F,
    ) -> Result<T, SdkError>
    where
        T: Clone,
        S: Fn(&mut Inner) -> &mut TtlCache<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SdkError>>,
    {
        self.ensure_ready()?;
        if let Some(value) = slot(&mut *self.lock()).fresh(Instant::now()) {
            return Ok(value);
        }

        let _refresh = gate.lock().await;
        let epoch = {
            let mut inner = self.lock();
            if let Some(value) = slot(&mut *inner).fresh(Instant::now()) {
                return Ok(value);
            }
            inner.epoch
        };

        match fetch().await {
            Ok(value) => {
                let mut inner = self.lock();
                if inner.epoch == epoch {
                    slot(&mut *inner).store(value.clone(), Instant::now());
                }
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.lock();
                let stale = if inner.epoch == epoch {
                    slot(&mut *inner).stale()
                } else {
                    None
                };
                match stale {
                    Some(value) => {
                        tracing::warn!("Serving cached value after refetch failure: {err}");
                        Ok(value)
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn invalidate_lobby_ids(&self) {
        self.lock().lobby_ids.invalidate();
    }

    // ------------------------------------------------------------------------
    // Cached reads
    // ------------------------------------------------------------------------

    pub async fn get_lobby_ids(&self) -> Result<Vec<LobbyId>, SdkError> {
        self.cached(
            &self.lobby_ids_gate,
            |inner| &mut inner.lobby_ids,
            || async {
                let reply: LobbyIdsReply = self.call(Command::GetLobbyIds).await?;
                Ok::<_, SdkError>(reply.lobby_ids)
            },
        )
        .await
    }

    /// Bypass the TTL and fetch the active lobby list now.
    async fn refresh_lobby_ids(&self) -> Result<Vec<LobbyId>, SdkError> {
        let _refresh = self.lobby_ids_gate.lock().await;
        let epoch = self.lock().epoch;
        let reply: LobbyIdsReply = self.call(Command::GetLobbyIds).await?;
        let mut inner = self.lock();
        if inner.epoch == epoch {
            inner.lobby_ids.store(reply.lobby_ids.clone(), Instant::now());
        }
        Ok(reply.lobby_ids)
    }

    pub async fn get_friends(&self) -> Result<Vec<Friend>, SdkError> {
        let friends = self
            .cached(
                &self.friends_gate,
                |inner| &mut inner.friends,
                || async {
                    let reply: FriendsReply = self.call(Command::GetRelationships).await?;
                    Ok::<_, SdkError>(reply.friends)
                },
            )
            .await?;
        let mut inner = self.lock();
        if inner.state.is_live() {
            for friend in &friends {
                inner
                    .usernames
                    .insert(friend.id, friend.username.clone());
            }
        }
        Ok(friends)
    }

    pub async fn get_guild_channels(&self, guild_id: GuildId) -> Result<Vec<GuildChannel>, SdkError> {
        let ttl = self.config.channels_ttl;
        self.cached(
            &self.channels_gate,
            |inner| {
                inner
                    .channels
                    .entry(guild_id)
                    .or_insert_with(|| TtlCache::new(ttl))
            },
            || async {
                let reply: ChannelsReply = self.call(Command::GetGuildChannels { guild_id }).await?;
                Ok::<_, SdkError>(reply.channels)
            },
        )
        .await
    }

    /// Username for `user_id` from the friend list, refreshing it on a miss.
    pub async fn resolve_username(&self, user_id: UserId) -> Option<String> {
        if let Some(name) = self.lock().usernames.get(&user_id).cloned() {
            return Some(name);
        }
        match self.get_friends().await {
            Ok(friends) => friends
                .into_iter()
                .find(|friend| friend.id == user_id)
                .map(|friend| friend.username),
            Err(e) => {
                tracing::debug!(%user_id, "Username lookup failed: {e}");
                None
            }
        }
    }

    /// Username, or a truncated id when it cannot be resolved.
    pub async fn display_name(&self, user_id: UserId) -> String {
        match self.resolve_username(user_id).await {
            Some(name) => name,
            None => fallback_display_name(user_id),
        }
    }

    // ------------------------------------------------------------------------
    // Uncached reads
    // ------------------------------------------------------------------------

    pub async fn ping(&self) -> Result<bool, SdkError> {
        let reply: PongReply = self.call(Command::Ping).await?;
        Ok(reply.pong)
    }

    pub async fn get_guilds(&self) -> Result<Vec<Guild>, SdkError> {
        let reply: GuildsReply = self.call(Command::GetGuilds).await?;
        Ok(reply.guilds)
    }

    pub async fn get_lobby(&self, lobby_id: LobbyId) -> Result<LobbyInfo, SdkError> {
        self.call(Command::GetLobby { lobby_id }).await
    }

    pub async fn get_lobby_messages(
        &self,
        lobby_id: LobbyId,
        limit: u32,
    ) -> Result<Vec<Message>, SdkError> {
        let reply: MessagesReply = self.call(Command::GetLobbyMessages { lobby_id, limit }).await?;
        Ok(reply.messages)
    }

    pub async fn get_user_messages(
        &self,
        recipient_id: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, SdkError> {
        let reply: MessagesReply = self
            .call(Command::GetUserMessages {
                recipient_id,
                limit,
            })
            .await?;
        Ok(reply.messages)
    }

    /// Full details for one message. Idempotent.
    pub async fn get_message(&self, message_id: MessageId) -> Result<Message, SdkError> {
        self.call(Command::GetMessage { message_id }).await
    }

    /// Drain the SDK's pending "message created" queue.
    pub async fn drain_message_events(&self) -> Result<Vec<MessageEvent>, SdkError> {
        let reply: MessageEventsReply = self.call(Command::GetMessageEvents).await?;
        Ok(reply.messages)
    }

    pub async fn get_mute_status(&self) -> Result<bool, SdkError> {
        let reply: MuteReply = self.call(Command::GetMuteStatus).await?;
        Ok(reply.muted)
    }

    pub async fn get_deaf_status(&self) -> Result<bool, SdkError> {
        let reply: DeafReply = self.call(Command::GetDeafStatus).await?;
        Ok(reply.deafened)
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a lobby with a fresh secret and record it as the current lobby.
    pub async fn create_lobby(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<LobbyRef, SdkError> {
        let title = title.into();
        let secret = Uuid::new_v4().simple().to_string();
        let reply: LobbyIdReply = self
            .call(Command::CreateLobby {
                secret: secret.clone(),
                title: title.clone(),
                description: description.into(),
            })
            .await?;
        self.invalidate_lobby_ids();
        let lobby = LobbyRef {
            id: reply.lobby_id,
            secret,
            title,
        };
        self.store.set_current(Some(lobby.clone()));
        Ok(lobby)
    }

    /// Join (or create) the lobby identified by `secret`.
    pub async fn join_lobby(&self, secret: impl Into<String>) -> Result<LobbyRef, SdkError> {
        let secret = secret.into();
        let reply: LobbyIdReply = self
            .call(Command::CreateOrJoinLobby {
                secret: secret.clone(),
            })
            .await?;
        self.invalidate_lobby_ids();
        let lobby = LobbyRef {
            id: reply.lobby_id,
            secret,
            title: String::new(),
        };
        self.store.set_current(Some(lobby.clone()));
        Ok(lobby)
    }

    /// Leave `lobby_id`. Returns `false` when the lobby was already gone.
    pub async fn leave_lobby(&self, lobby_id: LobbyId) -> Result<bool, SdkError> {
        let active = self.refresh_lobby_ids().await?;
        if !active.contains(&lobby_id) {
            tracing::info!(%lobby_id, "Lobby not active, treating as already left");
            self.store.clear_if(lobby_id);
            return Ok(false);
        }
        let reply: LeftReply = self.call(Command::LeaveLobby { lobby_id }).await?;
        self.invalidate_lobby_ids();
        self.store.clear_if(lobby_id);
        Ok(reply.left)
    }

    pub async fn send_lobby_message(
        &self,
        lobby_id: LobbyId,
        content: impl Into<String>,
    ) -> Result<bool, SdkError> {
        let reply: SentReply = self
            .call(Command::SendLobbyMessage {
                lobby_id,
                content: content.into(),
            })
            .await?;
        Ok(reply.sent)
    }

    /// Post to a guild channel. Returns whether the SDK confirmed delivery.
    pub async fn send_channel_message(
        &self,
        channel_id: ChannelId,
        content: impl Into<String>,
    ) -> Result<bool, SdkError> {
        let reply: SentReply = self
            .call(Command::SendMessage {
                channel_id,
                content: content.into(),
            })
            .await?;
        Ok(reply.sent)
    }

    pub async fn send_dm(
        &self,
        recipient_id: UserId,
        content: impl Into<String>,
    ) -> Result<MessageId, SdkError> {
        let reply: MessageIdReply = self
            .call(Command::SendDm {
                recipient_id,
                content: content.into(),
            })
            .await?;
        Ok(reply.message_id)
    }

    pub async fn set_mute(&self, mute: bool) -> Result<bool, SdkError> {
        let reply: MuteReply = self.call(Command::SetMute { mute }).await?;
        Ok(reply.muted)
    }

    pub async fn set_deaf(&self, deaf: bool) -> Result<bool, SdkError> {
        let reply: DeafReply = self.call(Command::SetDeaf { deaf }).await?;
        Ok(reply.deafened)
    }

    pub async fn connect_lobby_voice(&self, lobby_id: LobbyId) -> Result<bool, SdkError> {
        let reply: VoiceConnectReply = self.call(Command::ConnectLobbyVoice { lobby_id }).await?;
        if !reply.callback_fired {
            tracing::debug!(%lobby_id, "Voice connect returned before the SDK callback fired");
        }
        Ok(reply.connected)
    }

    pub async fn disconnect_lobby_voice(&self, lobby_id: LobbyId) -> Result<bool, SdkError> {
        let reply: VoiceDisconnectReply =
            self.call(Command::DisconnectLobbyVoice { lobby_id }).await?;
        Ok(reply.disconnected)
    }

    pub async fn set_activity(
        &self,
        details: impl Into<String>,
        state: impl Into<String>,
    ) -> Result<bool, SdkError> {
        let reply: UpdatedReply = self
            .call(Command::SetActivity {
                details: details.into(),
                state: state.into(),
            })
            .await?;
        Ok(reply.updated)
    }
}
