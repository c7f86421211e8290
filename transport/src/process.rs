//! Subprocess lifecycle: spawn, stderr scanning, supervised termination.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{Connection, LOG_TARGET};
use crate::discovery::{Discovered, DiscoveryOptions, discover};
use crate::env::child_env;
use crate::error::TransportError;
use crate::protocol::{Command, TimeoutPolicy};
use crate::token::{contains_marker, parse_token_marker};
use crate::{EventSink, StartOptions, Transport, TransportEvent, TransportFut, UnitFut};

/// Settings for [`SubprocessTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub timeouts: TimeoutPolicy,
    /// How long to wait after SIGTERM before killing.
    pub shutdown_grace: Duration,
}

impl TransportConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            timeouts: TimeoutPolicy::default(),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    /// Locate the subprocess and build a config for it. The SDK library
    /// directory, if one was found, is returned for [`StartOptions`].
    pub fn discover(options: &DiscoveryOptions) -> Result<(Self, Option<PathBuf>), TransportError> {
        let Discovered {
            binary,
            sdk_lib_dir,
        } = discover(options)?;
        Ok((Self::new(binary), sdk_lib_dir))
    }
}

struct Instance {
    connection: Arc<Connection>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    pid: Option<u32>,
}

/// Production [`Transport`]: one child process speaking line-delimited JSON.
pub struct SubprocessTransport {
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    /// Bumped on every start and shutdown. Events from older instances are dropped.
    generation: Arc<AtomicU64>,
    lifecycle: tokio::sync::Mutex<Option<Instance>>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl SubprocessTransport {
    #[must_use]
    pub fn new(config: TransportConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            config,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            lifecycle: tokio::sync::Mutex::new(None),
            connection: Mutex::new(None),
        }
    }

    fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_connection(&self, connection: Option<Arc<Connection>>) {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = connection;
    }

    async fn start_inner(&self, options: StartOptions) -> Result<(), TransportError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(previous) = lifecycle.take() {
            tracing::info!(target: LOG_TARGET, pid = ?previous.pid, "Replacing running subprocess");
            self.stop_instance(previous).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = EventSink::new(self.events.clone(), self.generation.clone(), generation);

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        child_env(std::env::vars_os(), options.sdk_lib_dir.as_deref()).apply(&mut cmd);
        #[cfg(target_os = "linux")]
        set_parent_death_signal(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;
        let pid = child.id();

        let (Some(stdout), Some(stdin), Some(stderr)) =
            (child.stdout.take(), child.stdin.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(TransportError::Io(std::io::Error::other(
                "subprocess stdio was not captured",
            )));
        };

        let connection = Arc::new(Connection::spawn(
            stdout,
            stdin,
            self.config.timeouts,
            sink.clone(),
        ));
        let stderr_task = tokio::spawn(pump_stderr(stderr, sink.clone()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            shutdown_rx,
            self.config.shutdown_grace,
            sink,
        ));

        tracing::info!(
            target: LOG_TARGET,
            pid = ?pid,
            binary = %self.config.binary.display(),
            sdk_lib_dir = ?options.sdk_lib_dir,
            "Subprocess started"
        );

        self.set_connection(Some(connection.clone()));
        *lifecycle = Some(Instance {
            connection,
            shutdown_tx: Some(shutdown_tx),
            supervisor,
            stderr_task,
            pid,
        });
        Ok(())
    }

    async fn shutdown_inner(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(instance) = lifecycle.take() {
            self.stop_instance(instance).await;
        }
    }

    /// Orderly stop: best-effort `disconnect`, close stdin, SIGTERM, bounded
    /// wait, then kill. Outstanding requests are rejected.
    async fn stop_instance(&self, mut instance: Instance) {
        // Silence the old instance before it starts reporting its own demise.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_connection(None);

        let grace = self.config.shutdown_grace;
        if instance.connection.is_open() {
            match tokio::time::timeout(grace, instance.connection.send(&Command::Disconnect)).await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!(target: LOG_TARGET, "disconnect before shutdown failed: {e}"),
                Err(_) => tracing::debug!(target: LOG_TARGET, "disconnect before shutdown timed out"),
            }
        }
        instance.connection.close_input();
        if let Some(tx) = instance.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // The supervisor kills after `grace`; allow a little extra for reaping.
        if tokio::time::timeout(grace * 2 + Duration::from_millis(500), &mut instance.supervisor)
            .await
            .is_err()
        {
            tracing::warn!(target: LOG_TARGET, pid = ?instance.pid, "Subprocess supervisor did not finish");
            instance.supervisor.abort();
        }
        instance.stderr_task.abort();

        let abandoned = instance.connection.abandon_all("subprocess shut down");
        tracing::info!(target: LOG_TARGET, pid = ?instance.pid, abandoned, "Subprocess stopped");
    }
}

impl Transport for SubprocessTransport {
    fn start(&self, options: StartOptions) -> TransportFut<'_, ()> {
        Box::pin(self.start_inner(options))
    }

    fn send(&self, command: Command) -> TransportFut<'_, serde_json::Value> {
        Box::pin(async move {
            let connection = self
                .current_connection()
                .ok_or(TransportError::NotRunning)?;
            connection.send(&command).await
        })
    }

    fn shutdown(&self) -> UnitFut<'_> {
        Box::pin(self.shutdown_inner())
    }

    fn is_running(&self) -> bool {
        self.current_connection()
            .is_some_and(|connection| connection.is_open())
    }
}

async fn supervise(
    mut child: Child,
    shutdown_rx: oneshot::Receiver<()>,
    grace: Duration,
    events: EventSink,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown_rx => terminate(&mut child, grace).await,
    };
    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, pid = ?pid, "Failed to reap subprocess: {e}");
            None
        }
    };
    tracing::info!(target: LOG_TARGET, pid = ?pid, code = ?code, "Subprocess exited");
    events.emit(TransportEvent::Exited { code }).await;
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    send_terminate(child);
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }
    tracing::debug!(target: LOG_TARGET, "Subprocess ignored SIGTERM, killing");
    let _ = child.kill().await;
    child.wait().await
}

fn send_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            unsafe {
                if libc::kill(pid, libc::SIGTERM) == -1 {
                    let _ = child.start_kill();
                }
            }
            return;
        }
    }
    let _ = child.start_kill();
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|sig| 128 + sig))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

/// Ensure the subprocess does not outlive us if we are killed outright.
#[cfg(target_os = "linux")]
fn set_parent_death_signal(cmd: &mut tokio::process::Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// How a stderr line is treated.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StderrLine {
    Token(cordlink_types::OAuthToken),
    MalformedToken,
    Log,
}

pub(crate) fn classify_stderr_line(line: &str) -> StderrLine {
    if contains_marker(line) {
        return match parse_token_marker(line) {
            Some(token) => StderrLine::Token(token),
            None => StderrLine::MalformedToken,
        };
    }
    StderrLine::Log
}

async fn pump_stderr(stderr: ChildStderr, events: EventSink) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match classify_stderr_line(&line) {
                StderrLine::Token(token) => {
                    tracing::info!(target: LOG_TARGET, "<token marker redacted>");
                    events.emit(TransportEvent::TokenReceived(token)).await;
                }
                StderrLine::MalformedToken => {
                    tracing::warn!(target: LOG_TARGET, "<token marker redacted> (unparseable)");
                }
                StderrLine::Log => tracing::debug!(target: LOG_TARGET, "{line}"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, "stderr read error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lines_are_classified() {
        let line = "OAuth_TOKEN_FOR_STORAGE: access=a,refresh=NONE,expires=5,type=1";
        assert!(matches!(classify_stderr_line(line), StderrLine::Token(_)));
        assert_eq!(
            classify_stderr_line("OAuth_TOKEN_FOR_STORAGE: garbage"),
            StderrLine::MalformedToken
        );
    }

    #[test]
    fn other_lines_are_logged_regardless_of_content() {
        for line in [
            "[Rust] Processing command: get_message_events",
            "[Rust] Processing command: create_lobby",
            "",
        ] {
            assert_eq!(classify_stderr_line(line), StderrLine::Log);
        }
    }

    #[tokio::test]
    async fn send_before_start_is_not_running() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = SubprocessTransport::new(TransportConfig::new("/nonexistent"), tx);
        assert!(!transport.is_running());
        assert!(matches!(
            transport.send(Command::Ping).await,
            Err(TransportError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn spawn_failure_names_binary() {
        let (tx, _rx) = mpsc::channel(4);
        let transport =
            SubprocessTransport::new(TransportConfig::new("/nonexistent/discord-subprocess"), tx);
        match transport.start(StartOptions::default()).await {
            Err(TransportError::Spawn { binary, .. }) => {
                assert_eq!(binary, PathBuf::from("/nonexistent/discord-subprocess"));
            }
            other => panic!("expected spawn failure, got {other:?}"),
        }
        assert!(!transport.is_running());
    }

    #[test]
    fn discover_failure_surfaces_as_transport_error() {
        let tmp = tempfile::tempdir().unwrap();
        let options = DiscoveryOptions {
            search_from: Some(tmp.path().to_path_buf()),
            ..DiscoveryOptions::default()
        };
        let err = TransportConfig::discover(&options).unwrap_err();
        assert!(matches!(err, TransportError::Discovery(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn discover_builds_config_for_found_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = tmp.path().join("discord-subprocess");
        std::fs::write(&binary, b"").unwrap();
        let options = DiscoveryOptions {
            explicit_binary: Some(binary.clone()),
            ..DiscoveryOptions::default()
        };
        let (config, sdk_lib_dir) = TransportConfig::discover(&options).unwrap();
        assert_eq!(config.binary, binary);
        assert!(config.args.is_empty());
        assert!(sdk_lib_dir.is_none());
    }

    #[tokio::test]
    async fn shutdown_without_start_is_noop() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = SubprocessTransport::new(TransportConfig::new("/nonexistent"), tx);
        transport.shutdown().await;
        assert!(!transport.is_running());
    }
}
