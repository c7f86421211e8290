//! Scripted in-memory [`Transport`] for exercising the adapter without a
//! subprocess.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};

use cordlink_transport::{Command, StartOptions, Transport, TransportError, TransportFut, UnitFut};

/// Canned outcome for one command.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Fail(String),
    /// Never answers; the caller's own deadline decides.
    Hang,
}

#[derive(Default)]
struct Script {
    running: bool,
    starts: usize,
    shutdowns: usize,
    fail_start: bool,
    sent: Vec<Command>,
    once: HashMap<&'static str, VecDeque<Reply>>,
    always: HashMap<&'static str, Reply>,
    delays: HashMap<&'static str, Duration>,
}

pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// `initialize` and `disconnect` succeed by default; anything else
    /// unscripted fails.
    #[must_use]
    pub fn new() -> Self {
        let transport = Self {
            script: Mutex::new(Script::default()),
        };
        transport.respond("initialize", json!({"status": "ok"}));
        transport.respond("disconnect", json!({"status": "disconnected"}));
        transport
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, command: &'static str, result: Value) {
        self.script().always.insert(command, Reply::Ok(result));
    }

    pub fn fail(&self, command: &'static str, message: &str) {
        self.script()
            .always
            .insert(command, Reply::Fail(message.to_string()));
    }

    /// Queue a reply consumed before the standing one.
    pub fn respond_once(&self, command: &'static str, reply: Reply) {
        self.script()
            .once
            .entry(command)
            .or_default()
            .push_back(reply);
    }

    pub fn delay(&self, command: &'static str, latency: Duration) {
        self.script().delays.insert(command, latency);
    }

    pub fn fail_next_start(&self) {
        self.script().fail_start = true;
    }

    /// Simulate the subprocess dying underneath the adapter.
    pub fn crash(&self) {
        self.script().running = false;
    }

    #[must_use]
    pub fn starts(&self) -> usize {
        self.script().starts
    }

    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.script().shutdowns
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Command> {
        self.script().sent.clone()
    }

    #[must_use]
    pub fn count(&self, command: &str) -> usize {
        self.script()
            .sent
            .iter()
            .filter(|sent| sent.name() == command)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, _options: StartOptions) -> TransportFut<'_, ()> {
        Box::pin(async move {
            let mut script = self.script();
            script.starts += 1;
            if std::mem::take(&mut script.fail_start) {
                return Err(TransportError::Spawn {
                    binary: "scripted".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            script.running = true;
            Ok(())
        })
    }

    fn send(&self, command: Command) -> TransportFut<'_, Value> {
        Box::pin(async move {
            let name = command.name();
            let (reply, delay) = {
                let mut script = self.script();
                if !script.running {
                    return Err(TransportError::NotRunning);
                }
                script.sent.push(command);
                let queued = script.once.get_mut(name).and_then(VecDeque::pop_front);
                let reply = queued
                    .or_else(|| script.always.get(name).cloned())
                    .unwrap_or_else(|| Reply::Fail(format!("unscripted command {name}")));
                (reply, script.delays.get(name).copied())
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match reply {
                Reply::Ok(value) => Ok(value),
                Reply::Fail(message) => Err(TransportError::Command {
                    command: name,
                    message,
                }),
                Reply::Hang => std::future::pending().await,
            }
        })
    }

    fn shutdown(&self) -> UnitFut<'_> {
        Box::pin(async move {
            let mut script = self.script();
            if script.running {
                script.shutdowns += 1;
            }
            script.running = false;
        })
    }

    fn is_running(&self) -> bool {
        self.script().running
    }
}
