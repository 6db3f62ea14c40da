//! In-memory `Dialer`/`Client` fakes for tests.

use super::{Client, CommandExit, Dialer, HostTarget, RemoteCommand};
use crate::core::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, DuplexStream};

/// A command as seen by the fake remote: stdin and stdout of the command
/// are the two directions of `stream`. Like a real process, anything
/// written to `stderr` is only drained while the caller awaits `wait`.
pub struct Request {
    pub host: String,
    pub command: String,
    pub stream: DuplexStream,
    pub stderr: DuplexStream,
}

pub type Responder = Arc<dyn Fn(Request) -> BoxFuture<'static, CommandExit> + Send + Sync>;

/// Responder for commands that exit 0 without any output.
pub fn succeed() -> Responder {
    Arc::new(|_req: Request| async { CommandExit { status: 0, stderr: String::new() } }.boxed())
}

pub struct FakeClient {
    host: String,
    user: String,
    responder: Responder,
    commands: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl FakeClient {
    pub fn new<F>(host: &str, responder: F) -> Self
    where
        F: Fn(Request) -> BoxFuture<'static, CommandExit> + Send + Sync + 'static,
    {
        Self::with_responder(host, "root", Arc::new(responder))
    }

    pub fn with_responder(host: &str, user: &str, responder: Responder) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            responder,
            commands: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FakeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeClient").field("host", &self.host).finish()
    }
}

#[async_trait]
impl Client for FakeClient {
    fn user(&self) -> &str {
        &self.user
    }

    fn addr(&self) -> String {
        format!("{}:22", self.host)
    }

    async fn start(&self, command: &str) -> Result<RemoteCommand> {
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (stdout, stdin) = tokio::io::split(ours);
        let (mut err_ours, err_theirs) = tokio::io::duplex(4 * 1024);
        let handle = tokio::spawn((self.responder)(Request {
            host: self.host.clone(),
            command: command.to_string(),
            stream: theirs,
            stderr: err_theirs,
        }));
        let wait = async move {
            let mut err = Vec::new();
            let (exit, _) = tokio::join!(handle, err_ours.read_to_end(&mut err));
            let mut exit = exit.map_err(|e| Error::Internal(e.to_string()))?;
            if exit.stderr.is_empty() {
                exit.stderr = String::from_utf8_lossy(&err).into_owned();
            }
            Ok(exit)
        }
        .boxed();
        Ok(RemoteCommand {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            wait,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `FakeClient`s and remembers every one it dialed.
pub struct FakeDialer {
    responder: Responder,
    refuse: Vec<String>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeDialer {
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            responder,
            refuse: Vec::new(),
            clients: Mutex::new(Vec::new()),
        })
    }

    /// A dialer that refuses connections to `hosts`.
    pub fn refusing(responder: Responder, hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responder,
            refuse: hosts.iter().map(|h| h.to_string()).collect(),
            clients: Mutex::new(Vec::new()),
        })
    }

    pub fn clients(&self) -> Vec<Arc<FakeClient>> {
        self.clients.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn dials(&self) -> usize {
        self.clients().len()
    }

    pub fn client(&self, host: &str) -> Option<Arc<FakeClient>> {
        self.clients().into_iter().find(|c| c.host() == host)
    }
}

impl fmt::Debug for FakeDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FakeDialer")
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, target: &HostTarget) -> Result<Arc<dyn Client>> {
        if self.refuse.contains(&target.host) {
            return Err(Error::bad_parameter("connection refused"));
        }
        let user = target.user.as_deref().unwrap_or("root");
        let client = Arc::new(FakeClient::with_responder(&target.host, user, self.responder.clone()));
        if let Ok(mut c) = self.clients.lock() {
            c.push(client.clone());
        }
        Ok(client)
    }
}
