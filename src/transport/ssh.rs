//! SSH transport over the `ssh` binary.
//!
//! Dialing starts a persistent control master on a private socket; that
//! master is the live connection. Commands multiplex over it and closing
//! the client tells the master to exit.

use super::local::exec_local;
use super::{Client, CommandExit, Dialer, HostTarget, RemoteCommand};
use crate::core::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Connection defaults shared by every host of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Login user unless the host string names one
    #[serde(default = "default_user")]
    pub user: String,

    /// Port unless the host string names one
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the private key
    #[serde(default)]
    pub identity_file: Option<String>,

    /// Seconds to wait for the TCP connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Jump host, passed as `-J`
    #[serde(default)]
    pub proxy_jump: Option<String>,

    /// Extra `-o` options, e.g. `Compression=yes`
    #[serde(default)]
    pub options: Vec<String>,

    /// The ssh binary to run
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_binary() -> String {
    "ssh".to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            identity_file: None,
            connect_timeout: default_connect_timeout(),
            proxy_jump: None,
            options: Vec::new(),
            binary: default_binary(),
        }
    }
}

impl SshConfig {
    /// Options common to the master and every multiplexed command.
    fn base_args(&self, port: u16) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "BatchMode=yes",
            "-o",
            &format!("ConnectTimeout={}", self.connect_timeout),
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-p",
            &port.to_string(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(ref key) = self.identity_file {
            args.push("-i".to_string());
            args.push(expand_home(key));
        }
        if let Some(ref jump) = self.proxy_jump {
            args.push("-J".to_string());
            args.push(jump.clone());
        }
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }
}

/// Expand a leading `~/` to `$HOME`.
fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

fn control_socket() -> PathBuf {
    let n = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("kiln-{}-{}.sock", std::process::id(), n))
}

/// Dials hosts by starting an ssh control master per host.
#[derive(Debug, Clone, Default)]
pub struct SshDialer {
    pub config: SshConfig,
}

impl SshDialer {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, target: &HostTarget) -> Result<Arc<dyn Client>> {
        let client = SshClient {
            config: self.config.clone(),
            user: target.user.clone().unwrap_or_else(|| self.config.user.clone()),
            host: target.host.clone(),
            port: target.port.unwrap_or(self.config.port),
            socket: control_socket(),
            closed: AtomicBool::new(false),
        };

        let mut args = client.control_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            client.destination(),
            "true".to_string(),
        ]);
        debug!(host = %client.addr(), socket = %client.socket.display(), "starting ssh master");

        let out = exec_local(&self.config.binary, &args).await?;
        out.check("ssh master")?;
        Ok(Arc::new(client))
    }
}

/// A connection multiplexed through an ssh control socket.
#[derive(Debug)]
pub struct SshClient {
    config: SshConfig,
    user: String,
    host: String,
    port: u16,
    socket: PathBuf,
    closed: AtomicBool,
}

impl SshClient {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn control_args(&self) -> Vec<String> {
        let mut args = self.config.base_args(self.port);
        args.push("-o".to_string());
        args.push(format!("ControlPath={}", self.socket.display()));
        args
    }

    fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.control_args();
        args.extend([
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            self.destination(),
            "--".to_string(),
            command.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl Client for SshClient {
    fn user(&self) -> &str {
        &self.user
    }

    fn addr(&self) -> String {
        HostTarget {
            user: None,
            host: self.host.clone(),
            port: Some(self.port),
        }
        .addr(self.port)
    }

    async fn start(&self, command: &str) -> Result<RemoteCommand> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::bad_parameter(format!(
                "connection to {} is closed",
                self.addr()
            )));
        }

        let mut child = Command::new(&self.config.binary)
            .args(self.command_args(command))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn ssh to {}", self.host))?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => return Err(Error::bad_parameter("ssh child is missing a standard stream")),
        };

        // stderr is drained from the start; a full pipe would stall the
        // remote command before it closes stdout.
        let drain = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| stderr_tail(&buf))
        });

        let wait = async move {
            let err = drain
                .await
                .map_err(|e| Error::Internal(format!("stderr reader failed: {}", e)))??;
            let status = child.wait().await?;
            Ok(CommandExit {
                status: status.code().unwrap_or(-1),
                stderr: err,
            })
        }
        .boxed();

        Ok(RemoteCommand {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            wait,
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut args = self.control_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.destination()]);
        let out = exec_local(&self.config.binary, &args).await;
        let _ = std::fs::remove_file(&self.socket);
        debug!(host = %self.addr(), "closed ssh master");
        out?.check("ssh -O exit").map(|_| ())
    }
}

/// The last `STDERR_TAIL` bytes of a command's stderr, as text.
const STDERR_TAIL: usize = 8 * 1024;

fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}
