//! Transport contracts for dialing hosts and running commands over a live
//! connection, plus the `ssh`-binary implementation.

pub mod local;
pub mod scp;
pub mod ssh;
#[cfg(test)]
pub mod testing;

use crate::core::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Output from a command that ran to completion.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `Ok(self)` on success, a `Remote` error naming `command` otherwise.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(Error::Remote {
            command: command.to_string(),
            status: self.exit_code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// How a started command finished.
#[derive(Debug, Clone)]
pub struct CommandExit {
    pub status: i32,
    pub stderr: String,
}

impl CommandExit {
    pub fn into_result(self, command: &str) -> Result<()> {
        if self.status == 0 {
            return Ok(());
        }
        Err(Error::Remote {
            command: command.to_string(),
            status: self.status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// A command started on a remote host, with its standard streams.
///
/// `wait` resolves once the command exits; it only does so after `stdin`
/// has been closed for commands that read their input to the end.
pub struct RemoteCommand {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub wait: BoxFuture<'static, Result<CommandExit>>,
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RemoteCommand")
    }
}

/// A live connection to one host.
#[async_trait]
pub trait Client: Send + Sync + fmt::Debug {
    /// Login user on the remote side.
    fn user(&self) -> &str;

    /// `host:port` this client is connected to.
    fn addr(&self) -> String;

    async fn start(&self, command: &str) -> Result<RemoteCommand>;

    /// Release the connection. Must be called exactly once.
    async fn close(&self) -> Result<()>;
}

/// Opens connections.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    async fn dial(&self, target: &HostTarget) -> Result<Arc<dyn Client>>;
}

/// A parsed `[user@]host[:port]` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl HostTarget {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (user, rest) = match s.rsplit_once('@') {
            Some((u, r)) if !u.is_empty() => (Some(u.to_string()), r),
            Some(_) => return Err(Error::bad_parameter(format!("empty user in host {:?}", s))),
            None => (None, s),
        };

        let (host, port) = if let Some(inner) = rest.strip_prefix('[') {
            let (h, tail) = inner
                .split_once(']')
                .ok_or_else(|| Error::bad_parameter(format!("unclosed bracket in host {:?}", s)))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(parse_port(p, s)?),
                None if tail.is_empty() => None,
                None => return Err(Error::bad_parameter(format!("invalid host {:?}", s))),
            };
            (h.to_string(), port)
        } else if rest.matches(':').count() == 1 {
            let (h, p) = rest.split_once(':').unwrap_or((rest, ""));
            (h.to_string(), Some(parse_port(p, s)?))
        } else {
            (rest.to_string(), None)
        };

        if host.is_empty() {
            return Err(Error::bad_parameter(format!("empty host in {:?}", s)));
        }
        Ok(Self { user, host, port })
    }

    /// `host:port` with `default_port` filled in.
    pub fn addr(&self, default_port: u16) -> String {
        let port = self.port.unwrap_or(default_port);
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(u) = &self.user {
            write!(f, "{}@", u)?;
        }
        match self.port {
            Some(p) => write!(f, "{}", self.addr(p)),
            None => write!(f, "{}", self.host),
        }
    }
}

fn parse_port(p: &str, whole: &str) -> Result<u16> {
    p.parse()
        .map_err(|_| Error::bad_parameter(format!("invalid port {:?} in host {:?}", p, whole)))
}
