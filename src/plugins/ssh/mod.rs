//! SSH plugin: per-host sessions, remote commands, and file copies.
//!
//! Actions in this module are templates until bound to a live connection
//! with [`HostAction::bind_client`]. Binding returns a new instance and
//! leaves the template reusable for other hosts.

mod copy;
mod exec;
mod session;

pub use copy::Copy;
pub use exec::Exec;
pub use session::{HostSequence, Session};

use crate::core::action::Action;
use crate::core::context::ExecutionContext;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::expr::{eval_string, Expr};
use crate::core::value::{Record, TypeName, Value};
use crate::transport::ssh::{SshConfig, SshDialer};
use crate::transport::{Client, Dialer, HostTarget};
use std::sync::Arc;
use tracing::debug;

/// Package name used in generated code.
pub const KEY: &str = "ssh";

/// The ssh plugin: connection defaults and the dialer that uses them.
#[derive(Debug)]
pub struct SshPlugin {
    config: SshConfig,
    dialer: Arc<dyn Dialer>,
}

impl SshPlugin {
    pub fn new(config: SshConfig) -> Arc<Self> {
        let dialer = Arc::new(SshDialer::new(config.clone()));
        Arc::new(Self { config, dialer })
    }

    pub fn with_dialer(config: SshConfig, dialer: Arc<dyn Dialer>) -> Arc<Self> {
        Arc::new(Self { config, dialer })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Dial `host` (`[user@]host[:port]`).
    pub async fn dial(&self, ctx: &ExecutionContext, host: &str) -> Result<Arc<dyn Client>> {
        let target = HostTarget::parse(host)?;
        let addr = target.addr(self.config.port);
        debug!(parent: ctx.span(), host = %addr, "dialing");
        match ctx.cancellable("dial", self.dialer.dial(&target)).await {
            Ok(client) => Ok(client),
            Err(e) if e.kind() == ErrorKind::Cancelled => Err(e),
            Err(e) => Err(Error::connection_problem(format!("could not connect to {}", addr), e)),
        }
    }

    /// The connection an action should use: its own, dialed for an
    /// explicit host, or the one it was bound to by a session.
    pub(crate) async fn acquire(
        &self,
        ctx: &ExecutionContext,
        what: &str,
        host: Option<&Expr>,
        bound: Option<&Arc<dyn Client>>,
    ) -> Result<Lease> {
        let host = match host {
            Some(expr) => eval_string(ctx, expr.as_ref()).await?,
            None => String::new(),
        };
        if !host.is_empty() {
            return Ok(Lease::Owned(self.dial(ctx, &host).await?));
        }
        match bound {
            Some(client) => Ok(Lease::Bound(client.clone())),
            None => Err(Error::bad_parameter(format!(
                "{} does not have host, it has to be used within ssh.Session",
                what
            ))),
        }
    }
}

/// A connection held for one action run.
pub(crate) enum Lease {
    /// Owned by a session; left open.
    Bound(Arc<dyn Client>),
    /// Dialed for this action; closed on release.
    Owned(Arc<dyn Client>),
}

impl Lease {
    pub(crate) fn client(&self) -> &Arc<dyn Client> {
        match self {
            Lease::Bound(c) | Lease::Owned(c) => c,
        }
    }

    pub(crate) async fn release(self) -> Result<()> {
        match self {
            Lease::Bound(_) => Ok(()),
            Lease::Owned(c) => c.close().await,
        }
    }
}

/// An action that can run inside an [`Session`] on each host.
pub trait HostAction: Action {
    /// A copy of this action bound to `client`. Fails with `AlreadyExists`
    /// if this instance is already bound.
    fn bind_client(&self, client: Arc<dyn Client>) -> Result<Arc<dyn HostAction>>;

    fn into_action(self: Arc<Self>) -> Arc<dyn Action>;
}

/// One side of a copy.
#[derive(Debug, Clone)]
pub struct Target {
    pub local: bool,
    pub path: Expr,
}

impl Target {
    pub fn local(path: Expr) -> Self {
        Self { local: true, path }
    }

    pub fn remote(path: Expr) -> Self {
        Self { local: false, path }
    }

    pub fn to_record(&self) -> Record {
        Record::new(TypeName::new(KEY, "Target"))
            .field("Local", self.local)
            .field("Path", Value::Expr(self.path.clone()))
    }
}
