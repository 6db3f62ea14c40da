//! `ssh.Copy([host,] source, destination)` over scp.

use super::{HostAction, SshPlugin, Target, KEY};
use crate::core::action::Action;
use crate::core::call::{FnCall, FnRef};
use crate::core::context::ExecutionContext;
use crate::core::error::{Error, Result, ResultExt};
use crate::core::expr::{eval_string, expect_string, Expr};
use crate::core::log::LogWriter;
use crate::core::marshal::CodeMarshaler;
use crate::core::value::Value;
use crate::transport::scp::{execute_scp, ScpCommand, ScpConfig};
use crate::transport::Client;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Instrument};

const COPY: FnRef = FnRef::new("ssh.Copy");

/// Copies files between this machine and a remote host.
///
/// Inside a session the connection comes from [`HostAction::bind_client`];
/// with an explicit host it dials its own and closes it afterwards.
#[derive(Debug, Clone)]
pub struct Copy {
    plugin: Arc<SshPlugin>,
    host: Option<Expr>,
    source: Target,
    destination: Target,
    client: Option<Arc<dyn Client>>,
}

impl Copy {
    pub fn new(
        plugin: Arc<SshPlugin>,
        host: Option<Expr>,
        source: Target,
        destination: Target,
    ) -> Result<Self> {
        if source.local && destination.local {
            return Err(Error::bad_parameter("source and destination can't be both local"));
        }
        if !source.local && !destination.local {
            return Err(Error::bad_parameter(
                "source and destination can't be both remote",
            ));
        }
        if let Some(ref h) = host {
            expect_string(h.as_ref())
                .context("expected host to be a string")?;
        }
        Ok(Self {
            plugin,
            host,
            source,
            destination,
            client: None,
        })
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    async fn transfer(
        &self,
        ctx: &ExecutionContext,
        client: &dyn Client,
        source: &str,
        destination: &str,
    ) -> Result<()> {
        let progress = Box::new(LogWriter::new(ctx.span().clone()));
        let mut cmd = if !self.destination.local {
            let recursive = tokio::fs::metadata(source)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            ScpCommand::upload(ScpConfig {
                user: client.user().to_string(),
                remote_location: destination.to_string(),
                targets: vec![PathBuf::from(source)],
                recursive,
                progress,
            })?
        } else {
            ScpCommand::download(ScpConfig {
                user: client.user().to_string(),
                remote_location: source.to_string(),
                targets: vec![PathBuf::from(destination)],
                recursive: true,
                progress,
            })?
        };

        info!(parent: ctx.span(), "Copy: from {} to {}.", source, destination);
        let transfer = execute_scp(client, &mut cmd).instrument(ctx.span().clone());
        ctx.cancellable("ssh.Copy", transfer)
            .await
            .with_context(|| format!("copy {} to {} on {}", source, destination, client.addr()))
    }
}

#[async_trait]
impl Action for Copy {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let source = eval_string(&ctx, self.source.path.as_ref()).await?;
        let destination = eval_string(&ctx, self.destination.path.as_ref()).await?;

        let lease = self
            .plugin
            .acquire(&ctx, "ssh.Copy", self.host.as_ref(), self.client.as_ref())
            .await?;
        let res = self
            .transfer(&ctx, lease.client().as_ref(), &source, &destination)
            .await;
        let released = lease.release().await;
        res?;
        released?;
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

impl HostAction for Copy {
    fn bind_client(&self, client: Arc<dyn Client>) -> Result<Arc<dyn HostAction>> {
        if self.client.is_some() {
            return Err(Error::already_exists("client already set"));
        }
        Ok(Arc::new(Self {
            client: Some(client),
            ..self.clone()
        }))
    }

    fn into_action(self: Arc<Self>) -> Arc<dyn Action> {
        self
    }
}

#[async_trait]
impl CodeMarshaler for Copy {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut call = FnCall::new(COPY, vec![]).in_package(KEY);
        if let Some(ref host) = self.host {
            call = call.arg(Value::Expr(host.clone()));
        }
        call.arg(self.source.to_record())
            .arg(self.destination.to_record())
            .marshal_code(ctx)
            .await
    }
}
