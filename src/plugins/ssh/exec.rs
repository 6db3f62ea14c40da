//! `ssh.Command([host,] command)`: run a shell command on a host.

use super::{HostAction, SshPlugin, KEY};
use crate::core::action::Action;
use crate::core::call::{FnCall, FnRef};
use crate::core::context::ExecutionContext;
use crate::core::error::{Error, Result, ResultExt};
use crate::core::expr::{eval_string, expect_string, Expr};
use crate::core::log::LogWriter;
use crate::core::marshal::CodeMarshaler;
use crate::core::value::Value;
use crate::transport::{Client, RemoteCommand};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

const COMMAND: FnRef = FnRef::new("ssh.Command");

/// Runs a command remotely; its output goes to the log, a non-zero exit
/// fails the action.
#[derive(Debug, Clone)]
pub struct Exec {
    plugin: Arc<SshPlugin>,
    host: Option<Expr>,
    command: Expr,
    client: Option<Arc<dyn Client>>,
}

impl Exec {
    pub fn new(plugin: Arc<SshPlugin>, host: Option<Expr>, command: Expr) -> Result<Self> {
        if let Some(ref h) = host {
            expect_string(h.as_ref()).context("expected host to be a string")?;
        }
        expect_string(command.as_ref()).context("expected command to be a string")?;
        Ok(Self {
            plugin,
            host,
            command,
            client: None,
        })
    }

    async fn execute(&self, ctx: &ExecutionContext, client: &dyn Client, command: &str) -> Result<()> {
        info!(parent: ctx.span(), host = %client.addr(), "Command: {}", command);
        let RemoteCommand { mut stdin, mut stdout, wait } = client.start(command).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let pump = async {
            let mut log = LogWriter::new(ctx.span().clone());
            let mut buf = [0u8; 4096];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                log.write_all(&buf[..n])?;
            }
            log.flush()?;
            Ok::<_, Error>(())
        };
        let ((), exit) = tokio::try_join!(pump, wait)?;
        exit.into_result(command)
    }
}

#[async_trait]
impl Action for Exec {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let command = eval_string(&ctx, self.command.as_ref()).await?;
        if command.trim().is_empty() {
            return Err(Error::bad_parameter("ssh.Command needs a command"));
        }
        let lease = self
            .plugin
            .acquire(&ctx, "ssh.Command", self.host.as_ref(), self.client.as_ref())
            .await?;
        let client = lease.client().clone();
        let res = ctx
            .cancellable("ssh.Command", self.execute(&ctx, client.as_ref(), &command))
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

impl HostAction for Exec {
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
impl CodeMarshaler for Exec {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut call = FnCall::new(COMMAND, vec![]).in_package(KEY);
        if let Some(ref host) = self.host {
            call = call.arg(Value::Expr(host.clone()));
        }
        call.arg(Value::Expr(self.command.clone()))
            .marshal_code(ctx)
            .await
    }
}
