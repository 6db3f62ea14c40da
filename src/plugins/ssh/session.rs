//! Host fan-out: `ssh.Session(hosts, actions...)`.

use super::{HostAction, SshPlugin, KEY};
use crate::core::action::{Action, Parallel, Sequence};
use crate::core::call::{FnCall, FnRef};
use crate::core::context::ExecutionContext;
use crate::core::error::{Error, Result, ResultExt};
use crate::core::expr::{eval_strings, Expr};
use crate::core::marshal::CodeMarshaler;
use crate::core::value::Value;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info_span};

const SESSION: FnRef = FnRef::new("ssh.Session");
const HOST_SEQUENCE: FnRef = FnRef::new("ssh.HostSequence");

/// Runs the same template actions on every host, hosts in parallel and
/// actions in sequence on each host.
#[derive(Debug, Clone)]
pub struct Session {
    plugin: Arc<SshPlugin>,
    hosts: Expr,
    actions: Vec<Arc<dyn HostAction>>,
}

impl Session {
    pub fn new(plugin: Arc<SshPlugin>, hosts: Expr, actions: Vec<Arc<dyn HostAction>>) -> Self {
        Self {
            plugin,
            hosts,
            actions,
        }
    }

    /// One bound-on-run sequence per host.
    pub fn host_sequences(&self, hosts: Vec<String>) -> Vec<HostSequence> {
        hosts
            .into_iter()
            .map(|host| HostSequence {
                plugin: self.plugin.clone(),
                host,
                actions: self.actions.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Action for Session {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let hosts = eval_strings(&ctx, self.hosts.as_ref()).await?;
        if hosts.is_empty() {
            return Err(Error::bad_parameter("ssh.Session needs at least one host"));
        }
        debug!(parent: ctx.span(), hosts = hosts.len(), "session");
        let branches = self
            .host_sequences(hosts)
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn Action>)
            .collect();
        Parallel::new(branches).run(ctx.child()).await?;
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Session {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut args = Vec::with_capacity(self.actions.len() + 1);
        args.push(Value::Expr(self.hosts.clone()));
        args.extend(self.actions.iter().map(|a| Value::Action(a.clone().into_action())));
        FnCall::new(SESSION, args).in_package(KEY).marshal_code(ctx).await
    }
}

/// The actions of a session on one host, over one connection.
#[derive(Debug, Clone)]
pub struct HostSequence {
    plugin: Arc<SshPlugin>,
    host: String,
    actions: Vec<Arc<dyn HostAction>>,
}

impl HostSequence {
    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl Action for HostSequence {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let span = info_span!(parent: ctx.span(), "host", host = %self.host);
        let host_ctx = ctx.with_span(span);
        let client = self.plugin.dial(&host_ctx, &self.host).await?;

        let bound: Result<Vec<Arc<dyn Action>>> = self
            .actions
            .iter()
            .map(|a| a.bind_client(client.clone()).map(|b| b.into_action()))
            .collect();
        let res = match bound {
            Ok(actions) => Sequence::new(actions).run(host_ctx).await.map(|_| ()),
            Err(e) => Err(e),
        };

        let closed = client.close().await;
        debug!(parent: ctx.span(), host = %self.host, ok = res.is_ok(), "host sequence done");
        res?;
        closed.with_context(|| format!("closing connection to {}", self.host))?;
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for HostSequence {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut call = FnCall::new(HOST_SEQUENCE, vec![]).in_package(KEY).arg(self.host.as_str());
        call.args
            .extend(self.actions.iter().map(|a| Value::Action(a.clone().into_action())));
        call.marshal_code(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Copy, Exec, Target};
    use super::*;
    use crate::core::context::Process;
    use crate::core::error::ErrorKind;
    use crate::core::expr::{Literal, StringsExpr};
    use crate::core::marshal::marshal_code;
    use crate::transport::ssh::SshConfig;
    use crate::transport::testing::{succeed, FakeDialer, Request, Responder};
    use crate::transport::CommandExit;
    use futures::FutureExt;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Process::new("test"))
    }

    /// Commands exit 1 on `bad_host`, 0 elsewhere.
    fn fail_on(bad_host: &'static str) -> Responder {
        Arc::new(move |req: Request| {
            async move {
                drop(req.stream);
                let status = if req.host == bad_host { 1 } else { 0 };
                CommandExit { status, stderr: String::new() }
            }
            .boxed()
        })
    }

    fn exec(plugin: &Arc<SshPlugin>, cmd: &str) -> Arc<dyn HostAction> {
        Arc::new(Exec::new(plugin.clone(), None, Literal::string(cmd)).unwrap())
    }

    #[tokio::test]
    async fn test_session_dials_and_closes_each_host_once() {
        let dialer = FakeDialer::new(succeed());
        let plugin = SshPlugin::with_dialer(SshConfig::default(), dialer.clone());
        let session = Session::new(
            plugin.clone(),
            StringsExpr::literal(["h1", "h2"]),
            vec![exec(&plugin, "uptime")],
        );
        session.run(ctx()).await.unwrap();

        assert_eq!(dialer.dials(), 2);
        for host in ["h1", "h2"] {
            let client = dialer.client(host).unwrap();
            assert_eq!(client.closes(), 1);
            assert_eq!(client.commands(), vec!["uptime".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_session_closes_connection_when_host_fails() {
        let dialer = FakeDialer::new(fail_on("h2"));
        let plugin = SshPlugin::with_dialer(SshConfig::default(), dialer.clone());
        let session = Session::new(
            plugin.clone(),
            StringsExpr::literal(["h1", "h2"]),
            vec![exec(&plugin, "systemctl restart app"), exec(&plugin, "true")],
        );
        let err = session.run(ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);

        let h1 = dialer.client("h1").unwrap();
        let h2 = dialer.client("h2").unwrap();
        assert_eq!(h1.closes(), 1);
        assert_eq!(h2.closes(), 1);
        assert_eq!(h1.commands().len(), 2);
        // fail-fast within the host
        assert_eq!(h2.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_session_needs_hosts() {
        let plugin = SshPlugin::with_dialer(SshConfig::default(), FakeDialer::new(succeed()));
        let session = Session::new(
            plugin.clone(),
            StringsExpr::literal(Vec::<String>::new()),
            vec![exec(&plugin, "true")],
        );
        let err = session.run(ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "ssh.Session needs at least one host");
    }

    #[tokio::test]
    async fn test_session_unreachable_host() {
        let dialer = FakeDialer::refusing(succeed(), &["h2"]);
        let plugin = SshPlugin::with_dialer(SshConfig::default(), dialer.clone());
        let session = Session::new(
            plugin.clone(),
            StringsExpr::literal(["h1", "h2"]),
            vec![exec(&plugin, "true")],
        );
        let err = session.run(ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionProblem);
        assert_eq!(dialer.client("h1").unwrap().closes(), 1);
    }

    #[tokio::test]
    async fn test_host_sequence_fails_on_prebound_template() {
        let dialer = FakeDialer::new(succeed());
        let plugin = SshPlugin::with_dialer(SshConfig::default(), dialer.clone());
        let client = plugin.dial(&ctx(), "h0").await.unwrap();
        let bound = exec(&plugin, "true").bind_client(client).unwrap();

        let session = Session::new(plugin, StringsExpr::literal(["h1"]), vec![bound]);
        let err = session.run(ctx()).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(dialer.client("h1").unwrap().closes(), 1);
    }

    #[tokio::test]
    async fn test_session_code() {
        let plugin = SshPlugin::with_dialer(SshConfig::default(), FakeDialer::new(succeed()));
        let copy = Copy::new(
            plugin.clone(),
            None,
            Target::local(Literal::string("app.tar")),
            Target::remote(Literal::string("/tmp/app.tar")),
        )
        .unwrap();
        let session = Session::new(
            plugin.clone(),
            StringsExpr::literal(["h1", "h2"]),
            vec![Arc::new(copy), exec(&plugin, "tar xf /tmp/app.tar")],
        );
        let code = marshal_code(&ctx(), &Value::Action(Arc::new(session.clone())))
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(code).unwrap(),
            concat!(
                r#"ssh.Session(Strings("h1", "h2"), "#,
                r#"ssh.Copy(ssh.Target{Local:true,Path:"app.tar"}, ssh.Target{Local:false,Path:"/tmp/app.tar"}), "#,
                r#"ssh.Command("tar xf /tmp/app.tar"))"#
            )
        );

        let seq = session.host_sequences(vec!["h1".to_string()]).remove(0);
        assert_eq!(seq.host(), "h1");
        let code = marshal_code(&ctx(), &Value::Action(Arc::new(seq))).await.unwrap();
        assert!(String::from_utf8(code)
            .unwrap()
            .starts_with(r#"ssh.HostSequence("h1", ssh.Copy("#));
    }
}
