//! Actions and their composition: `Sequence` and `Parallel`.

use super::call::{FnCall, DEFINE, PARALLEL, SEQUENCE};
use super::context::ExecutionContext;
use super::error::{Error, Result};
use super::expr::Expr;
use super::marshal::CodeMarshaler;
use super::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, Instrument};

/// An executable step that returns the context the next step should see.
///
/// A failing action must not have changed any variable binding visible
/// to its caller.
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext>;

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        None
    }
}

/// An executable step run purely for its side effect.
#[async_trait]
pub trait Effect: Send + Sync + fmt::Debug {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<()>;

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        None
    }
}

/// Adapts an [`Effect`] into an [`Action`] that passes the context through.
#[derive(Debug)]
pub struct EffectAction<E>(pub E);

#[async_trait]
impl<E: Effect> Action for EffectAction<E> {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        self.0.execute(&ctx).await?;
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        self.0.code()
    }
}

/// Binds a variable for every action that follows it in a sequence.
#[derive(Debug, Clone)]
pub struct SetVar {
    pub name: String,
    pub expr: Expr,
}

impl SetVar {
    pub fn new(name: impl Into<String>, expr: Expr) -> Arc<dyn Action> {
        Arc::new(Self {
            name: name.into(),
            expr,
        })
    }
}

#[async_trait]
impl Action for SetVar {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let value = self.expr.eval(&ctx).await?;
        debug!(parent: ctx.span(), var = %self.name, "define");
        Ok(ctx.with_value(self.name.clone(), value))
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for SetVar {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        FnCall::new(DEFINE, vec![])
            .arg(self.name.as_str())
            .arg(Value::Expr(self.expr.clone()))
            .marshal_code(ctx)
            .await
    }
}

/// Runs actions in order, threading the context; stops at the first error.
#[derive(Debug, Clone)]
pub struct Sequence {
    actions: Vec<Arc<dyn Action>>,
}

impl Sequence {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }
}

#[async_trait]
impl Action for Sequence {
    async fn run(&self, mut ctx: ExecutionContext) -> Result<ExecutionContext> {
        for (i, action) in self.actions.iter().enumerate() {
            ctx.check_cancelled()?;
            debug!(parent: ctx.span(), step = i, "sequence step");
            ctx = action.run(ctx).await?;
        }
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Sequence {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let args = self.actions.iter().cloned().map(Value::Action).collect();
        FnCall::new(SEQUENCE, args).marshal_code(ctx).await
    }
}

/// Runs actions concurrently, each in its own child scope.
///
/// Every branch is awaited; if any failed, the first failure to finish
/// is returned. Branch-local bindings are discarded.
#[derive(Debug, Clone)]
pub struct Parallel {
    actions: Vec<Arc<dyn Action>>,
}

impl Parallel {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }
}

#[async_trait]
impl Action for Parallel {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let mut set = JoinSet::new();
        for (i, action) in self.actions.iter().enumerate() {
            let action = action.clone();
            let branch = ctx.child();
            let span = ctx.span().clone();
            set.spawn(async move { (i, action.run(branch).await) }.instrument(span));
        }

        let mut first_err: Option<Error> = None;
        let mut failed = 0;
        while let Some(joined) = set.join_next().await {
            let err = match joined {
                Ok((_, Ok(_))) => continue,
                Ok((i, Err(e))) => {
                    debug!(parent: ctx.span(), branch = i, error = %e, "parallel branch failed");
                    e
                }
                Err(e) if e.is_cancelled() => Error::Cancelled(format!("parallel branch: {}", e)),
                Err(e) => Error::Internal(format!("parallel branch panicked: {}", e)),
            };
            failed += 1;
            first_err.get_or_insert(err);
        }

        match first_err {
            Some(e) => {
                debug!(parent: ctx.span(), failed, total = self.actions.len(), "parallel failed");
                Err(e)
            }
            None => Ok(ctx),
        }
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Parallel {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let args = self.actions.iter().cloned().map(Value::Action).collect();
        FnCall::new(PARALLEL, args).marshal_code(ctx).await
    }
}
