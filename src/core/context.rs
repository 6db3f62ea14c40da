//! Execution context: lexical variable scopes threaded through evaluation.
//!
//! Contexts are immutable: binding a variable returns a new context whose
//! parent is the old one. Reads fall back to the parent on a miss, writes
//! never reach it. Cloning is cheap, so every parallel branch gets its own.

use super::error::{Error, Result};
use super::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// The program run that owns a tree of contexts.
#[derive(Debug)]
pub struct Process {
    name: String,
    cancel: CancellationToken,
}

impl Process {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask every branch of this process to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Arc<Scope>>,
}

/// Variables, logger span and owning process for one evaluation.
#[derive(Clone)]
pub struct ExecutionContext {
    scope: Arc<Scope>,
    process: Arc<Process>,
    span: Span,
}

impl ExecutionContext {
    pub fn new(process: Arc<Process>) -> Self {
        let span = tracing::info_span!("process", name = %process.name());
        Self {
            scope: Arc::new(Scope {
                vars: HashMap::new(),
                parent: None,
            }),
            process,
            span,
        }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Logger handle; events recorded inside it carry the scope's fields.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Look a variable up, walking outwards through enclosing scopes.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let mut scope = Some(&self.scope);
        while let Some(s) = scope {
            if let Some(v) = s.vars.get(key) {
                return Some(v);
            }
            scope = s.parent.as_ref();
        }
        None
    }

    /// A new context with `key` bound; `self` is left untouched.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_values([(key.into(), value.into())])
    }

    pub fn with_values<I>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            scope: Arc::new(Scope {
                vars: values.into_iter().collect(),
                parent: Some(self.scope.clone()),
            }),
            process: self.process.clone(),
            span: self.span.clone(),
        }
    }

    /// A fresh, empty lexical scope nested in this one.
    pub fn child(&self) -> Self {
        self.with_values([])
    }

    /// Same scope, logging under `span`.
    pub fn with_span(&self, span: Span) -> Self {
        Self {
            scope: self.scope.clone(),
            process: self.process.clone(),
            span,
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.process.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "process {} was cancelled",
                self.process.name()
            )));
        }
        Ok(())
    }

    /// Run `fut` unless the process is cancelled first.
    pub async fn cancellable<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.process.token().cancelled() => Err(Error::Cancelled(what.to_string())),
            res = fut => res,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut scope = Some(&self.scope);
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent.as_ref();
        }
        f.debug_struct("ExecutionContext")
            .field("process", &self.process.name())
            .field("depth", &depth)
            .finish()
    }
}
