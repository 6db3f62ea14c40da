//! Function-call node: renders `[package.]Name(arg0, arg1, ...)`.
//!
//! Every action regenerates its own source through `FnCall`, so the
//! argument marshaling lives in exactly one place.

use super::context::ExecutionContext;
use super::error::{Error, Result};
use super::expr::Expr;
use super::marshal::{marshal_code, CodeMarshaler};
use super::value::Value;
use async_trait::async_trait;

/// A callable registered for code generation, carrying its canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnRef {
    path: &'static str,
}

/// The canonical string-list constructor.
pub const STRINGS: FnRef = FnRef::new("Strings");
pub const SEQUENCE: FnRef = FnRef::new("Sequence");
pub const PARALLEL: FnRef = FnRef::new("Parallel");
pub const DEFINE: FnRef = FnRef::new("Define");
pub const VAR: FnRef = FnRef::new("Var");
pub const TEMPLATE: FnRef = FnRef::new("Template");

impl FnRef {
    pub const fn new(path: &'static str) -> Self {
        Self { path }
    }

    /// Name as written in source: the last path segment, without the
    /// `-fm` suffix that method values pick up.
    pub fn name(&self) -> &'static str {
        canonical_name(self.path)
    }
}

fn canonical_name(path: &str) -> &str {
    let last = path
        .rsplit(['.', ':', '/'])
        .find(|s| !s.is_empty())
        .unwrap_or(path);
    last.strip_suffix("-fm").unwrap_or(last)
}

/// `package.Name(args...)`.
#[derive(Debug, Clone, Default)]
pub struct FnCall {
    /// Package qualifier; empty or `.` means none.
    pub package: String,
    /// The function; its name is used unless `name` is set.
    pub func: Option<FnRef>,
    /// Explicit function name, overriding `func`.
    pub name: Option<String>,
    pub args: Vec<Value>,
}

impl FnCall {
    pub fn new(func: FnRef, args: Vec<Value>) -> Self {
        Self {
            func: Some(func),
            args,
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: Some(name.into()),
            args,
            ..Self::default()
        }
    }

    pub fn in_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn set_expression_args(&mut self, expressions: &[Expr]) {
        self.args = expressions.iter().cloned().map(Value::Expr).collect();
    }

    fn function_name(&self) -> Result<&str> {
        match (&self.name, &self.func) {
            (Some(n), _) if !n.is_empty() => Ok(n),
            (_, Some(f)) => Ok(f.name()),
            _ => Err(Error::bad_parameter("function call has neither a name nor a function")),
        }
    }
}

#[async_trait]
impl CodeMarshaler for FnCall {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if !self.package.is_empty() && self.package != "." {
            buf.extend_from_slice(self.package.as_bytes());
            buf.push(b'.');
        }
        buf.extend_from_slice(self.function_name()?.as_bytes());
        buf.push(b'(');
        for (i, arg) in self.args.iter().enumerate() {
            if i != 0 {
                buf.extend_from_slice(b", ");
            }
            buf.extend_from_slice(&marshal_code(ctx, arg).await?);
        }
        buf.push(b')');
        Ok(buf)
    }
}
