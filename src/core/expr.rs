//! Expressions: typed, side-effect-free computations over a context.

use super::call::{FnCall, STRINGS, TEMPLATE, VAR};
use super::context::ExecutionContext;
use super::error::{Error, Result};
use super::marshal::CodeMarshaler;
use super::value::{Value, ValueType};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A computation with a declared result type.
///
/// Evaluating the same expression twice against the same context must
/// give the same answer.
#[async_trait]
pub trait Expression: Send + Sync + fmt::Debug {
    fn value_type(&self) -> ValueType;

    async fn eval(&self, ctx: &ExecutionContext) -> Result<Value>;

    /// Self-describing serialization, when the expression has one.
    fn code(&self) -> Option<&dyn CodeMarshaler> {
        None
    }
}

pub type Expr = Arc<dyn Expression>;

/// Fail unless `expr` is declared to produce a string.
pub fn expect_string(expr: &dyn Expression) -> Result<()> {
    match expr.value_type() {
        ValueType::String | ValueType::Any => Ok(()),
        other => Err(Error::bad_parameter(format!(
            "expected string expression, got {}",
            other
        ))),
    }
}

pub async fn eval_string(ctx: &ExecutionContext, expr: &dyn Expression) -> Result<String> {
    match expr.eval(ctx).await? {
        Value::Str(s) => Ok(s),
        other => Err(Error::bad_parameter(format!(
            "expected string, got {}",
            other.type_name()
        ))),
    }
}

pub async fn eval_strings(ctx: &ExecutionContext, expr: &dyn Expression) -> Result<Vec<String>> {
    match expr.eval(ctx).await? {
        Value::Strings(v) => Ok(v),
        Value::Str(s) => Ok(vec![s]),
        other => Err(Error::bad_parameter(format!(
            "expected []string, got {}",
            other.type_name()
        ))),
    }
}

/// A constant.
#[derive(Debug, Clone)]
pub struct Literal(pub Value);

impl Literal {
    pub fn string(s: impl Into<String>) -> Expr {
        Arc::new(Self(Value::Str(s.into())))
    }
}

#[async_trait]
impl Expression for Literal {
    fn value_type(&self) -> ValueType {
        match &self.0 {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Str(_) => ValueType::String,
            Value::Strings(_) => ValueType::Strings,
            Value::List(_) => ValueType::List,
            Value::Record(r) => ValueType::Record(r.code_type()),
            Value::Action(_) => ValueType::Action,
            Value::Expr(e) => e.value_type(),
            _ => ValueType::Any,
        }
    }

    async fn eval(&self, _ctx: &ExecutionContext) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// Reads a variable from the context.
#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub ty: ValueType,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Expr {
        Arc::new(Self {
            name: name.into(),
            ty,
        })
    }
}

#[async_trait]
impl Expression for Var {
    fn value_type(&self) -> ValueType {
        self.ty.clone()
    }

    async fn eval(&self, ctx: &ExecutionContext) -> Result<Value> {
        ctx.value(&self.name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("variable {} is not defined", self.name)))
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

/// `Var("name")`: the reference, not its current value.
#[async_trait]
impl CodeMarshaler for Var {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        FnCall::new(VAR, vec![]).arg(self.name.as_str()).marshal_code(ctx).await
    }
}

/// A string with `{{vars.NAME}}` placeholders filled from the context.
#[derive(Debug, Clone)]
pub struct Template {
    pub source: String,
}

impl Template {
    /// Plain strings become literals; only strings with placeholders
    /// need evaluation.
    pub fn parse(source: &str) -> Expr {
        if source.contains("{{") {
            Arc::new(Self {
                source: source.to_string(),
            })
        } else {
            Literal::string(source)
        }
    }

    fn resolve(&self, ctx: &ExecutionContext) -> Result<String> {
        let mut result = self.source.clone();
        let mut start = 0;

        while let Some(open) = result[start..].find("{{") {
            let open = start + open;
            let close = result[open..].find("}}").ok_or_else(|| {
                Error::bad_parameter(format!("unclosed template at position {}", open))
            })?;
            let close = open + close + 2;
            let key = result[open + 2..close - 2].trim();

            let name = key.strip_prefix("vars.").ok_or_else(|| {
                Error::bad_parameter(format!("unknown template variable: {}", key))
            })?;
            let value = ctx
                .value(name)
                .ok_or_else(|| Error::not_found(format!("unknown variable: {}", name)))?
                .to_text()
                .ok_or_else(|| {
                    Error::bad_parameter(format!("variable {} can not be used in a template", name))
                })?;

            result.replace_range(open..close, &value);
            start = open + value.len();
        }

        Ok(result)
    }
}

#[async_trait]
impl Expression for Template {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    async fn eval(&self, ctx: &ExecutionContext) -> Result<Value> {
        self.resolve(ctx).map(Value::Str)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

/// `Template("...")` with the placeholders left in place.
#[async_trait]
impl CodeMarshaler for Template {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        FnCall::new(TEMPLATE, vec![])
            .arg(self.source.as_str())
            .marshal_code(ctx)
            .await
    }
}

/// The canonical `Strings(a, b, ...)` constructor.
#[derive(Debug, Clone)]
pub struct StringsExpr {
    pub items: Vec<Expr>,
}

impl StringsExpr {
    pub fn new(items: Vec<Expr>) -> Expr {
        Arc::new(Self { items })
    }

    pub fn literal<I, S>(items: I) -> Expr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(items.into_iter().map(Literal::string).collect())
    }
}

#[async_trait]
impl Expression for StringsExpr {
    fn value_type(&self) -> ValueType {
        ValueType::Strings
    }

    async fn eval(&self, ctx: &ExecutionContext) -> Result<Value> {
        let mut out = Vec::with_capacity(self.items.len());
        for item in &self.items {
            out.push(eval_string(ctx, item.as_ref()).await?);
        }
        Ok(Value::Strings(out))
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for StringsExpr {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let mut call = FnCall::new(STRINGS, Vec::new());
        call.set_expression_args(&self.items);
        call.marshal_code(ctx).await
    }
}
