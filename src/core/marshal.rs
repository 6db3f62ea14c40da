//! Code marshaler: turns runtime values back into source text.
//!
//! Dispatch order:
//! 1. scalars (`true`, `42`, `"quoted"`)
//! 2. string lists, rendered as `Strings(...)`
//! 3. values with their own [`CodeMarshaler`]
//! 4. expressions, evaluated first and their result marshaled
//! 5. lists of records, `[]pkg.Type{a,b}`
//! 6. lists of string variables, again `Strings(...)`
//! 7. records, `pkg.Type{Field:value,...}`
//!
//! Everything else is an error.

use super::call::{FnCall, STRINGS};
use super::context::ExecutionContext;
use super::error::{Error, Result};
use super::expr::{Expr, Expression};
use super::value::{ElemType, Interface, List, Record, TypeName, Value, ValueType, METADATA_FIELD};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;

/// A value that knows how to write itself as source.
#[async_trait]
pub trait CodeMarshaler: Send + Sync + fmt::Debug {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>>;
}

/// Marshal `value` into source text that re-creates it.
pub fn marshal_code<'a>(ctx: &'a ExecutionContext, value: &'a Value) -> BoxFuture<'a, Result<Vec<u8>>> {
    async move {
        match value {
            Value::Nil => Err(Error::bad_parameter("can not marshal nil value")),
            Value::Bool(b) => Ok(b.to_string().into_bytes()),
            Value::Int(i) => Ok(i.to_string().into_bytes()),
            Value::Str(s) => Ok(quote(s).into_bytes()),
            Value::Strings(items) => {
                let args = items.iter().cloned().map(Value::Str).collect();
                FnCall::new(STRINGS, args).marshal_code(ctx).await
            }
            Value::Code(c) => c.marshal_code(ctx).await,
            Value::Action(a) => match a.code() {
                Some(c) => c.marshal_code(ctx).await,
                None => Err(Error::bad_parameter(format!(
                    "don't know how to marshal {}",
                    value.type_name()
                ))),
            },
            Value::Expr(e) => match e.code() {
                Some(c) => c.marshal_code(ctx).await,
                None => {
                    let out = e.eval(ctx).await?;
                    marshal_code(ctx, &out).await
                }
            },
            Value::List(list) => marshal_list(ctx, list).await,
            Value::Record(record) => marshal_record(ctx, record).await,
            Value::TypeTag(_) => Err(Error::bad_parameter(format!(
                "don't know how to marshal {}",
                value.type_name()
            ))),
        }
    }
    .boxed()
}

/// Double-quoted string literal with standard escapes.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0b}' => out.push_str("\\v"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

async fn marshal_list(ctx: &ExecutionContext, list: &List) -> Result<Vec<u8>> {
    match &list.elem {
        ElemType::Record(ty) => {
            if ty.is_anonymous() {
                return Err(Error::not_implemented(
                    "lists of anonymous record types are not supported",
                ));
            }
            let mut buf = b"[]".to_vec();
            write_type(&mut buf, ty);
            buf.push(b'{');
            for (i, item) in list.items.iter().enumerate() {
                if i != 0 {
                    buf.push(b',');
                }
                buf.extend_from_slice(&marshal_code(ctx, item).await?);
            }
            buf.push(b'}');
            Ok(buf)
        }
        ElemType::Interface(Interface::StringVar) => {
            FnCall::new(STRINGS, list.items.clone()).marshal_code(ctx).await
        }
        ElemType::Interface(Interface::Other(name)) => Err(Error::not_implemented(format!(
            "lists of {} are not implemented yet",
            name
        ))),
        ElemType::Scalar(name) => Err(Error::not_implemented(format!(
            "lists of {} are not implemented",
            name
        ))),
    }
}

async fn marshal_record(ctx: &ExecutionContext, record: &Record) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_type(&mut buf, &record.code_type());
    buf.push(b'{');
    let mut emitted = 0;
    for field in &record.fields {
        if field.value.is_nil() || field.skip_code || field.name == METADATA_FIELD {
            continue;
        }
        emitted += 1;
        if emitted > 1 {
            buf.push(b',');
        }
        buf.extend_from_slice(field.name.as_bytes());
        buf.push(b':');
        buf.extend_from_slice(&marshal_code(ctx, &field.value).await?);
    }
    buf.push(b'}');
    Ok(buf)
}

fn write_type(buf: &mut Vec<u8>, ty: &TypeName) {
    if let Some(p) = &ty.package {
        buf.extend_from_slice(p.as_bytes());
        buf.push(b'.');
    }
    buf.extend_from_slice(ty.name.as_bytes());
}

/// Quote `node`: marshal its structure without evaluating it.
pub fn marshal(node: impl Into<Value>) -> Marshaler {
    Marshaler { node: node.into() }
}

/// Quoted value. Evaluating it yields its source text, never its value.
#[derive(Debug, Clone)]
pub struct Marshaler {
    node: Value,
}

#[async_trait]
impl Expression for Marshaler {
    fn value_type(&self) -> ValueType {
        ValueType::String
    }

    async fn eval(&self, ctx: &ExecutionContext) -> Result<Value> {
        let data = marshal_code(ctx, &self.node).await?;
        Ok(Value::Str(String::from_utf8_lossy(&data).into_owned()))
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Marshaler {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        marshal_code(ctx, &self.node).await
    }
}

/// Unquote `node`: evaluate it now and marshal the result.
pub fn unquote(node: Expr) -> Unquoter {
    Unquoter { node }
}

/// Forces evaluation at marshal time. It can not itself be evaluated.
#[derive(Debug, Clone)]
pub struct Unquoter {
    node: Expr,
}

#[async_trait]
impl Expression for Unquoter {
    fn value_type(&self) -> ValueType {
        self.node.value_type()
    }

    async fn eval(&self, _ctx: &ExecutionContext) -> Result<Value> {
        Err(Error::bad_parameter("unquote can not be evaluated"))
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Unquoter {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        let out = self.node.eval(ctx).await?;
        marshal_code(ctx, &out).await
    }
}
