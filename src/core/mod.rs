//! Core runtime: values, expressions, actions, code regeneration.

pub mod action;
pub mod call;
pub mod compile;
pub mod context;
pub mod error;
pub mod expr;
pub mod log;
pub mod manifest;
pub mod marshal;
pub mod value;

pub use action::{Action, Effect, EffectAction, Parallel, Sequence, SetVar};
pub use call::{FnCall, FnRef};
pub use context::{ExecutionContext, Process};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use expr::{Expr, Expression};
pub use marshal::{marshal, marshal_code, unquote, CodeMarshaler, Marshaler, Unquoter};
pub use value::{Record, TypeName, Value, ValueType};
