//! Runtime values: a closed set of shapes the marshaler understands.
//!
//! Records carry an explicit, ordered field-descriptor list instead of
//! being inspected at run time. Anything outside the closed set opts in
//! through [`CodeMarshaler`], [`Expression`] or [`Action`].

use super::action::Action;
use super::expr::{Expr, Expression};
use super::marshal::CodeMarshaler;
use std::fmt;
use std::sync::Arc;

/// Name of the synthetic field that records a wrapper's original type.
pub const METADATA_FIELD: &str = "Metadata";

/// A package-qualified type name, e.g. `builder.Image`.
///
/// `package: None` means the type belongs to the runtime itself and is
/// rendered without a qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub package: Option<String>,
    pub name: String,
}

impl TypeName {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        let package = package.into();
        Self {
            package: base_package(&package),
            name: name.into(),
        }
    }

    /// A type defined by the runtime itself.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            package: None,
            name: name.into(),
        }
    }

    /// A type with no name, e.g. a synthesized wrapper.
    pub fn anonymous() -> Self {
        Self::local("")
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package {
            Some(p) => write!(f, "{}.{}", p, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Last segment of a package path: `github.com/acme/builder` and
/// `kiln::plugins::builder` both become `builder`.
fn base_package(path: &str) -> Option<String> {
    let base = path
        .rsplit(['/', ':'])
        .find(|s| !s.is_empty())
        .unwrap_or_default();
    if base.is_empty() || base == "." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Declared result type of an expression, used for checks before evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    String,
    Strings,
    List,
    Record(TypeName),
    Action,
    Any,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
            Self::Strings => write!(f, "[]string"),
            Self::List => write!(f, "list"),
            Self::Record(t) => write!(f, "{}", t),
            Self::Action => write!(f, "action"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Interface kinds a list may be declared over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interface {
    /// Expressions evaluating to a string.
    StringVar,
    Other(String),
}

/// Declared element type of a [`List`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElemType {
    Record(TypeName),
    Interface(Interface),
    Scalar(String),
}

/// A homogeneous sequence with a declared element type.
#[derive(Debug, Clone)]
pub struct List {
    pub elem: ElemType,
    pub items: Vec<Value>,
}

/// One entry in a record's field-descriptor list.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub value: Value,
    /// Excluded from generated code (`code:"-"`).
    pub skip_code: bool,
}

/// A struct-like value with declaration-ordered fields.
#[derive(Debug, Clone)]
pub struct Record {
    pub ty: TypeName,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(ty: TypeName) -> Self {
        Self { ty, fields: Vec::new() }
    }

    /// A synthesized record standing in for `original`.
    pub fn wrapping(original: TypeName) -> Self {
        Self::new(TypeName::anonymous()).field(METADATA_FIELD, Value::TypeTag(original))
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            skip_code: false,
        });
        self
    }

    /// Add a field that never appears in generated code.
    pub fn hidden_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            skip_code: true,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// The type this record was synthesized from, if it is a wrapper.
    pub fn original_type(&self) -> Option<&TypeName> {
        match self.get(METADATA_FIELD) {
            Some(Value::TypeTag(t)) => Some(t),
            _ => None,
        }
    }

    /// Identity used in generated code.
    ///
    /// The name is the record's own unless it is anonymous; the package
    /// always comes from the original type when one is recorded.
    pub fn code_type(&self) -> TypeName {
        let original = self.original_type();
        let name = if !self.ty.name.is_empty() {
            self.ty.name.clone()
        } else {
            original.map(|t| t.name.clone()).unwrap_or_default()
        };
        let package = match original {
            Some(t) => t.package.clone(),
            None => self.ty.package.clone(),
        };
        TypeName { package, name }
    }
}

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Strings(Vec<String>),
    List(List),
    Record(Record),
    /// A type used as a value; only meaningful as record metadata.
    TypeTag(TypeName),
    Expr(Expr),
    Code(Arc<dyn CodeMarshaler>),
    Action(Arc<dyn Action>),
}

impl Value {
    pub fn expr(e: impl Expression + 'static) -> Self {
        Self::Expr(Arc::new(e))
    }

    pub fn code(c: impl CodeMarshaler + 'static) -> Self {
        Self::Code(Arc::new(c))
    }

    /// A list of string-valued expressions (`[]StringVar`).
    pub fn string_vars(items: Vec<Expr>) -> Self {
        Self::List(List {
            elem: ElemType::Interface(Interface::StringVar),
            items: items.into_iter().map(Value::Expr).collect(),
        })
    }

    pub fn records(ty: TypeName, items: Vec<Record>) -> Self {
        Self::List(List {
            elem: ElemType::Record(ty),
            items: items.into_iter().map(Value::Record).collect(),
        })
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::Strings(v) => Some(v),
            _ => None,
        }
    }

    /// Short description of the value's shape, for error messages.
    pub fn type_name(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::Strings(_) => "[]string".to_string(),
            Self::List(l) => match &l.elem {
                ElemType::Record(t) => format!("[]{}", t),
                ElemType::Interface(Interface::StringVar) => "[]StringVar".to_string(),
                ElemType::Interface(Interface::Other(n)) => format!("[]{}", n),
                ElemType::Scalar(n) => format!("[]{}", n),
            },
            Self::Record(r) => r.code_type().to_string(),
            Self::TypeTag(t) => format!("type {}", t),
            Self::Expr(e) => format!("expression of {}", e.value_type()),
            Self::Code(c) => format!("{:?}", c),
            Self::Action(a) => format!("{:?}", a),
        }
    }

    /// Render as plain text for template substitution.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Nil => Some(String::new()),
            Self::Strings(v) => Some(v.join(" ")),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "Nil"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(i) => write!(f, "Int({})", i),
            Self::Str(s) => write!(f, "Str({:?})", s),
            Self::Strings(v) => write!(f, "Strings({:?})", v),
            Self::List(l) => f.debug_tuple("List").field(l).finish(),
            Self::Record(r) => f.debug_tuple("Record").field(r).finish(),
            Self::TypeTag(t) => write!(f, "TypeTag({})", t),
            Self::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            Self::Code(c) => f.debug_tuple("Code").field(c).finish(),
            Self::Action(a) => f.debug_tuple("Action").field(a).finish(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::Strings(v)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl From<Expr> for Value {
    fn from(e: Expr) -> Self {
        Self::Expr(e)
    }
}

impl From<Arc<dyn Action>> for Value {
    fn from(a: Arc<dyn Action>) -> Self {
        Self::Action(a)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map(Into::into).unwrap_or(Self::Nil)
    }
}

/// Convert a YAML scalar or string list into a runtime value.
pub fn from_yaml(val: &serde_yaml_ng::Value) -> Option<Value> {
    match val {
        serde_yaml_ng::Value::Null => Some(Value::Nil),
        serde_yaml_ng::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_yaml_ng::Value::Number(n) => n.as_i64().map(Value::Int),
        serde_yaml_ng::Value::String(s) => Some(Value::Str(s.clone())),
        serde_yaml_ng::Value::Sequence(seq) => seq
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(Value::Strings),
        _ => None,
    }
}
