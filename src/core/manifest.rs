//! Pipeline manifest (`kiln.yaml`): schema, parsing, and validation.
//!
//! Structural rules checked by [`validate_manifest`]:
//! - Version must be "1.0"
//! - Every step has exactly one kind
//! - Sessions have hosts and contain only copy/exec steps
//! - Copies move data between exactly one local and one remote side
//! - Steps outside a session that need a connection name a host

use super::error::{Error, Result, ResultExt};
use crate::plugins::builder::{normalize_reference, BuilderConfig};
use crate::transport::ssh::SshConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ============================================================================
// Top-level kiln.yaml
// ============================================================================

/// Root manifest: plugin settings, initial variables, and the steps to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// ssh plugin settings
    #[serde(default)]
    pub ssh: SshConfig,

    /// builder plugin settings
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Initial bindings, visible as `{{vars.NAME}}` (order-preserving)
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml_ng::Value>,

    /// Steps, run in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

// ============================================================================
// Steps
// ============================================================================

/// One step. Exactly one of the kind fields must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Optional label used in messages
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub session: Option<SessionStep>,

    #[serde(default)]
    pub copy: Option<CopyStep>,

    #[serde(default)]
    pub exec: Option<ExecStep>,

    #[serde(default)]
    pub push: Option<PushStep>,

    #[serde(default)]
    pub parallel: Option<Vec<Step>>,

    #[serde(default)]
    pub sequence: Option<Vec<Step>>,

    #[serde(default)]
    pub set: Option<SetStep>,
}

/// The kind of a step, borrowed from it.
#[derive(Debug, Clone, Copy)]
pub enum StepKind<'a> {
    Session(&'a SessionStep),
    Copy(&'a CopyStep),
    Exec(&'a ExecStep),
    Push(&'a PushStep),
    Parallel(&'a [Step]),
    Sequence(&'a [Step]),
    Set(&'a SetStep),
}

impl StepKind<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Copy(_) => "copy",
            Self::Exec(_) => "exec",
            Self::Push(_) => "push",
            Self::Parallel(_) => "parallel",
            Self::Sequence(_) => "sequence",
            Self::Set(_) => "set",
        }
    }
}

impl Step {
    /// All kinds set on this step; valid steps have exactly one.
    pub fn kinds(&self) -> Vec<StepKind<'_>> {
        let mut kinds = Vec::new();
        if let Some(ref s) = self.session {
            kinds.push(StepKind::Session(s));
        }
        if let Some(ref c) = self.copy {
            kinds.push(StepKind::Copy(c));
        }
        if let Some(ref e) = self.exec {
            kinds.push(StepKind::Exec(e));
        }
        if let Some(ref p) = self.push {
            kinds.push(StepKind::Push(p));
        }
        if let Some(ref p) = self.parallel {
            kinds.push(StepKind::Parallel(p));
        }
        if let Some(ref s) = self.sequence {
            kinds.push(StepKind::Sequence(s));
        }
        if let Some(ref s) = self.set {
            kinds.push(StepKind::Set(s));
        }
        kinds
    }

    pub fn kind(&self) -> Result<StepKind<'_>> {
        match self.kinds().as_slice() {
            [one] => Ok(*one),
            _ => Err(Error::bad_parameter(format!(
                "step {} must have exactly one of session, copy, exec, push, parallel, sequence, set",
                self.name.as_deref().unwrap_or("(unnamed)")
            ))),
        }
    }
}

/// Hosts of a session: one string or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hosts {
    Single(String),
    Multiple(Vec<String>),
}

impl Hosts {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }
}

/// Run copy/exec steps on every host, hosts in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionStep {
    /// `[user@]host[:port]` entries, or `{{vars.NAME}}` naming a host list
    pub hosts: Hosts,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Copy between this machine and a remote host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyStep {
    /// Host to dial; only outside a session
    #[serde(default)]
    pub host: Option<String>,

    /// `local:PATH` or `remote:PATH`
    pub from: String,

    /// `local:PATH` or `remote:PATH`
    pub to: String,
}

/// Run a shell command on a remote host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecStep {
    #[serde(default)]
    pub host: Option<String>,

    pub command: String,
}

/// Push an image through the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushStep {
    pub tag: String,
}

/// Bind a variable for the steps after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetStep {
    pub name: String,
    pub value: String,
}

/// A parsed copy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub local: bool,
    pub path: String,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self> {
        let (local, path) = if let Some(p) = s.strip_prefix("local:") {
            (true, p)
        } else if let Some(p) = s.strip_prefix("remote:") {
            (false, p)
        } else {
            return Err(Error::bad_parameter(format!(
                "copy endpoint {:?} must start with local: or remote:",
                s
            )));
        };
        if path.is_empty() {
            return Err(Error::bad_parameter(format!("copy endpoint {:?} has no path", s)));
        }
        Ok(Self {
            local,
            path: path.to_string(),
        })
    }
}

// ============================================================================
// Parsing and validation
// ============================================================================

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a kiln.yaml file from disk.
pub fn parse_manifest_file(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_manifest(&content)
}

/// Parse a kiln.yaml from a string.
pub fn parse_manifest(yaml: &str) -> Result<Manifest> {
    serde_yaml_ng::from_str(yaml).context("YAML parse error")
}

/// Validate a parsed manifest. Returns a list of errors (empty = valid).
pub fn validate_manifest(manifest: &Manifest) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if manifest.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", manifest.version),
        });
    }

    if manifest.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    for name in manifest.vars.keys() {
        if !is_identifier(name) {
            errors.push(ValidationError {
                message: format!("var '{}' is not a valid name", name),
            });
        }
    }

    validate_steps(&manifest.steps, "steps", false, &mut errors);
    errors
}

fn validate_steps(steps: &[Step], path: &str, in_session: bool, errors: &mut Vec<ValidationError>) {
    for (i, step) in steps.iter().enumerate() {
        let here = match step.name {
            Some(ref n) => format!("{}[{}] ({})", path, i, n),
            None => format!("{}[{}]", path, i),
        };
        let mut err = |message: String| errors.push(ValidationError { message });

        let kind = match step.kinds().as_slice() {
            [one] => *one,
            [] => {
                err(format!("{} has no step kind", here));
                continue;
            }
            many => {
                let names: Vec<_> = many.iter().map(StepKind::label).collect();
                err(format!("{} has more than one step kind: {}", here, names.join(", ")));
                continue;
            }
        };

        if in_session && !matches!(kind, StepKind::Copy(_) | StepKind::Exec(_)) {
            err(format!(
                "{} ({}) can not run inside a session, only copy and exec can",
                here,
                kind.label()
            ));
            continue;
        }

        match kind {
            StepKind::Session(s) => {
                let hosts = s.hosts.to_vec();
                if hosts.is_empty() || hosts.iter().any(|h| h.trim().is_empty()) {
                    err(format!("{} (session) needs at least one host", here));
                }
                if s.steps.is_empty() {
                    err(format!("{} (session) has no steps", here));
                }
                validate_steps(&s.steps, &format!("{}.session.steps", here), true, errors);
            }
            StepKind::Copy(c) => {
                let ends = (Endpoint::parse(&c.from), Endpoint::parse(&c.to));
                match ends {
                    (Ok(from), Ok(to)) => {
                        if from.local && to.local {
                            err(format!("{} (copy) has both sides local", here));
                        }
                        if !from.local && !to.local {
                            err(format!("{} (copy) has both sides remote", here));
                        }
                    }
                    (from, to) => {
                        for e in [from.err(), to.err()].into_iter().flatten() {
                            err(format!("{} (copy): {}", here, e));
                        }
                    }
                }
                validate_host(&here, "copy", c.host.as_deref(), in_session, true, &mut err);
            }
            StepKind::Exec(e) => {
                if e.command.trim().is_empty() {
                    err(format!("{} (exec) has no command", here));
                }
                validate_host(&here, "exec", e.host.as_deref(), in_session, false, &mut err);
            }
            StepKind::Push(p) => {
                if p.tag.trim().is_empty() {
                    err(format!("{} (push) has no tag", here));
                } else if !p.tag.contains("{{") {
                    if let Err(e) = normalize_reference(&p.tag) {
                        err(format!("{} (push): {}", here, e));
                    }
                }
            }
            StepKind::Parallel(children) => {
                validate_steps(children, &format!("{}.parallel", here), false, errors);
            }
            StepKind::Sequence(children) => {
                validate_steps(children, &format!("{}.sequence", here), false, errors);
            }
            StepKind::Set(s) => {
                if !is_identifier(&s.name) {
                    err(format!("{} (set) has invalid name '{}'", here, s.name));
                }
            }
        }
    }
}

fn validate_host(
    here: &str,
    kind: &str,
    host: Option<&str>,
    in_session: bool,
    session_forbids_host: bool,
    err: &mut impl FnMut(String),
) {
    match (host, in_session) {
        (Some(_), true) if session_forbids_host => {
            err(format!("{} ({}) must not name a host inside a session", here, kind));
        }
        (None, false) => err(format!("{} ({}) outside a session needs a host", here, kind)),
        (Some(h), false) if h.trim().is_empty() => {
            err(format!("{} ({}) outside a session needs a host", here, kind));
        }
        _ => {}
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
