//! Manifest → action graph.
//!
//! Plugin handles are passed in explicitly; nothing is looked up by key
//! at run time. Session steps compile to templates that are bound to a
//! connection per host when the session runs.

use super::action::{Action, Parallel, Sequence, SetVar};
use super::context::{ExecutionContext, Process};
use super::error::{Error, Result};
use super::expr::{Expr, StringsExpr, Template, Var};
use super::manifest::{validate_manifest, Endpoint, Manifest, Step, StepKind};
use super::marshal::marshal_code;
use super::value::{from_yaml, Value, ValueType};
use crate::plugins::builder::{Builder, Push};
use crate::plugins::ssh::{Copy, Exec, HostAction, Session, SshPlugin, Target};
use std::sync::Arc;

/// Plugin handles available to compiled actions.
#[derive(Debug, Clone)]
pub struct Plugins {
    pub ssh: Arc<SshPlugin>,
    pub builder: Arc<Builder>,
}

impl Plugins {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            ssh: SshPlugin::new(manifest.ssh.clone()),
            builder: Builder::new(manifest.builder.clone()),
        }
    }
}

/// A compiled pipeline.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    vars: Vec<(String, Value)>,
    root: Sequence,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Sequence {
        &self.root
    }

    /// A context for `process` with the manifest's vars bound.
    pub fn initial_context(&self, process: Arc<Process>) -> ExecutionContext {
        ExecutionContext::new(process).with_values(self.vars.clone())
    }

    pub async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        self.root.run(ctx).await
    }

    /// Regenerate the program's source.
    pub async fn code(&self, ctx: &ExecutionContext) -> Result<String> {
        let root = Value::Action(Arc::new(self.root.clone()));
        let data = marshal_code(ctx, &root).await?;
        String::from_utf8(data).map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Compile with plugins configured from the manifest itself.
pub fn compile(manifest: &Manifest) -> Result<Program> {
    compile_with(manifest, &Plugins::from_manifest(manifest))
}

pub fn compile_with(manifest: &Manifest, plugins: &Plugins) -> Result<Program> {
    let errors = validate_manifest(manifest);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(Error::bad_parameter(messages.join("; ")));
    }

    let mut vars = Vec::with_capacity(manifest.vars.len());
    for (name, raw) in &manifest.vars {
        let value = from_yaml(raw)
            .ok_or_else(|| Error::bad_parameter(format!("var '{}' has an unsupported type", name)))?;
        vars.push((name.clone(), value));
    }

    let steps = compile_steps(&manifest.steps, plugins)?;
    Ok(Program {
        name: manifest.name.clone(),
        vars,
        root: Sequence::new(steps),
    })
}

fn compile_steps(steps: &[Step], plugins: &Plugins) -> Result<Vec<Arc<dyn Action>>> {
    steps.iter().map(|s| compile_step(s, plugins)).collect()
}

fn compile_step(step: &Step, plugins: &Plugins) -> Result<Arc<dyn Action>> {
    let action: Arc<dyn Action> = match step.kind()? {
        StepKind::Session(s) => {
            let templates = s
                .steps
                .iter()
                .map(|child| compile_host_step(child, plugins))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(Session::new(plugins.ssh.clone(), hosts_expr(&s.hosts.to_vec()), templates))
        }
        StepKind::Copy(_) | StepKind::Exec(_) => compile_host_step(step, plugins)?.into_action(),
        StepKind::Push(p) => Arc::new(Push::new(plugins.builder.clone(), Template::parse(&p.tag))?),
        StepKind::Parallel(children) => Arc::new(Parallel::new(compile_steps(children, plugins)?)),
        StepKind::Sequence(children) => Arc::new(Sequence::new(compile_steps(children, plugins)?)),
        StepKind::Set(s) => SetVar::new(s.name.clone(), Template::parse(&s.value)),
    };
    Ok(action)
}

fn compile_host_step(step: &Step, plugins: &Plugins) -> Result<Arc<dyn HostAction>> {
    match step.kind()? {
        StepKind::Copy(c) => {
            let from = Endpoint::parse(&c.from)?;
            let to = Endpoint::parse(&c.to)?;
            Ok(Arc::new(Copy::new(
                plugins.ssh.clone(),
                c.host.as_deref().map(Template::parse),
                target(from),
                target(to),
            )?))
        }
        StepKind::Exec(e) => Ok(Arc::new(Exec::new(
            plugins.ssh.clone(),
            e.host.as_deref().map(Template::parse),
            Template::parse(&e.command),
        )?)),
        other => Err(Error::bad_parameter(format!(
            "{} can not run inside a session",
            other.label()
        ))),
    }
}

fn target(endpoint: Endpoint) -> Target {
    let path = Template::parse(&endpoint.path);
    if endpoint.local {
        Target::local(path)
    } else {
        Target::remote(path)
    }
}

/// A lone `{{vars.NAME}}` refers to a host list; anything else is a list
/// of host templates.
fn hosts_expr(hosts: &[String]) -> Expr {
    if let [only] = hosts {
        let trimmed = only.trim();
        if let Some(name) = trimmed
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map(str::trim)
            .and_then(|s| s.strip_prefix("vars."))
        {
            if !name.contains("{{") && !name.contains(' ') {
                return Var::new(name, ValueType::Strings);
            }
        }
    }
    StringsExpr::new(hosts.iter().map(|h| Template::parse(h)).collect())
}
