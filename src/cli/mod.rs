//! CLI subcommands: init, validate, code, run.

use crate::core::compile::{self, Program};
use crate::core::context::Process;
use crate::core::manifest::{self, Manifest};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new kiln project
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate kiln.yaml without connecting anywhere
    Validate {
        /// Path to kiln.yaml
        #[arg(short, long, default_value = "kiln.yaml")]
        file: PathBuf,
    },

    /// Print the compiled pipeline as code
    Code {
        /// Path to kiln.yaml
        #[arg(short, long, default_value = "kiln.yaml")]
        file: PathBuf,
    },

    /// Run the pipeline
    Run {
        /// Path to kiln.yaml
        #[arg(short, long, default_value = "kiln.yaml")]
        file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Code { file } => cmd_code(&file),
        Commands::Run { file } => cmd_run(&file),
    }
}

const STARTER: &str = r#"version: "1.0"
name: my-pipeline
description: "Managed by kiln"

ssh:
  user: root
  port: 22

vars:
  hosts: [web1]

steps:
  - name: hello
    session:
      hosts: "{{vars.hosts}}"
      steps:
        - exec: { command: "uname -a" }
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let manifest_path = path.join("kiln.yaml");
    if manifest_path.exists() {
        return Err(format!("{} already exists", manifest_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&manifest_path, STARTER)
        .map_err(|e| format!("cannot write {}: {}", manifest_path.display(), e))?;

    println!("Initialized kiln project at {}", path.display());
    println!("  Created: {}", manifest_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let manifest = parse_and_validate(file)?;
    println!("OK: {} ({} steps)", manifest.name, manifest.steps.len());
    Ok(())
}

fn cmd_code(file: &Path) -> Result<(), String> {
    let program = load(file)?;
    let code = runtime()?.block_on(async {
        let ctx = program.initial_context(Process::new(program.name()));
        program.code(&ctx).await
    });
    println!("{}", code.map_err(|e| e.to_string())?);
    Ok(())
}

fn cmd_run(file: &Path) -> Result<(), String> {
    let program = load(file)?;
    let process = Process::new(program.name());
    runtime()?.block_on(run_until_interrupted(&program, process))
}

async fn run_until_interrupted(program: &Program, process: Arc<Process>) -> Result<(), String> {
    let watcher = {
        let process = process.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling {}", process.name());
                process.cancel();
            }
        })
    };

    let ctx = program.initial_context(process);
    let res = program.run(ctx).await;
    watcher.abort();
    res.map(|_| {
        tracing::info!("{} finished", program.name());
    })
    .map_err(|e| e.to_string())
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))
}

/// Parse and validate a manifest, printing each error.
fn parse_and_validate(file: &Path) -> Result<Manifest, String> {
    let manifest = manifest::parse_manifest_file(file).map_err(|e| e.to_string())?;
    let errors = manifest::validate_manifest(&manifest);
    if errors.is_empty() {
        return Ok(manifest);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn load(file: &Path) -> Result<Program, String> {
    let manifest = parse_and_validate(file)?;
    compile::compile(&manifest).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, yaml: &str) -> PathBuf {
        let file = dir.join("kiln.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_init_creates_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        cmd_init(&sub).unwrap();
        assert!(sub.join("kiln.yaml").exists());
        cmd_validate(&sub.join("kiln.yaml")).unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "exists");
        let err = cmd_init(dir.path()).unwrap_err();
        assert!(err.ends_with("already exists"));
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            r#"
version: "2.0"
name: ""
"#,
        );
        let err = cmd_validate(&file).unwrap_err();
        assert_eq!(err, "2 validation error(s)");
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_validate(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_code_prints_program() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            r#"
version: "1.0"
name: t
steps:
  - exec: { host: web1, command: uptime }
"#,
        );
        cmd_code(&file).unwrap();
    }

    #[test]
    fn test_run_local_only_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(
            dir.path(),
            r#"
version: "1.0"
name: t
vars:
  svc: api
steps:
  - set: { name: unit, value: "{{vars.svc}}.service" }
  - sequence:
      - set: { name: again, value: "{{vars.unit}}" }
"#,
        );
        cmd_run(&file).unwrap();
    }

    #[test]
    fn test_dispatch_validate() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "version: \"1.0\"\nname: t\n");
        dispatch(Commands::Validate { file }).unwrap();
    }
}
