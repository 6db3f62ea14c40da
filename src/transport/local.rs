//! Local process execution, shared by the ssh transport and the builder.

use super::ExecOutput;
use crate::core::error::{Result, ResultExt};
use std::process::Stdio;
use tokio::process::Command;

/// Run `program` with `args` and collect its output. A non-zero exit is
/// not an error here.
pub async fn exec_local(program: &str, args: &[String]) -> Result<ExecOutput> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?
        .wait_with_output()
        .await
        .with_context(|| format!("{} wait error", program))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
