use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected output from {program}: {reason}")]
    InvalidOutput { program: String, reason: String },
}

/// Runs `program args..` and returns its stdout when it exits successfully.
pub fn run(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
) -> Result<String, CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    debug!("Running {} {}", program, args.join(" "));

    let output = cmd.output().map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(CommandError::Failed {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
