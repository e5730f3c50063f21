//! Running the OS commands the device depends on (ping, portal scripts, wpa_cli).
//!
//! Every external command goes through [`run_command`] so they all get a timeout and
//! a uniform [`CommandError`] carrying the program name and a trimmed stderr tail.

use crate::logutil::escape_log;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no command configured")]
    Empty,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Run `argv` to completion. A non-zero exit is an error; the child is killed if it
/// outlives `timeout`.
pub async fn run_command(argv: &[String], timeout: Duration) -> Result<(), CommandError> {
    let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
    debug!("running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandError::Spawn {
                program: program.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(CommandError::TimedOut {
                program: program.clone(),
                timeout,
            })
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CommandError::Failed {
            program: program.clone(),
            status: output.status.to_string(),
            stderr: escape_log(stderr.trim()),
        })
    }
}
