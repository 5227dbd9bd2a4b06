// src/system/executor.rs

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::process::{Command as StdCommand, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, io::Error),
    #[error("Command '{0}' exited with a non-zero error code.")]
    NonZeroExitStatus(String),
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// What a captured command left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
}

fn display_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs a program with inherited stdio and waits for it.
/// Returns its exit code (`None` when killed by a signal).
pub fn execute_command<P, S>(
    program: P,
    args: &[S],
    env_vars: &HashMap<String, String>,
) -> Result<Option<i32>, ExecutionError>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let shown = display_command(program, args);
    log::debug!("Executing: {}", shown);

    let status = StdCommand::new(program)
        .args(args)
        .envs(env_vars)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| ExecutionError::CommandFailed(shown, e))?;
    Ok(status.code())
}

/// Splits a command line the way a POSIX shell would (without running one)
/// and runs it, failing on a non-zero exit status.
pub fn execute_command_line(
    command_line: &str,
    env_vars: &HashMap<String, String>,
) -> Result<(), ExecutionError> {
    let trimmed = command_line.trim();
    let parts =
        shlex::split(trimmed).ok_or_else(|| ExecutionError::CommandParse(trimmed.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Err(ExecutionError::EmptyCommand);
    };
    match execute_command(program, args, env_vars)? {
        Some(0) => Ok(()),
        _ => Err(ExecutionError::NonZeroExitStatus(trimmed.to_string())),
    }
}

/// Executes a program and captures its standard output.
/// Stderr is passed through to the user's terminal. A non-zero exit status is
/// not an error here: callers usually want the output that explains it.
pub fn execute_and_capture_output<P, S>(
    program: P,
    args: &[S],
    env_vars: &HashMap<String, String>,
) -> Result<CapturedOutput, ExecutionError>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let shown = display_command(program, args);
    log::debug!("Capturing: {}", shown);

    let output = StdCommand::new(program)
        .args(args)
        .envs(env_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(shown.clone(), e))?;

    let stdout = String::from_utf8(output.stdout).map_err(|e| {
        ExecutionError::InvalidUtf8Output {
            command: shown,
            source: e,
        }
    })?;

    Ok(CapturedOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout,
    })
}

/// Starts a program in the background without waiting for it; returns its pid.
pub fn spawn_detached<P, S>(program: P, args: &[S]) -> Result<u32, ExecutionError>
where
    P: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let shown = display_command(program, args);
    let child = StdCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ExecutionError::CommandFailed(shown, e))?;
    Ok(child.id())
}
