// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Runner
//!
//! Production [`CommandRunner`]: spawns the invocation with `tokio::process`,
//! forwards every stdout/stderr line as `[<host>] <line>` while the process
//! runs, and maps the exit status onto [`StageError`].

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::stage::{CommandRunner, Invocation, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<(), StageError> {
        let command_line = invocation.command_line();
        info!(host = %invocation.host, command = %command_line, "Executing command");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| StageError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            forward(&invocation.host, stdout, Stream::Stdout),
            forward(&invocation.host, stderr, Stream::Stderr),
        );

        let status = child.wait().await.map_err(|source| StageError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        debug!(host = %invocation.host, command = %command_line, %status, "Command exited");

        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(exit_code) => Err(StageError::NonZeroExit {
                command: command_line,
                exit_code,
            }),
            None => Err(StageError::Terminated {
                command: command_line,
            }),
        }
    }
}

async fn forward<R>(host: &str, reader: Option<R>, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    // A read error ends forwarding for this stream; the exit status still decides the outcome.
    while let Ok(Some(line)) = lines.next_line().await {
        match stream {
            Stream::Stdout => println!("[{host}] {line}"),
            Stream::Stderr => eprintln!("[{host}] {line}"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("test-host", "sh").args(["-c", script])
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let runner = ProcessRunner::new();
        assert!(runner.run(&sh("echo out; echo err >&2")).await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_carries_code_and_command() {
        let runner = ProcessRunner::new();
        let err = runner.run(&sh("exit 3")).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.command(), "sh -c exit 3");
    }

    #[tokio::test]
    async fn passes_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = sh("test \"$PROVISION_TEST\" = yes && test -f marker")
            .env("PROVISION_TEST", "yes")
            .current_dir(dir.path());
        std::fs::write(dir.path().join("marker"), "").unwrap();

        assert!(ProcessRunner::new().run(&invocation).await.is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let invocation = Invocation::new("test-host", "/nonexistent/provision-tool");
        let err = ProcessRunner::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }
}
