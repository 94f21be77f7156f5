//! Error-hook sink: out-of-band consumer of per-recipient failure events.
//!
//! Four mutually exclusive modes, selected from the `[provider]` section:
//!
//! - **Stream**: one task writes newline-terminated events to stdout,
//!   stderr, or nowhere, flushing after each event.
//! - **Persistent command**: one `sh -c <hook>` child consumes a
//!   newline-delimited event stream on stdin; a failed write discards the
//!   child and the next event spawns a fresh one.
//! - **Command per event**: a pool of tasks spawns `sh -c <hook>` once per
//!   event with the event on stdin. Expensive at high error rates; prefer
//!   the persistent mode.
//! - **Drain**: no hook configured; events are consumed and discarded so
//!   producers never block on a full channel.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::SectionProvider;

/// A serialized [`crate::ProviderResponse`] destined for the hook.
pub type HookEvent = Vec<u8>;

/// Where hook events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMode {
    Stream(StreamTarget),
    PersistentCommand(String),
    CommandPerEvent { command: String, workers: usize },
    Drain,
}

/// Stream-mode writer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Stdout,
    Stderr,
    Discard,
}

impl SinkMode {
    /// Derive the mode from configuration. `error_hook_to` takes precedence
    /// over the command modes; with nothing configured, events are drained.
    pub fn from_provider(provider: &SectionProvider, workers: usize) -> SinkMode {
        match provider.error_hook_to.as_deref() {
            Some("stdout") => return SinkMode::Stream(StreamTarget::Stdout),
            Some("stderr") => return SinkMode::Stream(StreamTarget::Stderr),
            Some("discard") => return SinkMode::Stream(StreamTarget::Discard),
            _ => {}
        }
        match provider.error_hook.as_ref() {
            Some(command) if provider.error_hook_command_persistent => {
                SinkMode::PersistentCommand(command.clone())
            }
            Some(command) => SinkMode::CommandPerEvent { command: command.clone(), workers },
            None => SinkMode::Drain,
        }
    }
}

/// Spawn the sink tasks for `mode`. They run until the channel is closed and
/// drained; [`crate::Supervisor::shutdown`] awaits the returned handles.
pub fn spawn(mode: SinkMode, rx: async_channel::Receiver<HookEvent>) -> Vec<JoinHandle<()>> {
    match mode {
        SinkMode::Stream(target) => vec![tokio::spawn(run_stream(target, rx))],
        SinkMode::PersistentCommand(command) => {
            vec![tokio::spawn(run_persistent(command, rx))]
        }
        SinkMode::CommandPerEvent { command, workers } => (0..workers.max(1))
            .map(|_| tokio::spawn(run_per_event(command.clone(), rx.clone())))
            .collect(),
        SinkMode::Drain => vec![tokio::spawn(run_drain(rx))],
    }
}

async fn run_stream(target: StreamTarget, rx: async_channel::Receiver<HookEvent>) {
    while let Ok(event) = rx.recv().await {
        let outcome = match target {
            StreamTarget::Stdout => write_event(&mut tokio::io::stdout(), &event).await,
            StreamTarget::Stderr => write_event(&mut tokio::io::stderr(), &event).await,
            StreamTarget::Discard => Ok(()),
        };
        if let Err(e) = outcome {
            tracing::error!(r#type = "error_hook", error = %e, "failed to write hook event; stopping sink");
            return;
        }
    }
}

async fn write_event<W>(writer: &mut W, event: &[u8]) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(event).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn run_persistent(command: String, rx: async_channel::Receiver<HookEvent>) {
    let mut child: Option<Child> = None;
    while let Ok(event) = rx.recv().await {
        if child.is_none() {
            match spawn_hook_command(&command, Stdio::inherit(), Stdio::inherit()) {
                Ok(spawned) => child = Some(spawned),
                Err(e) => {
                    tracing::error!(r#type = "error_hook", command = %command, error = %e, "failed to spawn hook command");
                    continue;
                }
            }
        }
        let wrote = match child.as_mut().and_then(|running| running.stdin.as_mut()) {
            Some(stdin) => write_event(stdin, &event).await,
            None => Err(std::io::Error::other("hook child has no stdin")),
        };
        if let Err(e) = wrote {
            // Fire-and-recover: drop this child, respawn on the next event.
            tracing::warn!(r#type = "error_hook", command = %command, error = %e, "hook stdin write failed; discarding child");
            if let Some(mut dead) = child.take() {
                let _ = dead.start_kill();
            }
        }
    }
    if let Some(mut running) = child.take() {
        drop(running.stdin.take());
        let _ = running.wait().await;
    }
}

async fn run_per_event(command: String, rx: async_channel::Receiver<HookEvent>) {
    while let Ok(event) = rx.recv().await {
        let mut child = match spawn_hook_command(&command, Stdio::piped(), Stdio::piped()) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(r#type = "error_hook", command = %command, error = %e, "failed to spawn hook command");
                continue;
            }
        };
        if let Some(stdin) = child.stdin.as_mut() {
            if let Err(e) = write_event(stdin, &event).await {
                tracing::error!(r#type = "error_hook", command = %command, error = %e, "failed to write hook stdin");
            }
        }
        drop(child.stdin.take());
        match child.wait_with_output().await {
            Ok(output) if output.status.success() => {
                tracing::debug!(r#type = "error_hook", command = %command, "hook command succeeded");
            }
            Ok(output) => {
                tracing::error!(
                    r#type = "error_hook",
                    command = %command,
                    status = output.status.code().unwrap_or(-1),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "hook command exited non-zero"
                );
            }
            Err(e) => {
                tracing::error!(r#type = "error_hook", command = %command, error = %e, "failed to wait for hook command");
            }
        }
    }
}

async fn run_drain(rx: async_channel::Receiver<HookEvent>) {
    while rx.recv().await.is_ok() {}
}

fn spawn_hook_command(command: &str, stdout: Stdio, stderr: Stdio) -> std::io::Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
}
