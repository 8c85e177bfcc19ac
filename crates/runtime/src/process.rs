//! Subprocess supervision for process-based backends.
//!
//! Each spawned model server gets exactly one supervisor task. It owns the
//! child and both output pipes, publishes every output line into the log
//! store, evaluates the readiness probe while the instance is STARTING,
//! notices unexpected exits, and carries out stop requests with the
//! terminate -> wait -> kill -> wait escalation. Nothing else touches the
//! child or its raw streams.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use llmops_core::instance::InstanceStatus;
use llmops_core::logs::LogLevel;
use llmops_core::readiness::{ReadinessProbe, ReadinessSignal};
use llmops_core::types::InstanceId;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::registry::Registry;

/// Output lines buffered between the pipe readers and the supervisor.
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Program, arguments, and environment for one model server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        // Own process group, so termination reaches the server's workers too.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd
    }
}

/// Grace periods for the stop escalation.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Wait after the terminate signal before force-killing.
    pub grace: Duration,
    /// Wait after force-kill for exit confirmation.
    pub kill_grace: Duration,
}

/// How a stop request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited before the request arrived.
    AlreadyExited,
    /// Exited within the grace period after the terminate signal.
    Terminated { code: Option<i32> },
    /// Needed a force-kill.
    Killed { code: Option<i32> },
    /// Exit could not be confirmed.
    Unconfirmed(String),
}

/// Handle kept in the registry while a supervised process is attached.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: mpsc::Sender<oneshot::Sender<StopOutcome>>,
    task: JoinHandle<()>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the supervisor to stop the process and wait for the outcome.
    pub async fn stop(self) -> StopOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.stop_tx.send(reply_tx).await.is_err() {
            // Supervisor already finished: the process exited on its own.
            let _ = self.task.await;
            return StopOutcome::AlreadyExited;
        }
        let outcome = reply_rx.await.unwrap_or(StopOutcome::AlreadyExited);
        let _ = self.task.await;
        outcome
    }
}

/// Spawn `command` and start its supervisor.
pub(crate) fn spawn_supervised(
    command: &ProcessCommand,
    instance_id: InstanceId,
    registry: Arc<Registry>,
    probe: Arc<dyn ReadinessProbe>,
    readiness_timeout: Duration,
    policy: StopPolicy,
) -> std::io::Result<ProcessHandle> {
    let mut child = command.to_command().spawn()?;
    let pid = child.id();

    let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx));
    }

    let (stop_tx, stop_rx) = mpsc::channel(1);
    let supervisor = Supervisor {
        instance_id,
        registry,
        probe,
        readiness_timeout,
        policy,
    };
    let task = tokio::spawn(supervisor.run(child, line_rx, stop_rx));

    Ok(ProcessHandle { pid, stop_tx, task })
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

struct Supervisor {
    instance_id: InstanceId,
    registry: Arc<Registry>,
    probe: Arc<dyn ReadinessProbe>,
    readiness_timeout: Duration,
    policy: StopPolicy,
}

impl Supervisor {
    async fn run(
        self,
        mut child: Child,
        mut lines: mpsc::Receiver<String>,
        mut stop_rx: mpsc::Receiver<oneshot::Sender<StopOutcome>>,
    ) {
        let id = self.instance_id.as_str();
        let deadline = tokio::time::sleep(self.readiness_timeout);
        tokio::pin!(deadline);
        let mut deadline_armed = true;

        loop {
            tokio::select! {
                Some(line) = lines.recv() => {
                    self.on_line(&line).await;
                }
                status = child.wait() => {
                    // Flush whatever the pipes still hold before judging the exit.
                    while let Ok(line) = lines.try_recv() {
                        self.on_line(&line).await;
                    }
                    self.on_exit(status).await;
                    break;
                }
                Some(reply) = stop_rx.recv() => {
                    let pid = child.id();
                    let outcome = terminate(&mut child, pid, self.policy).await;
                    tracing::info!(instance_id = %id, outcome = ?outcome, "Process stopped");
                    let _ = reply.send(outcome);
                    break;
                }
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    self.on_readiness_timeout().await;
                }
            }
        }
    }

    async fn on_line(&self, line: &str) {
        let id = self.instance_id.as_str();
        self.registry.log(id, LogLevel::Info, line);

        if self.registry.status(id).await != Some(InstanceStatus::Starting) {
            return;
        }
        match self.probe.inspect(line) {
            ReadinessSignal::Pending => {}
            ReadinessSignal::Ready => {
                self.registry.transition(id, InstanceStatus::Running, None).await;
            }
            ReadinessSignal::Fatal(reason) => {
                tracing::error!(instance_id = %id, reason = %reason, "Fatal output while starting");
                self.registry
                    .transition(id, InstanceStatus::Error, Some(reason))
                    .await;
            }
        }
    }

    async fn on_exit(&self, status: std::io::Result<ExitStatus>) {
        let id = self.instance_id.as_str();
        let message = match status {
            Ok(st) => format!("Process exited unexpectedly ({st})"),
            Err(e) => format!("Failed to wait for process: {e}"),
        };
        tracing::warn!(instance_id = %id, "{message}");
        self.registry.log(id, LogLevel::Error, &message);
        self.registry.set_pid(id, None).await;

        if matches!(
            self.registry.status(id).await,
            Some(InstanceStatus::Starting | InstanceStatus::Running)
        ) {
            self.registry
                .transition(id, InstanceStatus::Error, Some(message))
                .await;
        }
    }

    async fn on_readiness_timeout(&self) {
        let id = self.instance_id.as_str();
        if self.registry.status(id).await != Some(InstanceStatus::Starting) {
            return;
        }
        let message = format!(
            "Readiness marker not observed within {}s",
            self.readiness_timeout.as_secs()
        );
        tracing::warn!(instance_id = %id, "{message}");
        self.registry
            .transition(id, InstanceStatus::Error, Some(message))
            .await;
    }
}

/// Terminate -> wait `grace` -> kill -> wait `kill_grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, policy: StopPolicy) -> StopOutcome {
    if let Ok(Some(_)) = child.try_wait() {
        return StopOutcome::AlreadyExited;
    }

    signal_group(pid, Signal::Terminate);
    if pid.is_none() || cfg!(not(unix)) {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(policy.grace, child.wait()).await {
        Ok(Ok(status)) => return StopOutcome::Terminated { code: status.code() },
        Ok(Err(e)) => return StopOutcome::Unconfirmed(e.to_string()),
        Err(_) => {
            tracing::warn!(
                pid = ?pid,
                grace_secs = policy.grace.as_secs_f32(),
                "Process ignored terminate signal, killing",
            );
        }
    }

    signal_group(pid, Signal::Kill);
    let _ = child.start_kill();

    match tokio::time::timeout(policy.kill_grace, child.wait()).await {
        Ok(Ok(status)) => StopOutcome::Killed { code: status.code() },
        Ok(Err(e)) => StopOutcome::Unconfirmed(e.to_string()),
        Err(_) => StopOutcome::Unconfirmed(format!(
            "no exit within {}s of kill",
            policy.kill_grace.as_secs_f32()
        )),
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Signal the process group led by `pid` (it called `setsid` on spawn).
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: plain syscall with a pid we spawned; no memory is shared.
    let rc = unsafe { libc::kill(-pid, sig) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        tracing::debug!(pid, signal = ?signal, error = %err, "Group signal failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: Signal) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn policy(grace_ms: u64) -> StopPolicy {
        StopPolicy {
            grace: Duration::from_millis(grace_ms),
            kill_grace: Duration::from_secs(5),
        }
    }

    fn sh(script: &str) -> Child {
        ProcessCommand::new("/bin/sh")
            .args(["-c", script])
            .to_command()
            .spawn()
            .unwrap()
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = ProcessCommand::new("python").args(["-m", "vllm"]).arg("--port");
        assert_eq!(cmd.display(), "python -m vllm --port");
    }

    #[tokio::test]
    async fn cooperative_process_terminates_within_grace() {
        let mut child = sh("sleep 30");
        let pid = child.id();
        let outcome = terminate(&mut child, pid, policy(2_000)).await;
        assert_eq!(outcome, StopOutcome::Terminated { code: None });
    }

    #[tokio::test]
    async fn process_ignoring_sigterm_is_killed() {
        let mut child = sh("trap '' TERM; while true; do sleep 1; done");
        let pid = child.id();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = terminate(&mut child, pid, policy(300)).await;
        assert_eq!(outcome, StopOutcome::Killed { code: None });
    }

    #[tokio::test]
    async fn exited_process_reports_already_exited() {
        let mut child = sh("exit 0");
        let _ = child.wait().await;
        let outcome = terminate(&mut child, None, policy(100)).await;
        assert_eq!(outcome, StopOutcome::AlreadyExited);
    }
}
