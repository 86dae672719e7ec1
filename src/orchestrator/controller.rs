//! Process controller.
//!
//! Owns the single session slot: start, stop (grace then force) and poll.
//! Each started session gets one drain task per output stream and one reaper
//! task that owns the `Child`; the reaper is the only place an exit status
//! is collected.

use super::output::{sanitize, OutputBuffer, StreamSource};
use super::terminate;
use crate::error::{StartError, StopError};
use crate::model::{ExitOutcome, LaunchConfig, LaunchableUnit, ProcessSession, SessionState};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// How long drains may lag behind process exit before they are aborted.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// How long a forced kill may take to be observed by the reaper.
const KILL_WAIT: Duration = Duration::from_secs(3);
/// Longest stored line; longer runs without a newline are split.
const MAX_LINE_BYTES: usize = 16 * 1024;

type SessionTx = Arc<watch::Sender<Option<ProcessSession>>>;

/// Result of a completed stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub final_state: SessionState,
    /// The grace window elapsed (or no graceful signal exists) and the
    /// process group was killed.
    pub forced: bool,
}

struct ActiveSession {
    id: u64,
    pid: u32,
    kill_tx: Option<oneshot::Sender<()>>,
}

pub struct ProcessController {
    cfg: LaunchConfig,
    output: OutputBuffer,
    slot: Mutex<Option<ActiveSession>>,
    session_tx: SessionTx,
    next_id: AtomicU64,
}

impl ProcessController {
    pub fn new(cfg: LaunchConfig) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            output: OutputBuffer::new(cfg.buffer_lines),
            cfg,
            slot: Mutex::new(None),
            session_tx: Arc::new(session_tx),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn grace(&self) -> Duration {
        self.cfg.grace
    }

    /// Change notifications for the current session record.
    pub fn subscribe(&self) -> watch::Receiver<Option<ProcessSession>> {
        self.session_tx.subscribe()
    }

    /// Current state of the tracked session, `Idle` if none was ever started.
    pub fn poll(&self) -> SessionState {
        self.session_tx
            .borrow()
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<ProcessSession> {
        self.session_tx.borrow().clone()
    }

    /// Spawn `unit`. Rejected while another session is non-terminal.
    pub fn start(&self, unit: &LaunchableUnit) -> Result<ProcessSession, StartError> {
        let mut slot = self.lock_slot();

        if let Some(current) = self.session().filter(|s| s.state.is_active()) {
            return Err(StartError::AlreadyActive {
                unit: current.unit.display_name,
            });
        }
        let (program, args) =
            unit.launch_command
                .split_first()
                .ok_or_else(|| StartError::EmptyCommand {
                    unit: unit.id.clone(),
                })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut session = ProcessSession {
            id,
            unit: unit.clone(),
            state: SessionState::Starting,
            pid: None,
            started_at: local_clock(),
        };
        self.session_tx.send_replace(Some(session.clone()));
        self.output.clear();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.cfg.working_dir)
            .envs(self.cfg.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        terminate::isolate(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return Err(self.spawn_failed(&mut slot, session, unit, source));
            }
        };

        let pid = match require_pid(child.id()) {
            Ok(pid) => pid,
            Err(source) => {
                let _ = child.start_kill();
                return Err(self.spawn_failed(&mut slot, session, unit, source));
            }
        };
        session.pid = Some(pid);
        session.state = SessionState::Running;
        self.session_tx.send_replace(Some(session.clone()));
        tracing::info!(unit = %unit.id, pid, command = %unit.command_line(), "session started");

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(
                stdout,
                StreamSource::Stdout,
                self.output.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(
                stderr,
                StreamSource::Stderr,
                self.output.clone(),
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(reap(
            child,
            id,
            pid,
            kill_rx,
            drains,
            self.session_tx.clone(),
        ));

        *slot = Some(ActiveSession {
            id,
            pid,
            kill_tx: Some(kill_tx),
        });
        Ok(session)
    }

    /// Graceful signal, wait up to the grace window, then force-kill.
    pub async fn stop(&self) -> Result<StopReport, StopError> {
        let (id, pid, kill_tx) = {
            let mut slot = self.lock_slot();
            let active = slot.as_mut().ok_or(StopError::NoActiveSession)?;
            self.mark_stopping(active.id)?;
            (active.id, active.pid, active.kill_tx.take())
        };
        let mut rx = self.session_tx.subscribe();
        tracing::info!(pid, "stopping session");

        if terminate::request_graceful(pid) {
            if let Some(state) = wait_terminal(&mut rx, id, self.cfg.grace).await {
                tracing::info!(pid, %state, "session stopped");
                return Ok(StopReport {
                    final_state: state,
                    forced: false,
                });
            }
            tracing::warn!(
                pid,
                grace = %humantime::format_duration(self.cfg.grace),
                "grace window elapsed, killing process group"
            );
        }

        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
        match wait_terminal(&mut rx, id, KILL_WAIT).await {
            Some(state) => {
                tracing::info!(pid, %state, "session killed");
                Ok(StopReport {
                    final_state: state,
                    forced: true,
                })
            }
            None => {
                tracing::error!(pid, "process survived a forced kill");
                Err(StopError::Unkillable { pid })
            }
        }
    }

    /// Publish `Failed`, leave the slot empty and build the start error.
    fn spawn_failed(
        &self,
        slot: &mut Option<ActiveSession>,
        mut session: ProcessSession,
        unit: &LaunchableUnit,
        source: std::io::Error,
    ) -> StartError {
        tracing::warn!(
            unit = %unit.id,
            command = %unit.command_line(),
            error = %source,
            "spawn failed"
        );
        session.state = SessionState::Failed(source.to_string());
        self.session_tx.send_replace(Some(session));
        *slot = None;
        StartError::Spawn {
            unit: unit.id.clone(),
            source,
        }
    }

    /// Running -> Stopping, checked and applied under the watch lock so the
    /// reaper cannot slip a terminal state in between.
    fn mark_stopping(&self, id: u64) -> Result<(), StopError> {
        let mut verdict = Err(StopError::NoActiveSession);
        self.session_tx.send_if_modified(|current| match current {
            Some(s) if s.id == id => match s.state {
                SessionState::Running => {
                    s.state = SessionState::Stopping;
                    verdict = Ok(());
                    true
                }
                SessionState::Stopping => {
                    verdict = Err(StopError::AlreadyStopping);
                    false
                }
                _ => false,
            },
            _ => false,
        });
        verdict
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A freshly spawned child always has a pid; `None` means it was already
/// reaped, and there is no process group left to signal.
fn require_pid(pid: Option<u32>) -> std::io::Result<u32> {
    pid.filter(|&pid| pid != 0).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            "process exited before its pid was known",
        )
    })
}

async fn wait_terminal(
    rx: &mut watch::Receiver<Option<ProcessSession>>,
    id: u64,
    limit: Duration,
) -> Option<SessionState> {
    let waited = tokio::time::timeout(
        limit,
        rx.wait_for(|current| match current {
            Some(s) if s.id == id => s.state.is_terminal(),
            // Replaced by a newer session: ours is long gone.
            _ => true,
        }),
    )
    .await;
    match waited {
        Ok(Ok(current)) => Some(
            (*current)
                .as_ref()
                .filter(|s| s.id == id)
                .map(|s| s.state.clone())
                .unwrap_or(SessionState::Idle),
        ),
        _ => None,
    }
}

/// Copy one stream into the buffer line by line until end-of-stream.
/// Lines longer than `MAX_LINE_BYTES` are split. Read errors become a marker
/// line instead of propagating.
async fn drain<R>(stream: R, source: StreamSource, output: OutputBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => output.append(source, sanitize(&String::from_utf8_lossy(&buf))),
            Err(e) => {
                output.append(StreamSource::System, format!("[{source} read error: {e}]"));
                break;
            }
        }
    }
}

async fn reap(
    mut child: Child,
    id: u64,
    pid: u32,
    mut kill_rx: oneshot::Receiver<()>,
    drains: Vec<JoinHandle<()>>,
    session_tx: SessionTx,
) {
    let natural = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = &mut kill_rx => None,
    };
    let waited = match natural {
        Some(status) => status,
        None => {
            terminate::force(&mut child, pid);
            child.wait().await
        }
    };

    for mut handle in drains {
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            // A grandchild still holds the pipe open.
            handle.abort();
        }
    }

    let state = match waited {
        Ok(status) => SessionState::Exited(ExitOutcome::from_status(status)),
        Err(e) => SessionState::Failed(format!("wait failed: {e}")),
    };
    tracing::info!(pid, %state, "session finished");
    session_tx.send_modify(|current| {
        if let Some(s) = current.as_mut().filter(|s| s.id == id) {
            s.state = state;
        }
    });
}

fn local_clock() -> String {
    let now =
        time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_else(|_| "now".into())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::UnitKind;
    use std::path::PathBuf;

    fn sh(script: &str) -> LaunchableUnit {
        LaunchableUnit {
            id: "test/sh".into(),
            display_name: "sh".into(),
            kind: UnitKind::Script,
            path: PathBuf::from("/bin/sh"),
            launch_command: vec!["/bin/sh".into(), "-c".into(), script.into()],
            description: String::new(),
            port: None,
        }
    }

    fn controller(buffer_lines: usize, grace: Duration) -> ProcessController {
        ProcessController::new(LaunchConfig {
            buffer_lines,
            grace,
            ..Default::default()
        })
    }

    async fn wait_exit(ctl: &ProcessController) -> SessionState {
        let id = ctl.session().unwrap().id;
        let mut rx = ctl.subscribe();
        wait_terminal(&mut rx, id, Duration::from_secs(10))
            .await
            .expect("session did not finish")
    }

    #[tokio::test]
    async fn quick_exit_reaches_exited_zero() {
        let ctl = controller(100, Duration::from_secs(2));
        let session = ctl.start(&sh("echo hello")).unwrap();
        assert_eq!(session.state, SessionState::Running);
        assert!(session.pid.is_some());

        let state = wait_exit(&ctl).await;
        assert_eq!(state, SessionState::Exited(ExitOutcome::Code(0)));
        assert_eq!(ctl.poll(), state);
        let texts: Vec<_> = ctl.output().snapshot().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, ["hello"]);
    }

    #[tokio::test]
    async fn nonzero_exit_code_and_stderr() {
        let ctl = controller(100, Duration::from_secs(2));
        ctl.start(&sh("echo oops >&2; exit 3")).unwrap();
        assert_eq!(wait_exit(&ctl).await, SessionState::Exited(ExitOutcome::Code(3)));
        let snap = ctl.output().snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].source, StreamSource::Stderr);
        assert_eq!(snap[0].text, "oops");
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let ctl = controller(100, Duration::from_secs(2));
        let first = ctl.start(&sh("exec sleep 30")).unwrap();

        let err = ctl.start(&sh("echo second")).unwrap_err();
        assert!(matches!(err, StartError::AlreadyActive { .. }));
        assert!(err.to_string().contains("session already active"));

        let current = ctl.session().unwrap();
        assert_eq!(current.id, first.id);
        assert_eq!(current.pid, first.pid);
        assert_eq!(current.state, SessionState::Running);

        ctl.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_long_running_within_grace() {
        let ctl = controller(100, Duration::from_secs(3));
        ctl.start(&sh("exec sleep 30")).unwrap();

        let report = ctl.stop().await.unwrap();
        assert!(!report.forced);
        assert_eq!(
            report.final_state,
            SessionState::Exited(ExitOutcome::Signaled(15))
        );
        assert_eq!(ctl.poll(), report.final_state);
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_kill() {
        let ctl = controller(100, Duration::from_millis(300));
        ctl.start(&sh("trap '' TERM; echo ready; while true; do sleep 0.1; done"))
            .unwrap();
        // Let the shell install its trap before signalling.
        for _ in 0..250 {
            if ctl.output().len() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(ctl.output().snapshot()[0].text, "ready");

        let report = ctl.stop().await.unwrap();
        assert!(report.forced);
        assert_eq!(
            report.final_state,
            SessionState::Exited(ExitOutcome::Signaled(9))
        );
    }

    #[tokio::test]
    async fn stop_without_session_is_an_error() {
        let ctl = controller(100, Duration::from_secs(1));
        assert_eq!(ctl.stop().await.unwrap_err(), StopError::NoActiveSession);
        assert_eq!(ctl.poll(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stop_after_exit_is_a_noop_error() {
        let ctl = controller(100, Duration::from_secs(1));
        ctl.start(&sh("true")).unwrap();
        wait_exit(&ctl).await;
        assert_eq!(ctl.stop().await.unwrap_err(), StopError::NoActiveSession);
        assert_eq!(ctl.poll(), SessionState::Exited(ExitOutcome::Code(0)));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_synchronously() {
        let ctl = controller(100, Duration::from_secs(1));
        let mut unit = sh("");
        unit.launch_command = vec!["/definitely/not/a/binary".into()];

        let err = ctl.start(&unit).unwrap_err();
        assert!(matches!(err, StartError::Spawn { .. }));
        assert!(matches!(ctl.poll(), SessionState::Failed(_)));

        // A failed session does not block the next launch.
        ctl.start(&sh("true")).unwrap();
        assert_eq!(wait_exit(&ctl).await, SessionState::Exited(ExitOutcome::Code(0)));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let ctl = controller(100, Duration::from_secs(1));
        let mut unit = sh("");
        unit.launch_command.clear();
        assert!(matches!(
            ctl.start(&unit),
            Err(StartError::EmptyCommand { .. })
        ));
        assert_eq!(ctl.poll(), SessionState::Idle);
    }

    #[tokio::test]
    async fn thousand_lines_into_five_hundred() {
        let ctl = controller(500, Duration::from_secs(2));
        ctl.start(&sh(
            "i=1; while [ $i -le 1000 ]; do echo \"line $i\"; i=$((i+1)); done",
        ))
        .unwrap();
        assert_eq!(wait_exit(&ctl).await, SessionState::Exited(ExitOutcome::Code(0)));

        let texts: Vec<String> = ctl.output().snapshot().into_iter().map(|l| l.text).collect();
        let expected: Vec<String> = (501..=1000).map(|i| format!("line {i}")).collect();
        assert_eq!(texts, expected);
    }

    /// Yields `data` once, then fails every read.
    struct FailingReader {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    std::task::Poll::Ready(Ok(()))
                }
                None => std::task::Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "device gone",
                ))),
            }
        }
    }

    #[tokio::test]
    async fn read_error_leaves_marker_after_earlier_lines() {
        let output = OutputBuffer::new(10);
        let reader = FailingReader {
            data: Some(b"one\ntwo\n"),
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            drain(reader, StreamSource::Stdout, output.clone()),
        )
        .await
        .expect("drain did not finish after a read error");

        let snap = output.snapshot();
        let texts: Vec<_> = snap.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "[stdout read error: device gone]"]);
        assert_eq!(snap[2].source, StreamSource::System);
        assert_eq!(snap[0].source, StreamSource::Stdout);
    }

    #[tokio::test]
    async fn endless_line_is_split_at_the_byte_cap() {
        let output = OutputBuffer::new(100);
        let data = vec![b'a'; MAX_LINE_BYTES * 3 + 10];
        drain(data.as_slice(), StreamSource::Stdout, output.clone()).await;

        let snap = output.snapshot();
        assert_eq!(snap.len(), 4);
        assert!(snap.iter().all(|l| l.text.len() <= MAX_LINE_BYTES));
        let total: usize = snap.iter().map(|l| l.text.len()).sum();
        assert_eq!(total, data.len());
    }

    #[tokio::test]
    async fn capped_line_count_stays_within_capacity() {
        let ctl = controller(10, Duration::from_secs(2));
        ctl.start(&sh("head -c 2000000 /dev/zero | tr '\\0' a")).unwrap();
        assert_eq!(wait_exit(&ctl).await, SessionState::Exited(ExitOutcome::Code(0)));

        let snap = ctl.output().snapshot();
        assert_eq!(snap.len(), 10);
        assert!(snap.iter().all(|l| l.text.len() <= MAX_LINE_BYTES));
    }

    #[test]
    fn missing_pid_is_a_spawn_error() {
        assert_eq!(require_pid(Some(42)).unwrap(), 42);
        assert!(require_pid(None).is_err());
        assert!(require_pid(Some(0)).is_err());
    }

    #[tokio::test]
    async fn new_session_clears_buffer() {
        let ctl = controller(100, Duration::from_secs(1));
        ctl.start(&sh("echo one")).unwrap();
        wait_exit(&ctl).await;
        ctl.start(&sh("echo two")).unwrap();
        wait_exit(&ctl).await;
        let texts: Vec<_> = ctl.output().snapshot().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, ["two"]);
    }
}
