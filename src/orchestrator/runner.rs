//! Session lifecycle loop.
//!
//! Receives launch/stop/quit commands from the shell, drives the process
//! controller and emits events back. Stops run as a tracked task so the
//! loop keeps answering while a grace window elapses.

use super::controller::{ProcessController, StopReport};
use crate::error::StopError;
use crate::model::{LaunchableUnit, ProcessSession};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Commands emitted by the shell.
#[derive(Debug, Clone)]
pub enum UiCommand {
    Launch(LaunchableUnit),
    Stop,
    Quit,
}

/// Events emitted back to the shell.
#[derive(Debug, Clone)]
pub enum LauncherEvent {
    Started(ProcessSession),
    StartFailed(String),
    Stopping,
    Stopped(StopReport),
    StopFailed(String),
    /// The session ended on its own.
    Exited(ProcessSession),
    Info(String),
    /// An external signal asked the launcher to shut down.
    Shutdown,
}

type StopTask = JoinHandle<Result<StopReport, StopError>>;

fn spawn_stop(controller: &Arc<ProcessController>) -> StopTask {
    let controller = controller.clone();
    tokio::spawn(async move { controller.stop().await })
}

fn grace_deadline(controller: &ProcessController) -> tokio::time::Instant {
    tokio::time::Instant::now() + controller.grace()
}

pub async fn run_controller(
    controller: Arc<ProcessController>,
    event_tx: UnboundedSender<LauncherEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut session_rx = controller.subscribe();
    let mut stop_task: Option<StopTask> = None;
    let mut quit_pending = false;
    // Last session whose end was already announced, so a stop is not also
    // reported as a natural exit.
    let mut announced: Option<u64> = None;
    let mut stop_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    let mut shutdown = Box::pin(shutdown_signal());
    let mut signalled = false;
    let mut commands_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                // Closed: recv would resolve immediately from now on.
                commands_open = cmd.is_some();
                match cmd {
                    Some(UiCommand::Launch(unit)) => match controller.start(&unit) {
                        Ok(session) => {
                            let _ = event_tx.send(LauncherEvent::Started(session));
                        }
                        Err(e) => {
                            let _ = event_tx.send(LauncherEvent::StartFailed(e.to_string()));
                        }
                    },
                    Some(UiCommand::Stop) => {
                        if stop_task.is_some() {
                            let _ = event_tx
                                .send(LauncherEvent::Info("Already stopping…".into()));
                        } else if controller.poll().is_active() {
                            stop_task = Some(spawn_stop(&controller));
                            stop_deadline = Some(grace_deadline(&controller));
                            let _ = event_tx.send(LauncherEvent::Stopping);
                        } else {
                            let _ = event_tx.send(LauncherEvent::StopFailed(
                                StopError::NoActiveSession.to_string(),
                            ));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if stop_task.is_none() {
                            if !controller.poll().is_active() {
                                break;
                            }
                            stop_task = Some(spawn_stop(&controller));
                            stop_deadline = Some(grace_deadline(&controller));
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it is
            // dropped when another branch is chosen and completion is never seen.
            maybe_done = async {
                if let Some(h) = stop_task.as_mut() {
                    return Some(h.await);
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    stop_task = None;
                    stop_deadline = None;
                    announced = controller.session().map(|s| s.id);
                    match join_res {
                        Ok(Ok(report)) => {
                            let _ = event_tx.send(LauncherEvent::Stopped(report));
                        }
                        Ok(Err(e)) => {
                            let _ = event_tx.send(LauncherEvent::StopFailed(e.to_string()));
                        }
                        Err(e) => {
                            let _ = event_tx.send(LauncherEvent::StopFailed(format!(
                                "stop task failed: {e}"
                            )));
                        }
                    }
                    if quit_pending {
                        break;
                    }
                }
            }
            Ok(()) = session_rx.changed() => {
                let current = session_rx.borrow_and_update().clone();
                if let Some(session) = current {
                    let finished = session.state.is_terminal() && session.pid.is_some();
                    if finished && stop_task.is_none() && announced != Some(session.id) {
                        announced = Some(session.id);
                        let _ = event_tx.send(LauncherEvent::Exited(session));
                    }
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = stop_deadline {
                    if tokio::time::Instant::now() >= deadline && stop_task.is_some() {
                        let _ = event_tx.send(LauncherEvent::Info(
                            "Grace window elapsed, killing…".into(),
                        ));
                        stop_deadline = None;
                    }
                }
            }
            _ = &mut shutdown, if !signalled => {
                signalled = true;
                tracing::info!("shutdown signal received");
                let _ = event_tx.send(LauncherEvent::Shutdown);
                quit_pending = true;
                if stop_task.is_none() {
                    if !controller.poll().is_active() {
                        break;
                    }
                    stop_task = Some(spawn_stop(&controller));
                }
            }
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
