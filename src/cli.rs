use crate::catalog::Catalog;
use crate::discovery::describe::truncate;
use crate::model::{
    DiscoveryConfig, ExitOutcome, LaunchConfig, LaunchableUnit, RunConfig, SessionState,
};
use crate::orchestrator::{OutputLine, ProcessController, StopReport, StreamSource};
use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum WriterLine {
    Stdout(String),
    Stderr(String),
}

impl From<OutputLine> for WriterLine {
    fn from(line: OutputLine) -> Self {
        match line.source {
            StreamSource::Stdout => WriterLine::Stdout(line.text),
            StreamSource::Stderr | StreamSource::System => WriterLine::Stderr(line.text),
        }
    }
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
/// Locks are taken per line: the tracing subscriber shares stderr.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<WriterLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriterLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();

        while let Some(line) = rx.blocking_recv() {
            match line {
                WriterLine::Stdout(msg) => {
                    let _ = writeln!(stdout.lock(), "{}", msg);
                }
                WriterLine::Stderr(msg) => {
                    let _ = writeln!(stderr.lock(), "{}", msg);
                }
            }
        }

        let _ = stdout.lock().flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "monolith-launcher",
    version,
    about = "Discover and run the applications of a monorepo from one terminal menu"
)]
pub struct Cli {
    /// Repository root to scan; also the working directory of launched apps
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Category root whose subdirectories are applications (repeatable)
    #[arg(long = "app-dir", default_value = "apps")]
    pub app_dirs: Vec<String>,

    /// Scripts area whose top-level script files are runnable (repeatable)
    #[arg(long = "script-dir", default_value = "scripts")]
    pub script_dirs: Vec<String>,

    /// Directory or file names to skip during discovery (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Prefix prepended to every launch command; empty for none
    #[arg(long, default_value = "uv run")]
    pub runner: String,

    /// Interpreter used in launch commands
    #[arg(long, default_value = "python")]
    pub python: String,

    /// Extra environment for launched apps, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Number of output lines kept per session
    #[arg(long, default_value_t = 1000, value_parser = parse_capacity)]
    pub buffer_lines: usize,

    /// Time between the graceful stop signal and a forced kill
    #[arg(long, default_value = "5s")]
    pub grace: humantime::Duration,

    /// Live view refresh interval
    #[arg(long, default_value = "100ms")]
    pub tick: humantime::Duration,

    /// Print the discovered applications and exit (no TUI)
    #[arg(long, conflicts_with_all = ["json", "run"])]
    pub list: bool,

    /// Print the discovered applications as JSON and exit (no TUI)
    #[arg(long, conflicts_with = "run")]
    pub json: bool,

    /// Run one application by id without the menu, streaming its output
    #[arg(long, value_name = "ID")]
    pub run: Option<String>,

    /// Log file used while the interactive shell owns the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Whether this invocation opens the interactive shell.
    pub fn is_interactive(&self) -> bool {
        !self.list && !self.json && self.run.is_none() && cfg!(feature = "tui")
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_capacity(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("buffer must hold at least one line".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    let root = args.root.clone();

    let mut env: Vec<(String, String)> = vec![
        ("PYTHONPATH".into(), root.display().to_string()),
        ("PYTHONUNBUFFERED".into(), "1".into()),
    ];
    for (key, value) in &args.env {
        match env.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.clone(),
            None => env.push((key.clone(), value.clone())),
        }
    }

    RunConfig {
        discovery: DiscoveryConfig {
            root: root.clone(),
            app_dirs: args.app_dirs.clone(),
            script_dirs: args.script_dirs.clone(),
            exclude: args.exclude.clone(),
            runner: args.runner.split_whitespace().map(str::to_string).collect(),
            python: args.python.clone(),
        },
        launch: LaunchConfig {
            working_dir: root,
            env,
            buffer_lines: args.buffer_lines,
            grace: Duration::from(args.grace),
        },
        tick: Duration::from(args.tick),
    }
}

/// Dispatch to the selected mode. Returns the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let cfg = build_config(&args);

    if let Some(id) = args.run.as_deref() {
        return run_headless(cfg, id).await;
    }
    if args.json {
        return run_json(cfg);
    }

    if !args.list {
        #[cfg(feature = "tui")]
        {
            crate::tui::run(cfg).await?;
            return Ok(0);
        }
    }

    run_list(cfg)
}

fn load_catalog(cfg: &RunConfig) -> Result<Catalog> {
    let catalog = Catalog::new(cfg.discovery.clone());
    catalog.refresh().context("discovery failed")?;
    Ok(catalog)
}

/// Aligned text rows: index, kind, id, description.
fn format_listing(units: &[LaunchableUnit]) -> Vec<String> {
    let id_width = units.iter().map(|u| u.id.len()).max().unwrap_or(0);
    units
        .iter()
        .enumerate()
        .map(|(i, u)| {
            format!(
                "{:>3}  {:<7} {:<id_width$}  {}",
                i + 1,
                u.kind.label(),
                u.id,
                truncate(&u.description, 60),
            )
        })
        .collect()
}

fn run_list(cfg: RunConfig) -> Result<i32> {
    let catalog = load_catalog(&cfg)?;
    let units = catalog.list();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in format_listing(&units) {
        writeln!(out, "{line}")?;
    }
    writeln!(out, "Found {} applications", units.len())?;
    Ok(0)
}

fn run_json(cfg: RunConfig) -> Result<i32> {
    let catalog = load_catalog(&cfg)?;
    let out = serde_json::to_string_pretty(catalog.list().as_slice())?;
    println!("{out}");
    Ok(0)
}

/// Shell convention: 128 + signal number for signal deaths.
fn exit_code(state: &SessionState) -> i32 {
    match state {
        SessionState::Exited(ExitOutcome::Code(code)) => *code,
        SessionState::Exited(ExitOutcome::Signaled(sig)) => 128 + sig,
        SessionState::Exited(ExitOutcome::Unknown) | SessionState::Failed(_) => 1,
        _ => 0,
    }
}

async fn run_headless(cfg: RunConfig, id: &str) -> Result<i32> {
    let catalog = load_catalog(&cfg)?;
    let unit = catalog.get(id)?;
    let controller = ProcessController::new(cfg.launch.clone());

    let (out_tx, out_handle) = spawn_output_writer();
    let streamed = stream_session(
        &controller,
        &unit,
        &out_tx,
        crate::orchestrator::shutdown_signal(),
    )
    .await;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(exit_code(&streamed?))
}

/// Start `unit` and forward every output line until the session ends.
/// `signal` resolving stops the session.
async fn stream_session(
    controller: &ProcessController,
    unit: &LaunchableUnit,
    out_tx: &mpsc::UnboundedSender<WriterLine>,
    signal: impl Future<Output = ()>,
) -> Result<SessionState> {
    // Both before start, so no line and no state change is missed.
    let mut lines = controller.output().tap();
    let mut session_rx = controller.subscribe();
    let session = controller.start(unit)?;

    let note = |msg: String| {
        let _ = out_tx.send(WriterLine::Stderr(msg));
    };
    note(format!(
        "Started {} (pid {}): {}",
        unit.display_name,
        session.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
        unit.command_line()
    ));
    if let Some(url) = unit.url() {
        note(format!("Serving on {url}"));
    }

    tokio::pin!(signal);
    let mut signalled = false;
    let final_state = loop {
        tokio::select! {
            Some(line) = lines.recv() => {
                let _ = out_tx.send(line.into());
            }
            changed = session_rx.changed() => {
                let state = controller.poll();
                if changed.is_err() || state.is_terminal() {
                    break state;
                }
            }
            _ = &mut signal, if !signalled => {
                signalled = true;
                note("Stopping…".into());
                match controller.stop().await {
                    Ok(StopReport { forced: true, .. }) => {
                        note(format!(
                            "Killed after {}",
                            humantime::format_duration(controller.grace())
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "stop failed"),
                }
            }
        }
    };
    // Drains finish before the terminal state is published.
    while let Ok(line) = lines.try_recv() {
        let _ = out_tx.send(line.into());
    }
    note(format!("{} {}", unit.display_name, final_state));
    Ok(final_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitKind;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["monolith-launcher"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_python_monorepo_layout() {
        let cfg = build_config(&parse(&[]));
        assert_eq!(cfg.discovery.app_dirs, ["apps"]);
        assert_eq!(cfg.discovery.script_dirs, ["scripts"]);
        assert_eq!(cfg.discovery.runner, ["uv", "run"]);
        assert_eq!(cfg.launch.buffer_lines, 1000);
        assert_eq!(cfg.launch.grace, Duration::from_secs(5));
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert!(cfg
            .launch
            .env
            .contains(&("PYTHONUNBUFFERED".to_string(), "1".to_string())));
    }

    #[test]
    fn env_flags_override_defaults() {
        let cfg = build_config(&parse(&[
            "--root",
            "/srv/repo",
            "--env",
            "PYTHONPATH=/opt/lib",
            "--env",
            "DEBUG=1",
        ]));
        let env = &cfg.launch.env;
        assert_eq!(env.iter().filter(|(k, _)| k == "PYTHONPATH").count(), 1);
        assert!(env.contains(&("PYTHONPATH".to_string(), "/opt/lib".to_string())));
        assert!(env.contains(&("DEBUG".to_string(), "1".to_string())));
        assert_eq!(cfg.launch.working_dir, PathBuf::from("/srv/repo"));
    }

    #[test]
    fn empty_runner_means_no_prefix() {
        let cfg = build_config(&parse(&["--runner", "", "--python", "python3"]));
        assert!(cfg.discovery.runner.is_empty());
        assert_eq!(cfg.discovery.python, "python3");
    }

    #[test]
    fn repeatable_dirs_replace_defaults() {
        let cfg = build_config(&parse(&["--app-dir", "services", "--app-dir", "tools"]));
        assert_eq!(cfg.discovery.app_dirs, ["services", "tools"]);
    }

    #[test]
    fn rejects_bad_values() {
        let argv = ["monolith-launcher", "--env", "NOVALUE"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["monolith-launcher", "--buffer-lines", "0"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["monolith-launcher", "--list", "--json"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["monolith-launcher", "--json", "--run", "apps/web"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn exit_codes_mirror_child() {
        assert_eq!(exit_code(&SessionState::Exited(ExitOutcome::Code(3))), 3);
        assert_eq!(exit_code(&SessionState::Exited(ExitOutcome::Signaled(15))), 143);
        assert_eq!(exit_code(&SessionState::Failed("boom".into())), 1);
    }

    #[test]
    fn listing_is_aligned() {
        let unit = |id: &str, kind| LaunchableUnit {
            id: id.into(),
            display_name: id.into(),
            kind,
            path: PathBuf::from(id),
            launch_command: vec!["python".into()],
            description: "Demo".into(),
            port: None,
        };
        let rows = format_listing(&[
            unit("apps/web", UnitKind::Web),
            unit("scripts/x.py", UnitKind::Script),
        ]);
        assert_eq!(rows[0], "  1  WEB     apps/web      Demo");
        assert_eq!(rows[1], "  2  SCRIPT  scripts/x.py  Demo");
    }

    #[cfg(unix)]
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

    #[cfg(unix)]
    fn split(rx: &mut mpsc::UnboundedReceiver<WriterLine>) -> (Vec<String>, Vec<String>) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        while let Ok(line) = rx.try_recv() {
            match line {
                WriterLine::Stdout(s) => out.push(s),
                WriterLine::Stderr(s) => err.push(s),
            }
        }
        (out, err)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn headless_forwards_more_lines_than_the_buffer_holds() {
        let controller = ProcessController::new(LaunchConfig {
            buffer_lines: 100,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = tokio::time::timeout(
            Duration::from_secs(30),
            stream_session(
                &controller,
                &sh("i=1; while [ $i -le 5000 ]; do echo $i; i=$((i+1)); done; echo done >&2"),
                &tx,
                futures::future::pending(),
            ),
        )
        .await
        .expect("headless session did not finish")
        .unwrap();
        assert_eq!(state, SessionState::Exited(ExitOutcome::Code(0)));

        let (out, err) = split(&mut rx);
        let expected: Vec<String> = (1..=5000).map(|i| i.to_string()).collect();
        assert_eq!(out, expected);
        assert!(err[0].starts_with("Started sh (pid "));
        assert!(err.contains(&"done".to_string()));
        assert_eq!(err.last().map(String::as_str), Some("sh exited (code 0)"));
        assert!(controller.output().len() <= 100);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn headless_signal_stops_the_child() {
        let controller = ProcessController::new(LaunchConfig {
            grace: Duration::from_secs(3),
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = tokio::time::timeout(
            Duration::from_secs(10),
            stream_session(
                &controller,
                &sh("exec sleep 30"),
                &tx,
                tokio::time::sleep(Duration::from_millis(200)),
            ),
        )
        .await
        .expect("headless session ignored the stop")
        .unwrap();
        assert_eq!(state, SessionState::Exited(ExitOutcome::Signaled(15)));
        assert_eq!(exit_code(&state), 143);

        let (_, err) = split(&mut rx);
        assert!(err.contains(&"Stopping…".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn headless_run_finishes_while_logging_to_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("scripts")).unwrap();
        std::fs::write(tmp.path().join("scripts/hi.py"), "echo hi\nexit 4\n").unwrap();
        let root = tmp.path().display().to_string();
        let cfg = build_config(&parse(&["--root", &root, "--runner", "", "--python", "sh"]));

        // Session start and finish both log to stderr while the writer runs.
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_max_level(tracing::Level::INFO)
                .finish(),
        );
        let code = tokio::time::timeout(
            Duration::from_secs(10),
            run_headless(cfg, "scripts/hi.py"),
        )
        .await
        .expect("headless run hung")
        .unwrap();
        assert_eq!(code, 4);
    }

    #[tokio::test]
    async fn headless_unknown_id_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().display().to_string();
        let cfg = build_config(&parse(&["--root", &root]));
        let err = run_headless(cfg, "apps/missing").await.unwrap_err();
        assert!(err.to_string().contains("apps/missing"));
    }
}
