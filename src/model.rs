use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where to look for launchable units and how to classify them.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub root: PathBuf,
    /// Category roots whose immediate subdirectories are candidate units.
    pub app_dirs: Vec<String>,
    /// Generic scripts areas whose top-level script files are candidate units.
    pub script_dirs: Vec<String>,
    pub exclude: Vec<String>,
    /// Tokens prepended to every launch command (e.g. `uv run`).
    pub runner: Vec<String>,
    pub python: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            app_dirs: vec!["apps".into()],
            script_dirs: vec!["scripts".into()],
            exclude: Vec::new(),
            runner: vec!["uv".into(), "run".into()],
            python: "python".into(),
        }
    }
}

/// How sessions are spawned and torn down.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub buffer_lines: usize,
    pub grace: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            env: Vec::new(),
            buffer_lines: 1000,
            grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub discovery: DiscoveryConfig,
    pub launch: LaunchConfig,
    pub tick: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Web,
    Cli,
    Tui,
    Gui,
    Script,
    Unknown,
}

impl UnitKind {
    pub fn label(self) -> &'static str {
        match self {
            UnitKind::Web => "WEB",
            UnitKind::Cli => "CLI",
            UnitKind::Tui => "TUI",
            UnitKind::Gui => "GUI",
            UnitKind::Script => "SCRIPT",
            UnitKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One discovered, runnable application entry. Never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchableUnit {
    /// Root-relative path with `/` separators, unique within one catalog snapshot.
    pub id: String,
    pub display_name: String,
    pub kind: UnitKind,
    /// Entry point file.
    pub path: PathBuf,
    pub launch_command: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl LaunchableUnit {
    pub fn command_line(&self) -> String {
        self.launch_command.join(" ")
    }

    pub fn url(&self) -> Option<String> {
        match (self.kind, self.port) {
            (UnitKind::Web, Some(port)) => Some(format!("http://localhost:{port}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    Code(i32),
    Signaled(i32),
    Unknown,
}

impl ExitOutcome {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitOutcome::Signaled(sig);
            }
        }
        ExitOutcome::Unknown
    }

    pub fn success(self) -> bool {
        self == ExitOutcome::Code(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "code {code}"),
            ExitOutcome::Signaled(sig) => write!(f, "signal {sig}"),
            ExitOutcome::Unknown => f.write_str("unknown status"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Exited(ExitOutcome),
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Exited(_) | SessionState::Failed(_)
        )
    }

    /// Starting, Running or Stopping: a session that blocks new launches.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Starting => f.write_str("starting"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopping => f.write_str("stopping"),
            SessionState::Exited(outcome) => write!(f, "exited ({outcome})"),
            SessionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Lifecycle record of one spawned child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSession {
    pub id: u64,
    pub unit: LaunchableUnit,
    pub state: SessionState,
    pub pid: Option<u32>,
    /// Local wall-clock start time, formatted for display.
    pub started_at: String,
}
