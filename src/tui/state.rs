use crate::model::{LaunchableUnit, ProcessSession, SessionState};
use crate::orchestrator::LauncherEvent;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::sync::Arc;

/// Lines moved by PageUp/PageDown in the live view.
const PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Menu,
    LiveView,
    Exiting,
}

/// Requests the shell loop carries out on behalf of a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Launch(LaunchableUnit),
    Stop,
    Refresh,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub text: String,
    pub error: bool,
}

/// Owned by the UI thread only.
pub struct UiState {
    pub screen: Screen,
    pub units: Arc<Vec<LaunchableUnit>>,
    pub selected: usize,
    pub banner: Option<Banner>,
    pub show_help: bool,
    /// Lines scrolled back from the newest output; 0 follows the tail.
    pub scroll_back: usize,
    /// The tracked session, including one that already ended.
    pub session: Option<ProcessSession>,
    /// A launch was sent and its outcome has not arrived yet.
    pub launching: bool,
    pub stopping: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            screen: Screen::Menu,
            units: Arc::new(Vec::new()),
            selected: 0,
            banner: None,
            show_help: false,
            scroll_back: 0,
            session: None,
            launching: false,
            stopping: false,
        }
    }
}

impl UiState {
    pub fn new(units: Arc<Vec<LaunchableUnit>>) -> Self {
        Self {
            units,
            ..Default::default()
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.banner = Some(Banner {
            text: text.into(),
            error: false,
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.banner = Some(Banner {
            text: text.into(),
            error: true,
        });
    }

    /// Install a freshly refreshed unit list, keeping the cursor in range.
    pub fn set_units(&mut self, units: Arc<Vec<LaunchableUnit>>) {
        self.units = units;
        self.selected = self.selected.min(self.units.len().saturating_sub(1));
        self.info(format!("Found {} applications", self.units.len()));
    }

    pub fn session_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state.is_active())
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        if self.show_help {
            // Any key closes help; `q`/Ctrl-C still fall through.
            self.show_help = false;
            if !is_quit(&key) {
                return None;
            }
        }
        match self.screen {
            Screen::Menu => self.handle_menu_key(key),
            Screen::LiveView => self.handle_live_key(key),
            Screen::Exiting => None,
        }
    }

    fn handle_menu_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        if is_quit(&key) {
            self.screen = Screen::Exiting;
            return Some(UiAction::Quit);
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.units.len() {
                    self.selected += 1;
                }
                None
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                if index < self.units.len() {
                    self.selected = index;
                }
                None
            }
            KeyCode::Enter => {
                if self.launching {
                    return None;
                }
                let unit = self.units.get(self.selected)?.clone();
                self.launching = true;
                self.info(format!("Starting {}…", unit.display_name));
                Some(UiAction::Launch(unit))
            }
            KeyCode::Char('r') => Some(UiAction::Refresh),
            KeyCode::Char('v') => {
                if self.session.is_some() {
                    self.screen = Screen::LiveView;
                    self.scroll_back = 0;
                } else {
                    self.info("Nothing to view");
                }
                None
            }
            KeyCode::Char('x') => self.request_stop(),
            KeyCode::Char('?') => {
                self.show_help = true;
                None
            }
            _ => None,
        }
    }

    fn handle_live_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c || key.code == KeyCode::Char('x') {
            if self.session_active() {
                return self.request_stop();
            }
            // Nothing left to stop: the interrupt just leaves the view.
            self.screen = Screen::Menu;
            self.scroll_back = 0;
            return None;
        }
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('b') => {
                self.screen = Screen::Menu;
                self.scroll_back = 0;
                if self.session_active() {
                    self.info("Session keeps running; press v to view, x to stop");
                }
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.scroll_back += 1;
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.scroll_back = self.scroll_back.saturating_sub(1);
                None
            }
            KeyCode::PageUp => {
                self.scroll_back += PAGE;
                None
            }
            KeyCode::PageDown => {
                self.scroll_back = self.scroll_back.saturating_sub(PAGE);
                None
            }
            KeyCode::End => {
                self.scroll_back = 0;
                None
            }
            KeyCode::Char('?') => {
                self.show_help = true;
                None
            }
            _ => None,
        }
    }

    /// Stop requests always go to the controller, which owns the verdict.
    fn request_stop(&mut self) -> Option<UiAction> {
        if self.stopping {
            return None;
        }
        Some(UiAction::Stop)
    }

    pub fn apply_event(&mut self, ev: LauncherEvent) {
        match ev {
            LauncherEvent::Started(session) => {
                self.launching = false;
                self.stopping = false;
                self.banner = None;
                self.scroll_back = 0;
                self.session = Some(session);
                self.screen = Screen::LiveView;
            }
            LauncherEvent::StartFailed(msg) => {
                self.launching = false;
                self.screen = Screen::Menu;
                self.error(msg);
            }
            LauncherEvent::Stopping => {
                self.stopping = true;
                if let Some(s) = self.session.as_mut() {
                    s.state = SessionState::Stopping;
                }
                self.info("Stopping…");
            }
            LauncherEvent::Stopped(report) => {
                self.stopping = false;
                let name = self.session_name();
                if let Some(s) = self.session.as_mut() {
                    s.state = report.final_state.clone();
                }
                let how = if report.forced { "killed" } else { "stopped" };
                self.info(format!("{name} {how} ({})", report.final_state));
                if self.screen == Screen::LiveView {
                    self.screen = Screen::Menu;
                    self.scroll_back = 0;
                }
            }
            LauncherEvent::StopFailed(msg) => {
                self.stopping = false;
                self.error(msg);
            }
            LauncherEvent::Exited(session) => {
                let msg = format!("{} {}", session.unit.display_name, session.state);
                let failed = !matches!(
                    session.state,
                    SessionState::Exited(outcome) if outcome.success()
                );
                self.session = Some(session);
                if failed {
                    self.error(msg);
                } else {
                    self.info(msg);
                }
            }
            LauncherEvent::Info(msg) => self.info(msg),
            LauncherEvent::Shutdown => self.screen = Screen::Exiting,
        }
    }

    fn session_name(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.unit.display_name.clone())
            .unwrap_or_default()
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('q')
        || (key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c'))
}
