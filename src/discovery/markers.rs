//! Marker sniffing and kind classification.
//!
//! `sniff` turns an entry file (plus its directory) into a `Markers` set;
//! `classify` is a pure function from that set to a `UnitKind`.

use crate::model::UnitKind;
use std::path::Path;

const WEB_MARKERS: &[&str] = &["fastapi", "flask", "django", "starlette", "uvicorn"];
const GUI_MARKERS: &[&str] = &["nicegui", "tkinter", "pygame", "kivy", "pyside", "pyqt"];
const TUI_MARKERS: &[&str] = &["from textual", "import textual", "textual.app", "curses"];
const CLI_MARKERS: &[&str] = &["typer", "click.command", "@app.command", "argparse"];

/// Directories that mark a web app even when the entry names no framework.
const WEB_DIRS: &[&str] = &["templates", "static"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Markers {
    pub entry_point: bool,
    pub web: bool,
    pub gui: bool,
    pub tui: bool,
    pub cli: bool,
    /// Entry is a standalone file in a scripts area.
    pub standalone: bool,
}

/// Priority: Web > GUI > TUI > CLI > Script > Unknown. `None` when there is
/// nothing to run.
pub fn classify(m: &Markers) -> Option<UnitKind> {
    if !m.entry_point {
        return None;
    }
    let kind = if m.web {
        UnitKind::Web
    } else if m.gui {
        UnitKind::Gui
    } else if m.tui {
        UnitKind::Tui
    } else if m.cli {
        UnitKind::Cli
    } else if m.standalone {
        UnitKind::Script
    } else {
        UnitKind::Unknown
    };
    Some(kind)
}

/// Inspect entry file content (and, for directory units, the unit directory).
pub fn sniff(content: &str, unit_dir: Option<&Path>, standalone: bool) -> Markers {
    let lower = content.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    let web_dir = unit_dir
        .map(|dir| WEB_DIRS.iter().any(|d| dir.join(d).is_dir()))
        .unwrap_or(false);

    Markers {
        entry_point: true,
        web: any(WEB_MARKERS) || web_dir,
        gui: any(GUI_MARKERS),
        tui: any(TUI_MARKERS),
        cli: any(CLI_MARKERS),
        standalone,
    }
}

/// Whether the entry file is served through uvicorn's `module:app` form.
pub fn is_asgi_app(content: &str) -> bool {
    content.to_lowercase().contains("fastapi")
}
