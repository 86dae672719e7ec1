mod help;
mod state;

use crate::catalog::Catalog;
use crate::discovery::describe::truncate;
use crate::model::{RunConfig, SessionState};
use crate::orchestrator::{
    self, LauncherEvent, OutputBuffer, ProcessController, StreamSource, UiCommand,
};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use state::{Screen, UiAction, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(cfg: RunConfig) -> Result<()> {
    // Unbounded channels avoid backpressure between the UI thread and the runtime.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<LauncherEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let catalog = Arc::new(Catalog::new(cfg.discovery.clone()));
    let controller = Arc::new(ProcessController::new(cfg.launch.clone()));

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_catalog = catalog.clone();
    let ui_controller = controller.clone();
    let tick = cfg.tick;
    let ui_handle = std::thread::spawn(move || {
        run_threaded(ui_catalog, ui_controller, tick, event_rx, cmd_tx)
    });

    let res = orchestrator::run_controller(controller, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    catalog: Arc<Catalog>,
    controller: Arc<ProcessController>,
    tick_rate: Duration,
    mut event_rx: UnboundedReceiver<LauncherEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let found = catalog.refresh();
    let mut state = UiState::new(catalog.list());
    match found {
        Ok(count) => state.info(format!("Found {count} applications")),
        Err(e) => state.error(format!("Discovery failed: {e}")),
    }

    let overdue = || Instant::now().checked_sub(tick_rate).unwrap_or_else(Instant::now);
    let mut last_tick = overdue();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }
        if state.screen == Screen::Exiting {
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            let live = controller.poll();
            terminal
                .draw(|f| draw(f.area(), f, &state, &live, controller.output()))
                .ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match state.handle_key(k) {
                    Some(UiAction::Launch(unit)) => {
                        let _ = cmd_tx.send(UiCommand::Launch(unit));
                    }
                    Some(UiAction::Stop) => {
                        let _ = cmd_tx.send(UiCommand::Stop);
                    }
                    Some(UiAction::Refresh) => match catalog.refresh() {
                        Ok(_) => state.set_units(catalog.list()),
                        Err(e) => state.error(format!("Refresh failed: {e}")),
                    },
                    Some(UiAction::Quit) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    None => {}
                }
                // Redraw right away so key feedback does not wait for the tick.
                last_tick = overdue();
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();

    if let Some(session) = state.session.as_ref().filter(|_| controller.poll().is_active()) {
        eprintln!("Stopping {}…", session.unit.display_name);
    }
    res
}

fn draw(
    area: Rect,
    f: &mut ratatui::Frame,
    state: &UiState,
    live: &SessionState,
    output: &OutputBuffer,
) {
    match state.screen {
        Screen::LiveView => draw_live(area, f, state, live, output),
        _ => draw_menu(area, f, state, live),
    }
    if state.show_help {
        help::draw_help(area, f, state.screen);
    }
}

fn banner_line(state: &UiState) -> Line<'static> {
    match &state.banner {
        Some(b) if b.error => Line::from(Span::styled(
            b.text.clone(),
            Style::default().fg(Color::Red),
        )),
        Some(b) => Line::from(Span::styled(
            b.text.clone(),
            Style::default().fg(Color::Yellow),
        )),
        None => Line::from(""),
    }
}

fn hint(key: &'static str, what: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(format!(" {what}  ")),
    ]
}

fn draw_menu(area: Rect, f: &mut ratatui::Frame, state: &UiState, live: &SessionState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(4),
        ])
        .split(area);

    let title = Paragraph::new(Line::from(vec![
        Span::styled("Applications", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(
            format!("Found {} applications", state.units.len()),
            Style::default().fg(Color::Gray),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("monolith-launcher"),
    );
    f.render_widget(title, chunks[0]);

    let visible = chunks[1].height.saturating_sub(2).max(1) as usize;
    let offset = state.selected.saturating_sub(visible - 1);
    let name_width = state
        .units
        .iter()
        .map(|u| u.display_name.chars().count())
        .max()
        .unwrap_or(0);
    let rows: Vec<Line> = if state.units.is_empty() {
        vec![Line::from(Span::styled(
            "No applications found",
            Style::default().fg(Color::Gray),
        ))]
    } else {
        state
            .units
            .iter()
            .enumerate()
            .skip(offset)
            .take(visible)
            .map(|(i, u)| {
                let selected = i == state.selected;
                let marker = if selected { "> " } else { "  " };
                let row_style = if selected {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Line::from(vec![
                    Span::styled(format!("{marker}{:>2}. ", i + 1), row_style),
                    Span::styled(format!("{:<7}", u.kind.label()), kind_style(u.kind)),
                    Span::styled(format!("{:<name_width$}  ", u.display_name), row_style),
                    Span::styled(
                        truncate(&u.description, 60),
                        Style::default().fg(Color::Gray),
                    ),
                ])
            })
            .collect()
    };
    let list = Paragraph::new(rows).block(Block::default().borders(Borders::ALL));
    f.render_widget(list, chunks[1]);

    let mut footer = vec![banner_line(state)];
    match state.session.as_ref() {
        Some(s) if live.is_active() => {
            let mut spans = vec![
                Span::styled("● ", Style::default().fg(Color::Green)),
                Span::raw(format!("{} is {live}  ", s.unit.display_name)),
            ];
            spans.extend(hint("v", "view"));
            spans.extend(hint("x", "stop"));
            footer.push(Line::from(spans));
        }
        _ => {
            let mut spans = Vec::new();
            for (k, w) in [
                ("enter", "run"),
                ("r", "refresh"),
                ("?", "help"),
                ("q", "quit"),
            ] {
                spans.extend(hint(k, w));
            }
            footer.push(Line::from(spans));
        }
    }
    let footer = Paragraph::new(footer).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[2]);
}

fn kind_style(kind: crate::model::UnitKind) -> Style {
    use crate::model::UnitKind;
    let color = match kind {
        UnitKind::Web => Color::Cyan,
        UnitKind::Cli => Color::Green,
        UnitKind::Tui => Color::Magenta,
        UnitKind::Gui => Color::Blue,
        UnitKind::Script => Color::Yellow,
        UnitKind::Unknown => Color::Gray,
    };
    Style::default().fg(color)
}

fn state_style(live: &SessionState) -> Style {
    match live {
        SessionState::Running => Style::default().fg(Color::Green),
        SessionState::Starting | SessionState::Stopping => Style::default().fg(Color::Yellow),
        SessionState::Exited(o) if o.success() => Style::default().fg(Color::Gray),
        SessionState::Idle => Style::default().fg(Color::Gray),
        _ => Style::default().fg(Color::Red),
    }
}

fn draw_live(
    area: Rect,
    f: &mut ratatui::Frame,
    state: &UiState,
    live: &SessionState,
    output: &OutputBuffer,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(4),
        ])
        .split(area);

    let mut header = Vec::new();
    if let Some(s) = state.session.as_ref() {
        header.push(Line::from(vec![
            Span::styled(
                s.unit.display_name.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(format!("[{}]", s.unit.kind.label()), kind_style(s.unit.kind)),
            Span::raw("  "),
            Span::styled(live.to_string(), state_style(live)),
            Span::styled(
                format!("  pid {}  since {}", s.pid.unwrap_or_default(), s.started_at),
                Style::default().fg(Color::Gray),
            ),
        ]));
        let mut second = vec![Span::styled(
            format!("$ {}", s.unit.command_line()),
            Style::default().fg(Color::Gray),
        )];
        if let Some(url) = s.unit.url() {
            second.push(Span::raw("  "));
            second.push(Span::styled(url, Style::default().fg(Color::Cyan)));
        }
        header.push(Line::from(second));
    }
    let header =
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(header, chunks[0]);

    let height = chunks[1].height.saturating_sub(2) as usize;
    let total = output.len();
    let back = state.scroll_back.min(total);
    let window = output.tail(height + back);
    let shown = &window[..window.len().saturating_sub(back)];
    let body: Vec<Line> = shown
        .iter()
        .map(|l| {
            let style = match l.source {
                StreamSource::Stdout => Style::default(),
                StreamSource::Stderr => Style::default().fg(Color::Red),
                StreamSource::System => Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            };
            Line::from(Span::styled(l.text.clone(), style))
        })
        .collect();
    let title = if back > 0 {
        format!("Output (scrolled back {back})")
    } else {
        format!("Output ({total}/{} lines)", output.capacity())
    };
    let out = Paragraph::new(body).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(out, chunks[1]);

    let mut hints = Vec::new();
    for (k, w) in [
        ("ctrl-c", "stop"),
        ("esc", "back"),
        ("↑/↓", "scroll"),
        ("end", "follow"),
        ("?", "help"),
    ] {
        hints.extend(hint(k, w));
    }
    let footer = Paragraph::new(vec![banner_line(state), Line::from(hints)])
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[2]);
}
