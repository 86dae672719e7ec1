use super::state::Screen;
use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn bind(keys: &[&'static str], what: &'static str) -> Line<'static> {
    let mut spans = vec![Span::raw("  ")];
    let mut width = 0;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" / "));
            width += 3;
        }
        spans.push(Span::styled(*key, Style::default().fg(Color::Magenta)));
        width += key.chars().count();
    }
    spans.push(Span::raw(" ".repeat(14usize.saturating_sub(width).max(2))));
    spans.push(Span::raw(what));
    Line::from(spans)
}

fn help_lines(screen: Screen) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from("Menu:")];
    lines.extend([
        bind(&["↑/↓", "j/k"], "Navigate"),
        bind(&["1-9"], "Jump to entry"),
        bind(&["enter"], "Run selected"),
        bind(&["r"], "Refresh applications"),
        bind(&["v"], "View running session"),
        bind(&["x"], "Stop running session"),
        bind(&["q", "Ctrl-C"], "Quit"),
    ]);
    lines.push(Line::from(""));
    lines.push(Line::from("Live view:"));
    lines.extend([
        bind(&["Ctrl-C", "x"], "Stop"),
        bind(&["esc", "q", "b"], "Back to menu (keeps running)"),
        bind(&["↑/↓", "PgUp/PgDn"], "Scroll"),
        bind(&["end"], "Follow output"),
    ]);
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("  "),
        Span::styled("?", Style::default().fg(Color::Magenta)),
        Span::raw("             Toggle this help"),
    ]));
    if screen == Screen::LiveView {
        lines.push(Line::from(Span::styled(
            "  Leaving the live view never stops the process.",
            Style::default().fg(Color::Gray),
        )));
    }
    lines
}

/// Centered help popup over the current screen.
pub fn draw_help(area: Rect, f: &mut Frame, screen: Screen) {
    let lines = help_lines(screen);
    let height = (lines.len() as u16 + 2).min(area.height);
    let width = 56.min(area.width);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, popup);
    f.render_widget(p, popup);
}
