use crate::log_view::format_time;
use crate::state::{App, Mode};
use crate::theme;
use fleet_core::LogEntry;
use fleet_stream::Transport;
use ratatui::{
    layout::{Constraint, Direction, Layout},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn render<T: Transport>(f: &mut Frame, app: &mut App<T>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(f.size());

    f.render_widget(Paragraph::new(header_line(app)), chunks[0]);

    let body = chunks[1];
    let title = match app.view.task_id() {
        Some(task_id) => format!(" {task_id} "),
        None => " no task ".to_string(),
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let height = usize::from(body.height.saturating_sub(2));
    app.body_height = height.max(1);

    let lines: Vec<Line> = if app.view.is_empty() {
        vec![Line::from(Span::styled(
            "no log lines yet",
            theme::PLACEHOLDER_STYLE,
        ))]
    } else {
        app.view.visible(app.body_height).iter().map(log_line).collect()
    };
    f.render_widget(Paragraph::new(lines).block(block), body);

    f.render_widget(Paragraph::new(footer_line(app)), chunks[2]);
}

fn header_line<T: Transport>(app: &App<T>) -> Line<'static> {
    let indicator = app.view.indicator();
    let mut spans = vec![
        Span::styled("fleet logs ", theme::HEADER_STYLE),
        Span::styled(format!("● {}", indicator.label()), theme::indicator_style(indicator)),
        Span::raw(format!("  {} lines", app.view.len())),
    ];
    if !app.view.is_following() {
        spans.push(Span::raw("  [paused]"));
    }
    if let Some(note) = &app.status_note {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(note.clone(), theme::NOTE_STYLE));
    }
    Line::from(spans)
}

fn footer_line<T: Transport>(app: &App<T>) -> Line<'static> {
    match app.mode {
        Mode::TaskPrompt => Line::from(vec![
            Span::styled("task: ", theme::HELP_KEY_STYLE),
            Span::raw(format!("{}_", app.input)),
        ]),
        Mode::Logs => {
            let mut spans = Vec::new();
            for (key, label) in [
                ("q", "quit"),
                ("↑/↓", "scroll"),
                ("PgUp/PgDn", "page"),
                ("G", "follow"),
                ("/", "task"),
            ] {
                spans.push(Span::styled(key, theme::HELP_KEY_STYLE));
                spans.push(Span::raw(format!(" {label}  ")));
            }
            Line::from(spans)
        }
    }
}

fn log_line(entry: &LogEntry) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("[{}] ", format_time(entry.emitted_at)), theme::TIME_STYLE),
        Span::styled(
            format!("{:<5} ", entry.level.label()),
            theme::level_style(entry.level),
        ),
        Span::raw(entry.message.clone()),
    ])
}
