use crate::log_view::Indicator;
use fleet_core::LogLevel;
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const TIME_STYLE: Style = Style::new().fg(Color::DarkGray);
pub const PLACEHOLDER_STYLE: Style = Style::new()
    .fg(Color::DarkGray)
    .add_modifier(Modifier::ITALIC);
pub const NOTE_STYLE: Style = Style::new().fg(Color::Rgb(251, 73, 52));
pub const HELP_KEY_STYLE: Style = Style::new().fg(Color::Cyan);

pub fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Info => Color::Rgb(69, 133, 236),
        LogLevel::Error => Color::Rgb(251, 73, 52),
        LogLevel::Warn => Color::Rgb(254, 128, 25),
        LogLevel::Debug => Color::Gray,
    }
}

pub fn level_style(level: LogLevel) -> Style {
    let style = Style::new().fg(level_color(level));
    match level {
        LogLevel::Debug => style,
        _ => style.add_modifier(Modifier::BOLD),
    }
}

pub fn indicator_style(indicator: Indicator) -> Style {
    let color = match indicator {
        Indicator::Connected => Color::Rgb(142, 192, 124),
        Indicator::Connecting => Color::Rgb(250, 189, 47),
        Indicator::Disconnected => Color::Rgb(251, 73, 52),
    };
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}
