use crate::log_view::LogView;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use fleet_core::ErrorPayload;
use fleet_stream::Transport;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Logs,
    TaskPrompt,
}

pub struct App<T: Transport> {
    pub view: LogView<T>,
    pub mode: Mode,
    pub input: String,
    pub status_note: Option<String>,
    /// Rows the log body had on the last draw; scrolling pages by this much.
    pub body_height: usize,
    quit: bool,
}

impl<T: Transport> App<T> {
    pub fn new(view: LogView<T>) -> Self {
        Self {
            view,
            mode: Mode::Logs,
            input: String::new(),
            status_note: None,
            body_height: 1,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn note_server_error(&mut self, payload: ErrorPayload) {
        warn!("server_error: {}", payload.message);
        self.status_note = Some(payload.message);
    }

    pub fn handle_event(&mut self, event: Event) {
        if let Event::Key(key) = event {
            if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                self.handle_key(key);
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        match self.mode {
            Mode::Logs => self.handle_logs_key(key),
            Mode::TaskPrompt => self.handle_prompt_key(key),
        }
    }

    fn handle_logs_key(&mut self, key: KeyEvent) {
        let page = self.body_height.max(1);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.view.scroll_up(1, page),
            KeyCode::Down | KeyCode::Char('j') => self.view.scroll_down(1, page),
            KeyCode::PageUp => self.view.scroll_up(page, page),
            KeyCode::PageDown => self.view.scroll_down(page, page),
            KeyCode::Home | KeyCode::Char('g') => self.view.scroll_up(usize::MAX, page),
            KeyCode::End | KeyCode::Char('G') => self.view.follow_tail(),
            KeyCode::Char('/') => {
                self.input = self.view.task_id().unwrap_or_default();
                self.mode = Mode::TaskPrompt;
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.input.clear();
                self.mode = Mode::Logs;
            }
            KeyCode::Enter => {
                let task_id = std::mem::take(&mut self.input);
                if !task_id.trim().is_empty() {
                    self.status_note = None;
                    self.view.bind(&task_id);
                }
                self.mode = Mode::Logs;
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(ch) => self.input.push(ch),
            _ => {}
        }
    }
}
