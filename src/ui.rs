use crate::client::ApiClient;
use crate::protocol::{ChatMessage, Role, StreamEvent};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const PREVIEW_HEIGHT: u16 = 5;
const STATUS_HEIGHT: u16 = 1;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn role_style(role: Role) -> Style {
    match role {
        Role::User => Style::default().fg(Color::Blue),
        Role::Assistant => Style::default().fg(Color::Yellow),
    }
}

fn message_line_specs(message: &ChatMessage) -> Vec<LineSpec> {
    let body_style = role_style(message.role);
    let header_style = body_style.add_modifier(Modifier::BOLD);
    let name = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    };
    let header = match message.timestamp() {
        Some(ts) => format!("{name} ({}):", ts.format("%b %-d %H:%M")),
        None => format!("{name}:"),
    };

    let mut lines = vec![LineSpec::new(header, header_style)];
    for line in message.content.lines() {
        lines.push(LineSpec::new(format!("  {}", line), body_style));
    }
    lines
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    Text::from(
        specs
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>(),
    )
}

fn rendered_height(specs: &[LineSpec], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = specs
        .iter()
        .map(|spec| spec.text.chars().count().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

#[derive(Debug)]
pub enum UiEvent {
    History(Result<Vec<ChatMessage>, String>),
    Token(String),
    Done,
    Failed(String),
}

impl From<StreamEvent> for UiEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Token { content } => UiEvent::Token(content),
            StreamEvent::Done => UiEvent::Done,
            StreamEvent::Error { content } => UiEvent::Failed(content),
        }
    }
}

/// Multi-line input with a char-indexed cursor.
struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_offset(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map(|(i, _)| i)
            .unwrap_or(line.len())
    }

    fn insert_char(&mut self, c: char) {
        let offset = self.byte_offset();
        self.lines[self.cursor_y].insert(offset, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let offset = self.byte_offset();
            self.lines[self.cursor_y].remove(offset);
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let offset = self.byte_offset();
        let remaining = self.lines[self.cursor_y].split_off(offset);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y + 1 < self.lines.len() {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y + 1 < self.lines.len() {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn home(&mut self) {
        self.cursor_x = 0;
    }

    fn end(&mut self) {
        self.cursor_x = self.line_len(self.cursor_y);
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    fn render(&self, disabled: bool) -> Text<'static> {
        if self.lines.iter().all(|l| l.is_empty()) {
            let hint = if disabled {
                "Waiting for the reply..."
            } else {
                "Type your message..."
            };
            return Text::from(Span::styled(hint, Style::default().fg(Color::DarkGray)));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

/// Terminal position of the input cursor, kept inside the bordered `area`.
fn cursor_position(area: Rect, column: usize, row: usize) -> (u16, u16) {
    let offset = |n: usize| u16::try_from(n).unwrap_or(u16::MAX);
    let x = area
        .x
        .saturating_add(1)
        .saturating_add(offset(column))
        .min(area.x.saturating_add(area.width.saturating_sub(2)));
    let y = area
        .y
        .saturating_add(1)
        .saturating_add(offset(row))
        .min(area.y.saturating_add(area.height.saturating_sub(2)));
    (x, y)
}

pub struct App {
    client: ApiClient,
    session_id: String,
    messages: Vec<ChatMessage>,
    input: InputBuffer,
    /// Assistant reply being streamed; `Some` while a send is in flight.
    pending_reply: Option<String>,
    /// Sends wait for the history so the log stays in order.
    history_loaded: bool,
    error: Option<String>,
    should_quit: bool,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
}

impl App {
    pub fn new(client: ApiClient, session_id: String) -> Self {
        let (sender, receiver) = mpsc::channel(256);

        Self {
            client,
            session_id,
            messages: Vec::new(),
            input: InputBuffer::new(),
            pending_reply: None,
            history_loaded: false,
            error: None,
            should_quit: false,
            sender,
            receiver,
        }
    }

    fn is_streaming(&self) -> bool {
        self.pending_reply.is_some()
    }

    /// Applies a background event; returns messages to commit to scrollback.
    fn apply(&mut self, event: UiEvent) -> Vec<ChatMessage> {
        match event {
            UiEvent::History(Ok(history)) => {
                self.history_loaded = true;
                self.messages.extend(history.iter().cloned());
                history
            }
            UiEvent::History(Err(err)) => {
                self.history_loaded = true;
                tracing::error!(error = %err, "failed to load chat history");
                self.error = Some("Failed to load chat history".to_string());
                Vec::new()
            }
            UiEvent::Token(token) => {
                if let Some(reply) = self.pending_reply.as_mut() {
                    reply.push_str(&token);
                }
                Vec::new()
            }
            UiEvent::Done => match self.pending_reply.take() {
                Some(reply) => {
                    let message = ChatMessage::assistant(reply);
                    self.messages.push(message.clone());
                    vec![message]
                }
                None => Vec::new(),
            },
            UiEvent::Failed(err) => {
                // The partial reply is dropped; the backend did not store it either.
                self.pending_reply = None;
                self.error = Some(err);
                Vec::new()
            }
        }
    }

    /// Starts a send if the input holds something; returns the user message.
    fn submit(&mut self) -> Option<ChatMessage> {
        if !self.history_loaded || self.is_streaming() || self.input.is_blank() {
            return None;
        }

        let text = self.input.text();
        self.input.clear();
        self.error = None;
        self.pending_reply = Some(String::new());

        let message = ChatMessage::user(text.clone());
        self.messages.push(message.clone());

        let client = self.client.clone();
        let session_id = self.session_id.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let mut reply = client.send_message(&session_id, &text).await;
            while let Some(event) = reply.next().await {
                if sender.send(event.into()).await.is_err() {
                    break;
                }
            }
        });

        Some(message)
    }

    fn load_history(&self) {
        let client = self.client.clone();
        let session_id = self.session_id.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = client
                .chat_history(&session_id)
                .await
                .map_err(|err| err.to_string());
            let _ = sender.send(UiEvent::History(result)).await;
        });
    }

    fn draw(&self, f: &mut Frame) {
        let [preview, status, input] = Layout::vertical([
            Constraint::Length(PREVIEW_HEIGHT),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(INPUT_HEIGHT),
        ])
        .areas(f.area());

        if let Some(reply) = &self.pending_reply {
            let mut specs = vec![LineSpec::new(
                "Assistant:",
                role_style(Role::Assistant).add_modifier(Modifier::BOLD),
            )];
            if reply.is_empty() {
                specs.push(LineSpec::new(
                    "  ...",
                    Style::default().fg(Color::DarkGray),
                ));
            }
            for line in reply.lines() {
                specs.push(LineSpec::new(
                    format!("  {}", line),
                    role_style(Role::Assistant),
                ));
            }
            // Keep the newest part of the reply in view.
            let height = rendered_height(&specs, preview.width);
            let scroll = height.saturating_sub(preview.height);
            let paragraph = Paragraph::new(to_text(specs))
                .wrap(Wrap { trim: false })
                .scroll((scroll, 0));
            f.render_widget(paragraph, preview);
        }

        if let Some(err) = &self.error {
            let line = Line::from(vec![
                Span::styled(
                    format!("Error: {err}"),
                    Style::default().fg(Color::Red),
                ),
                Span::styled(" (Esc to dismiss)", Style::default().fg(Color::DarkGray)),
            ]);
            f.render_widget(Paragraph::new(line), status);
        }

        let title = if self.is_streaming() {
            " Message (Enter to send, Esc to quit) [Streaming...] "
        } else if !self.history_loaded {
            " Message (Enter to send, Esc to quit) [Loading history...] "
        } else {
            " Message (Enter to send, Esc to quit) "
        };
        let input_paragraph = Paragraph::new(self.input.render(self.is_streaming()))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input);

        f.set_cursor_position(cursor_position(input, self.input.cursor_x, self.input.cursor_y));
    }

    fn commit(&mut self, terminal: &mut TuiTerminal, message: &ChatMessage) -> UiResult<()> {
        let width = terminal.size()?.width;
        let specs = message_line_specs(message);
        let height = rendered_height(&specs, width).saturating_add(1);
        let mut text = to_text(specs);
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .render(buf.area, buf);
        })?;
        Ok(())
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        while let Ok(event) = self.receiver.try_recv() {
            for message in self.apply(event) {
                self.commit(terminal, &message)?;
            }
        }

        if !event::poll(Duration::from_millis(50))? {
            return Ok(());
        }
        let Event::Key(key) = event::read()? else {
            return Ok(());
        };
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Ok(());
        }

        match key.code {
            KeyCode::Esc => {
                if self.error.take().is_none() {
                    self.should_quit = true;
                }
            }
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
                if !self.is_streaming() {
                    self.input.new_line();
                }
            }
            KeyCode::Enter => {
                if let Some(message) = self.submit() {
                    self.commit(terminal, &message)?;
                }
            }
            _ if self.is_streaming() => {}
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Up => self.input.move_up(),
            KeyCode::Down => self.input.move_down(),
            KeyCode::Home => self.input.home(),
            KeyCode::End => self.input.end(),
            _ => {}
        }

        Ok(())
    }
}

/// Runs the interactive chat for `session_id` until the user quits.
pub fn run_chat(client: ApiClient, session_id: String) -> UiResult<()> {
    enable_raw_mode()?;
    let _guard = TerminalGuard;

    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(PREVIEW_HEIGHT + STATUS_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(client, session_id);
    app.load_history();

    while !app.should_quit {
        terminal.draw(|f| app.draw(f))?;
        app.handle_events(&mut terminal)?;
    }

    terminal.clear()?;
    Ok(())
}
