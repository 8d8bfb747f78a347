//! Interactive terminal monitor.
//!
//! A ratatui dashboard over one [`McpHub`]: a table of running servers
//! with live health dots, a log tail for the selected server, and
//! single-key lifecycle actions. The monitor owns the terminal while it
//! runs (raw mode, alternate screen) and restores it on every exit path.
//!
//! Keys: `q` or `Esc` quits, up/down selects, `s` stops the selected
//! server, `r` restarts it. Stops and restarts run in the background so
//! the dashboard keeps refreshing while they complete.
use crate::error::{Error, Result};
use crate::{McpHub, RunningServer};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use futures::future::join_all;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Cell, Paragraph, Row, Table, TableState};
use ratatui::{Frame, Terminal};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// How often the server table and health dots refresh.
    pub poll_interval: Duration,
    /// How many log lines the tail pane keeps.
    pub log_tail_lines: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            poll_interval: Duration::from_secs(2),
            log_tail_lines: 40,
        }
    }
}

/// Interactive monitor over one hub.
pub struct Monitor {
    hub: McpHub,
    settings: MonitorSettings,
    servers: Vec<RunningServer>,
    health: HashMap<String, bool>,
    table_state: TableState,
    log_lines: Vec<String>,
    status_line: String,
    actions: mpsc::UnboundedSender<String>,
    actions_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl Monitor {
    /// Creates a monitor over the given hub.
    pub fn new(hub: McpHub, settings: MonitorSettings) -> Self {
        let (actions, actions_rx) = mpsc::unbounded_channel();
        Monitor {
            hub,
            settings,
            servers: Vec::new(),
            health: HashMap::new(),
            table_state: TableState::default(),
            log_lines: Vec::new(),
            status_line: String::new(),
            actions,
            actions_rx: Some(actions_rx),
        }
    }

    /// Runs the monitor until the user quits.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Starting interactive monitor");
        enable_raw_mode().map_err(terminal_error)?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen).map_err(terminal_error)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).map_err(terminal_error)?;

        let result = self.event_loop(&mut terminal).await;

        // Restore the terminal even when the loop failed; otherwise the
        // user's shell is left in raw mode.
        let _ = disable_raw_mode();
        let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
        let _ = terminal.show_cursor();

        tracing::info!("Monitor closed");
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    ) -> Result<()> {
        let mut actions_rx = self
            .actions_rx
            .take()
            .ok_or_else(|| Error::Other("Monitor is already running".to_string()))?;
        let mut events = EventStream::new();
        let mut poll = tokio::time::interval(self.settings.poll_interval);

        self.refresh().await;

        loop {
            terminal
                .draw(|frame| self.draw(frame))
                .map_err(terminal_error)?;

            tokio::select! {
                _ = poll.tick() => {
                    self.refresh().await;
                }
                message = actions_rx.recv() => {
                    if let Some(message) = message {
                        self.status_line = message;
                        self.refresh().await;
                    }
                }
                event = events.next() => {
                    match event {
                        Some(Ok(Event::Key(key))) => {
                            if self.handle_key(key) {
                                return Ok(());
                            }
                            self.load_log_tail().await;
                        }
                        // Resizes and the rest redraw on the next pass.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(terminal_error(e)),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Handles one key press. Returns true when the monitor should quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Up => self.select_previous(),
            KeyCode::Down => self.select_next(),
            KeyCode::Char('s') => self.stop_selected(),
            KeyCode::Char('r') => self.restart_selected(),
            _ => {}
        }
        false
    }

    async fn refresh(&mut self) {
        self.servers = self.hub.list_running().await;
        self.health = poll_health(&self.hub, &self.servers).await;
        self.clamp_selection();
        self.load_log_tail().await;
    }

    async fn load_log_tail(&mut self) {
        let Some(server) = self.selected() else {
            self.log_lines.clear();
            return;
        };
        let path = server.record.log_path.clone();
        let keep = self.settings.log_tail_lines;
        self.log_lines = match read_log_tail(&path, keep).await {
            Ok(lines) => lines,
            Err(_) => vec![format!("log not readable: {}", path.display())],
        };
    }

    fn stop_selected(&mut self) {
        let Some(name) = self.selected_name() else {
            return;
        };
        self.status_line = format!("stopping {}...", name);
        let hub = self.hub.clone();
        let tx = self.actions.clone();
        tokio::spawn(async move {
            let message = match hub.stop_server(&name).await {
                Ok(outcome) if outcome.forced => {
                    format!("{} did not stop in time and was killed", name)
                }
                Ok(_) => format!("{} stopped", name),
                Err(e) => format!("failed to stop {}: {}", name, e),
            };
            let _ = tx.send(message);
        });
    }

    fn restart_selected(&mut self) {
        let Some(name) = self.selected_name() else {
            return;
        };
        self.status_line = format!("restarting {}...", name);
        let hub = self.hub.clone();
        let tx = self.actions.clone();
        tokio::spawn(async move {
            let message = match hub.restart_server(&name, Default::default()).await {
                Ok(record) => format!("{} restarted on port {}", name, record.port),
                Err(e) => format!("failed to restart {}: {}", name, e),
            };
            let _ = tx.send(message);
        });
    }

    fn selected(&self) -> Option<&RunningServer> {
        self.table_state
            .selected()
            .and_then(|index| self.servers.get(index))
    }

    fn selected_name(&self) -> Option<String> {
        self.selected().map(|server| server.record.name.clone())
    }

    fn clamp_selection(&mut self) {
        if self.servers.is_empty() {
            self.table_state.select(None);
            return;
        }
        let index = self
            .table_state
            .selected()
            .unwrap_or(0)
            .min(self.servers.len() - 1);
        self.table_state.select(Some(index));
    }

    fn select_next(&mut self) {
        if self.servers.is_empty() {
            return;
        }
        let index = match self.table_state.selected() {
            Some(index) => (index + 1).min(self.servers.len() - 1),
            None => 0,
        };
        self.table_state.select(Some(index));
    }

    fn select_previous(&mut self) {
        if self.servers.is_empty() {
            return;
        }
        let index = self.table_state.selected().unwrap_or(0).saturating_sub(1);
        self.table_state.select(Some(index));
    }

    fn draw(&mut self, frame: &mut Frame) {
        let [table_area, log_area, status_area] = Layout::vertical([
            Constraint::Min(8),
            Constraint::Percentage(45),
            Constraint::Length(1),
        ])
        .areas(frame.area());

        self.draw_table(frame, table_area);
        self.draw_log(frame, log_area);
        self.draw_status(frame, status_area);
    }

    fn draw_table(&mut self, frame: &mut Frame, area: Rect) {
        if self.servers.is_empty() {
            let placeholder = Paragraph::new("no servers running")
                .block(Block::bordered().title("running servers"))
                .centered();
            frame.render_widget(placeholder, area);
            return;
        }

        let header = Row::new(["", "server", "pid", "port", "transport", "uptime"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = self.servers.iter().map(|server| {
            let record = &server.record;
            let health = match self.health.get(&record.name) {
                Some(true) => Cell::from("●").style(Style::default().fg(Color::Green)),
                Some(false) => Cell::from("●").style(Style::default().fg(Color::Red)),
                None => Cell::from("○").style(Style::default().fg(Color::DarkGray)),
            };
            Row::new(vec![
                health,
                Cell::from(record.name.clone()),
                Cell::from(record.pid.to_string()),
                Cell::from(record.port.to_string()),
                Cell::from(record.transport.to_string()),
                Cell::from(format_uptime(server.uptime)),
            ])
        });
        let widths = [
            Constraint::Length(2),
            Constraint::Min(16),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(9),
            Constraint::Length(10),
        ];
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::bordered().title("running servers"))
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        frame.render_stateful_widget(table, area, &mut self.table_state);
    }

    fn draw_log(&self, frame: &mut Frame, area: Rect) {
        let title = match self.selected() {
            Some(server) => format!("log: {}", server.record.log_path.display()),
            None => "log".to_string(),
        };
        // Keep the newest lines visible when the pane is shorter than the
        // tail we hold.
        let inner_height = area.height.saturating_sub(2) as usize;
        let skip = self.log_lines.len().saturating_sub(inner_height);
        let text: Vec<Line> = self.log_lines[skip..]
            .iter()
            .map(|line| Line::from(line.as_str()))
            .collect();
        let paragraph = Paragraph::new(text).block(Block::bordered().title(title));
        frame.render_widget(paragraph, area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let keys = "q quit | up/down select | s stop | r restart";
        let line = if self.status_line.is_empty() {
            keys.to_string()
        } else {
            format!("{}   {}", self.status_line, keys)
        };
        let status = Paragraph::new(line).style(Style::default().fg(Color::DarkGray));
        frame.render_widget(status, area);
    }
}

fn terminal_error(e: impl std::fmt::Display) -> Error {
    Error::Other(format!("Terminal failure: {}", e))
}

/// One probe attempt per server, all in flight together. A wedged server
/// costs the poll one request timeout, not one per server, so key
/// handling stays responsive however many servers hang.
async fn poll_health(hub: &McpHub, servers: &[RunningServer]) -> HashMap<String, bool> {
    let probes = servers.iter().map(|server| {
        let record = &server.record;
        async move {
            let healthy = hub
                .prober()
                .check_once(&record.name, record.port, record.transport)
                .await;
            (record.name.clone(), healthy)
        }
    });
    join_all(probes).await.into_iter().collect()
}

/// How much of the end of a log file one tail read inspects.
const TAIL_WINDOW_BYTES: u64 = 32 * 1024;

/// Last `keep` lines of the file, reading at most [`TAIL_WINDOW_BYTES`]
/// from the end. Server logs only grow, so tailing must not reread the
/// whole file on every poll.
async fn read_log_tail(path: &Path, keep: usize) -> std::io::Result<Vec<String>> {
    use std::io::SeekFrom;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }

    let mut buffer = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buffer).await?;
    let content = String::from_utf8_lossy(&buffer);

    let mut lines: Vec<&str> = content.lines().collect();
    // A mid-file window almost always starts inside a line; drop the
    // partial one.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(keep);
    Ok(lines[skip..].iter().map(|line| line.to_string()).collect())
}

/// Formats an uptime compactly: `42s`, `3m12s`, `2h05m`, `1d03h`.
pub(crate) fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d{:02}h", days, hours)
    } else if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
