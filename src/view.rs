use std::fmt::Write as _;
use std::io::{self, Stdout};
use std::sync::{Arc, Mutex, PoisonError};

use ratatui::backend::CrosstermBackend;
use ratatui::crossterm::{cursor, execute, terminal};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};

use crate::charts::{self, Geometry, TerminalSurface};
use crate::forms;
use crate::models::{Record, Tone};
use crate::poller::{DashboardState, DashboardView, PollPhase};
use crate::table::{self, RowModel};

const HELP: &str =
    "refresh | hide | show | view <id> | predict <id> | alert <id> | close | retrain | quit";

const COLUMN_WIDTHS: [Constraint; 7] = [
    Constraint::Length(10),
    Constraint::Length(19),
    Constraint::Length(10),
    Constraint::Length(10),
    Constraint::Length(6),
    Constraint::Length(13),
    Constraint::Min(20),
];

#[derive(Default)]
struct PromptState {
    line: String,
    notice: Option<String>,
}

/// Command line being typed, shared between the key reader and the view.
#[derive(Clone, Default)]
pub struct Prompt(Arc<Mutex<PromptState>>);

impl Prompt {
    pub fn push(&self, c: char) {
        let mut state = self.lock();
        state.notice = None;
        state.line.push(c);
    }

    pub fn backspace(&self) {
        self.lock().line.pop();
    }

    /// Clears the typed line. Returns false if there was nothing to clear.
    pub fn clear(&self) -> bool {
        let mut state = self.lock();
        let had_text = !state.line.is_empty() || state.notice.is_some();
        state.line.clear();
        state.notice = None;
        had_text
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut self.lock().line)
    }

    /// Shows `message` in place of the prompt until the next keystroke.
    pub fn notice(&self, message: impl Into<String>) {
        self.lock().notice = Some(message.into());
    }

    fn line(&self) -> Line<'static> {
        let state = self.lock();
        match &state.notice {
            Some(notice) => Line::from(Span::styled(notice.clone(), Style::default().fg(Color::Red))),
            None if state.line.is_empty() => {
                Line::from(Span::styled(HELP, Style::default().fg(Color::DarkGray)))
            }
            None => Line::from(format!("> {}", state.line)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PromptState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Full-screen dashboard on the alternate screen. The terminal is restored
/// when the view is dropped.
pub struct TerminalView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    detail: Option<String>,
    prompt: Prompt,
}

impl TerminalView {
    pub fn new(prompt: Prompt) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(err);
        }
        let terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(err) => {
                restore_terminal(&mut io::stdout());
                return Err(err);
            }
        };
        Ok(TerminalView {
            terminal,
            detail: None,
            prompt,
        })
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        restore_terminal(self.terminal.backend_mut());
    }
}

fn restore_terminal(out: &mut impl io::Write) {
    let _ = terminal::disable_raw_mode();
    let _ = execute!(out, terminal::LeaveAlternateScreen, cursor::Show);
}

impl DashboardView<TerminalSurface> for TerminalView {
    fn render(&mut self, state: &DashboardState<TerminalSurface>) {
        let detail = self.detail.as_deref();
        let prompt = self.prompt.line();
        if let Err(err) = self
            .terminal
            .draw(|frame| draw_dashboard(frame, state, detail, prompt))
        {
            tracing::warn!(%err, "failed to draw dashboard");
        }
    }

    fn show_detail(&mut self, record: &Record) {
        self.detail = Some(render_detail(record));
    }

    fn close_detail(&mut self) {
        self.detail = None;
    }

    fn chart_geometry(&self) -> Option<Geometry> {
        let size = self.terminal.size().ok()?;
        Some(chart_geometry_for(size.width))
    }
}

/// Three charts side by side across the terminal width.
pub fn chart_geometry_for(terminal_width: u16) -> Geometry {
    Geometry {
        width: (terminal_width / 3).max(24),
        height: Geometry::default().height,
    }
}

pub fn draw_dashboard(
    frame: &mut Frame,
    state: &DashboardState<TerminalSurface>,
    detail: Option<&str>,
    prompt: Line<'static>,
) {
    let toasts = state.toasts.active();
    let detail_height = detail.map_or(0, |text| text.lines().count() as u16 + 2);
    let geometry = state.charts.geometry();

    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(table::MAX_ROWS as u16 + 3),
            Constraint::Length(geometry.height),
            Constraint::Length(toasts.len() as u16),
            Constraint::Length(detail_height),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(
        Paragraph::new(header_text(state)).style(Style::default().add_modifier(Modifier::BOLD)),
        areas[0],
    );
    frame.render_widget(Paragraph::new(summary_text(state)), areas[1]);
    frame.render_widget(risk_table(state), areas[2]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(geometry.width); 3])
        .split(areas[3]);
    for (buffer, area) in state.charts.surface().buffers().into_iter().zip(columns.iter()) {
        charts::copy_into(buffer, frame.buffer_mut(), *area);
    }

    let toast_lines: Vec<Line> = toasts
        .iter()
        .map(|toast| {
            Line::from(vec![
                Span::styled(
                    format!("[{}] {}", toast.tone.as_str(), toast.title),
                    Style::default()
                        .fg(tone_color(toast.tone))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(": {}", toast.message)),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(toast_lines), areas[4]);

    if let Some(detail) = detail {
        frame.render_widget(
            Paragraph::new(detail.to_string()).block(Block::default().borders(Borders::ALL)),
            areas[5],
        );
    }

    frame.render_widget(Paragraph::new(prompt), areas[7]);
}

fn risk_table(state: &DashboardState<TerminalSurface>) -> Table<'static> {
    let header = Row::new(table::HEADER.iter().map(|title| Cell::from(*title)))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let placeholder = |text: &'static str| {
        vec![Row::new([Cell::from(text)]).style(Style::default().add_modifier(Modifier::ITALIC))]
    };
    let rows = if state.is_loading() {
        placeholder("Loading...")
    } else if state.rows.is_empty() {
        placeholder("No risk records yet")
    } else {
        state.rows.iter().map(table_row).collect()
    };

    Table::new(rows, COLUMN_WIDTHS).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Recent Risk Assessments"),
    )
}

fn table_row(row: &RowModel) -> Row<'static> {
    let actions = row
        .actions
        .iter()
        .map(|action| action.kind.command())
        .collect::<Vec<_>>()
        .join(" | ");
    Row::new([
        Cell::from(row.student_id.clone()),
        Cell::from(row.recorded_at.clone()),
        Cell::from(row.attendance.clone()),
        Cell::from(row.assignment_score.clone()),
        Cell::from(row.test_score.clone()),
        Cell::from(row.badge.label()).style(Style::default().fg(tone_color(row.badge.tone))),
        Cell::from(actions),
    ])
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Success => Color::Green,
        Tone::Info => Color::Cyan,
        Tone::Warning => Color::Yellow,
        Tone::Danger => Color::Red,
    }
}

fn header_text(state: &DashboardState<TerminalSurface>) -> String {
    let updated = state
        .last_updated
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let phase = match state.phase() {
        PollPhase::Active => "live",
        PollPhase::Idle => "paused",
    };
    let mut header = format!("Dropout Risk Dashboard ({phase}, last updated {updated})");
    if state.is_retraining() {
        header.push_str("  Retraining...");
    }
    header
}

fn summary_text(state: &DashboardState<TerminalSurface>) -> String {
    if state.is_loading() {
        return "Students: ...  Low: ...  Medium: ...  High: ...".to_string();
    }
    let tally = state.aggregate.tally;
    format!(
        "Students: {}  Low: {}  Medium: {}  High: {}",
        state.aggregate.total_students, tally.low, tally.medium, tally.high
    )
}

/// Plain-text dashboard for non-interactive output.
pub fn render_frame(state: &DashboardState<TerminalSurface>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", header_text(state));
    let _ = writeln!(out, "{}", summary_text(state));
    if state.is_loading() {
        let _ = writeln!(out, "{}", table::render_loading());
    } else {
        let _ = writeln!(out, "{}", table::render(&state.rows));
    }

    let _ = writeln!(out);
    out.push_str(&state.charts.surface().render_all());

    for toast in state.toasts.active() {
        let _ = writeln!(out, "[{}] {}: {}", toast.tone.as_str(), toast.title, toast.message);
    }
    out
}

pub fn render_detail(record: &Record) -> String {
    let metric = |value: Option<f64>| {
        value
            .map(|v| format!("{v}"))
            .unwrap_or_else(|| table::PLACEHOLDER.to_string())
    };
    let mut out = String::new();
    let _ = writeln!(out, "Student Record: {}", record.student_id);
    let _ = writeln!(
        out,
        "  Department: {}",
        record.department.as_deref().unwrap_or(table::PLACEHOLDER)
    );
    let _ = writeln!(out, "  Attendance: {}", metric(record.attendance));
    let _ = writeln!(out, "  Assignment Score: {}", metric(record.assignment_score));
    let _ = writeln!(out, "  Test Score: {}", metric(record.test_score));
    let _ = writeln!(out, "  Sentiment Score: {}", metric(record.sentiment_score_percent));
    if let Some(level) = record.risk_level {
        let percent = (record.risk_probability.unwrap_or(0.0) * 100.0).round();
        let _ = writeln!(out, "  Risk: {level} ({percent}%)");
    }
    let _ = writeln!(out, "  {}", forms::risk_interpretation(record.risk_level));
    out
}
