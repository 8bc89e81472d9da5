use chrono::{DateTime, Local, TimeZone, Utc};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};

use crate::models::{Record, RiskLevel, Tone};

pub const MAX_ROWS: usize = 10;
pub const PLACEHOLDER: &str = "N/A";

pub const HEADER: [&str; 7] = [
    "Student ID",
    "Timestamp",
    "Attendance",
    "Assignment",
    "Test",
    "Risk",
    "Actions",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowActionKind {
    ViewDetail,
    RePredict,
    SendAlert,
}

impl RowActionKind {
    pub fn command(self) -> &'static str {
        match self {
            RowActionKind::ViewDetail => "view",
            RowActionKind::RePredict => "predict",
            RowActionKind::SendAlert => "alert",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RowActionKind::ViewDetail => "View details",
            RowActionKind::RePredict => "Re-predict",
            RowActionKind::SendAlert => "Send alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowAction {
    pub kind: RowActionKind,
    pub student_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskBadge {
    pub level: RiskLevel,
    pub percentage: i64,
    pub tone: Tone,
}

impl RiskBadge {
    pub fn label(&self) -> String {
        format!("{} ({}%)", self.level, self.percentage)
    }
}

/// Display-ready projection of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RowModel {
    pub student_id: String,
    pub recorded_at: String,
    pub attendance: String,
    pub assignment_score: String,
    pub test_score: String,
    pub badge: RiskBadge,
    pub actions: [RowAction; 3],
}

pub fn record_to_row_model(record: &Record) -> Option<RowModel> {
    record_to_row_model_in(record, &Local)
}

/// Returns `None` for records without a risk level; every other absent
/// field degrades to [`PLACEHOLDER`].
pub fn record_to_row_model_in<Tz>(record: &Record, tz: &Tz) -> Option<RowModel>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let level = record.risk_level?;
    let probability = record.risk_probability.unwrap_or(0.0);
    let action = |kind| RowAction {
        kind,
        student_id: record.student_id.clone(),
    };

    Some(RowModel {
        student_id: record.student_id.clone(),
        recorded_at: format_timestamp(&record.timestamp, tz),
        attendance: format_metric(record.attendance),
        assignment_score: format_metric(record.assignment_score),
        test_score: format_metric(record.test_score),
        badge: RiskBadge {
            level,
            percentage: (probability * 100.0).round() as i64,
            tone: level.tone(),
        },
        actions: [
            action(RowActionKind::ViewDetail),
            action(RowActionKind::RePredict),
            action(RowActionKind::SendAlert),
        ],
    })
}

/// Newest ten records, minus those without a risk level.
pub fn build_rows(records: &[Record]) -> Vec<RowModel> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    sorted
        .into_iter()
        .take(MAX_ROWS)
        .filter_map(record_to_row_model)
        .collect()
}

pub fn render(rows: &[RowModel]) -> Table {
    let mut table = base_table();

    if rows.is_empty() {
        table.add_row(vec![Cell::new("No risk records yet")]);
        return table;
    }

    for row in rows {
        let actions = row
            .actions
            .iter()
            .map(|action| action.kind.command())
            .collect::<Vec<_>>()
            .join(" | ");
        table.add_row(vec![
            Cell::new(&row.student_id),
            Cell::new(&row.recorded_at),
            Cell::new(&row.attendance),
            Cell::new(&row.assignment_score),
            Cell::new(&row.test_score),
            Cell::new(row.badge.label()).fg(tone_color(row.badge.tone)),
            Cell::new(actions),
        ]);
    }

    table
}

pub fn render_loading() -> Table {
    let mut table = base_table();
    table.add_row(vec![Cell::new("Loading...").add_attribute(Attribute::Italic)]);
    table
}

pub fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Success => Color::Green,
        Tone::Info => Color::Cyan,
        Tone::Warning => Color::Yellow,
        Tone::Danger => Color::Red,
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        HEADER
            .iter()
            .map(|title| Cell::new(title).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{value}"),
        _ => PLACEHOLDER.to_string(),
    }
}

fn format_timestamp<Tz>(timestamp: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    timestamp
        .with_timezone(tz)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
