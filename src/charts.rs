//! Keeps the three dashboard charts in sync with each poll.
//!
//! Charts live behind a [`ChartSurface`], the only charting capability the
//! dashboard relies on. A chart is created once, lazily, and from then on
//! only has its data replaced and redrawn. Handles are destroyed only when the
//! surface geometry changes.

use std::collections::BTreeMap;

use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Bar, BarChart, BarGroup, Block, Borders, Paragraph, Sparkline, Widget};

use crate::models::{LatestIndex, Record, RiskLevel, RiskTally};
use crate::risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChartKind {
    Distribution,
    Breakdown,
    SentimentTrend,
}

impl ChartKind {
    pub fn title(self) -> &'static str {
        match self {
            ChartKind::Distribution => "Risk Distribution",
            ChartKind::Breakdown => "Risk by Department",
            ChartKind::SentimentTrend => "Sentiment Trend Over Time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            width: 40,
            height: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChartHandle(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl ChartData {
    fn empty(kind: ChartKind) -> Self {
        match kind {
            ChartKind::Distribution => distribution_data(&RiskTally::default()),
            ChartKind::Breakdown => ChartData {
                labels: Vec::new(),
                series: level_series(Vec::new(), Vec::new(), Vec::new()),
            },
            ChartKind::SentimentTrend => ChartData {
                labels: Vec::new(),
                series: vec![Series {
                    name: "Average Sentiment Score".to_string(),
                    values: Vec::new(),
                }],
            },
        }
    }
}

/// External charting primitive.
pub trait ChartSurface {
    fn create(&mut self, kind: ChartKind, geometry: Geometry, data: &ChartData) -> ChartHandle;
    fn replace_data(&mut self, handle: ChartHandle, data: ChartData);
    fn redraw(&mut self, handle: ChartHandle);
    fn destroy(&mut self, handle: ChartHandle);
}

pub struct ChartSync<S> {
    surface: S,
    geometry: Geometry,
    handles: BTreeMap<ChartKind, ChartHandle>,
}

impl<S: ChartSurface> ChartSync<S> {
    pub fn new(surface: S, geometry: Geometry) -> Self {
        ChartSync {
            surface,
            geometry,
            handles: BTreeMap::new(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn update_distribution(&mut self, tally: &RiskTally) {
        self.replace(ChartKind::Distribution, distribution_data(tally));
    }

    pub fn update_breakdown(&mut self, latest: &LatestIndex) {
        self.replace(ChartKind::Breakdown, breakdown_data(latest));
    }

    pub fn update_sentiment_trend(&mut self, records: &[Record]) {
        self.replace(ChartKind::SentimentTrend, sentiment_data(records));
    }

    /// Drops every chart built for the old geometry. The next update of each
    /// kind recreates it at the new size.
    pub fn reset_geometry(&mut self, geometry: Geometry) {
        if geometry == self.geometry {
            return;
        }
        for (kind, handle) in std::mem::take(&mut self.handles) {
            tracing::debug!(?kind, ?handle, "destroying chart after geometry change");
            self.surface.destroy(handle);
        }
        self.geometry = geometry;
    }

    fn replace(&mut self, kind: ChartKind, data: ChartData) {
        let handle = self.ensure(kind);
        self.surface.replace_data(handle, data);
        self.surface.redraw(handle);
    }

    fn ensure(&mut self, kind: ChartKind) -> ChartHandle {
        if let Some(handle) = self.handles.get(&kind) {
            return *handle;
        }
        let handle = self
            .surface
            .create(kind, self.geometry, &ChartData::empty(kind));
        tracing::debug!(?kind, ?handle, "created chart");
        self.handles.insert(kind, handle);
        handle
    }
}

pub fn distribution_data(tally: &RiskTally) -> ChartData {
    ChartData {
        labels: RiskLevel::ALL
            .iter()
            .map(|level| format!("{level} Risk"))
            .collect(),
        series: vec![Series {
            name: "Students".to_string(),
            values: RiskLevel::ALL
                .iter()
                .map(|level| tally.get(*level) as f64)
                .collect(),
        }],
    }
}

pub fn breakdown_data(latest: &LatestIndex) -> ChartData {
    let groups = risk::tally_by_department(latest);
    let column = |level: RiskLevel| -> Vec<f64> {
        groups.iter().map(|group| group.tally.get(level) as f64).collect()
    };

    ChartData {
        labels: groups.iter().map(|group| group.category.clone()).collect(),
        series: level_series(
            column(RiskLevel::Low),
            column(RiskLevel::Medium),
            column(RiskLevel::High),
        ),
    }
}

pub fn sentiment_data(records: &[Record]) -> ChartData {
    let trend = risk::sentiment_trend(records);
    ChartData {
        labels: trend
            .iter()
            .map(|point| point.date.format("%m/%d/%Y").to_string())
            .collect(),
        series: vec![Series {
            name: "Average Sentiment Score".to_string(),
            values: trend.iter().map(|point| point.average).collect(),
        }],
    }
}

fn level_series(low: Vec<f64>, medium: Vec<f64>, high: Vec<f64>) -> Vec<Series> {
    vec![
        Series {
            name: "Low Risk".to_string(),
            values: low,
        },
        Series {
            name: "Medium Risk".to_string(),
            values: medium,
        },
        Series {
            name: "High Risk".to_string(),
            values: high,
        },
    ]
}

const LEVEL_COLORS: [Color; 3] = [Color::Green, Color::Yellow, Color::Red];

struct DrawnChart {
    kind: ChartKind,
    geometry: Geometry,
    data: ChartData,
    buffer: Buffer,
}

/// Draws each chart with ratatui widgets into an off-screen buffer that the
/// terminal view copies into its frame.
#[derive(Default)]
pub struct TerminalSurface {
    next_handle: u64,
    charts: BTreeMap<ChartHandle, DrawnChart>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// Last redraw of every chart, in dashboard order.
    pub fn buffers(&self) -> Vec<&Buffer> {
        let mut charts: Vec<&DrawnChart> = self.charts.values().collect();
        charts.sort_by_key(|chart| chart.kind);
        charts.into_iter().map(|chart| &chart.buffer).collect()
    }

    /// Plain-text copy of every chart for non-interactive output.
    pub fn render_all(&self) -> String {
        self.buffers()
            .into_iter()
            .map(buffer_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ChartSurface for TerminalSurface {
    fn create(&mut self, kind: ChartKind, geometry: Geometry, data: &ChartData) -> ChartHandle {
        self.next_handle += 1;
        let handle = ChartHandle(self.next_handle);
        let chart = DrawnChart {
            kind,
            geometry,
            data: data.clone(),
            buffer: draw(kind, geometry, data),
        };
        self.charts.insert(handle, chart);
        handle
    }

    fn replace_data(&mut self, handle: ChartHandle, data: ChartData) {
        if let Some(chart) = self.charts.get_mut(&handle) {
            chart.data = data;
        }
    }

    fn redraw(&mut self, handle: ChartHandle) {
        if let Some(chart) = self.charts.get_mut(&handle) {
            chart.buffer = draw(chart.kind, chart.geometry, &chart.data);
        }
    }

    fn destroy(&mut self, handle: ChartHandle) {
        self.charts.remove(&handle);
    }
}

fn draw(kind: ChartKind, geometry: Geometry, data: &ChartData) -> Buffer {
    let area = Rect::new(0, 0, geometry.width, geometry.height);
    let mut buffer = Buffer::empty(area);
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        kind.title(),
        Style::default().add_modifier(Modifier::BOLD),
    ));
    let inner = block.inner(area);
    block.render(area, &mut buffer);

    if data.labels.is_empty() {
        Paragraph::new("No data")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray))
            .render(inner, &mut buffer);
        return buffer;
    }

    match kind {
        ChartKind::Distribution => draw_distribution(data, inner, &mut buffer),
        ChartKind::Breakdown => draw_breakdown(data, inner, &mut buffer),
        ChartKind::SentimentTrend => draw_trend(data, inner, &mut buffer),
    }
    buffer
}

fn draw_distribution(data: &ChartData, area: Rect, buffer: &mut Buffer) {
    let values = data
        .series
        .first()
        .map(|series| series.values.as_slice())
        .unwrap_or(&[]);
    let bars: Vec<Bar> = data
        .labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            Bar::default()
                .label(Line::from(label.as_str()))
                .value(bar_value(values.get(i).copied()))
                .style(Style::default().fg(LEVEL_COLORS[i % LEVEL_COLORS.len()]))
        })
        .collect();

    BarChart::default()
        .data(BarGroup::default().bars(&bars))
        .bar_width(bar_width(area.width, bars.len(), bars.len().saturating_sub(1)))
        .bar_gap(1)
        .value_style(Style::default().add_modifier(Modifier::BOLD))
        .render(area, buffer);
}

// One group per department, one bar per risk level inside it.
fn draw_breakdown(data: &ChartData, area: Rect, buffer: &mut Buffer) {
    let groups: Vec<Vec<Bar>> = (0..data.labels.len())
        .map(|i| {
            data.series
                .iter()
                .enumerate()
                .map(|(level, series)| {
                    Bar::default()
                        .value(bar_value(series.values.get(i).copied()))
                        .style(Style::default().fg(LEVEL_COLORS[level % LEVEL_COLORS.len()]))
                })
                .collect()
        })
        .collect();

    let bars = groups.len() * data.series.len().max(1);
    let mut chart = BarChart::default()
        .bar_width(bar_width(area.width, bars, groups.len().saturating_sub(1)))
        .bar_gap(0)
        .group_gap(1);
    for (label, bars) in data.labels.iter().zip(&groups) {
        chart = chart.data(BarGroup::default().label(Line::from(label.as_str())).bars(bars));
    }
    chart.render(area, buffer);
}

fn draw_trend(data: &ChartData, area: Rect, buffer: &mut Buffer) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    let averages = data
        .series
        .first()
        .map(|series| series.values.as_slice())
        .unwrap_or(&[]);
    let points: Vec<u64> = averages.iter().map(|value| bar_value(Some(*value))).collect();
    Sparkline::default()
        .data(&points)
        .max(100)
        .style(Style::default().fg(Color::Cyan))
        .render(rows[0], buffer);

    let first = data.labels.first().map(String::as_str).unwrap_or_default();
    let last = data.labels.last().map(String::as_str).unwrap_or_default();
    let latest = averages.last().copied().unwrap_or(0.0);
    Paragraph::new(Line::from(vec![
        Span::raw(format!("{first} - {last}")),
        Span::styled(
            format!("  latest {latest:.1}"),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ]))
    .render(rows[1], buffer);
}

fn bar_value(value: Option<f64>) -> u64 {
    value.unwrap_or(0.0).max(0.0).round() as u64
}

fn bar_width(available: u16, bars: usize, gaps: usize) -> u16 {
    let bars = u16::try_from(bars.max(1)).unwrap_or(u16::MAX);
    let gaps = u16::try_from(gaps).unwrap_or(u16::MAX);
    (available.saturating_sub(gaps) / bars).max(1)
}

/// Copies `source` into `target` at `area`, clipped to both.
pub fn copy_into(source: &Buffer, target: &mut Buffer, area: Rect) {
    let width = source.area.width.min(area.width);
    let height = source.area.height.min(area.height);
    for y in 0..height {
        for x in 0..width {
            let from = source.cell((source.area.x + x, source.area.y + y));
            let to = target.cell_mut((area.x + x, area.y + y));
            if let (Some(from), Some(to)) = (from, to) {
                *to = from.clone();
            }
        }
    }
}

/// Buffer contents as text, one trimmed line per row.
pub fn buffer_text(buffer: &Buffer) -> String {
    let area = buffer.area;
    let mut out = String::new();
    for y in area.top()..area.bottom() {
        let mut line = String::new();
        for x in area.left()..area.right() {
            if let Some(cell) = buffer.cell((x, y)) {
                line.push_str(cell.symbol());
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
