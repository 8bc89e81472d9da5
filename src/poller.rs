//! The dashboard polling-and-render loop.
//!
//! All state lives in [`DashboardState`] and is only touched from the loop in
//! [`Poller::run`]. Fetches run as spawned tasks and report back over a
//! channel tagged with a generation number, so a slow response can never
//! overwrite a newer render.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::charts::{ChartSurface, ChartSync, Geometry};
use crate::client::DashboardApi;
use crate::error::{DashboardError, Result};
use crate::events::{Subscribers, Subscription};
use crate::models::{PredictionInput, PredictionResult, Record, Tone};
use crate::risk::{self, Aggregate};
use crate::table::{self, RowAction, RowActionKind, RowModel};
use crate::toast::Toaster;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// First cycle when the view opens. Shows the loading placeholders but,
    /// unlike a manual refresh, no "Dashboard Updated" toast.
    Initial,
    Tick,
    Manual,
}

impl CycleKind {
    fn shows_loading(self) -> bool {
        !matches!(self, CycleKind::Tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    pub generation: u64,
    pub kind: CycleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied,
    Failed,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Refresh,
    Show,
    Hide,
    Row(RowAction),
    CloseDetail,
    Retrain,
    /// Re-render without touching state, e.g. after a resize or a keystroke.
    Redraw,
    Shutdown,
}

enum Completion {
    Cycle {
        ticket: CycleTicket,
        result: Result<Vec<Record>>,
    },
    Prediction {
        student_id: String,
        result: Result<PredictionResult>,
    },
    Retrain(Result<()>),
}

pub trait DashboardView<S> {
    fn render(&mut self, state: &DashboardState<S>);

    fn show_detail(&mut self, record: &Record);

    fn close_detail(&mut self);

    /// Size the charts should be drawn at, if the view knows it.
    fn chart_geometry(&self) -> Option<Geometry> {
        None
    }
}

pub struct DashboardState<S> {
    pub rows: Vec<RowModel>,
    pub aggregate: Aggregate,
    pub last_updated: Option<DateTime<Local>>,
    pub charts: ChartSync<S>,
    pub toasts: Toaster,
    records: Vec<Record>,
    phase: PollPhase,
    loading: usize,
    issued: u64,
    applied: u64,
    retrain_notice: Option<Uuid>,
}

impl<S: ChartSurface> DashboardState<S> {
    pub fn new(charts: ChartSync<S>, toasts: Toaster) -> Self {
        DashboardState {
            rows: Vec::new(),
            aggregate: Aggregate::default(),
            last_updated: None,
            charts,
            toasts,
            records: Vec::new(),
            phase: PollPhase::Idle,
            loading: 0,
            issued: 0,
            applied: 0,
            retrain_notice: None,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// True while any cycle that shows placeholders is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading > 0
    }

    pub fn applied_generation(&self) -> u64 {
        self.applied
    }

    pub fn is_retraining(&self) -> bool {
        self.retrain_notice.is_some()
    }

    /// Marks a retrain as running. Returns false if one already is.
    pub fn begin_retrain(&mut self) -> bool {
        if self.retrain_notice.is_some() {
            return false;
        }
        let notice = self.toasts.show(
            "Retraining Model",
            "Model retraining has started. This may take a few minutes...",
            Tone::Info,
        );
        self.retrain_notice = Some(notice);
        true
    }

    pub fn finish_retrain(&mut self, result: Result<()>) {
        if let Some(notice) = self.retrain_notice.take() {
            self.toasts.dismiss(notice);
        }
        match result {
            Ok(()) => {
                self.toasts.show(
                    "Retraining Complete",
                    "Model has been retrained successfully.",
                    Tone::Success,
                );
            }
            Err(err) => {
                tracing::warn!(%err, "model retraining failed");
                self.toasts.show("Retraining Error", err.to_string(), Tone::Danger);
            }
        }
    }

    /// Rebuilds the charts at `geometry` from the last applied records.
    pub fn resize_charts(&mut self, geometry: Geometry) {
        if geometry == self.charts.geometry() {
            return;
        }
        self.charts.reset_geometry(geometry);
        if self.applied > 0 {
            self.update_charts();
        }
    }

    pub fn begin_cycle(&mut self, kind: CycleKind) -> CycleTicket {
        self.issued += 1;
        if kind.shows_loading() {
            self.loading += 1;
        }
        tracing::debug!(generation = self.issued, ?kind, "cycle started");
        CycleTicket {
            generation: self.issued,
            kind,
        }
    }

    pub fn complete_cycle(&mut self, ticket: CycleTicket, result: Result<Vec<Record>>) -> CycleOutcome {
        if ticket.kind.shows_loading() {
            self.loading = self.loading.saturating_sub(1);
        }

        if ticket.generation < self.applied {
            tracing::debug!(
                generation = ticket.generation,
                applied = self.applied,
                "discarding stale cycle"
            );
            return CycleOutcome::Stale;
        }

        match result {
            Ok(records) => {
                let count = records.len();
                self.apply(records);
                self.applied = ticket.generation;
                tracing::info!(
                    generation = ticket.generation,
                    records = count,
                    high = self.aggregate.tally.high,
                    "dashboard refreshed"
                );
                if ticket.kind == CycleKind::Manual {
                    self.toasts.show(
                        "Dashboard Updated",
                        "Dashboard data has been refreshed successfully.",
                        Tone::Success,
                    );
                }
                CycleOutcome::Applied
            }
            Err(err) => {
                tracing::warn!(generation = ticket.generation, %err, "dashboard data loading failed");
                self.toasts.show("Data Loading Error", err.to_string(), Tone::Danger);
                CycleOutcome::Failed
            }
        }
    }

    fn apply(&mut self, records: Vec<Record>) {
        self.aggregate = risk::aggregate(&records);
        self.rows = table::build_rows(&records);
        self.records = records;
        self.update_charts();
        self.last_updated = Some(Local::now());
    }

    fn update_charts(&mut self) {
        self.charts.update_distribution(&self.aggregate.tally);
        self.charts.update_breakdown(&self.aggregate.latest);
        self.charts.update_sentiment_trend(&self.records);
    }

    fn latest(&self, student_id: &str) -> Result<&Record> {
        self.aggregate
            .latest
            .get(student_id)
            .ok_or_else(|| DashboardError::action("lookup", format!("no record for student {student_id}")))
    }
}

/// Cloneable entry point for the console and other producers of commands.
#[derive(Clone)]
pub struct PollerHandle {
    commands: UnboundedSender<Command>,
    actions: Subscribers<RowAction>,
}

impl PollerHandle {
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Dispatches a row action to every registered handler.
    pub fn dispatch(&self, action: &RowAction) -> usize {
        self.actions.emit(action)
    }
}

pub struct Poller<A, S, V> {
    api: Arc<A>,
    state: DashboardState<S>,
    view: V,
    period: Duration,
    timer: Option<Interval>,
    commands_tx: UnboundedSender<Command>,
    commands: UnboundedReceiver<Command>,
    completions_tx: UnboundedSender<Completion>,
    completions: UnboundedReceiver<Completion>,
    actions: Subscribers<RowAction>,
    _row_actions: Subscription,
}

impl<A, S, V> Poller<A, S, V>
where
    A: DashboardApi,
    S: ChartSurface,
    V: DashboardView<S>,
{
    pub fn new(api: Arc<A>, state: DashboardState<S>, view: V, period: Duration) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let actions = Subscribers::new();

        // Row actions reach the loop through the registry; rendering never
        // touches this wiring.
        let forward = commands_tx.clone();
        let row_actions = actions.subscribe(move |action: &RowAction| {
            let _ = forward.send(Command::Row(action.clone()));
        });

        Poller {
            api,
            state,
            view,
            period,
            timer: None,
            commands_tx,
            commands,
            completions_tx,
            completions,
            actions,
            _row_actions: row_actions,
        }
    }

    pub fn handle(&self) -> PollerHandle {
        PollerHandle {
            commands: self.commands_tx.clone(),
            actions: self.actions.clone(),
        }
    }

    pub async fn run(mut self) {
        self.start();
        self.redraw();

        loop {
            let expiry = self.state.toasts.next_expiry();
            tokio::select! {
                _ = next_tick(&mut self.timer) => {
                    self.spawn_cycle(CycleKind::Tick);
                }
                Some(completion) = self.completions.recv() => {
                    self.complete(completion);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = sleep_until(expiry) => {}
            }

            self.state.toasts.prune(Instant::now());
            self.redraw();
        }

        tracing::info!("dashboard loop stopped");
    }

    fn redraw(&mut self) {
        if let Some(geometry) = self.view.chart_geometry() {
            self.state.resize_charts(geometry);
        }
        self.view.render(&self.state);
    }

    fn start(&mut self) {
        self.state.phase = PollPhase::Active;
        self.spawn_cycle(CycleKind::Initial);
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        if self.timer.is_none() {
            let mut interval = interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.timer = Some(interval);
            tracing::info!(period_secs = self.period.as_secs_f64(), "refresh timer armed");
        }
        self.state.phase = PollPhase::Active;
    }

    fn disarm_timer(&mut self) {
        if self.timer.take().is_some() {
            tracing::info!("refresh timer cancelled");
        }
        self.state.phase = PollPhase::Idle;
    }

    fn spawn_cycle(&mut self, kind: CycleKind) -> CycleTicket {
        let ticket = self.state.begin_cycle(kind);
        let api = Arc::clone(&self.api);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_records().await;
            let _ = done.send(Completion::Cycle { ticket, result });
        });
        ticket
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh => {
                self.spawn_cycle(CycleKind::Manual);
            }
            Command::Hide => self.disarm_timer(),
            // Regaining visibility re-arms without an immediate fetch.
            Command::Show => self.arm_timer(),
            Command::Row(action) => self.handle_row_action(action),
            Command::CloseDetail => self.view.close_detail(),
            Command::Retrain => self.start_retrain(),
            Command::Redraw | Command::Shutdown => {}
        }
    }

    fn handle_row_action(&mut self, action: RowAction) {
        tracing::debug!(?action, "row action");
        let student_id = action.student_id;
        match action.kind {
            RowActionKind::ViewDetail => match self.state.latest(&student_id) {
                Ok(record) => self.view.show_detail(record),
                Err(err) => {
                    self.state
                        .toasts
                        .show("Record Details Error", err.to_string(), Tone::Danger);
                }
            },
            RowActionKind::RePredict => {
                let input = match self.state.latest(&student_id).and_then(prediction_input) {
                    Ok(input) => input,
                    Err(err) => {
                        self.state
                            .toasts
                            .show("Re-prediction Error", err.to_string(), Tone::Danger);
                        return;
                    }
                };
                self.state.toasts.show(
                    "Re-prediction",
                    format!("Re-prediction requested for student {student_id}."),
                    Tone::Info,
                );
                let api = Arc::clone(&self.api);
                let done = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = api.predict(input).await;
                    let _ = done.send(Completion::Prediction { student_id, result });
                });
            }
            RowActionKind::SendAlert => match self.state.latest(&student_id) {
                Ok(_) => {
                    self.state.toasts.show(
                        "Alert Sent",
                        format!("Alert queued for student {student_id}."),
                        Tone::Info,
                    );
                }
                Err(err) => {
                    self.state
                        .toasts
                        .show("Send Alert Error", err.to_string(), Tone::Danger);
                }
            },
        }
    }

    fn start_retrain(&mut self) {
        if !self.state.begin_retrain() {
            self.state.toasts.show(
                "Retraining Model",
                "Model retraining is already in progress.",
                Tone::Warning,
            );
            return;
        }
        let api = Arc::clone(&self.api);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.retrain().await;
            let _ = done.send(Completion::Retrain(result));
        });
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Cycle { ticket, result } => {
                self.state.complete_cycle(ticket, result);
            }
            Completion::Prediction { student_id, result } => match result {
                Ok(prediction) => {
                    self.state.toasts.show(
                        "Re-prediction Complete",
                        format!(
                            "Student {student_id} is now {} risk ({}%).",
                            prediction.risk_level, prediction.risk_percentage
                        ),
                        prediction.risk_level.tone(),
                    );
                    // Pick up the new record without a second toast.
                    self.spawn_cycle(CycleKind::Tick);
                }
                Err(err) => {
                    self.state
                        .toasts
                        .show("Re-prediction Error", err.to_string(), Tone::Danger);
                }
            },
            Completion::Retrain(result) => self.state.finish_retrain(result),
        }
    }
}

fn prediction_input(record: &Record) -> Result<PredictionInput> {
    let missing = |metric: &str| {
        DashboardError::action(
            "re-prediction",
            format!("{metric} is missing for student {}", record.student_id),
        )
    };
    Ok(PredictionInput {
        student_id: record.student_id.clone(),
        attendance: record.attendance.ok_or_else(|| missing("attendance"))?,
        assignment_score: record
            .assignment_score
            .ok_or_else(|| missing("assignment score"))?,
        test_score: record.test_score.ok_or_else(|| missing("test score"))?,
    })
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
