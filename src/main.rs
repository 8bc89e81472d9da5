use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use tracing_subscriber::EnvFilter;

use groupscholar_dropout_dashboard::charts::{ChartSync, TerminalSurface};
use groupscholar_dropout_dashboard::client::{ApiClient, DashboardApi};
use groupscholar_dropout_dashboard::config::DashboardConfig;
use groupscholar_dropout_dashboard::forms;
use groupscholar_dropout_dashboard::models::{LoginOutcome, PredictionInput};
use groupscholar_dropout_dashboard::poller::{
    Command, CycleKind, CycleOutcome, DashboardState, Poller, PollerHandle,
};
use groupscholar_dropout_dashboard::report;
use groupscholar_dropout_dashboard::table::{RowAction, RowActionKind};
use groupscholar_dropout_dashboard::toast::Toaster;
use groupscholar_dropout_dashboard::view::{self, Prompt, TerminalView};

#[derive(Parser)]
#[command(name = "dropout-dashboard")]
#[command(about = "Live dropout-risk dashboard for Group Scholar advisors", long_about = None)]
struct Cli {
    /// Dashboard server, e.g. http://localhost:5000
    #[arg(long, env = "DASHBOARD_URL", global = true)]
    base_url: Option<String>,

    /// Anti-forgery token sent as X-CSRFToken
    #[arg(long, env = "DASHBOARD_CSRF_TOKEN", hide_env_values = true, global = true)]
    csrf_token: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the server and keep the dashboard on screen
    Watch {
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
        #[arg(long, default_value_t = 5)]
        toast_secs: u64,
    },
    /// Run one refresh cycle and print the dashboard
    Snapshot,
    /// Write a markdown report of the current records
    Report {
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
    /// Submit a dropout-risk prediction
    Predict {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        attendance: f64,
        #[arg(long)]
        assignment_score: f64,
        #[arg(long)]
        test_score: f64,
    },
    /// Analyse the sentiment of student feedback
    Sentiment {
        #[arg(long)]
        text: String,
    },
    /// Check credentials against the login form
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Ask the server to retrain the risk model
    Retrain,
    /// Download all records as CSV
    Export {
        #[arg(long, default_value = "records.csv")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let base_url = cli
        .base_url
        .context("DASHBOARD_URL or --base-url must point at the dashboard server")?;
    let config = DashboardConfig::new(base_url, cli.csrf_token.unwrap_or_default());

    match cli.command {
        Commands::Watch {
            interval_secs,
            toast_secs,
        } => {
            let config = config
                .with_poll_interval(Duration::from_secs(interval_secs))
                .with_toast_ttl(Duration::from_secs(toast_secs));
            watch(config).await?;
        }
        Commands::Snapshot => {
            let client = connect(&config)?;
            let mut state = DashboardState::new(
                ChartSync::new(TerminalSurface::new(), config.chart_geometry),
                Toaster::new(config.toast_ttl),
            );
            let ticket = state.begin_cycle(CycleKind::Initial);
            let result = client.fetch_records().await;
            let outcome = state.complete_cycle(ticket, result);
            print!("{}", view::render_frame(&state));
            if outcome == CycleOutcome::Failed {
                anyhow::bail!("dashboard refresh failed");
            }
        }
        Commands::Report { out } => {
            let client = connect(&config)?;
            let records = client
                .fetch_records()
                .await
                .context("failed to load dashboard data")?;
            let report = report::build_report(chrono::Local::now(), &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Predict {
            student_id,
            attendance,
            assignment_score,
            test_score,
        } => {
            let client = connect(&config)?;
            let result = client
                .predict(PredictionInput {
                    student_id,
                    attendance,
                    assignment_score,
                    test_score,
                })
                .await
                .context("prediction failed")?;
            println!("Risk Level: {} ({}%)", result.risk_level, result.risk_percentage);
            println!("{}", forms::risk_interpretation(Some(result.risk_level)));
        }
        Commands::Sentiment { text } => {
            let client = connect(&config)?;
            let result = client
                .analyze_sentiment(&text)
                .await
                .context("sentiment analysis failed")?;
            let band = forms::sentiment_band(result.sentiment_score_percent);
            println!("Sentiment: {} ({}%)", band.label, result.sentiment_score_percent);
            println!("{}", band.interpretation);
        }
        Commands::Login { username, password } => {
            let client = connect(&config)?;
            match client.login(&username, &password).await.context("login failed")? {
                LoginOutcome::Redirect(target) => println!("Logged in. Continue at {target}."),
                LoginOutcome::Accepted => println!("Logged in."),
            }
        }
        Commands::Retrain => {
            let client = connect(&config)?;
            println!("Model retraining has started. This may take a few minutes...");
            client.retrain().await.context("model retraining failed")?;
            println!("Model has been retrained successfully.");
        }
        Commands::Export { out } => {
            let client = connect(&config)?;
            let rows = client
                .export_records(&out)
                .await
                .context("export failed")?;
            println!("Exported {rows} records to {}.", out.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn connect(config: &DashboardConfig) -> anyhow::Result<ApiClient> {
    ApiClient::new(&config.client()).context("failed to build HTTP client")
}

async fn watch(config: DashboardConfig) -> anyhow::Result<()> {
    let client = Arc::new(connect(&config)?);
    let toasts = Toaster::new(config.toast_ttl);
    let _toast_log = toasts.subscribe(|toast| {
        tracing::info!(title = %toast.title, message = %toast.message, "toast");
    });
    let state = DashboardState::new(
        ChartSync::new(TerminalSurface::new(), config.chart_geometry),
        toasts,
    );

    let prompt = Prompt::default();
    let view = TerminalView::new(prompt.clone()).context("failed to prepare terminal")?;
    let poller = Poller::new(client, state, view, config.poll_interval);
    let handle = poller.handle();
    let mut loop_task = tokio::spawn(poller.run());

    // Raw-mode key reads block, so they stay off the runtime.
    let console = handle.clone();
    std::thread::spawn(move || read_keys(&console, &prompt));

    tokio::select! {
        joined = &mut loop_task => joined.context("dashboard loop panicked")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            handle.send(Command::Shutdown);
            loop_task.await.context("dashboard loop panicked")?;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum ConsoleInput {
    Command(Command),
    Row(RowAction),
    Unknown(String),
}

fn parse_console_line(line: &str) -> Option<ConsoleInput> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let argument = words.next();

    let row = |kind| match argument {
        Some(id) => ConsoleInput::Row(RowAction {
            kind,
            student_id: id.to_string(),
        }),
        None => ConsoleInput::Unknown(format!("{verb} needs a student id")),
    };

    Some(match verb {
        "refresh" | "r" => ConsoleInput::Command(Command::Refresh),
        "hide" => ConsoleInput::Command(Command::Hide),
        "show" => ConsoleInput::Command(Command::Show),
        "retrain" => ConsoleInput::Command(Command::Retrain),
        "close" => ConsoleInput::Command(Command::CloseDetail),
        "quit" | "q" | "exit" => ConsoleInput::Command(Command::Shutdown),
        "view" => row(RowActionKind::ViewDetail),
        "predict" => row(RowActionKind::RePredict),
        "alert" => row(RowActionKind::SendAlert),
        other => ConsoleInput::Unknown(format!("unknown command {other:?}")),
    })
}

fn submit(handle: &PollerHandle, prompt: &Prompt, line: &str) -> bool {
    match parse_console_line(line) {
        Some(ConsoleInput::Command(command)) => {
            let quit = command == Command::Shutdown;
            return handle.send(command) && !quit;
        }
        Some(ConsoleInput::Row(action)) => {
            handle.dispatch(&action);
        }
        Some(ConsoleInput::Unknown(message)) => prompt.notice(message),
        None => {}
    }
    handle.send(Command::Redraw)
}

fn read_keys(handle: &PollerHandle, prompt: &Prompt) {
    loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%err, "failed to read terminal input");
                return;
            }
        };
        let running = match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    handle.send(Command::Shutdown);
                    false
                }
                KeyCode::Enter => submit(handle, prompt, &prompt.take()),
                KeyCode::Esc => {
                    if prompt.clear() {
                        handle.send(Command::Redraw)
                    } else {
                        handle.send(Command::CloseDetail)
                    }
                }
                KeyCode::Backspace => {
                    prompt.backspace();
                    handle.send(Command::Redraw)
                }
                KeyCode::Char(c) => {
                    prompt.push(c);
                    handle.send(Command::Redraw)
                }
                _ => true,
            },
            Event::Resize(..) => handle.send(Command::Redraw),
            _ => true,
        };
        if !running {
            return;
        }
    }
}
