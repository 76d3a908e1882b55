use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tracing::info;
use weekletter_core::config::WeekletterConfig;

mod app;
mod commands;

use app::App;

#[derive(Parser)]
#[command(name = "weekletter")]
#[command(author, version, about = "Fetches, announces and mines school week letters")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: ~/.weekletter/weekletter.toml)
    #[arg(short, long, env = "WEEKLETTER_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,

    /// Print the stored week letter for a subject
    Show {
        subject: String,
        /// Any date inside the week (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Fetch, announce and extract one week now
    Fetch {
        subject: String,
        /// Any date inside the week (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Manage reminders
    #[command(subcommand)]
    Remind(RemindCommand),

    /// Inspect or clear failed-fetch retry records
    #[command(subcommand)]
    Retry(RetryCommand),

    /// Inspect or toggle scheduled jobs
    #[command(subcommand)]
    Jobs(JobsCommand),

    /// Delete a stored week letter
    Purge {
        subject: String,
        #[arg(long)]
        week: u32,
        #[arg(long)]
        year: i32,
    },
}

#[derive(Subcommand)]
pub enum RemindCommand {
    /// Add a manual reminder
    Add {
        text: String,
        #[arg(short, long)]
        date: NaiveDate,
        /// HH:MM or HH:MM:SS, local time
        #[arg(short, long, value_parser = parse_time)]
        time: NaiveTime,
        /// Deliver to this subject's sinks instead of all sinks
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// List reminders
    List {
        #[arg(short, long)]
        subject: Option<String>,
        /// Include reminders that were already sent
        #[arg(short, long)]
        all: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a reminder by id
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum RetryCommand {
    /// List retry records
    List,

    /// Clear the retry record for one subject and week
    Clear {
        subject: String,
        #[arg(long)]
        week: u32,
        #[arg(long)]
        year: i32,
    },
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List scheduled jobs
    List,
    /// Enable a job
    Enable { name: String },
    /// Disable a job
    Disable { name: String },
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("invalid time '{s}', expected HH:MM or HH:MM:SS"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "weekletter=info,weekletter_scheduler=info,weekletter_pipeline=info,\
                 weekletter_store=info,weekletter_channels=info"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config / WEEKLETTER_CONFIG > ~/.weekletter/weekletter.toml
    let config = WeekletterConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        WeekletterConfig::default()
    });
    let app = App::open(config)?;
    let today = || Local::now().date_naive();

    match cli.command {
        Commands::Run => run(app).await,
        Commands::Show { subject, date } => {
            commands::show(&app, &subject, date.unwrap_or_else(today)).await
        }
        Commands::Fetch { subject, date } => {
            commands::fetch(&app, &subject, date.unwrap_or_else(today)).await
        }
        Commands::Remind(cmd) => commands::remind(&app, cmd),
        Commands::Retry(cmd) => commands::retry(&app, cmd),
        Commands::Jobs(cmd) => commands::jobs(&app, cmd),
        Commands::Purge {
            subject,
            week,
            year,
        } => commands::purge(&app, &subject, week, year),
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    let engine = Arc::new(app.engine()?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));

    info!(subjects = app.config.subjects.len(), "weekletter running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    // signal scheduler to stop; it finishes the in-flight tick first
    let _ = shutdown_tx.send(true);
    handle.await?;
    info!("stopped");
    Ok(())
}
