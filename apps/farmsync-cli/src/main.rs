use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use farm_sync::contract::model::{Category, FieldDraft, JobDraft, JobPatch, JobStatus, Ring};
use farm_sync::domain::session::{AuthEvent, Identity};
use farm_sync::domain::store::MutationOutcome;
use farm_sync::FarmSync;
use runtime::{AppConfig, CliArgs};
use serde::Serialize;

/// FarmSync - field and job synchronization client
#[derive(Parser)]
#[command(name = "farmsync")]
#[command(about = "FarmSync - field and job synchronization client")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use the in-process simulated backend instead of the hosted one
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Identity the command signs in as.
#[derive(Args, Debug, Clone)]
struct SessionArgs {
    #[arg(long, env = "FARMSYNC_USER_ID")]
    user_id: String,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    /// May be repeated; the first address becomes the user's email
    #[arg(long = "email")]
    emails: Vec<String>,
    /// Bearer token of the signed-in session (falls back to the anon key)
    #[arg(long, env = "FARMSYNC_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl SessionArgs {
    fn identity(&self) -> Identity {
        Identity {
            id: self.user_id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email_addresses: self.emails.clone(),
            access_token: self.token.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration
    Check,
    /// Sign in, load every store and print a JSON summary
    Pull {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Create a field
    AddField {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        label: String,
        #[arg(long, default_value = "#4CAF50")]
        color: String,
        /// Area in square meters
        #[arg(long)]
        area: f64,
        /// Polygon rings as JSON, e.g. '[[[23.7,37.9],[23.8,37.9],[23.8,38.0]]]'
        #[arg(long)]
        coordinates: String,
        /// Crop type; may be repeated
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Create a job
    AddJob {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "ongoing")]
        status: JobStatus,
        /// RFC 3339 timestamp
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 timestamp
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        assign_to: Option<String>,
    },
    /// Change the status of a job
    SetJobStatus {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        id: String,
        #[arg(long)]
        status: JobStatus,
    },
    /// Delete a field
    DeleteField {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        id: String,
    },
    /// Delete a job
    DeleteJob {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        mock: cli.mock,
    };

    // Load configuration (normalized home_dir is applied inside)
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, Path::new(&config.app.home_dir));
    tracing::info!("FarmSync starting");

    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => check_config(&config, args.mock),
        command => {
            let app = FarmSync::from_config(&config, args.mock)
                .context("Invalid gateway configuration")?;
            run_command(&app, command).await
        }
    }
}

fn check_config(config: &AppConfig, mock: bool) -> Result<()> {
    tracing::info!("Checking configuration...");

    if !mock {
        let (_, url) = config
            .require_gateway()
            .context("Invalid gateway configuration")?;
        tracing::info!(host = url.host_str().unwrap_or(""), "Gateway endpoint is valid");
    }

    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullSummary<'a> {
    user_id: &'a str,
    fields: serde_json::Value,
    jobs: serde_json::Value,
    due_jobs: Vec<DueJob>,
    assignees: serde_json::Value,
    weather: serde_json::Value,
}

#[derive(Serialize)]
struct DueJob {
    id: String,
    title: String,
    due: String,
}

async fn run_command(app: &FarmSync, command: Commands) -> Result<()> {
    let session = match &command {
        Commands::Check => return Ok(()),
        Commands::Pull { session }
        | Commands::AddField { session, .. }
        | Commands::AddJob { session, .. }
        | Commands::SetJobStatus { session, .. }
        | Commands::DeleteField { session, .. }
        | Commands::DeleteJob { session, .. } => session.clone(),
    };

    app.session
        .handle(AuthEvent::SignedIn(session.identity()))
        .await
        .context("Sign-in failed")?;

    let result = execute(app, command, &session.user_id).await;

    app.session.handle(AuthEvent::SignedOut).await?;
    result
}

async fn execute(app: &FarmSync, command: Commands, user_id: &str) -> Result<()> {
    let outcome = match command {
        Commands::Check => return Ok(()),
        Commands::Pull { .. } => return print_summary(app, user_id),
        Commands::AddField {
            label,
            color,
            area,
            coordinates,
            categories,
            ..
        } => {
            let coordinates: Vec<Ring> = serde_json::from_str(&coordinates)
                .context("--coordinates must be a JSON array of rings")?;
            let draft = FieldDraft {
                label,
                color,
                area,
                coordinates,
                categories: categories.into_iter().map(Category::new).collect(),
            };
            app.fields.add(draft).await
        }
        Commands::AddJob {
            title,
            description,
            status,
            start,
            end,
            location,
            assign_to,
            ..
        } => {
            let draft = JobDraft {
                title,
                description,
                status,
                start_date: start,
                end_date: end,
                location,
                assigned_to_id: assign_to,
            };
            app.jobs.add(draft).await
        }
        Commands::SetJobStatus { id, status, .. } => {
            let patch = JobPatch {
                status: Some(status),
                ..Default::default()
            };
            app.jobs.update(&id, patch).await
        }
        Commands::DeleteField { id, .. } => app.fields.delete(&id).await,
        Commands::DeleteJob { id, .. } => app.jobs.delete(&id).await,
    };

    report(&outcome)
}

fn report(outcome: &MutationOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.success {
        return Ok(());
    }
    bail!(
        "{}",
        outcome.error.as_deref().unwrap_or("operation failed")
    )
}

fn print_summary(app: &FarmSync, user_id: &str) -> Result<()> {
    let fields = app.fields.snapshot();
    let jobs = app.jobs.snapshot();

    if let Some(e) = fields.load_error.as_ref().or(jobs.load_error.as_ref()) {
        tracing::warn!(error = %e, "Some data could not be loaded");
    }

    let now = Utc::now();
    let due_jobs = app
        .jobs
        .due_jobs()
        .into_iter()
        .map(|job| DueJob {
            due: job.due_label(now).to_string(),
            id: job.id,
            title: job.title,
        })
        .collect();

    let summary = PullSummary {
        user_id,
        fields: serde_json::to_value(&fields)?,
        jobs: serde_json::to_value(&jobs)?,
        due_jobs,
        assignees: serde_json::to_value(app.assignees.snapshot())?,
        weather: serde_json::to_value(app.weather.current())?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
