//! minicron - a single-node background job scheduler.
//!
//! Usage:
//!   minicron run                 Run the engine in the foreground
//!   minicron enable|disable      Toggle scheduling in a running engine
//!   minicron status              Report whether scheduling is enabled
//!   minicron quit                Ask a running engine to shut down
//!   minicron list                List jobs and their next run times
//!   minicron export|import       Bulk YAML configuration transfer

use clap::{Parser, Subcommand};
use minicron::config::{self, ConflictStrategy};
use minicron::control::{
    machine_socket_path, send_command, user_socket_path, ClientError, ControlHandler,
    ControlServer, EndpointScope,
};
use minicron::{CronEngine, JobStore, LogStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// minicron - a single-node background job scheduler
#[derive(Parser)]
#[command(name = "minicron")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding jobs.json and logs.jsonl
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in the foreground
    Run {
        /// Also serve the machine-scoped control endpoint (service mode)
        #[arg(long)]
        machine_endpoint: bool,
    },

    /// Enable scheduling in a running engine
    Enable,

    /// Disable scheduling in a running engine
    Disable,

    /// Report whether scheduling is enabled
    Status,

    /// Ask a running engine to shut down
    Quit,

    /// Ask a running engine to surface its main window
    Open,

    /// List jobs and their computed next run times
    List,

    /// Tail the execution log
    Logs {
        /// Only show entries for this job id
        #[arg(long)]
        job: Option<String>,

        /// How many entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Export the job collection as YAML to stdout
    Export {
        /// Include the engine-wide enabled flag
        #[arg(long)]
        include_state: bool,

        /// Only export enabled jobs
        #[arg(long)]
        only_enabled: bool,
    },

    /// Import a YAML payload from a file
    Import {
        /// Path to the YAML payload
        file: PathBuf,

        /// Collision handling: coexist or overwrite
        #[arg(long, default_value = "coexist")]
        on_conflict: String,
    },
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("minicron"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn build_engine(data_dir: &std::path::Path) -> Arc<CronEngine> {
    CronEngine::new(
        JobStore::new(data_dir.join("jobs.json")),
        LogStore::new(data_dir.join("logs.jsonl")),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Run { machine_endpoint } => run_engine(data_dir, machine_endpoint).await?,
        Commands::Enable => control_command("enable").await,
        Commands::Disable => control_command("disable").await,
        Commands::Status => control_command("status").await,
        Commands::Quit => control_command("quit").await,
        Commands::Open => control_command("open").await,
        Commands::List => list_jobs(data_dir).await?,
        Commands::Logs { job, limit } => list_logs(data_dir, job, limit).await?,
        Commands::Export {
            include_state,
            only_enabled,
        } => export_jobs(data_dir, include_state, only_enabled).await?,
        Commands::Import { file, on_conflict } => {
            import_jobs(data_dir, file, &on_conflict).await?
        }
    }

    Ok(())
}

/// Run the engine in the foreground until Ctrl+C or a `quit` control
/// command.
async fn run_engine(
    data_dir: PathBuf,
    machine_endpoint: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("data directory: {}", data_dir.display());

    let engine = build_engine(&data_dir);
    if let Err(e) = engine.load().await {
        warn!("failed to load job snapshot: {e}");
    }

    let jobs = engine.list_jobs().await;
    info!("loaded {} job(s)", jobs.len());
    for overview in &jobs {
        let state = if overview.job.enabled { "" } else { " (disabled)" };
        match overview.next_run_at {
            Some(next) => info!("  - {}{}: next run {}", overview.job.name, state, next),
            None => info!("  - {}{}", overview.job.name, state),
        }
    }

    let shutdown = CancellationToken::new();
    let handler = Arc::new(ControlHandler::new(Arc::clone(&engine), shutdown.clone()));

    let user_server = match ControlServer::bind(
        user_socket_path(),
        EndpointScope::User,
        Arc::clone(&handler),
    ) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("failed to bind user control endpoint: {e}");
            None
        }
    };
    let machine_server = if machine_endpoint {
        match ControlServer::bind(machine_socket_path(), EndpointScope::Machine, handler) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("failed to bind machine control endpoint: {e}");
                None
            }
        }
    } else {
        None
    };

    // Surface execution outcomes in the log, best-effort.
    let mut executed = engine.subscribe_executed(16);
    tokio::spawn(async move {
        while let Some(entry) = executed.recv().await {
            if entry.success() {
                info!("executed '{}': ok", entry.job_name);
            } else {
                warn!(
                    "executed '{}': exit={} {}",
                    entry.job_name, entry.exit_code, entry.error
                );
            }
        }
    });

    info!("engine running; press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = shutdown.cancelled() => info!("quit requested, shutting down"),
    }

    engine.shutdown().await;
    if let Some(server) = user_server {
        server.shutdown().await;
    }
    if let Some(server) = machine_server {
        server.shutdown().await;
    }
    Ok(())
}

/// Send one control command to a running engine and print the outcome.
async fn control_command(cmd: &str) {
    match send_command(cmd).await {
        Ok(resp) if resp.ok => {
            if cmd == "status" {
                match resp.global_enabled {
                    Some(true) => println!("enabled"),
                    Some(false) => println!("disabled"),
                    None => {
                        if let Some(message) = resp.message {
                            println!("{message}");
                        }
                    }
                }
            } else if let Some(message) = resp.message {
                println!("{message}");
            }
        }
        Ok(resp) => {
            let reason = resp
                .error
                .or(resp.message)
                .unwrap_or_else(|| "request failed".into());
            eprintln!("{reason}");
            std::process::exit(1);
        }
        Err(ClientError::NotRunning) => {
            eprintln!("minicron is not running");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    }
}

/// List jobs from the data directory.
async fn list_jobs(data_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(&data_dir);
    engine.load().await?;

    let jobs = engine.list_jobs().await;
    if jobs.is_empty() {
        println!("no jobs in {}", data_dir.display());
        return Ok(());
    }

    for overview in jobs {
        let job = &overview.job;
        println!("{} [{}]", job.name, job.id);
        println!("  cron: {}", job.cron);
        println!("  command: {}", job.command_line());
        println!("  enabled: {}", job.enabled);
        if job.consecutive_failures > 0 {
            println!(
                "  failures: {}/{}",
                job.consecutive_failures, job.max_consecutive_failures
            );
        }
        if let Some(next) = overview.next_run_at {
            println!("  next run: {next}");
        }
    }
    engine.shutdown().await;
    Ok(())
}

/// Print the most recent execution log entries.
async fn list_logs(
    data_dir: PathBuf,
    job: Option<String>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(&data_dir);
    let job_id = job.map(minicron::JobId::new);
    let entries = engine.list_logs(job_id.as_ref(), limit).await?;

    for entry in entries {
        let when = entry
            .finished_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let status = if entry.success() {
            "ok".to_string()
        } else {
            format!("exit={} {}", entry.exit_code, entry.error)
        };
        println!("{when} {} [{}] {status}", entry.job_name, entry.command_line);
    }
    Ok(())
}

/// Export the job collection as YAML to stdout.
async fn export_jobs(
    data_dir: PathBuf,
    include_state: bool,
    only_enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(&data_dir);
    engine.load().await?;

    let yaml = config::export_yaml(&engine, include_state, only_enabled).await?;
    print!("{yaml}");
    engine.shutdown().await;
    Ok(())
}

/// Import a YAML payload into the job collection.
async fn import_jobs(
    data_dir: PathBuf,
    file: PathBuf,
    on_conflict: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let strategy: ConflictStrategy = on_conflict.parse()?;
    let text = tokio::fs::read_to_string(&file).await?;

    let engine = build_engine(&data_dir);
    engine.load().await?;

    let imported = config::import_yaml(&engine, &text, strategy).await?;
    println!("imported {imported} job(s)");
    engine.shutdown().await;
    Ok(())
}
