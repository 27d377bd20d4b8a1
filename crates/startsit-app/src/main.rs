// startsit entry point.
//
// Startup sequence:
// 1. Initialize tracing (log file by default, stderr on request)
// 2. Load config
// 3. Open database
// 4. Build the stats and grading adapters
// 5. Start the pipeline
// 6. Run the requested command
// 7. Drain the worker pool on exit

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use startsit_app::Pipeline;
use startsit_core::config;
use startsit_core::db::Database;
use startsit_core::model::{JobId, JobRequest, JobStatusReport, PlayerStatus};
use startsit_football::{DefenseCache, HttpStatsClient};
use startsit_llm::GradingClient;
use tracing::{error, info};

/// Start/sit matchup analysis for a fantasy roster
#[derive(Parser)]
#[command(name = "startsit")]
#[command(about = "Analyze weekly matchups and recommend START, CONSIDER or BENCH")]
struct Cli {
    /// Log to stderr instead of logs/startsit.log
    #[arg(long)]
    log_stderr: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job and wait for it to finish
    Analyze {
        #[arg(long)]
        roster: String,
        /// Opponent team id
        #[arg(long)]
        opponent: String,
        #[arg(long)]
        week: u8,
        #[arg(long)]
        season: u16,
        /// Comma-separated player ids
        #[arg(long, value_delimiter = ',', required = true)]
        players: Vec<String>,
        /// Seconds between status polls
        #[arg(long, default_value = "1")]
        poll_secs: u64,
    },
    /// Show the stored status of a job
    Status { job_id: String },
    /// Finish jobs interrupted by a previous run
    Resume {
        #[arg(long, default_value = "1")]
        poll_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Initialize tracing
    init_tracing(cli.log_stderr)?;
    info!("startsit starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} workers, season {} week {}",
        config.pipeline.workers, config.season.current_season, config.season.current_week
    );

    // 3. Open database
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Adapters
    let stats = DefenseCache::new(
        HttpStatsClient::from_config(&config),
        Duration::from_secs(config.stats.defense_cache_ttl_secs),
    );
    let grading = GradingClient::from_config(&config);
    if grading.is_enabled() {
        info!("Grading provider: {}", grading.name());
    } else {
        info!("Grading disabled, using numeric fallback");
    }

    // 5. Pipeline
    let pipeline = Pipeline::start(&config, Arc::new(stats), grading, db);

    // 6. Command
    let outcome = run_command(&pipeline, cli.command, cli.json).await;
    if let Err(e) = &outcome {
        error!("command failed: {e:#}");
    }

    // 7. Cleanup
    pipeline.shutdown().await;
    info!("startsit shut down cleanly");
    outcome
}

async fn run_command(pipeline: &Pipeline, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Analyze {
            roster,
            opponent,
            week,
            season,
            players,
            poll_secs,
        } => {
            let job_id = pipeline.submit_job(JobRequest {
                roster_id: roster,
                opponent_team_id: opponent,
                week,
                season,
                player_ids: players,
            })?;
            eprintln!("submitted job {job_id}");
            let report = pipeline
                .wait_for_job(job_id, Duration::from_secs(poll_secs.max(1)))
                .await?;
            print_report(&report, json)
        }
        Command::Status { job_id } => {
            let Some(job_id) = JobId::parse(&job_id) else {
                bail!("'{job_id}' is not a valid job id");
            };
            print_report(&pipeline.get_job_status(job_id)?, json)
        }
        Command::Resume { poll_secs } => {
            let resumed = pipeline.resume()?;
            if resumed.is_empty() {
                eprintln!("nothing to resume");
            }
            for job_id in resumed {
                eprintln!("resumed job {job_id}");
                let report = pipeline
                    .wait_for_job(job_id, Duration::from_secs(poll_secs.max(1)))
                    .await?;
                print_report(&report, json)?;
            }
            Ok(())
        }
    }
}

fn print_report(report: &JobStatusReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to serialize report")?
        );
        return Ok(());
    }

    let job = &report.job;
    println!(
        "Job {} [{}] roster {} vs {} | week {} {}",
        job.job_id, job.status, job.roster_id, job.opponent_team_id, job.week, job.season
    );
    if let Some(err) = &job.error {
        println!("  error: {err}");
    }
    println!(
        "  {} completed, {} failed, {} pending/running",
        report.count(PlayerStatus::Completed),
        report.count(PlayerStatus::Failed),
        report.count(PlayerStatus::Pending) + report.count(PlayerStatus::Running),
    );

    for (player_id, result) in &report.players {
        match (&result.analysis, &result.error) {
            (Some(a), _) => println!(
                "  {player_id:<12} {:<9} {:<3} blended {:>5.1} (matchup {:.1}, weather {:.1}, advanced {}) conf {}%\n      {}",
                a.recommendation.label(),
                a.grade.label(),
                a.blended_score,
                a.matchup_score,
                a.weather_impact_score,
                a.advanced_stats_score
                    .map(|s| format!("{s:.1}"))
                    .unwrap_or_else(|| "n/a".to_string()),
                a.confidence,
                a.reasoning,
            ),
            (None, Some(e)) => println!("  {player_id:<12} FAILED    {e}"),
            (None, None) => println!("  {player_id:<12} {}", result.status),
        }
    }
    Ok(())
}

/// Initialize tracing to a log file, or to stderr when asked.
fn init_tracing(to_stderr: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "startsit=info,startsit_app=info,startsit_football=info,startsit_llm=info,warn",
        )
    });

    if to_stderr {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .finish();
        return tracing::subscriber::set_global_default(subscriber)
            .context("failed to set tracing subscriber");
    }

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("startsit.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
