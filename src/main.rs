//! newsreel CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use newsreel::{
    commands::{
        cmd_init, cmd_recover, cmd_retry, cmd_run, cmd_status, print_init, print_recovery_report,
        print_run_stats, print_status, InitOptions, RunOptions,
    },
    config::Config,
    error::{Error, Result},
    meta::MetaDb,
    pipeline::PipelineMode,
    progress::{hide_progress, LogWriterFactory},
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code when another runner holds the pipeline lease
const EXIT_LOCKED: i32 = 2;

#[derive(Parser)]
#[command(name = "newsreel")]
#[command(version, about = "Ingest, classify and analyse news-agency media bundles", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize newsreel configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one batch for a source
    Run {
        /// Source name from the config file
        #[arg(short, long)]
        source: String,

        /// Storage backend override
        #[arg(long)]
        storage: Option<String>,

        /// Maximum number of analysis calls
        #[arg(short, long)]
        limit: Option<usize>,

        /// Prompt version (defaults to analysis.default_prompt_version)
        #[arg(long)]
        prompt_version: Option<String>,

        /// Pipeline mode: text, video or full
        #[arg(short, long, default_value = "text")]
        mode: PipelineMode,
    },

    /// Reset resources stuck in processing
    RecoverStuck {
        /// Seconds without progress before a resource counts as stuck
        #[arg(long)]
        timeout: Option<u64>,

        /// Report without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Queue recent text and video failures for another run
    RetryFailed {
        /// Look back this many days
        #[arg(long)]
        days: Option<u32>,

        /// Only this source
        #[arg(short, long)]
        source: Option<String>,

        /// Maximum number of resources to queue
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show resource counts and the latest run per source
    Status {
        /// Only this source
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        let code = if matches!(e, Error::Locked(_)) {
            EXIT_LOCKED
        } else {
            1
        };
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.json || cli.json_logs {
        hide_progress();
    }
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(LogWriterFactory::default()))
            .with(filter)
            .init();
    }

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let (base_dir, config_path) = init_paths(cli.config);
        let config = cmd_init(InitOptions {
            base_dir,
            config_path,
            force,
        })
        .await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            print_init(&config);
        }
        return Ok(());
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "newsreel", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::new(&config.paths.db_file).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),
        Commands::Run {
            source,
            storage,
            limit,
            prompt_version,
            mode,
        } => {
            let options = RunOptions {
                source: source.clone(),
                storage,
                limit,
                prompt_version,
                mode,
            };
            let stats = cmd_run(&config, &db, options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_run_stats(&source, mode, &stats);
            }
        }
        Commands::RecoverStuck { timeout, dry_run } => {
            let report = cmd_recover(&config, &db, timeout, dry_run).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_recovery_report("Stuck-job recovery", &report);
            }
        }
        Commands::RetryFailed {
            days,
            source,
            limit,
        } => {
            let report = cmd_retry(&config, &db, days, source.as_deref(), limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_recovery_report("Failed-resource retry", &report);
            }
        }
        Commands::Status { source } => {
            let status = cmd_status(&config, &db, source.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

/// Base directory and config file for `init`: a `.toml` path names the file,
/// any other path names the directory
fn init_paths(config: Option<PathBuf>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            (base, path)
        }
        Some(dir) => {
            let config_path = dir.join("config.toml");
            (dir, config_path)
        }
        None => (Config::default_base_dir(), Config::default_config_path()),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
