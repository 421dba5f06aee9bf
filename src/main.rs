mod build;
mod config;
mod error;
mod sources;
mod traits;
mod types;
mod utils;

use anyhow::{Context, Result};
use build::Sequencer;
use clap::{Parser, Subcommand};
use config::Settings;
use error::MirrorError;
use sources::get_manager;
use std::env;
use std::path::PathBuf;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mirrorbuild")]
#[command(about = "Mirror-aware build steps for Debian based Python images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ~/.config/mirrorbuild/settings.toml, then built-ins)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole build sequence (e.g., mirrorbuild build --no-start)
    Build {
        /// Stop after copying the application source
        #[arg(long)]
        no_start: bool,

        /// Log each step without executing it
        #[arg(long)]
        dry_run: bool,

        /// Back up rewritten config files first
        #[arg(long)]
        backup: bool,
    },
    /// Start the application server only
    Start {
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the build sequence
    Plan {
        #[arg(long)]
        json: bool,

        #[arg(long)]
        no_start: bool,
    },
    /// Apply a single mirror step (e.g., mirrorbuild use apt)
    Use {
        /// The tool name (apt, pip)
        name: String,

        #[arg(long)]
        backup: bool,
    },
    /// Show current configuration (e.g., mirrorbuild status [pip])
    Status {
        /// The tool name. If omitted, shows all.
        name: Option<String>,
    },
    /// Probe the configured mirrors
    Check,
    /// Restore the configuration from the latest backup
    Restore {
        /// The tool name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    debug!("Arguments: {:?}", cli);

    if let Err(err) = run(cli).await {
        error!("{:#}", err);
        let code = err
            .downcast_ref::<MirrorError>()
            .map(MirrorError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Build {
            no_start,
            dry_run,
            backup,
        } => {
            if backup {
                enable_backups(&mut settings);
            }
            handle_build(&settings, !no_start, dry_run).await?
        }
        Commands::Start { dry_run } => {
            let steps = [build::start_step(&settings)];
            Sequencer::new(&settings).dry_run(dry_run).run(&steps).await?
        }
        Commands::Plan { json, no_start } => handle_plan(&settings, !no_start, json)?,
        Commands::Use { name, backup } => {
            if backup {
                enable_backups(&mut settings);
            }
            handle_use(&settings, &name).await?
        }
        Commands::Status { name } => handle_status(&settings, name).await?,
        Commands::Check => handle_check(&settings).await?,
        Commands::Restore { name } => handle_restore(&settings, &name).await?,
    }

    Ok(())
}

fn enable_backups(settings: &mut Settings) {
    settings.apt.backup = true;
    settings.pip.backup = true;
}

// --- Handlers ---

async fn handle_build(settings: &Settings, start: bool, dry_run: bool) -> Result<()> {
    let steps = build::plan(settings, start);
    Sequencer::new(settings).dry_run(dry_run).run(&steps).await?;
    info!("Build sequence finished");
    Ok(())
}

fn handle_plan(settings: &Settings, start: bool, json: bool) -> Result<()> {
    let steps = build::plan(settings, start);
    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }
    for (i, step) in steps.iter().enumerate() {
        println!("{:>2}. {:<22} {:?}", i + 1, step.name, step.action);
    }
    Ok(())
}

async fn handle_use(settings: &Settings, name: &str) -> Result<()> {
    let manager = get_manager(name, settings)?;

    if manager.requires_sudo() {
        info!("Modifying {} config usually requires root permissions", name);
    }

    let summary = manager.apply().await?;
    println!("{}: {}", manager.name(), summary);
    Ok(())
}

async fn handle_status(settings: &Settings, name: Option<String>) -> Result<()> {
    let tools = match name {
        Some(n) => vec![n],
        None => sources::SUPPORTED_TOOLS
            .iter()
            .map(|&s| s.to_string())
            .collect(),
    };

    println!("{}", "-".repeat(70));
    println!("{:<6} {:<42} Status", "Tool", "Current Source URL");
    println!("{}", "-".repeat(70));

    for tool_name in tools {
        let manager = get_manager(&tool_name, settings)?;

        // 读取失败不应中断整个 status 输出
        let current = match manager.current_url().await {
            Ok(url) => url,
            Err(e) => {
                error!("{}: {}", manager.name(), e);
                None
            }
        };

        let mirrors = manager.mirrors();
        let (url_display, status_display) = match current {
            Some(url) => {
                let on_mirror = mirrors.iter().any(|m| {
                    url.trim_end_matches('/') == m.url.trim_end_matches('/')
                        || url.contains(m.name.as_str())
                });
                let status = if on_mirror { "[Mirror]" } else { "[Upstream/Custom]" };
                (url, status.to_string())
            }
            None => ("Default".to_string(), "[Not configured]".to_string()),
        };

        let url_short = if url_display.chars().count() > 40 {
            format!("{}...", url_display.chars().take(37).collect::<String>())
        } else {
            url_display
        };

        println!("{:<6} {:<42} {}", manager.name(), url_short, status_display);
    }
    println!("{}", "-".repeat(70));

    Ok(())
}

async fn handle_check(settings: &Settings) -> Result<()> {
    let mut mirrors = Vec::new();
    for tool in sources::SUPPORTED_TOOLS {
        mirrors.extend(get_manager(tool, settings)?.mirrors());
    }

    let results = utils::probe_mirrors(mirrors).await;

    println!("{:<10} {:<28} URL", "LATENCY", "NAME");
    println!("{}", "-".repeat(70));
    for res in &results {
        let latency = match res.latency {
            Some(d) => format!("{}ms", d.as_millis()),
            None => "Timeout".to_string(),
        };
        println!("{:<10} {:<28} {}", latency, res.mirror.name, res.mirror.url);
    }
    Ok(())
}

async fn handle_restore(settings: &Settings, name: &str) -> Result<()> {
    let manager = get_manager(name, settings)?;

    if manager.requires_sudo() {
        info!("Restoring {} config usually requires root permissions", name);
    }

    manager.restore().await?;
    println!("Success! {} configuration restored.", name);
    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = if let Some(level_str) = &cli.log_level {
        parse_level(level_str)
    } else if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("MIRRORBUILD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("mirrorbuild={},reqwest=warn,hyper=warn", level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}
