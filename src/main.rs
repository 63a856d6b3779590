//! pisync - GPIO-synchronised looping video playback
//!
//! Main entry point. Resolves the configuration, then runs the session on a
//! blocking thread while the runtime watches for Ctrl-C.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pisync::config::{self, ConfigFile, Overrides, SessionConfig};
use pisync::session::{self, EXIT_CONFIG, EXIT_INTERRUPTED};
use pisync::Shutdown;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long a session gets to drain after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pisync")]
#[command(about = "Loop a video in sync across GPIO-linked players")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    options: RunOptions,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the configured role (default)
    Run,
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args, Debug, Clone)]
struct RunOptions {
    /// Configuration file (default: ./pisync.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Role: primary or secondary
    #[arg(long, global = true)]
    role: Option<String>,

    /// Media file to loop
    #[arg(long, global = true)]
    media: Option<PathBuf>,

    /// Run this many cycles, then exit
    #[arg(long, global = true, conflicts_with = "forever")]
    repeat: Option<u32>,

    /// Loop until interrupted
    #[arg(long, global = true)]
    forever: bool,

    /// Play in a window instead of fullscreen
    #[arg(long, global = true)]
    windowed: bool,

    /// Simulate the sync lines instead of using GPIO
    #[arg(long, global = true)]
    simulate: bool,

    /// Follower mode: callback or poll
    #[arg(long, global = true)]
    follower_mode: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl RunOptions {
    fn overrides(&self) -> Overrides {
        Overrides {
            role: self.role.clone(),
            media_file: self.media.clone(),
            repeat_count: self.repeat,
            loop_forever: self.forever,
            windowed: self.windowed,
            simulate: self.simulate,
            follower_mode: self.follower_mode.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.options.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pisync v{}", env!("CARGO_PKG_VERSION"));

    let file = match load_file(&cli.options) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => match print_config(&file) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Run => match SessionConfig::from_file(&file) {
            Ok(config) => run(config),
            Err(e) => {
                tracing::error!("Configuration error: {}", e);
                ExitCode::from(EXIT_CONFIG)
            }
        },
    }
}

fn load_file(options: &RunOptions) -> Result<ConfigFile, config::ConfigError> {
    let mut file = config::load_config(options.config.as_deref())?;
    options.overrides().apply(&mut file);
    Ok(file)
}

fn print_config(file: &ConfigFile) -> Result<()> {
    let rendered = config::to_toml(file).context("rendering configuration")?;
    println!("{}", rendered);

    if let Err(e) = SessionConfig::from_file(file) {
        tracing::warn!("This configuration will not run: {}", e);
    }
    Ok(())
}

fn run(config: SessionConfig) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(supervise(config, Shutdown::new()));

    // A session stuck in an edge wait is abandoned here.
    runtime.shutdown_timeout(Duration::from_millis(100));
    code
}

async fn supervise(config: SessionConfig, shutdown: Shutdown) -> ExitCode {
    let session_shutdown = shutdown.clone();
    let mut session =
        tokio::task::spawn_blocking(move || session::run(&config, session_shutdown));

    let joined = tokio::select! {
        joined = &mut session => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                (&mut session).await
            } else {
                tracing::info!("Interrupt received, draining");
                shutdown.trigger();
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut session).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::error!(
                            "Session did not stop within {:?}, exiting without cleanup",
                            SHUTDOWN_GRACE
                        );
                        shutdown.abandon();
                        return ExitCode::from(EXIT_INTERRUPTED);
                    }
                }
            }
        }
    };

    match joined {
        Ok(Ok(summary)) if summary.interrupted => {
            tracing::info!("Interrupted after {} cycles", summary.completed());
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(Ok(summary)) => {
            tracing::info!("Completed {} cycles", summary.completed());
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!("Session failed during {}: {}", e.stage(), e);
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            tracing::error!("Session thread failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
