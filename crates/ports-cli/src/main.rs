use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use clap::{Parser, Subcommand};
use merge::Merge;
use ports_config::{expand_tilde, load_from_path, load_from_paths, require_profile, Config};
use ports_logging::{init_logging, LogTarget};
use ports_ssh::{forward_spec, SshServiceImpl};
use ports_supervisor::Supervisor;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tracing::{debug, info, warn};

/// How often the foreground `start` command checks whether its tunnels are still up.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about = "SSH port forward manager", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long, env = "PORTS_CONFIG")]
    pub config: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub ssh_program: Option<String>,
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Opens the interactive tunnel manager (the default).
    Tui,
    /// Starts the given profiles and keeps them up until interrupted.
    Start {
        #[arg(required = true)]
        profiles: Vec<String>,
    },
    /// Lists the configured profiles and their forwards.
    List,
    /// Loads and validates the configuration file.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- Configuration Setup ---
    let file_config = match &cli.config {
        Some(path) => load_from_path(expand_tilde(path)),
        None => load_from_paths(),
    }
    .context("load config")?;
    let cli_config = Config {
        log_level: cli.log_level,
        ssh_program: cli.ssh_program,
        ..Config::empty()
    };
    let mut config = Config::default();
    config.merge(file_config);
    config.merge(cli_config);

    let command = cli.command.unwrap_or(Commands::Tui);

    // --- Logging ---
    // The UI owns the terminal, so its logs go to a file.
    let target = match command {
        Commands::Tui => LogTarget::File(expand_tilde(
            config.log_file.as_deref().unwrap_or("~/.ports/ports.log"),
        )),
        _ => LogTarget::Stderr,
    };
    init_logging(config.log_level.as_deref().unwrap_or("info"), !cli.no_color, target)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Final configuration: {:#?}", config);

    match command {
        Commands::List => {
            list(&config);
            Ok(())
        }
        Commands::Validate => {
            println!("config OK ({} profiles)", config.profiles.len());
            Ok(())
        }
        Commands::Start { profiles } => start(&config, &profiles).await,
        Commands::Tui => tui(config).await,
    }
}

fn new_supervisor(config: &Config) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(Arc::new(SshServiceImpl::new(config))))
}

fn list(config: &Config) {
    if config.profiles.is_empty() {
        println!("No profiles found.");
        return;
    }

    for p in &config.profiles {
        println!("{} ({})", p.name, p.target());
        for f in &p.forwards {
            println!("  -L {}", forward_spec(f));
        }
    }
}

async fn start(config: &Config, names: &[String]) -> anyhow::Result<()> {
    let supervisor = new_supervisor(config);
    run_foreground(&supervisor, config, names, shutdown_signal()).await
}

/// Starts `names` and keeps them up until `shutdown` resolves or every tunnel
/// has exited. `shutdown` is watched from the first spawn on; ssh runs in its
/// own process group and never sees the terminal's SIGINT.
async fn run_foreground<F>(
    supervisor: &Supervisor,
    config: &Config,
    names: &[String],
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::pin!(shutdown);

    tokio::select! {
        res = start_profiles(supervisor, config, names) => {
            if let Err(e) = res {
                supervisor.stop_all();
                return Err(e);
            }
        }
        res = &mut shutdown => {
            println!("shutting down - stopping tunnels...");
            supervisor.stop_all();
            return res;
        }
    }

    info!("Press Ctrl+C to stop.");

    let outcome = tokio::select! {
        res = &mut shutdown => res,
        _ = wait_until_all_exited(supervisor) => {
            warn!("All tunnels have exited.");
            Ok(())
        }
    };

    println!("shutting down - stopping tunnels...");
    supervisor.stop_all();
    outcome
}

async fn start_profiles(
    supervisor: &Supervisor,
    config: &Config,
    names: &[String],
) -> anyhow::Result<()> {
    for name in names {
        let profile = require_profile(config, name).context("start")?;
        let pid = supervisor
            .start(profile)
            .await
            .with_context(|| format!("start {}", name))?;
        println!("started {} (pid {})", name, pid);
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }
    warn!("Received shutdown signal.");
    Ok(())
}

async fn wait_until_all_exited(supervisor: &Supervisor) {
    while !supervisor.running().is_empty() {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

async fn tui(config: Config) -> anyhow::Result<()> {
    let supervisor = new_supervisor(&config);
    let runtime = tokio::runtime::Handle::current();

    let ui_supervisor = Arc::clone(&supervisor);
    let result =
        tokio::task::spawn_blocking(move || ports_tui::run(config.profiles, ui_supervisor, runtime))
            .await;

    supervisor.stop_all();
    result.context("terminal UI task failed")??;
    Ok(())
}
