use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use roadcast::config::DEFAULT_CONFIG_FILE;
use roadcast::shutdown::{install_panic_hook, listen_for_signals};
use roadcast::{
    logging, privilege, ApplianceStatus, Collaborators, HostStatus, MmcliStatus, Orchestrator,
    ProcessSpawner, RoomClient, Settings, StartupError,
};

#[derive(Parser, Debug)]
#[command(name = "roadcast")]
#[command(about = "Supervises the telemetry and livestream workers of a vehicle appliance")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for rolling log files (overrides logging.directory)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Only log errors to the console and skip log files
    #[arg(short, long)]
    quiet: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Extra arguments forwarded to every worker
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    forward: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be up yet.
            eprintln!("roadcast: {:#}", e);
            error!(error = %format!("{:#}", e), "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    privilege::ensure_unprivileged()?;

    let (path, required) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let mut settings = Settings::load(&path, required)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(dir) = args.log_dir {
        settings.logging.directory = dir;
    }

    if args.print_config {
        let json = serde_json::to_string_pretty(&settings.redacted())?;
        println!("{}", json);
        return Ok(());
    }

    let _log_guard = logging::init(&settings.logging, args.quiet)?;
    info!(config = %path.display(), "roadcast starting");

    let modem = MmcliStatus::from_settings(&settings.telemetry)?;
    if settings.telemetry.enable_gps {
        if let Err(e) = modem.enable_gps() {
            error!(error = %e, modem = modem.modem_id(), "failed to enable GPS");
        }
    }
    let status = ApplianceStatus {
        modem,
        host: HostStatus::from_settings(&settings.telemetry.host),
    };

    let room = Arc::new(
        RoomClient::from_settings(&settings.livekit)
            .map_err(|e| StartupError::Config(format!("room client: {}", e)))?,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let report = runtime.block_on(async {
        let orchestrator = Orchestrator::from_settings(
            &settings,
            args.forward,
            Collaborators {
                spawner: Arc::new(ProcessSpawner),
                status: Arc::new(status),
                publisher: room.clone(),
                session: room,
            },
        );

        let shutdown = orchestrator.shutdown_handle();
        listen_for_signals(shutdown.clone()).context("installing signal handlers")?;
        install_panic_hook(shutdown);

        Ok::<_, anyhow::Error>(orchestrator.run_guarded().await)
    })?;

    info!(
        cause = %report.cause,
        killed = report.killed,
        released = report.released,
        "roadcast stopped"
    );
    Ok(())
}
