use anyhow::{Context, Result};
use clap::Parser;
use host_controller::{
    EventBus, HostController, HostControllerConfig, LocalProcessSupervisor, ShutdownReason,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "host-controller")]
#[command(about = "Host-level controller for managed server processes")]
#[command(version)]
#[command(long_about = "Launches and supervises the server processes configured for this host, \
tracks their lifecycle, and routes configuration updates to the servers they affect.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "host-controller.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting any server")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build the controller but don't start it
    #[arg(long, help = "Perform dry run - build the host controller but don't start servers")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily rotated log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting host controller v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = HostControllerConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
    let supervisor = Arc::new(LocalProcessSupervisor::new(Arc::clone(&event_bus)));

    let controller = HostController::builder()
        .config(config)
        .supervisor(supervisor)
        .event_bus(event_bus)
        .build()
        .map_err(|e| {
            error!("Failed to create host controller: {}", e);
            e
        })?;

    if args.dry_run {
        info!("Dry run mode - host controller built but not started");
        println!(
            "✓ Dry run completed successfully - {} servers configured",
            controller.server_statuses().len()
        );
        return Ok(());
    }

    // Subscribe before any server is launched
    let event_loop = controller.spawn_event_loop();

    if let Err(e) = controller.start().await {
        error!("Failed to start host controller: {}", e);
        controller.stop().await;
        let _ = event_loop.await;
        return Err(e.into());
    }

    let reason = controller.run().await.map_err(|e| {
        error!("Host controller error during execution: {}", e);
        e
    })?;
    if let Err(e) = event_loop.await {
        error!("Event loop ended abnormally: {}", e);
    }

    match reason {
        ShutdownReason::Signal(signal) => info!("Host controller exited on {}", signal),
        ShutdownReason::Stopped => info!("Host controller exited"),
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("host_controller={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "host-controller.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Host Controller Configuration File");
    println!("# This is the default configuration with all available options");
    println!("#");
    println!("# Servers are declared as [[servers]] tables, for example:");
    println!("#   [[servers]]");
    println!("#   name = \"server-one\"");
    println!("#   group = \"main-server-group\"");
    println!("#   command = [\"/opt/app/bin/server\", \"--port\", \"8080\"]");
    println!();

    let rendered = HostControllerConfig::default()
        .to_toml()
        .context("Failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}
