use anyhow::{Context, Result};
use clap::Parser;
use fallwatch::config::SourceKind;
use fallwatch::{FallwatchConfig, FallwatchOrchestrator};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "fallwatch")]
#[command(about = "Fall detection service with clip capture and event delivery")]
#[command(version)]
#[command(long_about = "Watches a local camera or a remote MQTT frame feed, classifies body pose \
for falls, records a pre/post-event clip for each fall, and delivers the event to MQTT brokers, \
object storage, an event log and a notification webhook.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "fallwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Frame source override
    #[arg(short, long, value_name = "KIND", help = "Frame source: local or remote")]
    source: Option<SourceKind>,

    /// Dashboard port override
    #[arg(short, long, help = "Dashboard HTTP port")]
    port: Option<u16>,

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
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - build components and probe sinks but don't start
    #[arg(long, help = "Build components and probe sinks, then exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for rolling log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args);

    info!("Starting Fallwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = FallwatchConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(kind) = args.source {
        config.source.kind = kind;
    }
    if let Some(port) = args.port {
        config.dashboard.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    info!(
        device_id = %config.system.device_id,
        source = config.source.kind.as_str(),
        "Configuration loaded and validated"
    );

    let mut orchestrator = FallwatchOrchestrator::new(config).await;

    if args.dry_run {
        let statuses = orchestrator.query().status().sinks;
        for (name, status) in &statuses {
            println!("{:<14} {}", name, serde_json::to_string(status)?);
        }
        println!("✓ Dry run completed - components built, sinks probed");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start service: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("Service error during execution: {}", e);
        e
    })?;

    info!("Fallwatch exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("fallwatch={}", log_level)));

    let mut unknown_format = None;
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
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            unknown_format = Some(format.to_string());
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match args.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fallwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
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

    if let Some(format) = unknown_format {
        warn!("Unknown log format '{}', using default", format);
    }

    guard
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let rendered = toml::to_string_pretty(&FallwatchConfig::default())
        .context("failed to render default configuration")?;

    println!("# Fallwatch configuration file");
    println!("# Every key is optional; omitted keys take the values shown here.");
    println!("# Environment overrides: FALLWATCH_<SECTION>__<KEY>, e.g. FALLWATCH_SOURCE__KIND=remote");
    println!();
    println!("{}", rendered);
    Ok(())
}
