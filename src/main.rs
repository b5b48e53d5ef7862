use clap::{Args, Parser, Subcommand, ValueEnum};
use hermes_hass_config::{
    load_and_validate, validate_runtime_support, Config, ConfigError, HandleType,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bridges Hermes intents on MQTT to Home Assistant.
#[derive(Parser)]
#[command(name = "hermes-hass", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the MQTT broker and handle intents until interrupted
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// YAML config file; flags below override its values
    #[arg(long)]
    config: Option<String>,

    /// URL of the Home Assistant server (required without --config)
    #[arg(long)]
    url: Option<String>,

    /// Long-lived access token (Authorization: Bearer)
    #[arg(long)]
    access_token: Option<String>,

    /// Legacy API password (X-HA-Access)
    #[arg(long)]
    api_password: Option<String>,

    /// Use Home Assistant events or the intent API (event | intent)
    #[arg(long)]
    handle_type: Option<HandleType>,

    /// Format string for event types, `{0}` is the intent name
    #[arg(long)]
    event_type_format: Option<String>,

    /// Client certificate (PEM) for mutual TLS
    #[arg(long)]
    certfile: Option<String>,

    /// Private key for --certfile (PEM)
    #[arg(long)]
    keyfile: Option<String>,

    /// CA bundle (PEM) used to verify the Home Assistant certificate
    #[arg(long)]
    verify_file: Option<String>,

    /// Request timeout for Home Assistant calls in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// MQTT host
    #[arg(long)]
    host: Option<String>,

    /// MQTT port
    #[arg(long)]
    port: Option<u16>,

    /// MQTT username
    #[arg(long)]
    username: Option<String>,

    /// MQTT password
    #[arg(long)]
    password: Option<String>,

    /// Hermes site id to listen for (repeatable, default: all sites)
    #[arg(long = "site-id")]
    site_ids: Vec<String>,

    /// Log at debug level regardless of RUST_LOG
    #[arg(long)]
    debug: bool,

    /// Console log line layout
    #[arg(long, value_enum, default_value_t = LogFormat::Full)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Timestamp, level, target and fields on one line
    Full,
    /// Shorter single-line layout
    Compact,
    /// Multi-line, human oriented
    Pretty,
}

fn build_config(args: &ServeArgs) -> Result<Config, ConfigError> {
    let mut cfg = match (&args.config, &args.url) {
        (Some(path), _) => load_and_validate(path)?,
        (None, Some(url)) => Config::new(url.clone()),
        (None, None) => {
            return Err(ConfigError::UnsupportedConfig(
                "--url is required when --config is not given".to_string(),
            ))
        }
    };

    let ha = &mut cfg.home_assistant;
    if let Some(v) = &args.url {
        ha.url = v.clone();
    }
    if let Some(v) = &args.access_token {
        ha.access_token = Some(v.clone());
    }
    if let Some(v) = &args.api_password {
        ha.api_password = Some(v.clone());
    }
    if let Some(v) = args.handle_type {
        ha.handle_type = v;
    }
    if let Some(v) = &args.event_type_format {
        ha.event_type_format = v.clone();
    }
    if let Some(v) = &args.certfile {
        ha.tls.certfile = Some(v.clone());
    }
    if let Some(v) = &args.keyfile {
        ha.tls.keyfile = Some(v.clone());
    }
    if let Some(v) = &args.verify_file {
        ha.tls.verify_file = Some(v.clone());
    }
    if let Some(v) = args.timeout_ms {
        ha.timeout_ms = v;
    }

    let mqtt = &mut cfg.mqtt;
    if let Some(v) = &args.host {
        mqtt.host = v.clone();
    }
    if let Some(v) = args.port {
        mqtt.port = v;
    }
    if let Some(v) = &args.username {
        mqtt.username = Some(v.clone());
    }
    if let Some(v) = &args.password {
        mqtt.password = Some(v.clone());
    }

    if !args.site_ids.is_empty() {
        cfg.site_ids = args.site_ids.clone();
    }

    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn init_logging(debug: bool, format: LogFormat) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Full => registry.with(fmt::layer()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Commands::Serve(args) = cli.command;
    init_logging(args.debug, args.log_format);

    let cfg = match build_config(&args) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = hermes_hass_bridge::serve(cfg).await {
        tracing::error!("bridge exited with error: {e}");
        std::process::exit(1);
    }
}
