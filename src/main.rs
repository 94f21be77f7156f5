//! Provider server entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gunfish::config::MOCK_SERVER;
use gunfish::ltsv::LtsvFormatter;
use gunfish::{server, Config, Environment, Supervisor};

#[derive(Debug, Parser)]
#[command(name = "gunfish", version = gunfish::VERSION, about = "APNs / FCM v1 push-notification provider gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/gunfish/config.toml")]
    config: PathBuf,

    /// APNs environment: production, development, or test.
    #[arg(short = 'E', long = "environment", default_value = "production")]
    environment: Environment,

    /// Listen port override (1024-65535).
    #[arg(long = "port")]
    port: Option<u16>,

    /// Log level: debug, info, or warn.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Log format: text, json, or ltsv.
    #[arg(long = "log-format", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_format, &args.log_level);

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(r#type = "provider", error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.provider.port = port;
    }
    if let Some(apns) = config.apns.as_mut() {
        if apns.host.is_none() {
            apns.host =
                Some(args.environment.apns_host().unwrap_or(MOCK_SERVER).to_string());
        }
    }

    let supervisor = match Supervisor::builder(config.clone()).start().await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(r#type = "provider", error = %e, "failed to start gunfish");
            std::process::exit(1);
        }
    };
    tracing::info!(r#type = "supervisor", "started supervisor");

    if let Err(e) = server::serve(config, supervisor).await {
        tracing::error!(r#type = "provider", error = %e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        "json" => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        "ltsv" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(LtsvFormatter::new())
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
