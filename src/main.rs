use clap::Parser;

use throttler::config::Config;
use throttler::config_validator::ConfigValidator;
use throttler::daemon::Daemon;

/// Sphinx: a rate-limiting HTTP reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "sphinx", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Parse and validate the configuration, then exit without serving.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.check_config {
        match Config::load(&args.config).and_then(|config| ConfigValidator::validate(&config).map(|_| config)) {
            Ok(_) => {
                println!("{}: configuration is valid", args.config);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("{}: invalid configuration: {e}", args.config);
                std::process::exit(1);
            }
        }
    }

    let daemon = match Daemon::build(&args.config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, config = %args.config, "failed to start sphinx");
            std::process::exit(1);
        }
    };

    if let Err(e) = daemon.run().await {
        tracing::error!(error = %e, "sphinx exited with error");
        std::process::exit(1);
    }
}
