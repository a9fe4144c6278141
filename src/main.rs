//! sstpd: SSTP gateway entry point
//!
//! ```bash
//! # Run with defaults (listen on 0.0.0.0:443, spawn pppd per session)
//! sstpd
//!
//! # Run with a configuration file
//! sstpd -c /etc/sstpd/config.json
//!
//! # Validate a configuration file and exit
//! sstpd -c /etc/sstpd/config.json --check
//! ```

use std::error::Error;
use std::path::PathBuf;

use tracing::{error, info, Level};

use sstpd::config::{load_config, ServerConfig};
use sstpd::diagnostics;
use sstpd::SstpServer;

/// Command-line arguments
struct Args {
    config_path: Option<PathBuf>,
    check_config: bool,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = std::env::args().skip(1);
        let mut parsed = Args {
            config_path: None,
            check_config: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => match args.next() {
                    Some(path) => parsed.config_path = Some(PathBuf::from(path)),
                    None => return Err(format!("{} needs a path", arg)),
                },
                "--check" => parsed.check_config = true,
                "-h" | "--help" => {
                    println!("Usage: sstpd [-c|--config <path>] [--check]");
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {}", other)),
            }
        }
        Ok(parsed)
    }
}

fn load(args: &Args) -> sstpd::Result<ServerConfig> {
    match &args.config_path {
        Some(path) => load_config(path),
        None => {
            let mut config = ServerConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse()?;
    let config = load(&args)?;

    let level: Level = config.log_level.parse()?;
    tracing_subscriber::fmt().with_max_level(level).init();

    if args.check_config {
        info!("Configuration OK");
        return Ok(());
    }

    let server = SstpServer::bind(config.clone()).await?;

    if let Some(addr) = config.diagnostics {
        let stats = server.stats();
        tokio::spawn(async move {
            if let Err(e) = diagnostics::serve(addr, stats).await {
                error!("Diagnostics endpoint failed: {}", e);
            }
        });
    }

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
