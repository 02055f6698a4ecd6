//! appshell: run the application shell from a configuration file
//!
//! Serves until Ctrl-C or a POST to `/shutdown_server` carrying the
//! shutdown token logged at debug level on startup.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use appshell_server::AppShell;

#[derive(Parser, Debug)]
#[command(name = "appshell", version, about = "Page-table web application shell")]
struct Args {
    /// TOML configuration file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Logging level: debug, info, warning, error or critical
    #[arg(long, default_value = "debug")]
    log_level: String,
}

/// Map a level name to a tracing level directive
fn level_directive(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        "trace" => "trace",
        _ => "info",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = level_directive(&args.log_level);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("appshell={level},appshell_server={level},appshell_core={level},tower_http={level}").into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut builder = AppShell::builder();
    if let Some(path) = args.config {
        builder = builder.config_file(path);
    }

    let mut shell = builder.build()?;
    shell.start().await?;

    tracing::info!("appshell stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("Warning"), "warn");
        assert_eq!(level_directive("bogus"), "info");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["appshell", "--config", "site.toml", "--log-level", "info"]);
        assert_eq!(args.config, Some(PathBuf::from("site.toml")));
        assert_eq!(args.log_level, "info");
    }
}
