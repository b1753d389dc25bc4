use std::path::{Path, PathBuf};

use clap::Parser;
use logingest_core::config::{self, LogFormat, LoggingConfig};
use logingest_core::LogingestConfig;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod app;
mod signal;

/// Scheduled ingestion of external API data into the log store.
#[derive(Parser, Debug)]
#[command(name = "logingest", version, about)]
struct Cli {
    /// Configuration file (defaults: $LOGINGEST_CONFIG, /app/config/config.yaml, config/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment file loaded before the configuration (default: .env)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Validate the configuration, print the job table and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let dotenv = config::load_dotenv(cli.env_file.as_deref());
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let loaded = LogingestConfig::load(&config_path);

    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&logging)?;

    match &dotenv {
        Ok(Some(path)) => info!(path = %path.display(), "environment file loaded"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "failed to load environment file"),
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, code = e.code(), "configuration error");
            return Err(e.into());
        }
    };
    info!(
        path = %config_path.display(),
        sources = config.sources.len(),
        "configuration loaded"
    );

    if cli.check {
        let table = app::App::check(config)?;
        print!("{table}");
        return Ok(());
    }

    let app = app::App::initialize(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    signal::install(shutdown_tx)?;

    app.run(shutdown_rx).await.inspect_err(|e| {
        error!(error = %format!("{e:#}"), "logingest failed");
    })
}

/// Console output (JSON or text) plus an optional daily-rolling file.
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let mut layers = Vec::new();
    layers.push(match config.format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
    });

    if let Some(file) = config.file.as_deref().filter(|f| !f.is_empty()) {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "logingest.log".to_string());

        let appender = tracing_appender::rolling::daily(dir, prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        layers.push(fmt::layer().json().with_writer(writer).with_ansi(false).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "logingest",
            "--config",
            "/etc/logingest.yaml",
            "--env-file",
            "prod.env",
            "--check",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/logingest.yaml")));
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
        assert!(cli.check);
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["logingest"]);
        assert!(cli.config.is_none());
        assert!(cli.env_file.is_none());
        assert!(!cli.check);
    }
}
