//! Logging setup driven by the `[server]` configuration section.
//!
//! Development builds log pretty, coloured output to stdout. With
//! `server.production_logging` set, the gateway writes JSON to a daily rolling
//! file under `server.log_dir` and a compact copy to stdout for journald.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vitalgate_core::ServerConfig;

const LOG_FILE_PREFIX: &str = "vitalgate";

/// Keeps the non-blocking log writers flushing. Hold it until shutdown.
#[must_use = "logs stop being written when the guard is dropped"]
#[derive(Debug)]
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Pretty,
    Production { dir: PathBuf },
}

impl Output {
    fn for_config(config: &ServerConfig) -> Self {
        if config.production_logging {
            Self::Production {
                dir: config.log_directory(),
            }
        } else {
            Self::Pretty
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directives do not parse or the log directory
/// cannot be created.
pub fn init(config: &ServerConfig) -> anyhow::Result<LogGuard> {
    let filter = filter(config)?;

    let writers = match Output::for_config(config) {
        Output::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
                )
                .init();
            Vec::new()
        }
        Output::Production { dir } => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let files = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
            let (file_writer, file_guard) = tracing_appender::non_blocking(files);
            let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(file_writer)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(stdout_writer)
                        .with_ansi(false),
                )
                .init();
            vec![file_guard, stdout_guard]
        }
    };

    Ok(LogGuard { _writers: writers })
}

/// `RUST_LOG` if set, otherwise `server.log_level`.
fn filter(config: &ServerConfig) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid log level '{}'", config.log_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_follows_config() {
        assert_eq!(Output::for_config(&ServerConfig::default()), Output::Pretty);

        let config = ServerConfig {
            production_logging: true,
            log_dir: Some(PathBuf::from("/srv/vitalgate/logs")),
            ..ServerConfig::default()
        };
        assert_eq!(
            Output::for_config(&config),
            Output::Production {
                dir: PathBuf::from("/srv/vitalgate/logs")
            }
        );
    }

    #[test]
    fn test_filter_from_config() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = |level: &str| ServerConfig {
            log_level: level.to_string(),
            ..ServerConfig::default()
        };
        assert!(filter(&config("vitalgate_core=debug,info")).is_ok());
        assert!(filter(&config("vitalgate_core=loudest")).is_err());
    }
}
