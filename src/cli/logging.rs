//! Tracing subscriber setup for the relaylink binary.

use crate::config::LoggingSettings;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "relaylink.log";

/// Maps the `-v` count to the default log level.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(verbose: u8, settings: &LoggingSettings) -> EnvFilter {
    let level = level_for_verbosity(verbose);
    // -v wins over configured directives
    let directives = if verbose > 0 {
        String::new()
    } else {
        std::env::var("RUST_LOG")
            .ok()
            .or_else(|| settings.filter.clone())
            .unwrap_or_default()
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives)
}

/// Installs the global subscriber.
///
/// The returned guard must be held for the lifetime of the process when file
/// logging is enabled; dropping it stops the background writer.
pub fn init_logging(verbose: u8, settings: &LoggingSettings) -> Option<WorkerGuard> {
    let filter = env_filter(verbose, settings);

    match &settings.directory {
        Some(dir) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            tracing::info!("File logging enabled to {}/{}", dir.display(), LOG_FILE_NAME);
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), Level::INFO);
        assert_eq!(level_for_verbosity(1), Level::DEBUG);
        assert_eq!(level_for_verbosity(5), Level::TRACE);
    }

    #[test]
    fn test_verbose_ignores_configured_filter() {
        let settings = LoggingSettings {
            filter: Some("relaylink_core=error".to_string()),
            directory: None,
        };
        let filter = env_filter(2, &settings);
        assert!(!filter.to_string().contains("relaylink_core=error"));
    }
}
