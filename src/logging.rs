//! Structured logging and tracing for the Volvo connector
//!
//! Two verbosities are configured independently: the connector's own events
//! (`log_level`) and request/response metadata of the Volvo API
//! (`api_log_level`), which is emitted on the [`API_LOG_TARGET`] target.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod level;
mod structured;

pub use level::parse_log_level;
pub use structured::{
    LogChannel, LogContext, StructuredLogger, get_api_logger, get_logger, get_logger_with_context,
};

/// Target carrying API request/response metadata
pub const API_LOG_TARGET: &str = "volvo_connector_api";

// Flushes the file appender on drop, so it lives as long as the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT: Once = Once::new();
static INIT_FAILURE: OnceCell<String> = OnceCell::new();

/// Initialize logging system based on configuration
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(config: &ConnectorConfig) -> Result<()> {
    INIT.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.log_level)?;
            let api_level = parse_log_level(&config.api_log_level)?;
            let filter = build_env_filter(base_level, api_level);

            match config.logging.file.as_deref() {
                Some(file) if !should_use_console_only() => {
                    init_file_logging(config, file, filter)?;
                }
                _ => init_console_only_logging(filter, config.logging.json_format),
            }

            info!(
                "Logging initialized - level: {:?}, api_level: {:?}",
                base_level, api_level
            );
            Ok(())
        })();

        if let Err(e) = init_result {
            let _ = INIT_FAILURE.set(e.to_string());
        }
    });

    if let Some(err) = INIT_FAILURE.get() {
        return Err(ConnectorError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level, api_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "volvo_connector={},{}={},reqwest=warn",
            level, API_LOG_TARGET, api_level
        )
        .into()
    })
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("VOLVO_CONNECTOR_DISABLE_FILE_LOG").is_some()
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool) {
    let console_layer = {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    };

    // A host process may already own the global subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}

fn init_file_logging(config: &ConnectorConfig, file: &str, filter: EnvFilter) -> Result<()> {
    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("volvo-connector")
        .filename_suffix("log")
        .max_log_files(config.logging.backup_count.max(1) as usize)
        .build({
            // If the path names a file, use its parent dir; otherwise treat as dir
            let p = Path::new(file);
            if p.extension().is_some() {
                p.parent().unwrap_or(p)
            } else {
                p
            }
        })
        .map_err(|e| ConnectorError::io(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false);
        if config.logging.json_format {
            base.json().boxed()
        } else {
            base.boxed()
        }
    };

    let console_layer = config.logging.console_output.then(|| {
        let base = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false);
        if config.logging.json_format {
            base.json().boxed()
        } else {
            base.boxed()
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| ConnectorError::config(format!("Logging already initialized: {}", e)))?;
    Ok(())
}
