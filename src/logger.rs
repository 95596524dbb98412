//! Logging setup: plain `env_logger` output or JSON lines

use chrono::{Local, Utc};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::json;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

/// Environment variable holding the default log level
pub const LOG_LEVEL_ENV: &str = "CLOUD_MAKER_LOG_LEVEL";

/// Environment variable naming a file for JSON log output
pub const LOG_PATH_ENV: &str = "CLOUD_MAKER_LOG_PATH";

/// JSON logger implementation
#[derive(Debug)]
pub struct JsonLogger {
    level: Level,
    target_file: Mutex<Option<std::fs::File>>,
}

/// Split a level string into (json?, level), e.g. "json:debug" or "warn"
fn parse_level_spec(level_str: &str) -> (bool, &str) {
    if let Some(stripped) = level_str.strip_prefix("json:") {
        (true, stripped)
    } else if level_str == "json" {
        (true, "info")
    } else {
        (false, level_str)
    }
}

fn parse_level_filter(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

impl JsonLogger {
    /// Create a new JSON logger
    pub fn new(level: Level, log_path: Option<String>) -> Self {
        let target_file = if let Some(path) = log_path {
            OpenOptions::new().create(true).append(true).open(path).ok()
        } else {
            None
        };

        JsonLogger {
            level,
            target_file: Mutex::new(target_file),
        }
    }

    /// Initialize the logger with specified level and source
    ///
    /// Returns the effective level and where it came from, for a startup debug line.
    pub fn init_with_level(level_str: &str, source: &str) -> (String, String) {
        let (use_json, actual_level) = parse_level_spec(level_str);
        let level_filter = parse_level_filter(actual_level);

        if !use_json {
            let result = env_logger::Builder::new()
                .filter_level(level_filter)
                .format(|buf, record| {
                    write!(
                        buf,
                        "[{} {} {}] ",
                        Local::now().format("%Y-%m-%dT%H:%M:%S"),
                        record.level(),
                        record.target()
                    )?;
                    writeln!(buf, "{}", record.args())
                })
                .try_init();
            if let Err(e) = result {
                eprintln!("Failed to initialize logger: {e}");
            }
            return (actual_level.to_string(), source.to_string());
        }

        let Some(level) = level_filter.to_level() else {
            log::set_max_level(LevelFilter::Off);
            return (actual_level.to_string(), source.to_string());
        };

        let logger = Box::new(JsonLogger::new(level, env::var(LOG_PATH_ENV).ok()));

        if let Err(e) = log::set_boxed_logger(logger) {
            eprintln!("Failed to initialize JSON logger: {e}");
            return (actual_level.to_string(), source.to_string());
        }

        log::set_max_level(level_filter);
        (actual_level.to_string(), source.to_string())
    }

    /// Initialize from `CLOUD_MAKER_LOG_LEVEL`, defaulting to info
    pub fn init() -> (String, String) {
        let log_level = env::var(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| "info".to_string());
        Self::init_with_level(&log_level, LOG_LEVEL_ENV)
    }

    fn format_record(record: &Record<'_>) -> String {
        let log_entry = json!({
            "@timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            "@level": record.level().to_string().to_lowercase(),
            "@message": record.args().to_string(),
            "@module": record.target(),
            "@pid": std::process::id(),
            "@file": record.file().unwrap_or("unknown"),
            "@line": record.line().unwrap_or(0),
        });

        format!(
            "{}\n",
            serde_json::to_string(&log_entry).unwrap_or_default()
        )
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let json_string = Self::format_record(record);

        // Write to file or stderr
        if let Ok(mut file_guard) = self.target_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.write_all(json_string.as_bytes());
                let _ = file.flush();
            } else {
                let _ = io::stderr().write_all(json_string.as_bytes());
            }
        } else {
            let _ = io::stderr().write_all(json_string.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file_guard) = self.target_file.lock() {
            if let Some(file) = file_guard.as_mut() {
                let _ = file.flush();
            }
        }
        let _ = io::stderr().flush();
    }
}

/// Helper to check if JSON logging is enabled
pub fn is_json_logging() -> bool {
    env::var(LOG_LEVEL_ENV)
        .map(|v| v.starts_with("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_spec() {
        assert_eq!(parse_level_spec("json:debug"), (true, "debug"));
        assert_eq!(parse_level_spec("json"), (true, "info"));
        assert_eq!(parse_level_spec("warn"), (false, "warn"));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_level_filter("loud"), LevelFilter::Info);
        assert_eq!(parse_level_filter("off"), LevelFilter::Off);
    }

    #[test]
    fn test_json_record_shape() {
        let record = Record::builder()
            .args(format_args!("packed 3 entries"))
            .level(Level::Info)
            .target("cloud_maker::provisioner")
            .build();
        let line = JsonLogger::format_record(&record);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(value["@level"], "info");
        assert_eq!(value["@message"], "packed 3 entries");
        assert_eq!(value["@module"], "cloud_maker::provisioner");
    }

    #[test]
    fn test_logger_respects_level() {
        let logger = JsonLogger::new(Level::Warn, None);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }
}
