use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::Path;

/// Default name of the log file written next to the convergence graphs
pub const LOG_FILE_NAME: &str = "application.log";

/// Route the crate's log messages to the terminal and, optionally, to a file
///
/// Returns `false` if a global logger was already installed (the existing logger is kept).
pub fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> std::io::Result<bool> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        loggers.push(WriteLogger::new(level, Config::default(), File::create(path)?));
    }

    Ok(CombinedLogger::init(loggers).is_ok())
}

/// Parse a level name ("error", "warn", "info", "debug", "trace" or "off")
pub fn level_from_str(level: &str) -> Option<LevelFilter> {
    level.parse().ok()
}
