// Logger initialization
//
// RUST_LOG wins over the configured filter; with neither set the level is
// Info. Calling `init_logging` more than once is harmless.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Once;
use crate::config::DebugConfig;

static INIT: Once = Once::new();

pub fn init_logging(config: &DebugConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else if let Some(filter) = &config.log_filter {
            builder.parse_filters(filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        // Tests may have installed a logger already.
        if builder.try_init().is_err() {
            return;
        }

        // Create/clear log file if enabled
        if config.log_to_file {
            match OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&config.log_file)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "=== Glyph Pipeline Log ===");
                    let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                    let _ = writeln!(file);
                }
                Err(e) => log::warn!("Could not create log file {:?}: {}", config.log_file, e),
            }
        }

        log::debug!("logging initialized");
    });
}
