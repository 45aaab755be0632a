use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::sync::Once;

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "gridplane.log";

static INIT: Once = Once::new();

/// Initializes the global logger once per process.
///
/// Log level is controlled by `RUST_LOG` (default `info`). Output goes to
/// stderr (colored) and to `logs/gridplane.log`. Safe to call from multiple
/// tests; only the first call applies a configuration.
pub fn init() {
    INIT.call_once(apply);
}

fn apply() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let colors = fern::colors::ColoredLevelConfig::new()
        .error(fern::colors::Color::Red)
        .warn(fern::colors::Color::Yellow)
        .info(fern::colors::Color::Green)
        .debug(fern::colors::Color::Blue)
        .trace(fern::colors::Color::BrightBlack);

    let console = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let mut root = Dispatch::new().level(level).chain(console);

    // File output is best-effort; a read-only working dir must not kill startup.
    if fs::create_dir_all(LOG_DIR).is_ok() {
        if let Ok(file) = fern::log_file(format!("{}/{}", LOG_DIR, LOG_FILE)) {
            let file_config = Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(file);
            root = root.chain(file_config);
        }
    }

    if let Err(e) = root.apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
    }
}
