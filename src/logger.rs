//! Session logger: routes the `log` facade into a single file in the OS
//! data directory.
//!
//! The file is **truncated at each launch**, so it only ever contains output
//! from the most recent editing session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\PixPerfect\pixperfect.log`
//!   Linux:    `~/.local/share/PixPerfect/pixperfect.log`
//!   macOS:    `~/Library/Application Support/PixPerfect/pixperfect.log`
//!
//! Use the ordinary `log::info!` / `log::warn!` / `log::error!` macros
//! anywhere in the crate.  Warnings and errors are echoed to stderr as well.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

pub const APP_DIR_NAME: &str = "PixPerfect";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Option<Mutex<File>>,
    level: LevelFilter,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        if record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = writeln!(file, "{}", line);
        }
    }

    fn flush(&self) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger.  Safe to call more than once; only the
/// first call installs anything.
///
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that writes the panic message to the log before
///   propagating to the default handler.
pub fn init() {
    init_with_level(LevelFilter::Info);
}

pub fn init_with_level(level: LevelFilter) {
    if LOGGER.get().is_some() {
        return;
    }
    let path = log_file_path();

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            Some(Mutex::new(f))
        }
        Err(e) => {
            // Not fatal: keep logging to stderr only.
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    };

    let logger = LOGGER.get_or_init(|| SessionLogger { file, level });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }

    log::info!("=== PixPerfect session started {} ===", human_timestamp());
    log::info!("Log file: {}", path.display());

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC: {}", info);
        log::logger().flush();
        prev(info);
    }));
}

fn format_line(level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", timestamp(), level, msg)
}

fn log_file_path() -> PathBuf {
    data_dir().join(APP_DIR_NAME).join("pixperfect.log")
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS within the current UTC day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
