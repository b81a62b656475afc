//! Logging backend that appends timestamped UTF-8 lines to a file.
//!
//! Every record becomes one line:
//!
//! ```text
//! [2024-05-01 21:04:13] [FileHook] Redirected: X:\game\rld\a.txt -> X:\game\rld_chs\a.txt
//! ```
//!
//! Warnings and errors get a `<!> ` or `<!!!> ` marker in front of the message.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use log::{Level, Metadata, Record};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::settings::Settings;

const BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

/// Something worth a line in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    HooksInstalled {
        count: usize,
    },
    HooksRemoved {
        count: usize,
    },
    FileRedirected {
        from: String,
        to: String,
    },
    FontSubstituted {
        old_char_set: u8,
        new_char_set: u8,
        old_face: String,
        new_face: String,
    },
    TitleOverwritten,
}

impl Event {
    pub fn category(&self) -> &'static str {
        match self {
            Event::HooksInstalled { .. } | Event::HooksRemoved { .. } => "HookSet",
            Event::FileRedirected { .. } => "FileHook",
            Event::FontSubstituted { .. } => "FontHook",
            Event::TitleOverwritten => "TitleHook",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.category())?;

        match self {
            Event::HooksInstalled { count } => write!(f, "Installed {} hook(s)", count),
            Event::HooksRemoved { count } => write!(f, "Removed {} hook(s)", count),
            Event::FileRedirected { from, to } => write!(f, "Redirected: {} -> {}", from, to),
            Event::FontSubstituted {
                old_char_set,
                new_char_set,
                old_face,
                new_face,
            } => write!(
                f,
                "Font modified: Charset:{}->{}, Face:{}->{}",
                old_char_set, new_char_set, old_face, new_face
            ),
            Event::TitleOverwritten => f.write_str("Set window title"),
        }
    }
}

/// Writes an event to the log.
pub fn record(event: &Event) {
    log::info!(target: event.category(), "{}", event);
}

fn format_line(time: DateTime<Local>, level: Level, message: &fmt::Arguments) -> String {
    let prefix = match level {
        Level::Error => "<!!!> ",
        Level::Warn => "<!> ",
        Level::Info | Level::Debug | Level::Trace => "",
    };

    format!(
        "[{}] {}{}\n",
        time.format("%Y-%m-%d %H:%M:%S"),
        prefix,
        message
    )
}

/// The log file. Lines written while no file is open are dropped.
pub struct Sink {
    file: Mutex<Option<File>>,
}

impl Sink {
    pub const fn new() -> Sink {
        Sink {
            file: parking_lot::const_mutex(None),
        }
    }

    /// Truncates or creates the file at `path` and starts it with a byte-order mark.
    pub fn open(&self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&BOM)?;

        *self.file.lock() = Some(file);
        Ok(())
    }

    pub fn close(&self) {
        if let Some(mut file) = self.file.lock().take() {
            let _ = file.flush();
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    pub fn write(&self, level: Level, message: &fmt::Arguments) {
        let line = format_line(Local::now(), level, message);

        {
            let mut file = self.file.lock();

            if let Some(file) = file.as_mut() {
                let _ = file.write_all(line.as_bytes());
            }
        }

        #[cfg(all(windows, feature = "debug"))]
        crate::win32::debug_output(&line);
    }
}

impl Default for Sink {
    fn default() -> Sink {
        Sink::new()
    }
}

impl log::Log for Sink {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.write(record.level(), record.args());
        }
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

static SINK: Sink = Sink::new();
static LOGGER: OnceCell<()> = OnceCell::new();

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "no message".to_string());

        let location = info
            .location()
            .map(|location| location.to_string())
            .unwrap_or_else(|| "unknown location".to_string());

        log::error!(
            "Panic at {}: {}\n{:?}",
            location,
            message,
            backtrace::Backtrace::new()
        );
    }));
}

/// Opens the log file named in `settings` and routes the `log` macros to it.
pub fn init(settings: &Settings) -> io::Result<()> {
    SINK.open(&settings.log_file)?;

    LOGGER.get_or_init(|| {
        if log::set_logger(&SINK).is_err() {
            eprintln!("another logger is already installed");
        }

        install_panic_hook();
    });

    log::set_max_level(settings.level());
    Ok(())
}

/// Closes the log file. Later records are discarded until `init` runs again.
pub fn shutdown() {
    SINK.close();
}
