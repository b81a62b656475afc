//! Loads the optional settings file that sits next to the game.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use eyre::WrapErr;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::font::{DEFAULT_FACE, GB2312_CHARSET};
use crate::text::SHIFT_JIS;

/// Looked up in the game's working directory.
pub const SETTINGS_FILE: &str = "ExHIBIT_hook.json";

pub const DEFAULT_TITLE: &str = "ExHIBIT 中文化补丁";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Title given to every window the game creates.
    pub window_title: String,

    /// Face forced onto every font.
    pub face_name: String,

    /// Character set forced onto every font.
    pub char_set: u8,

    /// Code page the game's own face names are written in. Only used for logging.
    pub face_code_page: u32,

    pub log_file: PathBuf,

    /// One of `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            window_title: DEFAULT_TITLE.to_string(),
            face_name: DEFAULT_FACE.to_string(),
            char_set: GB2312_CHARSET,
            face_code_page: SHIFT_JIS,
            log_file: PathBuf::from("ExHIBIT_hook.log"),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> eyre::Result<Settings> {
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("unable to open {}", path.display()))?;

        serde_json::from_reader(std::io::BufReader::new(file))
            .wrap_err_with(|| format!("unable to parse {}", path.display()))
    }

    /// Loads `path` if it exists. Falls back to the defaults otherwise, handing back the reason
    /// when the file exists but could not be used. The log is not open yet when this runs.
    pub fn load_or_default(path: &Path) -> (Settings, Option<eyre::Report>) {
        if !path.exists() {
            return (Settings::default(), None);
        }

        match Settings::load(path) {
            Ok(settings) => (settings, None),
            Err(err) => (Settings::default(), Some(err)),
        }
    }

    pub fn level(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, err) = Settings::load_or_default(&dir.path().join(SETTINGS_FILE));

        assert_eq!(settings, Settings::default());
        assert!(err.is_none());
    }

    #[test]
    fn partial_file_is_completed_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "window_title": "测试", "char_set": 136 }"#).unwrap();

        let (settings, err) = Settings::load_or_default(&path);

        assert!(err.is_none());
        assert_eq!(settings.window_title, "测试");
        assert_eq!(settings.char_set, 136);
        assert_eq!(settings.face_name, DEFAULT_FACE);
        assert_eq!(settings.face_code_page, SHIFT_JIS);
    }

    #[test]
    fn malformed_file_falls_back_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let (settings, err) = Settings::load_or_default(&path);

        assert_eq!(settings, Settings::default());
        assert!(format!("{:?}", err.unwrap()).contains(SETTINGS_FILE));
    }

    #[test]
    fn unknown_levels_mean_info() {
        let mut settings = Settings::default();

        settings.log_level = "DEBUG".into();
        assert_eq!(settings.level(), LevelFilter::Debug);

        settings.log_level = "chatty".into();
        assert_eq!(settings.level(), LevelFilter::Info);
    }
}
