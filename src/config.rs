//! User settings, stored as YAML under `~/.picsort/`.

use chrono::{DateTime, Datelike, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::DuplicatePolicy;

pub const CONFIG_VERSION: &str = "1.0.0";

const APP_DIR: &str = ".picsort";
const CONFIG_FILE: &str = "config.yaml";
const RESUME_DIR: &str = "resume";
const LOG_DIR: &str = "logs";

const DEFAULT_FILE_TYPES: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".tif", ".webp", ".heic", ".mp4", ".mov",
    ".avi", ".mkv", ".wmv", ".flv", ".webm", ".m4v",
];

/// Effective settings for one run.
///
/// Unknown keys in the file are ignored so older configurations keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub version: String,
    /// Media extensions, compared case-insensitively; the leading dot is optional.
    pub file_types: Vec<String>,
    /// Also move files whose extension is not in `file_types`.
    pub process_all_files: bool,
    /// Folder name template using `YYYY`, `MM` and optionally `DD`.
    pub date_format: String,
    pub recursive: bool,
    #[serde(alias = "dry_run_default")]
    pub dry_run: bool,
    #[serde(alias = "verify")]
    pub verify_checksum: bool,
    pub duplicate_handling: DuplicatePolicy,
    pub parallel_scan: bool,
    /// Directory `organize` and `scan` use when no path is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_source: Option<PathBuf>,
    /// Write a JSON-lines audit log for every run that moves files.
    pub create_log: bool,
    /// Directory for audit logs; `~/.picsort/logs` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Ask before moving more than `LARGE_OPERATION_FILES` files.
    pub confirm_large_operations: bool,
    /// Where resume records live; `~/.picsort/resume` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_dir: Option<PathBuf>,
}

/// Runs with more files than this ask for confirmation.
pub const LARGE_OPERATION_FILES: usize = 10;

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            file_types: DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect(),
            process_all_files: false,
            date_format: "MM.YYYY".to_string(),
            recursive: false,
            dry_run: false,
            verify_checksum: true,
            duplicate_handling: DuplicatePolicy::Increment,
            parallel_scan: true,
            default_source: None,
            create_log: true,
            log_path: None,
            confirm_large_operations: true,
            resume_dir: None,
        }
    }
}

impl Config {
    /// `~/.picsort/config.yaml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(app_dir()?.join(CONFIG_FILE))
    }

    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else the default file if it
    /// exists, else built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = match Self::default_path() {
            Ok(path) => path,
            Err(ConfigError::NoHome) => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        match Self::load(&path) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write this configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let yaml = self.to_yaml(path)?;
        fs::write(path, yaml).map_err(io_err)
    }

    pub fn to_yaml(&self, path: &Path) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid {
                field: "version",
                reason: format!("expected {CONFIG_VERSION}, found {}", self.version),
            });
        }
        if self.file_types.iter().all(|t| normalize_extension(t).is_empty()) {
            return Err(ConfigError::Invalid {
                field: "file_types",
                reason: "must list at least one extension".into(),
            });
        }
        if !self.date_format.contains("YYYY") || !self.date_format.contains("MM") {
            return Err(ConfigError::Invalid {
                field: "date_format",
                reason: format!("'{}' must contain YYYY and MM", self.date_format),
            });
        }
        let sample = self.render_folder_name(&Local::now());
        if Path::new(&sample).is_absolute()
            || Path::new(&sample)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(ConfigError::Invalid {
                field: "date_format",
                reason: format!("'{}' must render to a relative folder name", self.date_format),
            });
        }
        Ok(())
    }

    /// Whether `file_type` (e.g. `.JPG` or `jpg`) is one of the media types.
    pub fn is_media_type(&self, file_type: &str) -> bool {
        let wanted = normalize_extension(file_type);
        !wanted.is_empty()
            && self
                .file_types
                .iter()
                .any(|t| normalize_extension(t) == wanted)
    }

    /// Folder name for a timestamp, e.g. `MM.YYYY` -> `08.2024`.
    pub fn render_folder_name(&self, when: &DateTime<Local>) -> String {
        self.date_format
            .replace("YYYY", &format!("{:04}", when.year()))
            .replace("MM", &format!("{:02}", when.month()))
            .replace("DD", &format!("{:02}", when.day()))
    }

    /// Directory holding resume records.
    pub fn resume_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.resume_dir {
            Some(dir) => expand_home(dir),
            None => Ok(app_dir()?.join(RESUME_DIR)),
        }
    }

    /// Directory holding audit logs.
    pub fn log_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.log_path {
            Some(dir) => expand_home(dir),
            None => Ok(app_dir()?.join(LOG_DIR)),
        }
    }

    pub fn default_source(&self) -> Result<Option<PathBuf>, ConfigError> {
        self.default_source.as_deref().map(expand_home).transpose()
    }
}

fn app_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(APP_DIR))
        .ok_or(ConfigError::NoHome)
}

/// `~/x` -> `$HOME/x`; other paths are returned unchanged.
fn expand_home(path: &Path) -> Result<PathBuf, ConfigError> {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or(ConfigError::NoHome),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// `.JPG` / `jpg` -> `jpg`.
fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
