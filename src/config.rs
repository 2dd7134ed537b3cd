use crate::error::ConfigError;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "checklist";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub session_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub session_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    /// Defaults, then the user's `config.toml`, then the environment.
    pub fn load() -> Result<Config, ConfigError> {
        let path = config_file_path();
        let file = match &path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        let origin = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "config.toml".to_string());
        Config::resolve(file, |key| env::var(key).ok(), dirs::data_dir(), &origin)
    }

    pub fn resolve<E>(
        file: FileConfig,
        env: E,
        data_dir: Option<PathBuf>,
        origin: &str,
    ) -> Result<Config, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let api_url = env("CHECKLIST_API_URL")
            .or(file.api_url)
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ConfigError::MissingApiUrl(origin.to_string()))?;

        let app_data = data_dir.map(|dir| dir.join(APP_DIR));

        let session_file = match env("CHECKLIST_SESSION_FILE")
            .map(PathBuf::from)
            .or(file.session_file)
        {
            Some(path) => path,
            None => app_data
                .as_ref()
                .map(|dir| dir.join("session.toml"))
                .ok_or(ConfigError::NoDataDir("session_file"))?,
        };

        let log_dir = match env("CHECKLIST_LOG_DIR").map(PathBuf::from).or(file.log_dir) {
            Some(path) => path,
            None => app_data
                .as_ref()
                .map(|dir| dir.join("logs"))
                .ok_or(ConfigError::NoDataDir("log_dir"))?,
        };

        let log_level = env("CHECKLIST_LOG")
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Config {
            api_url,
            session_file,
            log_dir,
            log_level,
        })
    }
}
