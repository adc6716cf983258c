//! Run configuration.
//!
//! A [`RunConfig`] describes one device run: which automation server to talk
//! to, which platform and app, where the local data lives, and how to wait for
//! the run. Every field has a default, so an empty JSON object is a valid
//! config. The CLI loads a file (explicit `--config`, or
//! `~/.devicerun/config.json` when present) and then applies flag overrides.
//!
//! # Example
//!
//! ```no_run
//! use devicerun_core::config::RunConfig;
//!
//! let config = RunConfig::load_or_default(None).expect("invalid config");
//! println!("server: {}", config.server_url);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::completion::{CompletionPolicy, DEFAULT_STATUS_FIELD};
use crate::driver::Selector;
use crate::platform::{Platform, RemoteDataDir};

const CONFIG_DIR: &str = ".devicerun";
const CONFIG_FILENAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How to wait for the device run, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CompletionConfig {
    FixedDelay {
        delay_ms: u64,
    },
    Poll {
        #[serde(default = "default_status_field")]
        status_field: String,
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

fn default_status_field() -> String {
    DEFAULT_STATUS_FIELD.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Configuration for one device run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base URL of the Appium server.
    pub server_url: String,

    pub platform: Platform,

    /// Path of the app package (`.apk` / `.ipa`) passed as the `app` capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<PathBuf>,

    /// Host directory whose files are pushed to the device.
    pub local_data_dir: PathBuf,

    /// Device data directory. When unset, Android reads it from the app's
    /// data-directory field and iOS derives it from the bundle id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_data_dir: Option<String>,

    /// iOS bundle id of the app under test.
    pub bundle_id: String,

    /// Data directory inside the iOS app container.
    pub ios_container_path: String,

    /// Accessibility id of the start control; platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_control: Option<String>,

    /// Accessibility id of the Android data-directory text field.
    pub data_dir_field: String,

    /// Flip the Android all-files-access switch before staging.
    pub grant_file_access: bool,

    /// Delay after flipping the permission switch.
    pub permission_settle_ms: u64,

    /// Completion policy; platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionConfig>,

    /// Extra capabilities merged over the platform defaults.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub capabilities: Map<String, Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4723/wd/hub".to_string(),
            platform: Platform::Android,
            app: None,
            local_data_dir: PathBuf::from("data"),
            remote_data_dir: None,
            bundle_id: "com.company.test_app".to_string(),
            ios_container_path: "data/Documents/data".to_string(),
            start_control: None,
            data_dir_field: "Data Directory".to_string(),
            grant_file_access: true,
            permission_settle_ms: 3000,
            completion: None,
            capabilities: Map::new(),
        }
    }
}

/// Returns the default config path (`~/.devicerun/config.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

impl RunConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists, else
    /// the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(default) if default.is_file() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".into()));
        }
        if self.local_data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("local_data_dir is empty".into()));
        }
        if let Some(CompletionConfig::Poll { interval_ms: 0, .. }) = self.completion {
            return Err(ConfigError::Invalid("poll interval_ms must be positive".into()));
        }
        if self.platform == Platform::Ios && self.remote_data_dir.is_none() && self.bundle_id.is_empty() {
            return Err(ConfigError::Invalid("bundle_id is required on iOS".into()));
        }
        Ok(())
    }

    pub fn start_control(&self) -> Selector {
        Selector::accessibility_id(
            self.start_control
                .clone()
                .unwrap_or_else(|| self.platform.default_start_control().to_string()),
        )
    }

    /// The configured remote directory, or the iOS container default.
    ///
    /// Returns `None` on Android without an explicit directory: it has to be
    /// read from the app.
    pub fn static_remote_data_dir(&self) -> Option<RemoteDataDir> {
        match (&self.remote_data_dir, self.platform) {
            (Some(dir), _) => Some(RemoteDataDir::parse(dir)),
            (None, Platform::Ios) => Some(RemoteDataDir::app_container(
                self.bundle_id.clone(),
                self.ios_container_path.clone(),
            )),
            (None, Platform::Android) => None,
        }
    }

    pub fn completion_policy(&self) -> CompletionPolicy {
        match &self.completion {
            None => CompletionPolicy::for_platform(self.platform),
            Some(CompletionConfig::FixedDelay { delay_ms }) => {
                CompletionPolicy::FixedDelay(Duration::from_millis(*delay_ms))
            }
            Some(CompletionConfig::Poll {
                status_field,
                interval_ms,
                timeout_ms,
            }) => CompletionPolicy::Poll {
                status_field: Selector::accessibility_id(status_field.clone()),
                interval: Duration::from_millis(*interval_ms),
                timeout: timeout_ms.map(Duration::from_millis),
            },
        }
    }

    /// Bound the status poll by `timeout`.
    ///
    /// Only applies when the run polls (an explicit poll policy, or the iOS
    /// default). A fixed-delay run has no status field to poll and is left
    /// unchanged; returns `false` in that case.
    pub fn set_poll_timeout(&mut self, timeout: Duration) -> bool {
        let timeout_ms = Some(timeout.as_millis() as u64);
        match &mut self.completion {
            Some(CompletionConfig::Poll { timeout_ms: t, .. }) => {
                *t = timeout_ms;
                true
            }
            Some(CompletionConfig::FixedDelay { .. }) => false,
            None => match CompletionPolicy::for_platform(self.platform) {
                CompletionPolicy::Poll { .. } => {
                    self.completion = Some(CompletionConfig::Poll {
                        status_field: default_status_field(),
                        interval_ms: default_poll_interval_ms(),
                        timeout_ms,
                    });
                    true
                }
                CompletionPolicy::FixedDelay(_) => false,
            },
        }
    }

    /// W3C capabilities for session creation: platform defaults, the app
    /// path, then the user's overrides.
    pub fn capabilities(&self) -> Map<String, Value> {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform.appium_name()));
        caps.insert("appium:automationName".into(), json!(self.platform.automation_name()));
        match self.platform {
            Platform::Android => {
                caps.insert("appium:autoGrantPermissions".into(), json!(false));
                caps.insert("appium:fullReset".into(), json!(true));
                caps.insert("appium:appWaitPackage".into(), json!("com.android.settings"));
                caps.insert("appium:appWaitActivity".into(), json!("*"));
                caps.insert("appium:appWaitDuration".into(), json!(10000));
            }
            Platform::Ios => {
                caps.insert("appium:autoGrantPermissions".into(), json!(true));
                caps.insert("appium:autoAcceptAlerts".into(), json!(true));
                caps.insert("appium:autoDismissAlerts".into(), json!(true));
                caps.insert("appium:fullReset".into(), json!(false));
                caps.insert("appium:appWaitActivity".into(), json!("*"));
            }
        }
        if let Some(app) = &self.app {
            let app = std::path::absolute(app).unwrap_or_else(|_| app.clone());
            caps.insert("appium:app".into(), json!(app.to_string_lossy()));
        }
        for (key, value) in &self.capabilities {
            caps.insert(key.clone(), value.clone());
        }
        caps
    }
}
