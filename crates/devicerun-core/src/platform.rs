//! Target platforms and device-side path addressing.
//!
//! Android exposes a plain filesystem path for the app's data directory.
//! iOS files live inside the app container and are addressed as
//! `@<bundle-id>:<container-relative-path>`. [`RemoteDataDir`] hides the
//! difference so staging and retrieval can join relative paths uniformly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mobile platform of the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    /// Accessibility id of the app's start control.
    pub fn default_start_control(self) -> &'static str {
        match self {
            Platform::Android => "Start Testing",
            Platform::Ios => "startButton",
        }
    }

    /// Name used in Appium's `platformName` capability.
    pub fn appium_name(self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
        }
    }

    /// Default Appium automation backend for this platform.
    pub fn automation_name(self) -> &'static str {
        match self {
            Platform::Android => "UiAutomator2",
            Platform::Ios => "XCUITest",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform '{}' (expected android or ios)", other)),
        }
    }
}

/// Device-side directory that mirrors the local data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDataDir {
    /// Absolute filesystem path on the device (Android).
    Path(String),
    /// Path inside an application container (iOS).
    AppContainer {
        bundle_id: String,
        path: String,
    },
}

impl RemoteDataDir {
    /// An Android-style filesystem path. Trailing separators are dropped.
    pub fn path(path: impl Into<String>) -> Self {
        let path = path.into();
        RemoteDataDir::Path(trim_trailing_slash(&path).to_string())
    }

    /// An iOS app-container path.
    pub fn app_container(bundle_id: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        RemoteDataDir::AppContainer {
            bundle_id: bundle_id.into(),
            path: trim_trailing_slash(path.trim_start_matches('/')).to_string(),
        }
    }

    /// Parse a configured remote directory.
    ///
    /// Strings of the form `@bundle:path` become [`RemoteDataDir::AppContainer`];
    /// anything else is a plain path.
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix('@') {
            if let Some((bundle_id, path)) = rest.split_once(':') {
                return Self::app_container(bundle_id, path);
            }
        }
        Self::path(s)
    }

    /// Device path of `relative` inside this directory.
    ///
    /// `relative` must already use `/` separators.
    pub fn join(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        match self {
            RemoteDataDir::Path(root) if root == "/" => format!("/{}", relative),
            _ => format!("{}/{}", self, relative),
        }
    }
}

impl fmt::Display for RemoteDataDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteDataDir::Path(p) => write!(f, "{}", p),
            RemoteDataDir::AppContainer { bundle_id, path } => write!(f, "@{}:{}", bundle_id, path),
        }
    }
}

fn trim_trailing_slash(s: &str) -> &str {
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && s.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}
