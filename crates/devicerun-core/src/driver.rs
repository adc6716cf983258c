//! Device automation client trait for backend-agnostic device runs.
//!
//! This module defines the [`DeviceClient`] trait, the single seam through
//! which the orchestrator talks to a device. Every device-facing action
//! (locating elements, clicking, reading text, moving files, ending the
//! session) goes through it, so the run logic never depends on a particular
//! automation server.
//!
//! The crate ships one implementation, [`AppiumClient`](crate::appium::AppiumClient),
//! which speaks the W3C WebDriver protocol to an Appium-compatible server.
//! Tests provide scripted in-memory implementations.
//!
//! # Example
//!
//! ```no_run
//! use devicerun_core::driver::{DeviceClient, Selector};
//!
//! # async fn example(client: &dyn DeviceClient) -> Result<(), devicerun_core::driver::DriverError> {
//! let button = client.find_element(&Selector::accessibility_id("startButton")).await?;
//! client.click(&button).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors that can occur during device automation operations.
///
/// This enum unifies errors from all backends behind a single type so the
/// orchestrator can classify failures (missing element, missing file, lost
/// session) without knowing which backend produced them.
#[derive(Error, Debug)]
pub enum DriverError {
    /// No element matched the selector.
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The remote file does not exist on the device.
    #[error("Remote file not found: {0}")]
    FileNotFound(String),

    /// A command or operation failed with the given message.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The automation server refused to create a session.
    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    /// No session is active.
    #[error("Not connected to automation server")]
    NotConnected,

    /// The HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server replied with something that is not a valid protocol message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How to locate an element in the application under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "using", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// Match on the accessibility identifier (Android content-desc, iOS
    /// accessibilityIdentifier).
    AccessibilityId(String),
    /// Match on the native widget class, e.g. `android.widget.Switch`.
    ClassName(String),
}

impl Selector {
    /// Shorthand for [`Selector::AccessibilityId`].
    pub fn accessibility_id(id: impl Into<String>) -> Self {
        Selector::AccessibilityId(id.into())
    }

    /// Shorthand for [`Selector::ClassName`].
    pub fn class_name(class: impl Into<String>) -> Self {
        Selector::ClassName(class.into())
    }

    /// The WebDriver locator strategy name for this selector.
    pub fn strategy(&self) -> &'static str {
        match self {
            Selector::AccessibilityId(_) => "accessibility id",
            Selector::ClassName(_) => "class name",
        }
    }

    /// The value matched against.
    pub fn value(&self) -> &str {
        match self {
            Selector::AccessibilityId(v) | Selector::ClassName(v) => v,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy(), self.value())
    }
}

/// Opaque reference to an element found by a [`DeviceClient`].
///
/// The id is backend-specific (a WebDriver element id for Appium). The
/// selector that produced it is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub id: String,
    pub selector: Selector,
}

impl ElementRef {
    pub fn new(id: impl Into<String>, selector: Selector) -> Self {
        Self {
            id: id.into(),
            selector,
        }
    }
}

/// Hardware keys the orchestrator needs to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndroidKey {
    Back,
}

impl AndroidKey {
    /// The Android `KeyEvent` keycode.
    pub fn keycode(self) -> u32 {
        match self {
            AndroidKey::Back => 4,
        }
    }
}

/// Trait for backend-agnostic device automation.
///
/// Implementors wrap one live session on an automation server. All methods
/// that reach the device are async; the orchestrator awaits them one at a
/// time and never shares a client between concurrent runs.
///
/// # Required Methods
///
/// Implementors must provide: [`find_element`](DeviceClient::find_element),
/// [`click`](DeviceClient::click), [`element_text`](DeviceClient::element_text),
/// [`push_file`](DeviceClient::push_file), [`pull_file`](DeviceClient::pull_file),
/// [`press_key`](DeviceClient::press_key) and [`quit`](DeviceClient::quit).
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Find the first element matching `selector`.
    ///
    /// Returns [`DriverError::NoSuchElement`] when nothing matches.
    async fn find_element(&self, selector: &Selector) -> Result<ElementRef, DriverError>;

    /// Click (tap) an element.
    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Read the visible text of an element.
    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError>;

    /// Write `contents` to `remote_path` on the device.
    ///
    /// Intermediate directories are created by the server.
    async fn push_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), DriverError>;

    /// Read the file at `remote_path` from the device.
    ///
    /// Returns [`DriverError::FileNotFound`] when the file does not exist.
    async fn pull_file(&self, remote_path: &str) -> Result<Vec<u8>, DriverError>;

    /// Send a hardware key press.
    async fn press_key(&self, key: AndroidKey) -> Result<(), DriverError>;

    /// Annotate the current step of the run.
    ///
    /// Hosted device farms render these labels next to their screenshots.
    /// The default implementation only logs the label.
    async fn label(&self, text: &str) -> Result<(), DriverError> {
        info!(label = text, "step");
        Ok(())
    }

    /// End the session and release the device.
    async fn quit(&self) -> Result<(), DriverError>;
}
