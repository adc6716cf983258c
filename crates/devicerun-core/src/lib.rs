//! # devicerun-core
//!
//! Core library for running a model on a mobile device through a
//! mobile-automation server.
//!
//! A run stages local model and data files onto an Android or iOS test app,
//! clicks its start control, waits for the on-device inference run to finish,
//! pulls the result artifacts back and writes them to standard output between
//! marker lines, where a log-capturing harness can pick them up.
//!
//! ## Modules
//!
//! - [`driver`] - The [`DeviceClient`](driver::DeviceClient) trait every device action goes through
//! - [`appium`] - `DeviceClient` implementation for Appium / W3C WebDriver servers
//! - [`session`] - Session lifecycle with guaranteed teardown
//! - [`platform`] - Platforms and device-side path addressing
//! - [`config`] - Run configuration (JSON file + defaults)
//! - [`staging`] - Best-effort upload of the local data directory
//! - [`status`] - The app's self-reported run status
//! - [`completion`] - Fixed-delay and status-polling wait policies
//! - [`artifacts`] - Result retrieval and the stdout output contract
//! - [`orchestrator`] - The run sequence tying everything together
//! - [`harvest`] - Recovering results from captured logs
//! - [`metrics`] - Performance summary of `metrics.json`
//!
//! ## External Dependencies
//!
//! Running against a real device requires an Appium server with the
//! UiAutomator2 (Android) or XCUITest (iOS) driver installed.

pub mod appium;
pub mod artifacts;
pub mod completion;
pub mod config;
pub mod driver;
pub mod harvest;
pub mod metrics;
pub mod orchestrator;
pub mod platform;
pub mod session;
pub mod staging;
pub mod status;
