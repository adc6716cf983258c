//! Shared test helpers for devicerun-core integration tests.
//!
//! Provides a scripted in-memory [`DeviceClient`] that records every call in
//! order, so tests can assert both outcomes and sequencing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use devicerun_core::config::RunConfig;
use devicerun_core::driver::{AndroidKey, DeviceClient, DriverError, ElementRef, Selector};
use devicerun_core::orchestrator::RunOrchestrator;
use devicerun_core::platform::Platform;
use devicerun_core::session::DeviceSession;

pub const ANDROID_REMOTE_DIR: &str = "/storage/emulated/0/Android/data/com.example.modeltestandroid/files";

/// Every interaction the orchestrator had with the device, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find(Selector),
    Click(String),
    Text(String),
    Push(String),
    Pull(String),
    Key(AndroidKey),
    Label(String),
    Quit,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    started: bool,
    statuses: VecDeque<String>,
    last_status: Option<String>,
    pushed: HashMap<String, Vec<u8>>,
}

/// Scripted device.
///
/// The status field reads `NOT_STARTED` until the start control is clicked,
/// then yields the scripted statuses one per read (repeating the last one).
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    data_dir_text: String,
    start_control: String,
    missing_elements: HashSet<String>,
    failing_pushes: HashSet<String>,
    remote_files: HashMap<String, Vec<u8>>,
    quit_fails: bool,
}

impl MockDevice {
    pub fn new(start_control: &str) -> Self {
        Self {
            data_dir_text: ANDROID_REMOTE_DIR.to_string(),
            start_control: start_control.to_string(),
            ..Default::default()
        }
    }

    pub fn android() -> Self {
        Self::new("Start Testing")
    }

    pub fn ios() -> Self {
        Self::new("startButton")
    }

    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        self.state.lock().unwrap().statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_remote_file(mut self, path: impl Into<String>, contents: &[u8]) -> Self {
        self.remote_files.insert(path.into(), contents.to_vec());
        self
    }

    /// Install both result artifacts under `remote_dir`.
    pub fn with_artifacts(self, remote_dir: &str, model: &[u8], metrics: &str) -> Self {
        self.with_remote_file(format!("{}/model_outputs.msgpack", remote_dir), model)
            .with_remote_file(format!("{}/metrics.json", remote_dir), metrics.as_bytes())
    }

    pub fn with_missing_element(mut self, selector_value: &str) -> Self {
        self.missing_elements.insert(selector_value.to_string());
        self
    }

    pub fn with_failing_push(mut self, remote_path: impl Into<String>) -> Self {
        self.failing_pushes.insert(remote_path.into());
        self
    }

    pub fn with_failing_quit(mut self) -> Self {
        self.quit_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pushed(&self) -> HashMap<String, Vec<u8>> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn quit_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Quit).count()
    }

    pub fn status_reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Text(id) if id == "statusField"))
            .count()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Pull(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl DeviceClient for MockDevice {
    async fn find_element(&self, selector: &Selector) -> Result<ElementRef, DriverError> {
        self.record(Call::Find(selector.clone()));
        if self.missing_elements.contains(selector.value()) {
            return Err(DriverError::NoSuchElement(selector.to_string()));
        }
        // The element id is the selector value, which keeps call logs readable.
        Ok(ElementRef::new(selector.value(), selector.clone()))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.record(Call::Click(element.id.clone()));
        if element.id == self.start_control {
            self.state.lock().unwrap().started = true;
        }
        Ok(())
    }

    async fn element_text(&self, element: &ElementRef) -> Result<String, DriverError> {
        self.record(Call::Text(element.id.clone()));
        match element.id.as_str() {
            "statusField" => {
                let mut state = self.state.lock().unwrap();
                if !state.started {
                    return Ok("NOT_STARTED".to_string());
                }
                let next = state.statuses.pop_front().or_else(|| state.last_status.clone());
                let status = next.unwrap_or_else(|| "Running".to_string());
                state.last_status = Some(status.clone());
                Ok(status)
            }
            "Data Directory" => Ok(self.data_dir_text.clone()),
            _ => Ok(String::new()),
        }
    }

    async fn push_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), DriverError> {
        self.record(Call::Push(remote_path.to_string()));
        if self.failing_pushes.contains(remote_path) {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "adb push failed",
            )));
        }
        self.state
            .lock()
            .unwrap()
            .pushed
            .insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn pull_file(&self, remote_path: &str) -> Result<Vec<u8>, DriverError> {
        self.record(Call::Pull(remote_path.to_string()));
        self.remote_files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| DriverError::FileNotFound(remote_path.to_string()))
    }

    async fn press_key(&self, key: AndroidKey) -> Result<(), DriverError> {
        self.record(Call::Key(key));
        Ok(())
    }

    async fn label(&self, text: &str) -> Result<(), DriverError> {
        self.record(Call::Label(text.to_string()));
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.record(Call::Quit);
        if self.quit_fails {
            return Err(DriverError::CommandFailed("session already gone".into()));
        }
        Ok(())
    }
}

/// Write `files` (relative path, contents) under `root`.
pub fn write_data_dir(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}

/// An orchestrator over `device` with a started session.
pub async fn orchestrator(device: &MockDevice, config: RunConfig) -> RunOrchestrator {
    let platform = config.platform;
    let session = DeviceSession::start(Arc::new(device.clone()), platform).await;
    RunOrchestrator::new(session, config)
}

pub fn android_config(data_dir: &Path) -> RunConfig {
    RunConfig {
        platform: Platform::Android,
        local_data_dir: data_dir.to_path_buf(),
        ..RunConfig::default()
    }
}

pub fn ios_config(data_dir: &Path) -> RunConfig {
    RunConfig {
        platform: Platform::Ios,
        local_data_dir: data_dir.to_path_buf(),
        ..RunConfig::default()
    }
}

pub const IOS_REMOTE_DIR: &str = "@com.company.test_app:data/Documents/data";

pub const SAMPLE_METRICS: &str = r#"[{"name":"ModelTestingStart","cat":"Event","ts":1,"args":{}},{"name":"CPU","cat":"Performance","ts":2,"args":{"CPU_Percentage":25.0}},{"name":"Memory","cat":"Performance","ts":3,"args":{"Physical_Memory_KB":1024}},{"name":"RunModelEnd","cat":"Event","ts":4,"args":{}}]"#;
