//! Performance summary of a run's `metrics.json`.
//!
//! The test app writes a JSON array of trace events. `Event` entries mark
//! phases of the run (`ModelTestingStart`, `RunModelEnd`, ...), and
//! `Performance` entries carry CPU, memory and latency samples. The summary
//! restricts CPU and memory to the window between `ModelTestingStart` and
//! `RunModelEnd` and reports peak memory relative to the last sample taken
//! before the model test began.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EVENT_CATEGORY: &str = "Event";
const PERFORMANCE_CATEGORY: &str = "Performance";
const MODEL_TESTING_START: &str = "ModelTestingStart";
const RUN_MODEL_END: &str = "RunModelEnd";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metrics are not a JSON array of trace events: {0}")]
    Json(#[from] serde_json::Error),

    #[error("memory sample at ts={0} has neither Physical_Memory_KB nor JSHeapSize_KB")]
    InvalidMemorySample(i64),

    #[error("CPU sample at ts={0} has no CPU_Percentage")]
    InvalidCpuSample(i64),

    #[error("no {0} samples recorded during the model test")]
    NoSamples(&'static str),
}

/// One entry of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    pub cat: String,
    pub ts: i64,
    #[serde(default)]
    pub pid: Option<u64>,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl TraceEvent {
    fn arg_f64(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(|v| v.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPoint {
    pub name: String,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePoint {
    pub name: String,
    pub time: i64,
    pub value: f64,
}

/// Summary figures for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfSummary {
    /// Latency percentiles as reported by the app, in milliseconds.
    pub latency_ms: BTreeMap<String, f64>,
    pub peak_memory_kb: f64,
    pub avg_cpu_pct: f64,
    pub event_series: Vec<EventPoint>,
    pub cpu_pct_series: Vec<SamplePoint>,
    pub memory_kb_series: Vec<SamplePoint>,
}

impl PerfSummary {
    /// Parse `metrics.json` text and summarise it.
    pub fn from_json(text: &str) -> Result<Self, MetricsError> {
        let events: Vec<TraceEvent> = serde_json::from_str(text)?;
        Self::from_events(&events)
    }

    pub fn from_events(events: &[TraceEvent]) -> Result<Self, MetricsError> {
        let mut event_series = Vec::new();
        let mut cpu_pct_series = Vec::new();
        let mut memory_kb_series = Vec::new();
        let mut model_cpu = Vec::new();
        let mut model_memory = Vec::new();
        let mut latency_ms = BTreeMap::new();

        let mut baseline_memory = 0.0;
        let mut testing_started = false;
        let mut run_ended = false;

        for event in events {
            match (event.cat.as_str(), event.name.as_str()) {
                (EVENT_CATEGORY, name) => {
                    event_series.push(EventPoint {
                        name: name.to_string(),
                        time: event.ts,
                    });
                    if name == MODEL_TESTING_START {
                        testing_started = true;
                    }
                    if name == RUN_MODEL_END {
                        run_ended = true;
                    }
                }
                (PERFORMANCE_CATEGORY, "CPU") => {
                    let value = event
                        .arg_f64("CPU_Percentage")
                        .ok_or(MetricsError::InvalidCpuSample(event.ts))?;
                    cpu_pct_series.push(SamplePoint {
                        name: event.name.clone(),
                        time: event.ts,
                        value,
                    });
                    if testing_started && !run_ended {
                        model_cpu.push(value);
                    }
                }
                (PERFORMANCE_CATEGORY, "Memory") => {
                    // Native apps report physical memory, browsers the JS heap.
                    let value = event
                        .arg_f64("Physical_Memory_KB")
                        .or_else(|| event.arg_f64("JSHeapSize_KB"))
                        .ok_or(MetricsError::InvalidMemorySample(event.ts))?;
                    memory_kb_series.push(SamplePoint {
                        name: event.name.clone(),
                        time: event.ts,
                        value,
                    });
                    if !testing_started {
                        baseline_memory = value;
                    } else if !run_ended {
                        model_memory.push(value);
                    }
                }
                (PERFORMANCE_CATEGORY, "Latency") => {
                    latency_ms = event
                        .args
                        .iter()
                        .filter_map(|(k, v)| v.as_f64().map(|v| (k.clone(), v)))
                        .collect();
                }
                _ => {}
            }
        }

        let peak_memory = model_memory
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or(MetricsError::NoSamples("memory"))?;
        if model_cpu.is_empty() {
            return Err(MetricsError::NoSamples("CPU"));
        }
        let avg_cpu_pct = model_cpu.iter().sum::<f64>() / model_cpu.len() as f64;

        Ok(Self {
            latency_ms,
            peak_memory_kb: peak_memory - baseline_memory,
            avg_cpu_pct,
            event_series,
            cpu_pct_series,
            memory_kb_series,
        })
    }
}
