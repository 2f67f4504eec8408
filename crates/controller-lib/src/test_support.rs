//! Fakes shared by the unit tests

use crate::collector::SampleSource;
use crate::model::AnomalyModel;
use crate::models::{Classification, MetricSample, Verdict, WorkloadRef};
use crate::notifier::Notifier;
use crate::remediation::{ControlPlane, DispatchError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays a fixed list of samples, then repeats the last one
pub struct ScriptedSamples {
    script: Vec<MetricSample>,
    calls: AtomicUsize,
}

impl ScriptedSamples {
    pub fn new(script: Vec<MetricSample>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleSource for ScriptedSamples {
    async fn collect(&self) -> MetricSample {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .get(i)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or_else(|| MetricSample::new(0.0, 0.0, 0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    SetReplicas(WorkloadRef, u32),
    Restart(WorkloadRef),
}

/// Records every control plane request
pub struct RecordingControlPlane {
    calls: Mutex<Vec<ControlPlaneCall>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingControlPlane {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
            delay: None,
        }
    }

    /// Rejects every request with an API error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, call: ControlPlaneCall) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DispatchError::Api("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn set_replicas(&self, target: &WorkloadRef, replicas: u32) -> Result<(), DispatchError> {
        self.record(ControlPlaneCall::SetReplicas(target.clone(), replicas))
            .await
    }

    async fn restart(&self, target: &WorkloadRef) -> Result<(), DispatchError> {
        self.record(ControlPlaneCall::Restart(target.clone())).await
    }
}

/// Keeps every delivered message
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Flags any sample whose latency exceeds a fixed limit
pub struct LatencyLimitModel {
    pub limit: f64,
}

impl AnomalyModel for LatencyLimitModel {
    fn evaluate(&self, sample: &MetricSample) -> Verdict {
        if sample.latency_p95 > self.limit {
            Verdict {
                classification: Classification::Anomalous,
                score: 0.9,
            }
        } else {
            Verdict {
                classification: Classification::Normal,
                score: 0.3,
            }
        }
    }

    fn training_size(&self) -> usize {
        0
    }
}
