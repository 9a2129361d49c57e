use crate::artifacts::TrainingMetrics;
use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Step { job_id: TrainingJobId, step: u64, total: Option<u64> },
    Metrics { job_id: TrainingJobId, metrics: TrainingMetrics },
    Finished { job_id: TrainingJobId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => println!("[train:{job_id}] started"),
            ProgressEvent::Message { job_id, message } => println!("[train:{job_id}] {message}"),
            ProgressEvent::Step { job_id, step, total } => {
                if let Some(total) = total {
                    println!("[train:{job_id}] step {step}/{total}");
                } else {
                    println!("[train:{job_id}] step {step}");
                }
            }
            ProgressEvent::Metrics { job_id, metrics } => {
                let loss = metrics.train_loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}"));
                let lr = metrics.learning_rate.map_or_else(|| "-".to_string(), |l| format!("{l:.2e}"));
                println!("[train:{job_id}] loss {loss} lr {lr}");
            }
            ProgressEvent::Finished { job_id } => println!("[train:{job_id}] finished"),
        }
    }
}

/// Forwards events to `tracing`; used when stdout is reserved for JSON output.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => tracing::info!(%job_id, "training started"),
            ProgressEvent::Message { job_id, message } => tracing::info!(%job_id, "{message}"),
            ProgressEvent::Step { job_id, step, total } => tracing::debug!(%job_id, step, ?total, "step"),
            ProgressEvent::Metrics { job_id, metrics } => {
                tracing::info!(%job_id, loss = ?metrics.train_loss, lr = ?metrics.learning_rate, "metrics");
            }
            ProgressEvent::Finished { job_id } => tracing::info!(%job_id, "training finished"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
