use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed { error: String },
    Skipped,
}

/// State for a single workflow step
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    pub started_at: Option<Instant>,
    pub duration_ms: Option<u64>,
}

impl StepState {
    pub fn new(index: usize, label: &str) -> Self {
        Self {
            index,
            label: label.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn pass(&mut self) {
        self.finish(StepStatus::Passed);
    }

    pub fn fail(&mut self, error: String) {
        self.finish(StepStatus::Failed { error });
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    /// Serialize state for reporting (without Instant which isn't serializable)
    pub fn to_report(&self) -> StepStateReport {
        StepStateReport {
            index: self.index,
            label: self.label.clone(),
            status: self.status.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStateReport {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    pub duration_ms: Option<u64>,
}

/// State for the whole retrieval run
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub steps: Vec<StepState>,
    pub current_index: usize,
    pub started_at: Option<Instant>,
    pub total_duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl RunState {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            steps: labels
                .iter()
                .enumerate()
                .map(|(i, label)| StepState::new(i, label))
                .collect(),
            current_index: 0,
            started_at: None,
            total_duration_ms: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn current_step(&mut self) -> Option<&mut StepState> {
        self.steps.get_mut(self.current_index)
    }

    pub fn advance(&mut self) -> bool {
        self.current_index += 1;
        self.current_index < self.steps.len()
    }

    /// Label of the step that failed, if any.
    pub fn failed_step(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed { .. }))
            .map(|s| s.label.as_str())
    }

    pub fn finish(&mut self, error: Option<String>) {
        if let Some(start) = self.started_at {
            self.total_duration_ms = Some(start.elapsed().as_millis() as u64);
        }
        self.error = error;
        let start_index = self.current_index.min(self.steps.len());
        for step in &mut self.steps[start_index..] {
            if matches!(step.status, StepStatus::Pending) {
                step.status = StepStatus::Skipped;
            }
        }
    }

    /// Serialize state for the post-mortem report
    pub fn to_report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            steps: self.steps.iter().map(|s| s.to_report()).collect(),
            total_duration_ms: self.total_duration_ms,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub steps: Vec<StepStateReport>,
    pub total_duration_ms: Option<u64>,
    pub error: Option<String>,
}
