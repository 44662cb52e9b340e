use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Status of an analysis job. Transitions only move forward:
/// `queued -> processing -> completed | failed`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Output produced by one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: String,
    pub output: String,
}

/// Stage outputs in execution order.
///
/// Serialized as an array so the order survives JSONB storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOutputs(Vec<StageOutput>);

impl StageOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| o.output.as_str())
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.get(stage).is_some()
    }

    /// Records a stage output. A rerun of a stage replaces its value in place.
    pub fn insert(&mut self, stage: impl Into<String>, output: impl Into<String>) {
        let stage = stage.into();
        let output = output.into();
        match self.0.iter_mut().find(|o| o.stage == stage) {
            Some(existing) => existing.output = output,
            None => self.0.push(StageOutput { stage, output }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageOutput> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|o| o.stage.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` into `self`, keeping existing positions.
    pub fn merge(&mut self, other: &StageOutputs) {
        for o in other.iter() {
            self.insert(o.stage.clone(), o.output.clone());
        }
    }
}

/// Uploaded file as staged for the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub filename: String,
    pub size_bytes: i64,
    /// Name of the encrypted staged file.
    pub locator: String,
}

/// A lab report analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub submitter_id: Option<String>,
    pub artifact_fingerprint: String,
    pub directive: String,
    pub artifact: ArtifactMeta,
    pub status: JobStatus,
    pub stage_outputs: StageOutputs,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds of the final pipeline attempt.
    pub processing_time: Option<f64>,
}

/// Fields supplied by the submission path when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub submitter_id: Option<String>,
    pub artifact_fingerprint: String,
    pub directive: String,
    pub artifact: ArtifactMeta,
}

/// Terminal transition applied by the owning worker.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: JobStatus,
    pub stage_outputs: StageOutputs,
    pub error: Option<String>,
    pub processing_time: f64,
}

impl TerminalUpdate {
    pub fn completed(stage_outputs: StageOutputs, processing_time: f64) -> Self {
        Self {
            status: JobStatus::Completed,
            stage_outputs,
            error: None,
            processing_time,
        }
    }

    pub fn failed(stage_outputs: StageOutputs, error: String, processing_time: f64) -> Self {
        Self {
            status: JobStatus::Failed,
            stage_outputs,
            error: Some(error),
            processing_time,
        }
    }
}

/// Pagination and filtering for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub submitter_id: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::from_str("failed").unwrap(), JobStatus::Failed);
        assert!(JobStatus::from_str("pending").is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn stage_outputs_keep_first_insertion_position() {
        let mut outputs = StageOutputs::new();
        outputs.insert("verification", "v1");
        outputs.insert("clinical_analysis", "c1");
        outputs.insert("verification", "v2");

        assert_eq!(outputs.names(), vec!["verification", "clinical_analysis"]);
        assert_eq!(outputs.get("verification"), Some("v2"));
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn stage_outputs_serialize_as_ordered_array() {
        let mut outputs = StageOutputs::new();
        outputs.insert("b", "second");
        outputs.insert("a", "first");

        let json = serde_json::to_value(&outputs).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"stage": "b", "output": "second"},
                {"stage": "a", "output": "first"}
            ])
        );
    }
}
