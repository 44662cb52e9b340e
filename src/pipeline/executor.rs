use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::StageOutputs;
use crate::pipeline::report::{self, ReportHeader, ReportSection};
use crate::services::llm::LlmError;

/// Everything one stage sees. `context` holds the outputs of the stages that
/// already ran in this attempt and is read-only.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub text: &'a str,
    pub directive: &'a str,
    pub artifact_locator: &'a str,
    pub context: &'a StageOutputs,
}

/// One named step of the analysis pipeline.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn process(&self, input: StageInput<'_>) -> Result<String, StageError>;
}

/// Notified after each stage completes so progress can be persisted.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn stage_completed(&self, stage: &str, output: &str);
}

#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    pub title: String,
    pub processor: Arc<dyn StageProcessor>,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        processor: Arc<dyn StageProcessor>,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            processor,
        }
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Inputs of a single pipeline attempt.
pub struct PipelineRun<'a> {
    pub text: &'a str,
    pub directive: &'a str,
    pub artifact_locator: &'a str,
    /// Cooperative interrupt, checked before every stage.
    pub interrupt: Option<&'a AtomicBool>,
    pub observer: Option<&'a dyn StageObserver>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub outputs: StageOutputs,
}

/// Runs a fixed, ordered list of stages strictly one after another.
///
/// All stages always run; a verification stage's verdict is carried in its
/// output and never gates the stages after it.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    stages: Vec<StageDescriptor>,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, PipelineConfigError> {
        if stages.is_empty() {
            return Err(PipelineConfigError::Empty);
        }
        let mut seen = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(PipelineConfigError::UnnamedStage);
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineConfigError::DuplicateStage(stage.name.clone()));
            }
        }
        Ok(Self { stages })
    }

    pub fn sections(&self) -> Vec<ReportSection> {
        self.stages
            .iter()
            .map(|s| ReportSection {
                stage: s.name.clone(),
                title: s.title.clone(),
            })
            .collect()
    }

    /// Aggregate document for `outputs`, laid out in pipeline order.
    pub fn aggregate(&self, header: &ReportHeader<'_>, outputs: &StageOutputs) -> String {
        report::render(header, &self.sections(), outputs)
    }

    pub async fn run(&self, run: PipelineRun<'_>) -> Result<PipelineOutput, PipelineFailure> {
        let mut outputs = StageOutputs::new();

        for stage in &self.stages {
            if run.interrupt.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                tracing::warn!(stage = %stage.name, "Pipeline interrupted before stage");
                return Err(PipelineFailure {
                    stage: stage.name.clone(),
                    source: StageError::Interrupted,
                    completed: outputs,
                });
            }

            tracing::debug!(stage = %stage.name, "Running stage");
            let started = Instant::now();
            let input = StageInput {
                text: run.text,
                directive: run.directive,
                artifact_locator: run.artifact_locator,
                context: &outputs,
            };

            let output = match stage.processor.process(input).await {
                Ok(output) => output,
                Err(source) => {
                    tracing::warn!(stage = %stage.name, error = %source, "Stage failed");
                    return Err(PipelineFailure {
                        stage: stage.name.clone(),
                        source,
                        completed: outputs,
                    });
                }
            };

            let elapsed = started.elapsed();
            metrics::histogram!("analysis_stage_seconds", "stage" => stage.name.clone())
                .record(elapsed.as_secs_f64());
            tracing::info!(
                stage = %stage.name,
                duration_ms = elapsed.as_millis() as u64,
                output_chars = output.len(),
                "Stage complete"
            );

            if let Some(observer) = run.observer {
                observer.stage_completed(&stage.name, &output).await;
            }
            outputs.insert(stage.name.clone(), output);
        }

        Ok(PipelineOutput { outputs })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("{0}")]
    Processor(String),

    #[error("interrupted after the soft time limit")]
    Interrupted,
}

/// A failed attempt: which stage broke, why, and what finished before it.
#[derive(Debug, thiserror::Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct PipelineFailure {
    pub stage: String,
    pub source: StageError,
    pub completed: StageOutputs,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("stage name must not be blank")]
    UnnamedStage,

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Echoes its name and the stages it could see.
    struct Echo(&'static str);

    #[async_trait]
    impl StageProcessor for Echo {
        async fn process(&self, input: StageInput<'_>) -> Result<String, StageError> {
            Ok(format!("{} saw [{}]", self.0, input.context.names().join(",")))
        }
    }

    struct Fails;

    #[async_trait]
    impl StageProcessor for Fails {
        async fn process(&self, _input: StageInput<'_>) -> Result<String, StageError> {
            Err(StageError::Processor("model unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl StageObserver for Recorder {
        async fn stage_completed(&self, stage: &str, _output: &str) {
            self.0.lock().unwrap().push(stage.to_string());
        }
    }

    fn stage(name: &'static str, processor: Arc<dyn StageProcessor>) -> StageDescriptor {
        StageDescriptor::new(name, name.to_uppercase(), processor)
    }

    fn run_args<'a>(
        interrupt: Option<&'a AtomicBool>,
        observer: Option<&'a dyn StageObserver>,
    ) -> PipelineRun<'a> {
        PipelineRun {
            text: "Hemoglobin 13.5",
            directive: "summarize",
            artifact_locator: "lab_report_1.pdf.enc",
            interrupt,
            observer,
        }
    }

    #[tokio::test]
    async fn test_stages_see_prior_outputs_in_order() {
        let executor = PipelineExecutor::new(vec![
            stage("a", Arc::new(Echo("a"))),
            stage("b", Arc::new(Echo("b"))),
            stage("c", Arc::new(Echo("c"))),
        ])
        .unwrap();
        let recorder = Recorder::default();

        let output = executor
            .run(run_args(None, Some(&recorder as &dyn StageObserver)))
            .await
            .unwrap();

        assert_eq!(output.outputs.names(), vec!["a", "b", "c"]);
        assert_eq!(output.outputs.get("a"), Some("a saw []"));
        assert_eq!(output.outputs.get("c"), Some("c saw [a,b]"));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_aborts_and_keeps_completed_outputs() {
        let executor = PipelineExecutor::new(vec![
            stage("a", Arc::new(Echo("a"))),
            stage("b", Arc::new(Fails)),
            stage("c", Arc::new(Echo("c"))),
        ])
        .unwrap();

        let failure = executor.run(run_args(None, None)).await.unwrap_err();

        assert_eq!(failure.stage, "b");
        assert!(matches!(failure.source, StageError::Processor(_)));
        assert_eq!(failure.completed.names(), vec!["a"]);
        assert!(failure.to_string().contains("model unavailable"));
    }

    #[tokio::test]
    async fn test_interrupt_stops_before_next_stage() {
        let executor = PipelineExecutor::new(vec![
            stage("a", Arc::new(Echo("a"))),
            stage("b", Arc::new(Echo("b"))),
        ])
        .unwrap();
        let interrupt = AtomicBool::new(true);

        let failure = executor
            .run(run_args(Some(&interrupt), None))
            .await
            .unwrap_err();

        assert_eq!(failure.stage, "a");
        assert!(matches!(failure.source, StageError::Interrupted));
        assert!(failure.completed.is_empty());
    }

    #[test]
    fn test_rejects_invalid_stage_lists() {
        assert!(matches!(
            PipelineExecutor::new(vec![]),
            Err(PipelineConfigError::Empty)
        ));
        assert!(matches!(
            PipelineExecutor::new(vec![
                stage("a", Arc::new(Echo("a"))),
                stage("a", Arc::new(Echo("a"))),
            ]),
            Err(PipelineConfigError::DuplicateStage(name)) if name == "a"
        ));
    }
}
