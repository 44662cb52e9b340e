pub mod executor;
pub mod report;
pub mod stages;

pub use executor::{
    PipelineExecutor, PipelineFailure, PipelineOutput, PipelineRun, StageDescriptor, StageError,
    StageInput, StageObserver, StageProcessor,
};
pub use report::{ReportHeader, ReportSection};
pub use stages::{default_stages, TextGenerator};
