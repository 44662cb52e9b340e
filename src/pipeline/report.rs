use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::analysis::DISCLAIMER;
use crate::models::job::{AnalysisJob, StageOutputs};

const RULE_WIDTH: usize = 80;
const TITLE_WIDTH: usize = 50;
const DISCLAIMER_RULE_WIDTH: usize = 40;

/// Title of the section rendered for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub stage: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct ReportHeader<'a> {
    pub job_id: Uuid,
    pub filename: &'a str,
    pub directive: &'a str,
    pub completed_at: DateTime<Utc>,
    pub processing_time: f64,
}

impl<'a> ReportHeader<'a> {
    pub fn for_job(job: &'a AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            filename: &job.artifact.filename,
            directive: &job.directive,
            completed_at: job.completed_at.unwrap_or(job.created_at),
            processing_time: job.processing_time.unwrap_or_default(),
        }
    }
}

/// Renders the aggregate document.
///
/// Layout: header block, one section per stage in `sections` order, summary,
/// footer. Stages without output (or with blank output) get no section.
pub fn render(header: &ReportHeader<'_>, sections: &[ReportSection], outputs: &StageOutputs) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let title_rule = "=".repeat(TITLE_WIDTH);
    let mut lines: Vec<String> = Vec::new();

    lines.extend([
        rule.clone(),
        "LAB REPORT ANALYSIS".to_string(),
        rule.clone(),
        String::new(),
        format!("Analysis ID: {}", header.job_id),
        format!("Original File: {}", header.filename),
        format!("Completed: {}", header.completed_at.to_rfc3339()),
        format!("Processing Time: {:.2} seconds", header.processing_time),
        format!("Directive: {}", header.directive),
        String::new(),
        "MEDICAL DISCLAIMER:".to_string(),
        "-".repeat(DISCLAIMER_RULE_WIDTH),
        DISCLAIMER.to_string(),
        String::new(),
        rule.clone(),
        String::new(),
    ]);

    let mut rendered = 0;
    for section in sections {
        let Some(output) = outputs.get(&section.stage) else {
            continue;
        };
        if output.trim().is_empty() {
            continue;
        }
        rendered += 1;
        lines.extend([
            section.title.clone(),
            title_rule.clone(),
            String::new(),
            output.trim_end().to_string(),
            String::new(),
            rule.clone(),
            String::new(),
        ]);
    }

    lines.extend([
        "ANALYSIS SUMMARY".to_string(),
        title_rule,
        String::new(),
        "Status: Analysis Completed Successfully".to_string(),
        format!("Specialist Evaluations: {} reports generated", rendered),
        format!(
            "Performance: Processed in {:.2} seconds",
            header.processing_time
        ),
        String::new(),
        "NEXT STEPS:".to_string(),
        "1. Share this report with your healthcare provider".to_string(),
        "2. Discuss any values outside the reference ranges".to_string(),
        "3. Follow medical advice for any required follow-up tests".to_string(),
        String::new(),
        rule.clone(),
        String::new(),
        format!("Generated by {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        format!(
            "Report Generated: {} UTC",
            header.completed_at.format("%Y-%m-%d %H:%M:%S")
        ),
        rule,
    ]);

    lines.join("\n")
}
