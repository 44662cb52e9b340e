use async_trait::async_trait;
use std::sync::Arc;

use crate::models::job::StageOutputs;
use crate::pipeline::executor::{StageDescriptor, StageError, StageInput, StageProcessor};
use crate::services::llm::{LlmError, WorkersAiClient};

/// Anything that turns a system prompt and a user prompt into prose.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

#[async_trait]
impl TextGenerator for WorkersAiClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        WorkersAiClient::generate(self, system, prompt).await
    }
}

/// A stage that asks a specialist persona about the extracted document text.
pub struct PromptStage {
    system: &'static str,
    instructions: &'static str,
    generator: Arc<dyn TextGenerator>,
}

impl PromptStage {
    pub fn new(
        system: &'static str,
        instructions: &'static str,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            system,
            instructions,
            generator,
        }
    }
}

#[async_trait]
impl StageProcessor for PromptStage {
    async fn process(&self, input: StageInput<'_>) -> Result<String, StageError> {
        let prompt = build_prompt(self.instructions, input.directive, input.text, input.context);
        Ok(self.generator.generate(self.system, &prompt).await?)
    }
}

/// Assembles the user prompt: directive, task, document text, then the
/// findings of earlier stages so later specialists can build on them.
pub fn build_prompt(
    instructions: &str,
    directive: &str,
    text: &str,
    context: &StageOutputs,
) -> String {
    let mut prompt = format!(
        "User request: {directive}\n\n{instructions}\n\nLAB REPORT TEXT:\n\"\"\"\n{}\n\"\"\"",
        text.trim()
    );

    if !context.is_empty() {
        prompt.push_str("\n\nFINDINGS FROM EARLIER REVIEWERS:");
        for entry in context.iter() {
            prompt.push_str(&format!("\n\n[{}]\n{}", entry.stage, entry.output.trim()));
        }
    }

    prompt
}

const VERIFIER_SYSTEM: &str = "You are a medical document verification specialist. \
You recognise authentic laboratory reports by their formatting, laboratory headers, \
reference ranges and medical terminology. You are helpful to users with legitimate reports.";

const VERIFIER_TASK: &str = "Verify whether this document is a legitimate blood test or lab report. \
Report the document type, the laboratory details if present, the tests and parameters found, \
and a clear verdict (VERIFIED or NOT VERIFIED) with your reasoning.";

const DOCTOR_SYSTEM: &str = "You are a professional medical analysis assistant who interprets \
blood test results. You give factual, evidence-based explanations, never diagnose or prescribe, \
and always recommend consulting a healthcare provider.";

const DOCTOR_TASK: &str = "Analyse the lab report. Include: a summary of key markers and their values, \
the values outside normal reference ranges, general health insights, lifestyle considerations, \
and a reminder to consult a healthcare provider. Avoid speculation.";

const NUTRITIONIST_SYSTEM: &str = "You are a registered dietitian and clinical nutritionist. \
You give evidence-based nutrition guidance from blood markers such as glucose, lipids, vitamins \
and minerals, emphasise whole foods, and stay within scope of practice.";

const NUTRITIONIST_TASK: &str = "Review the nutrition-related markers, identify deficiencies or \
imbalances, and give evidence-based dietary recommendations and foods that may help. \
Do not recommend supplements by brand.";

const EXERCISE_SYSTEM: &str = "You are a certified exercise physiologist. You relate blood markers to \
exercise capacity, cardiovascular health and metabolic function, prioritise safety, and always \
recommend medical clearance before starting a programme.";

const EXERCISE_TASK: &str = "Review the cardiovascular and metabolic markers that relate to exercise \
capacity and give safe, graduated exercise suggestions based on them, noting any marker that calls \
for medical clearance first.";

/// The default four-stage analysis pipeline.
pub fn default_stages(generator: Arc<dyn TextGenerator>) -> Vec<StageDescriptor> {
    let stage = |name: &str, title: &str, system: &'static str, task: &'static str| {
        StageDescriptor::new(
            name,
            title,
            Arc::new(PromptStage::new(system, task, Arc::clone(&generator))),
        )
    };

    vec![
        stage("verification", "DOCUMENT VERIFICATION", VERIFIER_SYSTEM, VERIFIER_TASK),
        stage("clinical_analysis", "MEDICAL ANALYSIS", DOCTOR_SYSTEM, DOCTOR_TASK),
        stage(
            "nutrition_analysis",
            "NUTRITION ANALYSIS & RECOMMENDATIONS",
            NUTRITIONIST_SYSTEM,
            NUTRITIONIST_TASK,
        ),
        stage(
            "exercise_analysis",
            "EXERCISE RECOMMENDATIONS",
            EXERCISE_SYSTEM,
            EXERCISE_TASK,
        ),
    ]
}
