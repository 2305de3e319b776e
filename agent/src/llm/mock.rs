//! Deterministic offline backend
//!
//! Answers with canned business responses picked by keyword so demos and
//! tests run without a model server.

use async_trait::async_trait;

use super::{GenerateOptions, Generation, ModelBackend, ProviderError};
use crate::agent::prompt;

/// Keyword rules, checked in order against the lowercased request
const RESPONSES: &[(&[&str], &str)] = &[
    (
        &["invoice"],
        "Processed invoice successfully. Amount verified, vendor validated, and payment scheduled.",
    ),
    (
        &["complaint"],
        "Analyzed customer complaint. Sentiment: negative. Priority: high. Recommended action: personal follow-up with compensation offer.",
    ),
    (
        &["financial"],
        "Financial analysis complete. Revenue up 15% YoY, expenses controlled, cash flow positive. Recommend continued investment in growth areas.",
    ),
    (
        &["candidate", "resume"],
        "Screened candidates. Top 3 candidates identified based on skills match and experience. Interview schedule proposed for next week.",
    ),
    (
        &["risk"],
        "Risk assessment complete. Identified 3 high-priority risks, 5 medium risks. Mitigation strategies developed for all critical areas.",
    ),
    (
        &["approval", "approve"],
        "Request analyzed. Based on amount and department budget, recommendation: APPROVED with conditions.",
    ),
];

const FILE_RESPONSE: &str =
    "File processed successfully. Content extracted and analyzed. Ready for further processing.";

const DEFAULT_RESPONSE: &str =
    "Task completed successfully. Analysis performed and recommendations provided based on the input data.";

#[derive(Debug, Clone, Default)]
pub struct MockBackend;

impl MockBackend {
    pub fn new() -> Self {
        Self
    }

    fn respond(prompt_text: &str) -> String {
        let speaker = prompt::persona_name(prompt_text).unwrap_or("Agent");
        let request = prompt::request_section(prompt_text);
        let lowered = request.to_lowercase();

        let body = if lowered.contains(prompt::FILE_MARKER_PREFIX.to_lowercase().as_str()) {
            FILE_RESPONSE
        } else {
            RESPONSES
                .iter()
                .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
                .map(|(_, response)| *response)
                .unwrap_or(DEFAULT_RESPONSE)
        };

        format!("[{speaker}] {body}")
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        Ok(Generation {
            text: Self::respond(prompt),
            model: options.model_name.clone(),
            tokens_used: None,
            tokens_per_second: None,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
