use crate::llm::{extract_code, Completion, LlmError};
use crate::prompts::generation_prompt;
use async_trait::async_trait;
use repair_loop::{CollaboratorError, GenerationRequest, Generator};
use tracing::{debug, info};

const COLLABORATOR: &str = "generator";

/// Generator backed by a chat completion model.
pub struct LlmGenerator<C> {
    client: C,
}

impl<C: Completion> LlmGenerator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Completion> Generator for LlmGenerator<C> {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, CollaboratorError> {
        let prompt = generation_prompt(request);
        debug!(attempt = request.attempt, prompt_chars = prompt.len(), "Built generation prompt");

        let response = self.client.complete(&prompt).await.map_err(|e| match e {
            LlmError::Empty => CollaboratorError::protocol(COLLABORATOR, e.to_string()),
            other => CollaboratorError::unavailable(COLLABORATOR, other.to_string()),
        })?;

        let code = extract_code(&response);
        if code.trim().is_empty() {
            return Err(CollaboratorError::protocol(
                COLLABORATOR,
                "response contained no code",
            ));
        }

        info!(
            attempt = request.attempt,
            lines = code.lines().count(),
            "Generated candidate parser"
        );
        Ok(code)
    }
}
