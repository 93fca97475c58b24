use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        embedding::{generate_embedding_with_provider, EmbeddingProvider},
    },
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use super::extraction::{parse_extraction_response, ExtractedEntity};
use crate::utils::llm_instructions::{extraction_user_message, EXTRACTION_SYSTEM_MESSAGE};

/// External collaborators of an ingestion run.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    /// Turns one chunk into candidate entities. Errors here only cost the chunk.
    async fn extract_knowledge(
        &self,
        chunk_text: &str,
        language_hint: Option<&str>,
    ) -> Result<Vec<ExtractedEntity>, AppError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

pub struct DefaultPipelineServices {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    config: AppConfig,
    embedding_provider: Arc<EmbeddingProvider>,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            openai_client,
            config,
            embedding_provider,
        }
    }

    fn prepare_llm_request(
        &self,
        chunk_text: &str,
        language_hint: Option<&str>,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.extraction_model)
            .temperature(0.0)
            .messages([
                ChatCompletionRequestSystemMessage::from(EXTRACTION_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(extraction_user_message(
                    chunk_text,
                    language_hint,
                ))
                .into(),
            ])
            .build()?;

        Ok(request)
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn extract_knowledge(
        &self,
        chunk_text: &str,
        language_hint: Option<&str>,
    ) -> Result<Vec<ExtractedEntity>, AppError> {
        let request = self.prepare_llm_request(chunk_text, language_hint)?;

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let response = Retry::spawn(retry_strategy, || async {
            self.openai_client.chat().create(request.clone()).await
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        let entities = parse_extraction_response(content)?;
        debug!(entity_count = entities.len(), "extraction response parsed");
        Ok(entities)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        generate_embedding_with_provider(&self.embedding_provider, text).await
    }
}

#[cfg(test)]
mod tests {
    use common::utils::config::EmbeddingBackendKind;

    use super::*;

    fn config(base_url: &str) -> AppConfig {
        AppConfig {
            openai_api_key: "sk-test".into(),
            openai_base_url: base_url.into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            extraction_model: "extraction-model".into(),
            answer_model: "answer-model".into(),
            embedding_backend: EmbeddingBackendKind::Hashed,
            embedding_model: None,
            embedding_dimensions: 16,
            chunk_size: 2_000,
            chunk_overlap: 200,
            extraction_concurrency: 1,
            worker_concurrency: 1,
        }
    }

    fn services(base_url: &str) -> DefaultPipelineServices {
        let config = config(base_url);
        let client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));
        DefaultPipelineServices::new(
            client,
            config,
            Arc::new(EmbeddingProvider::new_hashed(16)),
        )
    }

    #[test]
    fn test_request_uses_extraction_model() {
        let request = services("http://127.0.0.1:9/v1")
            .prepare_llm_request("Skolkovo Institute", Some("Russian"))
            .expect("request should build");

        assert_eq!(request.model, "extraction-model");
        assert_eq!(request.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_the_chunk() {
        let result = services("http://127.0.0.1:9/v1")
            .extract_knowledge("Skolkovo Institute collaborates with MIT", None)
            .await;

        assert!(matches!(result, Err(AppError::OpenAI(_))));
    }
}
