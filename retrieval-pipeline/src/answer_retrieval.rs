use std::sync::Arc;

use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use common::{error::AppError, storage::graph_store::ContextTriple};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

pub static ANSWER_SYSTEM_MESSAGE: &str = r#"You answer questions about a knowledge graph.
The context is a JSON array of relations, each with "source", "source_desc", "relation_type", "target" and "target_desc".
Answer only from that context. If the context holds nothing relevant to the question, say so plainly instead of guessing.
Reply with the answer text only."#;

/// Produces the final answer from the assembled graph context.
#[async_trait]
pub trait AnsweringClient: Send + Sync {
    async fn answer(
        &self,
        query: &str,
        triples: &[ContextTriple],
        language_hint: Option<&str>,
    ) -> Result<String, AppError>;
}

pub fn create_user_message(
    triples_json: &str,
    query: &str,
    language_hint: Option<&str>,
) -> String {
    let language = language_hint
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .map(|hint| format!("\n        Answer in this language: {hint}\n"))
        .unwrap_or_default();

    format!(
        r"
        Context Information:
        ==================
        {triples_json}

        User Question:
        ==================
        {query}
        {language}"
    )
}

pub fn create_chat_request(
    model: &str,
    user_message: String,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(ANSWER_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

/// Returns the first choice verbatim.
pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
}

pub struct OpenAiAnsweringClient {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl OpenAiAnsweringClient {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            openai_client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl AnsweringClient for OpenAiAnsweringClient {
    async fn answer(
        &self,
        query: &str,
        triples: &[ContextTriple],
        language_hint: Option<&str>,
    ) -> Result<String, AppError> {
        let triples_json = serde_json::to_string(triples)?;
        let request = create_chat_request(
            &self.model,
            create_user_message(&triples_json, query, language_hint),
        )?;

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let response = Retry::spawn(retry_strategy, || async {
            self.openai_client.chat().create(request.clone()).await
        })
        .await?;

        let answer = process_llm_response(response)?;
        debug!(
            triple_count = triples.len(),
            answer_chars = answer.chars().count(),
            "answer received"
        );
        Ok(answer)
    }
}
