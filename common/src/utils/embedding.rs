use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackendKind},
};

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } | EmbeddingInner::FastEmbed { dimension, .. } => {
                *dimension
            }
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    /// Embeds `text` into a unit-length vector. Every backend goes through the
    /// same normalisation so dot products between stored and query vectors are
    /// cosine similarities.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let raw = match &self.inner {
            EmbeddingInner::Hashed { dimension } => hashed_embedding(text, *dimension),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                let embeddings = guard
                    .embed(vec![text.to_owned()], None)
                    .context("generating fastembed vector")?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("fastembed returned no embedding for input"))?
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                response
                    .data
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("No embedding data received from OpenAI API"))?
                    .embedding
            }
        };

        Ok(normalize(raw))
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?
        } else {
            EmbeddingModel::default()
        };

        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();
        let options = TextInitOptions::new(model_name).with_show_download_progress(true);

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self> {
        let provider = match config.embedding_backend {
            EmbeddingBackendKind::OpenAI => {
                let client = openai_client
                    .ok_or_else(|| anyhow!("OpenAI embedding backend requires an OpenAI client"))?;
                let model = config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".to_string());
                Self::new_openai(client, model, config.embedding_dimensions)
            }
            EmbeddingBackendKind::FastEmbed => {
                Self::new_fastembed(config.embedding_model.clone()).await?
            }
            EmbeddingBackendKind::Hashed => {
                Self::new_hashed(config.embedding_dimensions as usize)
            }
        };

        debug!(
            backend = provider.backend_label(),
            dimension = provider.dimension(),
            "embedding provider ready"
        );

        Ok(provider)
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    for token in tokens(text) {
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

pub async fn generate_embedding_with_provider(
    provider: &EmbeddingProvider,
    input: &str,
) -> Result<Vec<f32>, AppError> {
    provider
        .embed(input)
        .await
        .map_err(|err| AppError::Embedding(format!("{err:#}")))
}
