use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    #[default]
    FastEmbed,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_answer_model")]
    pub answer_model: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackendKind,
    /// Model code for the selected backend; backend default when unset.
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_answer_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_chunk_size() -> usize {
    2_000
}

const fn default_chunk_overlap() -> usize {
    200
}

const fn default_extraction_concurrency() -> usize {
    1
}

const fn default_worker_concurrency() -> usize {
    4
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
