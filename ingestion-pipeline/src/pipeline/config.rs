use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Window length in chars.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Extraction calls allowed in flight at once; results are still merged in
    /// chunk order.
    pub extraction_concurrency: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_size: 2_000,
            chunk_overlap: 200,
            extraction_concurrency: 1,
        }
    }
}

impl IngestionTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            extraction_concurrency: config.extraction_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning::from_config(config),
        }
    }
}
