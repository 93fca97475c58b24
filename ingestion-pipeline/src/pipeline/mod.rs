mod config;
mod context;
mod extraction;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use context::{ChunkContribution, ChunkFailure, IngestionOutcome};
pub use extraction::{parse_extraction_response, ExtractedEntity, ExtractedRelation};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{graph_store::GraphStore, types::task_progress::TaskProgress},
    utils::{config::AppConfig, embedding::EmbeddingProvider, progress::ProgressChannel},
};
use tracing::{info, warn};

use self::{
    context::PipelineContext,
    stages::{extract_and_merge, split_text},
    state::ready,
};

/// One ingestion run: free text merged into a graph scope.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub task_id: String,
    pub text: String,
    pub graph_scope: String,
    pub language_hint: Option<String>,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    store: Arc<dyn GraphStore>,
    progress: Arc<dyn ProgressChannel>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        progress: Arc<dyn ProgressChannel>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        let pipeline_config = IngestionConfig::from_config(&config);
        let services = DefaultPipelineServices::new(openai_client, config, embedding_provider);

        Self::with_services(store, progress, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        store: Arc<dyn GraphStore>,
        progress: Arc<dyn ProgressChannel>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            store,
            progress,
            pipeline_config,
            services,
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Runs the request to completion and returns the terminal progress value.
    /// A FAILURE value is published before any error is returned.
    #[tracing::instrument(
        skip_all,
        fields(task_id = %request.task_id, graph_scope = %request.graph_scope)
    )]
    pub async fn ingest(&self, request: &IngestionRequest) -> Result<TaskProgress, AppError> {
        let mut ctx = PipelineContext::new(
            &request.task_id,
            &request.graph_scope,
            request.language_hint.as_deref(),
            self.store.as_ref(),
            self.progress.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        match self.drive_pipeline(&mut ctx, &request.text).await {
            Ok(progress) => Ok(progress),
            Err(err) => {
                let failure = ctx.failed(&err);
                if let Err(publish_err) = ctx.publish(&failure).await {
                    warn!(
                        task_id = %ctx.task_id,
                        error = %publish_err,
                        "failed to publish ingestion failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive_pipeline(
        &self,
        ctx: &mut PipelineContext<'_>,
        text: &str,
    ) -> Result<TaskProgress, AppError> {
        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = split_text(machine, ctx, text)
            .await
            .map_err(|err| ctx.abort(err))?;
        let split_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = extract_and_merge(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let merge_duration = stage_start.elapsed();

        let terminal = ctx.succeeded();
        ctx.publish(&terminal).await.map_err(|err| ctx.abort(err))?;

        for failure in &ctx.outcome.failures {
            warn!(
                task_id = %ctx.task_id,
                sequence_index = failure.sequence_index,
                error = %failure.error,
                "chunk contributed nothing"
            );
        }

        info!(
            task_id = %ctx.task_id,
            graph_scope = %ctx.graph_scope,
            chunks_total = ctx.chunks_total,
            failed_chunks = ctx.outcome.failures.len(),
            entities = ctx.outcome.entities_merged,
            relations = ctx.outcome.relations_merged,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            split_ms = Self::duration_millis(split_duration),
            merge_ms = Self::duration_millis(merge_duration),
            "ingestion pipeline finished"
        );

        Ok(terminal)
    }
}
