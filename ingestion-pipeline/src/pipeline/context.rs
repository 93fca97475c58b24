use common::{
    error::AppError,
    storage::{graph_store::GraphStore, types::task_progress::TaskProgress},
    utils::progress::{graph_topic, publish_status, ProgressChannel},
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};
use crate::utils::chunking::Chunk;

/// What one chunk added to the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkContribution {
    pub entities: usize,
    pub relations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub sequence_index: usize,
    pub error: String,
}

/// Running totals of an ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestionOutcome {
    pub chunks_done: usize,
    pub entities_merged: usize,
    pub relations_merged: usize,
    pub failures: Vec<ChunkFailure>,
}

impl IngestionOutcome {
    pub fn record(&mut self, sequence_index: usize, result: Result<ChunkContribution, AppError>) {
        self.chunks_done += 1;
        match result {
            Ok(contribution) => {
                self.entities_merged += contribution.entities;
                self.relations_merged += contribution.relations;
            }
            Err(err) => self.failures.push(ChunkFailure {
                sequence_index,
                error: err.to_string(),
            }),
        }
    }
}

pub struct PipelineContext<'a> {
    pub task_id: &'a str,
    pub graph_scope: &'a str,
    pub language_hint: Option<&'a str>,
    pub topic: String,
    pub store: &'a dyn GraphStore,
    pub progress: &'a dyn ProgressChannel,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub chunks: Vec<Chunk>,
    pub chunks_total: usize,
    pub outcome: IngestionOutcome,
}

impl<'a> PipelineContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: &'a str,
        graph_scope: &'a str,
        language_hint: Option<&'a str>,
        store: &'a dyn GraphStore,
        progress: &'a dyn ProgressChannel,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            task_id,
            graph_scope,
            language_hint,
            topic: graph_topic(task_id),
            store,
            progress,
            pipeline_config,
            services,
            chunks: Vec::new(),
            chunks_total: 0,
            outcome: IngestionOutcome::default(),
        }
    }

    pub fn running(&self) -> TaskProgress {
        TaskProgress::running(&self.topic, self.task_id, self.graph_scope)
            .with_chunks(self.outcome.chunks_done, self.chunks_total)
    }

    pub fn succeeded(&self) -> TaskProgress {
        TaskProgress::success(&self.topic, self.task_id, self.graph_scope)
            .with_chunks(self.outcome.chunks_done, self.chunks_total)
    }

    pub fn failed(&self, err: &AppError) -> TaskProgress {
        TaskProgress::failure(&self.topic, self.task_id, self.graph_scope, err.to_string())
            .with_chunks(self.outcome.chunks_done, self.chunks_total)
    }

    pub async fn publish(&self, progress: &TaskProgress) -> Result<(), AppError> {
        publish_status(self.progress, progress).await
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            task_id = %self.task_id,
            graph_scope = %self.graph_scope,
            chunks_done = self.outcome.chunks_done,
            chunks_total = self.chunks_total,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
