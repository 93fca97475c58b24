mod config;
mod stages;

pub use config::{RetrievalTuning, FINAL_LIMIT, MAX_HOPS, SEED_LIMIT};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        graph_store::{ContextTriple, GraphStore},
        types::task_progress::TaskProgress,
    },
    utils::{
        config::AppConfig,
        embedding::EmbeddingProvider,
        progress::{answer_topic, publish_status, ProgressChannel},
    },
};
use tracing::{error, info, warn};

use crate::{
    answer_retrieval::{AnsweringClient, OpenAiAnsweringClient},
    scoring::RetrievalCandidate,
};
use stages::{
    AnswerStage, AssembleContextStage, CollectCandidatesStage, EmbedStage, GraphExpansionStage,
    PipelineContext, RankStage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Embed,
    CollectCandidates,
    GraphExpansion,
    Rank,
    AssembleContext,
    Answer,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

fn default_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(EmbedStage),
        Box::new(CollectCandidatesStage),
        Box::new(GraphExpansionStage),
        Box::new(RankStage),
        Box::new(AssembleContextStage),
        Box::new(AnswerStage),
    ]
}

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, d)| d.as_millis())
    }

    pub fn total_ms(&self) -> u128 {
        self.timings.iter().map(|(_, d)| d.as_millis()).sum()
    }
}

/// One query against a graph scope.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub task_id: String,
    pub query: String,
    pub graph_scope: String,
    pub language_hint: Option<String>,
}

/// Everything a finished run produced, before it is published.
#[derive(Debug, Clone)]
pub struct RetrievalRun {
    pub seeds: Vec<String>,
    pub ranked: Vec<RetrievalCandidate>,
    pub triples: Vec<ContextTriple>,
    pub answer: String,
    pub stage_timings: PipelineStageTimings,
}

pub struct RetrievalPipeline {
    store: Arc<dyn GraphStore>,
    progress: Arc<dyn ProgressChannel>,
    embedding_provider: Arc<EmbeddingProvider>,
    answering: Arc<dyn AnsweringClient>,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        progress: Arc<dyn ProgressChannel>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: &AppConfig,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        let answering = OpenAiAnsweringClient::new(openai_client, config.answer_model.clone());
        Self::with_answering_client(store, progress, embedding_provider, Arc::new(answering))
    }

    pub fn with_answering_client(
        store: Arc<dyn GraphStore>,
        progress: Arc<dyn ProgressChannel>,
        embedding_provider: Arc<EmbeddingProvider>,
        answering: Arc<dyn AnsweringClient>,
    ) -> Self {
        Self {
            store,
            progress,
            embedding_provider,
            answering,
        }
    }

    /// Runs every stage and returns the ranked context with its answer.
    /// Nothing is published or persisted.
    pub async fn retrieve(
        &self,
        query: &str,
        graph_scope: &str,
        language_hint: Option<&str>,
    ) -> Result<RetrievalRun, AppError> {
        let mut ctx = PipelineContext::new(
            self.store.as_ref(),
            self.embedding_provider.as_ref(),
            self.answering.as_ref(),
            query,
            graph_scope,
            language_hint,
        );

        for stage in default_stages() {
            let start = Instant::now();
            stage.execute(&mut ctx).await?;
            ctx.record_stage_duration(stage.kind(), start.elapsed());
        }

        let stage_timings = ctx.take_stage_timings();
        let answer = ctx.answer.take().ok_or_else(|| {
            AppError::InternalError("retrieval finished without an answer".to_string())
        })?;

        Ok(RetrievalRun {
            seeds: ctx.seeds,
            ranked: ctx.ranked,
            triples: ctx.triples,
            answer,
            stage_timings,
        })
    }

    /// Answers the request, records it in the query history and publishes
    /// the outcome under `answer:{task_id}`. A FAILURE value is published
    /// before any error is returned.
    #[tracing::instrument(
        skip_all,
        fields(task_id = %request.task_id, graph_scope = %request.graph_scope)
    )]
    pub async fn retrieve_and_answer(
        &self,
        request: &RetrievalRequest,
    ) -> Result<TaskProgress, AppError> {
        let topic = answer_topic(&request.task_id);

        match self.drive_pipeline(&topic, request).await {
            Ok(progress) => Ok(progress),
            Err(err) => {
                error!(
                    task_id = %request.task_id,
                    graph_scope = %request.graph_scope,
                    error = %err,
                    "retrieval pipeline aborted"
                );
                let failure = TaskProgress::failure(
                    &topic,
                    &request.task_id,
                    &request.graph_scope,
                    err.to_string(),
                );
                if let Err(publish_err) = publish_status(self.progress.as_ref(), &failure).await {
                    warn!(
                        task_id = %request.task_id,
                        error = %publish_err,
                        "failed to publish retrieval failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive_pipeline(
        &self,
        topic: &str,
        request: &RetrievalRequest,
    ) -> Result<TaskProgress, AppError> {
        let running = TaskProgress::running(topic, &request.task_id, &request.graph_scope);
        publish_status(self.progress.as_ref(), &running).await?;

        let input_chars = request.query.chars().count();
        let preview: String = request
            .query
            .chars()
            .take(120)
            .collect::<String>()
            .replace('\n', " ");
        info!(
            task_id = %request.task_id,
            input_chars,
            preview = %preview,
            "Starting retrieval pipeline"
        );

        let run = self
            .retrieve(
                &request.query,
                &request.graph_scope,
                request.language_hint.as_deref(),
            )
            .await?;

        self.store
            .record_query_history(&request.graph_scope, &request.query, &run.answer)
            .await?;

        let terminal = TaskProgress::success(topic, &request.task_id, &request.graph_scope)
            .with_answer(run.answer.clone());
        publish_status(self.progress.as_ref(), &terminal).await?;

        let timings = &run.stage_timings;
        info!(
            task_id = %request.task_id,
            seeds = run.seeds.len(),
            ranked = run.ranked.len(),
            triples = run.triples.len(),
            total_ms = timings.total_ms(),
            embed_ms = timings.get_stage_ms(StageKind::Embed),
            collect_candidates_ms = timings.get_stage_ms(StageKind::CollectCandidates),
            graph_expansion_ms = timings.get_stage_ms(StageKind::GraphExpansion),
            rank_ms = timings.get_stage_ms(StageKind::Rank),
            assemble_ms = timings.get_stage_ms(StageKind::AssembleContext),
            answer_ms = timings.get_stage_ms(StageKind::Answer),
            "retrieval pipeline finished"
        );

        Ok(terminal)
    }
}

#[cfg(test)]
mod tests;
