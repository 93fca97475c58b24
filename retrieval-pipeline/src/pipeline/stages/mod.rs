use async_trait::async_trait;
use common::{
    error::AppError,
    storage::graph_store::{ContextTriple, GraphStore, NeighborPair},
    utils::embedding::{generate_embedding_with_provider, EmbeddingProvider},
};
use tracing::{debug, instrument};

use crate::{
    answer_retrieval::AnsweringClient,
    graph::LocalGraph,
    scoring::{cosine_similarity, sort_by_fused_desc, sort_by_similarity_desc, RetrievalCandidate},
};

use super::{config::RetrievalTuning, PipelineStage, PipelineStageTimings, StageKind};

pub struct PipelineContext<'a> {
    pub store: &'a dyn GraphStore,
    pub embedding_provider: &'a EmbeddingProvider,
    pub answering: &'a dyn AnsweringClient,
    pub query: &'a str,
    pub graph_scope: &'a str,
    pub language_hint: Option<&'a str>,
    pub tuning: RetrievalTuning,
    pub query_embedding: Option<Vec<f32>>,
    /// Every embedded entity of the scope, in store order.
    pub candidates: Vec<RetrievalCandidate>,
    pub seeds: Vec<String>,
    pub neighborhood: Vec<NeighborPair>,
    pub ranked: Vec<RetrievalCandidate>,
    pub triples: Vec<ContextTriple>,
    pub answer: Option<String>,
    stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        embedding_provider: &'a EmbeddingProvider,
        answering: &'a dyn AnsweringClient,
        query: &'a str,
        graph_scope: &'a str,
        language_hint: Option<&'a str>,
    ) -> Self {
        Self {
            store,
            embedding_provider,
            answering,
            query,
            graph_scope,
            language_hint,
            tuning: RetrievalTuning::default(),
            query_embedding: None,
            candidates: Vec::new(),
            seeds: Vec::new(),
            neighborhood: Vec::new(),
            ranked: Vec::new(),
            triples: Vec::new(),
            answer: None,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    fn ensure_embedding(&self) -> Result<&[f32], AppError> {
        self.query_embedding.as_deref().ok_or_else(|| {
            AppError::InternalError(
                "query embedding missing before candidate collection".to_string(),
            )
        })
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.stage_timings.record(kind, duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        embed(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectCandidatesStage;

#[async_trait]
impl PipelineStage for CollectCandidatesStage {
    fn kind(&self) -> StageKind {
        StageKind::CollectCandidates
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        collect_candidates(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GraphExpansionStage;

#[async_trait]
impl PipelineStage for GraphExpansionStage {
    fn kind(&self) -> StageKind {
        StageKind::GraphExpansion
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        expand_graph(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankStage;

#[async_trait]
impl PipelineStage for RankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        rank(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleContextStage;

#[async_trait]
impl PipelineStage for AssembleContextStage {
    fn kind(&self) -> StageKind {
        StageKind::AssembleContext
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        assemble_context(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnswerStage;

#[async_trait]
impl PipelineStage for AnswerStage {
    fn kind(&self) -> StageKind {
        StageKind::Answer
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        answer(ctx).await
    }
}

#[instrument(level = "trace", skip_all)]
pub async fn embed(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    debug!("Generating query embedding");
    let embedding = generate_embedding_with_provider(ctx.embedding_provider, ctx.query).await?;
    ctx.query_embedding = Some(embedding);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn collect_candidates(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let stored = ctx.store.query_similar_candidates(ctx.graph_scope).await?;
    let embedding = ctx.ensure_embedding()?;

    let candidates: Vec<RetrievalCandidate> = stored
        .into_iter()
        .map(|candidate| {
            let similarity = cosine_similarity(embedding, &candidate.embedding);
            RetrievalCandidate::new(candidate.name, candidate.description, similarity)
        })
        .collect();

    let mut by_similarity = candidates.clone();
    sort_by_similarity_desc(&mut by_similarity);
    ctx.seeds = by_similarity
        .into_iter()
        .take(ctx.tuning.seed_limit)
        .map(|candidate| candidate.entity_name)
        .collect();
    ctx.candidates = candidates;

    debug!(
        candidates = ctx.candidates.len(),
        seeds = ctx.seeds.len(),
        "Collected similarity candidates"
    );
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn expand_graph(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if ctx.seeds.is_empty() {
        debug!("No seeds, skipping graph expansion");
        return Ok(());
    }

    ctx.neighborhood = ctx
        .store
        .query_khop(ctx.graph_scope, &ctx.seeds, ctx.tuning.max_hops)
        .await?;

    debug!(
        seeds = ctx.seeds.len(),
        edges = ctx.neighborhood.len(),
        "Expanded seed neighbourhood"
    );
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn rank(ctx: &mut PipelineContext<'_>) {
    let local = LocalGraph::from_pairs(&ctx.neighborhood);
    let pagerank = local.pagerank(
        ctx.tuning.pagerank_damping,
        ctx.tuning.pagerank_tolerance,
        ctx.tuning.pagerank_max_iter,
    );

    let mut ranked = ctx.candidates.clone();
    for candidate in &mut ranked {
        let score = pagerank
            .get(&candidate.entity_name)
            .copied()
            .unwrap_or(0.0);
        candidate.update_fused(score, ctx.tuning.fusion);
    }
    sort_by_fused_desc(&mut ranked);
    ranked.truncate(ctx.tuning.final_limit);

    debug!(
        local_nodes = local.node_count(),
        local_edges = local.edge_count(),
        ranked = ranked.len(),
        "Ranked candidates"
    );
    ctx.ranked = ranked;
}

#[instrument(level = "trace", skip_all)]
pub async fn assemble_context(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if ctx.ranked.is_empty() {
        return Ok(());
    }

    let names: Vec<String> = ctx
        .ranked
        .iter()
        .map(|candidate| candidate.entity_name.clone())
        .collect();
    ctx.triples = ctx.store.query_incident(ctx.graph_scope, &names).await?;

    debug!(triples = ctx.triples.len(), "Assembled graph context");
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn answer(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let answer = ctx
        .answering
        .answer(ctx.query, &ctx.triples, ctx.language_hint)
        .await?;
    ctx.answer = Some(answer);
    Ok(())
}
