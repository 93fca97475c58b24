use common::error::AppError;
use futures::{stream, StreamExt};
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use super::{
    context::{ChunkContribution, PipelineContext},
    extraction::ExtractedEntity,
    state::{Chunked, IngestionMachine, Merged, Ready},
};
use crate::utils::chunking::split;

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, graph_scope = %ctx.graph_scope)
)]
pub async fn split_text(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    text: &str,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let tuning = &ctx.pipeline_config.tuning;
    let chunks = split(text, tuning.chunk_size, tuning.chunk_overlap, ctx.task_id)?;

    tracing::info!(
        task_id = %ctx.task_id,
        graph_scope = %ctx.graph_scope,
        text_chars = text.chars().count(),
        chunk_count = chunks.len(),
        chunk_size = tuning.chunk_size,
        chunk_overlap = tuning.chunk_overlap,
        "ingestion input split into chunks"
    );

    ctx.chunks_total = chunks.len();
    ctx.chunks = chunks;
    ctx.publish(&ctx.running()).await?;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

/// Extracts every chunk and merges the results in chunk order. A failed
/// extraction only skips its chunk; store or embedder errors end the run.
#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, graph_scope = %ctx.graph_scope)
)]
pub async fn extract_and_merge(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Merged>, AppError> {
    let services = ctx.services;
    let language_hint = ctx.language_hint;
    let concurrency = ctx.pipeline_config.tuning.extraction_concurrency.max(1);
    let chunks = std::mem::take(&mut ctx.chunks);

    // Owned chunks keep the run future `Send` for `tokio::spawn`.
    let mut extractions = stream::iter(chunks.into_iter().map(|chunk| async move {
        let extracted = services.extract_knowledge(&chunk.text, language_hint).await;
        (chunk, extracted)
    }))
    .buffered(concurrency);

    while let Some((chunk, extracted)) = extractions.next().await {
        let contribution = match extracted {
            Ok(entities) => {
                let merged = merge_chunk(ctx, &entities).await?;
                Ok(merged)
            }
            Err(err) => {
                warn!(
                    task_id = %ctx.task_id,
                    sequence_index = chunk.sequence_index,
                    error = %err,
                    "chunk extraction failed; skipping chunk"
                );
                Err(err)
            }
        };

        ctx.outcome.record(chunk.sequence_index, contribution);
        ctx.publish(&ctx.running()).await?;
    }

    debug!(
        task_id = %ctx.task_id,
        chunks_done = ctx.outcome.chunks_done,
        failed_chunks = ctx.outcome.failures.len(),
        entities = ctx.outcome.entities_merged,
        relations = ctx.outcome.relations_merged,
        "ingestion merge completed"
    );

    machine
        .merge()
        .map_err(|(_, guard)| map_guard_error("merge", &guard))
}

async fn merge_chunk(
    ctx: &PipelineContext<'_>,
    entities: &[ExtractedEntity],
) -> Result<ChunkContribution, AppError> {
    // Entities first, so relation placeholders never shadow a description
    // from the same chunk.
    for entity in entities {
        let embedding_input = if entity.description.trim().is_empty() {
            entity.name.as_str()
        } else {
            entity.description.as_str()
        };
        let embedding = ctx.services.embed(embedding_input).await?;

        ctx.store
            .upsert_entity(
                &entity.name,
                ctx.graph_scope,
                &entity.description,
                &entity.entity_type,
                embedding,
            )
            .await?;
    }

    let mut relations = 0;
    for entity in entities {
        for relation in &entity.relations {
            ctx.store
                .upsert_placeholder_entity(&entity.name, ctx.graph_scope)
                .await?;
            ctx.store
                .upsert_placeholder_entity(&relation.target, ctx.graph_scope)
                .await?;
            ctx.store
                .upsert_relation(
                    &entity.name,
                    &relation.target,
                    ctx.graph_scope,
                    &relation.relation_type,
                )
                .await?;
            relations += 1;
        }
    }

    Ok(ChunkContribution {
        entities: entities.len(),
        relations,
    })
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
