use std::{
    collections::{HashMap, HashSet},
    future::Future,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            knowledge_entity::KnowledgeEntity, knowledge_relationship::KnowledgeRelationship,
            query_history::QueryHistory,
        },
    },
};

const CONFLICT_RETRY_ATTEMPTS: usize = 5;
const CONFLICT_INITIAL_BACKOFF_MS: u64 = 50;
const CONFLICT_MAX_BACKOFF_MS: u64 = 800;

/// Entity carrying an embedding, as considered for seed selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityCandidate {
    pub name: String,
    pub description: String,
    pub embedding: Vec<f32>,
}

/// One undirected edge of a k-hop neighbourhood.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeighborPair {
    pub name: String,
    pub description: String,
    pub neighbor_name: String,
    pub neighbor_description: String,
}

/// Relation rendered for the answering prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTriple {
    pub source: String,
    pub source_desc: String,
    pub relation_type: String,
    pub target: String,
    pub target_desc: String,
}

/// Persistence contract for the knowledge graph. Every write is keyed so
/// re-applying it is a no-op or a last-writer-wins overwrite.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entity(
        &self,
        name: &str,
        graph_scope: &str,
        description: &str,
        entity_type: &str,
        embedding: Vec<f32>,
    ) -> Result<(), AppError>;

    async fn upsert_placeholder_entity(&self, name: &str, graph_scope: &str)
        -> Result<(), AppError>;

    async fn upsert_relation(
        &self,
        source: &str,
        target: &str,
        graph_scope: &str,
        relation_type: &str,
    ) -> Result<(), AppError>;

    /// Entities of the scope that carry an embedding, in store order.
    async fn query_similar_candidates(
        &self,
        graph_scope: &str,
    ) -> Result<Vec<SimilarityCandidate>, AppError>;

    /// Undirected edges of the subgraph induced by everything reachable from
    /// `seeds` within `hops` hops.
    async fn query_khop(
        &self,
        graph_scope: &str,
        seeds: &[String],
        hops: usize,
    ) -> Result<Vec<NeighborPair>, AppError>;

    /// Every relation with at least one endpoint in `names`, deduplicated.
    async fn query_incident(
        &self,
        graph_scope: &str,
        names: &[String],
    ) -> Result<Vec<ContextTriple>, AppError>;

    async fn record_query_history(
        &self,
        graph_scope: &str,
        query: &str,
        answer: &str,
    ) -> Result<(), AppError>;

    async fn entities_in_scope(&self, graph_scope: &str)
        -> Result<Vec<KnowledgeEntity>, AppError>;

    async fn relations_in_scope(
        &self,
        graph_scope: &str,
    ) -> Result<Vec<KnowledgeRelationship>, AppError>;
}

#[async_trait]
impl GraphStore for SurrealDbClient {
    async fn upsert_entity(
        &self,
        name: &str,
        graph_scope: &str,
        description: &str,
        entity_type: &str,
        embedding: Vec<f32>,
    ) -> Result<(), AppError> {
        with_conflict_retry("upsert_entity", || {
            KnowledgeEntity::upsert(
                name,
                graph_scope,
                description,
                entity_type,
                embedding.clone(),
                self,
            )
        })
        .await?;
        Ok(())
    }

    async fn upsert_placeholder_entity(
        &self,
        name: &str,
        graph_scope: &str,
    ) -> Result<(), AppError> {
        with_conflict_retry("upsert_placeholder_entity", || {
            KnowledgeEntity::upsert_placeholder(name, graph_scope, self)
        })
        .await?;
        Ok(())
    }

    async fn upsert_relation(
        &self,
        source: &str,
        target: &str,
        graph_scope: &str,
        relation_type: &str,
    ) -> Result<(), AppError> {
        let relationship = KnowledgeRelationship::new(source, target, graph_scope, relation_type);
        with_conflict_retry("upsert_relation", || relationship.store_relationship(self)).await
    }

    async fn query_similar_candidates(
        &self,
        graph_scope: &str,
    ) -> Result<Vec<SimilarityCandidate>, AppError> {
        let entities = KnowledgeEntity::list_embedded_in_scope(graph_scope, self).await?;

        Ok(entities
            .into_iter()
            .map(|entity| SimilarityCandidate {
                name: entity.name,
                description: entity.description,
                embedding: entity.embedding,
            })
            .collect())
    }

    async fn query_khop(
        &self,
        graph_scope: &str,
        seeds: &[String],
        hops: usize,
    ) -> Result<Vec<NeighborPair>, AppError> {
        let mut visited: HashSet<String> = seeds
            .iter()
            .map(|name| KnowledgeEntity::record_key(graph_scope, name))
            .collect();
        let mut frontier: Vec<String> = visited.iter().cloned().collect();

        // One batched edge query per hop
        for depth in 0..hops {
            if frontier.is_empty() {
                break;
            }

            let edges = KnowledgeRelationship::touching(graph_scope, &frontier, self).await?;
            let mut next = Vec::new();
            for edge in edges {
                for key in [edge.in_, edge.out] {
                    if visited.insert(key.clone()) {
                        next.push(key);
                    }
                }
            }

            debug!(depth, discovered = next.len(), "k-hop expansion");
            frontier = next;
        }

        let mut keys: Vec<String> = visited.into_iter().collect();
        keys.sort();

        let edges = KnowledgeRelationship::induced(graph_scope, &keys, self).await?;
        let entities = entity_lookup(&keys, self).await?;

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for edge in edges {
            let (Some(source), Some(target)) = (entities.get(&edge.in_), entities.get(&edge.out))
            else {
                continue;
            };

            // Undirected: `a-b` and `b-a` collapse to one pair
            let undirected = if source.name <= target.name {
                (source.name.clone(), target.name.clone())
            } else {
                (target.name.clone(), source.name.clone())
            };
            if !seen.insert(undirected) {
                continue;
            }

            pairs.push(NeighborPair {
                name: source.name.clone(),
                description: source.description.clone(),
                neighbor_name: target.name.clone(),
                neighbor_description: target.description.clone(),
            });
        }

        Ok(pairs)
    }

    async fn query_incident(
        &self,
        graph_scope: &str,
        names: &[String],
    ) -> Result<Vec<ContextTriple>, AppError> {
        let keys: Vec<String> = names
            .iter()
            .map(|name| KnowledgeEntity::record_key(graph_scope, name))
            .collect();

        let edges = KnowledgeRelationship::touching(graph_scope, &keys, self).await?;

        let mut endpoint_keys: Vec<String> = edges
            .iter()
            .flat_map(|edge| [edge.in_.clone(), edge.out.clone()])
            .collect();
        endpoint_keys.sort();
        endpoint_keys.dedup();
        let entities = entity_lookup(&endpoint_keys, self).await?;

        // Group by the names' order so the context follows the ranking
        let mut by_key: HashMap<&str, Vec<&KnowledgeRelationship>> = HashMap::new();
        for edge in &edges {
            by_key.entry(edge.in_.as_str()).or_default().push(edge);
            if edge.out != edge.in_ {
                by_key.entry(edge.out.as_str()).or_default().push(edge);
            }
        }

        let mut emitted = HashSet::new();
        let mut triples = Vec::new();
        for key in &keys {
            let Some(incident) = by_key.get(key.as_str()) else {
                continue;
            };
            for edge in incident {
                if !emitted.insert(edge.id.as_str()) {
                    continue;
                }
                let (Some(source), Some(target)) =
                    (entities.get(&edge.in_), entities.get(&edge.out))
                else {
                    continue;
                };
                triples.push(ContextTriple {
                    source: source.name.clone(),
                    source_desc: source.description.clone(),
                    relation_type: edge.metadata.relationship_type.clone(),
                    target: target.name.clone(),
                    target_desc: target.description.clone(),
                });
            }
        }

        Ok(triples)
    }

    async fn record_query_history(
        &self,
        graph_scope: &str,
        query: &str,
        answer: &str,
    ) -> Result<(), AppError> {
        self.store_item(QueryHistory::new(
            graph_scope.to_owned(),
            query.to_owned(),
            answer.to_owned(),
        ))
        .await?;
        Ok(())
    }

    async fn entities_in_scope(
        &self,
        graph_scope: &str,
    ) -> Result<Vec<KnowledgeEntity>, AppError> {
        KnowledgeEntity::list_in_scope(graph_scope, self).await
    }

    async fn relations_in_scope(
        &self,
        graph_scope: &str,
    ) -> Result<Vec<KnowledgeRelationship>, AppError> {
        KnowledgeRelationship::list_in_scope(graph_scope, self).await
    }
}

async fn entity_lookup(
    keys: &[String],
    db: &SurrealDbClient,
) -> Result<HashMap<String, KnowledgeEntity>, AppError> {
    Ok(KnowledgeEntity::get_by_keys(keys, db)
        .await?
        .into_iter()
        .map(|entity| (entity.id.clone(), entity))
        .collect())
}

async fn with_conflict_retry<T, F, Fut>(operation: &str, mut action: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut backoff_ms = CONFLICT_INITIAL_BACKOFF_MS;
    let last_attempt = CONFLICT_RETRY_ATTEMPTS.saturating_sub(1);

    for attempt in 0..CONFLICT_RETRY_ATTEMPTS {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable_conflict(&err) && attempt < last_attempt => {
                warn!(
                    operation,
                    attempt = attempt.saturating_add(1),
                    "Transient SurrealDB conflict while storing graph data; retrying"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2).min(CONFLICT_MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }

    Err(AppError::InternalError(format!(
        "{operation} failed after {CONFLICT_RETRY_ATTEMPTS} attempts"
    )))
}

fn is_retryable_conflict(error: &AppError) -> bool {
    match error {
        AppError::Database(err) => err
            .to_string()
            .contains("Failed to commit transaction due to a read or write conflict"),
        _ => false,
    }
}
