use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        graph_store::{ContextTriple, GraphStore},
        types::{query_history::QueryHistory, task_progress::TaskStatus},
    },
    utils::{
        embedding::EmbeddingProvider,
        progress::{answer_topic, LocalProgressChannel, ProgressChannel},
    },
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RetrievalPipeline, RetrievalRequest, FINAL_LIMIT, SEED_LIMIT};
use crate::answer_retrieval::AnsweringClient;

const DIMENSION: usize = 256;

/// Records every call and replies with a fixed answer or error.
struct MockAnswering {
    reply: Result<&'static str, &'static str>,
    calls: Mutex<Vec<(String, Vec<ContextTriple>, Option<String>)>>,
}

impl MockAnswering {
    fn replying(answer: &'static str) -> Self {
        Self {
            reply: Ok(answer),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &'static str) -> Self {
        Self {
            reply: Err(message),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AnsweringClient for MockAnswering {
    async fn answer(
        &self,
        query: &str,
        triples: &[ContextTriple],
        language_hint: Option<&str>,
    ) -> Result<String, AppError> {
        self.calls.lock().await.push((
            query.to_string(),
            triples.to_vec(),
            language_hint.map(str::to_string),
        ));
        match self.reply {
            Ok(answer) => Ok(answer.to_string()),
            Err(message) => Err(AppError::Processing(message.to_string())),
        }
    }
}

async fn setup_db() -> Arc<SurrealDbClient> {
    let namespace = "retrieval_test";
    let database = Uuid::new_v4().to_string();
    let db = SurrealDbClient::memory(namespace, &database)
        .await
        .expect("Failed to create in-memory SurrealDB");
    db.ensure_initialized()
        .await
        .expect("Failed to initialize schema");
    Arc::new(db)
}

fn embedder() -> Arc<EmbeddingProvider> {
    Arc::new(EmbeddingProvider::new_hashed(DIMENSION))
}

async fn entity(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    scope: &str,
    name: &str,
    desc: &str,
) {
    let embedding = embedder.embed(desc).await.expect("embed description");
    db.upsert_entity(name, scope, desc, "Other", embedding)
        .await
        .expect("upsert entity");
}

async fn relation(db: &SurrealDbClient, scope: &str, source: &str, target: &str, kind: &str) {
    db.upsert_placeholder_entity(source, scope)
        .await
        .expect("source placeholder");
    db.upsert_placeholder_entity(target, scope)
        .await
        .expect("target placeholder");
    db.upsert_relation(source, target, scope, kind)
        .await
        .expect("upsert relation");
}

fn request(query: &str, graph_scope: &str) -> RetrievalRequest {
    RetrievalRequest {
        task_id: Uuid::new_v4().to_string(),
        query: query.to_string(),
        graph_scope: graph_scope.to_string(),
        language_hint: Some("English".into()),
    }
}

fn pipeline(
    db: &Arc<SurrealDbClient>,
    progress: &Arc<LocalProgressChannel>,
    answering: &Arc<MockAnswering>,
) -> RetrievalPipeline {
    RetrievalPipeline::with_answering_client(
        db.clone(),
        progress.clone(),
        embedder(),
        answering.clone(),
    )
}

#[tokio::test]
async fn retrieval_on_empty_scope_answers_with_empty_context() {
    let db = setup_db().await;
    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::replying("The graph holds nothing on this."));
    let pipeline = pipeline(&db, &progress, &answering);

    let request = request("Who collaborates with MIT?", "empty-graph");
    let terminal = pipeline
        .retrieve_and_answer(&request)
        .await
        .expect("empty scope is not a failure");

    assert_eq!(terminal.status, TaskStatus::Success);
    assert_eq!(
        terminal.answer.as_deref(),
        Some("The graph holds nothing on this.")
    );

    let calls = answering.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "Who collaborates with MIT?");
    assert!(calls[0].1.is_empty());
    assert_eq!(calls[0].2.as_deref(), Some("English"));

    let latest = progress
        .get_latest(&answer_topic(&request.task_id))
        .await
        .expect("latest")
        .expect("retained value");
    assert_eq!(latest.status, TaskStatus::Success);
}

#[tokio::test]
async fn retrieval_passes_incident_triples_and_records_history() {
    let db = setup_db().await;
    let embedder = embedder();
    entity(
        &db,
        &embedder,
        "graph-1",
        "Skolkovo Institute",
        "private research university near Moscow",
    )
    .await;
    relation(&db, "graph-1", "Skolkovo Institute", "MIT", "COLLABORATES_WITH").await;
    entity(&db, &embedder, "graph-2", "Other Scope", "research university near Moscow").await;

    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::replying("  Skolkovo works with MIT.\n"));
    let pipeline = pipeline(&db, &progress, &answering);

    let request = request("Which research university is near Moscow?", "graph-1");
    let terminal = pipeline
        .retrieve_and_answer(&request)
        .await
        .expect("retrieval succeeds");

    // Passed through without trimming.
    assert_eq!(terminal.answer.as_deref(), Some("  Skolkovo works with MIT.\n"));

    let calls = answering.calls.lock().await;
    let triples = &calls[0].1;
    assert_eq!(
        triples,
        &vec![ContextTriple {
            source: "Skolkovo Institute".into(),
            source_desc: "private research university near Moscow".into(),
            relation_type: "COLLABORATES_WITH".into(),
            target: "MIT".into(),
            target_desc: String::new(),
        }]
    );

    let history = QueryHistory::list_in_scope("graph-1", &db)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query, "Which research university is near Moscow?");
    assert_eq!(history[0].answer, "  Skolkovo works with MIT.\n");
    assert!(QueryHistory::list_in_scope("graph-2", &db)
        .await
        .expect("history")
        .is_empty());
}

#[tokio::test]
async fn retrieval_ranks_by_similarity_and_skips_placeholders() {
    let db = setup_db().await;
    let embedder = embedder();
    entity(&db, &embedder, "g", "Quantum Lab", "quantum computing laboratory").await;
    entity(&db, &embedder, "g", "Bakery", "bread pastries flour oven").await;
    relation(&db, "g", "Quantum Lab", "Placeholder Partner", "PARTNERS_WITH").await;

    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::replying("ok"));
    let pipeline = pipeline(&db, &progress, &answering);

    let run = pipeline
        .retrieve("quantum computing", "g", None)
        .await
        .expect("retrieval succeeds");

    let ranked: Vec<&str> = run.ranked.iter().map(|c| c.entity_name.as_str()).collect();
    assert_eq!(ranked, vec!["Quantum Lab", "Bakery"]);
    assert!(run.ranked[0].similarity > run.ranked[1].similarity);
    assert!(run.ranked[0].pagerank > 0.0);
    assert!(run.ranked[1].pagerank.abs() < f64::EPSILON);
    assert_eq!(run.seeds, vec!["Quantum Lab", "Bakery"]);
    assert_eq!(run.triples.len(), 1);
    assert_eq!(run.answer, "ok");
}

#[tokio::test]
async fn retrieval_pagerank_breaks_similarity_ties() {
    let db = setup_db().await;
    let embedder = embedder();
    // Identical descriptions, identical similarity; "Alpha" comes first in
    // store order and would win a plain tie.
    entity(&db, &embedder, "g", "Alpha", "robotics research group").await;
    entity(&db, &embedder, "g", "Beta", "robotics research group").await;
    relation(&db, "g", "Beta", "Partner One", "WORKS_WITH").await;
    relation(&db, "g", "Partner Two", "Beta", "FUNDS").await;

    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::replying("ok"));
    let pipeline = pipeline(&db, &progress, &answering);

    let run = pipeline
        .retrieve("robotics research", "g", None)
        .await
        .expect("retrieval succeeds");

    assert_eq!(run.ranked[0].entity_name, "Beta");
    assert_eq!(run.ranked[1].entity_name, "Alpha");
    assert!((run.ranked[0].similarity - run.ranked[1].similarity).abs() < 1e-9);
    assert!(run.ranked[0].fused_score > run.ranked[1].fused_score);
}

#[tokio::test]
async fn retrieval_bounds_seeds_and_final_selection() {
    let db = setup_db().await;
    let embedder = embedder();
    for index in 0..(FINAL_LIMIT + 5) {
        let name = format!("Entity {index:02}");
        entity(&db, &embedder, "big", &name, &format!("topic{index} shared")).await;
    }

    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::replying("ok"));
    let pipeline = pipeline(&db, &progress, &answering);

    let run = pipeline
        .retrieve("shared", "big", None)
        .await
        .expect("retrieval succeeds");

    assert_eq!(run.seeds.len(), SEED_LIMIT);
    assert_eq!(run.ranked.len(), FINAL_LIMIT);
    assert!(run
        .ranked
        .windows(2)
        .all(|pair| pair[0].fused_score >= pair[1].fused_score));
    assert!(run.triples.is_empty());
}

#[tokio::test]
async fn retrieval_failure_publishes_failure_before_returning() {
    let db = setup_db().await;
    let embedder = embedder();
    entity(&db, &embedder, "g", "Alpha", "robotics research group").await;

    let progress = Arc::new(LocalProgressChannel::new());
    let answering = Arc::new(MockAnswering::failing("model unavailable"));
    let pipeline = pipeline(&db, &progress, &answering);

    let request = request("robotics", "g");
    let err = pipeline
        .retrieve_and_answer(&request)
        .await
        .expect_err("answer failure is fatal");
    assert!(err.to_string().contains("model unavailable"));

    let latest = progress
        .get_latest(&answer_topic(&request.task_id))
        .await
        .expect("latest")
        .expect("retained value");
    assert_eq!(latest.status, TaskStatus::Failure);
    assert!(latest
        .error
        .as_deref()
        .is_some_and(|error| error.contains("model unavailable")));
    assert!(latest.answer.is_none());

    assert!(QueryHistory::list_in_scope("g", &db)
        .await
        .expect("history")
        .is_empty());
}
