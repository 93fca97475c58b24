use std::sync::Arc;

use common::utils::progress::ProgressChannel;
use ingestion_pipeline::{IngestionPipeline, IngestionRequest};
use retrieval_pipeline::{RetrievalPipeline, RetrievalRequest};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{error, info};
use uuid::Uuid;

/// Fire-and-forget entry points. Every task runs on its own tokio task and
/// waits for one of `worker_concurrency` permits before starting.
pub struct TaskDispatcher {
    ingestion: Arc<IngestionPipeline>,
    retrieval: Arc<RetrievalPipeline>,
    progress: Arc<dyn ProgressChannel>,
    permits: Arc<Semaphore>,
}

impl TaskDispatcher {
    pub fn new(
        ingestion: Arc<IngestionPipeline>,
        retrieval: Arc<RetrievalPipeline>,
        progress: Arc<dyn ProgressChannel>,
        worker_concurrency: usize,
    ) -> Self {
        Self {
            ingestion,
            retrieval,
            progress,
            permits: Arc::new(Semaphore::new(worker_concurrency.max(1))),
        }
    }

    pub fn progress(&self) -> Arc<dyn ProgressChannel> {
        Arc::clone(&self.progress)
    }

    /// Queues an ingestion run. Progress appears under `graph:{task_id}`.
    pub fn ingest(
        &self,
        text: String,
        graph_scope: String,
        language_hint: Option<String>,
    ) -> String {
        self.spawn_ingest(text, graph_scope, language_hint).0
    }

    /// Queues a query. Progress and the answer appear under `answer:{task_id}`.
    pub fn retrieve(
        &self,
        query: String,
        graph_scope: String,
        language_hint: Option<String>,
    ) -> String {
        self.spawn_retrieve(query, graph_scope, language_hint).0
    }

    fn spawn_ingest(
        &self,
        text: String,
        graph_scope: String,
        language_hint: Option<String>,
    ) -> (String, JoinHandle<()>) {
        let request = IngestionRequest {
            task_id: Uuid::new_v4().to_string(),
            text,
            graph_scope,
            language_hint,
        };
        let task_id = request.task_id.clone();
        let pipeline = Arc::clone(&self.ingestion);
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(task_id = %request.task_id, "worker pool closed before ingestion started");
                return;
            };
            info!(
                task_id = %request.task_id,
                graph_scope = %request.graph_scope,
                "starting ingestion task"
            );
            if let Err(err) = pipeline.ingest(&request).await {
                error!(task_id = %request.task_id, error = %err, "ingestion task failed");
            }
        });

        (task_id, handle)
    }

    fn spawn_retrieve(
        &self,
        query: String,
        graph_scope: String,
        language_hint: Option<String>,
    ) -> (String, JoinHandle<()>) {
        let request = RetrievalRequest {
            task_id: Uuid::new_v4().to_string(),
            query,
            graph_scope,
            language_hint,
        };
        let task_id = request.task_id.clone();
        let pipeline = Arc::clone(&self.retrieval);
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(task_id = %request.task_id, "worker pool closed before retrieval started");
                return;
            };
            info!(
                task_id = %request.task_id,
                graph_scope = %request.graph_scope,
                "starting retrieval task"
            );
            if let Err(err) = pipeline.retrieve_and_answer(&request).await {
                error!(task_id = %request.task_id, error = %err, "retrieval task failed");
            }
        });

        (task_id, handle)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use common::{
        error::AppError,
        storage::{
            db::SurrealDbClient,
            graph_store::{ContextTriple, GraphStore},
            types::task_progress::{TaskProgress, TaskStatus},
        },
        utils::{
            embedding::EmbeddingProvider,
            progress::{answer_topic, graph_topic, subscribe, LocalProgressChannel},
        },
    };
    use futures::{pin_mut, StreamExt};
    use ingestion_pipeline::{
        pipeline::{parse_extraction_response, ExtractedEntity, PipelineServices},
        IngestionConfig,
    };
    use retrieval_pipeline::AnsweringClient;

    use super::*;

    /// Extracts one entity named after the chunk and tracks how many
    /// extractions overlap.
    #[derive(Default)]
    struct CountingServices {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PipelineServices for CountingServices {
        async fn extract_knowledge(
            &self,
            chunk_text: &str,
            _language_hint: Option<&str>,
        ) -> Result<Vec<ExtractedEntity>, AppError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            parse_extraction_response(&format!(
                r#"[{{"name": "{chunk_text}", "desc": "mentioned in a dispatcher test"}}]"#
            ))
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
            EmbeddingProvider::new_hashed(16)
                .embed(text)
                .await
                .map_err(|err| AppError::Embedding(err.to_string()))
        }
    }

    struct EchoAnswering;

    #[async_trait]
    impl AnsweringClient for EchoAnswering {
        async fn answer(
            &self,
            query: &str,
            triples: &[ContextTriple],
            _language_hint: Option<&str>,
        ) -> Result<String, AppError> {
            Ok(format!("{query}: {} relations", triples.len()))
        }
    }

    async fn dispatcher(
        worker_concurrency: usize,
    ) -> (TaskDispatcher, Arc<SurrealDbClient>, Arc<CountingServices>) {
        let db = Arc::new(
            SurrealDbClient::memory("dispatcher_test", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("indexes");
        let progress: Arc<dyn ProgressChannel> = Arc::new(LocalProgressChannel::new());
        let services = Arc::new(CountingServices::default());

        let ingestion = Arc::new(IngestionPipeline::with_services(
            db.clone(),
            progress.clone(),
            IngestionConfig::default(),
            services.clone(),
        ));
        let retrieval = Arc::new(RetrievalPipeline::with_answering_client(
            db.clone(),
            progress.clone(),
            Arc::new(EmbeddingProvider::new_hashed(16)),
            Arc::new(EchoAnswering),
        ));

        (
            TaskDispatcher::new(ingestion, retrieval, progress, worker_concurrency),
            db,
            services,
        )
    }

    async fn wait_terminal(progress: Arc<dyn ProgressChannel>, topic: String) -> TaskProgress {
        let updates = subscribe(progress, topic);
        pin_mut!(updates);
        let mut last = None;
        while let Some(update) = updates.next().await {
            last = Some(update.expect("progress update"));
        }
        last.expect("terminal update")
    }

    #[tokio::test]
    async fn dispatch_ingest_then_retrieve() {
        let (dispatcher, db, _) = dispatcher(2).await;

        let ingest_id = dispatcher.ingest("Skolkovo".into(), "scope-a".into(), None);
        let done = wait_terminal(dispatcher.progress(), graph_topic(&ingest_id)).await;
        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.graph_scope, "scope-a");
        assert_eq!(db.entities_in_scope("scope-a").await.expect("entities").len(), 1);

        let answer_id = dispatcher.retrieve("Skolkovo?".into(), "scope-a".into(), None);
        let answered = wait_terminal(dispatcher.progress(), answer_topic(&answer_id)).await;
        assert_eq!(answered.status, TaskStatus::Success);
        assert_eq!(answered.answer.as_deref(), Some("Skolkovo?: 0 relations"));
    }

    #[tokio::test]
    async fn dispatch_respects_worker_concurrency() {
        let (dispatcher, _db, services) = dispatcher(1).await;

        let handles: Vec<JoinHandle<()>> = ["one", "two", "three"]
            .into_iter()
            .map(|text| dispatcher.spawn_ingest(text.into(), "scope-b".into(), None).1)
            .collect();
        for handle in handles {
            handle.await.expect("task joins");
        }

        assert_eq!(services.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_returns_distinct_task_ids() {
        let (dispatcher, _db, _) = dispatcher(4).await;
        let first = dispatcher.retrieve("q".into(), "empty".into(), None);
        let second = dispatcher.retrieve("q".into(), "empty".into(), None);
        assert_ne!(first, second);

        let answered = wait_terminal(dispatcher.progress(), answer_topic(&second)).await;
        assert_eq!(answered.status, TaskStatus::Success);
    }
}
