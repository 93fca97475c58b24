use std::{collections::HashMap, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{task_progress::TaskProgress, StoredObject},
    },
};

const LIVE_CAPACITY: usize = 256;

/// Namespace of ingestion progress topics.
pub const GRAPH_NAMESPACE: &str = "graph";
/// Namespace of retrieval progress topics.
pub const ANSWER_NAMESPACE: &str = "answer";

pub fn graph_topic(task_id: &str) -> String {
    format!("{GRAPH_NAMESPACE}:{task_id}")
}

pub fn answer_topic(task_id: &str) -> String {
    format!("{ANSWER_NAMESPACE}:{task_id}")
}

/// Retained-value plus live-broadcast status surface keyed by topic.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    /// Stores `progress` as the value late subscribers will read first.
    async fn set_latest(&self, topic: &str, progress: &TaskProgress) -> Result<(), AppError>;

    /// Delivers `progress` to current live subscribers of `topic`.
    async fn publish(&self, topic: &str, progress: &TaskProgress) -> Result<(), AppError>;

    async fn get_latest(&self, topic: &str) -> Result<Option<TaskProgress>, AppError>;

    /// Live updates for every topic; callers filter by topic.
    fn live_updates(&self) -> broadcast::Receiver<TaskProgress>;
}

/// Retains then broadcasts, in that order, under the progress' own topic.
/// The broadcast is attempted even when retaining fails; the first error wins.
pub async fn publish_status(
    channel: &dyn ProgressChannel,
    progress: &TaskProgress,
) -> Result<(), AppError> {
    let topic = progress.topic();
    let retained = channel.set_latest(topic, progress).await;
    if let Err(err) = &retained {
        warn!(topic, error = %err, "retaining progress failed; broadcasting anyway");
    }
    let published = channel.publish(topic, progress).await;
    retained?;
    published?;
    debug!(
        topic,
        status = %progress.status,
        chunks_done = progress.chunks_done,
        chunks_total = progress.chunks_total,
        "progress published"
    );
    Ok(())
}

/// Replays the retained value for `topic`, then follows live updates until a
/// terminal status. An update may be observed twice.
pub fn subscribe(
    channel: Arc<dyn ProgressChannel>,
    topic: String,
) -> impl Stream<Item = Result<TaskProgress, AppError>> {
    // Subscribe before reading the retained value so nothing falls between
    let mut live = channel.live_updates();

    try_stream! {
        let mut finished = false;

        if let Some(latest) = channel.get_latest(&topic).await? {
            finished = latest.is_terminal();
            yield latest;
        }

        while !finished {
            match live.recv().await {
                Ok(progress) if progress.topic() == topic => {
                    finished = progress.is_terminal();
                    yield progress;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "progress subscriber lagged; re-reading retained value");
                    if let Some(latest) = channel.get_latest(&topic).await? {
                        finished = latest.is_terminal();
                        yield latest;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    Err::<(), _>(AppError::InternalError(format!(
                        "progress channel closed before {topic} finished"
                    )))?;
                }
            }
        }
    }
}

/// In-process channel. Retained values live in memory.
pub struct LocalProgressChannel {
    latest: RwLock<HashMap<String, TaskProgress>>,
    live: broadcast::Sender<TaskProgress>,
}

impl LocalProgressChannel {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            latest: RwLock::new(HashMap::new()),
            live,
        }
    }
}

impl Default for LocalProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressChannel for LocalProgressChannel {
    async fn set_latest(&self, topic: &str, progress: &TaskProgress) -> Result<(), AppError> {
        self.latest
            .write()
            .await
            .insert(topic.to_owned(), progress.clone());
        Ok(())
    }

    async fn publish(&self, _topic: &str, progress: &TaskProgress) -> Result<(), AppError> {
        // No receivers is not an error
        let _ = self.live.send(progress.clone());
        Ok(())
    }

    async fn get_latest(&self, topic: &str) -> Result<Option<TaskProgress>, AppError> {
        Ok(self.latest.read().await.get(topic).cloned())
    }

    fn live_updates(&self) -> broadcast::Receiver<TaskProgress> {
        self.live.subscribe()
    }
}

/// Retains the latest value per topic in the `task_progress` table so other
/// processes can read it; live delivery stays in-process.
pub struct SurrealProgressChannel {
    db: Arc<SurrealDbClient>,
    live: broadcast::Sender<TaskProgress>,
}

impl SurrealProgressChannel {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self { db, live }
    }
}

#[async_trait]
impl ProgressChannel for SurrealProgressChannel {
    async fn set_latest(&self, topic: &str, progress: &TaskProgress) -> Result<(), AppError> {
        let mut retained = progress.clone();
        topic.clone_into(&mut retained.id);
        self.db.upsert_item(retained).await?;
        Ok(())
    }

    async fn publish(&self, _topic: &str, progress: &TaskProgress) -> Result<(), AppError> {
        let _ = self.live.send(progress.clone());
        Ok(())
    }

    async fn get_latest(&self, topic: &str) -> Result<Option<TaskProgress>, AppError> {
        Ok(self.db.get_item::<TaskProgress>(topic).await?)
    }

    fn live_updates(&self) -> broadcast::Receiver<TaskProgress> {
        self.live.subscribe()
    }
}

impl std::fmt::Debug for SurrealProgressChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealProgressChannel")
            .field("table", &TaskProgress::table_name())
            .finish_non_exhaustive()
    }
}
