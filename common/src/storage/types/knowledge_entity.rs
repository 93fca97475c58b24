use sha2::{Digest, Sha256};
use surrealdb::sql::{Datetime as SurrealDatetime, Thing};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Tag used when the extractor gives no usable type.
pub const DEFAULT_ENTITY_TYPE: &str = "Other";

stored_object!(KnowledgeEntity, "knowledge_entity", {
    name: String,
    graph_scope: String,
    description: String,
    entity_type: String,
    /// Empty for placeholder entities.
    #[serde(default)]
    embedding: Vec<f32>
});

const UPSERT_ENTITY: &str = r"
    UPSERT type::thing($table, $id) SET
        name = $name,
        graph_scope = $graph_scope,
        description = $description,
        entity_type = $entity_type,
        embedding = $embedding,
        created_at = created_at ?? $now,
        updated_at = $now
    RETURN AFTER;
";

// Only fills fields that are still missing, so an existing description or
// embedding survives.
const UPSERT_PLACEHOLDER: &str = r"
    UPSERT type::thing($table, $id) SET
        name = $name,
        graph_scope = $graph_scope,
        description = description ?? '',
        entity_type = entity_type ?? $entity_type,
        embedding = embedding ?? [],
        created_at = created_at ?? $now,
        updated_at = updated_at ?? $now
    RETURN AFTER;
";

impl KnowledgeEntity {
    /// Deterministic record key for the `(name, graph_scope)` merge key.
    pub fn record_key(graph_scope: &str, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(graph_scope.as_bytes());
        hasher.update([0x1f]);
        hasher.update(name.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    pub fn is_placeholder(&self) -> bool {
        self.description.is_empty() && self.embedding.is_empty()
    }

    /// Inserts or overwrites the entity keyed by `(name, graph_scope)`.
    pub async fn upsert(
        name: &str,
        graph_scope: &str,
        description: &str,
        entity_type: &str,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Option<KnowledgeEntity>, AppError> {
        let mut response = db
            .client
            .query(UPSERT_ENTITY)
            .bind(("table", Self::table_name()))
            .bind(("id", Self::record_key(graph_scope, name)))
            .bind(("name", name.to_owned()))
            .bind(("graph_scope", graph_scope.to_owned()))
            .bind(("description", description.to_owned()))
            .bind(("entity_type", entity_type.to_owned()))
            .bind(("embedding", embedding))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let stored: Option<KnowledgeEntity> = response.take(0)?;
        Ok(stored)
    }

    /// Creates the entity with empty description and embedding unless it
    /// already exists.
    pub async fn upsert_placeholder(
        name: &str,
        graph_scope: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<KnowledgeEntity>, AppError> {
        let mut response = db
            .client
            .query(UPSERT_PLACEHOLDER)
            .bind(("table", Self::table_name()))
            .bind(("id", Self::record_key(graph_scope, name)))
            .bind(("name", name.to_owned()))
            .bind(("graph_scope", graph_scope.to_owned()))
            .bind(("entity_type", DEFAULT_ENTITY_TYPE))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let stored: Option<KnowledgeEntity> = response.take(0)?;
        Ok(stored)
    }

    pub async fn get_by_name(
        name: &str,
        graph_scope: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<KnowledgeEntity>, AppError> {
        Ok(db
            .get_item::<KnowledgeEntity>(&Self::record_key(graph_scope, name))
            .await?)
    }

    /// All entities of a scope in store order (creation time, then name).
    pub async fn list_in_scope(
        graph_scope: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeEntity>, AppError> {
        let entities: Vec<KnowledgeEntity> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE graph_scope = $graph_scope
                 ORDER BY created_at ASC, name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("graph_scope", graph_scope.to_owned()))
            .await?
            .take(0)?;

        Ok(entities)
    }

    /// Entities of a scope that carry an embedding, in store order.
    pub async fn list_embedded_in_scope(
        graph_scope: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeEntity>, AppError> {
        let entities: Vec<KnowledgeEntity> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE graph_scope = $graph_scope AND array::len(embedding) > 0
                 ORDER BY created_at ASC, name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("graph_scope", graph_scope.to_owned()))
            .await?
            .take(0)?;

        Ok(entities)
    }

    pub async fn get_by_keys(
        keys: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeEntity>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = keys
            .iter()
            .map(|key| Thing::from((Self::table_name(), key.as_str())))
            .collect();

        let entities: Vec<KnowledgeEntity> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .await?
            .take(0)?;

        Ok(entities)
    }
}
