use crate::storage::types::deserialize_flexible_id;
use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{knowledge_entity::KnowledgeEntity, StoredObject},
    },
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use surrealdb::sql::Thing;

pub const RELATION_TABLE: &str = "relates_to";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RelationshipMetadata {
    pub graph_scope: String,
    pub relationship_type: String,
}

/// Directed, typed edge between two entities of the same scope.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KnowledgeRelationship {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub metadata: RelationshipMetadata,
}

const RELATE_ONCE: &str = r"
    BEGIN TRANSACTION;
    LET $edge = type::thing($relation_table, $id);
    IF array::len((SELECT id FROM $edge)) = 0 {
        RELATE $source->relates_to->$target CONTENT {
            id: $edge,
            metadata: $metadata
        };
    };
    COMMIT TRANSACTION;
";

impl KnowledgeRelationship {
    /// Builds the edge `source_name -[relationship_type]-> target_name`.
    /// Endpoints are stored as entity record keys.
    pub fn new(
        source_name: &str,
        target_name: &str,
        graph_scope: &str,
        relationship_type: &str,
    ) -> Self {
        let in_ = KnowledgeEntity::record_key(graph_scope, source_name);
        let out = KnowledgeEntity::record_key(graph_scope, target_name);
        Self {
            id: Self::record_key(&in_, &out, graph_scope, relationship_type),
            in_,
            out,
            metadata: RelationshipMetadata {
                graph_scope: graph_scope.to_owned(),
                relationship_type: relationship_type.to_owned(),
            },
        }
    }

    /// Edge identity is `(source, target, type, scope)`.
    pub fn record_key(in_: &str, out: &str, graph_scope: &str, relationship_type: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [graph_scope, in_, out, relationship_type] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Creates the edge unless an identical one already exists.
    pub async fn store_relationship(&self, db_client: &SurrealDbClient) -> Result<(), AppError> {
        let source = Thing::from((KnowledgeEntity::table_name(), self.in_.as_str()));
        let target = Thing::from((KnowledgeEntity::table_name(), self.out.as_str()));

        db_client
            .client
            .query(RELATE_ONCE)
            .bind(("relation_table", RELATION_TABLE))
            .bind(("id", self.id.clone()))
            .bind(("source", source))
            .bind(("target", target))
            .bind(("metadata", self.metadata.clone()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn list_in_scope(
        graph_scope: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeRelationship>, AppError> {
        let relationships: Vec<KnowledgeRelationship> = db_client
            .client
            .query("SELECT * FROM relates_to WHERE metadata.graph_scope = $graph_scope")
            .bind(("graph_scope", graph_scope.to_owned()))
            .await?
            .take(0)?;

        Ok(relationships)
    }

    /// Edges of the scope with at least one endpoint among `keys`.
    pub async fn touching(
        graph_scope: &str,
        keys: &[String],
        db_client: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeRelationship>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let relationships: Vec<KnowledgeRelationship> = db_client
            .client
            .query(
                "SELECT * FROM relates_to
                 WHERE metadata.graph_scope = $graph_scope
                 AND (in IN $things OR out IN $things)",
            )
            .bind(("graph_scope", graph_scope.to_owned()))
            .bind(("things", entity_things(keys)))
            .await?
            .take(0)?;

        Ok(relationships)
    }

    /// Edges of the scope whose endpoints both lie in `keys`.
    pub async fn induced(
        graph_scope: &str,
        keys: &[String],
        db_client: &SurrealDbClient,
    ) -> Result<Vec<KnowledgeRelationship>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let relationships: Vec<KnowledgeRelationship> = db_client
            .client
            .query(
                "SELECT * FROM relates_to
                 WHERE metadata.graph_scope = $graph_scope
                 AND in IN $things AND out IN $things",
            )
            .bind(("graph_scope", graph_scope.to_owned()))
            .bind(("things", entity_things(keys)))
            .await?
            .take(0)?;

        Ok(relationships)
    }
}

fn entity_things(keys: &[String]) -> Vec<Thing> {
    keys.iter()
        .map(|key| Thing::from((KnowledgeEntity::table_name(), key.as_str())))
        .collect()
}
