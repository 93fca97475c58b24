use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(QueryHistory, "query_history", {
    graph_scope: String,
    query: String,
    answer: String
});

impl QueryHistory {
    pub fn new(graph_scope: String, query: String, answer: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            graph_scope,
            query,
            answer,
        }
    }

    /// Past questions of a scope, oldest first.
    pub async fn list_in_scope(
        graph_scope: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<QueryHistory>, AppError> {
        let history: Vec<QueryHistory> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE graph_scope = $graph_scope
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("graph_scope", graph_scope.to_owned()))
            .await?
            .take(0)?;

        Ok(history)
    }
}
