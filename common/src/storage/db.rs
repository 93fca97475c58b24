use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// # Arguments
    /// * `address` - Any address understood by `engine::any` (`ws://`, `mem://`, ...)
    ///
    /// # Returns
    /// * `SurrealDbClient` signed in and bound to `namespace`/`database`
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Embedded engines have no root user to sign in as
        if !address.starts_with("mem://") {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        debug!("graph store indexes ready");
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_entity_scope ON knowledge_entity FIELDS graph_scope;
                 DEFINE INDEX IF NOT EXISTS idx_entity_scope_name ON knowledge_entity FIELDS graph_scope, name UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_relation_scope ON relates_to FIELDS metadata.graph_scope;
                 DEFINE INDEX IF NOT EXISTS idx_history_scope ON query_history FIELDS graph_scope;",
            )
            .await?
            .check()?;

        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Creates or replaces the record with the item's id.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
        // Index definitions are idempotent
        db.ensure_initialized()
            .await
            .expect("Failed to re-initialize schema");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched.map(|d| d.name), Some("first".to_string()));

        let replaced = Dummy {
            name: "second".to_string(),
            ..dummy.clone()
        };
        db.upsert_item(replaced).await.expect("Failed to upsert");

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "second");
    }
}
