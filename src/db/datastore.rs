//! Datastore items.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::datastore::{DataItem, ItemKey, NewDataItem, PutOutcome};
use crate::store::DatastoreStore;

#[async_trait]
impl DatastoreStore for super::Db {
    /// Single-statement upsert. `xmax = 0` holds only for a freshly
    /// inserted row, which tells create apart from replace.
    async fn put_item(&self, item: NewDataItem) -> Result<PutOutcome> {
        let now = chrono::Utc::now();
        let (inserted,): (bool,) = sqlx::query_as(
            "INSERT INTO datastore_items (namespace, key, content, content_type, description, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (namespace, key) DO UPDATE
                 SET content = EXCLUDED.content,
                     content_type = EXCLUDED.content_type,
                     description = EXCLUDED.description,
                     updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(&item.key.namespace)
        .bind(&item.key.key)
        .bind(&item.content)
        .bind(&item.content_type)
        .bind(&item.description)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            PutOutcome::Created
        } else {
            PutOutcome::Replaced
        })
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<DataItem>> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT namespace, key, content, content_type, description, created_at, updated_at
             FROM datastore_items WHERE namespace = $1 AND key = $2",
        )
        .bind(&key.namespace)
        .bind(&key.key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete_item(&self, key: &ItemKey) -> Result<bool> {
        let rows_affected =
            sqlx::query("DELETE FROM datastore_items WHERE namespace = $1 AND key = $2")
                .bind(&key.namespace)
                .bind(&key.key)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(rows_affected > 0)
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    namespace: String,
    key: String,
    content: String,
    content_type: String,
    description: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ItemRow> for DataItem {
    fn from(row: ItemRow) -> Self {
        DataItem {
            key: ItemKey {
                namespace: row.namespace,
                key: row.key,
            },
            content: row.content,
            content_type: row.content_type,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
