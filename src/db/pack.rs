//! Pack records.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::pack::{Pack, PackId};
use crate::store::PackStore;

#[async_trait]
impl PackStore for super::Db {
    async fn insert_pack(&self, pack: &Pack) -> Result<()> {
        sqlx::query("INSERT INTO packs (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(pack.id.as_str())
            .bind(&pack.name)
            .bind(pack.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                super::conflict_or_store(e, || {
                    format!("pack {} ({}) already registered", pack.name, pack.id)
                })
            })?;
        Ok(())
    }

    async fn get_pack(&self, id: &PackId) -> Result<Option<Pack>> {
        let row: Option<PackRow> =
            sqlx::query_as("SELECT id, name, created_at FROM packs WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn find_pack_by_name(&self, name: &str) -> Result<Option<Pack>> {
        let row: Option<PackRow> =
            sqlx::query_as("SELECT id, name, created_at FROM packs WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn list_packs(&self) -> Result<Vec<Pack>> {
        let rows: Vec<PackRow> =
            sqlx::query_as("SELECT id, name, created_at FROM packs ORDER BY name ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct PackRow {
    id: String,
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PackRow> for Pack {
    fn from(row: PackRow) -> Self {
        Pack {
            id: PackId(row.id),
            name: row.name,
            created_at: row.created_at,
        }
    }
}
