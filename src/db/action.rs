//! Action records: insert, lookup, and the conditional transition the
//! claim protocol depends on.

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::Result;
use crate::model::action::{Action, ActionId, State};
use crate::model::pack::PackId;
use crate::store::{ActionFilter, ActionStore, Expect, Stamp};

const ACTION_COLUMNS: &str = "id, pack_id, name, state, payload, result, taken_by, taken_at, \
     finished_at, requeue_count, requeued_at, created_at, updated_at";

#[async_trait]
impl ActionStore for super::Db {
    async fn insert_action(&self, action: &Action) -> Result<()> {
        sqlx::query(
            "INSERT INTO actions (id, pack_id, name, state, payload, result, taken_by, taken_at, finished_at, requeue_count, requeued_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(action.id.0)
        .bind(action.pack_id.as_str())
        .bind(&action.name)
        .bind(action.state.as_str())
        .bind(&action.payload)
        .bind(&action.result)
        .bind(&action.taken_by)
        .bind(action.taken_at)
        .bind(action.finished_at)
        .bind(action.requeue_count as i32)
        .bind(action.requeued_at)
        .bind(action.created_at)
        .bind(action.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| super::conflict_or_store(e, || format!("action {} already exists", action.id)))?;
        Ok(())
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>> {
        let row: Option<ActionRow> =
            sqlx::query_as(&format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ActionRow::try_into_action).transpose()
    }

    async fn delete_action(&self, id: ActionId) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM actions WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn find_oldest_pending(&self, pack_id: &PackId, name: &str) -> Result<Option<Action>> {
        let row: Option<ActionRow> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM actions
             WHERE pack_id = $1 AND name = $2 AND state = 'new'
             ORDER BY created_at ASC, seq ASC
             LIMIT 1"
        ))
        .bind(pack_id.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ActionRow::try_into_action).transpose()
    }

    /// A single `UPDATE ... WHERE id = $n AND state = $expected`. Concurrent
    /// updaters of the same row queue on its lock; once the winner commits,
    /// Postgres re-checks the `WHERE` for the others and they match nothing.
    async fn conditional_transition(
        &self,
        id: ActionId,
        expected: Expect,
        next: State,
        stamp: Stamp,
    ) -> Result<bool> {
        let set_clause = match next {
            State::Taken => "taken_at = $1, taken_by = $2",
            State::Completed | State::Fatal | State::Timeout => {
                "finished_at = $1, result = COALESCE($3, result)"
            }
            State::New => {
                "requeued_at = $1, requeue_count = requeue_count + 1, \
                 taken_at = NULL, taken_by = NULL, finished_at = NULL"
            }
        };
        let sql = format!(
            "UPDATE actions SET state = $4, updated_at = $1, {set_clause}
             WHERE id = $5 AND state = $6 AND ($7::INTEGER IS NULL OR requeue_count = $7)"
        );

        let rows_affected = sqlx::query(&sql)
            .bind(stamp.at)
            .bind(stamp.taken_by)
            .bind(stamp.result)
            .bind(next.as_str())
            .bind(id.0)
            .bind(expected.state.as_str())
            .bind(expected.requeue_count.map(|n| n as i32))
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ACTION_COLUMNS} FROM actions WHERE TRUE"));
        if let Some(pack_id) = &filter.pack_id {
            qb.push(" AND pack_id = ").push_bind(pack_id.0.clone());
        }
        if let Some(name) = &filter.name {
            qb.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(state) = filter.state {
            qb.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(cutoff) = filter.taken_before {
            qb.push(" AND taken_at < ").push_bind(cutoff);
        }
        qb.push(" ORDER BY created_at ASC, seq ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<ActionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(ActionRow::try_into_action).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    pack_id: String,
    name: String,
    state: String,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    taken_by: Option<String>,
    taken_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    requeue_count: i32,
    requeued_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ActionRow {
    fn try_into_action(self) -> Result<Action> {
        Ok(Action {
            id: ActionId(self.id),
            pack_id: PackId(self.pack_id),
            name: self.name,
            state: self.state.parse()?,
            payload: self.payload,
            result: self.result,
            taken_by: self.taken_by,
            taken_at: self.taken_at,
            finished_at: self.finished_at,
            requeue_count: self.requeue_count.max(0) as u32,
            requeued_at: self.requeued_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
