//! Store adapter: the capabilities the dispatcher needs from a backing store.
//!
//! Correctness of the whole claim protocol rests on
//! [`ActionStore::conditional_transition`] being a single linearizable
//! compare-and-swap. Everything else here is plain CRUD.
//!
//! Implementations: [`memory::MemoryStore`] (in-process) and
//! [`crate::db::Db`] (Postgres).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::Result;
use crate::model::action::{Action, ActionId, State};
use crate::model::datastore::{DataItem, ItemKey, NewDataItem, PutOutcome};
use crate::model::pack::{Pack, PackId};

/// Fields written alongside a conditional transition.
///
/// Which fields land depends on the target state:
/// - `Taken`: `taken_at = at`, `taken_by`
/// - `Completed | Fatal | Timeout`: `finished_at = at`, `result` if present
/// - `New` (requeue): clears claim and finish fields, bumps `requeue_count`,
///   `requeued_at = at`
///
/// `updated_at = at` in every case.
#[derive(Debug, Clone)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub taken_by: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Stamp {
    /// Stamp at the current time, truncated to the microsecond precision
    /// Postgres stores.
    pub fn now() -> Self {
        Self {
            at: Utc::now().trunc_subsecs(6),
            taken_by: None,
            result: None,
        }
    }

    pub fn taken_by(mut self, who: impl Into<String>) -> Self {
        self.taken_by = Some(who.into());
        self
    }

    pub fn result(mut self, result: Option<serde_json::Value>) -> Self {
        self.result = result;
        self
    }
}

/// Precondition for [`ActionStore::conditional_transition`].
///
/// `requeue_count` pins one specific claim: every trip back to `New` bumps
/// it, so (`Taken`, n) cannot match a later re-claim of the same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expect {
    pub state: State,
    pub requeue_count: Option<u32>,
}

impl Expect {
    pub fn requeue_count(mut self, n: u32) -> Self {
        self.requeue_count = Some(n);
        self
    }

    pub(crate) fn matches(&self, action: &Action) -> bool {
        action.state == self.state
            && self.requeue_count.is_none_or(|n| n == action.requeue_count)
    }
}

impl From<State> for Expect {
    fn from(state: State) -> Self {
        Self {
            state,
            requeue_count: None,
        }
    }
}

/// Query for [`ActionStore::list_actions`]. Every set field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub pack_id: Option<PackId>,
    pub name: Option<String>,
    pub state: Option<State>,
    /// Only actions whose `taken_at` is strictly before this instant.
    pub taken_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ActionFilter {
    pub fn pack(mut self, pack_id: PackId) -> Self {
        self.pack_id = Some(pack_id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn taken_before(mut self, at: DateTime<Utc>) -> Self {
        self.taken_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, action: &Action) -> bool {
        self.pack_id.as_ref().is_none_or(|p| *p == action.pack_id)
            && self.name.as_ref().is_none_or(|n| *n == action.name)
            && self.state.is_none_or(|s| s == action.state)
            && self
                .taken_before
                .is_none_or(|cutoff| action.taken_at.is_some_and(|t| t < cutoff))
    }
}

/// Durable set of action records.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn insert_action(&self, action: &Action) -> Result<()>;

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>>;

    /// Remove a record. Returns whether one existed.
    async fn delete_action(&self, id: ActionId) -> Result<bool>;

    /// Oldest `New` action of the (pack, name) group, ordered by creation
    /// time with insertion order breaking ties. Need not be atomic.
    async fn find_oldest_pending(&self, pack_id: &PackId, name: &str) -> Result<Option<Action>>;

    /// Move `id` to `next` iff the stored record still satisfies `expected`,
    /// as one indivisible operation. Returns whether it applied. A missing
    /// record is reported as not applied.
    async fn conditional_transition(
        &self,
        id: ActionId,
        expected: Expect,
        next: State,
        stamp: Stamp,
    ) -> Result<bool>;

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>>;
}

/// Pack records. Ids and names are both unique.
#[async_trait]
pub trait PackStore: Send + Sync {
    /// Fails with [`crate::error::Error::Conflict`] on a duplicate id or name.
    async fn insert_pack(&self, pack: &Pack) -> Result<()>;

    async fn get_pack(&self, id: &PackId) -> Result<Option<Pack>>;

    async fn find_pack_by_name(&self, name: &str) -> Result<Option<Pack>>;

    async fn list_packs(&self) -> Result<Vec<Pack>>;
}

/// Namespaced JSON items.
#[async_trait]
pub trait DatastoreStore: Send + Sync {
    /// Create or replace atomically.
    async fn put_item(&self, item: NewDataItem) -> Result<PutOutcome>;

    async fn get_item(&self, key: &ItemKey) -> Result<Option<DataItem>>;

    async fn delete_item(&self, key: &ItemKey) -> Result<bool>;
}
