//! In-process store for development and testing.
//!
//! One mutex guards the whole record set and every trait method does its
//! read-modify-write under a single acquisition, so the compare-and-swap
//! contract holds for any number of concurrent tasks in this process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{ActionFilter, ActionStore, DatastoreStore, Expect, PackStore, Stamp};
use crate::error::{Error, Result};
use crate::model::action::{Action, ActionId, State};
use crate::model::datastore::{DataItem, ItemKey, NewDataItem, PutOutcome};
use crate::model::pack::{Pack, PackId};

#[derive(Default)]
struct Inner {
    /// Insertion counter; breaks `created_at` ties.
    next_seq: u64,
    actions: HashMap<ActionId, (u64, Action)>,
    packs: HashMap<PackId, Pack>,
    items: HashMap<ItemKey, DataItem>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| Error::StoreUnavailable(format!("memory store poisoned: {e}")))
    }
}

/// Write the stamp fields that belong to `next` onto `action`.
fn apply_stamp(action: &mut Action, next: State, stamp: Stamp) {
    match next {
        State::Taken => {
            action.taken_at = Some(stamp.at);
            action.taken_by = stamp.taken_by;
        }
        State::Completed | State::Fatal | State::Timeout => {
            action.finished_at = Some(stamp.at);
            if stamp.result.is_some() {
                action.result = stamp.result;
            }
        }
        State::New => {
            action.taken_at = None;
            action.taken_by = None;
            action.finished_at = None;
            action.requeue_count += 1;
            action.requeued_at = Some(stamp.at);
        }
    }
    action.state = next;
    action.updated_at = stamp.at;
}

#[async_trait]
impl ActionStore for MemoryStore {
    async fn insert_action(&self, action: &Action) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.actions.contains_key(&action.id) {
            return Err(Error::Conflict(format!("action {} already exists", action.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.actions.insert(action.id, (seq, action.clone()));
        Ok(())
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>> {
        let inner = self.lock()?;
        Ok(inner.actions.get(&id).map(|(_, a)| a.clone()))
    }

    async fn delete_action(&self, id: ActionId) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.actions.remove(&id).is_some())
    }

    async fn find_oldest_pending(&self, pack_id: &PackId, name: &str) -> Result<Option<Action>> {
        let inner = self.lock()?;
        Ok(inner
            .actions
            .values()
            .filter(|(_, a)| a.state == State::New && a.pack_id == *pack_id && a.name == name)
            .min_by_key(|(seq, a)| (a.created_at, *seq))
            .map(|(_, a)| a.clone()))
    }

    async fn conditional_transition(
        &self,
        id: ActionId,
        expected: Expect,
        next: State,
        stamp: Stamp,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.actions.get_mut(&id) {
            Some((_, action)) if expected.matches(action) => {
                apply_stamp(action, next, stamp);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        let inner = self.lock()?;
        let mut rows: Vec<&(u64, Action)> = inner
            .actions
            .values()
            .filter(|(_, a)| filter.matches(a))
            .collect();
        rows.sort_by_key(|(seq, a)| (a.created_at, *seq));
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|(_, a)| a.clone()).collect())
    }
}

#[async_trait]
impl PackStore for MemoryStore {
    async fn insert_pack(&self, pack: &Pack) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.packs.contains_key(&pack.id) {
            return Err(Error::Conflict(format!("pack id {} already registered", pack.id)));
        }
        if inner.packs.values().any(|p| p.name == pack.name) {
            return Err(Error::Conflict(format!(
                "pack name {} already registered",
                pack.name
            )));
        }
        inner.packs.insert(pack.id.clone(), pack.clone());
        Ok(())
    }

    async fn get_pack(&self, id: &PackId) -> Result<Option<Pack>> {
        let inner = self.lock()?;
        Ok(inner.packs.get(id).cloned())
    }

    async fn find_pack_by_name(&self, name: &str) -> Result<Option<Pack>> {
        let inner = self.lock()?;
        Ok(inner.packs.values().find(|p| p.name == name).cloned())
    }

    async fn list_packs(&self) -> Result<Vec<Pack>> {
        let inner = self.lock()?;
        let mut packs: Vec<Pack> = inner.packs.values().cloned().collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packs)
    }
}

#[async_trait]
impl DatastoreStore for MemoryStore {
    async fn put_item(&self, item: NewDataItem) -> Result<PutOutcome> {
        let mut inner = self.lock()?;
        let now = chrono::Utc::now();
        match inner.items.get_mut(&item.key) {
            Some(existing) => {
                existing.content = item.content;
                existing.content_type = item.content_type;
                existing.description = item.description;
                existing.updated_at = now;
                Ok(PutOutcome::Replaced)
            }
            None => {
                let stored = DataItem {
                    key: item.key.clone(),
                    content: item.content,
                    content_type: item.content_type,
                    description: item.description,
                    created_at: now,
                    updated_at: now,
                };
                inner.items.insert(item.key, stored);
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn get_item(&self, key: &ItemKey) -> Result<Option<DataItem>> {
        let inner = self.lock()?;
        Ok(inner.items.get(key).cloned())
    }

    async fn delete_item(&self, key: &ItemKey) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.items.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::action::NewAction;
    use chrono::{Duration, Utc};

    fn action_at(name: &str, offset_ms: i64) -> Action {
        let now = Utc::now() + Duration::milliseconds(offset_ms);
        Action::from_new(NewAction::new("packA", name), now)
    }

    #[tokio::test]
    async fn oldest_pending_breaks_ties_by_insertion_order() {
        let store = MemoryStore::new();
        let first = action_at("actionA", 0);
        let mut second = action_at("actionA", 0);
        second.created_at = first.created_at;
        store.insert_action(&first).await.unwrap();
        store.insert_action(&second).await.unwrap();

        let found = store
            .find_oldest_pending(&PackId::from("packA"), "actionA")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn oldest_pending_skips_other_groups_and_states() {
        let store = MemoryStore::new();
        let other_name = action_at("actionB", -1000);
        let taken = action_at("actionA", -500);
        let pending = action_at("actionA", 0);
        store.insert_action(&other_name).await.unwrap();
        store.insert_action(&taken).await.unwrap();
        store.insert_action(&pending).await.unwrap();
        assert!(
            store
                .conditional_transition(taken.id, State::New.into(), State::Taken, Stamp::now())
                .await
                .unwrap()
        );

        let found = store
            .find_oldest_pending(&PackId::from("packA"), "actionA")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, pending.id);
    }

    #[tokio::test]
    async fn conditional_transition_refuses_stale_expectation() {
        let store = MemoryStore::new();
        let action = action_at("actionA", 0);
        store.insert_action(&action).await.unwrap();

        let won = store
            .conditional_transition(
                action.id,
                State::New.into(),
                State::Taken,
                Stamp::now().taken_by("w1"),
            )
            .await
            .unwrap();
        let lost = store
            .conditional_transition(
                action.id,
                State::New.into(),
                State::Taken,
                Stamp::now().taken_by("w2"),
            )
            .await
            .unwrap();
        assert!(won);
        assert!(!lost);

        let stored = store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.state, State::Taken);
        assert_eq!(stored.taken_by.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn conditional_transition_on_missing_record_is_not_applied() {
        let store = MemoryStore::new();
        let applied = store
            .conditional_transition(ActionId::new(), State::New.into(), State::Taken, Stamp::now())
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn requeue_stamp_clears_claim() {
        let store = MemoryStore::new();
        let action = action_at("actionA", 0);
        store.insert_action(&action).await.unwrap();
        store
            .conditional_transition(action.id, State::New.into(), State::Taken, Stamp::now().taken_by("w1"))
            .await
            .unwrap();
        store
            .conditional_transition(action.id, State::Taken.into(), State::New, Stamp::now())
            .await
            .unwrap();

        let stored = store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.state, State::New);
        assert!(stored.taken_by.is_none());
        assert!(stored.taken_at.is_none());
        assert_eq!(stored.requeue_count, 1);
        assert!(stored.requeued_at.is_some());
    }

    #[tokio::test]
    async fn requeue_count_guard_rejects_a_newer_claim() {
        let store = MemoryStore::new();
        let action = action_at("actionA", 0);
        store.insert_action(&action).await.unwrap();
        store
            .conditional_transition(action.id, State::New.into(), State::Taken, Stamp::now())
            .await
            .unwrap();
        store
            .conditional_transition(action.id, State::Taken.into(), State::New, Stamp::now())
            .await
            .unwrap();
        store
            .conditional_transition(action.id, State::New.into(), State::Taken, Stamp::now())
            .await
            .unwrap();

        let stale = Expect::from(State::Taken).requeue_count(0);
        let applied = store
            .conditional_transition(action.id, stale, State::Timeout, Stamp::now())
            .await
            .unwrap();
        assert!(!applied);
        let stored = store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.state, State::Taken);
    }

    #[tokio::test]
    async fn duplicate_pack_name_conflicts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = Pack {
            id: PackId::from("a"),
            name: "slack".to_string(),
            created_at: now,
        };
        let b = Pack {
            id: PackId::from("b"),
            name: "slack".to_string(),
            created_at: now,
        };
        store.insert_pack(&a).await.unwrap();
        assert!(matches!(store.insert_pack(&b).await, Err(Error::Conflict(_))));
    }
}
