//! Action dispatch: the claim protocol and lifecycle transitions.
//!
//! Callers may be unrelated processes, so the dispatcher holds no lock and
//! caches nothing between calls. Every decision is a read from the store
//! followed by a conditional transition the store applies atomically; the
//! store alone decides which caller wins a contested record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info, warn};

use crate::error::{Error, Result};
use crate::model::action::{Action, ActionId, Claim, NewAction, Outcome, State};
use crate::model::pack::Pack;
use crate::registry::PackRegistry;
use crate::store::{ActionFilter, ActionStore, Expect, PackStore, Stamp};
use crate::telemetry::dispatch::{
    record_claim, record_state_transition, start_report_span, start_take_span,
};
use crate::telemetry::metrics;

/// Result of one compare-and-swap against a candidate.
enum ClaimAttempt {
    Won(Action),
    /// Another caller's transition landed first. Never leaves this module.
    ConflictLost,
}

/// Front door for workers and for whatever layer creates actions.
#[derive(Clone)]
pub struct Dispatcher {
    actions: Arc<dyn ActionStore>,
    registry: PackRegistry,
}

impl Dispatcher {
    pub fn new(actions: Arc<dyn ActionStore>, registry: PackRegistry) -> Self {
        Self { actions, registry }
    }

    /// Build a dispatcher whose actions and packs live in the same store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ActionStore + PackStore + 'static,
    {
        let registry = PackRegistry::new(store.clone());
        Self::new(store, registry)
    }

    pub fn registry(&self) -> &PackRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    /// Offer a new action to a pack. The pack must exist.
    pub async fn create_action(&self, new: NewAction) -> Result<Action> {
        if new.name.trim().is_empty() {
            return Err(Error::InvalidInput("action name must not be empty".to_string()));
        }
        let pack = self.registry.get(&new.pack_id).await?;

        let action = Action::from_new(new, Stamp::now().at);
        self.actions.insert_action(&action).await?;

        metrics::actions_created().add(
            1,
            &[
                KeyValue::new("pack", pack.name.clone()),
                KeyValue::new("name", action.name.clone()),
            ],
        );
        debug!(action_id = %action.id, pack = %pack.name, name = %action.name, "action created");
        Ok(action)
    }

    pub async fn get_action(&self, id: ActionId) -> Result<Action> {
        self.actions
            .get_action(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {id}")))
    }

    pub async fn delete_action(&self, id: ActionId) -> Result<()> {
        if !self.actions.delete_action(id).await? {
            return Err(Error::NotFound(format!("action {id}")));
        }
        info!(action_id = %id, "action deleted");
        Ok(())
    }

    pub async fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        self.actions.list_actions(filter).await
    }

    // -----------------------------------------------------------------------
    // Claiming
    // -----------------------------------------------------------------------

    /// Take the oldest pending `action_name` action for a pack, claimed in
    /// the pack's own name. `Ok(None)` means nothing is pending.
    pub async fn take_action(&self, pack_name: &str, action_name: &str) -> Result<Option<Action>> {
        let pack = self.registry.resolve(pack_name).await?;
        let claimant = pack.id.to_string();
        self.claim(&pack, action_name, &claimant).await
    }

    /// Like [`Dispatcher::take_action`], stamping `worker` as the claimant.
    pub async fn take_action_as(
        &self,
        pack_name: &str,
        action_name: &str,
        worker: &str,
    ) -> Result<Option<Action>> {
        let pack = self.registry.resolve(pack_name).await?;
        self.claim(&pack, action_name, worker).await
    }

    async fn claim(&self, pack: &Pack, name: &str, taken_by: &str) -> Result<Option<Action>> {
        let span = start_take_span(&pack.name, name);
        let started = Instant::now();
        let labels = [
            KeyValue::new("pack", pack.name.clone()),
            KeyValue::new("name", name.to_string()),
        ];

        let outcome = self
            .claim_loop(pack, name, taken_by, &labels)
            .instrument(span.clone())
            .await;

        if let Ok((claimed, attempts)) = &outcome {
            record_claim(&span, claimed.as_ref().map(|a| a.id), *attempts);
            if claimed.is_some() {
                record_state_transition(&span, State::New, State::Taken);
            }
        }
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "action.take")],
        );
        outcome.map(|(claimed, _)| claimed)
    }

    /// Each lost race leaves the lost record permanently out of the `New`
    /// set, so this ends after at most one iteration per pending record. A
    /// store that hands back a record this call already lost on is not
    /// honoring the compare-and-swap contract.
    ///
    /// Returns the claimed action (if any) and the number of CAS attempts.
    async fn claim_loop(
        &self,
        pack: &Pack,
        name: &str,
        taken_by: &str,
        labels: &[KeyValue; 2],
    ) -> Result<(Option<Action>, u32)> {
        let mut lost: HashSet<ActionId> = HashSet::new();
        let mut attempts = 0u32;

        loop {
            let Some(candidate) = self.actions.find_oldest_pending(&pack.id, name).await? else {
                metrics::action_claims().add(1, &with_result(labels, "empty"));
                return Ok((None, attempts));
            };

            if lost.contains(&candidate.id) {
                warn!(action_id = %candidate.id, "store returned a record it already gave away");
                return Err(Error::StoreUnavailable(format!(
                    "action {} reported pending after a lost conditional update",
                    candidate.id
                )));
            }

            attempts += 1;
            let candidate_id = candidate.id;
            match self.try_claim(candidate, taken_by).await? {
                ClaimAttempt::Won(action) => {
                    metrics::action_claims().add(1, &with_result(labels, "won"));
                    metrics::action_state_transitions().add(
                        1,
                        &[KeyValue::new("from", "new"), KeyValue::new("to", "taken")],
                    );
                    return Ok((Some(action), attempts));
                }
                ClaimAttempt::ConflictLost => {
                    metrics::action_claims().add(1, &with_result(labels, "conflict"));
                    lost.insert(candidate_id);
                }
            }
        }
    }

    async fn try_claim(&self, candidate: Action, taken_by: &str) -> Result<ClaimAttempt> {
        let stamp = Stamp::now().taken_by(taken_by);
        let applied = self
            .actions
            .conditional_transition(candidate.id, State::New.into(), State::Taken, stamp.clone())
            .await?;

        if !applied {
            debug!(action_id = %candidate.id, "lost claim race, trying next candidate");
            return Ok(ClaimAttempt::ConflictLost);
        }

        // The record is ours; what we read plus what we wrote is its state.
        let mut action = candidate;
        action.state = State::Taken;
        action.taken_at = Some(stamp.at);
        action.taken_by = stamp.taken_by;
        action.updated_at = stamp.at;
        Ok(ClaimAttempt::Won(action))
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Record an outcome for whatever claim `id` currently carries.
    ///
    /// Re-reporting the outcome an action already has is accepted and
    /// changes nothing; any other report on a non-`Taken` action is an
    /// `InvalidTransition`. Workers should prefer
    /// [`Dispatcher::report_outcome_for`], which cannot land on someone
    /// else's claim after a requeue.
    pub async fn report_outcome(
        &self,
        id: ActionId,
        outcome: Outcome,
        result: Option<serde_json::Value>,
    ) -> Result<Action> {
        self.report(id, None, outcome, result).await
    }

    /// Record a worker's outcome for the claim it was handed.
    ///
    /// Fails with `InvalidTransition` once that claim has been expired,
    /// requeued, or superseded by a later claim of the same action.
    pub async fn report_outcome_for(
        &self,
        claim: Claim,
        outcome: Outcome,
        result: Option<serde_json::Value>,
    ) -> Result<Action> {
        self.report(claim.id, Some(claim.requeue_count), outcome, result)
            .await
    }

    async fn report(
        &self,
        id: ActionId,
        fence: Option<u32>,
        outcome: Outcome,
        result: Option<serde_json::Value>,
    ) -> Result<Action> {
        let target = outcome.state();
        let span = start_report_span(id, target.as_str());
        let (action, transitioned) = self
            .settle_report(id, fence, target, result)
            .instrument(span.clone())
            .await?;
        if transitioned {
            record_state_transition(&span, State::Taken, target);
        }
        Ok(action)
    }

    /// Returns the action as it stands after the report, and whether this
    /// call performed the transition. With a `fence`, only the claim with
    /// that `requeue_count` may be settled.
    async fn settle_report(
        &self,
        id: ActionId,
        fence: Option<u32>,
        target: State,
        result: Option<serde_json::Value>,
    ) -> Result<(Action, bool)> {
        let superseded = |a: &Action| fence.is_some_and(|n| n != a.requeue_count);
        let mut current = self.get_action(id).await?;

        if !superseded(&current) && current.state.can_transition_to(target) {
            let expected = Expect::from(current.state).requeue_count(current.requeue_count);
            let stamp = Stamp::now().result(result);
            let applied = self
                .actions
                .conditional_transition(id, expected, target, stamp)
                .await?;
            if applied {
                metrics::action_state_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", "taken"),
                        KeyValue::new("to", target.as_str()),
                    ],
                );
                return Ok((self.get_action(id).await?, true));
            }
            // Someone else moved it first; judge the report against that.
            current = self.get_action(id).await?;
        }

        if superseded(&current) {
            warn!(
                action_id = %id,
                claim = fence.unwrap_or_default(),
                current_claim = current.requeue_count,
                "report for a superseded claim rejected"
            );
        } else if current.state == target {
            debug!(action_id = %id, state = %target, "duplicate outcome report ignored");
            return Ok((current, false));
        } else if current.state.is_terminal() {
            warn!(
                action_id = %id,
                state = %current.state,
                reported = %target,
                "conflicting outcome for a finished action"
            );
        }
        Err(Error::InvalidTransition {
            from: current.state,
            to: target,
        })
    }

    // -----------------------------------------------------------------------
    // Abandoned claims
    // -----------------------------------------------------------------------

    /// Return a taken or timed-out action to `New` so it can be claimed
    /// again. Completed and fatal actions cannot be requeued.
    ///
    /// A lost conditional update is retried against a fresh read. Every
    /// competing transition changes the state or bumps `requeue_count`, so a
    /// lost update on an unchanged record means the store is not honoring
    /// the compare-and-swap contract.
    pub async fn requeue(&self, id: ActionId) -> Result<Action> {
        let mut current = self.get_action(id).await?;
        loop {
            if !current.state.can_requeue_from() {
                return Err(Error::InvalidTransition {
                    from: current.state,
                    to: State::New,
                });
            }

            let expected = Expect::from(current.state).requeue_count(current.requeue_count);
            let applied = self
                .actions
                .conditional_transition(id, expected, State::New, Stamp::now())
                .await?;
            if !applied {
                let fresh = self.get_action(id).await?;
                if fresh.state == current.state && fresh.requeue_count == current.requeue_count {
                    warn!(action_id = %id, state = %fresh.state, "store refused a matching requeue");
                    return Err(Error::StoreUnavailable(format!(
                        "action {id} unchanged after a lost conditional update"
                    )));
                }
                current = fresh;
                continue;
            }

            metrics::action_state_transitions().add(
                1,
                &[
                    KeyValue::new("from", current.state.as_str()),
                    KeyValue::new("to", "new"),
                ],
            );
            let requeued = self.get_action(id).await?;
            info!(
                action_id = %id,
                previous_state = %current.state,
                previous_claimant = current.taken_by.as_deref().unwrap_or("-"),
                requeue_count = requeued.requeue_count,
                "action requeued"
            );
            return Ok(requeued);
        }
    }

    /// Move every claim older than `claim_timeout` to `Timeout`. Claims that
    /// get reported (or requeued) while this runs are left alone.
    pub async fn expire_stale(&self, claim_timeout: Duration) -> Result<Vec<Action>> {
        let cutoff = stale_cutoff(claim_timeout)?;

        let stale = self
            .actions
            .list_actions(&ActionFilter::default().state(State::Taken).taken_before(cutoff))
            .await?;

        let mut expired = Vec::new();
        for action in stale {
            let expected = Expect::from(State::Taken).requeue_count(action.requeue_count);
            let stamp = Stamp::now();
            let applied = self
                .actions
                .conditional_transition(action.id, expected, State::Timeout, stamp.clone())
                .await?;
            if !applied {
                debug!(action_id = %action.id, "claim resolved before expiry");
                continue;
            }

            warn!(
                action_id = %action.id,
                taken_by = action.taken_by.as_deref().unwrap_or("-"),
                "claim timed out"
            );
            let mut timed_out = action;
            timed_out.state = State::Timeout;
            timed_out.finished_at = Some(stamp.at);
            timed_out.updated_at = stamp.at;
            expired.push(timed_out);
        }

        if !expired.is_empty() {
            metrics::actions_expired().add(expired.len() as u64, &[]);
            metrics::action_state_transitions().add(
                expired.len() as u64,
                &[KeyValue::new("from", "taken"), KeyValue::new("to", "timeout")],
            );
        }
        Ok(expired)
    }
}

/// `now - claim_timeout`, rejecting timeouts that reach past the
/// representable range.
pub(crate) fn stale_cutoff(claim_timeout: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(claim_timeout)
        .ok()
        .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "claim timeout of {}s is out of range",
                claim_timeout.as_secs()
            ))
        })
}

fn with_result(labels: &[KeyValue; 2], result: &'static str) -> [KeyValue; 3] {
    [
        labels[0].clone(),
        labels[1].clone(),
        KeyValue::new("result", result),
    ]
}
