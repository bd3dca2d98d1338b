//! Actions and their lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pack::PackId;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One unit of work offered to a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier, assigned at creation.
    pub id: ActionId,

    /// Owning pack.
    pub pack_id: PackId,

    /// Action type within the pack's namespace (e.g. "sendMessage").
    pub name: String,

    /// Current lifecycle state.
    pub state: State,

    /// Input for the worker. The dispatcher never looks inside.
    pub payload: serde_json::Value,

    /// Worker-supplied result, set on completion or fatal failure.
    pub result: Option<serde_json::Value>,

    /// Identity of the claimant. Set exactly when a claim succeeds.
    pub taken_by: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,

    /// When the action reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of explicit requeues. Zero for actions never returned to `New`.
    pub requeue_count: u32,
    pub requeued_at: Option<DateTime<Utc>>,

    /// FIFO key within a (pack_id, name) group.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    /// Build a fresh `New` action from a creation request.
    pub(crate) fn from_new(new: NewAction, now: DateTime<Utc>) -> Self {
        Self {
            id: ActionId::new(),
            pack_id: new.pack_id,
            name: new.name,
            state: State::New,
            payload: new.payload,
            result: None,
            taken_by: None,
            taken_at: None,
            finished_at: None,
            requeue_count: 0,
            requeued_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The claim this record currently carries.
    pub fn claim(&self) -> Claim {
        Claim {
            id: self.id,
            requeue_count: self.requeue_count,
        }
    }
}

/// One specific claim on an action. A requeue bumps `requeue_count`, so a
/// later re-claim of the same action is a different `Claim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub id: ActionId,
    pub requeue_count: u32,
}

/// Newtype for action IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(ActionId)
            .map_err(|e| Error::InvalidInput(format!("bad action id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for a worker to take it.
    New,
    /// Claimed by exactly one worker.
    Taken,
    /// Worker reported success. Terminal.
    Completed,
    /// Worker reported a terminal failure. Terminal.
    Fatal,
    /// Claimed but not reported within the claim timeout.
    Timeout,
}

impl State {
    /// Can the lifecycle move forward from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (New, Taken) | (Taken, Completed) | (Taken, Fatal) | (Taken, Timeout)
        )
    }

    /// Can an operator requeue (move back to `New`) an action in this state?
    pub fn can_requeue_from(self) -> bool {
        matches!(self, State::Taken | State::Timeout)
    }

    /// Is this a terminal state for the worker-facing lifecycle?
    ///
    /// `Timeout` counts as terminal: workers can no longer report on it,
    /// only an explicit requeue revives the action.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Fatal | State::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::New => "new",
            State::Taken => "taken",
            State::Completed => "completed",
            State::Fatal => "fatal",
            State::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(State::New),
            "taken" => Ok(State::Taken),
            "completed" => Ok(State::Completed),
            "fatal" => Ok(State::Fatal),
            "timeout" => Ok(State::Timeout),
            _ => Err(Error::InvalidInput(format!("unknown action state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a worker reports when it is done with a taken action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Fatal,
}

impl Outcome {
    /// The state an action lands in when this outcome is reported.
    pub fn state(self) -> State {
        match self {
            Outcome::Completed => State::Completed,
            Outcome::Fatal => State::Fatal,
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "fatal" => Ok(Outcome::Fatal),
            _ => Err(Error::InvalidInput(format!(
                "unknown outcome {s:?}, expected completed or fatal"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Request to offer a new action to a pack.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub(crate) pack_id: PackId,
    pub(crate) name: String,
    pub(crate) payload: serde_json::Value,
}

impl NewAction {
    pub fn new(pack_id: impl Into<PackId>, name: impl Into<String>) -> Self {
        Self {
            pack_id: pack_id.into(),
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
