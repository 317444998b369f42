//! Future records and continuations
//!
//! A future is write-once: it moves from [`FutureState::Pending`] to
//! [`FutureState::Resolved`] at most once, and every continuation registered
//! while it was pending is handed back exactly once by the store operation
//! that performs the transition.

use crate::thread::ThreadId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a future, allocated by the data controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FutureId(u64);

impl FutureId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a FutureId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        FutureId(id)
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Resolution state of a future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FutureState {
    /// Not yet resolved
    Pending,
    /// Resolved with a terminal value
    Resolved(Value),
}

/// A suspended thread waiting on a future
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiter {
    /// Thread to resume
    pub thread: ThreadId,
    /// Instruction to continue from
    pub resume_ip: usize,
    /// Stack slot that receives the resolved value
    pub slot: usize,
}

/// Something to do once a future resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuation {
    /// Resume a suspended thread with the value
    Resume(Waiter),
    /// Resolve another future with the same value (future chaining)
    Forward(FutureId),
}

/// Stored record of one future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureRecord {
    /// Identifier
    pub id: FutureId,
    /// Resolution state
    pub state: FutureState,
    /// Continuations registered while pending
    #[serde(default)]
    pub continuations: Vec<Continuation>,
}

impl FutureRecord {
    /// A fresh pending future
    pub fn pending(id: FutureId) -> Self {
        Self {
            id,
            state: FutureState::Pending,
            continuations: Vec::new(),
        }
    }

    /// Resolved value, if any
    pub fn value(&self) -> Option<&Value> {
        match &self.state {
            FutureState::Resolved(value) => Some(value),
            FutureState::Pending => None,
        }
    }

    /// Check whether the future has resolved
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, FutureState::Resolved(_))
    }

    /// Resolve a pending future and drain its continuations
    ///
    /// This is the state transition every backend performs inside its
    /// critical section.
    pub fn resolve(&mut self, value: Value) -> ResolveOutcome {
        match &self.state {
            FutureState::Resolved(existing) => ResolveOutcome::AlreadyResolved(existing.clone()),
            FutureState::Pending => {
                self.state = FutureState::Resolved(value);
                ResolveOutcome::Resolved(std::mem::take(&mut self.continuations))
            }
        }
    }

    /// Register a continuation unless the future has already resolved
    pub fn register(&mut self, continuation: Continuation) -> RegisterOutcome {
        match &self.state {
            FutureState::Resolved(value) => RegisterOutcome::AlreadyResolved(value.clone()),
            FutureState::Pending => {
                self.continuations.push(continuation);
                RegisterOutcome::Registered
            }
        }
    }
}

/// Result of an atomic resolve attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// This caller won; the drained continuations must now be fired
    Resolved(Vec<Continuation>),
    /// Another caller resolved first; the stored value is unchanged
    AlreadyResolved(Value),
}

/// Result of an atomic continuation registration
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// Stored; it will be drained by the resolving caller
    Registered,
    /// The future resolved first; nothing was stored
    AlreadyResolved(Value),
}
