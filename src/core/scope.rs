//! Invocation scope guard.
//!
//! Decides, for a tree of nested interceptions, whether mediation logic fires
//! for a given call instance. State is kept per boundary name inside a
//! [`ScopeStack`], and a scope stack belongs to one logical call (see
//! [`crate::core::context`]), so unrelated calls on the same boundary never
//! serialize against each other.
//!
//! Exit protocol for hand-written interceptors: every attempt, successful or
//! not, calls [`ScopeStack::can_leave`] once on its exit path and
//! [`ScopeStack::leave`] only when that returned `true`. The counter-based
//! pairing assumes attempts exit innermost first.
//!
//! [`ScopeTicket`] remembers whether its own attempt was accepted, so it exits
//! correctly in any order, including when a nested attempt was carried into
//! another task and outlives the outer one. It runs on drop, which covers
//! normal return, early return on error, panic unwind and future cancellation.
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{core::context, metrics};

/// Gating policy of a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// Only the outermost invocation is processed; nested ones are skipped
    #[default]
    Boundary,
    /// Every invocation is processed regardless of nesting
    Internal,
}

/// Observable state of one boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Idle,
    Entered,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScopeError {
    #[error("Scope '{boundary}' left without a matching entry")]
    NotEntered { boundary: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BoundaryFrame {
    entered: bool,
    /// Nested attempts rejected while `entered`, each awaiting its `can_leave`
    skipped: usize,
    internal_depth: usize,
}

impl BoundaryFrame {
    fn is_idle(&self) -> bool {
        !self.entered && self.skipped == 0 && self.internal_depth == 0
    }
}

/// Per-logical-call boundary state.
///
/// Cloning yields another handle onto the same state; that is how a call that
/// hops to another task or thread keeps seeing its own entered boundaries.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Arc<Mutex<HashMap<String, BoundaryFrame>>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, HashMap<String, BoundaryFrame>> {
        // Frames are plain counters, a panic elsewhere cannot leave them torn
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempt to enter `boundary`.
    ///
    /// Under [`ScopePolicy::Boundary`] only succeeds when the boundary is idle
    /// for this call; under [`ScopePolicy::Internal`] always succeeds.
    pub fn try_enter(&self, boundary: &str, policy: ScopePolicy) -> bool {
        let mut frames = self.frames();
        let frame = frames.entry(boundary.to_string()).or_default();
        match policy {
            ScopePolicy::Boundary if frame.entered => {
                frame.skipped += 1;
                tracing::trace!(boundary, skipped = frame.skipped, "Reentrant invocation skipped");
                false
            }
            ScopePolicy::Boundary => {
                frame.entered = true;
                true
            }
            ScopePolicy::Internal => {
                frame.internal_depth += 1;
                true
            }
        }
    }

    /// Whether the exiting attempt owns the entry and must call [`leave`](Self::leave).
    ///
    /// Consumes one rejected nested attempt when there is one, so exits must
    /// come innermost first. Prefer [`enter`](Self::enter) when an attempt may
    /// outlive its caller.
    pub fn can_leave(&self, boundary: &str, policy: ScopePolicy) -> bool {
        if policy == ScopePolicy::Internal {
            return true;
        }
        let mut frames = self.frames();
        let Some(frame) = frames.get_mut(boundary) else {
            return true;
        };
        if frame.skipped > 0 {
            frame.skipped -= 1;
            if frame.is_idle() {
                frames.remove(boundary);
            }
            return false;
        }
        true
    }

    /// Exit `boundary`. Misuse is logged and counted, never fatal.
    pub fn leave(&self, boundary: &str, policy: ScopePolicy) -> Result<(), ScopeError> {
        let mut frames = self.frames();
        let left = match frames.get_mut(boundary) {
            Some(frame) => {
                let left = match policy {
                    ScopePolicy::Boundary if frame.entered => {
                        frame.entered = false;
                        true
                    }
                    ScopePolicy::Internal if frame.internal_depth > 0 => {
                        frame.internal_depth -= 1;
                        true
                    }
                    _ => false,
                };
                if frame.is_idle() {
                    frames.remove(boundary);
                }
                left
            }
            None => false,
        };
        drop(frames);

        if left {
            return Ok(());
        }
        tracing::error!(
            boundary,
            ?policy,
            "Scope left without a matching entry; interceptor exit paths are unbalanced"
        );
        metrics::increment_guard_misuse(boundary);
        Err(ScopeError::NotEntered {
            boundary: boundary.to_string(),
        })
    }

    /// Retire one rejected attempt without touching the entry it was nested in.
    fn release_skipped(&self, boundary: &str) {
        let mut frames = self.frames();
        let Some(frame) = frames.get_mut(boundary) else {
            return;
        };
        frame.skipped = frame.skipped.saturating_sub(1);
        if frame.is_idle() {
            frames.remove(boundary);
        }
    }

    pub fn state(&self, boundary: &str) -> ScopeState {
        match self.frames().get(boundary) {
            Some(frame) if frame.entered || frame.internal_depth > 0 => ScopeState::Entered,
            _ => ScopeState::Idle,
        }
    }

    /// Number of attempts currently open on `boundary`, accepted or skipped.
    pub fn depth(&self, boundary: &str) -> usize {
        self.frames()
            .get(boundary)
            .map(|f| usize::from(f.entered) + f.skipped + f.internal_depth)
            .unwrap_or(0)
    }

    /// Enter `boundary` and return a ticket that exits it on drop.
    pub fn enter(&self, boundary: &str, policy: ScopePolicy) -> ScopeTicket {
        let entered = self.try_enter(boundary, policy);
        ScopeTicket {
            stack: self.clone(),
            boundary: boundary.to_string(),
            policy,
            entered,
        }
    }

    /// Run `f` only if this invocation owns the boundary; `None` when reentrant.
    pub fn guarded<R>(&self, boundary: &str, policy: ScopePolicy, f: impl FnOnce() -> R) -> Option<R> {
        let ticket = self.enter(boundary, policy);
        if !ticket.is_entered() {
            return None;
        }
        Some(f())
    }

    /// Async variant of [`guarded`](Self::guarded); the boundary is held across
    /// every await point and released if the future is dropped early.
    pub async fn guarded_async<F, Fut>(
        &self,
        boundary: &str,
        policy: ScopePolicy,
        f: F,
    ) -> Option<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let ticket = self.enter(boundary, policy);
        if !ticket.is_entered() {
            return None;
        }
        let output = f().await;
        drop(ticket);
        Some(output)
    }
}

/// One attempt on a boundary; exits it when dropped.
#[must_use = "dropping the ticket immediately leaves the boundary"]
#[derive(Debug)]
pub struct ScopeTicket {
    stack: ScopeStack,
    boundary: String,
    policy: ScopePolicy,
    entered: bool,
}

impl ScopeTicket {
    /// Whether mediation logic should run for this invocation.
    pub fn is_entered(&self) -> bool {
        self.entered
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn policy(&self) -> ScopePolicy {
        self.policy
    }
}

impl Drop for ScopeTicket {
    fn drop(&mut self) {
        if self.entered {
            // Misuse is already logged and counted inside leave
            let _ = self.stack.leave(&self.boundary, self.policy);
        } else {
            self.stack.release_skipped(&self.boundary);
        }
    }
}

/// Conventional boundary name `interceptor#target_behavior`.
pub fn boundary_key(interceptor: &str, target: &str, behavior: &str) -> String {
    format!("{interceptor}#{target}_{behavior}")
}

/// [`ScopeStack::try_enter`] on the current logical call.
pub fn try_enter(boundary: &str, policy: ScopePolicy) -> bool {
    context::current_scopes().try_enter(boundary, policy)
}

/// [`ScopeStack::can_leave`] on the current logical call.
pub fn can_leave(boundary: &str, policy: ScopePolicy) -> bool {
    context::current_scopes().can_leave(boundary, policy)
}

/// [`ScopeStack::leave`] on the current logical call.
pub fn leave(boundary: &str, policy: ScopePolicy) -> Result<(), ScopeError> {
    context::current_scopes().leave(boundary, policy)
}

/// [`ScopeStack::enter`] on the current logical call.
pub fn enter(boundary: &str, policy: ScopePolicy) -> ScopeTicket {
    context::current_scopes().enter(boundary, policy)
}
