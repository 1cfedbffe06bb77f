//! Logical call context.
//!
//! A [`CallFrame`] binds a [`TrafficContext`] and a [`ScopeStack`] to one
//! logical call. Frames live in a tokio task-local, so they follow a future
//! across worker threads; they do not follow work handed to another task,
//! thread or callback. Such continuations must be wrapped explicitly with
//! [`carry`] (futures) or [`bind`] (closures) at the point the work is handed
//! off, which restores the frame wherever the continuation eventually runs.
//!
//! Outside any frame the scope guard falls back to a per-thread stack and
//! [`current`] returns `None`. That stack is shared by every task the thread
//! polls, so it only suits synchronous callers that never hold a
//! [`ScopeTicket`](crate::core::scope::ScopeTicket) across an await;
//! `MediationService::intercept` opens a frame of its own instead.
use std::{cell::RefCell, future::Future};

use tokio::task::futures::TaskLocalFuture;

use crate::core::{marker::TrafficContext, scope::ScopeStack};

tokio::task_local! {
    static FRAME: CallFrame;
}

thread_local! {
    static THREAD_SCOPES: ScopeStack = ScopeStack::new();
}

/// State attached to one logical call.
#[derive(Debug)]
pub struct CallFrame {
    traffic: RefCell<TrafficContext>,
    scopes: ScopeStack,
}

impl CallFrame {
    /// Fresh frame with its own scope stack.
    pub fn new(traffic: TrafficContext) -> Self {
        Self {
            traffic: RefCell::new(traffic),
            scopes: ScopeStack::new(),
        }
    }

    /// Snapshot of the running frame for a continuation.
    ///
    /// The traffic context is copied; the scope stack is shared, so a
    /// continuation of the same call stays gated by boundaries its caller
    /// has already entered.
    pub fn capture() -> Self {
        FRAME
            .try_with(|frame| Self {
                traffic: RefCell::new(frame.traffic.borrow().clone()),
                scopes: frame.scopes.clone(),
            })
            .unwrap_or_else(|_| Self {
                traffic: RefCell::new(TrafficContext::new()),
                scopes: THREAD_SCOPES.with(ScopeStack::clone),
            })
    }
}

/// Run `fut` as a new logical call carrying `traffic`.
pub fn with_context<F>(traffic: TrafficContext, fut: F) -> TaskLocalFuture<CallFrame, F>
where
    F: Future,
{
    FRAME.scope(CallFrame::new(traffic), fut)
}

/// Synchronous counterpart of [`with_context`].
pub fn sync_with_context<R>(traffic: TrafficContext, f: impl FnOnce() -> R) -> R {
    FRAME.sync_scope(CallFrame::new(traffic), f)
}

/// Run `fut` inside a snapshot of the current frame; see [`CallFrame::capture`].
pub fn carry<F>(fut: F) -> TaskLocalFuture<CallFrame, F>
where
    F: Future,
{
    FRAME.scope(CallFrame::capture(), fut)
}

/// Wrap a callback so it runs inside a snapshot of the current frame.
pub fn bind<R>(f: impl FnOnce() -> R) -> impl FnOnce() -> R {
    let frame = CallFrame::capture();
    move || FRAME.sync_scope(frame, f)
}

/// Whether a call frame is active on the current task.
pub fn in_frame() -> bool {
    FRAME.try_with(|_| ()).is_ok()
}

/// Copy of the current traffic context, if a frame is active.
pub fn current() -> Option<TrafficContext> {
    FRAME.try_with(|frame| frame.traffic.borrow().clone()).ok()
}

/// Mutate the current traffic context in place.
///
/// Returns `None` outside a frame. `f` must not call back into this module.
pub fn update_current<R>(f: impl FnOnce(&mut TrafficContext) -> R) -> Option<R> {
    FRAME
        .try_with(|frame| f(&mut *frame.traffic.borrow_mut()))
        .ok()
}

/// Drop every propagated value of the current call; run when the operation completes.
pub fn clear_current() {
    update_current(TrafficContext::clear);
}

/// Scope stack of the current logical call, or of the current thread outside a frame.
pub fn current_scopes() -> ScopeStack {
    FRAME
        .try_with(|frame| frame.scopes.clone())
        .unwrap_or_else(|_| THREAD_SCOPES.with(ScopeStack::clone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        marker::MarkerPropagator,
        scope::{self, ScopePolicy, ScopeState},
    };

    fn marked() -> TrafficContext {
        let mut ctx = TrafficContext::root();
        MarkerPropagator::default().mark(&mut ctx);
        ctx
    }

    #[tokio::test]
    async fn test_current_inside_and_outside_frame() {
        assert!(current().is_none());
        let seen = with_context(marked(), async { current() }).await;
        assert!(seen.is_some_and(|ctx| ctx.is_test_traffic()));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_update_and_clear_current() {
        with_context(TrafficContext::new(), async {
            update_current(|ctx| ctx.insert("tenant", "acme"));
            assert_eq!(current().unwrap().get("tenant"), Some("acme"));
            clear_current();
            assert!(current().unwrap().is_empty());
        })
        .await;
        assert!(update_current(|ctx| ctx.len()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_carry_restores_context_in_spawned_task() {
        let bare = with_context(marked(), async { tokio::spawn(async { current() }).await })
            .await
            .unwrap();
        assert!(bare.is_none());

        let carried = with_context(marked(), async { tokio::spawn(carry(async { current() })).await })
            .await
            .unwrap();
        assert!(carried.is_some_and(|ctx| ctx.is_test_traffic()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_carried_continuation_shares_scopes() {
        let nested = with_context(TrafficContext::new(), async {
            let _outer = scope::enter("mq#send", ScopePolicy::Boundary);
            tokio::spawn(carry(async {
                scope::enter("mq#send", ScopePolicy::Boundary).is_entered()
            }))
            .await
        })
        .await
        .unwrap();
        assert!(!nested);
    }

    #[tokio::test]
    async fn test_frames_have_independent_scopes() {
        let (a, b) = tokio::join!(
            with_context(TrafficContext::new(), async {
                let ticket = scope::enter("db#query", ScopePolicy::Boundary);
                tokio::task::yield_now().await;
                ticket.is_entered()
            }),
            with_context(TrafficContext::new(), async {
                let ticket = scope::enter("db#query", ScopePolicy::Boundary);
                tokio::task::yield_now().await;
                ticket.is_entered()
            }),
        );
        assert!(a && b);
    }

    #[test]
    fn test_bind_restores_context_on_another_thread() {
        let callback = sync_with_context(marked(), || bind(current));
        let seen = std::thread::spawn(callback).join().unwrap();
        assert!(seen.is_some_and(|ctx| ctx.is_test_traffic()));
    }

    #[tokio::test]
    async fn test_in_frame() {
        assert!(!in_frame());
        assert!(with_context(TrafficContext::new(), async { in_frame() }).await);
        assert!(sync_with_context(TrafficContext::new(), in_frame));
    }

    #[test]
    fn test_thread_fallback_stack() {
        let stack = current_scopes();
        let ticket = scope::enter("rpc#invoke", ScopePolicy::Boundary);
        assert!(ticket.is_entered());
        assert_eq!(stack.state("rpc#invoke"), ScopeState::Entered);
        drop(ticket);
        assert_eq!(stack.state("rpc#invoke"), ScopeState::Idle);
    }
}
