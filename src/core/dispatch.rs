//! Routing decision: pass-through, substitute or fail.
//!
//! | marked | switch | whitelisted | substitute answers | shadow handle | route              |
//! |--------|--------|-------------|--------------------|---------------|--------------------|
//! | no     | any    | any         | any                | any           | [`Route::Business`]    |
//! | yes    | off    | any         | any                | any           | [`Route::Rejected`]    |
//! | yes    | on     | yes         | any                | any           | [`Route::Whitelisted`] |
//! | yes    | on     | no          | yes                | any           | [`Route::Mock`]        |
//! | yes    | on     | no          | no                 | absent        | [`Route::Fallback`]    |
//! | yes    | on     | no          | no                 | present       | [`Route::Shadow`]      |
//!
//! The registry is only consulted for marked calls that reach the last two
//! rows, so ordinary traffic never pays for identity resolution or provisioning.
use std::{
    fmt,
    future::Future,
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::models::RoutingConfig,
    core::{
        identity::{IdentityError, IdentityResult, ResourceIdentity},
        marker::{MarkerPropagator, TrafficContext},
        mediator::Mediator,
    },
    metrics,
    ports::{
        resource::{ResourceConfig, ShadowHandle},
        substitute::ResultSubstitute,
    },
};

/// Where a call was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Unmarked traffic, business handle untouched
    Business,
    /// Marked traffic without a shadow resource, executed on the business handle
    Fallback,
    /// Marked traffic substituted onto the shadow handle
    Shadow,
    /// Marked traffic refused because shadow routing is switched off
    Rejected,
    /// Marked traffic allowed onto a whitelisted business resource
    Whitelisted,
    /// Marked traffic answered by a result substitute; no resource touched
    Mock,
    /// Nested invocation inside an already mediated call
    Reentrant,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Business => "business",
            Route::Fallback => "fallback",
            Route::Shadow => "shadow",
            Route::Rejected => "rejected",
            Route::Whitelisted => "whitelisted",
            Route::Mock => "mock",
            Route::Reentrant => "reentrant",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle a call is executed against.
#[derive(Debug, Clone)]
pub enum Target<B, S> {
    Business(B),
    Shadow(S),
}

impl<B, S> Target<B, S> {
    pub fn is_shadow(&self) -> bool {
        matches!(self, Target::Shadow(_))
    }
}

impl<H> Target<H, H> {
    /// Collapse when business and shadow handles share a type.
    pub fn into_handle(self) -> H {
        match self {
            Target::Business(h) | Target::Shadow(h) => h,
        }
    }
}

/// Call result plus the route it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched<T> {
    pub value: T,
    pub route: Route,
}

impl<T> Dispatched<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Marked call that silently ran on production resources.
    pub fn is_fallback(&self) -> bool {
        self.route == Route::Fallback
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError<E> {
    /// The call failed on the business handle; returned unchanged
    #[error(transparent)]
    Business(E),

    /// A marked call failed on its shadow handle
    #[error("Test-path failure on shadow resource {identity}")]
    Shadow {
        identity: ResourceIdentity,
        #[source]
        source: E,
    },

    #[error("Shadow routing is switched off; test traffic rejected")]
    SwitchedOff,

    /// A result substitute answered the marked call with a configured failure
    #[error("Substituted failure for test traffic")]
    Substituted(#[source] E),

    #[error("Resource configuration error: {0}")]
    Configuration(#[from] IdentityError),
}

impl<E> DispatchError<E> {
    /// Failures an operator must look at because a test run is misconfigured.
    pub fn is_test_path_failure(&self) -> bool {
        matches!(self, DispatchError::Shadow { .. } | DispatchError::SwitchedOff)
    }

    /// The underlying call error, if the call ran at all.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            DispatchError::Business(e)
            | DispatchError::Shadow { source: e, .. }
            | DispatchError::Substituted(e) => Some(e),
            _ => None,
        }
    }
}

/// Combines marker state and mediator lookup, then executes the chosen branch.
pub struct RoutingDispatcher {
    propagator: Arc<MarkerPropagator>,
    enabled: AtomicBool,
    flag_fallback: bool,
    whitelist: ArcSwap<BTreeSet<String>>,
}

impl RoutingDispatcher {
    pub fn new(propagator: Arc<MarkerPropagator>, config: &RoutingConfig) -> Self {
        Self {
            propagator,
            enabled: AtomicBool::new(config.enabled),
            flag_fallback: config.flag_fallback,
            whitelist: ArcSwap::from_pointee(config.whitelist.iter().cloned().collect()),
        }
    }

    pub fn propagator(&self) -> &Arc<MarkerPropagator> {
        &self.propagator
    }

    /// Flip the global shadow-routing switch.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(enabled, "Shadow routing switch changed");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Replace the set of resources marked traffic may reach unmediated.
    pub fn set_whitelist<I, N>(&self, resources: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let whitelist: BTreeSet<String> = resources.into_iter().map(Into::into).collect();
        tracing::info!(resources = whitelist.len(), "Test traffic whitelist replaced");
        self.whitelist.store(Arc::new(whitelist));
    }

    pub fn is_whitelisted(&self, resource: &str) -> bool {
        self.whitelist.load().contains(resource)
    }

    /// Shadow decision table for calls that are neither whitelisted nor
    /// substituted; `has_shadow` is ignored for unmarked calls.
    pub fn decide(&self, marked: bool, has_shadow: bool) -> Route {
        match (marked, self.is_enabled(), has_shadow) {
            (false, _, _) => Route::Business,
            (true, false, _) => Route::Rejected,
            (true, true, false) => Route::Fallback,
            (true, true, true) => Route::Shadow,
        }
    }

    /// Route one call.
    ///
    /// `lookup` resolves the mediator of the target resource and is only
    /// awaited for marked traffic. `call` runs exactly once unless the call is
    /// rejected or the configuration is invalid.
    pub async fn dispatch<C, B, S, L, LF, F, Fut, T, E>(
        &self,
        ctx: &TrafficContext,
        resource: Option<&str>,
        business: B,
        lookup: L,
        call: F,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        C: ResourceConfig,
        S: ShadowHandle + Clone,
        L: FnOnce() -> LF,
        LF: Future<Output = IdentityResult<Arc<Mediator<C, B, S>>>>,
        F: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.dispatch_with(
            ctx,
            resource,
            business,
            lookup,
            None::<&dyn ResultSubstitute<T, E>>,
            call,
        )
        .await
    }

    /// [`dispatch`](Self::dispatch) with a result substitute consulted for
    /// marked calls on resources outside the whitelist. When it answers,
    /// neither `lookup` nor `call` runs.
    pub async fn dispatch_with<C, B, S, L, LF, M, F, Fut, T, E>(
        &self,
        ctx: &TrafficContext,
        resource: Option<&str>,
        business: B,
        lookup: L,
        substitute: Option<&M>,
        call: F,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        C: ResourceConfig,
        M: ResultSubstitute<T, E> + ?Sized,
        S: ShadowHandle + Clone,
        L: FnOnce() -> LF,
        LF: Future<Output = IdentityResult<Arc<Mediator<C, B, S>>>>,
        F: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let detection = self.propagator.detect(ctx, resource);
        if !detection.marked {
            return Self::run(Route::Business, Target::Business(business), call)
                .await
                .map_err(DispatchError::Business);
        }

        if !self.is_enabled() {
            tracing::warn!(
                resource,
                decided_by = ?detection.decided_by,
                "Test traffic rejected; shadow routing is switched off"
            );
            record_route(Route::Rejected);
            return Err(DispatchError::SwitchedOff);
        }

        if resource.is_some_and(|name| self.is_whitelisted(name)) {
            tracing::debug!(resource, "Test traffic allowed onto whitelisted resource");
            return Self::run(Route::Whitelisted, Target::Business(business), call)
                .await
                .map_err(DispatchError::Business);
        }

        if let Some(answer) = substitute.and_then(|s| s.substitute(resource)) {
            tracing::debug!(resource, failed = answer.is_err(), "Test traffic answered by substitute");
            record_route(Route::Mock);
            return answer
                .map(|value| Dispatched {
                    value,
                    route: Route::Mock,
                })
                .map_err(DispatchError::Substituted);
        }

        let mediator = lookup().await?;
        match mediator.shadow() {
            Some(shadow) => {
                tracing::debug!(identity = %mediator.identity(), "Routing test traffic to shadow resource");
                Self::run(Route::Shadow, Target::Shadow(shadow.clone()), call)
                    .await
                    .map_err(|source| {
                        tracing::warn!(
                            identity = %mediator.identity(),
                            "Test traffic failed on shadow resource"
                        );
                        DispatchError::Shadow {
                            identity: mediator.identity().clone(),
                            source,
                        }
                    })
            }
            None => {
                if self.flag_fallback {
                    tracing::info!(
                        identity = %mediator.identity(),
                        "Test traffic passed through to business resource; no shadow configured"
                    );
                }
                Self::run(Route::Fallback, Target::Business(business), call)
                    .await
                    .map_err(DispatchError::Business)
            }
        }
    }

    async fn run<B, S, F, Fut, T, E>(route: Route, target: Target<B, S>, call: F) -> Result<Dispatched<T>, E>
    where
        F: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        record_route(route);
        let value = call(target).await?;
        Ok(Dispatched { value, route })
    }
}

/// Count the route and record it on the enclosing dispatch span.
pub(crate) fn record_route(route: Route) {
    tracing::Span::current().record("route", route.as_str());
    metrics::increment_dispatch(route.as_str());
}
