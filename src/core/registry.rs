//! Concurrent cache of resource identity → mediator.
//!
//! Each identity owns a slot: a `tokio::sync::OnceCell` inserted atomically
//! into an `scc::HashMap`. The first caller for an identity runs construction
//! (including shadow provisioning, which may block on I/O) inside that cell;
//! concurrent callers for the same identity await the same cell and observe the
//! finished mediator, so the shadow factory runs exactly once per identity.
//! Unrelated identities never wait on each other.
//!
//! A mediator is only handed out while its slot is still in the map. When
//! [`MediatorRegistry::release`] or [`MediatorRegistry::invalidate`] removes a
//! slot whose construction is in flight, the constructing caller closes the
//! orphaned mediator once it completes and builds again, so every live shadow
//! handle stays reachable from the registry.
//!
//! Provisioning failures are downgraded to "no shadow": the registry never
//! fails or blocks production traffic because a shadow resource is broken.
use std::sync::Arc;

use scc::HashMap;
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::{
    core::{
        identity::{IdentityResolver, IdentityResult, ResourceIdentity},
        mediator::Mediator,
    },
    metrics::{self, OUTCOME_ABSENT, OUTCOME_BUILT, OUTCOME_FAILED, ProvisionTimer},
    ports::resource::{ResourceConfig, ShadowFactory, ShadowHandle},
    tracing_setup,
};

type Slot<C, B, S> = Arc<OnceCell<Arc<Mediator<C, B, S>>>>;

struct RegistryInner<C, B, S> {
    slots: HashMap<ResourceIdentity, Slot<C, B, S>>,
}

impl<C, B, S> Drop for RegistryInner<C, B, S> {
    fn drop(&mut self) {
        let remaining = self.slots.len();
        if remaining > 0 {
            tracing::warn!(
                remaining,
                "Mediator registry dropped without release; shadow resources were not closed"
            );
        }
    }
}

/// Owns every mediator built for one middleware family.
///
/// Cheap to clone (Arc inside). The embedding application creates it, shares
/// it with its adapters and calls [`MediatorRegistry::release`] on teardown.
pub struct MediatorRegistry<C, B, S> {
    inner: Arc<RegistryInner<C, B, S>>,
}

impl<C, B, S> Clone for MediatorRegistry<C, B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, B, S> Default for MediatorRegistry<C, B, S>
where
    C: ResourceConfig,
    B: Send + Sync + 'static,
    S: ShadowHandle,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, B, S> MediatorRegistry<C, B, S>
where
    C: ResourceConfig,
    B: Send + Sync + 'static,
    S: ShadowHandle,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: HashMap::new(),
            }),
        }
    }

    /// Fetch a fully built mediator without constructing one.
    pub async fn lookup(&self, identity: &ResourceIdentity) -> Option<Arc<Mediator<C, B, S>>> {
        self.inner
            .slots
            .get_async(identity)
            .await
            .and_then(|entry| entry.get().get().cloned())
    }

    /// Return the mediator for `identity`, building it on first use.
    ///
    /// `business` is only consumed when this call performs construction.
    /// `factory` is invoked at most once per identity for the lifetime of the
    /// cached entry, even under concurrent first use.
    pub async fn get_or_create<F>(
        &self,
        identity: ResourceIdentity,
        config: &C,
        business: B,
        factory: &F,
    ) -> Arc<Mediator<C, B, S>>
    where
        B: Clone,
        F: ShadowFactory<C, Handle = S> + ?Sized,
    {
        if let Some(mediator) = self.lookup(&identity).await {
            tracing::debug!(identity = %identity, "Mediator cache hit");
            Self::check_config_drift(&mediator, config);
            return mediator;
        }

        loop {
            let slot = self.slot(&identity).await;
            let mut constructed = false;
            let mediator = Arc::clone(
                slot.get_or_init(|| {
                    constructed = true;
                    self.construct(identity.clone(), config, business.clone(), factory)
                })
                .await,
            );

            if self.owns(&identity, &slot).await {
                if constructed {
                    metrics::set_active_mediators(self.active().await);
                }
                Self::check_config_drift(&mediator, config);
                return mediator;
            }

            // Slot was released or invalidated mid-construction; nothing else can close it
            if mediator.close().await {
                tracing::info!(
                    identity = %identity,
                    "Closed mediator orphaned by release during construction"
                );
            }
        }
    }

    /// Resolve the identity of `config` and return its mediator.
    pub async fn get_or_create_for<F>(
        &self,
        config: &C,
        business: B,
        factory: &F,
    ) -> IdentityResult<Arc<Mediator<C, B, S>>>
    where
        B: Clone,
        F: ShadowFactory<C, Handle = S> + ?Sized,
    {
        let identity = IdentityResolver::resolve(&config.descriptor())?;
        Ok(self.get_or_create(identity, config, business, factory).await)
    }

    /// Close and forget the mediator for `identity`; the next use rebuilds it.
    ///
    /// Returns `false` when nothing was cached.
    pub async fn invalidate(&self, identity: &ResourceIdentity) -> bool {
        let Some((_, slot)) = self.inner.slots.remove_async(identity).await else {
            return false;
        };
        if let Some(mediator) = slot.get() {
            mediator.close().await;
        }
        tracing::info!(identity = %identity, "Mediator invalidated");
        metrics::set_active_mediators(self.active().await);
        true
    }

    /// Clear the cache and close every shadow handle it owns.
    ///
    /// Idempotent; returns the number of mediators closed by this call.
    pub async fn release(&self) -> usize {
        let mut drained = Vec::new();
        self.inner
            .slots
            .retain_async(|_, slot| {
                drained.push(Arc::clone(slot));
                false
            })
            .await;

        let closed = async {
            let mut closed = 0;
            for slot in drained {
                if let Some(mediator) = slot.get() {
                    if mediator.close().await {
                        closed += 1;
                    }
                }
            }
            closed
        }
        .instrument(tracing_setup::configure_component_tracing("registry"))
        .await;

        metrics::set_active_mediators(0);
        if closed > 0 {
            tracing::info!(closed, "Mediator registry released");
        }
        closed
    }

    /// Number of cached identities, including ones still under construction.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fully built mediators; identities under construction are excluded.
    pub async fn active(&self) -> usize {
        self.stats().await.mediators
    }

    /// Aggregate snapshot statistics.
    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        let stats_ref = &mut stats;
        self.inner
            .slots
            .retain_async(|_, slot| {
                match slot.get() {
                    Some(mediator) => {
                        stats_ref.mediators += 1;
                        if mediator.has_shadow() {
                            stats_ref.with_shadow += 1;
                        }
                    }
                    None => stats_ref.pending += 1,
                }
                true
            })
            .await;
        stats
    }

    async fn slot(&self, identity: &ResourceIdentity) -> Slot<C, B, S> {
        self.inner
            .slots
            .entry_async(identity.clone())
            .await
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .get()
            .clone()
    }

    /// Whether `slot` is still the map entry for `identity`.
    async fn owns(&self, identity: &ResourceIdentity, slot: &Slot<C, B, S>) -> bool {
        self.inner
            .slots
            .get_async(identity)
            .await
            .is_some_and(|entry| Arc::ptr_eq(entry.get(), slot))
    }

    async fn construct<F>(
        &self,
        identity: ResourceIdentity,
        config: &C,
        business: B,
        factory: &F,
    ) -> Arc<Mediator<C, B, S>>
    where
        F: ShadowFactory<C, Handle = S> + ?Sized,
    {
        let span = tracing_setup::create_provision_span(identity.redacted());
        let mediator = async {
            let timer = ProvisionTimer::new();
            let shadow = match factory.build(config).await {
                Ok(Some(handle)) => {
                    tracing::info!("Shadow resource provisioned");
                    metrics::increment_shadow_provision(OUTCOME_BUILT);
                    Some(handle)
                }
                Ok(None) => {
                    tracing::debug!("No shadow resource configured; marked traffic passes through");
                    metrics::increment_shadow_provision(OUTCOME_ABSENT);
                    None
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Shadow provisioning failed; marked traffic passes through"
                    );
                    metrics::increment_shadow_provision(OUTCOME_FAILED);
                    None
                }
            };
            drop(timer);
            Arc::new(Mediator::new(identity, config.clone(), business, shadow))
        }
        .instrument(span)
        .await;
        mediator
    }

    fn check_config_drift(mediator: &Mediator<C, B, S>, config: &C) {
        if !mediator.matches(config) {
            tracing::debug!(
                identity = %mediator.identity(),
                "Cached mediator was built from a different raw configuration"
            );
        }
    }
}

/// Snapshot of registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Fully built mediators
    pub mediators: usize,
    /// Built mediators that have a live shadow handle
    pub with_shadow: usize,
    /// Identities whose construction is still in flight
    pub pending: usize,
}
