//! Paired (business, shadow) resource handles for one resource identity.
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crate::{
    core::identity::ResourceIdentity,
    ports::resource::{ResourceConfig, ShadowHandle},
};

/// Resolves one [`ResourceIdentity`] to its business handle and optional shadow handle.
///
/// Built exactly once per identity by the registry and immutable afterwards,
/// apart from the release flag. The business handle is borrowed from the
/// application and is never closed here; the shadow handle is owned and is
/// closed only when the registry releases or invalidates this mediator.
pub struct Mediator<C, B, S> {
    identity: ResourceIdentity,
    config: C,
    business: B,
    shadow: Option<S>,
    created_at: Instant,
    released: AtomicBool,
}

impl<C, B, S> Mediator<C, B, S>
where
    C: ResourceConfig,
    S: ShadowHandle,
{
    pub(crate) fn new(identity: ResourceIdentity, config: C, business: B, shadow: Option<S>) -> Self {
        Self {
            identity,
            config,
            business,
            shadow,
            created_at: Instant::now(),
            released: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// The raw configuration this mediator was built from.
    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn business(&self) -> &B {
        &self.business
    }

    /// The shadow handle, or `None` when no shadow is configured or the
    /// mediator has been released.
    pub fn shadow(&self) -> Option<&S> {
        if self.is_released() {
            return None;
        }
        self.shadow.as_ref()
    }

    /// Whether marked traffic can be substituted onto a shadow handle.
    pub fn has_shadow(&self) -> bool {
        self.shadow().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Compare the raw configuration against another one for idempotency checks.
    pub fn matches(&self, config: &C) -> bool {
        self.config == *config
    }

    /// Mark released and close the shadow handle. Returns `false` if already released.
    pub(crate) async fn close(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(shadow) = &self.shadow {
            if let Err(e) = shadow.close().await {
                tracing::error!(
                    identity = %self.identity,
                    error = %e,
                    "Failed to close shadow resource"
                );
            }
        }
        tracing::debug!(identity = %self.identity, age = ?self.age(), "Mediator released");
        true
    }
}

impl<C, B, S> fmt::Debug for Mediator<C, B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("identity", &self.identity)
            .field("has_shadow", &self.shadow.is_some())
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}
