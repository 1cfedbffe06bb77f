//! Ready-made shadow factories.
use std::{fmt, future::Future, marker::PhantomData};

use async_trait::async_trait;

use crate::ports::resource::{ProvisionResult, ResourceConfig, ShadowFactory, ShadowHandle};

/// Shadow factory backed by an async closure receiving the raw configuration.
///
/// ```
/// use shadowline::{adapters::factories::FnShadowFactory, core::identity::ResourceDescriptor};
/// # use shadowline::ports::resource::{ProvisionError, ShadowHandle};
/// # #[derive(Clone)] struct Client;
/// # #[async_trait::async_trait] impl ShadowHandle for Client {}
///
/// let factory = FnShadowFactory::new(|config: ResourceDescriptor| async move {
///     // open a connection to the shadow counterpart of `config`
///     let _ = config;
///     Ok::<_, ProvisionError>(Some(Client))
/// });
/// # let _ = factory;
/// ```
#[derive(Clone)]
pub struct FnShadowFactory<F> {
    build: F,
}

impl<F> FnShadowFactory<F> {
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

impl<F> fmt::Debug for FnShadowFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnShadowFactory(..)")
    }
}

#[async_trait]
impl<C, F, Fut, S> ShadowFactory<C> for FnShadowFactory<F>
where
    C: ResourceConfig,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = ProvisionResult<Option<S>>> + Send,
    S: ShadowHandle,
{
    type Handle = S;

    async fn build(&self, config: &C) -> ProvisionResult<Option<S>> {
        (self.build)(config.clone()).await
    }
}

/// Factory for middleware without shadow resources; every marked call passes through.
pub struct NoShadow<S> {
    _handle: PhantomData<fn() -> S>,
}

impl<S> NoShadow<S> {
    pub fn new() -> Self {
        Self {
            _handle: PhantomData,
        }
    }
}

impl<S> Default for NoShadow<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for NoShadow<S> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for NoShadow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoShadow")
    }
}

#[async_trait]
impl<C, S> ShadowFactory<C> for NoShadow<S>
where
    C: ResourceConfig,
    S: ShadowHandle,
{
    type Handle = S;

    async fn build(&self, _config: &C) -> ProvisionResult<Option<S>> {
        Ok(None)
    }
}
