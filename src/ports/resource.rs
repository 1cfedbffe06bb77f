use async_trait::async_trait;
use thiserror::Error;

use crate::core::identity::ResourceDescriptor;

/// Error raised while provisioning a shadow resource
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProvisionError {
    /// The shadow counterpart could not be reached or opened
    #[error("Shadow connection error: {0}")]
    Connection(String),

    /// The shadow configuration is incomplete or inconsistent
    #[error("Invalid shadow configuration: {0}")]
    InvalidConfig(String),

    /// Any other adapter-specific failure
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Result type for shadow provisioning
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// ResourceConfig defines the port for middleware-specific resource configurations.
///
/// Implementations extract the identity-relevant fields of their native
/// configuration (an HBase `Configuration`, a Redis pool config, a broker
/// address list) into a [`ResourceDescriptor`]. Equality on the raw
/// configuration is used to detect a cached mediator built from a different
/// configuration than the one presented now.
pub trait ResourceConfig: Clone + PartialEq + Send + Sync + 'static {
    /// Describe the resource this configuration points at
    fn descriptor(&self) -> ResourceDescriptor;
}

impl ResourceConfig for ResourceDescriptor {
    fn descriptor(&self) -> ResourceDescriptor {
        self.clone()
    }
}

/// ShadowHandle defines the port for a shadow resource owned by a mediator.
#[async_trait]
pub trait ShadowHandle: Send + Sync + 'static {
    /// Close the underlying resource
    ///
    /// Called at most once, when the owning registry releases or invalidates
    /// the mediator. The default does nothing, for handles that clean up on drop.
    async fn close(&self) -> ProvisionResult<()> {
        Ok(())
    }
}

/// ShadowFactory defines the port for building shadow resources.
#[async_trait]
pub trait ShadowFactory<C>: Send + Sync
where
    C: ResourceConfig,
{
    type Handle: ShadowHandle;

    /// Build the shadow counterpart for a business resource configuration
    ///
    /// # Returns
    /// * `Ok(Some(handle))` when a shadow resource is configured and was opened
    /// * `Ok(None)` when no shadow resource is configured (pass-through)
    /// * `Err(_)` when provisioning failed
    async fn build(&self, config: &C) -> ProvisionResult<Option<Self::Handle>>;
}
