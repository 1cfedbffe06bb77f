//! Shadowline - shadow-resource mediation for load-test traffic.
//!
//! Shadowline lets a production application carry synthetic load-test traffic
//! next to real traffic. Calls marked as test traffic that touch a shared
//! external resource (database, broker, cache, RPC client) are routed to an
//! isolated shadow counterpart; everything else passes through untouched.
//!
//! # Building blocks
//! - [`core::identity`]: canonical, comparable keys for resource configurations
//! - [`core::registry`]: identity → [`core::Mediator`] cache with single-flight construction
//! - [`core::marker`]: test-traffic detection and carrier propagation
//! - [`core::context`]: per-logical-call context that survives task and thread hops
//! - [`core::scope`]: reentrancy guard firing mediation once per outer call
//! - [`core::dispatch`]: the pass-through / substitute / fail decision, including
//!   whitelisted resources and caller-supplied mock results
//! - [`core::service`]: all of the above composed for one intercepted call
//!
//! # Quick Example
//! ```no_run
//! use shadowline::{
//!     adapters::FnShadowFactory,
//!     config::MediationConfig,
//!     core::{InterceptedCall, MediationService, ResourceDescriptor, context},
//!     ports::resource::{ProvisionError, ShadowHandle},
//! };
//!
//! #[derive(Clone)]
//! struct Producer(&'static str);
//!
//! #[async_trait::async_trait]
//! impl ShadowHandle for Producer {}
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let service: MediationService<ResourceDescriptor, Producer, Producer> =
//!     MediationService::new(&MediationConfig::default())?;
//! let factory = FnShadowFactory::new(|_cfg: ResourceDescriptor| async {
//!     Ok::<_, ProvisionError>(Some(Producer("shadow")))
//! });
//! let config = ResourceDescriptor::new("broker-1").port(9092);
//!
//! let mut traffic = service.propagator().root();
//! service.propagator().mark(&mut traffic);
//!
//! let sent = context::with_context(traffic, async {
//!     service
//!         .intercept(
//!             InterceptedCall::new("kafka#KafkaProducer_send", &config, Producer("business")),
//!             &factory,
//!             |target| async move { Ok::<_, std::io::Error>(target.into_handle().0) },
//!         )
//!         .await
//! })
//! .await?;
//! assert_eq!(sent.value, "shadow");
//! service.release().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (capability traits the core consumes: shadow
//! factories, carriers, naming predicates) from **adapters** (ready-made
//! implementations) while keeping mediation logic inside `core`.
//!
//! # Error Handling
//! Domain errors are `thiserror` enums per module. Shadow provisioning failures
//! never reach the caller; shadow execution failures always do, as
//! [`core::DispatchError::Shadow`]. Loader and CLI code return `eyre::Result`.
//!
//! # Concurrency & Data Structures
//! The registry keeps its slots in an `scc::HashMap` with one
//! `tokio::sync::OnceCell` per identity; marker rules are swapped through
//! `arc-swap`; scope state lives with the logical call, never in a global counter.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    config::MediationConfig,
    core::{
        DispatchError, Dispatched, InterceptedCall, MediationService, MediatorRegistry, Route,
        ScopePolicy, TrafficContext,
    },
};
