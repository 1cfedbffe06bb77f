pub mod context;
pub mod dispatch;
pub mod identity;
pub mod marker;
pub mod mediator;
pub mod registry;
pub mod scope;
pub mod service;

pub use dispatch::{DispatchError, Dispatched, Route, RoutingDispatcher, Target};
pub use identity::{IdentityError, IdentityResolver, ResourceDescriptor, ResourceIdentity};
pub use marker::{MarkerPropagator, MarkerRules, TrafficContext};
pub use mediator::Mediator;
pub use registry::{MediatorRegistry, RegistryStats};
pub use scope::{ScopePolicy, ScopeStack, ScopeTicket};
pub use service::{InterceptedCall, MediationService};
