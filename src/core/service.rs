//! End-to-end mediation of one intercepted call.
use std::{future::Future, sync::Arc};

use tracing::Instrument;

use crate::{
    config::models::MediationConfig,
    core::{
        context,
        dispatch::{self, DispatchError, Dispatched, Route, RoutingDispatcher, Target},
        marker::{MarkerError, MarkerPropagator, TrafficContext},
        registry::MediatorRegistry,
        scope::{self, ScopePolicy},
    },
    ports::{
        resource::{ResourceConfig, ShadowFactory, ShadowHandle},
        substitute::ResultSubstitute,
    },
    tracing_setup,
};

/// Description of one intercepted invocation, built by the interception layer.
#[derive(Debug, Clone)]
pub struct InterceptedCall<'a, C, B> {
    /// Boundary name, see [`scope::boundary_key`]
    pub boundary: &'a str,
    /// Overrides the service's default scope policy
    pub policy: Option<ScopePolicy>,
    /// Name of the touched resource (topic, table, key prefix) for naming-convention detection
    pub resource: Option<&'a str>,
    pub config: &'a C,
    pub business: B,
}

impl<'a, C, B> InterceptedCall<'a, C, B> {
    pub fn new(boundary: &'a str, config: &'a C, business: B) -> Self {
        Self {
            boundary,
            policy: None,
            resource: None,
            config,
            business,
        }
    }

    pub fn policy(mut self, policy: ScopePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn resource(mut self, resource: &'a str) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Composes the scope guard, marker propagator, registry and dispatcher for
/// one middleware family.
pub struct MediationService<C, B, S> {
    registry: MediatorRegistry<C, B, S>,
    dispatcher: RoutingDispatcher,
    default_policy: ScopePolicy,
}

impl<C, B, S> MediationService<C, B, S>
where
    C: ResourceConfig,
    B: Clone + Send + Sync + 'static,
    S: ShadowHandle + Clone,
{
    pub fn new(config: &MediationConfig) -> Result<Self, MarkerError> {
        let propagator = Arc::new(MarkerPropagator::from_config(&config.marker)?);
        Ok(Self::with_parts(
            MediatorRegistry::new(),
            RoutingDispatcher::new(propagator, &config.routing),
            config.scope.default_policy,
        ))
    }

    pub fn with_parts(
        registry: MediatorRegistry<C, B, S>,
        dispatcher: RoutingDispatcher,
        default_policy: ScopePolicy,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            default_policy,
        }
    }

    pub fn registry(&self) -> &MediatorRegistry<C, B, S> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &RoutingDispatcher {
        &self.dispatcher
    }

    pub fn propagator(&self) -> &Arc<MarkerPropagator> {
        self.dispatcher.propagator()
    }

    /// Mediate one call against the current logical call context.
    ///
    /// Nested invocations of an already entered boundary run `f` on the
    /// supplied business handle untouched ([`Route::Reentrant`]); everything
    /// else goes through the routing decision. A caller outside any
    /// [`context::with_context`] frame is mediated inside a fresh frame of its
    /// own, so concurrent unframed calls never gate each other.
    pub async fn intercept<F, Call, Fut, T, E>(
        &self,
        call: InterceptedCall<'_, C, B>,
        factory: &F,
        f: Call,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        F: ShadowFactory<C, Handle = S> + ?Sized,
        Call: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.intercept_with(call, factory, None::<&dyn ResultSubstitute<T, E>>, f)
            .await
    }

    /// [`intercept`](Self::intercept) with a result substitute for marked
    /// calls; see [`RoutingDispatcher::dispatch_with`].
    pub async fn intercept_with<F, M, Call, Fut, T, E>(
        &self,
        call: InterceptedCall<'_, C, B>,
        factory: &F,
        substitute: Option<&M>,
        f: Call,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        F: ShadowFactory<C, Handle = S> + ?Sized,
        M: ResultSubstitute<T, E> + ?Sized,
        Call: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if context::in_frame() {
            self.mediate(call, factory, substitute, f).await
        } else {
            context::with_context(
                TrafficContext::new(),
                self.mediate(call, factory, substitute, f),
            )
            .await
        }
    }

    async fn mediate<F, M, Call, Fut, T, E>(
        &self,
        call: InterceptedCall<'_, C, B>,
        factory: &F,
        substitute: Option<&M>,
        f: Call,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        F: ShadowFactory<C, Handle = S> + ?Sized,
        M: ResultSubstitute<T, E> + ?Sized,
        Call: FnOnce(Target<B, S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let InterceptedCall {
            boundary,
            policy,
            resource,
            config,
            business,
        } = call;
        let policy = policy.unwrap_or(self.default_policy);

        let ticket = scope::enter(boundary, policy);
        if !ticket.is_entered() {
            dispatch::record_route(Route::Reentrant);
            let value = f(Target::Business(business))
                .await
                .map_err(DispatchError::Business)?;
            return Ok(Dispatched {
                value,
                route: Route::Reentrant,
            });
        }

        let traffic = context::current().unwrap_or_default();
        let span = tracing_setup::create_dispatch_span(boundary, resource);
        let lookup_business = business.clone();
        let result = self
            .dispatcher
            .dispatch_with(
                &traffic,
                resource,
                business,
                || self.registry.get_or_create_for(config, lookup_business, factory),
                substitute,
                f,
            )
            .instrument(span)
            .await;
        drop(ticket);
        result
    }

    /// Close every shadow handle; see [`MediatorRegistry::release`].
    pub async fn release(&self) -> usize {
        self.registry.release().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        adapters::factories::FnShadowFactory,
        core::{identity::ResourceDescriptor, marker::TrafficContext},
        ports::resource::ProvisionError,
    };

    #[derive(Clone, Default)]
    struct Queue(Arc<Mutex<Vec<String>>>);

    impl Queue {
        fn send(&self, msg: &str) -> Result<(), String> {
            self.0.lock().unwrap().push(msg.to_string());
            Ok(())
        }

        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ShadowHandle for Queue {}

    type Service = MediationService<ResourceDescriptor, Queue, Queue>;
    type NoShadowQueue = crate::adapters::NoShadow<Queue>;

    fn marked() -> TrafficContext {
        let mut ctx = TrafficContext::root();
        MarkerPropagator::default().mark(&mut ctx);
        ctx
    }

    #[tokio::test]
    async fn test_nested_interception_mediates_once() {
        let service = Service::new(&MediationConfig::default()).unwrap();
        let business = Queue::default();
        let shadow = Queue::default();
        let builds = Arc::new(AtomicUsize::new(0));
        let factory = {
            let shadow = shadow.clone();
            let builds = builds.clone();
            FnShadowFactory::new(move |_cfg: ResourceDescriptor| {
                let shadow = shadow.clone();
                builds.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ProvisionError>(Some(shadow)) }
            })
        };
        let config = ResourceDescriptor::new("mq-1").port(9876);

        let outer = context::with_context(marked(), async {
            service
                .intercept(
                    InterceptedCall::new("mq#send", &config, business.clone()),
                    &factory,
                    |target| async {
                        let queue = target.into_handle();
                        // The high-level send is implemented on top of an instrumented low-level send
                        let inner = service
                            .intercept(
                                InterceptedCall::new("mq#send", &config, queue.clone()),
                                &factory,
                                |target| async move { target.into_handle().send("msg") },
                            )
                            .await
                            .map_err(|e| format!("{e:?}"))?;
                        assert_eq!(inner.route, Route::Reentrant);
                        Ok::<_, String>(())
                    },
                )
                .await
        })
        .await
        .unwrap();

        assert_eq!(outer.route, Route::Shadow);
        assert_eq!(shadow.len(), 1);
        assert_eq!(business.len(), 0);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        service.release().await;
    }

    #[tokio::test]
    async fn test_route_and_provision_duration_are_recorded_on_spans() {
        use tracing_subscriber::layer::SubscriberExt;

        use crate::tracing_setup::capture::RecordedFields;

        let recorded = RecordedFields::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(recorded.clone()));

        let service = Service::new(&MediationConfig::default()).unwrap();
        let factory = FnShadowFactory::new(|_cfg: ResourceDescriptor| async {
            Ok::<_, ProvisionError>(Some(Queue::default()))
        });
        let config = ResourceDescriptor::new("mq-1");
        let sent = context::with_context(marked(), async {
            service
                .intercept(
                    InterceptedCall::new("mq#send", &config, Queue::default()),
                    &factory,
                    |target| async move { target.into_handle().send("msg") },
                )
                .await
        })
        .await
        .unwrap();

        assert_eq!(sent.route, Route::Shadow);
        assert_eq!(recorded.get("dispatch", "route").as_deref(), Some("shadow"));
        assert!(recorded.get("provision_shadow", "duration_ms").is_some());
        service.release().await;
    }

    #[tokio::test]
    async fn test_substitute_answers_marked_call() {
        let service = Service::new(&MediationConfig::default()).unwrap();
        let business = Queue::default();
        let mocks: crate::adapters::MockTable<&str, String> =
            crate::adapters::MockTable::new().with("orders", "ack");
        let config = ResourceDescriptor::new("mq-1");

        let sent = context::with_context(marked(), async {
            service
                .intercept_with(
                    InterceptedCall::new("mq#send", &config, business.clone()).resource("orders"),
                    &NoShadowQueue::new(),
                    Some(&mocks),
                    |target| async move {
                        target.into_handle().send("msg")?;
                        Ok("sent")
                    },
                )
                .await
        })
        .await
        .unwrap();

        assert_eq!(sent.route, Route::Mock);
        assert_eq!(sent.value, "ack");
        assert_eq!(business.len(), 0);
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_outside_context_is_unmarked_unless_named_as_test() {
        let service = Service::new(&MediationConfig::default()).unwrap();
        let business = Queue::default();
        let factory = FnShadowFactory::new(|_cfg: ResourceDescriptor| async {
            Ok::<_, ProvisionError>(Some(Queue::default()))
        });
        let config = ResourceDescriptor::new("mq-1");

        let plain = service
            .intercept(
                InterceptedCall::new("mq#send", &config, business.clone()).resource("orders"),
                &factory,
                |target| async move { target.into_handle().send("msg") },
            )
            .await
            .unwrap();
        assert_eq!(plain.route, Route::Business);
        assert!(service.registry().is_empty());

        let named = service
            .intercept(
                InterceptedCall::new("mq#send", &config, business.clone()).resource("PT_orders"),
                &factory,
                |target| async move { target.into_handle().send("msg") },
            )
            .await
            .unwrap();
        assert_eq!(named.route, Route::Shadow);
        assert_eq!(business.len(), 1);
        service.release().await;
    }
}
