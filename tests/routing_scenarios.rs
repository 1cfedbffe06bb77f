use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use shadowline::{
    DispatchError, Route,
    adapters::{FnShadowFactory, MockTable, NoShadow},
    config::MediationConfig,
    core::{InterceptedCall, MediationService, ResourceDescriptor, TrafficContext, context},
    ports::resource::{ProvisionError, ProvisionResult, ShadowFactory, ShadowHandle},
};

/// In-memory key/value store standing in for a cache client.
#[derive(Clone, Default)]
struct Cache {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl Cache {
    fn put(&self, key: &str, value: &str) -> Result<(), String> {
        if key.is_empty() {
            return Err("empty key".to_string());
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl ShadowHandle for Cache {}

type Service = MediationService<ResourceDescriptor, Cache, Cache>;

fn redis() -> ResourceDescriptor {
    ResourceDescriptor::new("redis-1").port(6379).namespace("0")
}

fn marked(service: &Service) -> TrafficContext {
    let mut ctx = TrafficContext::root();
    service.propagator().mark(&mut ctx);
    ctx
}

/// Hands out one shared shadow cache, the way a namespace-prefixing cache adapter would.
struct SharedShadow(Cache);

#[async_trait]
impl ShadowFactory<ResourceDescriptor> for SharedShadow {
    type Handle = Cache;

    async fn build(&self, _config: &ResourceDescriptor) -> ProvisionResult<Option<Cache>> {
        Ok(Some(self.0.clone()))
    }
}

fn shadow_factory(shadow: &Cache) -> SharedShadow {
    SharedShadow(shadow.clone())
}

async fn put<F>(
    service: &Service,
    traffic: TrafficContext,
    business: &Cache,
    factory: &F,
    key: &str,
) -> Result<Route, DispatchError<String>>
where
    F: ShadowFactory<ResourceDescriptor, Handle = Cache>,
{
    let config = redis();
    context::with_context(traffic, async {
        service
            .intercept(
                InterceptedCall::new("redis#Jedis_set", &config, business.clone()),
                factory,
                |target| async move { target.into_handle().put(key, "v") },
            )
            .await
            .map(|dispatched| dispatched.route)
    })
    .await
}

#[tokio::test]
async fn test_unmarked_call_with_shadow_uses_business() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);

    let route = put(&service, TrafficContext::root(), &business, &factory, "k")
        .await
        .unwrap();

    assert_eq!(route, Route::Business);
    assert_eq!(business.len(), 1);
    assert_eq!(shadow.len(), 0);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_marked_call_without_shadow_passes_through() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let business = Cache::default();
    let factory = NoShadow::<Cache>::new();

    let route = put(&service, marked(&service), &business, &factory, "k")
        .await
        .unwrap();

    assert_eq!(route, Route::Fallback);
    assert_eq!(business.len(), 1);
    service.release().await;
}

#[tokio::test]
async fn test_marked_call_never_touches_business_state() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);

    for key in ["a", "b", "c"] {
        let route = put(&service, marked(&service), &business, &factory, key)
            .await
            .unwrap();
        assert_eq!(route, Route::Shadow);
    }

    assert_eq!(business.len(), 0);
    assert_eq!(shadow.len(), 3);
    service.release().await;
}

#[tokio::test]
async fn test_shadow_failure_is_surfaced_not_hidden() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);

    let err = put(&service, marked(&service), &business, &factory, "")
        .await
        .unwrap_err();

    assert!(err.is_test_path_failure());
    assert!(matches!(err, DispatchError::Shadow { .. }));
    assert_eq!(business.len(), 0);
    service.release().await;
}

#[tokio::test]
async fn test_broken_provisioning_falls_back() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let business = Cache::default();
    let factory = FnShadowFactory::new(|_cfg: ResourceDescriptor| async {
        Err::<Option<Cache>, _>(ProvisionError::Connection("shadow cluster unreachable".to_string()))
    });

    let route = put(&service, marked(&service), &business, &factory, "k")
        .await
        .unwrap();

    assert_eq!(route, Route::Fallback);
    assert_eq!(business.len(), 1);
    service.release().await;
}

#[tokio::test]
async fn test_switch_off_rejects_test_traffic() {
    let mut config = MediationConfig::default();
    config.routing.enabled = false;
    let service = Service::new(&config).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);

    let err = put(&service, marked(&service), &business, &factory, "k")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::SwitchedOff));
    assert_eq!(business.len() + shadow.len(), 0);

    // Production traffic is unaffected by the switch
    let route = put(&service, TrafficContext::root(), &business, &factory, "k")
        .await
        .unwrap();
    assert_eq!(route, Route::Business);

    service.dispatcher().set_enabled(true);
    let route = put(&service, marked(&service), &business, &factory, "k")
        .await
        .unwrap();
    assert_eq!(route, Route::Shadow);
    service.release().await;
}

#[tokio::test]
async fn test_inbound_carrier_drives_routing() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);

    let mut upstream = marked(&service);
    upstream.insert("x-unrelated", "kept local");
    let headers: http::HeaderMap = service.propagator().propagate(&upstream);

    let inbound = service.propagator().adopt(&headers);
    assert!(inbound.get("x-unrelated").is_none());

    let route = put(&service, inbound, &business, &factory, "k").await.unwrap();
    assert_eq!(route, Route::Shadow);
    service.release().await;
}

#[tokio::test]
async fn test_concurrent_unframed_calls_do_not_gate_each_other() {
    let service = Service::new(&MediationConfig::default()).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);
    let config = redis();

    // Both calls share one current-thread worker and neither opens a context
    let production = service.intercept(
        InterceptedCall::new("mq#send", &config, business.clone()).resource("orders"),
        &factory,
        |target| async move {
            target.into_handle().put("prod", "v")?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(())
        },
    );
    let test = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        service
            .intercept(
                InterceptedCall::new("mq#send", &config, business.clone()).resource("PT_orders"),
                &factory,
                |target| async move { target.into_handle().put("test", "v") },
            )
            .await
    };

    let (production, test) = tokio::join!(production, test);
    assert_eq!(production.unwrap().route, Route::Business);
    assert_eq!(test.unwrap().route, Route::Shadow);
    assert_eq!(business.len(), 1);
    assert_eq!(shadow.len(), 1);
    service.release().await;
}

#[tokio::test]
async fn test_whitelist_and_substitute_routes() {
    let mut config = MediationConfig::default();
    config.routing.whitelist = vec!["geo#lookup".to_string()];
    let service = Service::new(&config).unwrap();
    let (business, shadow) = (Cache::default(), Cache::default());
    let factory = shadow_factory(&shadow);
    let mocks: MockTable<&str, String> = MockTable::new().with("inventory#reserve", "reserved");
    let redis = redis();

    let routed = |resource: &'static str| {
        let business = business.clone();
        let (factory, mocks, redis, service) = (&factory, &mocks, &redis, &service);
        context::with_context(marked(service), async move {
            service
                .intercept_with(
                    InterceptedCall::new("rpc#invoke", redis, business).resource(resource),
                    factory,
                    Some(mocks),
                    |target| async move {
                        target.into_handle().put(resource, "v")?;
                        Ok("called")
                    },
                )
                .await
        })
    };

    let whitelisted = routed("geo#lookup").await.unwrap();
    assert_eq!(whitelisted.route, Route::Whitelisted);
    assert_eq!(whitelisted.value, "called");
    assert_eq!(business.len(), 1);

    let mocked = routed("inventory#reserve").await.unwrap();
    assert_eq!(mocked.route, Route::Mock);
    assert_eq!(mocked.value, "reserved");
    assert_eq!(business.len() + shadow.len(), 1);

    let unlisted = routed("billing#charge").await.unwrap();
    assert_eq!(unlisted.route, Route::Shadow);
    assert_eq!(shadow.len(), 1);
    service.release().await;
}
