//! Test-traffic marker detection and propagation.
//!
//! A [`TrafficContext`] is the propagation map attached to one logical call
//! plus a derived "is test traffic" flag. The [`MarkerPropagator`] decides
//! whether a context is marked by walking an ordered list of
//! [`MarkerDetector`]s (first decision wins) and moves the propagation map in
//! and out of transport carriers.
//!
//! Detector precedence is fixed by rank, independent of configuration order:
//! explicit marker key, then reserved resource prefix (bare, then behind each
//! wrapper prefix), then name patterns, then caller-supplied predicates. An
//! explicit marker decides both ways: a present but non-truthy value means
//! "not marked" even when the resource name looks like a test resource.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::models::MarkerConfig,
    ports::{carrier::Carrier, naming::ResourceNamePredicate},
};

/// Default propagation key of the explicit marker.
pub const DEFAULT_MARKER_KEY: &str = "x-shadow-test";
/// Default propagation key of the trace id stamped on root contexts.
pub const DEFAULT_TRACE_ID_KEY: &str = "x-shadow-trace-id";
/// Default reserved prefix of test resource names.
pub const DEFAULT_TEST_PREFIX: &str = "PT_";
/// Value written by [`MarkerPropagator::mark`].
pub const MARKER_VALUE: &str = "true";

/// Errors raised while building marker rules
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MarkerError {
    #[error("Invalid resource name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Marker key must not be empty")]
    EmptyMarkerKey,
}

/// Propagation map of one logical call plus its derived test-traffic flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficContext {
    entries: BTreeMap<String, String>,
    #[serde(default)]
    marked: bool,
}

impl TrafficContext {
    /// Empty, unmarked context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context for a call entering the system, stamped with a new trace
    /// id under [`DEFAULT_TRACE_ID_KEY`]. Use [`MarkerPropagator::root`] when the
    /// trace id key is configured.
    pub fn root() -> Self {
        Self::root_with(DEFAULT_TRACE_ID_KEY)
    }

    /// Fresh context stamped with a new trace id under `trace_id_key`.
    pub fn root_with(trace_id_key: &str) -> Self {
        let mut ctx = Self::new();
        ctx.insert(trace_id_key, uuid::Uuid::new_v4().to_string());
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Trace id under [`DEFAULT_TRACE_ID_KEY`]; see [`MarkerPropagator::trace_id`].
    pub fn trace_id(&self) -> Option<&str> {
        self.get(DEFAULT_TRACE_ID_KEY)
    }

    /// The derived flag, as last evaluated by a [`MarkerPropagator`].
    pub fn is_test_traffic(&self) -> bool {
        self.marked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every propagated value; called when the operation completes.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.marked = false;
    }

    pub(crate) fn set_test_traffic(&mut self, marked: bool) {
        self.marked = marked;
    }
}

/// Which detector produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ExplicitKey,
    ResourcePrefix,
    Pattern,
    Predicate,
}

/// One marker detection strategy.
#[derive(Clone)]
pub enum MarkerDetector {
    /// Decides whenever `key` is present in the propagation map
    ExplicitKey { key: String, truthy: Vec<String> },
    /// Marks resources named `prefix…`, or `wrapper` + `prefix…`
    ResourcePrefix { prefix: String, wrappers: Vec<String> },
    /// Marks resources whose name matches the expression
    Pattern(Regex),
    /// Marks resources recognised by a caller-supplied naming convention
    Predicate(Arc<dyn ResourceNamePredicate>),
}

impl MarkerDetector {
    pub fn kind(&self) -> DetectorKind {
        match self {
            MarkerDetector::ExplicitKey { .. } => DetectorKind::ExplicitKey,
            MarkerDetector::ResourcePrefix { .. } => DetectorKind::ResourcePrefix,
            MarkerDetector::Pattern(_) => DetectorKind::Pattern,
            MarkerDetector::Predicate(_) => DetectorKind::Predicate,
        }
    }

    fn rank(&self) -> u8 {
        match self.kind() {
            DetectorKind::ExplicitKey => 0,
            DetectorKind::ResourcePrefix => 1,
            DetectorKind::Pattern => 2,
            DetectorKind::Predicate => 3,
        }
    }

    /// `Some(decision)` when this detector is conclusive, `None` to defer.
    pub fn evaluate(&self, ctx: &TrafficContext, resource: Option<&str>) -> Option<bool> {
        match self {
            MarkerDetector::ExplicitKey { key, truthy } => ctx.get(key).map(|value| {
                let value = value.trim();
                truthy.iter().any(|t| t.eq_ignore_ascii_case(value))
            }),
            MarkerDetector::ResourcePrefix { prefix, wrappers } => {
                let name = resource?;
                let matched = name.starts_with(prefix.as_str())
                    || wrappers.iter().any(|wrapper| {
                        name.strip_prefix(wrapper.as_str())
                            .is_some_and(|rest| rest.starts_with(prefix.as_str()))
                    });
                matched.then_some(true)
            }
            MarkerDetector::Pattern(regex) => resource
                .filter(|name| regex.is_match(name))
                .map(|_| true),
            MarkerDetector::Predicate(predicate) => resource
                .filter(|name| predicate.is_test_resource(name))
                .map(|_| true),
        }
    }
}

impl fmt::Debug for MarkerDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerDetector::ExplicitKey { key, truthy } => f
                .debug_struct("ExplicitKey")
                .field("key", key)
                .field("truthy", truthy)
                .finish(),
            MarkerDetector::ResourcePrefix { prefix, wrappers } => f
                .debug_struct("ResourcePrefix")
                .field("prefix", prefix)
                .field("wrappers", wrappers)
                .finish(),
            MarkerDetector::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            MarkerDetector::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Outcome of a marker evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub marked: bool,
    /// `None` when no detector was conclusive
    pub decided_by: Option<DetectorKind>,
}

/// Ordered detector list plus the set of keys carried across boundaries.
#[derive(Debug, Clone)]
pub struct MarkerRules {
    marker_key: String,
    trace_id_key: String,
    propagation_keys: BTreeSet<String>,
    detectors: Vec<MarkerDetector>,
}

impl MarkerRules {
    /// Build rules from configuration.
    pub fn from_config(config: &MarkerConfig) -> Result<Self, MarkerError> {
        if config.marker_key.trim().is_empty() {
            return Err(MarkerError::EmptyMarkerKey);
        }

        let mut detectors = vec![MarkerDetector::ExplicitKey {
            key: config.marker_key.clone(),
            truthy: config.truthy_values.clone(),
        }];
        if let Some(prefix) = config.test_prefix.as_ref().filter(|p| !p.is_empty()) {
            detectors.push(MarkerDetector::ResourcePrefix {
                prefix: prefix.clone(),
                wrappers: config.wrapper_prefixes.clone(),
            });
        }
        for pattern in &config.patterns {
            let regex = Regex::new(pattern).map_err(|source| MarkerError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            detectors.push(MarkerDetector::Pattern(regex));
        }

        let mut propagation_keys: BTreeSet<String> =
            config.propagation_keys.iter().cloned().collect();
        propagation_keys.insert(config.marker_key.clone());
        propagation_keys.insert(config.trace_id_key.clone());

        Ok(Self {
            marker_key: config.marker_key.clone(),
            trace_id_key: config.trace_id_key.clone(),
            propagation_keys,
            detectors,
        })
    }

    /// Add a detector; it is evaluated according to its rank, not insertion order.
    pub fn with_detector(mut self, detector: MarkerDetector) -> Self {
        self.detectors.push(detector);
        self.detectors.sort_by_key(MarkerDetector::rank);
        self
    }

    /// Add a caller-supplied naming convention.
    pub fn with_predicate(self, predicate: impl ResourceNamePredicate) -> Self {
        self.with_detector(MarkerDetector::Predicate(Arc::new(predicate)))
    }

    /// Carry one more key across boundaries.
    pub fn with_propagation_key(mut self, key: impl Into<String>) -> Self {
        self.propagation_keys.insert(key.into());
        self
    }

    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    pub fn trace_id_key(&self) -> &str {
        &self.trace_id_key
    }

    pub fn propagation_keys(&self) -> impl Iterator<Item = &str> {
        self.propagation_keys.iter().map(String::as_str)
    }

    pub fn detectors(&self) -> &[MarkerDetector] {
        &self.detectors
    }

    fn detect(&self, ctx: &TrafficContext, resource: Option<&str>) -> Detection {
        for detector in &self.detectors {
            if let Some(marked) = detector.evaluate(ctx, resource) {
                return Detection {
                    marked,
                    decided_by: Some(detector.kind()),
                };
            }
        }
        Detection {
            marked: false,
            decided_by: None,
        }
    }
}

impl Default for MarkerRules {
    fn default() -> Self {
        let config = MarkerConfig::default();
        let mut propagation_keys: BTreeSet<String> =
            config.propagation_keys.iter().cloned().collect();
        propagation_keys.insert(config.marker_key.clone());
        propagation_keys.insert(config.trace_id_key.clone());
        Self {
            detectors: vec![
                MarkerDetector::ExplicitKey {
                    key: config.marker_key.clone(),
                    truthy: config.truthy_values,
                },
                MarkerDetector::ResourcePrefix {
                    prefix: DEFAULT_TEST_PREFIX.to_string(),
                    wrappers: config.wrapper_prefixes,
                },
            ],
            marker_key: config.marker_key,
            trace_id_key: config.trace_id_key,
            propagation_keys,
        }
    }
}

/// Stamps, detects and carries the test-traffic marker.
///
/// Rules live behind an `ArcSwap` so they can be replaced at runtime without
/// blocking readers.
pub struct MarkerPropagator {
    rules: ArcSwap<MarkerRules>,
}

impl MarkerPropagator {
    pub fn new(rules: MarkerRules) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    pub fn from_config(config: &MarkerConfig) -> Result<Self, MarkerError> {
        Ok(Self::new(MarkerRules::from_config(config)?))
    }

    /// Current rule set.
    pub fn rules(&self) -> Arc<MarkerRules> {
        self.rules.load_full()
    }

    /// Replace the rule set; in-flight evaluations finish with the old one.
    pub fn reload(&self, rules: MarkerRules) {
        tracing::info!(
            marker_key = rules.marker_key(),
            detectors = rules.detectors().len(),
            "Marker rules reloaded"
        );
        self.rules.store(Arc::new(rules));
    }

    /// Whether the context alone (its propagation map) marks the call.
    pub fn is_marked(&self, ctx: &TrafficContext) -> bool {
        self.detect(ctx, None).marked
    }

    /// Whether the call is marked, also considering the target resource name.
    pub fn is_marked_for(&self, ctx: &TrafficContext, resource: &str) -> bool {
        self.detect(ctx, Some(resource)).marked
    }

    pub fn detect(&self, ctx: &TrafficContext, resource: Option<&str>) -> Detection {
        self.rules.load().detect(ctx, resource)
    }

    /// Fresh root context stamped with a trace id under the configured key.
    pub fn root(&self) -> TrafficContext {
        TrafficContext::root_with(self.rules.load().trace_id_key())
    }

    /// Trace id of `ctx` under the configured key.
    pub fn trace_id<'a>(&self, ctx: &'a TrafficContext) -> Option<&'a str> {
        ctx.get(self.rules.load().trace_id_key())
    }

    /// Stamp the context as test traffic.
    pub fn mark(&self, ctx: &mut TrafficContext) {
        let rules = self.rules.load();
        ctx.insert(rules.marker_key(), MARKER_VALUE);
        ctx.set_test_traffic(true);
    }

    /// Re-derive the context's flag from its propagation map.
    pub fn refresh(&self, ctx: &mut TrafficContext) -> bool {
        let marked = self.is_marked(ctx);
        ctx.set_test_traffic(marked);
        marked
    }

    /// Write the full propagation map into a caller-supplied carrier.
    ///
    /// Entries the transport cannot represent are skipped with a warning.
    /// Returns the number of entries written.
    pub fn inject<K>(&self, ctx: &TrafficContext, carrier: &mut K) -> usize
    where
        K: Carrier + ?Sized,
    {
        let mut written = 0;
        for (key, value) in ctx.entries() {
            match carrier.set(key, value) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(key, error = %e, "Skipping unpropagatable context entry"),
            }
        }
        written
    }

    /// Serialise the context into a new carrier.
    pub fn propagate<K>(&self, ctx: &TrafficContext) -> K
    where
        K: Carrier + Default,
    {
        let mut carrier = K::default();
        self.inject(ctx, &mut carrier);
        carrier
    }

    /// Rebuild a context from an inbound carrier.
    ///
    /// Only propagation keys are copied; unrelated carrier entries (ordinary
    /// headers, message properties) are ignored.
    pub fn adopt<K>(&self, carrier: &K) -> TrafficContext
    where
        K: Carrier + ?Sized,
    {
        let rules = self.rules.load();
        let mut ctx = TrafficContext::new();
        for key in rules.propagation_keys() {
            if let Some(value) = carrier.get(key) {
                ctx.insert(key, value);
            }
        }
        let marked = rules.detect(&ctx, None).marked;
        ctx.set_test_traffic(marked);
        ctx
    }
}

impl Default for MarkerPropagator {
    fn default() -> Self {
        Self::new(MarkerRules::default())
    }
}
