//! Carrier implementations for common transport containers.
use std::collections::{BTreeMap, HashMap};

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::ports::carrier::{Carrier, CarrierError};

impl Carrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CarrierError> {
        self.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl Carrier for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CarrierError> {
        self.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// HTTP headers; names are case-insensitive and values must be visible ASCII.
impl Carrier for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|value| value.to_str().ok())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CarrierError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| CarrierError::InvalidKey(key.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|_| CarrierError::InvalidValue {
            key: key.to_string(),
        })?;
        self.insert(name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::marker::{DEFAULT_MARKER_KEY, MarkerPropagator, TrafficContext};

    #[test]
    fn test_header_map_round_trip() {
        let propagator = MarkerPropagator::default();
        let mut ctx = TrafficContext::root();
        propagator.mark(&mut ctx);

        let headers: HeaderMap = propagator.propagate(&ctx);
        assert_eq!(
            Carrier::get(&headers, DEFAULT_MARKER_KEY),
            Some("true")
        );

        let adopted = propagator.adopt(&headers);
        assert!(adopted.is_test_traffic());
        assert_eq!(adopted.trace_id(), ctx.trace_id());
    }

    #[test]
    fn test_header_map_rejects_unrepresentable_entries() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            headers.set("bad key", "v"),
            Err(CarrierError::InvalidKey(_))
        ));
        assert!(matches!(
            headers.set("x-ok", "line\nbreak"),
            Err(CarrierError::InvalidValue { .. })
        ));

        let propagator = MarkerPropagator::default();
        let mut ctx = TrafficContext::new();
        ctx.insert("x-note", "multi\nline");
        ctx.insert(DEFAULT_MARKER_KEY, "true");
        assert_eq!(propagator.inject(&ctx, &mut headers), 1);
    }

    #[test]
    fn test_btree_map_carrier() {
        let mut carrier: BTreeMap<String, String> = BTreeMap::new();
        carrier.set("k", "v").unwrap();
        assert_eq!(Carrier::get(&carrier, "k"), Some("v"));
        assert_eq!(Carrier::get(&carrier, "missing"), None);
    }
}
