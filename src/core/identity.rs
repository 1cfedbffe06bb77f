//! Canonical identities for external resources.
//!
//! A [`ResourceDescriptor`] is the middleware-neutral view of an external
//! resource configuration (endpoint, port, namespace, credential token,
//! principal). [`IdentityResolver::resolve`] turns it into a
//! [`ResourceIdentity`], the comparable key used by the mediator registry.
//!
//! Every descriptor renders to exactly five segments joined by `|`. Absent and
//! empty optional fields both render as an empty segment, and segment text is
//! escaped so two identities compare equal iff every field is equal.
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Segment separator of the canonical key.
pub const SEPARATOR: char = '|';

const ESCAPE: char = '\\';
const REDACTED: &str = "***";

/// Errors raised while resolving a resource identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    /// A structurally required field is missing or blank
    #[error("Resource configuration is missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for identity resolution
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Middleware-neutral description of an external resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDescriptor {
    /// Host, quorum or broker list the resource lives on
    pub endpoint: Option<String>,
    /// Client port, kept as text because most middleware configs store it that way
    pub port: Option<String>,
    /// Namespace, database, virtual host or znode path
    pub namespace: Option<String>,
    /// Optional credential token
    pub credential_token: Option<String>,
    /// Optional principal (user name)
    pub principal: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn port(mut self, port: impl ToString) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn credential_token(mut self, token: impl Into<String>) -> Self {
        self.credential_token = Some(token.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

/// Immutable cache key for one external resource.
///
/// Equality and hashing only look at the canonical key. The `Display`
/// implementation never prints the credential token.
#[derive(Clone)]
pub struct ResourceIdentity {
    key: Arc<str>,
    redacted: Arc<str>,
}

impl ResourceIdentity {
    /// The canonical key, credential token included.
    pub fn as_key(&self) -> &str {
        &self.key
    }

    /// The loggable form with the credential token masked.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl PartialEq for ResourceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ResourceIdentity {}

impl Hash for ResourceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceIdentity")
            .field(&&*self.redacted)
            .finish()
    }
}

/// Derives [`ResourceIdentity`] values from descriptors.
pub struct IdentityResolver;

impl IdentityResolver {
    /// Resolve a descriptor into its canonical identity.
    ///
    /// Pure and side-effect free. Fails only when the endpoint is absent or blank.
    pub fn resolve(descriptor: &ResourceDescriptor) -> IdentityResult<ResourceIdentity> {
        let endpoint = descriptor
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or(IdentityError::MissingField("endpoint"))?;

        let token = descriptor.credential_token.as_deref();
        let segments = [
            Some(endpoint),
            descriptor.port.as_deref(),
            descriptor.namespace.as_deref(),
            token,
            descriptor.principal.as_deref(),
        ];
        let key = join_segments(segments);

        let masked_token = token.filter(|t| !t.is_empty()).map(|_| REDACTED);
        let redacted = join_segments([
            segments[0],
            segments[1],
            segments[2],
            masked_token,
            segments[4],
        ]);

        Ok(ResourceIdentity {
            key: key.into(),
            redacted: redacted.into(),
        })
    }
}

fn join_segments(segments: [Option<&str>; 5]) -> String {
    let mut key = String::new();
    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        for c in segment.unwrap_or_default().chars() {
            if c == SEPARATOR || c == ESCAPE {
                key.push(ESCAPE);
            }
            key.push(c);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zk() -> ResourceDescriptor {
        ResourceDescriptor::new("zk1,zk2")
            .port(2181)
            .namespace("/hbase")
    }

    #[test]
    fn test_resolve_joins_all_segments() {
        let identity = IdentityResolver::resolve(&zk()).unwrap();
        assert_eq!(identity.as_key(), "zk1,zk2|2181|/hbase||");
    }

    #[test]
    fn test_identical_descriptors_are_equal() {
        let a = IdentityResolver::resolve(&zk()).unwrap();
        let b = IdentityResolver::resolve(&zk()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_credential_token_distinguishes() {
        let a = IdentityResolver::resolve(&zk().credential_token("t1")).unwrap();
        let b = IdentityResolver::resolve(&zk().credential_token("t2")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_and_empty_optional_fields_collapse() {
        let absent = IdentityResolver::resolve(&zk()).unwrap();
        let empty = IdentityResolver::resolve(&zk().credential_token("")).unwrap();
        let present = IdentityResolver::resolve(&zk().credential_token("x")).unwrap();
        assert_eq!(absent, empty);
        assert_ne!(absent, present);
    }

    #[test]
    fn test_segment_shift_does_not_collide() {
        let a = IdentityResolver::resolve(&ResourceDescriptor::new("h").namespace("a|b")).unwrap();
        let b = IdentityResolver::resolve(
            &ResourceDescriptor::new("h")
                .namespace("a")
                .credential_token("b"),
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        let err = IdentityResolver::resolve(&ResourceDescriptor::default()).unwrap_err();
        assert_eq!(err, IdentityError::MissingField("endpoint"));

        let blank = IdentityResolver::resolve(&ResourceDescriptor::new("  "));
        assert!(blank.is_err());
    }

    #[test]
    fn test_display_redacts_token() {
        let identity =
            IdentityResolver::resolve(&zk().credential_token("secret").principal("app")).unwrap();
        assert_eq!(identity.to_string(), "zk1,zk2|2181|/hbase|***|app");
        assert!(!format!("{identity:?}").contains("secret"));
        assert!(identity.as_key().contains("secret"));
    }
}
