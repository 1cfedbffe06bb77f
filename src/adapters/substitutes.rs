//! Ready-made result substitutes for marked calls.
use std::{collections::HashMap, fmt, marker::PhantomData};

use crate::ports::substitute::ResultSubstitute;

/// Substitute backed by a closure receiving the resource name.
#[derive(Clone)]
pub struct FnSubstitute<F> {
    answer: F,
}

impl<F> FnSubstitute<F> {
    pub fn new<T, E>(answer: F) -> Self
    where
        F: Fn(Option<&str>) -> Option<Result<T, E>> + Send + Sync,
    {
        Self { answer }
    }
}

impl<F> fmt::Debug for FnSubstitute<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSubstitute(..)")
    }
}

impl<T, E, F> ResultSubstitute<T, E> for FnSubstitute<F>
where
    F: Fn(Option<&str>) -> Option<Result<T, E>> + Send + Sync,
{
    fn substitute(&self, resource: Option<&str>) -> Option<Result<T, E>> {
        (self.answer)(resource)
    }
}

/// Fixed mock responses keyed by resource name.
///
/// Resources without an entry are routed normally.
pub struct MockTable<T, E> {
    responses: HashMap<String, T>,
    _error: PhantomData<fn() -> E>,
}

impl<T, E> MockTable<T, E> {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            _error: PhantomData,
        }
    }

    /// Answer marked calls on `resource` with `response`.
    pub fn with(mut self, resource: impl Into<String>, response: T) -> Self {
        self.responses.insert(resource.into(), response);
        self
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl<T, E> Default for MockTable<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, E> fmt::Debug for MockTable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTable")
            .field("responses", &self.responses)
            .finish()
    }
}

impl<T, E> ResultSubstitute<T, E> for MockTable<T, E>
where
    T: Clone + Send + Sync,
{
    fn substitute(&self, resource: Option<&str>) -> Option<Result<T, E>> {
        resource
            .and_then(|name| self.responses.get(name))
            .map(|response| Ok(response.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_table_answers_listed_resources_only() {
        let table: MockTable<&str, String> = MockTable::new().with("inventory#reserve", "{\"ok\":true}");
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.substitute(Some("inventory#reserve")),
            Some(Ok("{\"ok\":true}"))
        );
        assert_eq!(table.substitute(Some("billing#charge")), None);
        assert_eq!(table.substitute(None), None);
    }

    #[test]
    fn test_fn_substitute_can_fail() {
        let blocked = FnSubstitute::new(|resource: Option<&str>| {
            resource
                .filter(|name| name.starts_with("payments"))
                .map(|name| Err::<u32, _>(format!("{name} is blocked for test traffic")))
        });
        assert_eq!(
            blocked.substitute(Some("payments#refund")),
            Some(Err("payments#refund is blocked for test traffic".to_string()))
        );
        assert_eq!(blocked.substitute(Some("orders")), None);
    }
}
