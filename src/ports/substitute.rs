/// ResultSubstitute defines the port for answering a marked call without
/// touching any resource: a configured mock response, or a configured failure.
///
/// Returning `None` declines, and the call continues through normal routing.
pub trait ResultSubstitute<T, E>: Send + Sync {
    fn substitute(&self, resource: Option<&str>) -> Option<Result<T, E>>;
}
