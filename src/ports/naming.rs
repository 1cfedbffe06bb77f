/// ResourceNamePredicate defines the port for caller-supplied naming conventions
/// used to recognise test resources (a reserved queue, table or topic name).
pub trait ResourceNamePredicate: Send + Sync + 'static {
    /// Whether `resource` names a test resource
    fn is_test_resource(&self, resource: &str) -> bool;
}

impl<F> ResourceNamePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn is_test_resource(&self, resource: &str) -> bool {
        self(resource)
    }
}
