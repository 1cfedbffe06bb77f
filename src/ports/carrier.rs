use thiserror::Error;

/// Error type for carrier writes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CarrierError {
    /// The key cannot be represented in the transport
    #[error("Invalid carrier key: {0}")]
    InvalidKey(String),

    /// The value cannot be represented in the transport
    #[error("Invalid carrier value for key '{key}'")]
    InvalidValue { key: String },
}

/// Carrier defines the port for transport-native propagation containers
/// (header sets, message properties, RPC attachments).
pub trait Carrier {
    /// Read a propagated value
    fn get(&self, key: &str) -> Option<&str>;

    /// Write a propagated value, replacing any previous one
    fn set(&mut self, key: &str, value: &str) -> Result<(), CarrierError>;
}
