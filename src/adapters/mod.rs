pub mod carriers;
pub mod factories;
pub mod substitutes;

/// Re-export commonly used types from adapters
pub use factories::{FnShadowFactory, NoShadow};
pub use substitutes::{FnSubstitute, MockTable};
