pub mod carrier;
pub mod naming;
pub mod resource;
pub mod substitute;
