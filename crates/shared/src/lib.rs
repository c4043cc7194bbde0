//! Shared wire types for chatwire clients and servers.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
