pub mod auth;
pub mod config;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod member_cache;
pub mod permissions;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RelayError, RelayResult};
