//! Error types for flashguard

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache, lock and seckill layers
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Gateway Errors
    // =========================================================================
    /// Generic cache gateway failure
    #[error("Cache gateway error: {0}")]
    Gateway(String),

    /// Redis command failed
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection pool could not hand out a connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Cache / Lock Errors
    // =========================================================================
    /// Rebuild lock stayed contended past the retry deadline
    #[error("Key {key} is busy: rebuild lock not acquired within {waited:?}")]
    Busy { key: String, waited: Duration },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Authoritative store failure (raised by fallbacks and store adapters)
    #[error("Store error: {0}")]
    Store(String),

    /// Unique constraint on (user_id, voucher_id) violated
    #[error("Order already exists for user {user_id} and voucher {voucher_id}")]
    DuplicateOrder { user_id: u64, voucher_id: u64 },

    // =========================================================================
    // Misc
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error came from the shared cache/lock store rather than
    /// from the caller's data.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Gateway(_) | Error::Pool(_) => true,
            #[cfg(feature = "redis")]
            Error::Redis(_) => true,
            _ => false,
        }
    }
}
