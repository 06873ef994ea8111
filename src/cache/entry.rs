//! Cache Entry Module
//!
//! Defines individual cache entries and the TTL convention shared by every driver.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

// == TTL ==
/// Requested lifetime for a stored entry.
///
/// Mirrors the signed convention used across drivers: `0` means the driver's
/// default expiration, a positive value is a lifetime, a negative value means
/// the entry never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the driver's configured default expiration
    #[default]
    Default,
    /// Never expire
    Forever,
    /// Expire after the given duration
    After(Duration),
}

impl Ttl {
    /// Builds a TTL from signed seconds.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => Ttl::Default,
            s if s < 0 => Ttl::Forever,
            s => Ttl::After(Duration::from_secs(s as u64)),
        }
    }

    /// Builds a TTL from signed milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Ttl::Default,
            m if m < 0 => Ttl::Forever,
            m => Ttl::After(Duration::from_millis(m as u64)),
        }
    }

    // == Resolve ==
    /// Resolves the effective lifetime against a driver default.
    ///
    /// Returns `None` when the entry must not expire. A zero default means
    /// entries stored with `Ttl::Default` never expire.
    pub fn resolve(self, default_expiration: Duration) -> Option<Duration> {
        match self {
            Ttl::Default if default_expiration.is_zero() => None,
            Ttl::Default => Some(default_expiration),
            Ttl::Forever => None,
            Ttl::After(duration) => Some(duration),
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Ttl::Default
        } else {
            Ttl::After(duration)
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry expiring after `lifetime`, or never when `None`.
    pub fn new(value: Value, lifetime: Option<Duration>) -> Self {
        let now = current_timestamp_ms();

        Self {
            value,
            created_at: now,
            expires_at: lifetime.map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Checks expiry against an explicit clock reading, for batch sweeps.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry never expires
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
