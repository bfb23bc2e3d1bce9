//! Access-token storage capability.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default token lifetime. Service tokens expire at 60 minutes; renewing
/// five minutes early avoids racing the boundary.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// Key-value storage for the bearer token obtained out-of-band.
///
/// Injected so hosts can back it with platform storage; expired entries
/// read as absent.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, value: String);
    fn clear(&self);
}

struct StoredToken {
    value: String,
    expiry: Instant,
}

/// In-memory store with a TTL.
pub struct MemoryTokenStore {
    ttl: Duration,
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(stored) if stored.expiry > Instant::now() => Some(stored.value.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    fn set(&self, value: String) {
        *self.slot.lock() = Some(StoredToken {
            value,
            expiry: Instant::now() + self.ttl,
        });
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }
}
