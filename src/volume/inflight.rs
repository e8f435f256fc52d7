//! In-flight Operation Registry
//!
//! Serializes mutating operations per key. A second request for a key that
//! is already held fails fast instead of queueing, leaving retry pacing to
//! the orchestrator. Keys are released by dropping the returned guard, so
//! early returns, cancelled futures and unwinding panics all release them.

use crate::error::{Error, Result};
use dashmap::DashSet;
use std::fmt;

/// Target component used for controller-side operations
const CONTROLLER_TARGET: &str = "controller";

// =============================================================================
// In-flight Key
// =============================================================================

/// Key identifying one serialized unit of work: a volume plus either a node
/// target path or the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey(String);

impl InFlightKey {
    /// Key for provision/delete/expand of a volume
    pub fn controller(volume: &str) -> Self {
        Self(format!("{}/{}", volume, CONTROLLER_TARGET))
    }

    /// Key for mount/unmount of a volume at a node target path
    pub fn target(volume: &str, target_path: &str) -> Self {
        Self(format!("{}/{}", volume, target_path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InFlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Process-local set of in-flight keys
#[derive(Debug, Default)]
pub struct InFlight {
    keys: DashSet<String>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as in flight. Returns false when it is already held.
    pub fn try_acquire(&self, key: &InFlightKey) -> bool {
        self.keys.insert(key.0.clone())
    }

    /// Release `key`; releasing a key that is not held is a no-op
    pub fn release(&self, key: &InFlightKey) {
        self.keys.remove(&key.0);
    }

    /// Acquire `key` and return a guard that releases it on drop
    pub fn acquire(&self, key: InFlightKey) -> Result<InFlightGuard<'_>> {
        if !self.try_acquire(&key) {
            return Err(Error::OperationInProgress { key: key.0 });
        }
        Ok(InFlightGuard {
            registry: self,
            key,
        })
    }

    pub fn is_in_flight(&self, key: &InFlightKey) -> bool {
        self.keys.contains(&key.0)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Holds an in-flight key until dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    registry: &'a InFlight,
    key: InFlightKey,
}

impl InFlightGuard<'_> {
    pub fn key(&self) -> &InFlightKey {
        &self.key
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
