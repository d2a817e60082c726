//! Per-identity serialization for attendance writes.
//!
//! Recognize is a read-then-write sequence over the day's sessions; two
//! concurrent captures for the same identity must not both observe "no
//! open session" and both record a check-in. The gate hands out one async
//! mutex per identity id, held across read, resolve, and write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct IdentityGate {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl IdentityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding attendance writes for one identity.
    pub fn lock_for(&self, identity_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(identity_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_identity_shares_a_lock() {
        let gate = IdentityGate::new();
        let a = gate.lock_for("x");
        let b = gate.lock_for("x");
        let c = gate.lock_for("y");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
