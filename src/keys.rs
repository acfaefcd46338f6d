// src/keys.rs
use crate::error::ApiError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin pool of upstream API keys.
///
/// The cursor only moves forward. `rotate_from` advances it only if it still
/// points at the key that failed, so concurrent requests that all hit the same
/// exhausted key rotate past it once instead of skipping healthy keys.
pub struct ApiKeyManager {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl ApiKeyManager {
    pub fn new(keys: Vec<String>) -> Result<Self, ApiError> {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(ApiError::Internal(
                "no upstream API keys configured".to_string(),
            ));
        }
        Ok(ApiKeyManager {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the cursor position and the key it selects.
    pub fn current(&self) -> (usize, &str) {
        let slot = self.cursor.load(Ordering::Acquire);
        (slot, &self.keys[slot % self.keys.len()])
    }

    /// Moves past the key at `slot`. Returns the key now in use.
    pub fn rotate_from(&self, slot: usize) -> &str {
        let _ = self.cursor.compare_exchange(
            slot,
            slot.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.current().1
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Position of the active key in the pool, for logs. Never the key itself.
    pub fn position(&self, slot: usize) -> usize {
        slot % self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(keys: &[&str]) -> ApiKeyManager {
        ApiKeyManager::new(keys.iter().map(|k| k.to_string()).collect()).unwrap()
    }

    #[test]
    fn rotation_is_round_robin() {
        let keys = manager(&["a", "b", "c"]);
        assert_eq!(keys.current().1, "a");
        assert_eq!(keys.rotate_from(keys.current().0), "b");
        assert_eq!(keys.rotate_from(keys.current().0), "c");
        assert_eq!(keys.rotate_from(keys.current().0), "a");
    }

    #[test]
    fn single_key_rotates_to_itself() {
        let keys = manager(&["only"]);
        assert_eq!(keys.rotate_from(keys.current().0), "only");
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn stale_rotation_does_not_skip_keys() {
        let keys = manager(&["a", "b", "c"]);
        let (slot, _) = keys.current();
        assert_eq!(keys.rotate_from(slot), "b");
        // A second request that saw the same failed slot must not move the cursor again.
        assert_eq!(keys.rotate_from(slot), "b");
    }

    #[test]
    fn blank_keys_are_discarded() {
        assert!(ApiKeyManager::new(vec!["  ".to_string()]).is_err());
        let keys = manager(&[" a ", "", "b"]);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.current().1, "a");
    }
}
