use std::cell::RefCell;
use std::collections::HashMap;

use catalog_utils::EntityKey;

/// How many times each entity has been released. A fetch takes a [`Generation`] before it
/// suspends and caches its result only if the entity was not released in the meantime.
#[derive(Default)]
pub(crate) struct Releases {
    counts: RefCell<HashMap<EntityKey, u64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Generation(u64);

impl Releases {
    pub fn mark(&self, key: &EntityKey) {
        *self.counts.borrow_mut().entry(key.clone()).or_default() += 1;
    }

    pub fn generation(&self, key: &EntityKey) -> Generation {
        Generation(self.counts.borrow().get(key).copied().unwrap_or(0))
    }

    pub fn released_since(&self, key: &EntityKey, generation: Generation) -> bool {
        self.generation(key) != generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_moves_only_its_own_key() {
        let releases = Releases::default();
        let key = EntityKey::new("tool-1");
        let other = EntityKey::new("tool-2");

        let before = releases.generation(&key);
        let other_before = releases.generation(&other);
        releases.mark(&key);

        assert!(releases.released_since(&key, before));
        assert!(!releases.released_since(&other, other_before));
        assert!(!releases.released_since(&key, releases.generation(&key)));
    }
}
