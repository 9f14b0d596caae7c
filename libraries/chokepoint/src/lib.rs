//! Single-flight request coalescing for single-threaded executors.
//!
//! While a computation for a key is running, every other caller asking for the same key awaits
//! the same shared future instead of starting a new one. Once it settles the entry is dropped, so
//! the next call after that computes afresh. Caching finished values is left to the caller.

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

type InFlight<V, E> = Shared<LocalBoxFuture<'static, Result<V, E>>>;

pub struct ChokePoint<K, V, E> {
    in_flight: Rc<RefCell<HashMap<K, InFlight<V, E>>>>,
}

impl<K, V, E> Default for ChokePoint<K, V, E> {
    fn default() -> Self {
        Self {
            in_flight: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<K, V, E> Clone for ChokePoint<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Rc::clone(&self.in_flight),
        }
    }
}

impl<K, V, E> ChokePoint<K, V, E>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` unless a computation for `key` is already in flight, in which case its
    /// result is shared. `compute` is dropped unpolled when joining an existing computation.
    pub fn run<Fut>(&self, key: K, compute: Fut) -> InFlight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + 'static,
    {
        if let Some(existing) = self.in_flight.borrow().get(&key) {
            log::debug!("Joining in-flight computation");
            return existing.clone();
        }

        let in_flight = Rc::clone(&self.in_flight);
        let key_clone = key.clone();
        let wrapped = async move {
            let result = compute.await;
            // Settled, success or not: the next caller starts fresh
            in_flight.borrow_mut().remove(&key_clone);
            result
        }
        .boxed_local()
        .shared();

        self.in_flight.borrow_mut().insert(key, wrapped.clone());
        wrapped
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.in_flight.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::cell::Cell;

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let calls = Rc::new(Cell::new(0));
        let choke: ChokePoint<&'static str, u32, String> = ChokePoint::new();
        let (release, gate) = oneshot::channel::<()>();

        let first = {
            let calls = Rc::clone(&calls);
            choke.run("tool", async move {
                calls.set(calls.get() + 1);
                gate.await.map_err(|e| e.to_string())?;
                Ok(7)
            })
        };
        let second = {
            let calls = Rc::clone(&calls);
            choke.run("tool", async move {
                calls.set(calls.get() + 1);
                Ok(99)
            })
        };

        assert!(choke.is_in_flight(&"tool"));
        release.send(()).unwrap();

        let (a, b) = block_on(futures::future::join(first, second));
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(calls.get(), 1);
        assert!(choke.is_empty());
    }

    #[test]
    fn test_settled_entries_are_not_cached() {
        let choke: ChokePoint<u8, u32, String> = ChokePoint::new();

        assert_eq!(block_on(choke.run(1, async { Ok(1) })), Ok(1));
        assert_eq!(block_on(choke.run(1, async { Ok(2) })), Ok(2));
    }

    #[test]
    fn test_errors_are_shared_then_cleared() {
        let choke: ChokePoint<u8, u32, String> = ChokePoint::new();

        let failed = block_on(choke.run(1, async { Err("boom".to_string()) }));
        assert_eq!(failed, Err("boom".to_string()));
        assert!(!choke.is_in_flight(&1));
        assert_eq!(block_on(choke.run(1, async { Ok(3) })), Ok(3));
    }

    #[test]
    fn test_keys_are_independent() {
        let choke: ChokePoint<u8, u32, String> = ChokePoint::new();
        let (_hold, gate) = oneshot::channel::<()>();

        let _pending = choke.run(1, async move {
            gate.await.map_err(|e| e.to_string())?;
            Ok(1)
        });

        assert_eq!(block_on(choke.run(2, async { Ok(2) })), Ok(2));
        assert!(choke.is_in_flight(&1));
    }
}
