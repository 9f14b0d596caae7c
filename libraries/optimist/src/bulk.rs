use std::collections::HashMap;

use catalog_utils::{EntityKey, ReviewRecord, ViewerId};
use indexmap::IndexMap;

use crate::{Backends, Gateway, GatewayError, Optimistic, ReviewGateway};

/// Loads many entities at once for list views: one batched remote call for the persisted keys,
/// the demo stand-in for the rest.
pub struct BulkLoader<'a, G, D> {
    backends: &'a Backends<G, D>,
}

/// The result of a bulk load. Every requested key has a value.
#[derive(Clone, Debug, PartialEq)]
pub struct Loaded<T> {
    /// In request order, duplicates collapsed to their first occurrence.
    pub values: IndexMap<EntityKey, T>,
    /// Keys the remote did not answer for. Their value is the default, not real data.
    pub fallbacks: Vec<EntityKey>,
}

impl<'a, G, D> BulkLoader<'a, G, D> {
    pub fn new(backends: &'a Backends<G, D>) -> Self {
        Self { backends }
    }

    pub async fn load_states<S>(&self, keys: &[EntityKey], viewer: Option<&ViewerId>) -> Loaded<S>
    where
        S: Optimistic,
        G: Gateway<S>,
        D: Gateway<S>,
    {
        let (remote_keys, demo_keys) = self.backends.partition(keys);

        let mut fetched = HashMap::new();
        if !remote_keys.is_empty() {
            let remote = self.backends.remote();
            let viewer = match viewer {
                Some(viewer) if !Gateway::<S>::has_active_session(remote).await => {
                    log::info!(
                        "Session expired, loading {} entities without viewer {viewer}",
                        remote_keys.len()
                    );
                    None
                }
                viewer => viewer,
            };
            absorb(
                &mut fetched,
                Gateway::<S>::fetch_states(remote, &remote_keys, viewer).await,
                remote_keys.len(),
            );
        }
        if !demo_keys.is_empty() {
            absorb(
                &mut fetched,
                Gateway::<S>::fetch_states(self.backends.demo(), &demo_keys, viewer).await,
                demo_keys.len(),
            );
        }

        assemble(keys, fetched)
    }

    pub async fn load_reviews(&self, keys: &[EntityKey]) -> Loaded<Vec<ReviewRecord>>
    where
        G: ReviewGateway,
        D: ReviewGateway,
    {
        let (remote_keys, demo_keys) = self.backends.partition(keys);

        let mut fetched = HashMap::new();
        if !remote_keys.is_empty() {
            absorb(
                &mut fetched,
                self.backends.remote().list_reviews_many(&remote_keys).await,
                remote_keys.len(),
            );
        }
        if !demo_keys.is_empty() {
            absorb(
                &mut fetched,
                self.backends.demo().list_reviews_many(&demo_keys).await,
                demo_keys.len(),
            );
        }

        assemble(keys, fetched)
    }
}

fn absorb<T>(
    into: &mut HashMap<EntityKey, T>,
    batch: Result<HashMap<EntityKey, T>, GatewayError>,
    requested: usize,
) {
    match batch {
        Ok(batch) => into.extend(batch),
        Err(e) => log::warn!("Batch load of {requested} entities failed, using defaults: {e}"),
    }
}

fn assemble<T: Default>(keys: &[EntityKey], mut fetched: HashMap<EntityKey, T>) -> Loaded<T> {
    let mut values = IndexMap::with_capacity(keys.len());
    let mut fallbacks = Vec::new();

    for key in keys {
        if values.contains_key(key) {
            continue;
        }
        let value = match fetched.remove(key) {
            Some(value) => value,
            None => {
                fallbacks.push(key.clone());
                T::default()
            }
        };
        values.insert(key.clone(), value);
    }

    Loaded { values, fallbacks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, FakeReviews, init_logging, persisted};
    use crate::{DemoGateway, DemoReviews};
    use catalog_utils::{InteractionState, ReviewDraft};
    use futures::executor::block_on;

    fn demo_keys() -> Vec<EntityKey> {
        ["demo-editor", "demo-linter", "demo-profiler"]
            .into_iter()
            .map(EntityKey::new)
            .collect()
    }

    #[test]
    fn test_failed_remote_batch_still_yields_every_key() {
        init_logging();
        let remote = FakeRemote::new();
        remote.fail_fetches(true);
        let backends = Backends::new(remote.clone(), DemoGateway::new(120));

        let demo = demo_keys();
        let keys = vec![
            demo[0].clone(),
            persisted(1),
            demo[1].clone(),
            persisted(2),
            demo[2].clone(),
        ];

        let loaded: Loaded<InteractionState> =
            block_on(BulkLoader::new(&backends).load_states(&keys, None));

        assert_eq!(loaded.values.len(), 5);
        assert_eq!(loaded.values.keys().cloned().collect::<Vec<_>>(), keys);
        assert_eq!(loaded.fallbacks, vec![persisted(1), persisted(2)]);
        assert_eq!(loaded.values[&persisted(1)], InteractionState::default());
        assert_eq!(loaded.values[&persisted(2)], InteractionState::default());

        // the demo values are the ones the demo gateway settles on
        let stand_in: DemoGateway<InteractionState> = DemoGateway::new(120);
        for key in &demo {
            let expected = block_on(stand_in.fetch_state(key, None)).unwrap();
            assert_eq!(loaded.values[key], expected);
        }
        assert_eq!(remote.batch_calls(), 1);
    }

    #[test]
    fn test_duplicates_collapse_to_first_occurrence() {
        let remote = FakeRemote::new();
        remote.set_state(&persisted(1), InteractionState::new(2, true));
        let backends = Backends::new(remote.clone(), DemoGateway::new(120));

        let keys = vec![persisted(1), persisted(3), persisted(1)];
        let loaded: Loaded<InteractionState> =
            block_on(BulkLoader::new(&backends).load_states(&keys, None));

        assert_eq!(
            loaded.values.keys().cloned().collect::<Vec<_>>(),
            vec![persisted(1), persisted(3)]
        );
        assert_eq!(loaded.values[&persisted(1)], InteractionState::new(2, true));
        assert!(loaded.fallbacks.is_empty());
    }

    #[test]
    fn test_expired_session_loads_anonymously() {
        let remote = FakeRemote::new();
        remote.set_session(false);
        let backends = Backends::new(remote.clone(), DemoGateway::new(120));
        let viewer = ViewerId::new("viewer-1");

        let loaded: Loaded<InteractionState> =
            block_on(BulkLoader::new(&backends).load_states(&[persisted(1)], Some(&viewer)));

        assert_eq!(loaded.values.len(), 1);
        assert_eq!(remote.last_viewer(), Some(None));
    }

    #[test]
    fn test_no_remote_call_for_demo_only_batches() {
        let remote = FakeRemote::new();
        let backends = Backends::new(remote.clone(), DemoGateway::new(120));

        let loaded: Loaded<InteractionState> =
            block_on(BulkLoader::new(&backends).load_states(&demo_keys(), None));

        assert_eq!(loaded.values.len(), 3);
        assert_eq!(remote.batch_calls(), 0);
    }

    #[test]
    fn test_reviews_default_to_empty() {
        let remote = FakeReviews::new();
        let author = ViewerId::new("author");
        let draft = ReviewDraft::new(5, "fast and reliable").unwrap();
        block_on(remote.create_review(&persisted(1), &author, &draft)).unwrap();
        remote.fail_lists(true);
        let backends = Backends::new(remote.clone(), DemoReviews::new());

        let keys = vec![persisted(1), EntityKey::new("demo-editor")];
        let loaded = block_on(BulkLoader::new(&backends).load_reviews(&keys));

        assert_eq!(loaded.values.len(), 2);
        assert!(loaded.values.values().all(|reviews| reviews.is_empty()));
        assert_eq!(loaded.fallbacks, vec![persisted(1)]);

        remote.fail_lists(false);
        let loaded = block_on(BulkLoader::new(&backends).load_reviews(&keys));
        assert_eq!(loaded.values[&persisted(1)].len(), 1);
        assert_eq!(loaded.fallbacks, Vec::<EntityKey>::new());
    }
}
