//! # OptimisticStore
//! The cache of per-entity interaction state, and the only thing allowed to change it.
//!
//! Each entity moves between two states: idle, and mutating (while a [`MutationTicket`] for it
//! is out). Reads work in both; they see the optimistic value while a mutation is in flight.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use catalog_utils::{EntityKey, ViewerId};
use chokepoint::ChokePoint;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use futures::task::{LocalSpawn, LocalSpawnExt};
use indexmap::IndexMap;

use crate::bulk::BulkLoader;
use crate::listeners::Listeners;
use crate::releases::Releases;
use crate::{
    Backends, DemoGateway, Error, Gateway, ListenerKey, MutationTicket, Optimistic, StoreConfig,
    Synthesize, Tickets,
};

#[derive(Clone, Debug, Default, PartialEq)]
struct Cached<S> {
    state: S,
    /// When the remote last vouched for `state`. `None` while it is only a local guess.
    confirmed_at: Option<DateTime<Utc>>,
}

type FetchKey = (EntityKey, Option<ViewerId>);

pub struct OptimisticStore<S: Optimistic, G> {
    inner: Rc<Inner<S, G>>,
}

struct Inner<S: Optimistic, G> {
    backends: Backends<G, DemoGateway<S>>,
    config: StoreConfig,
    cache: RefCell<HashMap<EntityKey, Cached<S>>>,
    tickets: Tickets,
    releases: Releases,
    listeners: RefCell<Listeners<S>>,
    fetches: ChokePoint<FetchKey, S, Error>,
    spawner: Rc<dyn LocalSpawn>,
}

impl<S: Optimistic, G> Clone for OptimisticStore<S, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, G> OptimisticStore<S, G>
where
    S: Optimistic + Synthesize,
    G: Gateway<S> + 'static,
{
    /// `tickets` may be shared with other stores over the same entities, so that only one
    /// mutation per entity is in flight across all of them. `spawner` runs the background
    /// refreshes started by [`get`](Self::get).
    pub fn new(
        remote: G,
        config: StoreConfig,
        tickets: Tickets,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        let demo = DemoGateway::new(config.demo_ceiling);
        Self {
            inner: Rc::new(Inner {
                backends: Backends::new(remote, demo),
                config,
                cache: RefCell::new(HashMap::new()),
                tickets,
                releases: Releases::default(),
                listeners: RefCell::new(Listeners::default()),
                fetches: ChokePoint::new(),
                spawner,
            }),
        }
    }

    pub fn backends(&self) -> &Backends<G, DemoGateway<S>> {
        &self.inner.backends
    }

    /// The cached value, or the default if there is none yet. Schedules a background refresh
    /// when the value is missing or stale; never waits for it.
    pub fn get(&self, key: &EntityKey, viewer: Option<&ViewerId>) -> S {
        let cached = self.inner.cache.borrow().get(key).cloned();
        match cached {
            Some(cached) => {
                if self.needs_refresh(key, &cached) {
                    self.schedule_refresh(key, viewer);
                }
                cached.state
            }
            None => {
                self.schedule_refresh(key, viewer);
                S::default()
            }
        }
    }

    /// The cached value without scheduling anything.
    pub fn snapshot(&self, key: &EntityKey) -> Option<S> {
        self.inner
            .cache
            .borrow()
            .get(key)
            .map(|cached| cached.state.clone())
    }

    pub fn is_mutating(&self, key: &EntityKey) -> bool {
        self.inner.tickets.is_held(key)
    }

    /// Fetches the entity and replaces whatever was cached, unless a mutation on it is in
    /// flight or it was released meanwhile. Concurrent refreshes of the same entity for the same
    /// viewer share one remote call.
    pub async fn refresh(&self, key: &EntityKey, viewer: Option<&ViewerId>) -> Result<S, Error> {
        let generation = self.inner.releases.generation(key);
        let route = self.inner.backends.route(key);
        if viewer.is_some() && !Gateway::<S>::has_active_session(&route).await {
            log::info!("Not refreshing {key}: session expired");
            return Err(Error::SessionExpired);
        }

        let state = self.fetch(key, viewer).await?;
        if self.inner.releases.released_since(key, generation) {
            log::debug!("Not caching refreshed {key}: released while fetching");
        } else if self.inner.tickets.is_held(key) {
            // the mutation's own answer will land shortly
            log::debug!("Not caching refreshed {key}: mutation in flight");
        } else {
            self.publish(key, state.clone(), Some(Utc::now()));
        }
        Ok(state)
    }

    /// Flips the viewer's engagement, showing the result immediately and reconciling with the
    /// remote afterwards.
    ///
    /// The identity and in-flight checks happen when this is called, not when the future is
    /// first polled, so a second call made before the first settles fails with
    /// [`Error::AlreadyInFlight`].
    pub fn toggle(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> LocalBoxFuture<'static, Result<S, Error>> {
        let begun = self.begin_mutation(key, viewer);
        let store = self.clone();
        async move {
            let (ticket, viewer) = begun?;
            store.settle_toggle(&ticket, &viewer).await
        }
        .boxed_local()
    }

    /// Drops the cached value and every listener for `key`. Fetches already in flight for it
    /// are not cached when they land.
    pub fn release(&self, key: &EntityKey) {
        self.inner.releases.mark(key);
        self.inner.cache.borrow_mut().remove(key);
        self.inner.listeners.borrow_mut().release(key);
    }

    /// Registers `callback` for changes to `key` and returns the current value, as [`get`]
    /// would.
    ///
    /// [`get`]: Self::get
    pub fn subscribe(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
        callback: impl Fn(&S) + 'static,
    ) -> (ListenerKey, S) {
        let listener = self
            .inner
            .listeners
            .borrow_mut()
            .register(key.clone(), callback);
        (listener, self.get(key, viewer))
    }

    pub fn unsubscribe(&self, listener: ListenerKey) {
        self.inner.listeners.borrow_mut().unregister(listener);
    }

    /// Loads many entities in one batch and caches the ones the remote answered for. Entities
    /// with a mutation in flight keep their optimistic value.
    pub async fn load_many(
        &self,
        keys: &[EntityKey],
        viewer: Option<&ViewerId>,
    ) -> IndexMap<EntityKey, S> {
        let generations = keys
            .iter()
            .map(|key| (key.clone(), self.inner.releases.generation(key)))
            .collect::<HashMap<_, _>>();
        let loaded = BulkLoader::new(&self.inner.backends)
            .load_states(keys, viewer)
            .await;

        let now = Utc::now();
        for (key, state) in &loaded.values {
            let released = generations
                .get(key)
                .is_some_and(|generation| self.inner.releases.released_since(key, *generation));
            if released || loaded.fallbacks.contains(key) || self.inner.tickets.is_held(key) {
                continue;
            }
            self.publish(key, state.clone(), Some(now));
        }

        loaded.values
    }

    fn begin_mutation(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Result<(MutationTicket, ViewerId), Error> {
        let viewer = viewer.cloned().ok_or(Error::Unauthenticated)?;
        let ticket = self
            .inner
            .tickets
            .acquire(key)
            .ok_or(Error::AlreadyInFlight)?;
        Ok((ticket, viewer))
    }

    async fn settle_toggle(&self, ticket: &MutationTicket, viewer: &ViewerId) -> Result<S, Error> {
        let key = ticket.key();
        let route = self.inner.backends.route(key);
        let generation = self.inner.releases.generation(key);

        if !Gateway::<S>::has_active_session(&route).await {
            log::info!("Not toggling {key}: session expired");
            return Err(Error::SessionExpired);
        }

        // Never-loaded entities start from the remote value rather than the zero default
        let before = match self.cached(key) {
            Some(cached) => cached,
            None => {
                let loaded = Cached {
                    state: self.fetch(key, Some(viewer)).await?,
                    confirmed_at: Some(Utc::now()),
                };
                if !self.inner.releases.released_since(key, generation) {
                    self.publish(key, loaded.state.clone(), loaded.confirmed_at);
                }
                loaded
            }
        };

        // No suspension point between taking the snapshot and publishing the guess
        let op = before.state.toggle_op();
        let after = before.state.apply(op);
        self.publish_if_retained(key, after.clone(), None);

        match Gateway::<S>::mutate(&route, key, viewer, op).await {
            Ok(Some(confirmed)) => {
                self.publish_if_retained(key, confirmed.clone(), Some(Utc::now()));
                Ok(confirmed)
            }
            Ok(None) => {
                match self.fetch(key, Some(viewer)).await {
                    Ok(state) => {
                        self.publish_if_retained(key, state.clone(), Some(Utc::now()));
                        Ok(state)
                    }
                    Err(e) => {
                        // The remote accepted the change, so the guess stands until the next read
                        log::warn!("Toggled {key} but could not resync: {e}");
                        Ok(after)
                    }
                }
            }
            Err(e) => {
                log::warn!("Toggle of {key} failed, reverting: {e}");
                self.restore_if_retained(key, before);
                Err(Error::Remote(e))
            }
        }
    }

    fn fetch(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Shared<LocalBoxFuture<'static, Result<S, Error>>> {
        let store = self.clone();
        let owned_key = key.clone();
        let owned_viewer = viewer.cloned();
        self.inner
            .fetches
            .run((key.clone(), viewer.cloned()), async move {
                let route = store.inner.backends.route(&owned_key);
                Gateway::<S>::fetch_state(&route, &owned_key, owned_viewer.as_ref())
                    .await
                    .map_err(Error::Remote)
            })
    }

    fn needs_refresh(&self, key: &EntityKey, cached: &Cached<S>) -> bool {
        // An in-flight mutation will reconcile on its own
        if self.inner.tickets.is_held(key) {
            return false;
        }
        match (cached.confirmed_at, self.inner.config.stale_after()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(confirmed_at), Some(max_age)) => Utc::now() - confirmed_at > max_age,
        }
    }

    fn schedule_refresh(&self, key: &EntityKey, viewer: Option<&ViewerId>) {
        let store = self.clone();
        let owned_key = key.clone();
        let viewer = viewer.cloned();
        let task = async move {
            if let Err(e) = store.refresh(&owned_key, viewer.as_ref()).await {
                log::warn!("Background refresh of {owned_key} failed: {e}");
            }
        };
        if let Err(e) = self.inner.spawner.spawn_local(task) {
            log::error!("Could not schedule refresh of {key}: {e}");
        }
    }

    fn cached(&self, key: &EntityKey) -> Option<Cached<S>> {
        self.inner.cache.borrow().get(key).cloned()
    }

    fn publish(&self, key: &EntityKey, state: S, confirmed_at: Option<DateTime<Utc>>) {
        self.inner.cache.borrow_mut().insert(
            key.clone(),
            Cached {
                state: state.clone(),
                confirmed_at,
            },
        );
        self.notify(key, &state);
    }

    /// Like `publish`, but a key released while its mutation was in flight stays released.
    fn publish_if_retained(&self, key: &EntityKey, state: S, confirmed_at: Option<DateTime<Utc>>) {
        self.restore_if_retained(
            key,
            Cached {
                state,
                confirmed_at,
            },
        );
    }

    fn restore_if_retained(&self, key: &EntityKey, cached: Cached<S>) {
        let state = cached.state.clone();
        let retained = match self.inner.cache.borrow_mut().get_mut(key) {
            Some(entry) => {
                *entry = cached;
                true
            }
            None => false,
        };

        if retained {
            self.notify(key, &state);
        } else {
            log::debug!("{key} was released mid-mutation, dropping the result");
        }
    }

    fn notify(&self, key: &EntityKey, state: &S) {
        // never hold the listeners borrow while calling out, callbacks may re-enter the store
        let callbacks = self.inner.listeners.borrow().for_key(key);
        for callback in callbacks {
            callback(state);
        }
    }
}
