//! # ReviewLifecycle
//! Cached review collections per entity, and the submit/update/delete/helpful transitions on
//! them. Mutations follow the same protocol as [`OptimisticStore::toggle`]: checks up front, a
//! ticket per entity, the guess published immediately, the remote's answer or the snapshot
//! afterwards.
//!
//! [`OptimisticStore::toggle`]: crate::OptimisticStore::toggle

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use catalog_utils::{
    EntityKey, ReviewDraft, ReviewOrder, ReviewRecord, ReviewSummary, ViewerId, sort_reviews,
    summarize,
};
use chokepoint::ChokePoint;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use im::Vector;
use indexmap::IndexMap;

use crate::bulk::BulkLoader;
use crate::listeners::Listeners;
use crate::releases::Releases;
use crate::{Backends, DemoReviews, Error, ListenerKey, MutationTicket, ReviewGateway, Tickets};

pub type Reviews = Vector<ReviewRecord>;

pub struct ReviewLifecycle<G> {
    inner: Rc<Inner<G>>,
}

struct Inner<G> {
    backends: Backends<G, DemoReviews>,
    cache: RefCell<HashMap<EntityKey, Reviews>>,
    tickets: Tickets,
    releases: Releases,
    listeners: RefCell<Listeners<Reviews>>,
    loads: ChokePoint<EntityKey, Reviews, Error>,
}

impl<G> Clone for ReviewLifecycle<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// What a mutation needs once its up-front checks have passed.
struct Begun {
    ticket: MutationTicket,
    viewer: ViewerId,
}

impl<G: ReviewGateway + 'static> ReviewLifecycle<G> {
    /// Pass the same `tickets` as the interaction stores so that a review mutation and a toggle
    /// on one entity are never in flight together.
    pub fn new(remote: G, tickets: Tickets) -> Self {
        Self {
            inner: Rc::new(Inner {
                backends: Backends::new(remote, DemoReviews::new()),
                cache: RefCell::new(HashMap::new()),
                tickets,
                releases: Releases::default(),
                listeners: RefCell::new(Listeners::default()),
                loads: ChokePoint::new(),
            }),
        }
    }

    pub fn backends(&self) -> &Backends<G, DemoReviews> {
        &self.inner.backends
    }

    /// Lists the entity's reviews and replaces the cached collection, unless a mutation on the
    /// entity is in flight, in which case the cache keeps the optimistic version. Nothing is
    /// cached if the entity is released before the list arrives.
    pub async fn load(&self, key: &EntityKey) -> Result<Reviews, Error> {
        let generation = self.inner.releases.generation(key);
        let lifecycle = self.clone();
        let owned_key = key.clone();
        let reviews = self
            .inner
            .loads
            .run(key.clone(), async move {
                let route = lifecycle.inner.backends.route(&owned_key);
                route
                    .list_reviews(&owned_key)
                    .await
                    .map(Vector::from)
                    .map_err(Error::Remote)
            })
            .await?;

        if self.inner.releases.released_since(key, generation) {
            log::debug!("Not caching reviews for {key}: released while listing");
        } else if self.inner.tickets.is_held(key) {
            log::debug!("Not caching reviews for {key}: mutation in flight");
        } else {
            self.publish(key, reviews.clone());
        }
        Ok(reviews)
    }

    /// Loads the reviews of many entities in one batch, caching what the remote answered for.
    pub async fn load_many(&self, keys: &[EntityKey]) -> IndexMap<EntityKey, Reviews> {
        let generations = keys
            .iter()
            .map(|key| (key.clone(), self.inner.releases.generation(key)))
            .collect::<HashMap<_, _>>();
        let loaded = BulkLoader::new(&self.inner.backends)
            .load_reviews(keys)
            .await;

        loaded
            .values
            .into_iter()
            .map(|(key, reviews)| {
                let reviews = Vector::from(reviews);
                let released = generations
                    .get(&key)
                    .is_some_and(|generation| self.inner.releases.released_since(&key, *generation));
                if !released && !loaded.fallbacks.contains(&key) && !self.inner.tickets.is_held(&key)
                {
                    self.publish(&key, reviews.clone());
                }
                (key, reviews)
            })
            .collect()
    }

    /// The cached collection, empty if the entity was never loaded.
    pub fn reviews(&self, key: &EntityKey) -> Reviews {
        self.cached(key).unwrap_or_default()
    }

    pub fn is_loaded(&self, key: &EntityKey) -> bool {
        self.inner.cache.borrow().contains_key(key)
    }

    pub fn sorted(&self, key: &EntityKey, order: ReviewOrder) -> Vec<ReviewRecord> {
        sort_reviews(self.reviews(key), order)
    }

    pub fn summary(&self, key: &EntityKey) -> ReviewSummary {
        summarize(&self.reviews(key))
    }

    pub fn review_by(&self, key: &EntityKey, author: &ViewerId) -> Option<ReviewRecord> {
        self.find(key, |review| &review.author_id == author)
    }

    pub fn is_mutating(&self, key: &EntityKey) -> bool {
        self.inner.tickets.is_held(key)
    }

    /// Adds the viewer's review of `key`. Fails with [`Error::DuplicateReview`] if the cache
    /// already holds one by them; use [`update`](Self::update) for that. An entity whose
    /// reviews were never loaded is listed first and checked the same way.
    pub fn submit(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
        rating: i64,
        body: &str,
    ) -> LocalBoxFuture<'static, Result<ReviewRecord, Error>> {
        let checked = self.check_submit(key, viewer, rating, body);
        let lifecycle = self.clone();
        async move {
            let (begun, draft) = checked?;
            lifecycle.settle_submit(begun, draft).await
        }
        .boxed_local()
    }

    /// Edits the viewer's own review in place. `id` and `created_at` never change.
    pub fn update(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
        rating: i64,
        body: &str,
    ) -> LocalBoxFuture<'static, Result<ReviewRecord, Error>> {
        let checked = self.check_update(key, review_id, viewer, rating, body);
        let lifecycle = self.clone();
        async move {
            let (begun, original, draft) = checked?;
            lifecycle.settle_update(begun, original, draft).await
        }
        .boxed_local()
    }

    /// Removes the viewer's own review. A review that is not cached counts as already deleted.
    pub fn delete(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        let checked = self.check_delete(key, review_id, viewer);
        let lifecycle = self.clone();
        async move {
            match checked? {
                Some((begun, review)) => lifecycle.settle_delete(begun, review).await,
                None => Ok(()),
            }
        }
        .boxed_local()
    }

    /// Records that the viewer found a review helpful.
    pub fn mark_helpful(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
    ) -> LocalBoxFuture<'static, Result<ReviewRecord, Error>> {
        let checked = self.check_helpful(key, review_id, viewer);
        let lifecycle = self.clone();
        async move {
            let (begun, review) = checked?;
            lifecycle.settle_helpful(begun, review).await
        }
        .boxed_local()
    }

    pub fn subscribe(
        &self,
        key: &EntityKey,
        callback: impl Fn(&Reviews) + 'static,
    ) -> (ListenerKey, Reviews) {
        let listener = self
            .inner
            .listeners
            .borrow_mut()
            .register(key.clone(), callback);
        (listener, self.reviews(key))
    }

    pub fn unsubscribe(&self, listener: ListenerKey) {
        self.inner.listeners.borrow_mut().unregister(listener);
    }

    pub fn release(&self, key: &EntityKey) {
        self.inner.releases.mark(key);
        self.inner.cache.borrow_mut().remove(key);
        self.inner.listeners.borrow_mut().release(key);
    }

    fn check_submit(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
        rating: i64,
        body: &str,
    ) -> Result<(Begun, ReviewDraft), Error> {
        let viewer = viewer.ok_or(Error::Unauthenticated)?;
        let draft = ReviewDraft::new(rating, body)?;
        if self.review_by(key, viewer).is_some() {
            return Err(Error::DuplicateReview);
        }
        Ok((self.begin(key, Some(viewer))?, draft))
    }

    fn check_update(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
        rating: i64,
        body: &str,
    ) -> Result<(Begun, ReviewRecord, ReviewDraft), Error> {
        let viewer = viewer.ok_or(Error::Unauthenticated)?;
        let draft = ReviewDraft::new(rating, body)?;
        let original = self
            .find(key, |review| review.id == review_id && &review.author_id == viewer)
            .ok_or(Error::NotFound)?;
        Ok((self.begin(key, Some(viewer))?, original, draft))
    }

    fn check_delete(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
    ) -> Result<Option<(Begun, ReviewRecord)>, Error> {
        let viewer = viewer.ok_or(Error::Unauthenticated)?;
        let Some(review) = self.find(key, |review| review.id == review_id) else {
            log::debug!("Review {review_id} of {key} is already gone");
            return Ok(None);
        };
        if &review.author_id != viewer {
            return Err(Error::NotFound);
        }
        Ok(Some((self.begin(key, Some(viewer))?, review)))
    }

    fn check_helpful(
        &self,
        key: &EntityKey,
        review_id: &str,
        viewer: Option<&ViewerId>,
    ) -> Result<(Begun, ReviewRecord), Error> {
        let viewer = viewer.ok_or(Error::Unauthenticated)?;
        let review = self
            .find(key, |review| review.id == review_id)
            .ok_or(Error::NotFound)?;
        Ok((self.begin(key, Some(viewer))?, review))
    }

    fn begin(&self, key: &EntityKey, viewer: Option<&ViewerId>) -> Result<Begun, Error> {
        let viewer = viewer.cloned().ok_or(Error::Unauthenticated)?;
        let ticket = self
            .inner
            .tickets
            .acquire(key)
            .ok_or(Error::AlreadyInFlight)?;
        Ok(Begun { ticket, viewer })
    }

    async fn settle_submit(&self, begun: Begun, draft: ReviewDraft) -> Result<ReviewRecord, Error> {
        let key = begun.ticket.key();
        let route = self.inner.backends.route(key);
        let generation = self.inner.releases.generation(key);
        if !route.has_active_session().await {
            return Err(Error::SessionExpired);
        }

        // The duplicate check only means something against the remote's reviews
        if !self.is_loaded(key) {
            let listed = self.load(key).await?;
            if !self.inner.releases.released_since(key, generation) {
                self.publish(key, listed.clone());
            }
            if listed.iter().any(|review| review.author_id == begun.viewer) {
                return Err(Error::DuplicateReview);
            }
        }

        let now = Utc::now();
        let provisional = ReviewRecord {
            id: format!("pending-{}", uuid::Uuid::new_v4()),
            author_id: begun.viewer.clone(),
            entity_key: key.clone(),
            rating: draft.rating(),
            body: draft.body().to_string(),
            created_at: now,
            updated_at: now,
            helpful_count: 0,
        };
        let before = self.cached(key);
        let mut after = before.clone().unwrap_or_default();
        after.push_back(provisional.clone());
        if self.inner.releases.released_since(key, generation) {
            log::debug!("Reviews of {key} were released before submitting, not caching");
        } else {
            self.publish(key, after);
        }

        match route.create_review(key, &begun.viewer, &draft).await {
            Ok(confirmed) => {
                self.replace_if_retained(key, &provisional.id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                log::warn!("Submitting review of {key} failed, reverting: {e}");
                self.restore_if_retained(key, before);
                Err(Error::Remote(e))
            }
        }
    }

    async fn settle_update(
        &self,
        begun: Begun,
        original: ReviewRecord,
        draft: ReviewDraft,
    ) -> Result<ReviewRecord, Error> {
        let key = begun.ticket.key();
        let route = self.inner.backends.route(key);
        if !route.has_active_session().await {
            return Err(Error::SessionExpired);
        }

        let edited = ReviewRecord {
            rating: draft.rating(),
            body: draft.body().to_string(),
            updated_at: bump(original.updated_at),
            ..original.clone()
        };
        let before = self.reviews(key);
        self.replace_if_retained(key, &original.id, edited);

        match route.update_review(&original, &draft).await {
            Ok(confirmed) => {
                self.replace_if_retained(key, &original.id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                log::warn!("Updating review {} failed, reverting: {e}", original.id);
                self.publish_if_retained(key, before);
                Err(Error::Remote(e))
            }
        }
    }

    async fn settle_delete(&self, begun: Begun, review: ReviewRecord) -> Result<(), Error> {
        let key = begun.ticket.key();
        let route = self.inner.backends.route(key);
        if !route.has_active_session().await {
            return Err(Error::SessionExpired);
        }

        let before = self.reviews(key);
        let after = before
            .iter()
            .filter(|r| r.id != review.id)
            .cloned()
            .collect::<Reviews>();
        self.publish_if_retained(key, after);

        match route.delete_review(&review).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("Deleting review {} failed, reverting: {e}", review.id);
                self.publish_if_retained(key, before);
                Err(Error::Remote(e))
            }
        }
    }

    async fn settle_helpful(&self, begun: Begun, review: ReviewRecord) -> Result<ReviewRecord, Error> {
        let key = &review.entity_key;
        let route = self.inner.backends.route(key);
        if !route.has_active_session().await {
            return Err(Error::SessionExpired);
        }

        let guessed = ReviewRecord {
            helpful_count: review.helpful_count.saturating_add(1),
            ..review.clone()
        };
        let before = self.reviews(key);
        self.replace_if_retained(key, &review.id, guessed.clone());

        match route.mark_helpful(&review, &begun.viewer).await {
            Ok(Some(confirmed)) => {
                self.replace_if_retained(key, &review.id, confirmed.clone());
                Ok(confirmed)
            }
            Ok(None) => {
                // The ticket is still held, so release it before reloading into the cache
                drop(begun);
                match self.load(key).await {
                    Ok(reviews) => Ok(reviews
                        .into_iter()
                        .find(|r| r.id == review.id)
                        .unwrap_or(guessed)),
                    Err(e) => {
                        log::warn!("Marked review {} helpful but could not resync: {e}", review.id);
                        Ok(guessed)
                    }
                }
            }
            Err(e) => {
                log::warn!("Marking review {} helpful failed, reverting: {e}", review.id);
                self.publish_if_retained(key, before);
                Err(Error::Remote(e))
            }
        }
    }

    fn cached(&self, key: &EntityKey) -> Option<Reviews> {
        self.inner.cache.borrow().get(key).cloned()
    }

    fn find(&self, key: &EntityKey, matches: impl Fn(&ReviewRecord) -> bool) -> Option<ReviewRecord> {
        self.inner
            .cache
            .borrow()
            .get(key)
            .and_then(|reviews| reviews.iter().find(|review| matches(review)).cloned())
    }

    /// Swaps the record with id `id` for `record`, if the entity is still cached.
    fn replace_if_retained(&self, key: &EntityKey, id: &str, record: ReviewRecord) {
        let Some(mut reviews) = self.inner.cache.borrow().get(key).cloned() else {
            log::debug!("Reviews of {key} were released mid-mutation, dropping the result");
            return;
        };
        match reviews.iter().position(|review| review.id == id) {
            Some(index) => {
                reviews.set(index, record);
            }
            None => reviews.push_back(record),
        }
        self.publish(key, reviews);
    }

    /// Puts back a snapshot taken before a mutation, including the absence of one.
    fn restore_if_retained(&self, key: &EntityKey, before: Option<Reviews>) {
        match before {
            Some(reviews) => self.publish_if_retained(key, reviews),
            None => {
                let removed = self.inner.cache.borrow_mut().remove(key).is_some();
                if removed {
                    self.notify(key, &Reviews::new());
                }
            }
        }
    }

    fn publish_if_retained(&self, key: &EntityKey, reviews: Reviews) {
        if self.inner.cache.borrow().contains_key(key) {
            self.publish(key, reviews);
        } else {
            log::debug!("Reviews of {key} were released mid-mutation, dropping the result");
        }
    }

    fn publish(&self, key: &EntityKey, reviews: Reviews) {
        self.inner
            .cache
            .borrow_mut()
            .insert(key.clone(), reviews.clone());
        self.notify(key, &reviews);
    }

    fn notify(&self, key: &EntityKey, reviews: &Reviews) {
        let callbacks = self.inner.listeners.borrow().for_key(key);
        for callback in callbacks {
            callback(reviews);
        }
    }
}

/// A timestamp strictly after `previous`, normally just now.
fn bump(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + Duration::milliseconds(1))
}
