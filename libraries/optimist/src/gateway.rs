//! The remote store as seen by the stores, and the one place that decides whether an entity
//! talks to it or to the demo stand-in.

use std::collections::HashMap;

use catalog_utils::{Backing, EntityKey, ReviewDraft, ReviewRecord, ViewerId};

use crate::{GatewayError, Optimistic};

/// Remote access to per-entity interaction state.
///
/// Futures are not `Send`: everything runs on the UI thread.
#[allow(async_fn_in_trait)]
pub trait Gateway<S: Optimistic> {
    async fn fetch_state(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Result<S, GatewayError>;

    /// Fetches many keys at once. Keys missing from the result are treated as failed by the
    /// caller. The default issues one `fetch_state` per key and drops the ones that fail.
    async fn fetch_states(
        &self,
        keys: &[EntityKey],
        viewer: Option<&ViewerId>,
    ) -> Result<HashMap<EntityKey, S>, GatewayError> {
        let fetched = futures::future::join_all(
            keys.iter()
                .map(|key| async move { (key, self.fetch_state(key, viewer).await) }),
        )
        .await;

        Ok(fetched
            .into_iter()
            .filter_map(|(key, result)| match result {
                Ok(state) => Some((key.clone(), state)),
                Err(e) => {
                    log::warn!("Fetching {key} failed: {e}");
                    None
                }
            })
            .collect())
    }

    /// `Ok(None)` means the mutation was accepted but the remote did not echo the new state.
    async fn mutate(
        &self,
        key: &EntityKey,
        viewer: &ViewerId,
        op: S::Op,
    ) -> Result<Option<S>, GatewayError>;

    async fn has_active_session(&self) -> bool;
}

/// Remote access to reviews.
#[allow(async_fn_in_trait)]
pub trait ReviewGateway {
    async fn list_reviews(&self, key: &EntityKey) -> Result<Vec<ReviewRecord>, GatewayError>;

    /// Same contract as [`Gateway::fetch_states`].
    async fn list_reviews_many(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, Vec<ReviewRecord>>, GatewayError> {
        let listed = futures::future::join_all(
            keys.iter()
                .map(|key| async move { (key, self.list_reviews(key).await) }),
        )
        .await;

        Ok(listed
            .into_iter()
            .filter_map(|(key, result)| match result {
                Ok(reviews) => Some((key.clone(), reviews)),
                Err(e) => {
                    log::warn!("Listing reviews for {key} failed: {e}");
                    None
                }
            })
            .collect())
    }

    async fn create_review(
        &self,
        key: &EntityKey,
        author: &ViewerId,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError>;

    async fn update_review(
        &self,
        review: &ReviewRecord,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError>;

    async fn delete_review(&self, review: &ReviewRecord) -> Result<(), GatewayError>;

    /// `Ok(None)` means accepted without an echo.
    async fn mark_helpful(
        &self,
        review: &ReviewRecord,
        viewer: &ViewerId,
    ) -> Result<Option<ReviewRecord>, GatewayError>;

    async fn has_active_session(&self) -> bool;
}

/// A remote gateway paired with its demo stand-in.
pub struct Backends<G, D> {
    remote: G,
    demo: D,
}

/// The gateway chosen for one entity.
pub enum Route<'a, G, D> {
    Remote(&'a G),
    Demo(&'a D),
}

impl<G, D> Backends<G, D> {
    pub fn new(remote: G, demo: D) -> Self {
        Self { remote, demo }
    }

    pub fn remote(&self) -> &G {
        &self.remote
    }

    pub fn demo(&self) -> &D {
        &self.demo
    }

    pub fn route(&self, key: &EntityKey) -> Route<'_, G, D> {
        match key.backing() {
            Backing::Persisted => Route::Remote(&self.remote),
            Backing::Demo => Route::Demo(&self.demo),
        }
    }

    /// Splits keys into (remote, demo), keeping their relative order.
    pub fn partition(&self, keys: &[EntityKey]) -> (Vec<EntityKey>, Vec<EntityKey>) {
        keys.iter()
            .cloned()
            .partition(|key| matches!(self.route(key), Route::Remote(_)))
    }
}

impl<G, D> Route<'_, G, D> {
    pub fn is_demo(&self) -> bool {
        matches!(self, Route::Demo(_))
    }
}

impl<S, G, D> Gateway<S> for Route<'_, G, D>
where
    S: Optimistic,
    G: Gateway<S>,
    D: Gateway<S>,
{
    async fn fetch_state(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Result<S, GatewayError> {
        match self {
            Route::Remote(remote) => remote.fetch_state(key, viewer).await,
            Route::Demo(demo) => demo.fetch_state(key, viewer).await,
        }
    }

    async fn fetch_states(
        &self,
        keys: &[EntityKey],
        viewer: Option<&ViewerId>,
    ) -> Result<HashMap<EntityKey, S>, GatewayError> {
        match self {
            Route::Remote(remote) => remote.fetch_states(keys, viewer).await,
            Route::Demo(demo) => demo.fetch_states(keys, viewer).await,
        }
    }

    async fn mutate(
        &self,
        key: &EntityKey,
        viewer: &ViewerId,
        op: S::Op,
    ) -> Result<Option<S>, GatewayError> {
        match self {
            Route::Remote(remote) => remote.mutate(key, viewer, op).await,
            Route::Demo(demo) => demo.mutate(key, viewer, op).await,
        }
    }

    async fn has_active_session(&self) -> bool {
        match self {
            Route::Remote(remote) => remote.has_active_session().await,
            Route::Demo(demo) => demo.has_active_session().await,
        }
    }
}

impl<G, D> ReviewGateway for Route<'_, G, D>
where
    G: ReviewGateway,
    D: ReviewGateway,
{
    async fn list_reviews(&self, key: &EntityKey) -> Result<Vec<ReviewRecord>, GatewayError> {
        match self {
            Route::Remote(remote) => remote.list_reviews(key).await,
            Route::Demo(demo) => demo.list_reviews(key).await,
        }
    }

    async fn list_reviews_many(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, Vec<ReviewRecord>>, GatewayError> {
        match self {
            Route::Remote(remote) => remote.list_reviews_many(keys).await,
            Route::Demo(demo) => demo.list_reviews_many(keys).await,
        }
    }

    async fn create_review(
        &self,
        key: &EntityKey,
        author: &ViewerId,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        match self {
            Route::Remote(remote) => remote.create_review(key, author, draft).await,
            Route::Demo(demo) => demo.create_review(key, author, draft).await,
        }
    }

    async fn update_review(
        &self,
        review: &ReviewRecord,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        match self {
            Route::Remote(remote) => remote.update_review(review, draft).await,
            Route::Demo(demo) => demo.update_review(review, draft).await,
        }
    }

    async fn delete_review(&self, review: &ReviewRecord) -> Result<(), GatewayError> {
        match self {
            Route::Remote(remote) => remote.delete_review(review).await,
            Route::Demo(demo) => demo.delete_review(review).await,
        }
    }

    async fn mark_helpful(
        &self,
        review: &ReviewRecord,
        viewer: &ViewerId,
    ) -> Result<Option<ReviewRecord>, GatewayError> {
        match self {
            Route::Remote(remote) => remote.mark_helpful(review, viewer).await,
            Route::Demo(demo) => demo.mark_helpful(review, viewer).await,
        }
    }

    async fn has_active_session(&self) -> bool {
        match self {
            Route::Remote(remote) => remote.has_active_session().await,
            Route::Demo(demo) => demo.has_active_session().await,
        }
    }
}
