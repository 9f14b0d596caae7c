//! Scriptable in-memory remotes for the store tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use catalog_utils::{EntityKey, InteractionOp, InteractionState, ReviewDraft, ReviewRecord, ViewerId};
use chrono::Utc;
use futures::channel::oneshot;

use crate::{Gateway, GatewayError, ReviewGateway};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A key that classifies as persisted.
pub(crate) fn persisted(n: u64) -> EntityKey {
    EntityKey::new(format!("00000000-0000-4000-8000-{n:012}"))
}

#[derive(Clone)]
pub(crate) struct FakeRemote {
    inner: Rc<FakeRemoteInner>,
}

struct FakeRemoteInner {
    states: RefCell<HashMap<EntityKey, InteractionState>>,
    fail_fetches: Cell<bool>,
    fail_mutations: Cell<bool>,
    echo: Cell<bool>,
    session: Cell<bool>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
    fetch_calls: Cell<usize>,
    batch_calls: Cell<usize>,
    mutate_calls: Cell<usize>,
    last_viewer: RefCell<Option<Option<ViewerId>>>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(FakeRemoteInner {
                states: RefCell::new(HashMap::new()),
                fail_fetches: Cell::new(false),
                fail_mutations: Cell::new(false),
                echo: Cell::new(true),
                session: Cell::new(true),
                gate: RefCell::new(None),
                fetch_calls: Cell::new(0),
                batch_calls: Cell::new(0),
                mutate_calls: Cell::new(0),
                last_viewer: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn set_state(&self, key: &EntityKey, state: InteractionState) {
        self.inner.states.borrow_mut().insert(key.clone(), state);
    }

    pub(crate) fn fail_fetches(&self, fail: bool) {
        self.inner.fail_fetches.set(fail);
    }

    pub(crate) fn fail_mutations(&self, fail: bool) {
        self.inner.fail_mutations.set(fail);
    }

    pub(crate) fn echo_mutations(&self, echo: bool) {
        self.inner.echo.set(echo);
    }

    pub(crate) fn set_session(&self, active: bool) {
        self.inner.session.set(active);
    }

    /// The next mutation waits until the paired sender fires.
    pub(crate) fn hold_next_mutation(&self, gate: oneshot::Receiver<()>) {
        *self.inner.gate.borrow_mut() = Some(gate);
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.get()
    }

    pub(crate) fn batch_calls(&self) -> usize {
        self.inner.batch_calls.get()
    }

    pub(crate) fn mutate_calls(&self) -> usize {
        self.inner.mutate_calls.get()
    }

    /// The viewer passed to the most recent fetch, `None` if nothing was fetched yet.
    pub(crate) fn last_viewer(&self) -> Option<Option<ViewerId>> {
        self.inner.last_viewer.borrow().clone()
    }

    fn state(&self, key: &EntityKey) -> InteractionState {
        self.inner
            .states
            .borrow()
            .get(key)
            .copied()
            .unwrap_or_default()
    }
}

impl Gateway<InteractionState> for FakeRemote {
    async fn fetch_state(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Result<InteractionState, GatewayError> {
        self.inner.fetch_calls.set(self.inner.fetch_calls.get() + 1);
        *self.inner.last_viewer.borrow_mut() = Some(viewer.cloned());
        if self.inner.fail_fetches.get() {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        Ok(self.state(key))
    }

    async fn fetch_states(
        &self,
        keys: &[EntityKey],
        viewer: Option<&ViewerId>,
    ) -> Result<HashMap<EntityKey, InteractionState>, GatewayError> {
        self.inner.batch_calls.set(self.inner.batch_calls.get() + 1);
        *self.inner.last_viewer.borrow_mut() = Some(viewer.cloned());
        if self.inner.fail_fetches.get() {
            return Err(GatewayError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(keys
            .iter()
            .map(|key| (key.clone(), self.state(key)))
            .collect())
    }

    async fn mutate(
        &self,
        key: &EntityKey,
        _viewer: &ViewerId,
        op: InteractionOp,
    ) -> Result<Option<InteractionState>, GatewayError> {
        self.inner.mutate_calls.set(self.inner.mutate_calls.get() + 1);
        let gate = self.inner.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.inner.fail_mutations.get() {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }

        let next = self.state(key).apply(op);
        self.set_state(key, next);
        Ok(self.inner.echo.get().then_some(next))
    }

    async fn has_active_session(&self) -> bool {
        self.inner.session.get()
    }
}

#[derive(Clone)]
pub(crate) struct FakeReviews {
    inner: Rc<FakeReviewsInner>,
}

struct FakeReviewsInner {
    reviews: RefCell<HashMap<EntityKey, Vec<ReviewRecord>>>,
    next_id: Cell<u64>,
    fail_lists: Cell<bool>,
    fail_mutations: Cell<bool>,
    echo_helpful: Cell<bool>,
    session: Cell<bool>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
    list_gate: RefCell<Option<oneshot::Receiver<()>>>,
    mutate_calls: Cell<usize>,
}

impl FakeReviews {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(FakeReviewsInner {
                reviews: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                fail_lists: Cell::new(false),
                fail_mutations: Cell::new(false),
                echo_helpful: Cell::new(true),
                session: Cell::new(true),
                gate: RefCell::new(None),
                list_gate: RefCell::new(None),
                mutate_calls: Cell::new(0),
            }),
        }
    }

    pub(crate) fn fail_lists(&self, fail: bool) {
        self.inner.fail_lists.set(fail);
    }

    pub(crate) fn fail_mutations(&self, fail: bool) {
        self.inner.fail_mutations.set(fail);
    }

    pub(crate) fn echo_helpful(&self, echo: bool) {
        self.inner.echo_helpful.set(echo);
    }

    pub(crate) fn set_session(&self, active: bool) {
        self.inner.session.set(active);
    }

    pub(crate) fn hold_next_mutation(&self, gate: oneshot::Receiver<()>) {
        *self.inner.gate.borrow_mut() = Some(gate);
    }

    pub(crate) fn hold_next_list(&self, gate: oneshot::Receiver<()>) {
        *self.inner.list_gate.borrow_mut() = Some(gate);
    }

    pub(crate) fn mutate_calls(&self) -> usize {
        self.inner.mutate_calls.get()
    }

    pub(crate) fn stored(&self, key: &EntityKey) -> Vec<ReviewRecord> {
        self.inner
            .reviews
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    async fn begin_mutation(&self) -> Result<(), GatewayError> {
        self.inner.mutate_calls.set(self.inner.mutate_calls.get() + 1);
        let gate = self.inner.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.inner.fail_mutations.get() {
            return Err(GatewayError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(())
    }
}

impl ReviewGateway for FakeReviews {
    async fn list_reviews(&self, key: &EntityKey) -> Result<Vec<ReviewRecord>, GatewayError> {
        let gate = self.inner.list_gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.inner.fail_lists.get() {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        Ok(self.stored(key))
    }

    async fn create_review(
        &self,
        key: &EntityKey,
        author: &ViewerId,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        self.begin_mutation().await?;

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let now = Utc::now();
        let record = ReviewRecord {
            id: format!("review-{id}"),
            author_id: author.clone(),
            entity_key: key.clone(),
            rating: draft.rating(),
            body: draft.body().to_string(),
            created_at: now,
            updated_at: now,
            helpful_count: 0,
        };
        self.inner
            .reviews
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update_review(
        &self,
        review: &ReviewRecord,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        self.begin_mutation().await?;

        let mut reviews = self.inner.reviews.borrow_mut();
        let Some(existing) = reviews
            .get_mut(&review.entity_key)
            .and_then(|collection| collection.iter_mut().find(|r| r.id == review.id))
        else {
            return Err(GatewayError::Status {
                status: 404,
                body: "no such review".to_string(),
            });
        };
        existing.rating = draft.rating();
        existing.body = draft.body().to_string();
        existing.updated_at = Utc::now().max(review.updated_at);
        Ok(existing.clone())
    }

    async fn delete_review(&self, review: &ReviewRecord) -> Result<(), GatewayError> {
        self.begin_mutation().await?;

        if let Some(collection) = self.inner.reviews.borrow_mut().get_mut(&review.entity_key) {
            collection.retain(|r| r.id != review.id);
        }
        Ok(())
    }

    async fn mark_helpful(
        &self,
        review: &ReviewRecord,
        _viewer: &ViewerId,
    ) -> Result<Option<ReviewRecord>, GatewayError> {
        self.begin_mutation().await?;

        let mut reviews = self.inner.reviews.borrow_mut();
        let updated = reviews
            .get_mut(&review.entity_key)
            .and_then(|collection| collection.iter_mut().find(|r| r.id == review.id))
            .map(|existing| {
                existing.helpful_count += 1;
                existing.clone()
            });
        Ok(updated.filter(|_| self.inner.echo_helpful.get()))
    }

    async fn has_active_session(&self) -> bool {
        self.inner.session.get()
    }
}
