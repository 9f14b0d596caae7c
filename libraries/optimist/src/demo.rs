//! In-memory stand-ins for the remote store, used for entities that only exist as demo data.
//!
//! They behave like a remote that never fails and never needs a session: the first read of an
//! entity settles on a value, and after that only mutations change it.

use std::cell::RefCell;
use std::collections::HashMap;

use catalog_utils::{EntityKey, ReviewDraft, ReviewRecord, ViewerId};
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{Gateway, GatewayError, Optimistic, ReviewGateway, Synthesize};

pub struct DemoGateway<S> {
    ceiling: u32,
    states: RefCell<HashMap<EntityKey, S>>,
}

impl<S: Optimistic + Synthesize> DemoGateway<S> {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            states: RefCell::new(HashMap::new()),
        }
    }

    fn current(&self, key: &EntityKey) -> S {
        self.states
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| {
                // Seeded by the key so a reload shows the same numbers
                let seed = xxhash_rust::xxh3::xxh3_64(key.as_str().as_bytes());
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                S::synthesize(&mut rng, self.ceiling)
            })
            .clone()
    }
}

impl<S: Optimistic + Synthesize> Gateway<S> for DemoGateway<S> {
    async fn fetch_state(
        &self,
        key: &EntityKey,
        _viewer: Option<&ViewerId>,
    ) -> Result<S, GatewayError> {
        Ok(self.current(key))
    }

    async fn mutate(
        &self,
        key: &EntityKey,
        _viewer: &ViewerId,
        op: S::Op,
    ) -> Result<Option<S>, GatewayError> {
        let next = self.current(key).apply(op);
        self.states.borrow_mut().insert(key.clone(), next.clone());
        Ok(Some(next))
    }

    async fn has_active_session(&self) -> bool {
        true
    }
}

/// Demo reviews start out empty.
#[derive(Default)]
pub struct DemoReviews {
    reviews: RefCell<HashMap<EntityKey, Vec<ReviewRecord>>>,
}

impl DemoReviews {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewGateway for DemoReviews {
    async fn list_reviews(&self, key: &EntityKey) -> Result<Vec<ReviewRecord>, GatewayError> {
        Ok(self.reviews.borrow().get(key).cloned().unwrap_or_default())
    }

    async fn create_review(
        &self,
        key: &EntityKey,
        author: &ViewerId,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        let now = Utc::now();
        let record = ReviewRecord {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author.clone(),
            entity_key: key.clone(),
            rating: draft.rating(),
            body: draft.body().to_string(),
            created_at: now,
            updated_at: now,
            helpful_count: 0,
        };
        self.reviews
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
        let updated = ReviewRecord {
            rating: draft.rating(),
            body: draft.body().to_string(),
            updated_at: Utc::now().max(review.updated_at),
            ..review.clone()
        };

        let mut reviews = self.reviews.borrow_mut();
        let collection = reviews.entry(review.entity_key.clone()).or_default();
        match collection.iter_mut().find(|r| r.id == review.id) {
            Some(existing) => *existing = updated.clone(),
            None => collection.push(updated.clone()),
        }
        Ok(updated)
    }

    async fn delete_review(&self, review: &ReviewRecord) -> Result<(), GatewayError> {
        if let Some(collection) = self.reviews.borrow_mut().get_mut(&review.entity_key) {
            collection.retain(|r| r.id != review.id);
        }
        Ok(())
    }

    async fn mark_helpful(
        &self,
        review: &ReviewRecord,
        _viewer: &ViewerId,
    ) -> Result<Option<ReviewRecord>, GatewayError> {
        let mut reviews = self.reviews.borrow_mut();
        let Some(existing) = reviews
            .get_mut(&review.entity_key)
            .and_then(|collection| collection.iter_mut().find(|r| r.id == review.id))
        else {
            return Ok(None);
        };
        existing.helpful_count = existing.helpful_count.saturating_add(1);
        Ok(Some(existing.clone()))
    }

    async fn has_active_session(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_utils::{InteractionOp, InteractionState};
    use futures::executor::block_on;

    #[test]
    fn test_first_read_settles() {
        let demo: DemoGateway<InteractionState> = DemoGateway::new(120);
        let key = EntityKey::new("demo-tool");

        let first = block_on(demo.fetch_state(&key, None)).unwrap();
        let second = block_on(demo.fetch_state(&key, None)).unwrap();

        assert_eq!(first, second);
        assert!(first.count <= 120);
        assert!(!first.viewer_engaged);
    }

    #[test]
    fn test_same_key_same_numbers_across_instances() {
        let key = EntityKey::new("demo-tool");
        let a: DemoGateway<InteractionState> = DemoGateway::new(120);
        let b: DemoGateway<InteractionState> = DemoGateway::new(120);

        assert_eq!(
            block_on(a.fetch_state(&key, None)),
            block_on(b.fetch_state(&key, None))
        );
    }

    #[test]
    fn test_mutations_stick() {
        let demo: DemoGateway<InteractionState> = DemoGateway::new(0);
        let key = EntityKey::new("demo-tool");
        let viewer = ViewerId::new("viewer");

        let liked = block_on(demo.mutate(&key, &viewer, InteractionOp::Increment)).unwrap();
        assert_eq!(liked, Some(InteractionState::new(1, true)));
        assert_eq!(
            block_on(demo.fetch_state(&key, None)).unwrap(),
            InteractionState::new(1, true)
        );

        block_on(demo.mutate(&key, &viewer, InteractionOp::Decrement)).unwrap();
        // floor at zero
        let again = block_on(demo.mutate(&key, &viewer, InteractionOp::Decrement)).unwrap();
        assert_eq!(again, Some(InteractionState::new(0, false)));
    }

    #[test]
    fn test_demo_reviews_lifecycle() {
        let demo = DemoReviews::new();
        let key = EntityKey::new("demo-tool");
        let author = ViewerId::new("author");

        assert!(block_on(demo.list_reviews(&key)).unwrap().is_empty());

        let draft = ReviewDraft::new(4, "handy for quick diffs").unwrap();
        let created = block_on(demo.create_review(&key, &author, &draft)).unwrap();
        assert_eq!(created.entity_key, key);

        let edit = ReviewDraft::new(2, "handy, but slow on big repos").unwrap();
        let updated = block_on(demo.update_review(&created, &edit)).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);

        let helped = block_on(demo.mark_helpful(&updated, &author)).unwrap();
        assert_eq!(helped.map(|r| r.helpful_count), Some(1));

        block_on(demo.delete_review(&updated)).unwrap();
        assert!(block_on(demo.list_reviews(&key)).unwrap().is_empty());
    }
}
