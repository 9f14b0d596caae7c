//! Optimistic state for social interactions (likes, bookmarks, reviews) on catalog entities.
//! It was created for the toolshelf frontend, so it only covers what that needed.
//!
//! Protocol:
//! 1. Reads never wait. A store hands back whatever it has cached and, if that is missing or
//!    stale, refreshes in the background. Observers hear about the new value through listeners.
//! 2. A mutation takes the entity's ticket (at most one per entity, a second attempt fails
//!    instead of queueing), snapshots the current value, publishes its guess immediately, then
//!    asks the remote.
//! 3. The remote's answer replaces the guess. A failure puts the snapshot back exactly.
//! 4. Entities whose ids don't look like real database ids never reach the network: an
//!    in-memory demo gateway stands in for the remote with the same contract.

pub mod bulk;
pub mod config;
pub mod demo;
pub mod error;
pub mod gateway;
pub mod listeners;
mod releases;
pub mod reviews;
pub mod store;
pub mod ticket;

#[cfg(test)]
mod testing;

use std::fmt::Debug;

use catalog_utils::{InteractionOp, InteractionState};
use rand_chacha::ChaCha8Rng;

pub use bulk::{BulkLoader, Loaded};
pub use config::StoreConfig;
pub use demo::{DemoGateway, DemoReviews};
pub use error::{Error, GatewayError};
pub use gateway::{Backends, Gateway, ReviewGateway, Route};
pub use listeners::ListenerKey;
pub use reviews::ReviewLifecycle;
pub use store::OptimisticStore;
pub use ticket::{MutationTicket, Tickets};

/// State that can be changed speculatively by a single toggle op.
pub trait Optimistic: Clone + Default + PartialEq + Debug + 'static {
    type Op: Copy + Debug + 'static;

    /// The op a toggle issues from this state.
    fn toggle_op(&self) -> Self::Op;

    /// The state after `op`. Must be the same rule the remote applies.
    fn apply(&self, op: Self::Op) -> Self;
}

/// Plausible stand-in values for entities that only exist as demo data.
pub trait Synthesize {
    fn synthesize(rng: &mut ChaCha8Rng, ceiling: u32) -> Self;
}

impl Optimistic for InteractionState {
    type Op = InteractionOp;

    fn toggle_op(&self) -> InteractionOp {
        InteractionState::toggle_op(self)
    }

    fn apply(&self, op: InteractionOp) -> Self {
        InteractionState::apply(self, op)
    }
}

impl Synthesize for InteractionState {
    fn synthesize(rng: &mut ChaCha8Rng, ceiling: u32) -> Self {
        use rand::Rng;

        InteractionState::new(rng.gen_range(0..=ceiling), false)
    }
}
