//! Types shared between the toolshelf frontend and anything else that talks to the catalog
//! backend: entity identity, interaction state, reviews and their aggregates.

pub mod entity;
pub mod interaction;
pub mod review;
pub mod summary;

pub use entity::{Backing, EntityKey, ViewerId};
pub use interaction::{InteractionKind, InteractionOp, InteractionState};
pub use review::{
    ReviewDraft, ReviewField, ReviewOrder, ReviewRecord, Stars, StarsMap, ValidationError,
};
pub use summary::{ReviewSummary, sort_reviews, summarize};
