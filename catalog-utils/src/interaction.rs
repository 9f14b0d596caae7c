use serde::{Deserialize, Serialize};

/// Which social interaction a count/flag pair tracks.
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Bookmark,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Bookmark => "bookmark",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOp {
    Increment,
    Decrement,
}

/// Like or bookmark state for one entity, as seen by one viewer.
#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct InteractionState {
    pub count: u32,
    pub viewer_engaged: bool,
}

impl InteractionState {
    pub fn new(count: u32, viewer_engaged: bool) -> Self {
        Self {
            count,
            viewer_engaged,
        }
    }

    /// The op a toggle issues from this state.
    pub fn toggle_op(&self) -> InteractionOp {
        if self.viewer_engaged {
            InteractionOp::Decrement
        } else {
            InteractionOp::Increment
        }
    }

    /// Moves the count by exactly one, flooring at zero, and sets the flag to match the op.
    pub fn apply(&self, op: InteractionOp) -> Self {
        match op {
            InteractionOp::Increment => Self {
                count: self.count.saturating_add(1),
                viewer_engaged: true,
            },
            InteractionOp::Decrement => Self {
                count: self.count.saturating_sub(1),
                viewer_engaged: false,
            },
        }
    }
}
