//! Emission ordering of slot content.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Strategy for ordering content events in the output.
///
/// Either way, a slot's position in the page is its descriptor index; the
/// strategy only decides when its content event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Emit content in index order.
    /// May delay fast slots waiting for slow ones.
    #[default]
    Strict,

    /// Emit content as slots complete.
    /// Consumers place content by its index.
    OutOfOrder,
}

impl OrderingStrategy {
    /// Check if this strategy allows out-of-order delivery.
    pub fn allows_out_of_order(&self) -> bool {
        !matches!(self, Self::Strict)
    }
}

impl fmt::Display for OrderingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::OutOfOrder => write!(f, "out_of_order"),
        }
    }
}

/// Sort slots that became ready together: ascending priority, then index.
pub fn by_priority(batch: &mut [(usize, i32)]) {
    batch.sort_by_key(|&(index, priority)| (priority, index));
}
