//! In-flight cache writes.
//!
//! A fetch reserves a ticket before it starts and commits its result through
//! it. Invalidations that land in between revoke the ticket, so data that was
//! requested before the invalidation never reaches the cache after it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) struct TicketState {
    id: u64,
    pub(crate) tags: BTreeSet<String>,
    revoked: AtomicBool,
}

impl TicketState {
    /// Revoke; returns true if this call did it.
    pub(crate) fn revoke(&self) -> bool {
        !self.revoked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }
}

pub(crate) type PendingWrites = DashMap<String, Vec<Arc<TicketState>>>;

/// Reservation for a future write of one key.
///
/// Dropping an uncommitted ticket releases the reservation.
#[derive(Debug)]
pub struct WriteTicket {
    key: String,
    pub(crate) state: Arc<TicketState>,
    pending: Arc<PendingWrites>,
}

impl WriteTicket {
    pub(crate) fn register(
        key: &str,
        tags: BTreeSet<String>,
        pending: &Arc<PendingWrites>,
    ) -> Self {
        let state = Arc::new(TicketState {
            id: NEXT_TICKET.fetch_add(1, Ordering::Relaxed),
            tags,
            revoked: AtomicBool::new(false),
        });
        pending
            .entry(key.to_string())
            .or_default()
            .push(state.clone());

        Self {
            key: key.to_string(),
            state,
            pending: pending.clone(),
        }
    }

    /// Key this ticket writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tags the write will carry.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.state.tags
    }

    /// Check if an invalidation revoked this write.
    pub fn is_revoked(&self) -> bool {
        self.state.is_revoked()
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        let id = self.state.id;
        let now_empty = match self.pending.get_mut(&self.key) {
            Some(mut tickets) => {
                tickets.retain(|t| t.id != id);
                tickets.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.pending.remove_if(&self.key, |_, tickets| tickets.is_empty());
        }
    }
}
