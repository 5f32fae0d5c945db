//! Reservation bookkeeping owned by the authority task.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::{DerivativeId, RequesterId};

/// Result of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The requester now owns the identity and must compute it.
    Reserved,
    /// Another requester owns it; wait for the release notice.
    Queued,
}

#[derive(Debug, Clone)]
struct Reservation {
    owner: RequesterId,
    acquired_at: Instant,
}

/// A reservation removed from the table together with its waiters.
#[derive(Debug)]
pub struct Expired {
    pub identity: DerivativeId,
    pub owner: RequesterId,
    pub waiters: Vec<RequesterId>,
}

/// Who owns which identity and who is waiting for it.
///
/// Invariants: an identity has at most one owner; every waiting identity
/// has an owner; a requester appears at most once per identity.
#[derive(Debug, Default)]
pub struct ReservationTable {
    reserved: HashMap<DerivativeId, Reservation>,
    waiting: HashMap<DerivativeId, Vec<RequesterId>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `identity` for `requester`, or queue it behind the owner.
    /// The current owner acquiring again stays the owner.
    pub fn acquire(
        &mut self,
        identity: &DerivativeId,
        requester: RequesterId,
        now: Instant,
    ) -> AcquireOutcome {
        match self.reserved.entry(identity.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Reservation {
                    owner: requester,
                    acquired_at: now,
                });
                AcquireOutcome::Reserved
            }
            Entry::Occupied(slot) if slot.get().owner == requester => AcquireOutcome::Reserved,
            Entry::Occupied(_) => {
                let waiters = self.waiting.entry(identity.clone()).or_default();
                if !waiters.contains(&requester) {
                    waiters.push(requester);
                }
                AcquireOutcome::Queued
            }
        }
    }

    /// Release `identity` if `requester` owns it, returning the waiters to
    /// notify in arrival order. Releases by anyone else are ignored.
    pub fn release(
        &mut self,
        identity: &DerivativeId,
        requester: RequesterId,
    ) -> Option<Vec<RequesterId>> {
        match self.reserved.get(identity) {
            Some(reservation) if reservation.owner == requester => {
                self.reserved.remove(identity);
                Some(self.waiting.remove(identity).unwrap_or_default())
            }
            _ => None,
        }
    }

    /// Withdraw a waiter that no longer wants the notice.
    pub fn withdraw(&mut self, identity: &DerivativeId, requester: RequesterId) {
        if let Entry::Occupied(mut slot) = self.waiting.entry(identity.clone()) {
            slot.get_mut().retain(|w| *w != requester);
            if slot.get().is_empty() {
                slot.remove();
            }
        }
    }

    /// Remove every reservation older than `lease`.
    pub fn expire(&mut self, now: Instant, lease: Duration) -> Vec<Expired> {
        let stale: Vec<DerivativeId> = self
            .reserved
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.acquired_at) >= lease)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|identity| {
                let reservation = self.reserved.remove(&identity)?;
                let waiters = self.waiting.remove(&identity).unwrap_or_default();
                Some(Expired {
                    identity,
                    owner: reservation.owner,
                    waiters,
                })
            })
            .collect()
    }

    pub fn owner(&self, identity: &DerivativeId) -> Option<RequesterId> {
        self.reserved.get(identity).map(|r| r.owner)
    }

    pub fn waiters(&self, identity: &DerivativeId) -> &[RequesterId] {
        self.waiting.get(identity).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of reserved identities.
    pub fn len(&self) -> usize {
        self.reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}
