//! The reservation authority: one task, one table, commands in arrival order.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::table::{AcquireOutcome, ReservationTable};
use crate::cache::{DerivativeId, RequesterId};

/// What a waiter is told when its wait ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The owner finished; the artifact is on disk.
    Released,
    /// The owner failed or its lease expired; acquire again.
    Expired,
}

/// How an owner gives up its reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// The artifact was written.
    Completed,
    /// The owner failed without writing the artifact.
    Aborted,
}

pub(crate) enum Command {
    Acquire {
        identity: DerivativeId,
        requester: RequesterId,
        reply: oneshot::Sender<AcquireOutcome>,
        notice: oneshot::Sender<Notice>,
    },
    Release {
        identity: DerivativeId,
        requester: RequesterId,
        kind: ReleaseKind,
    },
    Withdraw {
        identity: DerivativeId,
        requester: RequesterId,
    },
}

/// Owns the reservation table. Nothing else mutates it.
pub(crate) struct Authority {
    table: ReservationTable,
    pending: HashMap<(DerivativeId, RequesterId), oneshot::Sender<Notice>>,
    lease: Option<Duration>,
    sweep_interval: Duration,
}

impl Authority {
    pub(crate) fn new(lease: Option<Duration>, sweep_interval: Duration) -> Self {
        Self {
            table: ReservationTable::new(),
            pending: HashMap::new(),
            lease,
            sweep_interval: sweep_interval.max(Duration::from_millis(1)),
        }
    }

    /// Process commands until every handle is dropped.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let leases = self.lease.is_some();

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command, Instant::now()),
                    None => break,
                },
                _ = sweep.tick(), if leases => self.sweep(Instant::now()),
            }
        }

        tracing::debug!(
            "Coordinator stopped with {} reservation(s) outstanding",
            self.table.len()
        );
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Acquire {
                identity,
                requester,
                reply,
                notice,
            } => {
                let outcome = self.table.acquire(&identity, requester, now);
                tracing::debug!("acquire {} by {}: {:?}", identity, requester, outcome);

                if outcome == AcquireOutcome::Queued {
                    self.pending.insert((identity.clone(), requester), notice);
                }

                if reply.send(outcome).is_err() {
                    // the requester went away before hearing back
                    match outcome {
                        AcquireOutcome::Reserved => {
                            self.release(&identity, requester, ReleaseKind::Aborted)
                        }
                        AcquireOutcome::Queued => self.withdraw(&identity, requester),
                    }
                }
            }
            Command::Release {
                identity,
                requester,
                kind,
            } => self.release(&identity, requester, kind),
            Command::Withdraw {
                identity,
                requester,
            } => self.withdraw(&identity, requester),
        }
    }

    fn release(&mut self, identity: &DerivativeId, requester: RequesterId, kind: ReleaseKind) {
        let Some(waiters) = self.table.release(identity, requester) else {
            tracing::debug!("release {} by {} ignored: not the owner", identity, requester);
            return;
        };
        let notice = match kind {
            ReleaseKind::Completed => Notice::Released,
            ReleaseKind::Aborted => Notice::Expired,
        };
        tracing::debug!(
            "release {} by {} ({:?}), notifying {} waiter(s)",
            identity,
            requester,
            kind,
            waiters.len()
        );
        self.notify(identity, waiters, notice);
    }

    fn withdraw(&mut self, identity: &DerivativeId, requester: RequesterId) {
        self.table.withdraw(identity, requester);
        self.pending.remove(&(identity.clone(), requester));
    }

    fn notify(&mut self, identity: &DerivativeId, waiters: Vec<RequesterId>, notice: Notice) {
        for waiter in waiters {
            if let Some(tx) = self.pending.remove(&(identity.clone(), waiter)) {
                let _ = tx.send(notice);
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let Some(lease) = self.lease else {
            return;
        };

        for expired in self.table.expire(now, lease) {
            tracing::warn!(
                "Lease on {} held by {} expired after {:?}; {} waiter(s) will retry",
                expired.identity,
                expired.owner,
                lease,
                expired.waiters.len()
            );
            self.notify(&expired.identity, expired.waiters, Notice::Expired);
        }

        // waiters whose receivers are gone no longer need a slot
        let gone: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, tx)| tx.is_closed())
            .map(|(key, _)| key.clone())
            .collect();
        for (identity, requester) in gone {
            self.withdraw(&identity, requester);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SourceId;
    use crate::params::DeriveParams;

    fn identity() -> DerivativeId {
        DerivativeId::new(&SourceId::parse("src").unwrap(), &DeriveParams::default())
    }

    fn acquire(
        authority: &mut Authority,
        identity: &DerivativeId,
        requester: RequesterId,
        now: Instant,
    ) -> (oneshot::Receiver<AcquireOutcome>, oneshot::Receiver<Notice>) {
        let (reply, reply_rx) = oneshot::channel();
        let (notice, notice_rx) = oneshot::channel();
        authority.handle(
            Command::Acquire {
                identity: identity.clone(),
                requester,
                reply,
                notice,
            },
            now,
        );
        (reply_rx, notice_rx)
    }

    #[test]
    fn test_release_notifies_only_matching_waiters() {
        let mut authority = Authority::new(None, Duration::from_secs(1));
        let id = identity();
        let (a, b, c) = (RequesterId::new(), RequesterId::new(), RequesterId::new());
        let now = Instant::now();

        let (mut ra, _na) = acquire(&mut authority, &id, a, now);
        let (mut rb, mut nb) = acquire(&mut authority, &id, b, now);
        let (mut rc, mut nc) = acquire(&mut authority, &id, c, now);
        assert_eq!(ra.try_recv().unwrap(), AcquireOutcome::Reserved);
        assert_eq!(rb.try_recv().unwrap(), AcquireOutcome::Queued);
        assert_eq!(rc.try_recv().unwrap(), AcquireOutcome::Queued);
        assert!(nb.try_recv().is_err());

        authority.handle(
            Command::Release {
                identity: id.clone(),
                requester: a,
                kind: ReleaseKind::Completed,
            },
            now,
        );
        assert_eq!(nb.try_recv().unwrap(), Notice::Released);
        assert_eq!(nc.try_recv().unwrap(), Notice::Released);
        assert!(authority.table.is_empty());
        assert!(authority.pending.is_empty());
    }

    #[test]
    fn test_abort_tells_waiters_to_retry() {
        let mut authority = Authority::new(None, Duration::from_secs(1));
        let id = identity();
        let (a, b) = (RequesterId::new(), RequesterId::new());
        let now = Instant::now();

        let (_ra, _na) = acquire(&mut authority, &id, a, now);
        let (_rb, mut nb) = acquire(&mut authority, &id, b, now);
        authority.handle(
            Command::Release {
                identity: id,
                requester: a,
                kind: ReleaseKind::Aborted,
            },
            now,
        );
        assert_eq!(nb.try_recv().unwrap(), Notice::Expired);
    }

    #[test]
    fn test_vanished_owner_releases_immediately() {
        let mut authority = Authority::new(None, Duration::from_secs(1));
        let id = identity();
        let (reply, reply_rx) = oneshot::channel();
        let (notice, _notice_rx) = oneshot::channel();
        drop(reply_rx);
        authority.handle(
            Command::Acquire {
                identity: id.clone(),
                requester: RequesterId::new(),
                reply,
                notice,
            },
            Instant::now(),
        );
        assert_eq!(authority.table.owner(&id), None);
    }

    #[test]
    fn test_sweep_expires_stale_owner() {
        let mut authority = Authority::new(Some(Duration::from_secs(60)), Duration::from_secs(5));
        let id = identity();
        let (a, b) = (RequesterId::new(), RequesterId::new());
        let start = Instant::now();

        let (_ra, _na) = acquire(&mut authority, &id, a, start);
        let (_rb, mut nb) = acquire(&mut authority, &id, b, start);

        authority.sweep(start + Duration::from_secs(30));
        assert!(nb.try_recv().is_err());

        authority.sweep(start + Duration::from_secs(61));
        assert_eq!(nb.try_recv().unwrap(), Notice::Expired);
        assert_eq!(authority.table.owner(&id), None);

        // the late release from the expired owner is ignored
        let (_rb2, _nb2) = acquire(&mut authority, &id, b, start + Duration::from_secs(62));
        authority.handle(
            Command::Release {
                identity: id.clone(),
                requester: a,
                kind: ReleaseKind::Completed,
            },
            start + Duration::from_secs(63),
        );
        assert_eq!(authority.table.owner(&id), Some(b));
    }

    #[test]
    fn test_sweep_drops_abandoned_waiters() {
        let mut authority = Authority::new(Some(Duration::from_secs(600)), Duration::from_secs(5));
        let id = identity();
        let (a, b) = (RequesterId::new(), RequesterId::new());
        let now = Instant::now();

        let (_ra, _na) = acquire(&mut authority, &id, a, now);
        let (_rb, nb) = acquire(&mut authority, &id, b, now);
        drop(nb);
        authority.sweep(now);
        assert!(authority.pending.is_empty());
        assert!(authority.table.waiters(&id).is_empty());
    }
}
