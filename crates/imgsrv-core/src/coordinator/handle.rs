//! Requester-side handle to the reservation authority.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::actor::{Authority, Command, Notice, ReleaseKind};
use super::table::AcquireOutcome;
use crate::cache::{DerivativeId, RequesterId};
use crate::config::CoordinatorConfig;
use crate::error::{DeriveError, DeriveResult};

/// Cloneable handle for sending commands to the authority, whether it runs
/// in this process or behind a TCP connection.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<Command>,
}

/// The result of [`Coordinator::acquire`].
pub enum Acquisition {
    /// This requester owns the identity and must compute it.
    Reserved(ReservationGuard),
    /// Another requester is computing it.
    Queued(PendingRelease),
}

impl Coordinator {
    /// Start an in-process authority task.
    pub fn spawn_local(config: &CoordinatorConfig) -> Self {
        let lease = match config.lease_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let authority = Authority::new(lease, Duration::from_millis(config.sweep_interval_ms));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(authority.run(rx));
        Self { tx }
    }

    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Reserve `identity` for `requester` or queue behind its owner.
    pub async fn acquire(
        &self,
        identity: DerivativeId,
        requester: RequesterId,
    ) -> DeriveResult<Acquisition> {
        let (outcome, notice) = self.submit(identity.clone(), requester).await?;
        Ok(match outcome {
            AcquireOutcome::Reserved => Acquisition::Reserved(ReservationGuard {
                coordinator: self.clone(),
                identity,
                requester,
                armed: true,
            }),
            AcquireOutcome::Queued => Acquisition::Queued(PendingRelease {
                coordinator: self.clone(),
                identity,
                requester,
                notice,
                settled: false,
            }),
        })
    }

    /// Raw acquire: the outcome plus the receiver the notice arrives on.
    pub(crate) async fn submit(
        &self,
        identity: DerivativeId,
        requester: RequesterId,
    ) -> DeriveResult<(AcquireOutcome, oneshot::Receiver<Notice>)> {
        let (reply, reply_rx) = oneshot::channel();
        let (notice, notice_rx) = oneshot::channel();
        self.send(Command::Acquire {
            identity,
            requester,
            reply,
            notice,
        })?;
        let outcome = reply_rx.await.map_err(|_| unavailable())?;
        Ok((outcome, notice_rx))
    }

    /// Release a reservation owned by `requester`. Ignored by the authority
    /// if `requester` is not the owner.
    pub fn release(&self, identity: DerivativeId, requester: RequesterId, kind: ReleaseKind) {
        let _ = self.send(Command::Release {
            identity,
            requester,
            kind,
        });
    }

    pub(crate) fn withdraw(&self, identity: DerivativeId, requester: RequesterId) {
        let _ = self.send(Command::Withdraw {
            identity,
            requester,
        });
    }

    fn send(&self, command: Command) -> DeriveResult<()> {
        self.tx.send(command).map_err(|_| unavailable())
    }
}

fn unavailable() -> DeriveError {
    DeriveError::CoordinatorUnavailable("the coordinator task has stopped".into())
}

/// Proof of ownership of one identity.
///
/// Dropping the guard releases the reservation as aborted, so waiters retry;
/// call [`ReservationGuard::complete`] once the artifact is written.
pub struct ReservationGuard {
    coordinator: Coordinator,
    identity: DerivativeId,
    requester: RequesterId,
    armed: bool,
}

impl ReservationGuard {
    pub fn identity(&self) -> &DerivativeId {
        &self.identity
    }

    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    /// Release after the artifact was written; waiters read it.
    pub fn complete(mut self) {
        self.finish(ReleaseKind::Completed);
    }

    /// Release after a failure; waiters retry acquisition.
    pub fn abort(mut self) {
        self.finish(ReleaseKind::Aborted);
    }

    /// Keep the reservation without releasing it. Waiters are only freed by
    /// the lease sweep.
    pub fn abandon(mut self) {
        tracing::warn!(
            "Abandoning reservation {} held by {}",
            self.identity,
            self.requester
        );
        self.armed = false;
    }

    fn finish(&mut self, kind: ReleaseKind) {
        if std::mem::take(&mut self.armed) {
            self.coordinator
                .release(self.identity.clone(), self.requester, kind);
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.finish(ReleaseKind::Aborted);
    }
}

/// A queued requester waiting for the owner to finish.
///
/// Dropping it before the notice arrives withdraws the requester from the
/// waiter list.
pub struct PendingRelease {
    coordinator: Coordinator,
    identity: DerivativeId,
    requester: RequesterId,
    notice: oneshot::Receiver<Notice>,
    settled: bool,
}

impl PendingRelease {
    pub fn identity(&self) -> &DerivativeId {
        &self.identity
    }

    /// Suspend until the owner releases or its lease expires.
    pub async fn wait(mut self) -> DeriveResult<Notice> {
        let notice = (&mut self.notice).await.map_err(|_| {
            DeriveError::CoordinatorUnavailable(format!(
                "lost the coordinator while waiting for {}",
                self.identity
            ))
        });
        self.settled = true;
        notice
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .withdraw(self.identity.clone(), self.requester);
        }
    }
}
