//! Reservation coordinator.
//!
//! Guarantees that at most one requester computes a given derivative at a
//! time. A single authority task owns the reservation table and handles
//! `acquire`/`release` strictly in arrival order; requesters only hold a
//! [`Coordinator`] handle and talk to it with messages.
//!
//! ```text
//! requester ──acquire──▶ authority ──Reserved──▶ requester computes, then releases
//!                           │
//!                           └──Queued──▶ requester waits for Released / Expired
//! ```
//!
//! In a multi-process deployment one process runs a [`CoordinatorServer`]
//! and the workers reach it with [`Coordinator::connect`].

mod actor;
mod handle;
pub mod protocol;
mod remote;
mod table;

pub use actor::{Notice, ReleaseKind};
pub use handle::{Acquisition, Coordinator, PendingRelease, ReservationGuard};
pub use remote::CoordinatorServer;
pub use table::{AcquireOutcome, Expired, ReservationTable};
