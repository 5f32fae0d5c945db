//! Multi-process coordination over TCP.
//!
//! The designated coordinator process runs a [`CoordinatorServer`] in front
//! of its local authority. Workers call [`Coordinator::connect`] and get a
//! handle with the same API as the in-process one.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use super::actor::{Command, Notice, ReleaseKind};
use super::handle::Coordinator;
use super::protocol::{WireCommand, WireMessage};
use super::table::AcquireOutcome;
use crate::cache::{DerivativeId, RequesterId};
use crate::config::CoordinatorConfig;
use crate::error::{DeriveError, DeriveResult};

type Key = (DerivativeId, RequesterId);

/// Exposes a coordinator to worker processes.
pub struct CoordinatorServer {
    listener: TcpListener,
    coordinator: Coordinator,
    buffer: usize,
}

impl CoordinatorServer {
    pub async fn bind(
        addr: SocketAddr,
        coordinator: Coordinator,
        config: &CoordinatorConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            coordinator,
            buffer: config.command_buffer,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept workers until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        tracing::info!("Coordinator listening on {}", self.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!("Worker connected from {}", peer);
            let coordinator = self.coordinator.clone();
            let buffer = self.buffer;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, coordinator, buffer).await {
                    tracing::warn!("Worker {} disconnected: {}", peer, e);
                } else {
                    tracing::debug!("Worker {} disconnected", peer);
                }
            });
        }
    }
}

/// Keys one worker connection owns or is queued on.
#[derive(Debug, Default)]
struct Session {
    owned: HashSet<Key>,
    queued: HashSet<Key>,
}

impl Session {
    fn acquired(&mut self, key: Key, outcome: AcquireOutcome) {
        match outcome {
            AcquireOutcome::Reserved => self.owned.insert(key),
            AcquireOutcome::Queued => self.queued.insert(key),
        };
    }

    fn released(&mut self, key: &Key) {
        self.owned.remove(key);
    }

    /// The waiter got its notice or withdrew.
    fn settled(&mut self, key: &Key) {
        self.queued.remove(key);
    }

    /// Abort what the worker still owns and withdraw what it still waits on.
    fn close(self, coordinator: &Coordinator) {
        for (identity, requester) in self.owned {
            tracing::warn!("Aborting {} held by disconnected worker", identity);
            coordinator.release(identity, requester, ReleaseKind::Aborted);
        }
        for (identity, requester) in self.queued {
            coordinator.withdraw(identity, requester);
        }
    }
}

/// Bridge one worker connection onto the local authority. Reservations the
/// worker still owns when it disconnects are aborted.
async fn serve_connection(
    stream: TcpStream,
    coordinator: Coordinator,
    buffer: usize,
) -> DeriveResult<()> {
    let (reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(buffer);
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<(Key, Option<WireCommand>)>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let line = message.encode()?;
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| DeriveError::CoordinatorUnavailable(e.to_string()))?;
        }
        Ok::<_, DeriveError>(())
    });

    let mut session = Session::default();
    let mut lines = BufReader::new(reader).lines();

    let result = loop {
        tokio::select! {
            Some((key, cmd)) = notice_rx.recv() => {
                session.settled(&key);
                if let Some(cmd) = cmd {
                    if out_tx.send(WireMessage::new(cmd, key.0, key.1)).await.is_err() {
                        break Ok(());
                    }
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(DeriveError::CoordinatorUnavailable(e.to_string())),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message = match WireMessage::decode(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Ignoring message: {}", e);
                        continue;
                    }
                };
                let key = message.key();

                match message.cmd {
                    WireCommand::Acquire => {
                        let (outcome, notice) = match coordinator.submit(key.0.clone(), key.1).await {
                            Ok(submitted) => submitted,
                            Err(e) => break Err(e),
                        };
                        let reply = match outcome {
                            AcquireOutcome::Reserved => WireCommand::Reserved,
                            AcquireOutcome::Queued => {
                                tokio::spawn(forward_notice(key.clone(), notice, notice_tx.clone()));
                                WireCommand::Queued
                            }
                        };
                        session.acquired(key.clone(), outcome);
                        if out_tx.send(WireMessage::new(reply, key.0, key.1)).await.is_err() {
                            break Ok(());
                        }
                    }
                    WireCommand::Release | WireCommand::Abort => {
                        let kind = if message.cmd == WireCommand::Release {
                            ReleaseKind::Completed
                        } else {
                            ReleaseKind::Aborted
                        };
                        session.released(&key);
                        coordinator.release(key.0, key.1, kind);
                    }
                    WireCommand::Withdraw => {
                        session.settled(&key);
                        coordinator.withdraw(key.0, key.1);
                    }
                    other => tracing::warn!("Ignoring {:?} sent by a worker", other),
                }
            }
        }
    };

    session.close(&coordinator);

    drop(out_tx);
    match writer_task.await {
        Ok(Err(e)) if result.is_ok() => Err(e),
        _ => result,
    }
}

/// Wait for a queued requester's notice and hand it back to the connection
/// loop. A dropped notice settles the key without a message.
async fn forward_notice(
    key: Key,
    notice: oneshot::Receiver<Notice>,
    settled: mpsc::UnboundedSender<(Key, Option<WireCommand>)>,
) {
    let cmd = match notice.await {
        Ok(Notice::Released) => Some(WireCommand::Released),
        Ok(Notice::Expired) => Some(WireCommand::Expired),
        Err(_) => None,
    };
    let _ = settled.send((key, cmd));
}

impl Coordinator {
    /// Connect to a designated coordinator process.
    pub async fn connect(addr: SocketAddr) -> DeriveResult<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            DeriveError::CoordinatorUnavailable(format!("cannot reach coordinator at {addr}: {e}"))
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(e) = link(stream, rx).await {
                tracing::warn!("Lost coordinator link to {}: {}", addr, e);
            }
        });
        tracing::debug!("Connected to coordinator at {}", addr);
        Ok(Coordinator::from_sender(tx))
    }
}

/// Multiplex local commands onto the socket and route replies back to the
/// futures waiting on them. When the link ends, every pending future fails.
async fn link(stream: TcpStream, mut commands: mpsc::UnboundedReceiver<Command>) -> DeriveResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut replies: HashMap<Key, oneshot::Sender<AcquireOutcome>> = HashMap::new();
    let mut notices: HashMap<Key, oneshot::Sender<Notice>> = HashMap::new();
    let io_err = |e: std::io::Error| DeriveError::CoordinatorUnavailable(e.to_string());

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                let message = match command {
                    Command::Acquire { identity, requester, reply, notice } => {
                        let key = (identity.clone(), requester);
                        replies.insert(key.clone(), reply);
                        notices.insert(key, notice);
                        WireMessage::new(WireCommand::Acquire, identity, requester)
                    }
                    Command::Release { identity, requester, kind } => {
                        let cmd = match kind {
                            ReleaseKind::Completed => WireCommand::Release,
                            ReleaseKind::Aborted => WireCommand::Abort,
                        };
                        WireMessage::new(cmd, identity, requester)
                    }
                    Command::Withdraw { identity, requester } => {
                        notices.remove(&(identity.clone(), requester));
                        WireMessage::new(WireCommand::Withdraw, identity, requester)
                    }
                };
                writer.write_all(message.encode()?.as_bytes()).await.map_err(io_err)?;
            }
            line = lines.next_line() => {
                let Some(line) = line.map_err(io_err)? else {
                    return Err(DeriveError::CoordinatorUnavailable("coordinator closed the connection".into()));
                };
                let message = match WireMessage::decode(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Ignoring message: {}", e);
                        continue;
                    }
                };
                let key = message.key();
                match message.cmd {
                    WireCommand::Reserved => {
                        notices.remove(&key);
                        if let Some(reply) = replies.remove(&key) {
                            if reply.send(AcquireOutcome::Reserved).is_err() {
                                // nobody will ever release it otherwise
                                let abort = WireMessage::new(WireCommand::Abort, key.0, key.1);
                                writer.write_all(abort.encode()?.as_bytes()).await.map_err(io_err)?;
                            }
                        }
                    }
                    WireCommand::Queued => {
                        if let Some(reply) = replies.remove(&key) {
                            let _ = reply.send(AcquireOutcome::Queued);
                        }
                    }
                    WireCommand::Released | WireCommand::Expired => {
                        let notice = if message.cmd == WireCommand::Released {
                            Notice::Released
                        } else {
                            Notice::Expired
                        };
                        if let Some(tx) = notices.remove(&key) {
                            let _ = tx.send(notice);
                        }
                    }
                    other => tracing::warn!("Ignoring {:?} sent by the coordinator", other),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SourceId;
    use crate::coordinator::Acquisition;
    use crate::params::DeriveParams;

    fn identity(tag: &str) -> DerivativeId {
        DerivativeId::new(&SourceId::parse(tag).unwrap(), &DeriveParams::default())
    }

    async fn start_server() -> SocketAddr {
        let config = CoordinatorConfig::default();
        let local = Coordinator::spawn_local(&config);
        let server = CoordinatorServer::bind("127.0.0.1:0".parse().unwrap(), local, &config)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    #[tokio::test]
    async fn test_two_workers_share_one_authority() {
        let addr = start_server().await;
        let worker_a = Coordinator::connect(addr).await.unwrap();
        let worker_b = Coordinator::connect(addr).await.unwrap();
        let id = identity("remote");

        let Acquisition::Reserved(guard) = worker_a.acquire(id.clone(), RequesterId::new()).await.unwrap() else {
            panic!("first worker should own the identity");
        };
        let Acquisition::Queued(pending) = worker_b.acquire(id.clone(), RequesterId::new()).await.unwrap() else {
            panic!("second worker should queue");
        };

        let waiter = tokio::spawn(pending.wait());
        guard.complete();
        assert_eq!(waiter.await.unwrap().unwrap(), Notice::Released);
    }

    #[tokio::test]
    async fn test_disconnected_owner_is_aborted() {
        let addr = start_server().await;
        let worker_b = Coordinator::connect(addr).await.unwrap();
        let id = identity("crash");

        // speak the protocol directly so the connection can be cut mid-reservation
        let mut raw = TcpStream::connect(addr).await.unwrap();
        let acquire = WireMessage::new(WireCommand::Acquire, id.clone(), RequesterId::new());
        raw.write_all(acquire.encode().unwrap().as_bytes()).await.unwrap();
        let mut lines = BufReader::new(&mut raw).lines();
        let reply = WireMessage::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.cmd, WireCommand::Reserved);

        let Acquisition::Queued(pending) = worker_b.acquire(id.clone(), RequesterId::new()).await.unwrap() else {
            panic!("expected to queue behind the raw client");
        };
        drop(lines);
        drop(raw);
        assert_eq!(pending.wait().await.unwrap(), Notice::Expired);
    }

    #[test]
    fn test_session_forgets_settled_waiters() {
        let mut session = Session::default();
        let owner = (identity("session"), RequesterId::new());
        let waiter = (identity("session"), RequesterId::new());

        session.acquired(owner.clone(), AcquireOutcome::Reserved);
        session.acquired(waiter.clone(), AcquireOutcome::Queued);
        assert_eq!((session.owned.len(), session.queued.len()), (1, 1));

        session.settled(&waiter);
        session.released(&owner);
        assert!(session.owned.is_empty());
        assert!(session.queued.is_empty());
    }

    #[tokio::test]
    async fn test_one_connection_waits_repeatedly() {
        let addr = start_server().await;
        let owner = Coordinator::connect(addr).await.unwrap();
        let waiter = Coordinator::connect(addr).await.unwrap();

        for round in 0..20 {
            let id = identity(&format!("round{round}"));
            let Acquisition::Reserved(guard) = owner.acquire(id.clone(), RequesterId::new()).await.unwrap() else {
                panic!("owner should reserve round {round}");
            };
            let Acquisition::Queued(pending) = waiter.acquire(id, RequesterId::new()).await.unwrap() else {
                panic!("waiter should queue in round {round}");
            };
            let notice = tokio::spawn(pending.wait());
            guard.complete();
            assert_eq!(notice.await.unwrap().unwrap(), Notice::Released);
        }
    }

    #[tokio::test]
    async fn test_unreachable_coordinator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = Coordinator::connect(addr).await.err().unwrap();
        assert!(matches!(err, DeriveError::CoordinatorUnavailable(_)));
    }
}
