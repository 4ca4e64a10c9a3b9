//! In-memory registry of live socket connections.
//!
//! The registry keeps two indexes that must never disagree: channel → user →
//! connection for broadcast, and user → connections for cross-channel
//! delivery. All mutation happens inside the registry's own methods under a
//! single mutex; no await point is ever reached while the lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use waypoint_models::channel::ChannelId;
use waypoint_models::close::CloseCode;
use waypoint_models::frame::OutboundFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Commands consumed by a connection's writer task.
#[derive(Debug, Clone)]
pub enum SocketCommand {
    /// A serialized outbound frame, shared across a fan-out.
    Frame(Arc<String>),
    /// Close the socket with the given code and stop writing.
    Close(CloseCode),
}

/// Handle to one live connection: a bounded sender into its writer task
/// plus a process-unique identity used to guard against stale removals.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<SocketCommand>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn deliver(&self, payload: Arc<String>, timeout: Duration) -> bool {
        self.tx
            .send_timeout(SocketCommand::Frame(payload), timeout)
            .await
            .is_ok()
    }

    /// Direct reply to this connection, outside any fan-out.
    pub async fn send(&self, frame: &OutboundFrame, timeout: Duration) -> bool {
        match serialize(frame) {
            Some(payload) => self.deliver(payload, timeout).await,
            None => false,
        }
    }

    /// Best-effort close; a full or gone writer queue is not an error here
    /// because the connection is already being torn down.
    fn close(&self, code: CloseCode) {
        if self.tx.try_send(SocketCommand::Close(code)).is_err() {
            tracing::debug!(conn_id = self.id, code = code.code(), "close signal dropped");
        }
    }
}

/// Create a handle plus the receiver its writer task will drain.
pub fn connection_channel(buffer: usize) -> (ConnectionHandle, mpsc::Receiver<SocketCommand>) {
    let (tx, rx) = mpsc::channel(buffer);
    let handle = ConnectionHandle {
        id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        tx,
    };
    (handle, rx)
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Upper bound on each individual outbound send during fan-out.
    pub per_send_timeout: Duration,
    /// How often the reaper sweeps for idle connections.
    pub reaper_interval: Duration,
    /// Age since the last ping after which a connection is evicted.
    pub stale_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            per_send_timeout: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
        }
    }
}

struct Entry {
    handle: ConnectionHandle,
    last_ping: Instant,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelId, HashMap<i64, Entry>>,
    users: HashMap<i64, Vec<(ChannelId, ConnectionHandle)>>,
    reaper: Option<JoinHandle<()>>,
}

pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    config: RegistryConfig,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    stopping: AtomicBool,
}

impl ConnectionRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn new(config: RegistryConfig) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            config,
            stop_tx,
            stop_rx,
            stopping: AtomicBool::new(false),
        })
    }

    /// Register a connection. An existing connection for the same
    /// (channel, user) is superseded: removed from both indexes and sent a
    /// close. The shared reaper is started on first use.
    pub fn connect(self: &Arc<Self>, channel: ChannelId, user_id: i64, handle: ConnectionHandle) {
        let superseded = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            if inner.reaper.is_none() && !self.stopping.load(Ordering::SeqCst) {
                let registry = Arc::clone(self);
                inner.reaper = Some(tokio::spawn(registry.reap_loop()));
            }

            let old = inner.channels.entry(channel).or_default().insert(
                user_id,
                Entry {
                    handle: handle.clone(),
                    last_ping: Instant::now(),
                },
            );
            let conns = inner.users.entry(user_id).or_default();
            if let Some(old) = &old {
                conns.retain(|(c, h)| !(*c == channel && h.id == old.handle.id));
            }
            conns.push((channel, handle));
            old
        };

        if let Some(old) = superseded {
            tracing::debug!(%channel, user_id, conn_id = old.handle.id, "superseding connection");
            old.handle.close(CloseCode::Superseded);
        }
    }

    /// Remove a connection, but only if the stored identity matches; a stale
    /// handler racing a newer connection (or the reaper) must not remove it.
    /// Calling this twice is a no-op the second time.
    pub fn disconnect(&self, channel: ChannelId, user_id: i64, conn_id: u64) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let mut removed = false;
        let mut prune_channel = false;
        if let Some(bucket) = inner.channels.get_mut(&channel) {
            if bucket
                .get(&user_id)
                .is_some_and(|entry| entry.handle.id == conn_id)
            {
                bucket.remove(&user_id);
                removed = true;
            }
            prune_channel = bucket.is_empty();
        }
        if prune_channel {
            inner.channels.remove(&channel);
        }

        if removed {
            if let Some(conns) = inner.users.get_mut(&user_id) {
                conns.retain(|(c, h)| !(*c == channel && h.id == conn_id));
                if conns.is_empty() {
                    inner.users.remove(&user_id);
                }
            }
        }
        removed
    }

    /// Refresh liveness without touching membership.
    pub fn update_ping(&self, channel: ChannelId, user_id: i64, conn_id: u64) {
        let mut guard = self.lock();
        if let Some(entry) = guard
            .channels
            .get_mut(&channel)
            .and_then(|bucket| bucket.get_mut(&user_id))
        {
            if entry.handle.id == conn_id {
                entry.last_ping = Instant::now();
            }
        }
    }

    pub fn is_user_online(&self, user_id: i64) -> bool {
        let guard = self.lock();
        guard.users.get(&user_id).is_some_and(|v| !v.is_empty())
    }

    pub fn is_user_in_channel(&self, channel: ChannelId, user_id: i64) -> bool {
        let guard = self.lock();
        guard
            .channels
            .get(&channel)
            .is_some_and(|bucket| bucket.contains_key(&user_id))
    }

    /// Channels the user currently has a connection in.
    pub fn user_channels(&self, user_id: i64) -> Vec<ChannelId> {
        let guard = self.lock();
        guard
            .users
            .get(&user_id)
            .map(|conns| conns.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default()
    }

    /// Users currently connected to a channel.
    pub fn channel_user_ids(&self, channel: ChannelId) -> Vec<i64> {
        let guard = self.lock();
        guard
            .channels
            .get(&channel)
            .map(|bucket| bucket.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        let guard = self.lock();
        guard.channels.values().map(HashMap::len).sum()
    }

    /// Send a frame to every connection in the channel except
    /// `exclude_user`. Sends run concurrently, each under its own timeout;
    /// a recipient that fails or times out is evicted, never the others.
    pub async fn broadcast(
        &self,
        channel: ChannelId,
        exclude_user: Option<i64>,
        frame: &OutboundFrame,
    ) {
        let Some(payload) = serialize(frame) else {
            return;
        };
        let targets: Vec<(i64, ConnectionHandle)> = {
            let guard = self.lock();
            guard
                .channels
                .get(&channel)
                .map(|bucket| {
                    bucket
                        .iter()
                        .filter(|(uid, _)| Some(**uid) != exclude_user)
                        .map(|(uid, entry)| (*uid, entry.handle.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let timeout = self.config.per_send_timeout;
        let sends = targets.into_iter().map(|(uid, handle)| {
            let payload = payload.clone();
            async move {
                let ok = handle.deliver(payload, timeout).await;
                (uid, handle, ok)
            }
        });
        for (uid, handle, ok) in join_all(sends).await {
            if !ok {
                tracing::warn!(%channel, user_id = uid, conn_id = handle.id, "evicting unresponsive connection");
                self.disconnect(channel, uid, handle.id);
            }
        }
    }

    /// Deliver a frame to all of a user's connections, across channels.
    pub async fn send_to_user(&self, user_id: i64, frame: &OutboundFrame) -> usize {
        let Some(payload) = serialize(frame) else {
            return 0;
        };
        let targets: Vec<(ChannelId, ConnectionHandle)> = {
            let guard = self.lock();
            guard.users.get(&user_id).cloned().unwrap_or_default()
        };

        let timeout = self.config.per_send_timeout;
        let sends = targets.into_iter().map(|(channel, handle)| {
            let payload = payload.clone();
            async move {
                let ok = handle.deliver(payload, timeout).await;
                (channel, handle, ok)
            }
        });
        let mut delivered = 0;
        for (channel, handle, ok) in join_all(sends).await {
            if ok {
                delivered += 1;
            } else {
                tracing::warn!(%channel, user_id, conn_id = handle.id, "evicting unresponsive connection");
                self.disconnect(channel, user_id, handle.id);
            }
        }
        delivered
    }

    /// Stop the reaper and wait for it to drain. Completes even if the
    /// reaper task ended abnormally.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        let handle = {
            let mut guard = self.lock();
            guard.reaper.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("reaper task ended abnormally: {e}");
            }
        }
        tracing::info!("connection registry shut down");
    }

    async fn reap_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop_rx.clone();
        let mut interval = tokio::time::interval(self.config.reaper_interval);
        interval.tick().await; // skip immediate first tick
        tracing::debug!("reaper started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop_rx.changed() => break,
            }
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let stale: Vec<(ChannelId, i64, ConnectionHandle)> = {
                let guard = self.lock();
                guard
                    .channels
                    .iter()
                    .flat_map(|(channel, bucket)| {
                        bucket
                            .iter()
                            .filter(|(_, entry)| entry.last_ping.elapsed() > self.config.stale_after)
                            .map(|(uid, entry)| (*channel, *uid, entry.handle.clone()))
                    })
                    .collect()
            };

            // One bad entry must never kill the sweep.
            for (channel, user_id, handle) in stale {
                if self.disconnect(channel, user_id, handle.id) {
                    tracing::info!(%channel, user_id, conn_id = handle.id, "reaping stale connection");
                    handle.close(CloseCode::Stale);
                }
            }
        }
        tracing::debug!("reaper stopped");
    }
}

fn serialize(frame: &OutboundFrame) -> Option<Arc<String>> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            tracing::error!("failed to serialize outbound frame: {e}");
            None
        }
    }
}
