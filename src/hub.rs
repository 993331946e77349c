// ABOUTME: Subscription tables, routing, acceptor loop, and the single outbound uplink
// ABOUTME: The public facade (lib.rs) is a thin Arc<HubInner> wrapper delegating every call here

use crate::connection::{PeerConnection, RouteSink};
use crate::error::{HubError, Result};
use crate::frame::{Action, Frame};
use crate::session::SubscriberSession;
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A user-installed local handler: `(topic, body)`.
pub type Handler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// `local_subs` and `remote_subs`, behind the single mutex §5 calls for.
#[derive(Default)]
struct Tables {
    local: HashMap<Vec<u8>, Handler>,
    remote: HashMap<Vec<u8>, Vec<Weak<SubscriberSession>>>,
}

pub(crate) struct HubInner {
    tables: Mutex<Tables>,
    uplink: ArcSwapOption<PeerConnection>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<HubInner>,
}

impl HubInner {
    pub(crate) fn new() -> Arc<HubInner> {
        Arc::new_cyclic(|self_ref| HubInner {
            tables: Mutex::new(Tables::default()),
            uplink: ArcSwapOption::from(None),
            acceptor: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Bind a listener on `0.0.0.0:port`, start accepting, and bring up a
    /// loopback uplink to `localhost:port`. Mirrors `msghub::create`.
    pub(crate) async fn create(&self, port: u16) -> bool {
        let listener = match bind_listener(port).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(port, error = %e, "failed to bind acceptor");
                return false;
            }
        };

        let accept_hub = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            accept_loop(accept_hub, listener).await;
        });
        *self.acceptor.lock().unwrap() = Some(handle);
        tracing::info!(port, "acceptor bound");

        self.connect("localhost", port).await
    }

    /// Bring up only the uplink, to an arbitrary remote hub. Mirrors `msghub::connect`.
    pub(crate) async fn connect(&self, host: &str, port: u16) -> bool {
        match PeerConnection::connect(host, port).await {
            Ok((conn, read_half)) => {
                let route: Arc<dyn RouteSink> = Arc::new(UplinkRoute {
                    hub: self.self_ref.clone(),
                });
                conn.start_read_loop(read_half, route);
                self.uplink.store(Some(conn));
                tracing::info!(host, port, "uplink established");
                true
            }
            Err(e) => {
                tracing::warn!(host, port, error = %e, "uplink connect failed");
                false
            }
        }
    }

    /// Enqueue a publish frame on the uplink, non-blocking. Mirrors `msghub::publish`.
    pub(crate) fn publish(&self, topic: &[u8], body: &[u8]) -> bool {
        let Some(uplink) = self.uplink.load_full() else {
            return false;
        };
        let frame = match Frame::new(Action::Publish, topic.to_vec(), body.to_vec()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "publish rejected");
                return false;
            }
        };
        match uplink.enqueue(&frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "publish enqueue failed");
                false
            }
        }
    }

    /// Insert or replace a local handler. Writes a blocking subscribe frame
    /// upstream only when the topic is new. Mirrors `msghub::subscribe`.
    pub(crate) async fn subscribe(&self, topic: &[u8], handler: Handler) -> bool {
        let is_new = {
            let mut tables = self.tables.lock().unwrap();
            match tables.local.insert(topic.to_vec(), handler) {
                Some(_) => false,
                None => true,
            }
        };

        if !is_new {
            // Re-subscription: handler updated in place, no wire traffic.
            return true;
        }

        let Some(uplink) = self.uplink.load_full() else {
            return false;
        };
        let frame = match Frame::new(Action::Subscribe, topic.to_vec(), Vec::new()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "subscribe frame rejected");
                return false;
            }
        };
        match uplink.write_blocking(&frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "subscribe write failed");
                false
            }
        }
    }

    /// Remove a local handler if present and write a blocking unsubscribe frame
    /// upstream. No-op (returns false) if the topic wasn't locally subscribed.
    /// Mirrors `msghub::unsubscribe`.
    pub(crate) async fn unsubscribe(&self, topic: &[u8]) -> bool {
        let was_subscribed = {
            let mut tables = self.tables.lock().unwrap();
            tables.local.remove(topic).is_some()
        };
        if !was_subscribed {
            return false;
        }

        let Some(uplink) = self.uplink.load_full() else {
            return false;
        };
        let frame = match Frame::new(Action::Unsubscribe, topic.to_vec(), Vec::new()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "unsubscribe frame rejected");
                return false;
            }
        };
        match uplink.write_blocking(&frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "unsubscribe write failed");
                false
            }
        }
    }

    /// Atomically clear the uplink (closing it gracefully), cancel the acceptor.
    /// Idempotent: clearing an already-empty uplink or aborting an already-taken
    /// acceptor handle is a no-op. Mirrors `msghub::stop`.
    pub(crate) fn stop(&self) {
        if let Some(old) = self.uplink.swap(None) {
            old.close(false);
        }
        if let Some(handle) = self.acceptor.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!("hub stopped");
    }

    /// Invoked for every frame arriving on the uplink. Looks up the local
    /// handler under the tables lock, copies it out, releases the lock, then
    /// calls it - handler invocation never happens while holding the lock.
    fn deliver(&self, frame: Frame) {
        let handler = {
            let tables = self.tables.lock().unwrap();
            tables.local.get(frame.topic()).cloned()
        };
        match handler {
            Some(handler) => handler(frame.topic_str().as_ref(), frame.body()),
            None => tracing::trace!(topic = %frame.topic_str(), "no local subscriber, dropping"),
        }
    }

    /// Invoked for every frame arriving on a server-side subscriber session.
    fn distribute(&self, session: Arc<SubscriberSession>, frame: Frame) {
        match frame.action() {
            Action::Publish => {
                let targets = {
                    let mut tables = self.tables.lock().unwrap();
                    let mut alive = Vec::new();
                    if let Some(subs) = tables.remote.get_mut(frame.topic()) {
                        subs.retain(|weak| match weak.upgrade() {
                            Some(strong) => {
                                alive.push(strong);
                                true
                            }
                            None => {
                                tracing::debug!(
                                    topic = %frame.topic_str(),
                                    "pruning dead subscriber on publish"
                                );
                                false
                            }
                        });
                    }
                    alive
                };
                for target in targets {
                    target.forward(&frame);
                }
            }
            Action::Subscribe => {
                let mut tables = self.tables.lock().unwrap();
                // Coarse prune across the whole map before inserting.
                for (topic, subs) in tables.remote.iter_mut() {
                    subs.retain(|weak| {
                        let alive = weak.strong_count() > 0;
                        if !alive {
                            tracing::debug!(
                                topic = %String::from_utf8_lossy(topic),
                                "pruning dead subscriber on subscribe"
                            );
                        }
                        alive
                    });
                }
                tables
                    .remote
                    .entry(frame.topic().to_vec())
                    .or_default()
                    .push(Arc::downgrade(&session));
            }
            Action::Unsubscribe => {
                let mut tables = self.tables.lock().unwrap();
                if let Some(subs) = tables.remote.get_mut(frame.topic()) {
                    subs.retain(|weak| match weak.upgrade() {
                        Some(strong) => !Arc::ptr_eq(&strong, &session),
                        None => false,
                    });
                }
            }
        }
    }
}

/// Routes frames arriving on the uplink to `HubInner::deliver`.
struct UplinkRoute {
    hub: Weak<HubInner>,
}

impl RouteSink for UplinkRoute {
    fn route(&self, frame: Frame) {
        if let Some(hub) = self.hub.upgrade() {
            hub.deliver(frame);
        }
    }
}

/// Routes frames arriving on one accepted session to `HubInner::distribute`.
///
/// Holds the session by a *strong* reference: per §5's "lifetime extension",
/// the read-loop task (which owns this route for its whole lifetime) is what
/// keeps a `SubscriberSession` alive for the duration of its I/O. Once that
/// task exits, this is the last strong owner and the session is dropped;
/// any `Weak` left behind in `remote_subs` then fails to upgrade and is
/// pruned lazily on the next routing pass, per the weak-subscriber design.
struct SessionRoute {
    hub: Weak<HubInner>,
    session: Arc<SubscriberSession>,
}

impl RouteSink for SessionRoute {
    fn route(&self, frame: Frame) {
        if let Some(hub) = self.hub.upgrade() {
            hub.distribute(Arc::clone(&self.session), frame);
        }
    }
}

/// Bind the acceptor's listening socket, collapsing a bind failure into the
/// hub's error taxonomy rather than the bare `io::Error` tokio returns.
async fn bind_listener(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(HubError::BindFailed)
}

/// Accept connections until the listener errors (which happens when the
/// acceptor's `JoinHandle` is aborted out from under a pending `accept()`, or
/// the OS reports a transient error). Each accepted socket becomes a
/// `SubscriberSession` whose read loop is started immediately, then the next
/// accept is queued right away - matching §4.3's acceptor loop.
async fn accept_loop(hub: Weak<HubInner>, listener: TcpListener) {
    loop {
        let (stream, peer_addr) = match listener.accept().await.map_err(HubError::AcceptFailed) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(error = %e, "acceptor stopping");
                break;
            }
        };
        tracing::debug!(%peer_addr, "accepted subscriber connection");

        let (conn, read_half) = PeerConnection::new(stream);
        let session = Arc::new(SubscriberSession::new(Arc::clone(&conn)));
        let route: Arc<dyn RouteSink> = Arc::new(SessionRoute {
            hub: hub.clone(),
            session,
        });
        // The route (captured by the spawned read-loop task) is now the
        // session's sole strong owner: it lives exactly as long as that task.
        conn.start_read_loop(read_half, route);
    }
}
