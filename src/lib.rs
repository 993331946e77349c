// ABOUTME: Embeddable topic-based publish/subscribe message hub over TCP
// ABOUTME: PubSubHub is the stable user-facing facade; see hub.rs for the routing core

//! An embeddable topic-based publish/subscribe message hub.
//!
//! A [`PubSubHub`] can act as a server ([`PubSubHub::create`]) that accepts TCP
//! subscriber connections, as a client ([`PubSubHub::connect`]) to a remote
//! hub, or as both at once - a hub created with `create` routes its own
//! publishes through a loopback connection to itself, so local and remote
//! subscribers are delivered to along the same code path.
//!
//! No authentication, no persistence, no message replay, and no
//! quality-of-service beyond best-effort ordered delivery per TCP connection.
//! Every public operation returns a plain `bool`; transient I/O and protocol
//! errors are logged via `tracing` and never escape to the caller.
//!
//! ```rust,no_run
//! use msghub::PubSubHub;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = PubSubHub::new();
//!     hub.create(0xBEE).await;
//!
//!     hub.subscribe("test_topic", |topic, body| {
//!         println!("{topic}: {} bytes", body.len());
//!     })
//!     .await;
//!
//!     hub.publish("test_topic", b"$testmessage$".to_vec());
//! }
//! ```

mod connection;
mod error;
mod frame;
mod hub;
mod session;

pub use error::HubError;
pub use frame::{Action, Frame};

use hub::{Handler, HubInner};
use std::sync::Arc;

/// The public façade: a cheaply-cloneable handle onto a hub's internal state.
///
/// All operations delegate to the hub core (`hub.rs`); this type exists only
/// to give the embedder a stable, narrow API surface (§4's component E).
#[derive(Clone)]
pub struct PubSubHub {
    inner: Arc<HubInner>,
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubHub {
    /// Create an idle hub with no acceptor and no uplink.
    pub fn new() -> Self {
        PubSubHub {
            inner: HubInner::new(),
        }
    }

    /// Bind a TCP acceptor on `0.0.0.0:port` (with address reuse) and
    /// establish a loopback uplink to `localhost:port`. Returns `true` iff
    /// both the bind and the uplink connect succeeded.
    pub async fn create(&self, port: u16) -> bool {
        self.inner.create(port).await
    }

    /// Establish an uplink to a remote hub at `host:port` without opening an
    /// acceptor of our own.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        self.inner.connect(host, port).await
    }

    /// Enqueue a publish frame on the uplink. Non-blocking: returns as soon as
    /// the frame is handed to the connection's write queue, not once it's on
    /// the wire. Returns `false` if there is no uplink or the frame would
    /// exceed the 8192-byte wire ceiling.
    pub fn publish(&self, topic: impl AsRef<str>, body: impl Into<Vec<u8>>) -> bool {
        self.inner.publish(topic.as_ref().as_bytes(), &body.into())
    }

    /// Install (or replace) a local handler for `topic`. If this is a new
    /// topic and an uplink exists, blocks until a subscribe frame has been
    /// written upstream before returning. Re-subscribing an existing topic
    /// just swaps the handler and returns `true` without emitting any frame.
    pub async fn subscribe<F>(&self, topic: impl AsRef<str>, handler: F) -> bool
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.inner.subscribe(topic.as_ref().as_bytes(), handler).await
    }

    /// Remove the local handler for `topic`, if any, and write an unsubscribe
    /// frame upstream. A no-op (returns `false`) if `topic` wasn't locally
    /// subscribed.
    pub async fn unsubscribe(&self, topic: impl AsRef<str>) -> bool {
        self.inner.unsubscribe(topic.as_ref().as_bytes()).await
    }

    /// Clear the uplink (closing it gracefully) and cancel the acceptor.
    /// Idempotent; every subsequent `publish`/`subscribe`/`unsubscribe` call
    /// returns `false` without performing any I/O.
    pub fn stop(&self) {
        self.inner.stop();
    }
}
