// ABOUTME: Server-side view of one accepted subscriber connection
// ABOUTME: Identity for the hub's weak remote-subscription table; thin wrapper over PeerConnection

use crate::connection::PeerConnection;
use crate::frame::Frame;
use std::sync::Arc;

/// One accepted TCP connection, as seen from the hub's server side.
///
/// `remote_subs` stores `Weak<SubscriberSession>` handles (see `hub.rs`); a
/// session is kept alive only by its own pending I/O, never by the
/// subscription table, so a vanished peer is free to be dropped and simply
/// stops being upgradable on the next routing pass over its topics.
pub(crate) struct SubscriberSession {
    pub(crate) conn: Arc<PeerConnection>,
}

impl SubscriberSession {
    #[tracing::instrument(skip(conn))]
    pub(crate) fn new(conn: Arc<PeerConnection>) -> Self {
        SubscriberSession { conn }
    }

    /// Forward a publish to this subscriber. Best-effort: a closed connection
    /// silently discards the write, matching §7's propagation policy.
    pub(crate) fn forward(&self, frame: &Frame) {
        if let Err(e) = self.conn.enqueue(frame) {
            tracing::debug!(error = %e, "dropping publish to a closing session");
        }
    }
}
