// ABOUTME: Error taxonomy for the message hub, unifying codec, transport and routing failures
// ABOUTME: Internal code returns these via Result; the public facade collapses them to bool

use thiserror::Error;

/// Errors that can occur anywhere in the hub's codec, transport, or routing paths.
///
/// Per the propagation policy, none of these escape the public facade
/// (`PubSubHub::create`/`connect`/`publish`/`subscribe`/`unsubscribe`): the facade and
/// the hub-core operations log and collapse them to a boolean at the boundary.
/// The enum stays richly structured internally so unit tests can assert on the
/// specific failure mode rather than on a flattened `bool`.
#[derive(Debug, Error)]
pub enum HubError {
    /// A frame's header + topic + body would exceed the 8192-byte wire ceiling.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// DNS resolution or the initial TCP connect failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The acceptor could not be bound to the requested address.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// `accept()` on an already-bound listener failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A received frame's header failed verification (bad magic or length bounds).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A transport error on an established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection's write queue is gone (the peer connection has closed).
    #[error("connection is closing")]
    Closed,
}

pub type Result<T> = std::result::Result<T, HubError>;
