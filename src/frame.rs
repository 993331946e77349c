// ABOUTME: Wire framing for the hub protocol: header layout, magic/version handling, and encoding
// ABOUTME: A frame is the atomic unit on the wire - action, topic, and opaque body

use crate::error::HubError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;

/// Size of the fixed header: topic_length(2) + body_length(2) + action(1) + magic(2).
pub const HEADER_SIZE: usize = 7;

/// Hard ceiling on `header + topic + body`, matching the original's `messagesize`.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Current wire version. Bumping this changes `CURRENT_MAGIC` but not the header layout.
const CURRENT_VERSION: u16 = 2;

/// Legacy version that predates network-byte-order lengths.
const LEGACY_VERSION: u16 = 1;

const fn cookie(version: u16) -> u16 {
    0xF00D ^ (version << 8)
}

/// Magic value written by this implementation: `0xF00D XOR (2 << 8)`.
pub const CURRENT_MAGIC: u16 = cookie(CURRENT_VERSION);

/// Magic a v1 peer would have produced, encoded in *its* (host) byte order. On a
/// little-endian host that differs from `CURRENT_MAGIC`'s big-endian wire encoding
/// only in which bytes land where - see [`verify`] below.
const LEGACY_MAGIC: u16 = cookie(LEGACY_VERSION);

/// What a v1 frame's magic looks like once read back as a big-endian u16, i.e.
/// byte-swapped relative to [`LEGACY_MAGIC`].
const LEGACY_MAGIC_SWAPPED: u16 = LEGACY_MAGIC.swap_bytes();

/// The action carried by a frame, per §3 of the protocol.
#[derive(TryFromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    Subscribe = 0,
    Unsubscribe = 1,
    Publish = 2,
}

/// One framed record: an action, a topic, and an opaque body.
///
/// Construction validates the 8192-byte ceiling up front (`Frame::new` fails with
/// [`HubError::FrameTooLarge`]); a `Frame` that exists in memory is always
/// representable on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    action: Action,
    topic: Bytes,
    body: Bytes,
}

impl Frame {
    pub fn new(
        action: Action,
        topic: impl Into<Bytes>,
        body: impl Into<Bytes>,
    ) -> Result<Frame, HubError> {
        let topic = topic.into();
        let body = body.into();
        let size = HEADER_SIZE + topic.len() + body.len();
        if size > MAX_FRAME_SIZE {
            return Err(HubError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(Frame { action, topic, body })
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn topic(&self) -> &[u8] {
        &self.topic
    }

    /// The topic interpreted as UTF-8, lossily. Routing tables key on raw bytes;
    /// this is purely a convenience for logging and for the `&str` public API.
    pub fn topic_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.topic)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Encode this frame to its wire representation.
    ///
    /// Infallible in practice: size was already validated at construction time.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.topic.len() + self.body.len());
        buf.put_u16(self.topic.len() as u16);
        buf.put_u16(self.body.len() as u16);
        buf.put_u8(self.action as u8);
        buf.put_u16(CURRENT_MAGIC);
        buf.put_slice(&self.topic);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode a frame given a 7-byte header and an already-read payload of
    /// `topic_length + body_length` bytes, as produced by [`decode_header`].
    fn from_parts(header: DecodedHeader, mut payload: Bytes) -> Result<Frame, HubError> {
        let topic = payload.split_to(header.topic_length as usize);
        let body = payload;
        let action = Action::try_from_primitive(header.action_byte)
            .map_err(|_| HubError::ProtocolError(format!("unknown action byte {}", header.action_byte)))?;
        Ok(Frame { action, topic, body })
    }

    /// Parse a complete frame out of a raw byte buffer (header + payload together).
    /// Used by tests and by anything handed a whole datagram up front.
    pub fn parse(mut buf: Bytes) -> Result<Frame, HubError> {
        if buf.len() < HEADER_SIZE {
            return Err(HubError::ProtocolError("frame shorter than header".into()));
        }
        let header_bytes = buf.split_to(HEADER_SIZE);
        let header = decode_header(&header_bytes)?;
        let expected = header.topic_length as usize + header.body_length as usize;
        if buf.len() != expected {
            return Err(HubError::ProtocolError(format!(
                "payload length mismatch: expected {expected}, got {}",
                buf.len()
            )));
        }
        Frame::from_parts(header, buf)
    }
}

/// The header fields after [`verify`] has normalized byte order, plus the raw
/// action byte (validated into an [`Action`] by the caller).
pub(crate) struct DecodedHeader {
    pub topic_length: u16,
    pub body_length: u16,
    pub action_byte: u8,
}

/// Decode and verify a 7-byte header, applying the v1 byte-reversal fallback.
///
/// This is `verify` from §4.1: if the magic matches the current version, the
/// header is accepted as-is. If it matches the byte-reversed v1 magic, the
/// length fields are byte-swapped in place and the magic is treated as current.
/// Anything else is a fatal protocol error.
pub(crate) fn decode_header(bytes: &[u8]) -> Result<DecodedHeader, HubError> {
    debug_assert_eq!(bytes.len(), HEADER_SIZE);
    let mut cursor = bytes;
    let mut topic_length = cursor.get_u16();
    let mut body_length = cursor.get_u16();
    let action_byte = cursor.get_u8();
    let magic = cursor.get_u16();

    if magic == CURRENT_MAGIC {
        // accept as-is
    } else if magic == LEGACY_MAGIC_SWAPPED {
        topic_length = topic_length.swap_bytes();
        body_length = body_length.swap_bytes();
    } else {
        return Err(HubError::ProtocolError(format!(
            "bad magic: 0x{magic:04X}"
        )));
    }

    let total = HEADER_SIZE + topic_length as usize + body_length as usize;
    if total > MAX_FRAME_SIZE {
        return Err(HubError::ProtocolError(format!(
            "frame of {total} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }

    Ok(DecodedHeader {
        topic_length,
        body_length,
        action_byte,
    })
}
