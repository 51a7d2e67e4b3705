//! RFC 6455 frame encoding and incremental decoding.
//!
//! [`decode_frame`] is a pure function over a borrowed buffer: it either
//! returns the first complete frame together with the number of bytes it
//! occupied, or [`Decoded::NeedMoreData`] without consuming anything. A
//! buffer holding several frames is drained by calling it again on the
//! remainder. [`WebSocketCodec`] adapts the same logic to
//! `tokio_util::codec` so it can sit under `Framed` or be driven by hand.
//!
//! # Error Handling
//!
//! Malformed input surfaces as a [`ProtocolError`]; the codec never skips
//! bytes or resynchronises, because a framing error leaves the stream
//! position undefined. Callers close the connection with
//! [`ProtocolError::close_code`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::{
    frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode, Role},
    mask::{MASK_KEY_LEN, apply_mask},
};

mod cursor;
pub mod error;

use cursor::Cursor;
pub use error::{CodecError, ProtocolError};

/// Smallest accepted maximum frame size; control frames must always fit.
pub const MIN_FRAME_LENGTH: usize = MAX_CONTROL_PAYLOAD;

/// Largest accepted maximum frame size (64 MiB).
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_BITS: u8 = 0b0111_1111;

/// Largest length carried directly in the 7-bit field.
const MAX_SHORT_LEN: u8 = 125;
/// 7-bit marker announcing a 16-bit extended length.
const LEN_16: u8 = 126;
/// 7-bit marker announcing a 64-bit extended length.
const LEN_64: u8 = 127;

/// Parameters governing inbound validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Which end of the connection is decoding.
    pub role: Role,
    /// Largest payload accepted in a single frame.
    pub max_frame_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            role: Role::Server,
            max_frame_size: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Outcome of a single [`decode_frame`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of buffer bytes it occupied.
    Frame {
        /// The decoded, unmasked frame.
        frame: Frame,
        /// Bytes to discard from the front of the buffer.
        consumed: usize,
    },
    /// The buffer ends before the first frame does.
    NeedMoreData,
}

/// Decode the first frame in `buf`.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when the header sets reserved bits, uses a
/// reserved opcode, breaks the masking rule for `options.role`, breaks the
/// control frame rules, or announces a length beyond
/// `options.max_frame_size`.
///
/// # Examples
///
/// ```
/// use wsgate::codec::{DecodeOptions, Decoded, decode_frame};
///
/// // Masked "Hello" from RFC 6455 section 5.7.
/// let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
/// let Decoded::Frame { frame, consumed } =
///     decode_frame(&bytes, &DecodeOptions::default()).expect("valid frame")
/// else {
///     panic!("frame is complete");
/// };
/// assert_eq!(&frame.payload[..], b"Hello");
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn decode_frame(buf: &[u8], options: &DecodeOptions) -> Result<Decoded, ProtocolError> {
    let mut cursor = Cursor::new(buf);
    let Some([first, second]) = cursor.take_array::<2>() else {
        return Ok(Decoded::NeedMoreData);
    };

    let fin = first & FIN_BIT != 0;
    let reserved = (first & RSV_BITS) >> 4;
    if reserved != 0 {
        return Err(ProtocolError::ReservedBits(reserved));
    }
    let opcode = OpCode::try_from(first & OPCODE_BITS)?;

    let masked = second & MASK_BIT != 0;
    match (options.role, masked) {
        (Role::Server, false) => return Err(ProtocolError::UnmaskedFrame),
        (Role::Client, true) => return Err(ProtocolError::UnexpectedMask),
        _ => {}
    }
    if opcode.is_control() && !fin {
        return Err(ProtocolError::FragmentedControlFrame);
    }

    let declared = match second & LEN_BITS {
        LEN_16 => {
            let Some(len) = cursor.take_u16() else {
                return Ok(Decoded::NeedMoreData);
            };
            u64::from(len)
        }
        LEN_64 => {
            let Some(len) = cursor.take_u64() else {
                return Ok(Decoded::NeedMoreData);
            };
            if len >> 63 != 0 {
                return Err(ProtocolError::InvalidLength(len));
            }
            len
        }
        short => u64::from(short),
    };
    let payload_len = checked_payload_len(declared, opcode, options.max_frame_size)?;

    let mask_key = if masked {
        let Some(key) = cursor.take_array::<MASK_KEY_LEN>() else {
            return Ok(Decoded::NeedMoreData);
        };
        Some(key)
    } else {
        None
    };

    let Some(raw) = cursor.take(payload_len) else {
        return Ok(Decoded::NeedMoreData);
    };
    let mut payload = BytesMut::from(raw);
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            opcode,
            mask_key,
            payload: payload.freeze(),
        },
        consumed: cursor.position(),
    })
}

fn checked_payload_len(declared: u64, opcode: OpCode, max: usize) -> Result<usize, ProtocolError> {
    let len = usize::try_from(declared).map_err(|_| ProtocolError::FrameTooLarge {
        size: declared,
        max,
    })?;
    if opcode.is_control() && len > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::ControlFrameTooLarge(len));
    }
    if len > max {
        return Err(ProtocolError::FrameTooLarge {
            size: declared,
            max,
        });
    }
    Ok(len)
}

/// Bytes used by the 7-bit length field plus any extended length.
#[must_use]
pub const fn length_prefix_len(payload_len: usize) -> usize {
    if payload_len <= MAX_SHORT_LEN as usize {
        1
    } else if payload_len <= u16::MAX as usize {
        3
    } else {
        9
    }
}

/// Total encoded size of a frame carrying `payload_len` bytes.
#[must_use]
pub const fn encoded_len(payload_len: usize, masked: bool) -> usize {
    let key = if masked { MASK_KEY_LEN } else { 0 };
    1 + length_prefix_len(payload_len) + key + payload_len
}

/// Append the wire form of `frame` to `dst`.
///
/// The payload is masked on the way out when the frame carries a key.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    let len = frame.payload.len();
    dst.reserve(encoded_len(len, frame.is_masked()));

    let fin = if frame.fin { FIN_BIT } else { 0 };
    dst.put_u8(fin | frame.opcode.as_u8());

    let mask = if frame.is_masked() { MASK_BIT } else { 0 };
    match u16::try_from(len) {
        Ok(short) if short <= u16::from(MAX_SHORT_LEN) => {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "guarded by the MAX_SHORT_LEN comparison"
            )]
            dst.put_u8(mask | short as u8);
        }
        Ok(medium) => {
            dst.put_u8(mask | LEN_16);
            dst.put_u16(medium);
        }
        Err(_) => {
            dst.put_u8(mask | LEN_64);
            dst.put_u64(len as u64);
        }
    }

    match frame.mask_key {
        Some(key) => {
            dst.put_slice(&key);
            let start = dst.len();
            dst.put_slice(&frame.payload);
            apply_mask(&mut dst[start..], key);
        }
        None => dst.put_slice(&frame.payload),
    }
}

/// Encode a single unmasked frame.
///
/// ```
/// use wsgate::{codec::encode, frame::OpCode};
///
/// let bytes = encode(OpCode::Text, b"hi", true);
/// assert_eq!(&bytes[..], &[0x81, 0x02, b'h', b'i']);
/// ```
#[must_use]
pub fn encode(opcode: OpCode, payload: &[u8], fin: bool) -> Bytes {
    let frame = Frame::new(opcode, Bytes::copy_from_slice(payload), fin);
    let mut buf = BytesMut::with_capacity(encoded_len(payload.len(), false));
    encode_frame(&frame, &mut buf);
    buf.freeze()
}

/// `tokio_util` codec for WebSocket frames.
///
/// The role decides which masking rule inbound frames must follow and which
/// one outbound frames are checked against.
#[derive(Clone, Debug)]
pub struct WebSocketCodec {
    role: Role,
    max_frame_size: usize,
}

impl WebSocketCodec {
    /// Construct a codec; `max_frame_size` is clamped to
    /// [`MIN_FRAME_LENGTH`]..=[`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size: clamp_frame_length(max_frame_size),
        }
    }

    /// Server-side codec with the default frame limit.
    #[must_use]
    pub fn server() -> Self { Self::new(Role::Server, DEFAULT_MAX_FRAME_LENGTH) }

    /// Client-side codec with the default frame limit.
    #[must_use]
    pub fn client() -> Self { Self::new(Role::Client, DEFAULT_MAX_FRAME_LENGTH) }

    /// Role this codec speaks for.
    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    /// Largest payload accepted or emitted in one frame.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize { self.max_frame_size }

    /// Decode options equivalent to this codec's configuration.
    #[must_use]
    pub const fn options(&self) -> DecodeOptions {
        DecodeOptions {
            role: self.role,
            max_frame_size: self.max_frame_size,
        }
    }
}

impl Default for WebSocketCodec {
    fn default() -> Self { Self::server() }
}

impl Decoder for WebSocketCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(&src[..], &self.options())? {
            Decoded::Frame { frame, consumed } => {
                src.advance(consumed);
                trace!(
                    opcode = %frame.opcode,
                    fin = frame.fin,
                    len = frame.payload.len(),
                    "frame decoded"
                );
                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed mid-frame with {} bytes buffered", src.len()),
            ))),
        }
    }
}

impl Encoder<Frame> for WebSocketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (self.role, item.is_masked()) {
            (Role::Server, true) => return Err(CodecError::MaskedServerFrame),
            (Role::Client, false) => return Err(CodecError::UnmaskedClientFrame),
            _ => {}
        }
        if item.payload.len() > self.max_frame_size {
            return Err(CodecError::OversizedOutbound {
                size: item.payload.len(),
                max: self.max_frame_size,
            });
        }
        encode_frame(&item, dst);
        Ok(())
    }
}
