//! Builders for client-to-server wire bytes.

use bytes::{Bytes, BytesMut};
use wsgate::{
    codec::encode_frame,
    frame::{CloseCode, CloseFrame, Frame},
};

/// Mask key applied by every helper in this crate.
pub const TEST_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// Encode `frame` as a client would send it.
#[must_use]
pub fn masked(frame: Frame) -> Bytes {
    let mut buf = BytesMut::new();
    encode_frame(&frame.with_mask(TEST_MASK), &mut buf);
    buf.freeze()
}

/// A masked single-frame text message.
#[must_use]
pub fn masked_text(text: &str) -> Bytes { masked(Frame::text(text.to_owned())) }

/// A masked close frame carrying `code` and `reason`.
#[must_use]
pub fn masked_close(code: CloseCode, reason: &str) -> Bytes {
    masked(Frame::close(Some(&CloseFrame::new(code, reason))))
}
