//! Read position over an immutable byte slice.

/// Forward-only reader over a borrowed buffer.
///
/// Every accessor returns `None` instead of reading past the end, so a short
/// buffer surfaces as "need more data" without any arithmetic at call sites.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    /// Bytes consumed so far.
    pub(crate) fn position(&self) -> usize { self.pos }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize { self.buf.len() - self.pos }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub(crate) fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|slice| slice.try_into().ok())
    }

    #[cfg(test)]
    pub(crate) fn take_u8(&mut self) -> Option<u8> { self.take_array::<1>().map(|[b]| b) }

    pub(crate) fn take_u16(&mut self) -> Option<u16> {
        self.take_array::<2>().map(u16::from_be_bytes)
    }

    pub(crate) fn take_u64(&mut self) -> Option<u64> {
        self.take_array::<8>().map(u64::from_be_bytes)
    }
}
