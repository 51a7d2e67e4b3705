//! RFC 6455 payload masking.
//!
//! Client-to-server payloads are XORed with a four byte key:
//! `output[i] = input[i] ^ key[i % 4]`. The transform is its own inverse, so
//! [`mask`] and [`unmask`] are the same operation under different names.

/// Length of a WebSocket masking key in bytes.
pub const MASK_KEY_LEN: usize = 4;

/// XOR `payload` with `key` in place.
///
/// # Examples
///
/// ```
/// use wsgate::mask::apply_mask;
///
/// let key = [0x37, 0xfa, 0x21, 0x3d];
/// let mut data = *b"Hello";
/// apply_mask(&mut data, key);
/// assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
/// apply_mask(&mut data, key);
/// assert_eq!(&data, b"Hello");
/// ```
pub fn apply_mask(payload: &mut [u8], key: [u8; MASK_KEY_LEN]) {
    for (byte, k) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Return a masked copy of `payload`.
#[must_use]
pub fn mask(payload: &[u8], key: [u8; MASK_KEY_LEN]) -> Vec<u8> {
    let mut out = payload.to_vec();
    apply_mask(&mut out, key);
    out
}

/// Return an unmasked copy of `payload`.
#[must_use]
pub fn unmask(payload: &[u8], key: [u8; MASK_KEY_LEN]) -> Vec<u8> { mask(payload, key) }

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(&[], [1, 2, 3, 4], &[])]
    #[case::zero_key(b"abc", [0, 0, 0, 0], b"abc")]
    #[case::wraps_key(&[0xff; 6], [0x0f, 0xf0, 0x00, 0xff], &[0xf0, 0x0f, 0xff, 0x00, 0xf0, 0x0f])]
    fn mask_matches_rfc_definition(
        #[case] input: &[u8],
        #[case] key: [u8; 4],
        #[case] expected: &[u8],
    ) {
        assert_eq!(mask(input, key), expected);
    }

    proptest! {
        #[test]
        fn unmask_inverts_mask(payload in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            prop_assert_eq!(unmask(&mask(&payload, key), key), payload);
        }
    }
}
