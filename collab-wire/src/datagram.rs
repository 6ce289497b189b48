use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Fixed header size of an awareness datagram: 4-byte client id + 4-byte
/// clock (§4.1).
pub const DATAGRAM_HEADER_LEN: usize = 8;

/// Encode an awareness datagram: `[clientId:u32 BE][clock:u32 BE][state...]`.
///
/// There is no length prefix — the datagram boundary is the transport's own
/// (§4.1): this function never fails, any `state` length is valid.
pub fn encode_awareness_datagram(client_id: u32, clock: u32, state: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATAGRAM_HEADER_LEN + state.len());
    buf.put_u32(client_id);
    buf.put_u32(clock);
    buf.put_slice(state);
    buf.freeze()
}

/// Decode an awareness datagram's header and state payload.
pub fn decode_awareness_datagram(mut buf: &[u8]) -> Result<(u32, u32, Bytes), WireError> {
    if buf.len() < DATAGRAM_HEADER_LEN {
        return Err(WireError::DatagramTooShort {
            len: buf.len(),
            header: DATAGRAM_HEADER_LEN,
        });
    }
    let client_id = buf.get_u32();
    let clock = buf.get_u32();
    Ok((client_id, clock, Bytes::copy_from_slice(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips() {
        let encoded = encode_awareness_datagram(7, 42, b"cursor-state");
        let (client_id, clock, state) = decode_awareness_datagram(&encoded).unwrap();
        assert_eq!(client_id, 7);
        assert_eq!(clock, 42);
        assert_eq!(state, Bytes::from_static(b"cursor-state"));
    }

    #[test]
    fn round_trips_empty_state() {
        let encoded = encode_awareness_datagram(1, 1, b"");
        let (_, _, state) = decode_awareness_datagram(&encoded).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn rejects_short_buffers() {
        for len in 0..DATAGRAM_HEADER_LEN {
            let buf = vec![0u8; len];
            assert_eq!(
                decode_awareness_datagram(&buf),
                Err(WireError::DatagramTooShort {
                    len,
                    header: DATAGRAM_HEADER_LEN
                })
            );
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            client_id in any::<u32>(),
            clock in any::<u32>(),
            state in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let encoded = encode_awareness_datagram(client_id, clock, &state);
            let (c, k, s) = decode_awareness_datagram(&encoded).unwrap();
            prop_assert_eq!(c, client_id);
            prop_assert_eq!(k, clock);
            prop_assert_eq!(s, Bytes::from(state));
        }

        #[test]
        fn prop_short_buffer_always_fails(len in 0usize..DATAGRAM_HEADER_LEN) {
            let buf = vec![0u8; len];
            prop_assert!(decode_awareness_datagram(&buf).is_err());
        }
    }
}
