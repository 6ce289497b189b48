/// Byte written as the very first, unframed byte on a fresh control stream,
/// so the peer can dispatch it before any framing has been established (§4.2
/// step 5, §9 "single control stream").
pub const STREAM_TYPE_SYNC: u8 = 0x01;

/// Message-type tag occupying the first byte of a frame's payload (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// `0x00` — state vector follows.
    SyncStep1 = 0x00,
    /// `0x01` — missing updates follow.
    SyncStep2 = 0x01,
    /// `0x02` — a CRDT update follows.
    Update = 0x02,
    /// `0x03` — an awareness update follows.
    Awareness = 0x03,
}

impl MessageTag {
    /// Resolve a raw tag byte to a known message type, or `None` for
    /// forward-compatible unknown tags (§4.3 "on any unknown tag: log and
    /// discard").
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::SyncStep1),
            0x01 => Some(Self::SyncStep2),
            0x02 => Some(Self::Update),
            0x03 => Some(Self::Awareness),
            _ => None,
        }
    }

    /// The tag byte this variant is written as.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Build a tagged frame payload: `[tag, body...]`.
pub fn tag_message(tag: MessageTag, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(tag.to_byte());
    out.extend_from_slice(body);
    out
}

/// Split a frame payload into its raw tag byte and body.
///
/// Returns `None` for an empty payload, which is malformed at every known
/// message type.
pub fn untag_message(payload: &[u8]) -> Option<(u8, &[u8])> {
    payload.split_first().map(|(tag, body)| (*tag, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_tags() {
        for tag in [
            MessageTag::SyncStep1,
            MessageTag::SyncStep2,
            MessageTag::Update,
            MessageTag::Awareness,
        ] {
            let framed = tag_message(tag, b"body");
            let (raw, body) = untag_message(&framed).unwrap();
            assert_eq!(body, b"body");
            assert_eq!(MessageTag::from_byte(raw), Some(tag));
        }
    }

    #[test]
    fn unknown_tag_is_forward_compatible_none() {
        assert_eq!(MessageTag::from_byte(0x7F), None);
    }

    #[test]
    fn empty_payload_has_no_tag() {
        assert_eq!(untag_message(&[]), None);
    }
}
