//! Ethernet framing for the optical link layer.
//!
//! Frames go on the wire as Ethernet II (DIX): destination, source,
//! length/type, payload padded to 46 bytes, and an optional CRC-32 FCS
//! trailer. Decode additionally understands 802.3 frames (length/type
//! ≤ 1500) carrying an LLC/SNAP header, from which the protocol number is
//! recovered.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const HEADER_LEN: usize = 14;
pub const MIN_PAYLOAD: usize = 46;
pub const FCS_LEN: usize = 4;
/// Length/type values at or below this are 802.3 lengths, not protocols.
pub const MAX_802_3_LENGTH: u16 = 1500;
const LLC_SNAP_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame truncated: {0} bytes")]
    Truncated(usize),
    #[error("FCS mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    FcsMismatch { stored: u32, computed: u32 },
    #[error("802.3 padding of {0} bytes exceeds the 46-byte maximum")]
    PadOverflow(usize),
    #[error("Malformed LLC/SNAP header")]
    BadLlcSnap,
    #[error("Invalid MAC address: {0:?}")]
    BadMacAddress(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;

// ============================================================================
// MAC addresses
// ============================================================================

/// 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group (multicast) bit of the first octet.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in out.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| FrameError::BadMacAddress(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| FrameError::BadMacAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(FrameError::BadMacAddress(s.to_string()));
        }
        Ok(MacAddr(out))
    }
}

impl serde::Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Sequential MAC allocation, starting at 00:00:00:00:00:01.
#[derive(Debug, Default)]
pub struct MacAllocator(u64);

impl MacAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> MacAddr {
        self.0 += 1;
        let b = self.0.to_be_bytes();
        MacAddr([b[2], b[3], b[4], b[5], b[6], b[7]])
    }
}

// ============================================================================
// Packet classification
// ============================================================================

/// How a received frame's destination relates to the receiving device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Host,
    Broadcast,
    Multicast,
    OtherHost,
}

pub fn classify(dst: MacAddr, own: MacAddr) -> PacketKind {
    if dst == own {
        PacketKind::Host
    } else if dst.is_broadcast() {
        PacketKind::Broadcast
    } else if dst.is_group() {
        PacketKind::Multicast
    } else {
        PacketKind::OtherHost
    }
}

// ============================================================================
// Encode
// ============================================================================

/// Encode an Ethernet II (DIX) frame. The payload is zero-padded to 46
/// bytes; the FCS trailer is appended when `with_fcs` is set.
pub fn encode_dix(
    src: MacAddr,
    dst: MacAddr,
    protocol: u16,
    payload: &[u8],
    with_fcs: bool,
) -> Bytes {
    let pad = MIN_PAYLOAD.saturating_sub(payload.len());
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + pad + FCS_LEN);
    buf.put_slice(&dst.0);
    buf.put_slice(&src.0);
    buf.put_u16(protocol);
    buf.put_slice(payload);
    buf.put_bytes(0, pad);
    if with_fcs {
        let fcs = crc32fast::hash(&buf);
        buf.put_u32(fcs);
    }
    buf.freeze()
}

/// Encode an 802.3 frame carrying an LLC/SNAP header. The length/type field
/// holds the LLC + payload length and the protocol rides in the SNAP type.
pub fn encode_llc_snap(
    src: MacAddr,
    dst: MacAddr,
    protocol: u16,
    payload: &[u8],
    with_fcs: bool,
) -> Bytes {
    let body_len = LLC_SNAP_LEN + payload.len();
    debug_assert!(body_len <= MAX_802_3_LENGTH as usize);
    let pad = MIN_PAYLOAD.saturating_sub(body_len);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len + pad + FCS_LEN);
    buf.put_slice(&dst.0);
    buf.put_slice(&src.0);
    buf.put_u16(body_len as u16);
    // LLC: DSAP/SSAP 0xAA, control 0x03; SNAP: zero OUI + EtherType
    buf.put_slice(&[0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00]);
    buf.put_u16(protocol);
    buf.put_slice(payload);
    buf.put_bytes(0, pad);
    if with_fcs {
        let fcs = crc32fast::hash(&buf);
        buf.put_u32(fcs);
    }
    buf.freeze()
}

// ============================================================================
// Decode
// ============================================================================

/// A decoded frame. For DIX frames the payload still carries any link-layer
/// padding (the header does not record the original length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub protocol: u16,
    pub payload: Bytes,
}

pub fn decode(wire: &[u8], with_fcs: bool) -> Result<Frame> {
    let min = HEADER_LEN + if with_fcs { FCS_LEN } else { 0 };
    if wire.len() < min {
        return Err(FrameError::Truncated(wire.len()));
    }

    let body_end = if with_fcs {
        let split = wire.len() - FCS_LEN;
        let stored = u32::from_be_bytes([wire[split], wire[split + 1], wire[split + 2], wire[split + 3]]);
        let computed = crc32fast::hash(&wire[..split]);
        if stored != computed {
            return Err(FrameError::FcsMismatch { stored, computed });
        }
        split
    } else {
        wire.len()
    };

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&wire[0..6]);
    src.copy_from_slice(&wire[6..12]);
    let (dst, src) = (MacAddr(dst), MacAddr(src));
    let length_type = u16::from_be_bytes([wire[12], wire[13]]);
    let body = &wire[HEADER_LEN..body_end];

    if length_type <= MAX_802_3_LENGTH {
        let length = length_type as usize;
        if body.len() < length {
            return Err(FrameError::Truncated(body.len()));
        }
        let pad = body.len() - length;
        if pad > MIN_PAYLOAD {
            return Err(FrameError::PadOverflow(pad));
        }
        let body = &body[..length];
        if body.len() < LLC_SNAP_LEN {
            return Err(FrameError::Truncated(body.len()));
        }
        if body[0] != 0xaa || body[1] != 0xaa || body[2] != 0x03 {
            return Err(FrameError::BadLlcSnap);
        }
        let protocol = u16::from_be_bytes([body[6], body[7]]);
        Ok(Frame {
            dst,
            src,
            protocol,
            payload: Bytes::copy_from_slice(&body[LLC_SNAP_LEN..]),
        })
    } else {
        Ok(Frame {
            dst,
            src,
            protocol: length_type,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SRC: MacAddr = MacAddr([0, 0, 0, 0, 0, 1]);
    const DST: MacAddr = MacAddr([0, 0, 0, 0, 0, 2]);

    #[test]
    fn mac_parse_and_display_roundtrip() {
        let mac: MacAddr = "00:1b:44:11:3a:b7".parse().unwrap();
        assert_eq!(mac.to_string(), "00:1b:44:11:3a:b7");
        assert!("00:1b:44".parse::<MacAddr>().is_err());
        assert!("zz:1b:44:11:3a:b7".parse::<MacAddr>().is_err());
    }

    #[test]
    fn allocator_is_sequential() {
        let mut alloc = MacAllocator::new();
        assert_eq!(alloc.next().to_string(), "00:00:00:00:00:01");
        assert_eq!(alloc.next().to_string(), "00:00:00:00:00:02");
    }

    #[test]
    fn classification() {
        assert_eq!(classify(SRC, SRC), PacketKind::Host);
        assert_eq!(classify(MacAddr::BROADCAST, SRC), PacketKind::Broadcast);
        assert_eq!(classify(MacAddr([0x01, 0, 0x5e, 0, 0, 1]), SRC), PacketKind::Multicast);
        assert_eq!(classify(DST, SRC), PacketKind::OtherHost);
    }

    #[test]
    fn dix_roundtrip_pads_short_payloads() {
        let wire = encode_dix(SRC, DST, ETHERTYPE_IPV4, b"ping", true);
        assert_eq!(wire.len(), HEADER_LEN + MIN_PAYLOAD + FCS_LEN);

        let frame = decode(&wire, true).unwrap();
        assert_eq!(frame.src, SRC);
        assert_eq!(frame.dst, DST);
        assert_eq!(frame.protocol, ETHERTYPE_IPV4);
        assert_eq!(&frame.payload[..4], b"ping");
        assert!(frame.payload[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn corrupted_fcs_is_rejected() {
        let wire = encode_dix(SRC, DST, ETHERTYPE_IPV4, b"payload", true);
        let mut bad = wire.to_vec();
        bad[20] ^= 0x40;
        assert!(matches!(decode(&bad, true), Err(FrameError::FcsMismatch { .. })));
    }

    #[test]
    fn llc_snap_roundtrip_recovers_protocol_and_length() {
        let wire = encode_llc_snap(SRC, DST, 0x86dd, b"v6", false);
        let frame = decode(&wire, false).unwrap();
        assert_eq!(frame.protocol, 0x86dd);
        // 802.3 length field strips the padding exactly
        assert_eq!(&frame.payload[..], b"v6");
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(matches!(decode(&[0u8; 10], false), Err(FrameError::Truncated(10))));
        assert!(matches!(decode(&[0u8; 16], true), Err(FrameError::Truncated(16))));
    }

    #[test]
    fn malformed_llc_is_rejected() {
        let mut wire = encode_llc_snap(SRC, DST, 0x0800, b"x", false).to_vec();
        wire[14] = 0x42;
        assert_eq!(decode(&wire, false), Err(FrameError::BadLlcSnap));
    }

    proptest! {
        #[test]
        fn dix_roundtrip_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..1500)) {
            let wire = encode_dix(SRC, DST, ETHERTYPE_IPV4, &payload, true);
            let frame = decode(&wire, true).unwrap();
            prop_assert_eq!(&frame.payload[..payload.len()], &payload[..]);
            prop_assert!(frame.payload.len() >= MIN_PAYLOAD);
        }
    }
}
