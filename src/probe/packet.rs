//! ICMP echo request/reply codec.

use std::net::IpAddr;

use super::ProbeError;

/// ICMP echo header length (type, code, checksum, identifier, sequence).
pub const ICMP_HEADER_LEN: usize = 8;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Address family of an echo exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpFamily {
    V4,
    V6,
}

impl IcmpFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IcmpFamily::V4,
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => IcmpFamily::V4,
            IpAddr::V6(_) => IcmpFamily::V6,
        }
    }

    fn request_type(self) -> u8 {
        match self {
            IcmpFamily::V4 => ICMPV4_ECHO_REQUEST,
            IcmpFamily::V6 => ICMPV6_ECHO_REQUEST,
        }
    }

    fn reply_type(self) -> u8 {
        match self {
            IcmpFamily::V4 => ICMPV4_ECHO_REPLY,
            IcmpFamily::V6 => ICMPV6_ECHO_REPLY,
        }
    }
}

/// Owned echo request buffer: 8 byte header followed by the payload.
#[derive(Debug, Clone)]
pub struct EchoRequest {
    buf: Vec<u8>,
    identifier: u16,
}

impl EchoRequest {
    /// Allocate the request and fill the payload with the repeating `A`, `B`,
    /// `C`... pattern.
    pub fn new(identifier: u16, payload_size: usize) -> Result<Self, ProbeError> {
        let len = ICMP_HEADER_LEN + payload_size;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| ProbeError::Buffer(len))?;
        buf.resize(ICMP_HEADER_LEN, 0);
        buf.extend((0..payload_size).map(|i| b'A'.wrapping_add(i as u8)));
        buf[4..6].copy_from_slice(&identifier.to_be_bytes());

        Ok(Self { buf, identifier })
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Stamp type, sequence and checksum for the next transmission.
    ///
    /// The ICMPv6 checksum covers a pseudo-header only the kernel knows, so it
    /// is left zero for the stack to fill in.
    pub fn prepare(&mut self, family: IcmpFamily, sequence: u16) -> &[u8] {
        self.buf[0] = family.request_type();
        self.buf[1] = 0;
        self.buf[2..4].copy_from_slice(&[0, 0]);
        self.buf[6..8].copy_from_slice(&sequence.to_be_bytes());

        if family == IcmpFamily::V4 {
            let checksum = icmp_checksum(&self.buf);
            self.buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        }

        &self.buf
    }
}

/// Compute ICMP checksum (RFC 1071).
pub fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }

    // Handle odd byte
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Header fields of a received echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
    /// TTL (IPv4) or hop limit (IPv6) when the IP header was delivered.
    pub ttl: Option<u8>,
}

/// Parse an echo reply out of a received datagram.
///
/// Raw IPv4 sockets deliver the IP header, datagram sockets and most raw IPv6
/// sockets do not. The version nibble tells them apart: echo reply types 0
/// and 129 never carry 4 or 6 in their upper nibble.
pub fn parse_echo_reply(buf: &[u8], family: IcmpFamily) -> Option<EchoReply> {
    let first = *buf.first()?;

    let (offset, ttl) = match (family, first >> 4) {
        (IcmpFamily::V4, 4) => {
            let ihl = ((first & 0x0F) as usize) * 4;
            if ihl < IPV4_MIN_HEADER_LEN {
                return None;
            }
            (ihl, Some(*buf.get(8)?))
        }
        (IcmpFamily::V6, 6) => (IPV6_HEADER_LEN, Some(*buf.get(7)?)),
        _ => (0, None),
    };

    let icmp = buf.get(offset..offset + ICMP_HEADER_LEN)?;
    if icmp[0] != family.reply_type() || icmp[1] != 0 {
        return None;
    }

    Some(EchoReply {
        identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        ttl,
    })
}
