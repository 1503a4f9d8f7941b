//! Raw ICMP socket transport.

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::{IcmpFamily, ProbeError};

/// How the socket was opened; decides how replies are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Privileged raw socket: identifier and sequence are ours.
    Raw,
    /// Unprivileged datagram socket: the kernel owns the identifier.
    Datagram,
}

/// One open echo socket bound to a single destination.
pub trait EchoSocket: Send {
    fn kind(&self) -> SocketKind;

    fn send(&mut self, packet: &[u8]) -> io::Result<usize>;

    /// Blocking read of one datagram, bounded by `timeout`.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// Opens echo sockets.
pub trait Transport: Send + Sync {
    fn open(&self, addr: IpAddr, timeout: Duration, tos: u8)
        -> Result<Box<dyn EchoSocket>, ProbeError>;
}

/// socket2-backed ICMP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpTransport;

impl Transport for IcmpTransport {
    fn open(
        &self,
        addr: IpAddr,
        timeout: Duration,
        tos: u8,
    ) -> Result<Box<dyn EchoSocket>, ProbeError> {
        let family = IcmpFamily::of(&addr);
        let (domain, protocol, dest) = match family {
            IcmpFamily::V4 => {
                let v4 = match addr {
                    IpAddr::V4(v4) => v4,
                    IpAddr::V6(v6) => v6.to_ipv4_mapped().ok_or_else(|| {
                        ProbeError::Socket(format!("{} is not IPv4-mapped", v6))
                    })?,
                };
                (Domain::IPV4, Protocol::ICMPV4, SocketAddr::new(IpAddr::V4(v4), 0))
            }
            IcmpFamily::V6 => (Domain::IPV6, Protocol::ICMPV6, SocketAddr::new(addr, 0)),
        };

        // Try RAW first (privileged), then DGRAM (unprivileged)
        let (socket, kind) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(s) => (s, SocketKind::Raw),
            Err(raw_err) => {
                let s = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|e| {
                    ProbeError::Socket(format!("raw: {}, datagram: {}", raw_err, e))
                })?;
                tracing::debug!("Raw ICMP unavailable ({}), using datagram socket", raw_err);
                (s, SocketKind::Datagram)
            }
        };

        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| ProbeError::Socket(format!("failed to set timeout: {}", e)))?;
        socket
            .set_write_timeout(Some(timeout))
            .map_err(|e| ProbeError::Socket(format!("failed to set timeout: {}", e)))?;

        if let Err(e) = set_traffic_class(&socket, family, tos) {
            tracing::debug!("Failed to set TOS {} on ICMP socket: {}", tos, e);
        }

        socket
            .connect(&dest.into())
            .map_err(|e| ProbeError::Socket(format!("failed to connect: {}", e)))?;

        Ok(Box::new(IcmpSocket { socket, kind }))
    }
}

struct IcmpSocket {
    socket: Socket,
    kind: SocketKind,
}

impl EchoSocket for IcmpSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send(packet)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        // A zero timeout would mean "block forever"
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        self.socket.read(buf)
    }
}

/// Set the IPv4 TOS byte or the IPv6 traffic class.
fn set_traffic_class(socket: &Socket, family: IcmpFamily, tos: u8) -> io::Result<()> {
    match family {
        IcmpFamily::V4 => socket.set_tos(tos as u32),
        IcmpFamily::V6 => socket.set_tclass_v6(tos as u32),
    }
}

/// Whether an I/O error is the receive timeout expiring.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_is_timeout() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_traffic_class_both_families() {
        // UDP sockets need no privileges; the options are the same
        if let Ok(v4) = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)) {
            set_traffic_class(&v4, IcmpFamily::V4, 0x20).unwrap();
            assert_eq!(v4.tos().unwrap(), 0x20);
        }
        // IPv6 may be disabled on the host
        if let Ok(v6) = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)) {
            set_traffic_class(&v6, IcmpFamily::V6, 0x20).unwrap();
            assert_eq!(v6.tclass_v6().unwrap(), 0x20);
        }
    }

    #[test]
    fn test_open_loopback_or_report_socket_error() {
        // Without CAP_NET_RAW or ping_group_range both socket kinds may be refused.
        let result = IcmpTransport.open(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Duration::from_millis(200),
            0,
        );
        match result {
            Ok(socket) => assert!(matches!(socket.kind(), SocketKind::Raw | SocketKind::Datagram)),
            Err(e) => assert!(matches!(e, ProbeError::Socket(_))),
        }
    }
}
