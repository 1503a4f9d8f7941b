//! Probe session: one target's address, socket and sequence counter.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use super::{
    is_timeout, parse_echo_reply, EchoRequest, EchoSocket, IcmpFamily, ProbeError, Resolver,
    SocketKind, Target, Transport,
};

/// Round-trip samples above this are corrupted timestamps, not latency.
pub const RTT_SANITY_CEILING: Duration = Duration::from_secs(1_000_000);

const RECV_BUFFER_LEN: usize = 1500;

/// Mutable runtime state bound to a [`Target`].
pub struct ProbeSession {
    target: Arc<Target>,
    resolver: Arc<dyn Resolver>,
    transport: Arc<dyn Transport>,
    addr: Option<IpAddr>,
    resolved_at: Option<Instant>,
    socket: Option<Box<dyn EchoSocket>>,
    request: EchoRequest,
    sequence: u16,
    /// Batch counters
    pub transmitted: u32,
    pub received: u32,
    pub total_time_ms: f64,
    pub ttl: u8,
}

impl ProbeSession {
    /// Allocate the echo buffer for `target`.
    ///
    /// Fails only with [`ProbeError::Buffer`]; such a session is never used.
    pub fn new(
        target: Arc<Target>,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ProbeError> {
        let request = EchoRequest::new(target.probe_id, target.payload_size)?;
        Ok(Self {
            target,
            resolver,
            transport,
            addr: None,
            resolved_at: None,
            socket: None,
            request,
            sequence: 0,
            transmitted: 0,
            received: 0,
            total_time_ms: 0.0,
            ttl: 0,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.addr
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Whether the resolved address must be refreshed before the next batch.
    pub fn needs_resolve(&self, validity: Duration) -> bool {
        match self.resolved_at {
            Some(at) => self.addr.is_none() || at.elapsed() > validity,
            None => true,
        }
    }

    pub fn resolve(&mut self, dns_timeout: Duration) -> Result<IpAddr, ProbeError> {
        self.addr = None;
        self.resolved_at = None;

        let ip = self.resolver.resolve(&self.target.host, dns_timeout)?;
        tracing::debug!("IP address obtained for hostname [ {} ]: {}", self.target.host, ip);

        self.addr = Some(ip);
        self.resolved_at = Some(Instant::now());
        Ok(ip)
    }

    /// Open a socket to the resolved address, resolving first if needed.
    pub fn open(&mut self, timeout: Duration, tos: u8, dns_timeout: Duration) -> Result<(), ProbeError> {
        let addr = match self.addr {
            Some(addr) => addr,
            None => self.resolve(dns_timeout)?,
        };

        let socket = self.transport.open(addr, timeout, tos)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Reset batch counters before a new batch.
    pub fn reset_counters(&mut self) {
        self.transmitted = 0;
        self.received = 0;
        self.total_time_ms = 0.0;
    }

    /// Send one echo request with the next sequence number.
    pub fn send_echo(&mut self) -> Result<(), ProbeError> {
        let (socket, addr) = match (self.socket.as_mut(), self.addr) {
            (Some(socket), Some(addr)) => (socket, addr),
            _ => return Err(ProbeError::Send("socket is not open".to_string())),
        };

        self.sequence = self.sequence.wrapping_add(1);
        let packet = self.request.prepare(IcmpFamily::of(&addr), self.sequence);

        match socket.send(packet) {
            Ok(sent) if sent == packet.len() => {
                self.transmitted += 1;
                Ok(())
            }
            Ok(sent) => Err(ProbeError::Send(format!(
                "partial send: {} of {} bytes",
                sent,
                packet.len()
            ))),
            Err(e) => Err(ProbeError::Send(e.to_string())),
        }
    }

    /// Wait for the reply to the outstanding request.
    ///
    /// Replies with another identifier or sequence are discarded and the wait
    /// continues until the deadline. Returns the reply TTL when known.
    pub fn recv_echo(&mut self, timeout: Duration) -> Result<Option<u8>, ProbeError> {
        let (socket, addr) = match (self.socket.as_mut(), self.addr) {
            (Some(socket), Some(addr)) => (socket, addr),
            _ => return Err(ProbeError::ReceiveTimeout(timeout)),
        };
        let family = IcmpFamily::of(&addr);
        let check_id = socket.kind() == SocketKind::Raw;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUFFER_LEN];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProbeError::ReceiveTimeout(timeout));
            }

            let len = match socket.recv(&mut buf, remaining) {
                Ok(len) => len,
                Err(e) if is_timeout(&e) => return Err(ProbeError::ReceiveTimeout(timeout)),
                Err(e) => {
                    tracing::trace!("Receive error from {}: {}", self.target.host, e);
                    return Err(ProbeError::ReceiveTimeout(timeout));
                }
            };

            let Some(reply) = parse_echo_reply(&buf[..len], family) else {
                continue;
            };
            if reply.sequence != self.sequence
                || (check_id && reply.identifier != self.request.identifier())
            {
                tracing::trace!(
                    "Discarding reply id={} seq={} from {}",
                    reply.identifier,
                    reply.sequence,
                    self.target.host
                );
                continue;
            }

            self.received += 1;
            if let Some(ttl) = reply.ttl {
                self.ttl = ttl;
            }
            return Ok(reply.ttl);
        }
    }

    /// Release the socket. Idempotent.
    pub fn close(&mut self) {
        self.socket = None;
    }

    /// Drop the socket and the cached address so the next batch resolves again.
    pub fn invalidate(&mut self) {
        self.close();
        self.addr = None;
        self.resolved_at = None;
    }
}

/// Convert a measured round trip to milliseconds.
///
/// A missing (clock went backwards) or absurd sample is replaced by a random
/// value below `timeout` so one bad timestamp cannot skew the batch average.
pub fn sanitize_elapsed(elapsed: Option<Duration>, timeout: Duration) -> f64 {
    match elapsed {
        Some(d) if d <= RTT_SANITY_CEILING => d.as_micros() as f64 / 1000.0,
        _ => {
            let bound = (timeout.as_millis() as u64).max(1);
            rand::thread_rng().gen_range(0..bound) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{FakeTransport, FixedResolver, Reply};

    fn session(transport: FakeTransport) -> ProbeSession {
        let target = Arc::new(Target::new("192.0.2.1", 7001, 1).with_payload_size(8));
        ProbeSession::new(target, Arc::new(FixedResolver::ok("192.0.2.1")), Arc::new(transport))
            .unwrap()
    }

    #[test]
    fn test_sanitize_elapsed() {
        let timeout = Duration::from_millis(500);
        assert_eq!(sanitize_elapsed(Some(Duration::from_millis(20)), timeout), 20.0);

        let replaced = sanitize_elapsed(None, timeout);
        assert!((0.0..500.0).contains(&replaced));

        let replaced = sanitize_elapsed(Some(RTT_SANITY_CEILING * 2), timeout);
        assert!((0.0..500.0).contains(&replaced));
    }

    #[test]
    fn test_needs_resolve() {
        let mut s = session(FakeTransport::replying(vec![]));
        assert!(s.needs_resolve(Duration::from_secs(60)));
        s.resolve(Duration::from_secs(1)).unwrap();
        assert!(!s.needs_resolve(Duration::from_secs(60)));
        s.invalidate();
        assert!(s.needs_resolve(Duration::from_secs(60)));
        assert!(!s.is_open());
    }

    #[test]
    fn test_exchange_matches_sequence() {
        let transport = FakeTransport::replying(vec![Reply::Echo { ttl: 55 }]);
        let mut s = session(transport);
        s.open(Duration::from_millis(100), 0, Duration::from_secs(1)).unwrap();

        s.send_echo().unwrap();
        assert_eq!(s.sequence(), 1);
        assert_eq!(s.recv_echo(Duration::from_millis(100)).unwrap(), Some(55));
        assert_eq!((s.transmitted, s.received, s.ttl), (1, 1, 55));
    }

    #[test]
    fn test_stale_reply_discarded_until_timeout() {
        let transport = FakeTransport::replying(vec![Reply::Stale, Reply::Stale, Reply::Lost]);
        let mut s = session(transport);
        s.open(Duration::from_millis(50), 0, Duration::from_secs(1)).unwrap();

        s.send_echo().unwrap();
        let err = s.recv_echo(Duration::from_millis(50)).unwrap_err();
        assert!(err.is_loss());
        assert_eq!(s.received, 0);
    }

    #[test]
    fn test_send_without_socket_fails() {
        let mut s = session(FakeTransport::replying(vec![]));
        assert!(matches!(s.send_echo(), Err(ProbeError::Send(_))));
        s.close();
        s.close();
    }

    #[test]
    fn test_send_error_surfaces() {
        let mut s = session(FakeTransport::replying(vec![Reply::SendFails]));
        s.open(Duration::from_millis(50), 0, Duration::from_secs(1)).unwrap();
        assert!(matches!(s.send_echo(), Err(ProbeError::Send(_))));
        assert_eq!(s.transmitted, 0);
    }
}
