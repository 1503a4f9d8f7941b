//! Scripted resolver and transport for driving sessions without a network.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{parse_literal, EchoSocket, ProbeError, Resolver, SocketKind, Transport};

/// Scripted outcome of one echo exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// Matching echo reply carrying this TTL.
    Echo { ttl: u8 },
    /// A reply for an earlier sequence number.
    Stale,
    /// No reply before the deadline.
    Lost,
    /// The send itself fails.
    SendFails,
}

/// Resolves to a fixed address, or literal hosts to themselves.
pub struct FixedResolver {
    answer: Option<IpAddr>,
    literal: bool,
}

impl FixedResolver {
    pub fn ok(ip: &str) -> Self {
        Self {
            answer: parse_literal(ip),
            literal: false,
        }
    }

    pub fn literal() -> Self {
        Self {
            answer: None,
            literal: true,
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            literal: false,
        }
    }
}

impl Resolver for FixedResolver {
    fn resolve(&self, host: &str, _timeout: Duration) -> Result<IpAddr, ProbeError> {
        let answer = if self.literal { parse_literal(host) } else { self.answer };
        answer.ok_or_else(|| ProbeError::Resolution {
            host: host.to_string(),
            reason: "NXDOMAIN".to_string(),
        })
    }
}

#[derive(Debug)]
struct FakeState {
    default: Reply,
    shared: VecDeque<Reply>,
    scripts: HashMap<IpAddr, VecDeque<Reply>>,
    refuse_open: bool,
    opened: usize,
}

impl FakeState {
    fn next(&mut self, addr: IpAddr) -> Reply {
        if let Some(reply) = self.scripts.get_mut(&addr).and_then(|q| q.pop_front()) {
            return reply;
        }
        self.shared.pop_front().unwrap_or(self.default)
    }

    fn peek(&self, addr: IpAddr) -> Reply {
        self.scripts
            .get(&addr)
            .and_then(|q| q.front().copied())
            .or_else(|| self.shared.front().copied())
            .unwrap_or(self.default)
    }
}

/// Transport whose sockets answer from a script; clones share the script.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new(default: Reply) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                default,
                shared: VecDeque::new(),
                scripts: HashMap::new(),
                refuse_open: false,
                opened: 0,
            })),
        }
    }

    /// Answer from `script` for any address, then lose every probe.
    pub fn replying(script: Vec<Reply>) -> Self {
        let transport = Self::new(Reply::Lost);
        transport.state.lock().unwrap().shared = script.into();
        transport
    }

    pub fn script(&self, addr: &str, replies: Vec<Reply>) {
        let addr = parse_literal(addr).expect("literal address");
        self.state.lock().unwrap().scripts.insert(addr, replies.into());
    }

    pub fn set_default(&self, reply: Reply) {
        self.state.lock().unwrap().default = reply;
    }

    pub fn set_refuse_open(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_open = refuse;
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }
}

impl Transport for FakeTransport {
    fn open(
        &self,
        addr: IpAddr,
        _timeout: Duration,
        _tos: u8,
    ) -> Result<Box<dyn EchoSocket>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_open {
            return Err(ProbeError::Socket("Operation not permitted".to_string()));
        }
        state.opened += 1;
        Ok(Box::new(FakeSocket {
            addr,
            state: self.state.clone(),
            pending: None,
        }))
    }
}

struct FakeSocket {
    addr: IpAddr,
    state: Arc<Mutex<FakeState>>,
    pending: Option<(u16, u16)>,
}

impl EchoSocket for FakeSocket {
    fn kind(&self) -> SocketKind {
        SocketKind::Raw
    }

    fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.peek(self.addr) == Reply::SendFails {
            state.next(self.addr);
            return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
        }
        let id = u16::from_be_bytes([packet[4], packet[5]]);
        let seq = u16::from_be_bytes([packet[6], packet[7]]);
        self.pending = Some((id, seq));
        Ok(packet.len())
    }

    fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        let (id, seq) = self
            .pending
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let reply = self.state.lock().unwrap().next(self.addr);

        let (ttl, seq) = match reply {
            Reply::Echo { ttl } => (ttl, seq),
            Reply::Stale => (64, seq.wrapping_sub(1)),
            Reply::Lost | Reply::SendFails => {
                return Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        };

        // IPv4 header followed by an ICMP echo reply
        let packet_len = 28;
        buf[..packet_len].fill(0);
        buf[0] = 0x45;
        buf[8] = ttl;
        buf[9] = 1;
        buf[24..26].copy_from_slice(&id.to_be_bytes());
        buf[26..28].copy_from_slice(&seq.to_be_bytes());
        Ok(packet_len)
    }
}
