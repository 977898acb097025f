//! Binary wire protocol spoken over a worker's pipe pair.
//!
//! The parent sends one fixed-size [`RequestMsg`] per resolution. The worker
//! answers with a single [`ACK`] byte as soon as it has accepted the request
//! (before it starts resolving), followed later by a response frame:
//!
//! - success: `i32 0`, then zero or more `{ len: u32, record: [u8; len] }`
//!   address records, then a terminating `u32 0`;
//! - failure: a nonzero `i32` code and nothing else.
//!
//! All integers are little-endian with fixed widths, so the framing is stable
//! across parent/worker builds. Address records are an owned, self-describing
//! encoding of a socket address (family tag, port, octets), decoded back to
//! [`SocketAddr`] on the parent side.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of the hostname field in a request, including the NUL terminator.
pub const HOSTNAME_BUF_LEN: usize = 512;

/// Longest hostname that fits a request; longer names are truncated.
pub const MAX_HOSTNAME_LEN: usize = HOSTNAME_BUF_LEN - 1;

/// Total size of an encoded request: hostname field plus an `i32` port.
pub const REQUEST_LEN: usize = HOSTNAME_BUF_LEN + 4;

/// The single acknowledgment byte a worker writes after accepting a request.
pub const ACK: u8 = b'Y';

/// Response status signalling success (address records follow).
pub const STATUS_OK: i32 = 0;

/// Failure code for a hostname the platform resolver did not know.
/// Mirrors getaddrinfo's EAI_NONAME.
pub const ERR_NAME_NOT_RESOLVED: i32 = -2;

/// Failure code for a lookup that succeeded but produced no addresses.
pub const ERR_NO_DATA: i32 = -5;

/// Upper bound on a single address record. Real records are under 32 bytes;
/// anything larger means the byte stream is out of sync.
pub const MAX_RECORD_LEN: usize = 64;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Decode errors for the wire protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("request must be exactly {REQUEST_LEN} bytes, got {0}")]
    BadRequestLength(usize),
    #[error("hostname field is not NUL-terminated")]
    UnterminatedHostname,
    #[error("port {0} out of range")]
    BadPort(i32),
    #[error("address record truncated")]
    TruncatedRecord,
    #[error("unknown address family tag {0}")]
    BadFamily(u8),
}

/// One resolution request: a hostname and the port the caller intends to
/// connect to. The port rides along so the worker can hand it to the
/// platform resolver as a numeric service specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMsg {
    pub hostname: String,
    pub port: u16,
}

impl RequestMsg {
    /// Builds a request, trimming surrounding whitespace and truncating the
    /// hostname to [`MAX_HOSTNAME_LEN`] bytes (on a char boundary, so the
    /// result stays valid UTF-8).
    pub fn new(hostname: &str, port: u16) -> Self {
        let host = hostname.trim();
        let mut end = host.len().min(MAX_HOSTNAME_LEN);
        while !host.is_char_boundary(end) {
            end -= 1;
        }
        Self { hostname: host[..end].to_owned(), port }
    }

    /// Encodes into the fixed request layout: NUL-padded hostname field,
    /// then the port as a little-endian `i32`.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        let bytes = self.hostname.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[HOSTNAME_BUF_LEN..].copy_from_slice(&i32::from(self.port).to_le_bytes());
        buf
    }

    /// Decodes a request read off the pipe.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != REQUEST_LEN {
            return Err(WireError::BadRequestLength(buf.len()));
        }
        let host_field = &buf[..HOSTNAME_BUF_LEN];
        let nul = host_field
            .iter()
            .position(|b| *b == 0)
            .ok_or(WireError::UnterminatedHostname)?;
        let hostname = String::from_utf8_lossy(&host_field[..nul]).into_owned();

        let mut tail = &buf[HOSTNAME_BUF_LEN..];
        let port = tail.get_i32_le();
        let port = u16::try_from(port).map_err(|_| WireError::BadPort(port))?;
        Ok(Self { hostname, port })
    }
}

/// Encodes one socket address as an owned record.
pub fn encode_addr(addr: &SocketAddr) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(28);
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(FAMILY_V4);
            buf.put_u16_le(v4.port());
            buf.put_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(FAMILY_V6);
            buf.put_u16_le(v6.port());
            buf.put_slice(&v6.ip().octets());
            buf.put_u32_le(v6.flowinfo());
            buf.put_u32_le(v6.scope_id());
        }
    }
    buf.to_vec()
}

/// Decodes a single address record.
pub fn decode_addr(mut buf: &[u8]) -> Result<SocketAddr, WireError> {
    if buf.remaining() < 3 {
        return Err(WireError::TruncatedRecord);
    }
    let family = buf.get_u8();
    let port = buf.get_u16_le();
    match family {
        FAMILY_V4 => {
            if buf.remaining() < 4 {
                return Err(WireError::TruncatedRecord);
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
        }
        FAMILY_V6 => {
            if buf.remaining() < 16 + 4 + 4 {
                return Err(WireError::TruncatedRecord);
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let flowinfo = buf.get_u32_le();
            let scope_id = buf.get_u32_le();
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            )))
        }
        other => Err(WireError::BadFamily(other)),
    }
}

/// Encodes a full success response frame: status, length-prefixed address
/// records, zero terminator.
pub fn encode_response(addrs: &[SocketAddr]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8 + addrs.len() * 32);
    buf.put_i32_le(STATUS_OK);
    for addr in addrs {
        let record = encode_addr(addr);
        buf.put_u32_le(record.len() as u32);
        buf.put_slice(&record);
    }
    buf.put_u32_le(0);
    buf.to_vec()
}

/// Encodes a failure response frame.
pub fn encode_failure(code: i32) -> [u8; 4] {
    debug_assert_ne!(code, STATUS_OK);
    code.to_le_bytes()
}
