//! Result dispatching: parsing a worker's response stream.
//!
//! Awaiting a read on a child's stdout is the readiness registration with
//! the tokio reactor, so [`await_job`] is the future the manager task
//! drives for every in-flight request. Whatever happens (success, resolver
//! failure, EOF, garbage), the future always yields a [`Completion`]
//! carrying the worker back, so the manager can recycle or tear it down; a
//! request can never hang silently on a dead pipe.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::pool::WorkerHandle;
use crate::resolver::QueryJob;
use crate::wire;

/// Parsed worker response.
pub(crate) enum Response {
    /// Ordered address list, as produced by the resolver.
    Addresses(Vec<SocketAddr>),
    /// The resolver itself failed; wire failure code.
    Failure(i32),
    /// The response stream broke (EOF, read error, framing violation, or
    /// deadline exceeded). The worker must be torn down, not recycled.
    Transport(String),
}

/// An in-flight request that has finished, one way or another.
pub(crate) struct Completion {
    pub(crate) worker: WorkerHandle,
    pub(crate) job: QueryJob,
    pub(crate) response: Response,
}

/// Awaits and parses the response for `job` on `worker`'s stream. The
/// response is always drained in full on the success path, even when the
/// caller has dropped interest, so the byte stream stays framed for the
/// next request pipelined through this worker.
pub(crate) async fn await_job(
    mut worker: WorkerHandle,
    job: QueryJob,
    deadline: Option<Duration>,
) -> Completion {
    let response = match deadline {
        Some(limit) => {
            match tokio::time::timeout(limit, read_response(worker.response_stream())).await {
                Ok(response) => response,
                Err(_) => Response::Transport(format!(
                    "no response within {limit:?}; worker presumed wedged"
                )),
            }
        }
        None => read_response(worker.response_stream()).await,
    };
    Completion { worker, job, response }
}

/// Reads one full response frame. Never returns an `Err` to the caller;
/// every failure mode is folded into [`Response::Transport`].
pub(crate) async fn read_response<R>(stream: &mut R) -> Response
where
    R: AsyncRead + Unpin,
{
    match try_read_response(stream).await {
        Ok(response) => response,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Response::Transport("response stream closed by worker".to_owned())
        }
        Err(err) => Response::Transport(format!("error reading worker response: {err}")),
    }
}

async fn try_read_response<R>(stream: &mut R) -> io::Result<Response>
where
    R: AsyncRead + Unpin,
{
    let status = stream.read_i32_le().await?;
    if status != wire::STATUS_OK {
        return Ok(Response::Failure(status));
    }

    let mut addrs = Vec::new();
    loop {
        let len = stream.read_u32_le().await? as usize;
        if len == 0 {
            break;
        }
        if len > wire::MAX_RECORD_LEN {
            return Ok(Response::Transport(format!(
                "oversized address record ({len} bytes); stream out of sync"
            )));
        }
        let mut record = vec![0u8; len];
        stream.read_exact(&mut record).await?;
        match wire::decode_addr(&record) {
            Ok(addr) => addrs.push(addr),
            Err(err) => {
                return Ok(Response::Transport(format!("malformed address record: {err}")));
            }
        }
    }
    Ok(Response::Addresses(addrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    async fn parse(frame: &[u8]) -> Response {
        let mut stream = frame;
        read_response(&mut stream).await
    }

    fn sample_addrs(n: usize) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| match i % 2 {
                0 => SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, i as u8 + 1)), 80),
                _ => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 80),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_response_roundtrip_empty() {
        let frame = wire::encode_response(&[]);
        match parse(&frame).await {
            Response::Addresses(addrs) => assert!(addrs.is_empty()),
            _ => panic!("expected empty address list"),
        }
    }

    #[tokio::test]
    async fn test_response_roundtrip_single() {
        let addrs = sample_addrs(1);
        let frame = wire::encode_response(&addrs);
        match parse(&frame).await {
            Response::Addresses(decoded) => assert_eq!(decoded, addrs),
            _ => panic!("expected one address"),
        }
    }

    #[tokio::test]
    async fn test_response_roundtrip_preserves_order() {
        let addrs = sample_addrs(5);
        let frame = wire::encode_response(&addrs);
        match parse(&frame).await {
            Response::Addresses(decoded) => assert_eq!(decoded, addrs),
            _ => panic!("expected five addresses in order"),
        }
    }

    #[tokio::test]
    async fn test_failure_frame() {
        let frame = wire::encode_failure(wire::ERR_NAME_NOT_RESOLVED);
        match parse(&frame).await {
            Response::Failure(code) => assert_eq!(code, wire::ERR_NAME_NOT_RESOLVED),
            _ => panic!("expected failure response"),
        }
    }

    #[tokio::test]
    async fn test_eof_before_status_is_transport() {
        match parse(&[]).await {
            Response::Transport(reason) => assert!(reason.contains("closed")),
            _ => panic!("expected transport failure"),
        }
    }

    #[tokio::test]
    async fn test_eof_mid_record_is_transport() {
        let addrs = sample_addrs(1);
        let frame = wire::encode_response(&addrs);
        // Drop the terminator and half the record.
        let truncated = &frame[..frame.len() - 8];
        match parse(truncated).await {
            Response::Transport(_) => {}
            _ => panic!("expected transport failure on truncated frame"),
        }
    }

    #[tokio::test]
    async fn test_oversized_record_is_transport() {
        let mut frame = wire::STATUS_OK.to_le_bytes().to_vec();
        frame.extend_from_slice(&(1_000_000u32).to_le_bytes());
        match parse(&frame).await {
            Response::Transport(reason) => assert!(reason.contains("oversized")),
            _ => panic!("expected transport failure on oversized record"),
        }
    }
}
