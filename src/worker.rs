//! The worker side of the pool: a blocking resolve loop run inside a child
//! process.
//!
//! A worker reads fixed-size requests from its inherited stdin, acknowledges
//! each one with a single byte *before* resolving (so the parent can tell
//! "died before accepting" from "died while resolving"), performs the
//! blocking `getaddrinfo` call, and writes the response frame to stdout. It
//! exits on its own after [`DEFAULT_IDLE_TIMEOUT`] without work, or
//! immediately when the parent closes its end of the pipe.
//!
//! The loop touches nothing but the two pipe fds, so a wedged or killed
//! worker can never corrupt parent state.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::process::ExitCode;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::wire::{self, RequestMsg};

/// How long a worker waits for the next request before exiting on its own.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(40);

/// Argument that selects worker mode when the parent re-executes itself.
pub const WORKER_MODE_ARG: &str = "--dnspool-worker";

/// Environment override for the idle timeout, in milliseconds. Read only
/// inside the worker process; used by tests to shorten the idle exit.
pub const IDLE_TIMEOUT_ENV: &str = "DNSPOOL_WORKER_IDLE_MS";

/// Entry point for a dedicated worker binary. Serves requests on
/// stdin/stdout until idle timeout or parent exit.
pub fn run() -> ExitCode {
    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("dnspool worker error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Re-exec hook for embedders that point the pool at their own executable:
/// call this first thing in `main`. When the process was launched in worker
/// mode it never returns; otherwise it is a no-op.
pub fn run_if_requested() {
    if std::env::args().nth(1).as_deref() == Some(WORKER_MODE_ARG) {
        let code = match serve() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("dnspool worker error: {err}");
                1
            }
        };
        std::process::exit(code);
    }
}

fn serve() -> io::Result<()> {
    let idle_timeout = std::env::var(IDLE_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_IDLE_TIMEOUT);

    let mut input = io::stdin().lock();
    let mut output = io::stdout().lock();
    run_loop(&mut input, &mut output, idle_timeout)
}

/// The request/response loop. One hostname is resolved per iteration: the
/// top half reads the request off `input`, the bottom half resolves it
/// (blocking) and writes the result to `output`.
///
/// Returns `Ok(())` on a clean exit (idle timeout, or the parent closed the
/// pipe) and an error if the pipe broke mid-message or a request was
/// malformed.
pub fn run_loop<R, W>(input: &mut R, output: &mut W, idle_timeout: Duration) -> io::Result<()>
where
    R: Read + AsFd,
    W: Write,
{
    let mut buf = [0u8; wire::REQUEST_LEN];
    loop {
        if !wait_readable(input.as_fd(), idle_timeout)? {
            // Nobody has needed us for a while.
            return Ok(());
        }
        if read_request(input, &mut buf)?.is_none() {
            // Parent closed its end.
            return Ok(());
        }
        let msg = RequestMsg::decode(&buf)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        if msg.hostname.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty hostname in request",
            ));
        }

        // Tell the parent we accepted the request, then resolve.
        output.write_all(&[wire::ACK])?;
        output.flush()?;

        let frame = resolve_blocking(&msg.hostname, msg.port);
        output.write_all(&frame)?;
        output.flush()?;
    }
}

/// Waits for `fd` to become readable. Returns `false` on timeout.
fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    loop {
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(io::Error::from(err)),
        }
    }
}

/// Reads exactly one request. Returns `None` if the stream was already at
/// EOF (a clean parent shutdown); a mid-message EOF is an error.
fn read_request<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<Option<()>> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request truncated",
            ));
        }
        filled += n;
    }
    Ok(Some(()))
}

/// Resolves via the platform resolver, with the port passed as a numeric
/// service specifier, and encodes the response frame.
fn resolve_blocking(hostname: &str, port: u16) -> Vec<u8> {
    match (hostname, port).to_socket_addrs() {
        Ok(iter) => {
            let addrs: Vec<SocketAddr> = iter.collect();
            if addrs.is_empty() {
                wire::encode_failure(wire::ERR_NO_DATA).to_vec()
            } else {
                wire::encode_response(&addrs)
            }
        }
        Err(err) => {
            let code = match err.raw_os_error() {
                Some(errno) if errno != 0 => errno,
                _ => wire::ERR_NAME_NOT_RESOLVED,
            };
            wire::encode_failure(code).to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;
    use std::net::SocketAddr;
    use std::thread;
    use std::time::Instant;

    /// (read end, write end) of a fresh pipe, as `File`s.
    fn pipe_pair() -> (File, File) {
        let (read, write) = nix::unistd::pipe().expect("pipe");
        (File::from(read), File::from(write))
    }

    struct Harness {
        request_tx: File,
        response_rx: File,
        thread: thread::JoinHandle<io::Result<()>>,
    }

    fn start_worker(idle_timeout: Duration) -> Harness {
        let (mut request_rx, request_tx) = pipe_pair();
        let (response_rx, mut response_tx) = pipe_pair();
        let thread = thread::spawn(move || {
            run_loop(&mut request_rx, &mut response_tx, idle_timeout)
        });
        Harness { request_tx, response_rx, thread }
    }

    fn read_i32(file: &mut File) -> i32 {
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf).expect("read i32");
        i32::from_le_bytes(buf)
    }

    fn read_u32(file: &mut File) -> u32 {
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf).expect("read u32");
        u32::from_le_bytes(buf)
    }

    fn read_addrs(file: &mut File) -> Vec<SocketAddr> {
        let mut addrs = Vec::new();
        loop {
            let len = read_u32(file) as usize;
            if len == 0 {
                break;
            }
            let mut record = vec![0u8; len];
            file.read_exact(&mut record).expect("read record");
            addrs.push(wire::decode_addr(&record).expect("decode record"));
        }
        addrs
    }

    #[test]
    fn test_ack_precedes_response_and_localhost_resolves() {
        let mut h = start_worker(Duration::from_secs(10));

        let msg = RequestMsg::new("localhost", 80);
        h.request_tx.write_all(&msg.encode()).unwrap();

        let mut ack = [0u8; 1];
        h.response_rx.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], wire::ACK);

        let status = read_i32(&mut h.response_rx);
        assert_eq!(status, wire::STATUS_OK);
        let addrs = read_addrs(&mut h.response_rx);
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 80));

        drop(h.request_tx);
        h.thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_serves_requests_back_to_back() {
        let mut h = start_worker(Duration::from_secs(10));

        for port in [80u16, 443] {
            let msg = RequestMsg::new("localhost", port);
            h.request_tx.write_all(&msg.encode()).unwrap();

            let mut ack = [0u8; 1];
            h.response_rx.read_exact(&mut ack).unwrap();
            assert_eq!(ack[0], wire::ACK);
            assert_eq!(read_i32(&mut h.response_rx), wire::STATUS_OK);
            let addrs = read_addrs(&mut h.response_rx);
            assert!(addrs.iter().all(|a| a.port() == port));
        }

        drop(h.request_tx);
        h.thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_unresolvable_hostname_reports_failure_code() {
        let mut h = start_worker(Duration::from_secs(10));

        let msg = RequestMsg::new("unresolvable-host.invalid", 80);
        h.request_tx.write_all(&msg.encode()).unwrap();

        let mut ack = [0u8; 1];
        h.response_rx.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], wire::ACK);

        let status = read_i32(&mut h.response_rx);
        assert_ne!(status, wire::STATUS_OK);

        drop(h.request_tx);
        h.thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_exits_cleanly_when_parent_closes_pipe() {
        let h = start_worker(Duration::from_secs(10));
        drop(h.request_tx);
        h.thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_exits_on_idle_timeout() {
        let h = start_worker(Duration::from_millis(50));
        let started = Instant::now();
        h.thread.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_empty_hostname_is_a_protocol_error() {
        let mut h = start_worker(Duration::from_secs(10));

        let msg = RequestMsg { hostname: String::new(), port: 80 };
        h.request_tx.write_all(&msg.encode()).unwrap();

        // No ack is written for a malformed request; the loop bails out.
        let err = h.thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut rest = Vec::new();
        h.response_rx.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_truncated_request_is_an_error() {
        let mut h = start_worker(Duration::from_secs(10));
        h.request_tx.write_all(&[1u8; 16]).unwrap();
        drop(h.request_tx);
        let err = h.thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
