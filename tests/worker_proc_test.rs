//! Protocol tests against the `dnspool-worker` binary itself, driven over
//! real pipes with blocking I/O (the way the pool's parent side sees it).

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use dnspool::wire::{self, RequestMsg};

fn spawn_worker(idle_ms: Option<u64>) -> Child {
    let mut command = Command::new(env!("CARGO_BIN_EXE_dnspool-worker"));
    command.stdin(Stdio::piped()).stdout(Stdio::piped());
    if let Some(ms) = idle_ms {
        command.env(dnspool::worker::IDLE_TIMEOUT_ENV, ms.to_string());
    }
    command.spawn().expect("spawn dnspool-worker")
}

fn read_u32(stream: &mut impl Read) -> u32 {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).expect("read u32");
    u32::from_le_bytes(buf)
}

fn read_i32(stream: &mut impl Read) -> i32 {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).expect("read i32");
    i32::from_le_bytes(buf)
}

#[test]
fn test_worker_binary_resolves_localhost() {
    let mut child = spawn_worker(None);
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    stdin
        .write_all(&RequestMsg::new("localhost", 443).encode())
        .unwrap();

    let mut ack = [0u8; 1];
    stdout.read_exact(&mut ack).unwrap();
    assert_eq!(ack[0], wire::ACK);

    assert_eq!(read_i32(&mut stdout), wire::STATUS_OK);
    let mut count = 0;
    loop {
        let len = read_u32(&mut stdout) as usize;
        if len == 0 {
            break;
        }
        let mut record = vec![0u8; len];
        stdout.read_exact(&mut record).unwrap();
        let addr = wire::decode_addr(&record).expect("well-formed record");
        assert_eq!(addr.port(), 443);
        count += 1;
    }
    assert!(count > 0);

    // Closing our end makes the worker exit cleanly.
    drop(stdin);
    let status = child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn test_worker_binary_exits_on_idle_timeout() {
    let mut child = spawn_worker(Some(100));
    let started = Instant::now();
    let status = child.wait().unwrap();
    assert!(status.success());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_worker_binary_exits_when_parent_hangs_up() {
    let mut child = spawn_worker(None);
    drop(child.stdin.take());
    let status = child.wait().unwrap();
    assert!(status.success());
}
