//! Resolve hostnames from the command line through the worker pool.
//!
//! ```sh
//! cargo run --example lookup -- example.com 443 localhost 80
//! ```

use dnspool::{PoolConfig, Resolver};

#[tokio::main]
async fn main() {
    // The default pool re-executes this binary in worker mode; this call
    // turns those children into resolver workers and never returns for them.
    dnspool::worker::run_if_requested();

    let mut args = std::env::args().skip(1).peekable();
    if args.peek().is_none() {
        eprintln!("usage: lookup <host> [port] [<host> [port] ...]");
        return;
    }

    let resolver = Resolver::new(PoolConfig::default());
    let mut queries = Vec::new();
    while let Some(host) = args.next() {
        let port: u16 = match args.peek().and_then(|p| p.parse().ok()) {
            Some(port) => {
                args.next();
                port
            }
            None => 80,
        };
        queries.push((host.clone(), resolver.resolve(&host, port)));
    }

    for (host, query) in queries {
        match query.await {
            Ok(addrs) => {
                for addr in addrs {
                    println!("{host} -> {addr}");
                }
            }
            Err(err) => eprintln!("{host}: {err}"),
        }
    }

    resolver.shutdown().await;
}
