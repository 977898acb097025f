//! Error definitions for the resolution subsystem.

use std::io;

use thiserror::Error;

use crate::wire;

/// Errors surfaced by [`crate::Resolver`] queries.
///
/// Every failure origin (platform resolver, worker transport, admission)
/// reaches the caller through the same `Result` as a success, so callers
/// have exactly one failure-checking path.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The platform resolver rejected the lookup (e.g. unknown host).
    /// Genuine resolution failures are never retried.
    #[error("failed to resolve {host:?}: {message}")]
    ResolutionFailed {
        host: String,
        /// Raw wire code: positive values are OS errnos, negative values are
        /// resolver codes (see [`crate::wire`]).
        code: i32,
        message: String,
    },

    /// A pipe to a worker broke: write/read error, EOF, or a bad ack.
    /// Attributed to the worker, not the hostname.
    #[error("resolver worker transport failure: {0}")]
    WorkerTransport(String),

    /// Spawning a worker process (or its pipe pair) failed.
    #[error("failed to spawn resolver worker: {0}")]
    SpawnFailed(#[from] io::Error),

    /// The hostname was empty after trimming whitespace.
    #[error("empty hostname")]
    InvalidHostname,

    /// The query was cancelled before it completed.
    #[error("query cancelled")]
    Cancelled,

    /// The resolver was shut down with this query still outstanding.
    #[error("resolver shut down")]
    ShutDown,
}

impl DnsError {
    /// Builds a [`DnsError::ResolutionFailed`] from a wire failure code,
    /// synthesizing a human-readable message.
    pub(crate) fn resolution(host: &str, code: i32) -> Self {
        let message = match code {
            wire::ERR_NAME_NOT_RESOLVED => "name or service not known".to_owned(),
            wire::ERR_NO_DATA => "resolver returned no addresses".to_owned(),
            c if c > 0 => io::Error::from_raw_os_error(c).to_string(),
            c => format!("resolver failure (code {c})"),
        };
        DnsError::ResolutionFailed { host: host.to_owned(), code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_message_for_known_codes() {
        let err = DnsError::resolution("nohost.example", wire::ERR_NAME_NOT_RESOLVED);
        match err {
            DnsError::ResolutionFailed { host, code, message } => {
                assert_eq!(host, "nohost.example");
                assert_eq!(code, wire::ERR_NAME_NOT_RESOLVED);
                assert!(message.contains("not known"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolution_message_for_errno() {
        // ECONNREFUSED is 111 on Linux; any errno renders via io::Error.
        let err = DnsError::resolution("host", 111);
        assert!(err.to_string().contains("host"));
    }
}
