//! Dedicated resolver worker binary.
//!
//! Serves resolution requests on stdin/stdout until its idle timeout passes
//! or the parent closes the pipe. Point `WorkerCommand` at this binary when
//! re-executing the embedding application is not an option.

use std::process::ExitCode;

fn main() -> ExitCode {
    dnspool::worker::run()
}
