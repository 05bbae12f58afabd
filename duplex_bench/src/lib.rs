//! Latency, throughput and capacity comparison of the `duplex_slot`
//! backends.
//!
//! A session creates the storage, forks an echo responder bound to side 1,
//! and runs the [`Harness`] on side 0 of the same channel.

pub mod config;
pub mod error;
pub mod harness;
pub mod session;
pub mod stopwatch;

pub use config::{BackendKind, BenchConfig, PayloadPattern};
pub use error::{Error, Result};
pub use harness::{BenchReport, Harness, echo_rate_mib_s};
pub use session::{ResponderMode, echo_responder, echo_with_buffer, run_session};
pub use stopwatch::Stopwatch;
