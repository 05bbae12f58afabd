use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use duplex_bench::config::{
    DEFAULT_CAPACITY_TRIAL_BYTES, DEFAULT_CAPACITY_TRIALS, DEFAULT_LATENCY_PAYLOAD_BYTES,
    DEFAULT_LATENCY_REPEATS, DEFAULT_THROUGHPUT_TARGET_BYTES,
};
use duplex_bench::{BackendKind, BenchConfig, PayloadPattern, ResponderMode, run_session};
use duplex_slot::{Backoff, PollPolicy};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendChoice {
    File,
    Mapped,
    Segment,
    /// Every backend, one after another
    All,
}

impl BackendChoice {
    fn kinds(self) -> Vec<BackendKind> {
        match self {
            BackendChoice::File => vec![BackendKind::File],
            BackendChoice::Mapped => vec![BackendKind::Mapped],
            BackendChoice::Segment => vec![BackendKind::Segment],
            BackendChoice::All => BackendKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackoffChoice {
    Spin,
    Yield,
    Sleep,
}

#[derive(Parser, Debug)]
#[command(name = "duplex_bench")]
#[command(about = "Compare file, mmap and SysV shm as a single-slot IPC channel")]
struct Args {
    /// Backend(s) to benchmark
    #[arg(short, long, value_enum, default_value = "all")]
    backend: BackendChoice,

    /// Check every echo byte for byte
    #[arg(long)]
    verify: bool,

    /// Payload content
    #[arg(short, long, value_enum, default_value = "arithmetic")]
    pattern: PayloadPattern,

    /// Channel file for the file backend
    #[arg(short, long, default_value = "file.data")]
    file: PathBuf,

    /// What a waiting endpoint does between polls
    #[arg(long, value_enum, default_value = "spin")]
    backoff: BackoffChoice,

    /// Give up on a silent peer after this many milliseconds (default: wait forever)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Run the responder on a thread instead of a forked process
    #[arg(long)]
    threaded: bool,

    /// Round trips in the latency workload
    #[arg(long, default_value_t = DEFAULT_LATENCY_REPEATS)]
    latency_repeats: u32,

    /// Message size of the latency workload in bytes
    #[arg(long, default_value_t = DEFAULT_LATENCY_PAYLOAD_BYTES)]
    latency_bytes: usize,

    /// Bytes echoed by the throughput workload
    #[arg(long, default_value_t = DEFAULT_THROUGHPUT_TARGET_BYTES)]
    throughput_bytes: usize,

    /// Bytes echoed by each capacity trial
    #[arg(long, default_value_t = DEFAULT_CAPACITY_TRIAL_BYTES)]
    capacity_bytes: usize,

    /// Number of capacity trials
    #[arg(long, default_value_t = DEFAULT_CAPACITY_TRIALS)]
    capacity_trials: u32,

    /// Block size for throughput and capacity (default: per backend)
    #[arg(long)]
    block_bytes: Option<usize>,
}

impl Args {
    fn config_for(&self, kind: BackendKind) -> BenchConfig {
        let backoff = match self.backoff {
            BackoffChoice::Spin => Backoff::Spin,
            BackoffChoice::Yield => Backoff::yielding(),
            BackoffChoice::Sleep => Backoff::sleeping(),
        };
        let mut poll = PollPolicy::new(backoff);
        if let Some(ms) = self.timeout_ms {
            poll = poll.with_timeout(Duration::from_millis(ms));
        }
        BenchConfig {
            latency_repeats: self.latency_repeats,
            latency_payload_bytes: self.latency_bytes,
            throughput_target_bytes: self.throughput_bytes,
            capacity_trial_bytes: self.capacity_bytes,
            capacity_trials: self.capacity_trials,
            block_bytes: self.block_bytes.unwrap_or_else(|| kind.block_bytes()),
            verify: self.verify,
            pattern: self.pattern,
            poll,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = if args.threaded {
        ResponderMode::Thread
    } else {
        ResponderMode::Process
    };

    for kind in args.backend.kinds() {
        let config = args.config_for(kind);
        println!("Benchmark for method \"{}\" started", kind.name());
        match run_session(kind, &config, &args.file, mode) {
            Ok(report) => println!("{}", report),
            Err(e) => {
                eprintln!("{} benchmark failed: {}", kind.name(), e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
