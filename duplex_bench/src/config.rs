//! Compiled-in workload constants and the per-run configuration.

use clap::ValueEnum;
use duplex_slot::{HEADER_SIZE, PollPolicy};
use rand::RngCore;

use crate::error::{Error, Result};

pub const MIB: usize = 1 << 20;

pub const DEFAULT_LATENCY_REPEATS: u32 = 10;
pub const DEFAULT_LATENCY_PAYLOAD_BYTES: usize = 128;
pub const DEFAULT_THROUGHPUT_TARGET_BYTES: usize = 128 * MIB;
pub const DEFAULT_CAPACITY_TRIAL_BYTES: usize = 16 * MIB;
pub const DEFAULT_CAPACITY_TRIALS: u32 = 16;
pub const DEFAULT_BLOCK_BYTES: usize = 512 * 1024;

/// Storage mechanism under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BackendKind {
    /// Regular file in the working directory
    File,
    /// Anonymous shared mapping
    Mapped,
    /// System-V shared memory segment
    Segment,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::File,
        BackendKind::Mapped,
        BackendKind::Segment,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::File => "Files",
            BackendKind::Mapped => "Mmap",
            BackendKind::Segment => "Shared",
        }
    }

    /// Message size used by the throughput and capacity workloads.
    pub fn block_bytes(self) -> usize {
        match self {
            BackendKind::File => DEFAULT_BLOCK_BYTES,
            BackendKind::Mapped => DEFAULT_BLOCK_BYTES,
            BackendKind::Segment => DEFAULT_BLOCK_BYTES,
        }
    }
}

/// Content of benchmark payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PayloadPattern {
    /// Byte `i` is `i * 3 + 23` (mod 256)
    #[default]
    Arithmetic,
    /// Random bytes, drawn once per payload
    Random,
}

impl PayloadPattern {
    pub fn fill(self, len: usize) -> Vec<u8> {
        match self {
            PayloadPattern::Arithmetic => (0..len).map(|i| (i * 3 + 23) as u8).collect(),
            PayloadPattern::Random => {
                let mut buf = vec![0u8; len];
                rand::thread_rng().fill_bytes(&mut buf);
                buf
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub latency_repeats: u32,
    pub latency_payload_bytes: usize,
    pub throughput_target_bytes: usize,
    pub capacity_trial_bytes: usize,
    pub capacity_trials: u32,
    pub block_bytes: usize,
    /// Compare every echo with what was sent.
    pub verify: bool,
    pub pattern: PayloadPattern,
    pub poll: PollPolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            latency_repeats: DEFAULT_LATENCY_REPEATS,
            latency_payload_bytes: DEFAULT_LATENCY_PAYLOAD_BYTES,
            throughput_target_bytes: DEFAULT_THROUGHPUT_TARGET_BYTES,
            capacity_trial_bytes: DEFAULT_CAPACITY_TRIAL_BYTES,
            capacity_trials: DEFAULT_CAPACITY_TRIALS,
            block_bytes: DEFAULT_BLOCK_BYTES,
            verify: false,
            pattern: PayloadPattern::default(),
            poll: PollPolicy::default(),
        }
    }
}

impl BenchConfig {
    pub fn for_backend(kind: BackendKind) -> Self {
        Self {
            block_bytes: kind.block_bytes(),
            ..Self::default()
        }
    }

    /// Largest message any workload sends.
    pub fn max_message_bytes(&self) -> usize {
        self.block_bytes.max(self.latency_payload_bytes)
    }

    /// Storage size (header included) that fits every workload.
    pub fn storage_len(&self) -> usize {
        HEADER_SIZE + self.max_message_bytes()
    }

    /// Round trips in the throughput workload.
    pub fn throughput_rounds(&self) -> u64 {
        rounds_for(self.throughput_target_bytes, self.block_bytes)
    }

    /// Round trips in one capacity trial.
    pub fn capacity_rounds(&self) -> u64 {
        rounds_for(self.capacity_trial_bytes, self.block_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.latency_repeats == 0, "latency_repeats must be > 0"),
            (self.latency_payload_bytes == 0, "latency_payload_bytes must be > 0"),
            (self.throughput_target_bytes == 0, "throughput_target_bytes must be > 0"),
            (self.capacity_trial_bytes == 0, "capacity_trial_bytes must be > 0"),
            (self.capacity_trials == 0, "capacity_trials must be > 0"),
            (self.block_bytes == 0, "block_bytes must be > 0"),
            (
                self.max_message_bytes() > i32::MAX as usize,
                "messages must fit the 32-bit size field",
            ),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, msg)) => Err(Error::InvalidConfig((*msg).to_string())),
            None => Ok(()),
        }
    }

    /// Checks that every workload fits in a slot of `payload_capacity` bytes.
    pub fn validate_for(&self, payload_capacity: usize) -> Result<()> {
        self.validate()?;
        if self.max_message_bytes() > payload_capacity {
            return Err(Error::InvalidConfig(format!(
                "messages of {} bytes do not fit a {} byte slot",
                self.max_message_bytes(),
                payload_capacity
            )));
        }
        Ok(())
    }
}

fn rounds_for(target: usize, block: usize) -> u64 {
    (target.div_ceil(block.max(1)) as u64).max(1)
}
