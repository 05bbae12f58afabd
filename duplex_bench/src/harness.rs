//! Latency, throughput and capacity workloads over one endpoint.
//!
//! Every workload is a sequence of round trips: write a message, then block
//! until the responder echoes it back.

use std::fmt;
use std::time::Duration;

use duplex_slot::{Endpoint, SlotStorage};

use crate::config::{BackendKind, BenchConfig, MIB};
use crate::error::{Error, Result};
use crate::stopwatch::Stopwatch;

/// Shortest elapsed time used in rate computations.
const MIN_ELAPSED_SECS: f64 = 1e-9;

/// `MiB/s` over both directions of the round trips (`mib_sent / secs * 2`).
pub fn echo_rate_mib_s(bytes_sent: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
    bytes_sent as f64 / MIB as f64 / secs * 2.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchReport {
    pub backend: BackendKind,
    /// Mean one-way latency (half a round trip).
    pub latency: Duration,
    pub throughput_mib_s: f64,
    /// Best burst rate over all capacity trials.
    pub capacity_mib_s: f64,
    /// Round trips completed across all workloads.
    pub round_trips: u64,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latency: {:.9} s", self.latency.as_secs_f64())?;
        writeln!(f, "Throughput: {:.3} MB/s", self.throughput_mib_s)?;
        write!(f, "Capacity: {:.3} MB/s", self.capacity_mib_s)
    }
}

pub struct Harness<'a, S: SlotStorage> {
    endpoint: &'a mut Endpoint<S>,
    config: &'a BenchConfig,
    reply: Vec<u8>,
    round_trips: u64,
}

impl<'a, S: SlotStorage> Harness<'a, S> {
    pub fn new(endpoint: &'a mut Endpoint<S>, config: &'a BenchConfig) -> Self {
        let reply = Vec::with_capacity(config.max_message_bytes());
        Self {
            endpoint,
            config,
            reply,
            round_trips: 0,
        }
    }

    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    fn check_config(&self) -> Result<()> {
        self.config.validate_for(self.endpoint.payload_capacity())
    }

    fn round_trip(&mut self, msg: &[u8]) -> Result<()> {
        self.endpoint.write_bytes(msg)?;
        let received = self.endpoint.read_into(&mut self.reply)?;
        if received == 0 {
            return Err(Error::PeerClosed);
        }
        if self.config.verify && self.reply != msg {
            let first_diff = msg
                .iter()
                .zip(&self.reply)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| msg.len().min(self.reply.len()));
            return Err(Error::EchoMismatch {
                round: self.round_trips,
                sent: msg.len(),
                received,
                first_diff,
            });
        }
        self.round_trips += 1;
        Ok(())
    }

    /// Mean one-way latency over `latency_repeats` small round trips.
    pub fn latency(&mut self) -> Result<Duration> {
        self.check_config()?;
        let msg = self.config.pattern.fill(self.config.latency_payload_bytes);
        let mut total = Duration::ZERO;
        for _ in 0..self.config.latency_repeats {
            let sw = Stopwatch::start();
            self.round_trip(&msg)?;
            total += sw.elapsed() / 2;
        }
        let latency = total / self.config.latency_repeats;
        tracing::debug!(?latency, "latency workload done");
        Ok(latency)
    }

    fn burst(&mut self, msg: &[u8], rounds: u64) -> Result<f64> {
        let sw = Stopwatch::start();
        for _ in 0..rounds {
            self.round_trip(msg)?;
        }
        Ok(echo_rate_mib_s(rounds * msg.len() as u64, sw.elapsed()))
    }

    /// Sustained rate until `throughput_target_bytes` have been echoed.
    pub fn throughput(&mut self) -> Result<f64> {
        self.check_config()?;
        let msg = self.config.pattern.fill(self.config.block_bytes);
        let rate = self.burst(&msg, self.config.throughput_rounds())?;
        tracing::debug!(rate, "throughput workload done");
        Ok(rate)
    }

    /// Best rate over `capacity_trials` bursts of `capacity_trial_bytes`.
    pub fn capacity(&mut self) -> Result<f64> {
        self.check_config()?;
        let msg = self.config.pattern.fill(self.config.block_bytes);
        let rounds = self.config.capacity_rounds();
        let mut best = 0.0f64;
        for trial in 0..self.config.capacity_trials {
            let rate = self.burst(&msg, rounds)?;
            tracing::trace!(trial, rate, "capacity trial");
            best = best.max(rate);
        }
        tracing::debug!(best, "capacity workload done");
        Ok(best)
    }

    /// Runs latency, throughput and capacity in that order.
    pub fn run(&mut self, backend: BackendKind) -> Result<BenchReport> {
        self.check_config()?;
        let latency = self.latency()?;
        let throughput_mib_s = self.throughput()?;
        let capacity_mib_s = self.capacity()?;
        Ok(BenchReport {
            backend,
            latency,
            throughput_mib_s,
            capacity_mib_s,
            round_trips: self.round_trips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PayloadPattern;
    use duplex_slot::{Channel, HEADER_SIZE, MappedStorage};
    use std::sync::Arc;
    use std::thread;

    fn small_config() -> BenchConfig {
        BenchConfig {
            latency_repeats: 3,
            latency_payload_bytes: 16,
            throughput_target_bytes: 64 * 1024,
            capacity_trial_bytes: 16 * 1024,
            capacity_trials: 4,
            block_bytes: 4096,
            verify: true,
            pattern: PayloadPattern::Random,
            ..BenchConfig::default()
        }
    }

    /// Responder that flips the first byte of every message after `clean`
    /// faithful echoes.
    fn corrupting_echo(
        mut ep: Endpoint<Arc<MappedStorage>>,
        clean: u64,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let mut n = 0;
            while ep.read_into(&mut buf).unwrap() > 0 {
                if n >= clean {
                    buf[0] ^= 0xFF;
                }
                n += 1;
                ep.write_bytes(&buf).unwrap();
            }
        })
    }

    fn pair(cfg: &BenchConfig) -> (Endpoint<Arc<MappedStorage>>, Endpoint<Arc<MappedStorage>>) {
        let storage = Arc::new(MappedStorage::create(cfg.storage_len()).unwrap());
        Channel::create(storage).unwrap().pair().unwrap()
    }

    #[test]
    fn test_run_reports_finite_metrics() {
        let cfg = small_config();
        let (mut driver, responder) = pair(&cfg);
        let echo = corrupting_echo(responder, u64::MAX);

        let report = Harness::new(&mut driver, &cfg).run(BackendKind::Mapped).unwrap();
        driver.close().unwrap();
        echo.join().unwrap();

        assert_eq!(report.round_trips, 3 + 16 + 4 * 4);
        assert!(report.latency > Duration::ZERO);
        for rate in [report.throughput_mib_s, report.capacity_mib_s] {
            assert!(rate.is_finite() && rate >= 0.0);
        }
        let text = report.to_string();
        assert!(text.starts_with("Latency: "));
        assert!(text.contains("Throughput: "));
        assert!(text.contains("Capacity: "));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let cfg = small_config();
        let (mut driver, responder) = pair(&cfg);
        let echo = corrupting_echo(responder, 2);

        let err = Harness::new(&mut driver, &cfg).latency().unwrap_err();
        driver.close().unwrap();
        echo.join().unwrap();

        match err {
            Error::EchoMismatch {
                round,
                sent,
                received,
                first_diff,
            } => {
                assert_eq!(round, 2);
                assert_eq!(sent, 16);
                assert_eq!(received, 16);
                assert_eq!(first_diff, 0);
            }
            other => panic!("expected EchoMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unverified_ignores_corruption() {
        let cfg = BenchConfig {
            verify: false,
            ..small_config()
        };
        let (mut driver, responder) = pair(&cfg);
        let echo = corrupting_echo(responder, 0);
        Harness::new(&mut driver, &cfg).latency().unwrap();
        driver.close().unwrap();
        echo.join().unwrap();
    }

    #[test]
    fn test_peer_closed() {
        let cfg = small_config();
        let (mut driver, mut responder) = pair(&cfg);
        let closer = thread::spawn(move || {
            let first = responder.read_bytes().unwrap();
            assert_eq!(first.len(), 16);
            responder.close().unwrap();
        });
        let err = Harness::new(&mut driver, &cfg).latency().unwrap_err();
        closer.join().unwrap();
        assert!(matches!(err, Error::PeerClosed));
        assert!(driver.is_closed());
    }

    #[test]
    fn test_oversized_config_rejected() {
        let cfg = small_config();
        let storage = Arc::new(MappedStorage::create(HEADER_SIZE + 1024).unwrap());
        let (mut driver, _responder) = Channel::create(storage).unwrap().pair().unwrap();
        assert!(matches!(
            Harness::new(&mut driver, &cfg).run(BackendKind::Mapped),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_workloads_reject_zero_counts() {
        let (mut driver, _responder) = pair(&small_config());
        let cfg = BenchConfig {
            latency_repeats: 0,
            ..small_config()
        };
        let mut harness = Harness::new(&mut driver, &cfg);
        assert!(matches!(harness.latency(), Err(Error::InvalidConfig(_))));
        assert!(matches!(harness.throughput(), Err(Error::InvalidConfig(_))));
        assert_eq!(harness.round_trips(), 0);

        let cfg = BenchConfig {
            capacity_trials: 0,
            ..small_config()
        };
        assert!(matches!(
            Harness::new(&mut driver, &cfg).capacity(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_echo_rate() {
        let rate = echo_rate_mib_s(MIB as u64, Duration::from_secs(1));
        assert!((rate - 2.0).abs() < 1e-9);
        assert!(echo_rate_mib_s(MIB as u64, Duration::ZERO).is_finite());
        assert_eq!(echo_rate_mib_s(0, Duration::from_secs(1)), 0.0);
    }
}
