use std::time::{Duration, Instant};

/// Wall-clock stopwatch owned by the measurement that uses it.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Returns the time since the last start or lap and restarts.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now.duration_since(self.started);
        self.started = now;
        lap
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
    }
}
