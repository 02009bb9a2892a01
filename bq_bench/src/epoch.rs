use std::time::{Duration, Instant};

pub struct EpochData {
    pub index: u32,
    pub completed: u64,
    pub duration: Duration,
}

impl EpochData {
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Counts completed operations in fixed wall-clock epochs.
pub struct EpochCollector {
    interval: Duration,
    epochs: Vec<EpochData>,
    epoch_start: Instant,
    epoch_completed: u64,
    next_index: u32,
}

impl EpochCollector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            epochs: Vec::new(),
            epoch_start: Instant::now(),
            epoch_completed: 0,
            next_index: 0,
        }
    }

    /// Add completed operations. Returns the epoch that just closed, if any.
    pub fn record(&mut self, delta: u64) -> Option<&EpochData> {
        self.epoch_completed += delta;
        let elapsed = self.epoch_start.elapsed();
        if elapsed < self.interval {
            return None;
        }
        self.close(elapsed);
        self.epochs.last()
    }

    /// Record the last partial epoch.
    pub fn finish(&mut self) {
        if self.epoch_completed > 0 {
            self.close(self.epoch_start.elapsed());
        }
    }

    pub fn total(&self) -> u64 {
        self.epochs.iter().map(|e| e.completed).sum()
    }

    pub fn elapsed(&self) -> Duration {
        self.epochs.iter().map(|e| e.duration).sum()
    }

    fn close(&mut self, elapsed: Duration) {
        self.epochs.push(EpochData {
            index: self.next_index,
            completed: self.epoch_completed,
            duration: elapsed,
        });
        self.next_index += 1;
        self.epoch_completed = 0;
        self.epoch_start = Instant::now();
    }
}
