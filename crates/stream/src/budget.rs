use std::time::Duration;

use verdant_common::ChunkId;

/// Per-frame streaming statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frame: u64,
    pub viewer_chunk: ChunkId,
    pub target_chunks: usize,
    pub loads_started: usize,
    pub loads_completed: usize,
    /// Loads that ended without data: cancelled, missing or rejected.
    pub loads_failed: usize,
    pub chunks_disposed: usize,
    pub queued: usize,
    pub loading: usize,
    pub loaded: usize,
    pub disposing: usize,
    pub pooled: usize,
    pub visible_chunks: usize,
    pub update_time: Duration,
}

/// Rolling window of frame times.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame timer needs at least one slot");
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn window(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let window = self.window();
        if window.is_empty() {
            return Duration::ZERO;
        }
        window.iter().sum::<Duration>() / window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.window().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }
}
