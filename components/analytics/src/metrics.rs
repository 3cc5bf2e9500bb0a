use std::sync::atomic::{AtomicU64, Ordering};

/// Receive counters for one flowlet socket. Bumped from the socket task,
/// read from the reporting path, so these stay lock-free.
#[derive(Debug, Default)]
pub struct FlowletMetrics {
    packets_total: AtomicU64,
    bytes_total: AtomicU64,
    malformed_total: AtomicU64,
}

impl FlowletMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, bytes: usize) {
        self.packets_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// (packets, bytes, malformed) received so far.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.packets_total.load(Ordering::Relaxed),
            self.bytes_total.load(Ordering::Relaxed),
            self.malformed_total.load(Ordering::Relaxed),
        )
    }
}
