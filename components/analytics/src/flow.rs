//! Per-flowlet continuity tracking.
//!
//! Each flowlet carries its own monotonic sequence number; the tracker
//! classifies every arrival against the previous one and accumulates the
//! flowlet's error interval. Classification is pure bookkeeping and never
//! fails.

use log::debug;

/// Continuity statistics for one flowlet, reported in the `flows` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorInterval {
    /// Most recent flow sequence number admitted.
    pub last_known_sn: u64,
    /// Forward gaps larger than one packet.
    pub burst_count: u64,
    /// Arrivals more than one behind the previous (out of order).
    pub reverses: u64,
    /// Arrivals exactly one behind the previous (same packet again).
    pub duplicates: u64,
    pub longest_burst: u64,
    /// Total packets missing from the flowlet's sequence so far.
    pub seq_breaks: u64,
}

/// What one arrival told us: a burst length when the arrival terminated a
/// gap, zero otherwise, plus the flowlet's running burst count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowSignal {
    pub burst_len: u64,
    pub burst_count: u64,
}

/// Flowlet-indexed continuity state. Entries are created on the first
/// packet for an index and live for the process; the flowlet population is
/// small and fixed, so a dense vector beats a map here.
#[derive(Debug, Default)]
pub struct FlowTracker {
    intervals: Vec<Option<ErrorInterval>>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one arrival on `flowlet`. The gap is measured against
    /// the sequence number that would continue the flow exactly:
    /// `gap = flow_sn - (last_known_sn + 1)`, as a signed 64-bit delta.
    pub fn classify(&mut self, flow_sn: u64, flowlet: usize) -> FlowSignal {
        if flowlet >= self.intervals.len() {
            self.intervals.resize(flowlet + 1, None);
        }
        let slot = &mut self.intervals[flowlet];
        let interval = match slot {
            Some(interval) => interval,
            None => {
                *slot = Some(ErrorInterval { last_known_sn: flow_sn, ..Default::default() });
                return FlowSignal::default();
            }
        };

        let expected_sn = interval.last_known_sn.wrapping_add(1);
        interval.last_known_sn = flow_sn;
        let gap = flow_sn.wrapping_sub(expected_sn) as i64;

        if gap.unsigned_abs() > 2 {
            debug!("continuity break of {gap} packets on flowlet {flowlet}");
        }
        if gap > 0 {
            // Every positive gap is that many packets missing from the flow,
            // whether or not it is wide enough to count as a burst.
            interval.seq_breaks += gap as u64;
        }
        if gap < -1 {
            interval.reverses += 1;
            return FlowSignal::default();
        }
        if gap == -1 {
            interval.duplicates += 1;
        }
        if gap > 1 {
            interval.burst_count += 1;
            if gap as u64 > interval.longest_burst {
                debug!("longest burst now {gap} on flowlet {flowlet}");
                interval.longest_burst = gap as u64;
            }
            return FlowSignal { burst_len: gap as u64, burst_count: interval.burst_count };
        }
        FlowSignal::default()
    }

    /// Copy of the interval for `flowlet`, or a zeroed one if no packet has
    /// arrived there yet.
    pub fn interval(&self, flowlet: usize) -> ErrorInterval {
        self.intervals.get(flowlet).copied().flatten().unwrap_or_default()
    }

    /// Flowlets that have seen at least one packet.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, ErrorInterval)> + '_ {
        self.intervals.iter().enumerate().filter_map(|(idx, interval)| interval.map(|iv| (idx, iv)))
    }
}
