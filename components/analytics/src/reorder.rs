//! Stream-level reorder buffer.
//!
//! A fixed-capacity circular window over the stream sequence space. Each
//! slot holds a small counter: zero means the sequence number was never
//! seen, one means it arrived, two or more means it arrived again while
//! still inside the window. Admitting a number beyond the window spills the
//! oldest slots, and the spill walk is where drops, duplicates and drop
//! bursts are tallied. The common-case admit touches one slot and never
//! allocates.

use log::info;

use crate::flow::{ErrorInterval, FlowSignal, FlowTracker};

pub const DEFAULT_CAPACITY: usize = 512;

/// Everything one admission produced. `stream_burst_len` is nonzero when
/// the packet terminated a run of stream-level drops; the flow fields echo
/// the continuity tracker's verdict for the packet's flowlet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    pub stream_burst_len: u64,
    pub flow_burst_len: u64,
    pub flow_burst_count: u64,
}

pub struct ReorderBuffer {
    slots: Vec<u8>,
    /// Ring index of the oldest tracked sequence number.
    tail_idx: usize,
    /// Ring index of the newest tracked sequence number.
    head_idx: usize,
    /// Sequence number at `tail_idx`; zero means the buffer is empty.
    tail_sn: u64,
    /// Last evicted sequence number that had actually arrived. Spilled
    /// drops only extend a burst when they are clear of this mark.
    last_spilled_good_sn: u64,
    drops: u64,
    dups: u64,
    flows: FlowTracker,
    smallest_received_sn: u64,
    largest_received_sn: u64,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "reorder window must hold at least one packet");
        Self {
            slots: vec![0; capacity],
            tail_idx: 0,
            head_idx: 0,
            tail_sn: 0,
            last_spilled_good_sn: 0,
            drops: 0,
            dups: 0,
            flows: FlowTracker::new(),
            smallest_received_sn: u64::MAX,
            largest_received_sn: 0,
        }
    }

    /// Admits one packet: `sn` is its position in the whole stream,
    /// `flow_sn` its position within `flowlet`. Never fails; stale packets
    /// are logged and discarded without touching any counter.
    pub fn add(&mut self, sn: u64, flow_sn: u64, flowlet: usize) -> Admission {
        self.largest_received_sn = self.largest_received_sn.max(sn);
        self.smallest_received_sn = self.smallest_received_sn.min(sn);

        let FlowSignal { burst_len, burst_count } = self.flows.classify(flow_sn, flowlet);
        let mut admission =
            Admission { stream_burst_len: 0, flow_burst_len: burst_len, flow_burst_count: burst_count };

        // First packet into an empty buffer anchors the window.
        if self.tail_sn == 0 {
            self.tail_sn = sn;
            self.head_idx = self.tail_idx;
            self.slots[self.tail_idx] = 1;
            return admission;
        }

        let lowest = self.lowest_possible_sn();
        if sn < lowest {
            // Its slot was already evicted; whatever it would have told us
            // is in the drop count for good.
            info!("ignoring stale packet {sn} (lowest admissible is {lowest})");
            return admission;
        }
        if sn <= self.highest_possible_sn() {
            self.mark(sn);
            return admission;
        }
        admission.stream_burst_len = self.spill(sn);
        admission
    }

    /// Cumulative packets charged as dropped since creation.
    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Cumulative duplicate arrivals observed at spill time.
    pub fn duplicates(&self) -> u64 {
        self.dups
    }

    /// Continuity statistics for `flowlet`, zeroed if it has seen nothing.
    pub fn flow_interval(&self, flowlet: usize) -> ErrorInterval {
        self.flows.interval(flowlet)
    }

    /// Distinct sequence-number span observed so far, including numbers
    /// that never arrived.
    pub fn stream_extent(&self) -> u64 {
        if self.smallest_received_sn == u64::MAX {
            return 0;
        }
        1 + self.largest_received_sn - self.smallest_received_sn
    }

    /// Logs one burst summary line per active flowlet.
    pub fn report_bursts(&self) {
        for (flowlet, interval) in self.flows.occupied() {
            info!(
                "flowlet {} continuity breaks {}, continuity bursts: {}, longest {}",
                flowlet, interval.seq_breaks, interval.burst_count, interval.longest_burst
            );
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of sequence numbers between tail and head, inclusive.
    fn occupancy(&self) -> u64 {
        if self.tail_sn == 0 {
            return 0;
        }
        let diff = self.head_idx as i64 - self.tail_idx as i64;
        if diff < 0 {
            (self.capacity() as i64 + diff) as u64
        } else {
            (diff + 1) as u64
        }
    }

    /// Oldest sequence number still admissible. Anything below it is stale;
    /// slack left in the ring lets moderately late packets land behind the
    /// tail.
    fn lowest_possible_sn(&self) -> u64 {
        let slack = self.capacity() as u64 - self.occupancy();
        self.tail_sn.saturating_sub(slack)
    }

    /// Newest sequence number that fits without evicting anything.
    fn highest_possible_sn(&self) -> u64 {
        self.tail_sn + self.capacity() as u64 - 1
    }

    fn idx_for(&self, sn: u64) -> usize {
        ((self.tail_idx as u64).wrapping_add(sn.wrapping_sub(self.tail_sn)) % self.capacity() as u64) as usize
    }

    fn mark(&mut self, sn: u64) {
        let newest_sn = self.tail_sn + self.occupancy() - 1;
        let idx = self.idx_for(sn);
        self.slots[idx] = self.slots[idx].saturating_add(1);
        if sn > newest_sn {
            self.head_idx = idx;
        }
    }

    /// Evicts enough of the oldest slots that `sn` fits, charging every
    /// never-marked slot as a drop and every over-marked slot as
    /// duplicates. Returns the largest drop burst the walk uncovered.
    fn spill(&mut self, sn: u64) -> u64 {
        let mut patchup_burst = 0u64;
        let mut distance = sn - self.highest_possible_sn();
        debug_assert!(distance > 0);
        if distance >= self.capacity() as u64 {
            // The leap clears the whole window: everything in between is
            // unrepresentable and charged as dropped up front.
            patchup_burst = distance - 1;
            distance = self.capacity() as u64;
            self.drops += patchup_burst;
        } else {
            distance = distance.min(self.occupancy());
        }

        let mut current_burst = 0u64;
        for _ in 0..distance {
            let slot = self.slots[self.tail_idx];
            self.slots[self.tail_idx] = 0;
            if slot == 0 {
                self.drops += 1;
                if self.tail_sn > self.last_spilled_good_sn + 2 {
                    current_burst += 1;
                }
            } else {
                self.dups += u64::from(slot - 1);
                current_burst = 0;
                self.last_spilled_good_sn = self.tail_sn;
            }
            self.tail_idx = (self.tail_idx + 1) % self.capacity();
            self.tail_sn += 1;
        }

        if patchup_burst > 0 {
            // Window wiped; restart it around the packet that caused the leap.
            self.tail_sn = sn;
            self.head_idx = self.tail_idx;
            self.slots[self.tail_idx] += 1;
        } else {
            self.mark(sn);
        }

        if current_burst > 0 {
            current_burst + patchup_burst
        } else {
            patchup_burst
        }
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
