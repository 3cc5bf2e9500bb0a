use crate::ingest::Arrival;
use flowgauge_analytics::{FlowletMetrics, ReorderBuffer};
use flowgauge_recorder::{BurstRow, DropsRow, FlowRow, StatsRow, StreamBurstRow};
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, MissedTickBehavior};

const DROPS_REPORT_PERIOD: Duration = Duration::from_secs(10);
const FLOWS_REPORT_PERIOD: Duration = Duration::from_secs(10);
const FLOWS_REPORT_DELAY: Duration = Duration::from_secs(15);

/// The single place the reorder buffer is mutated. Arrivals from every
/// flowlet socket are admitted here in OS-delivered order, and the
/// periodic reports sample the same state between admissions, so every
/// snapshot is consistent without locking.
pub struct Analyzer {
    buffer: ReorderBuffer,
    base_port: u16,
    metrics: Vec<Arc<FlowletMetrics>>,
    rows: mpsc::UnboundedSender<StatsRow>,
    last_report_bytes: u64,
    last_report_time: Instant,
}

impl Analyzer {
    pub fn new(
        buffer: ReorderBuffer,
        base_port: u16,
        metrics: Vec<Arc<FlowletMetrics>>,
        rows: mpsc::UnboundedSender<StatsRow>,
    ) -> Self {
        Self { buffer, base_port, metrics, rows, last_report_bytes: 0, last_report_time: Instant::now() }
    }

    pub async fn run(mut self, mut arrivals: mpsc::Receiver<Arrival>, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now();
        let mut drops_ticker = interval_at(start + DROPS_REPORT_PERIOD, DROPS_REPORT_PERIOD);
        drops_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flows_ticker = interval_at(start + FLOWS_REPORT_DELAY, FLOWS_REPORT_PERIOD);
        flows_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                arrival = arrivals.recv() => match arrival {
                    Some(arrival) => self.admit(arrival),
                    None => break,
                },
                _ = drops_ticker.tick() => self.report_drops(),
                _ = flows_ticker.tick() => self.report_flows(),
            }
        }
        info!("analytics stopped");
    }

    fn admit(&mut self, arrival: Arrival) {
        let header = arrival.header;
        let admission = self.buffer.add(header.stream_sn, header.flow_sn, arrival.flowlet);

        if admission.flow_burst_len != 0 {
            let (packets_received, bytes_received, _) = self.metrics[arrival.flowlet].snapshot();
            let _ = self.rows.send(StatsRow::Burst(BurstRow {
                port: self.base_port + arrival.flowlet as u16,
                packets_received,
                bytes_received,
                burst_errors: admission.flow_burst_count,
                burst_length: admission.flow_burst_len,
                timestamp_ns: unix_now_ns(),
            }));
        }
        // single-packet stream gaps are noise
        if admission.stream_burst_len > 1 {
            let _ = self.rows.send(StatsRow::StreamBurst(StreamBurstRow {
                burst_length: admission.stream_burst_len,
                timestamp_ns: unix_now_ns(),
            }));
        }
    }

    fn report_drops(&mut self) {
        let mut packets_total = 0u64;
        let mut bytes_total = 0u64;
        for metrics in &self.metrics {
            let (packets, bytes, _) = metrics.snapshot();
            packets_total += packets;
            bytes_total += bytes;
        }

        let now = Instant::now();
        let mut media_rate = 0.0f32;
        if self.last_report_bytes != 0 {
            let diff_bits = 8.0 * (bytes_total - self.last_report_bytes) as f32;
            let diff_ns = now.duration_since(self.last_report_time).as_nanos() as f32;
            media_rate = diff_bits / diff_ns;
        }
        self.last_report_time = now;
        self.last_report_bytes = bytes_total;

        info!(
            "total packets received: {} dropped: {}, duplicates: {}, stream extent: {}, media rate: {} gbits",
            packets_total,
            self.buffer.drops(),
            self.buffer.duplicates(),
            self.buffer.stream_extent(),
            media_rate
        );
        let _ = self.rows.send(StatsRow::Drops(DropsRow {
            packets_dropped: self.buffer.drops(),
            packets_total,
            duplicates: self.buffer.duplicates(),
            media_rate,
            timestamp_ns: unix_now_ns(),
        }));
        self.buffer.report_bursts();
    }

    fn report_flows(&mut self) {
        for flowlet in 0..self.metrics.len() {
            let interval = self.buffer.flow_interval(flowlet);
            if interval.last_known_sn == 0 {
                continue;
            }
            let _ = self.rows.send(StatsRow::Flow(FlowRow {
                port: self.base_port + flowlet as u16,
                burst_count: interval.burst_count,
                reverses: interval.reverses,
                duplicates: interval.duplicates,
                longest_burst: interval.longest_burst,
                seq_breaks: interval.seq_breaks,
                timestamp_ns: unix_now_ns(),
            }));
        }
    }
}

fn unix_now_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before unix epoch").as_nanos() as i64
}
