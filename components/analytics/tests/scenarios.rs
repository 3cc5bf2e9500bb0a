use flowgauge_analytics::{ErrorInterval, ReorderBuffer};
use rand::seq::SliceRandom;
use rand::Rng;

/// Admits a monotonic run where stream and flow sequence numbers coincide,
/// asserting that nothing looks like loss along the way.
fn admit_clean_run(buffer: &mut ReorderBuffer, start: u64, count: u64) {
    for sn in start..start + count {
        let admission = buffer.add(sn, sn, 0);
        assert_eq!(admission.stream_burst_len, 0, "sn {sn}");
        assert_eq!(admission.flow_burst_len, 0, "sn {sn}");
        assert_eq!(admission.flow_burst_count, 0, "sn {sn}");
    }
}

#[test]
fn monotonic_run_is_clean() {
    let mut buffer = ReorderBuffer::new(64);
    admit_clean_run(&mut buffer, 1, 800);
    assert_eq!(buffer.drops(), 0);
    assert_eq!(buffer.duplicates(), 0);
    assert_eq!(buffer.flow_interval(0).seq_breaks, 0);
    assert_eq!(buffer.stream_extent(), 800);

    // starting far from zero changes nothing
    let mut buffer = ReorderBuffer::new(64);
    admit_clean_run(&mut buffer, 999, 8000);
    assert_eq!(buffer.drops(), 0);
}

#[test]
fn every_other_packet_lost() {
    let mut buffer = ReorderBuffer::new(512);
    let mut sn = 100u64;
    for _ in 0..8000 {
        let admission = buffer.add(sn, sn, 0);
        assert_eq!(admission, Default::default(), "sn {sn}");
        sn += 2;
    }
    // flush what is still sitting in the window
    for _ in 0..800 {
        buffer.add(sn, sn, 0);
        sn += 1;
    }
    assert_eq!(buffer.drops(), 8000);
    assert_eq!(buffer.flow_interval(0).seq_breaks, buffer.drops());
}

fn spike_at_capacity(capacity: usize) {
    let mut buffer = ReorderBuffer::new(capacity);
    let mut sn = 12345u64;
    let mut flow_sn = 1u64;
    for _ in 0..1024 {
        let admission = buffer.add(sn, flow_sn, 0);
        assert_eq!(admission.stream_burst_len, 0, "sn {sn}");
        assert_eq!(buffer.drops(), 0, "sn {sn}");
        sn += 1;
        flow_sn += 1;
    }

    // one packet arriving 2000 sequence numbers past the window
    let gap = 2000u64;
    sn += gap;
    flow_sn += gap;
    let admission = buffer.add(sn, flow_sn, 0);
    assert_eq!(admission.stream_burst_len, gap, "capacity {capacity}");
    assert_eq!(buffer.drops(), gap, "capacity {capacity}");

    // and the buffer keeps running cleanly around the new anchor
    sn += 1;
    for _ in 0..1024 {
        let admission = buffer.add(sn, flow_sn, 0);
        assert_eq!(admission.stream_burst_len, 0, "sn {sn}");
        assert_eq!(buffer.drops(), gap, "sn {sn}");
        sn += 1;
        flow_sn += 1;
    }
}

#[test]
fn far_ahead_spike() {
    spike_at_capacity(1024);
    spike_at_capacity(512);
    spike_at_capacity(333);
    spike_at_capacity(64);
    spike_at_capacity(8);
}

#[test]
fn shuffle_within_window() {
    let mut buffer = ReorderBuffer::new(1024);
    let mut sns: Vec<u64> = (1..=200).collect();
    sns.shuffle(&mut rand::thread_rng());

    let mut prev_sn = 0u64;
    let mut out_of_order = 0u64;
    for &sn in &sns {
        if sn < prev_sn {
            out_of_order += 1;
        }
        prev_sn = sn;
        let admission = buffer.add(sn, sn, 0);
        assert_eq!(admission.stream_burst_len, 0, "sn {sn}");
    }
    assert_eq!(buffer.flow_interval(0).reverses, out_of_order);
    assert_eq!(buffer.drops(), 0);

    // the stream continuing in order stays clean
    for sn in 200..2000u64 {
        let admission = buffer.add(sn, sn, 0);
        assert_eq!(admission.stream_burst_len, 0, "sn {sn}");
    }
    assert_eq!(buffer.drops(), 0);
}

#[test]
fn one_flowlet_loses_a_contiguous_run() {
    let mut buffer = ReorderBuffer::default();
    let mut sn = 1u64;
    let mut flow_sn = 1u64;

    for _ in 0..8000 {
        for flowlet in 0..4usize {
            let admission = buffer.add(sn, flow_sn, flowlet);
            assert_eq!(admission, Default::default(), "sn {sn} flowlet {flowlet}");
            sn += 1;
        }
        flow_sn += 1;
    }
    assert_eq!(buffer.drops(), 0);

    // flowlet 0 goes dark for rounds 101..=200
    for round in 0..800 {
        for flowlet in 0..4usize {
            if flowlet == 0 && round > 100 && round <= 200 {
                sn += 1;
                continue;
            }
            let admission = buffer.add(sn, flow_sn, flowlet);
            sn += 1;
            if admission == Default::default() {
                continue;
            }
            // the only signal allowed is flowlet 0 closing its 100-packet gap
            assert_eq!(flowlet, 0, "round {round}");
            assert_eq!(admission.flow_burst_len, 100);
            assert_eq!(admission.flow_burst_count, 1);
            assert_eq!(admission.stream_burst_len, 0);
        }
        flow_sn += 1;
    }
    assert_eq!(buffer.drops(), 100);
    let interval = buffer.flow_interval(0);
    assert_eq!(interval.burst_count, 1);
    assert_eq!(interval.longest_burst, 100);
    for flowlet in 1..4usize {
        let interval = buffer.flow_interval(flowlet);
        assert_eq!(interval.burst_count, 0, "flowlet {flowlet}");
        assert_eq!(interval.seq_breaks, 0, "flowlet {flowlet}");
    }
    // untouched flowlets read as zeroed
    assert_eq!(buffer.flow_interval(9), ErrorInterval::default());
}

/// Random loss at a known rate: the drop counter must land exactly on the
/// number of packets withheld once the window has been flushed. Sample
/// count scales inversely with the rate so the rare cases still see a few
/// thousand losses.
fn calibrated_loss(percent: f64) {
    let mut rng = rand::thread_rng();
    let total = (3_000_000.0 / percent) as u64;
    let mut buffer = ReorderBuffer::new(1024);
    let mut withheld = 0u64;

    let mut sn = 10u64;
    buffer.add(sn, sn, 0);
    sn += 1;
    for _ in 0..total {
        if rng.gen_bool(percent / 100.0) {
            withheld += 1;
        } else {
            buffer.add(sn, sn, 0);
        }
        sn += 1;
    }
    for _ in 0..1024 {
        buffer.add(sn, sn, 0);
        sn += 1;
    }

    assert_eq!(buffer.drops(), withheld, "loss rate {percent}%");
    assert_eq!(buffer.flow_interval(0).seq_breaks, withheld, "loss rate {percent}%");
    assert_eq!(buffer.duplicates(), 0, "loss rate {percent}%");
}

#[test]
fn calibrated_heavy_loss() {
    calibrated_loss(45.0);
    calibrated_loss(10.0);
}

#[test]
fn calibrated_light_loss() {
    calibrated_loss(1.0);
    calibrated_loss(0.125);
}

/// Accounting identity over a mixed workload: every sequence number in the
/// observed span is either still pending in the window, was admitted and
/// spilled as good, or was charged as a drop.
#[test]
fn span_accounting_under_mixed_loss() {
    let mut rng = rand::thread_rng();
    let capacity = 1024u64;
    let mut buffer = ReorderBuffer::new(capacity as usize);

    let mut sn = 1u64;
    let mut admitted = 0u64;
    for _ in 0..200_000 {
        if rng.gen_bool(0.2) {
            // skip ahead between 1 and 5 numbers
            sn += rng.gen_range(1..=5);
        }
        buffer.add(sn, sn, 0);
        admitted += 1;
        sn += 1;
    }
    // flush: everything before the final window is now accounted for
    for _ in 0..capacity {
        buffer.add(sn, sn, 0);
        admitted += 1;
        sn += 1;
    }

    let span = buffer.stream_extent();
    assert_eq!(buffer.drops() + admitted, span);
    assert_eq!(buffer.duplicates(), 0);
}
