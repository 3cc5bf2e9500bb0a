use anyhow::{bail, Context};
use clap::Parser;
use flowgauge_analytics::{PacketHeader, HEADER_LEN};
use log::{error, info};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "flowgauge-generator")]
#[command(about = "Stripe an uncompressed-video-shaped UDP stream across flowlets.")]
struct Args {
    /// Destination address:port; flowlet i targets port + i.
    #[arg(long, default_value = "127.0.0.1:5678")]
    dst: String,

    /// Number of flowlets to stripe across.
    #[arg(long, default_value_t = 1)]
    flowlets: usize,

    /// Payload length in bytes (suggest 1400 on cloud paths).
    #[arg(long, default_value_t = 8100)]
    plen: usize,

    /// Video format: 422, 444 or 4444.
    #[arg(long, default_value = "422")]
    fmt: String,

    /// Bytes per frame (overrides --fmt).
    #[arg(long)]
    bpf: Option<u64>,

    /// Frame rate in Hz.
    #[arg(long, default_value_t = 60.0)]
    rate: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).format_timestamp_millis().init();
    let args = Args::parse();

    let (host, base_port) = split_destination(&args.dst)?;
    if args.plen < HEADER_LEN {
        bail!("payload length {} is below the {HEADER_LEN} byte header", args.plen);
    }

    let mut bytes_per_frame: u64 = match args.fmt.as_str() {
        "422" => 5_184_000,
        "444" => 12_441_600,
        "4444" => 16_588_800,
        other => bail!("unknown video format {other} (expected 422, 444 or 4444)"),
    };
    if let Some(bpf) = args.bpf {
        info!("using bpf setting of {bpf} bytes per frame");
        bytes_per_frame = bpf;
    }
    let packets_per_frame = bytes_per_frame / args.plen as u64;
    if packets_per_frame == 0 {
        bail!("payload length {} exceeds the {bytes_per_frame} byte frame", args.plen);
    }
    let packet_interval = Duration::from_nanos((1_000_000_000.0 / (args.rate * packets_per_frame as f64)) as u64);

    let mut sockets = Vec::with_capacity(args.flowlets);
    for i in 0..args.flowlets {
        let port = base_port + i as u16;
        let socket = UdpSocket::bind("0.0.0.0:0").context("binding send socket")?;
        socket.set_ttl(123).context("setting socket ttl")?;
        socket.connect((host.as_str(), port)).with_context(|| format!("connecting to {host}:{port}"))?;
        sockets.push(socket);
    }

    let bytes_sent = Arc::new(AtomicU64::new(0));
    spawn_rate_reporter(bytes_sent.clone());

    info!("sending {packets_per_frame} {} byte packets per frame to {}", args.plen, args.dst);
    let mut payload = vec![0u8; args.plen];
    let mut stream_sn = 1u64;
    let mut flow_sn = 1u64;
    let mut idx = 0usize;
    loop {
        let sent_at = Instant::now();
        let header = PacketHeader { stream_sn, flow_sn, sent_at_ns: unix_now_ns() };
        header.write(&mut payload);
        match sockets[idx].send(&payload) {
            Ok(len) => {
                bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
            }
            Err(err) => error!("error writing to socket {idx}: {err}"),
        }
        stream_sn += 1;
        idx += 1;
        if idx == sockets.len() {
            idx = 0;
            flow_sn += 1;
        }
        // sleep cannot pace a per-packet interval this small
        while sent_at.elapsed() < packet_interval {}
    }
}

fn split_destination(dst: &str) -> anyhow::Result<(String, u16)> {
    match dst.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => {
            let port = port.parse().with_context(|| format!("invalid destination port {port}"))?;
            Ok((host.to_string(), port))
        }
        _ => {
            info!("no port provided -- using 5678");
            Ok((dst.trim_end_matches(':').to_string(), 5678))
        }
    }
}

fn spawn_rate_reporter(bytes_sent: Arc<AtomicU64>) {
    thread::spawn(move || {
        let mut last_report_bytes = 0u64;
        let mut last_report_time = Instant::now();
        loop {
            thread::sleep(Duration::from_secs(10));
            let now = Instant::now();
            let bytes = bytes_sent.load(Ordering::Relaxed);
            if last_report_bytes != 0 {
                let diff_bits = 8.0 * (bytes - last_report_bytes) as f32;
                let diff_ns = now.duration_since(last_report_time).as_nanos() as f32;
                info!("transmit rate: {} gbits", diff_bits / diff_ns);
            }
            last_report_time = now;
            last_report_bytes = bytes;
        }
    });
}

fn unix_now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before unix epoch").as_nanos() as u64
}
