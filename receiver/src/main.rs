mod analyze;
mod ingest;

use analyze::Analyzer;
use anyhow::Context;
use clap::Parser;
use flowgauge_analytics::{FlowletMetrics, ReorderBuffer};
use flowgauge_recorder::{StatsRecorder, StatsWriter};
use ingest::pump_socket;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::signal;
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(name = "flowgauge-receiver")]
#[command(about = "Measure packet-level transport quality of UDP video flows.")]
struct Args {
    /// Listen base port; flowlet i binds base + i.
    #[arg(long, default_value_t = 5678)]
    port: u16,

    /// Number of parallel flowlets.
    #[arg(long, default_value_t = 1)]
    flowlets: usize,

    /// Statistics database path. Replaced on every run.
    #[arg(long, default_value = "/tmp/flowgauge.db")]
    db: PathBuf,

    /// Reorder window size in packets.
    #[arg(long, default_value_t = 1024)]
    capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).format_timestamp_millis().init();
    let args = Args::parse();

    let recorder = StatsRecorder::create(&args.db)
        .with_context(|| format!("creating statistics database at {}", args.db.display()))?;
    let (rows, writer) = StatsWriter::spawn(recorder);

    let (shutdown, _) = watch::channel(false);
    let (packets_tx, packets_rx) = mpsc::channel(1024);

    let mut metrics = Vec::with_capacity(args.flowlets);
    for i in 0..args.flowlets {
        let port = args.port + i as u16;
        let socket = UdpSocket::bind(("0.0.0.0", port)).await.with_context(|| format!("binding udp port {port}"))?;
        let flowlet_metrics = Arc::new(FlowletMetrics::new());
        metrics.push(flowlet_metrics.clone());
        tokio::spawn(pump_socket(socket, i, flowlet_metrics, packets_tx.clone(), shutdown.subscribe()));
    }
    // the pumps hold the only remaining senders once this clone is gone
    drop(packets_tx);
    info!("listening on {} flowlet(s) starting at port {}", args.flowlets, args.port);

    let analyzer = Analyzer::new(ReorderBuffer::new(args.capacity), args.port, metrics, rows);
    let analyzer = tokio::spawn(analyzer.run(packets_rx, shutdown.subscribe()));

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let _ = shutdown.send(true);

    analyzer.await.context("analytics task")?;
    writer.await.context("statistics writer")?;
    Ok(())
}
