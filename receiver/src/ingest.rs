use flowgauge_analytics::{DropReason, FlowletMetrics, PacketHeader};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

/// Largest datagram we accept; anything beyond the header is opaque filler.
const RECV_BUF_LEN: usize = 1 << 14;

/// One validated arrival, handed from a socket pump to the analytics task.
#[derive(Debug, Clone, Copy)]
pub struct Arrival {
    pub flowlet: usize,
    pub header: PacketHeader,
}

/// Receive loop for one flowlet socket. Validates the header, bumps the
/// flowlet counters, and forwards the arrival. Malformed datagrams are
/// logged and dropped here; they never reach the reorder buffer.
pub async fn pump_socket(
    socket: UdpSocket,
    flowlet: usize,
    metrics: Arc<FlowletMetrics>,
    arrivals: mpsc::Sender<Arrival>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => {
                let len = match result {
                    Ok((len, _peer)) => len,
                    Err(err) => {
                        warn!("flowlet {flowlet}: receive error: {err}");
                        break;
                    }
                };
                let header = match PacketHeader::parse(&buf[..len]) {
                    Ok(header) => header,
                    Err(err) => {
                        metrics.record_malformed();
                        match err.reason {
                            DropReason::BadMarker => {
                                error!("flowlet {flowlet}: unexpected sentinel value {:#x}", err.marker.unwrap_or(0));
                            }
                            DropReason::Truncated => {
                                error!("flowlet {flowlet}: short packet of {len} bytes");
                            }
                        }
                        continue;
                    }
                };
                metrics.record_packet(len);
                if arrivals.send(Arrival { flowlet, header }).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("flowlet {flowlet}: listener stopped");
}
