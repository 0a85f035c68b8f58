//! UDP listener for connectionless protocols (H02). Binds once, loops on
//! `recv_from` forever; a bad datagram is logged and skipped rather than
//! crashing the whole listener. Each datagram is handed to a small bounded
//! pool of worker tasks so one slow decode can't stall the socket's
//! receive loop.

use crate::config::ListenerConfig;
use crate::pipeline::Pipeline;
use crate::protocols::Codec;
use bytes::BytesMut;
use std::net::IpAddr;
use std::sync::Arc;
use telemetry_types::Frame;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const WORKER_COUNT: usize = 4;
const WORKER_QUEUE_DEPTH: usize = 256;

pub async fn run(bind_address: IpAddr, listener: ListenerConfig, pipeline: Arc<Pipeline>, buffer_cap: usize) {
    let addr = std::net::SocketAddr::new(bind_address, listener.port);
    let socket = match UdpSocket::bind(addr).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            super::log_bind_failure(listener, e);
            return;
        }
    };
    info!("gateway: {} listening on udp {addr}", listener.protocol);

    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for _ in 0..WORKER_COUNT {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WORKER_QUEUE_DEPTH);
        let pipeline = pipeline.clone();
        let protocol = listener.protocol;
        tokio::spawn(async move {
            while let Some(datagram) = rx.recv().await {
                process_datagram(datagram, protocol, &pipeline, buffer_cap).await;
            }
        });
        workers.push(tx);
    }

    let mut buf = vec![0u8; 4096];
    let mut next_worker = 0usize;
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _src)) => {
                let worker = &workers[next_worker % workers.len()];
                next_worker = next_worker.wrapping_add(1);
                if worker.try_send(buf[..len].to_vec()).is_err() {
                    warn!("gateway: {} udp worker pool saturated, dropping a datagram", listener.protocol);
                }
            }
            Err(e) => {
                warn!("gateway: {} udp recv error: {e}", listener.protocol);
            }
        }
    }
}

async fn process_datagram(datagram: Vec<u8>, protocol: telemetry_types::ProtocolKind, pipeline: &Arc<Pipeline>, buffer_cap: usize) {
    let mut codec = Codec::new(protocol);
    let mut buf = BytesMut::from(&datagram[..]);
    let decoded = match codec.decode(&mut buf) {
        Ok(d) => d,
        Err(e) => {
            debug!("gateway: {protocol} udp decode error: {e}");
            return;
        }
    };
    if buf.len() > buffer_cap {
        warn!("gateway: {protocol} udp datagram exceeded buffer cap, discarding remainder");
    }
    for frame in decoded.frames {
        if let Frame::Position(position) = frame {
            if let Err(e) = pipeline.ingest(position).await {
                debug!("gateway: {protocol} udp position rejected: {e}");
            }
        }
    }
}
