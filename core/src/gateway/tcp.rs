use crate::config::ListenerConfig;
use crate::dispatch::Dispatcher;
use crate::gateway::session::SessionRegistry;
use crate::pipeline::Pipeline;
use crate::protocols::{buffer_within_cap, Codec};
use bytes::{Bytes, BytesMut};
use std::net::IpAddr;
use std::sync::Arc;
use telemetry_types::{AckStatus, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub async fn run(
    bind_address: IpAddr,
    listener: ListenerConfig,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
    buffer_cap: usize,
) {
    let addr = std::net::SocketAddr::new(bind_address, listener.port);
    let tcp = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            super::log_bind_failure(listener, e);
            return;
        }
    };
    info!("gateway: {} listening on tcp {addr}", listener.protocol);

    loop {
        match tcp.accept().await {
            Ok((stream, peer)) => {
                debug!("gateway: {} connection from {peer}", listener.protocol);
                let pipeline = pipeline.clone();
                let dispatcher = dispatcher.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    handle_connection(stream, listener, pipeline, dispatcher, registry, buffer_cap).await;
                });
            }
            Err(e) => {
                // A single failed accept (e.g. too many open files) must not
                // take the listener down for every other device on this port.
                warn!("gateway: {} accept error: {e}", listener.protocol);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    listener: ListenerConfig,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
    buffer_cap: usize,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut codec = Codec::new(listener.protocol);
    let mut buf = BytesMut::with_capacity(4096);
    let mut read_buf = [0u8; 4096];
    let mut device_identifier: Option<String> = None;
    let mut outbound_rx: Option<tokio::sync::mpsc::Receiver<Bytes>> = None;
    let mut outbound_tx_for_cleanup: Option<tokio::sync::mpsc::Sender<Bytes>> = None;

    loop {
        // Drain any queued outbound bytes (command dispatch, pending acks)
        // before blocking on the next read so a live session never starves.
        if let Some(rx) = outbound_rx.as_mut() {
            while let Ok(bytes) = rx.try_recv() {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        }

        let n = match read_half.read(&mut read_buf).await {
            Ok(0) => break, // peer closed
            Ok(n) => n,
            Err(e) => {
                debug!("gateway: {} connection read error: {e}", listener.protocol);
                break;
            }
        };
        buf.extend_from_slice(&read_buf[..n]);

        loop {
            let decoded = match codec.decode(&mut buf) {
                Ok(d) => d,
                Err(e) => {
                    warn!("gateway: {} decode error, dropping connection: {e}", listener.protocol);
                    return;
                }
            };
            if decoded.frames.is_empty() {
                break;
            }

            for frame in &decoded.frames {
                match frame {
                    Frame::Login { identifier } => {
                        if let Err(e) = pipeline.authorize_login(identifier, listener.protocol).await {
                            warn!("gateway: {} login rejected for {identifier}: {e}", listener.protocol);
                            if let Some(reject) = codec.login_rejection_ack() {
                                let _ = write_half.write_all(&reject).await;
                            }
                            return;
                        }
                        device_identifier = Some(identifier.clone());
                        let rx = registry.register(identifier.clone(), listener.protocol).await;
                        if let Some(session) = registry.get(identifier).await {
                            outbound_tx_for_cleanup = Some(session.sender());
                        }
                        outbound_rx = Some(rx);
                        dispatcher.on_session_live(identifier).await;
                    }
                    Frame::Position(position) => {
                        if let Err(e) = pipeline.ingest(position.clone()).await {
                            debug!("gateway: {} position rejected: {e}", listener.protocol);
                        }
                    }
                    Frame::CommandAck { command_key, status, response } => {
                        if let Some(id) = &device_identifier {
                            dispatcher
                                .handle_ack(id, command_key.clone(), *status == AckStatus::Ok, response.clone())
                                .await;
                        }
                    }
                    Frame::Heartbeat => {}
                    Frame::Error { reason } => {
                        debug!("gateway: {} frame error: {reason}", listener.protocol);
                    }
                }
            }

            if let Some(ack) = codec.encode_ack(&decoded.frames) {
                if write_half.write_all(&ack).await.is_err() {
                    return;
                }
            }
        }

        if let Err(e) = buffer_within_cap(&buf, buffer_cap) {
            warn!("gateway: {} connection exceeded buffer cap, closing: {e}", listener.protocol);
            break;
        }
    }

    if let (Some(id), Some(tx)) = (&device_identifier, &outbound_tx_for_cleanup) {
        registry.remove_if_current(id, tx).await;
    }
}
