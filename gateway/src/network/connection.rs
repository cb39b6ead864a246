use crate::codec::FixCodec;
use crate::network::wire;
use bytes::BytesMut;
use fixmesh_common::transport::{Publication, Subscription};
use fixmesh_common::types::fix::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// How often a connection task drains its outbound subscription.
const OUTBOUND_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Moves bytes between one TCP socket and the transport streams. All
/// protocol decisions live in the session agent; this task only frames
/// inbound bytes and writes outbound frames addressed to its connection.
pub struct Connection {
    connection_id: ConnectionId,
    stream: TcpStream,
    codec: FixCodec,
    inbound: Arc<Publication>,
    outbound: Subscription,
}

impl Connection {
    pub fn new(
        connection_id: ConnectionId,
        stream: TcpStream,
        max_message_size: usize,
        inbound: Arc<Publication>,
        outbound: Subscription,
    ) -> Self {
        Self {
            connection_id,
            stream,
            codec: FixCodec::new(max_message_size),
            inbound,
            outbound,
        }
    }

    pub async fn run(self) {
        let Connection {
            connection_id,
            stream,
            codec,
            inbound,
            mut outbound,
        } = self;

        if let Err(e) = inbound.offer(&wire::encode_frame(connection_id, wire::KIND_CONNECT, b""))
        {
            error!(connection_id = %connection_id, error = %e, "Failed to announce connection");
            return;
        }
        info!(connection_id = %connection_id, "Connection established");

        let (mut reader, mut writer) = stream.into_split();
        let mut read_buf = BytesMut::with_capacity(8 * 1024);
        let mut ticker = tokio::time::interval(OUTBOUND_POLL_INTERVAL);

        loop {
            tokio::select! {
                read = reader.read_buf(&mut read_buf) => {
                    match read {
                        Ok(0) => {
                            debug!(connection_id = %connection_id, "Socket closed by peer");
                            break;
                        }
                        Ok(_) => {
                            if !forward_frames(connection_id, &codec, &inbound, &mut read_buf) {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Socket read failed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match flush_outbound(connection_id, &mut outbound, &mut writer).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(connection_id = %connection_id, "Disconnect requested by session");
                            let _ = writer.shutdown().await;
                            break;
                        }
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Socket write failed");
                            break;
                        }
                    }
                }
            }
        }

        let _ = inbound.offer(&wire::encode_frame(
            connection_id,
            wire::KIND_DISCONNECT,
            b"",
        ));
        info!(connection_id = %connection_id, "Connection finished");
    }
}

/// Extracts complete FIX messages from the read buffer and publishes them
/// inbound. Returns false when the stream is unrecoverable.
fn forward_frames(
    connection_id: ConnectionId,
    codec: &FixCodec,
    inbound: &Publication,
    read_buf: &mut BytesMut,
) -> bool {
    loop {
        match codec.try_parse(read_buf) {
            Ok(Some(message)) => {
                let frame = wire::encode_frame(connection_id, wire::KIND_DATA, &message);
                if let Err(e) = inbound.offer(&frame) {
                    error!(connection_id = %connection_id, error = %e, "Inbound stream back-pressured");
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Dropping malformed inbound data");
                return false;
            }
        }
    }
}

/// Writes any outbound frames addressed to this connection. Returns
/// Ok(false) when the session requested a disconnect.
async fn flush_outbound(
    connection_id: ConnectionId,
    outbound: &mut Subscription,
    writer: &mut OwnedWriteHalf,
) -> std::io::Result<bool> {
    let mut pending: Vec<Vec<u8>> = Vec::new();
    let mut disconnect = false;
    let mut collect = |buffer: &[u8], _session: i32, _position: u64| {
        if let Some((target, kind, payload)) = wire::decode_frame(buffer) {
            if target != connection_id {
                return;
            }
            match kind {
                wire::KIND_DATA => pending.push(payload.to_vec()),
                wire::KIND_DISCONNECT => disconnect = true,
                _ => {}
            }
        }
    };
    while outbound.poll(&mut collect, 16) > 0 {}

    for message in pending {
        writer.write_all(&message).await?;
    }
    Ok(!disconnect)
}
