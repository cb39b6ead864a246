use crate::config::GatewayConfig;
use crate::network::connection::Connection;
use fixmesh_common::transport::Media;
use fixmesh_common::types::fix::ConnectionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Accepts FIX TCP connections and spawns one [`Connection`] task per
/// socket. Connection ids are transport-local and never reused.
pub struct FixListener {
    config: GatewayConfig,
    media: Arc<Media>,
    inbound_stream_id: i32,
    outbound_stream_id: i32,
    next_connection_id: AtomicU64,
}

impl FixListener {
    pub fn new(
        config: GatewayConfig,
        media: Arc<Media>,
        inbound_stream_id: i32,
        outbound_stream_id: i32,
    ) -> Self {
        Self {
            config,
            media,
            inbound_stream_id,
            outbound_stream_id,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "Listening for FIX connections");

        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let connection_id =
                        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
                    info!(connection_id = %connection_id, remote = %remote_addr, "New connection");

                    let connection = Connection::new(
                        connection_id,
                        stream,
                        self.config.max_message_size,
                        Arc::new(self.media.add_publication(self.inbound_stream_id)),
                        self.media.add_subscription(self.outbound_stream_id),
                    );
                    tokio::spawn(connection.run());
                }
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
}
