use crate::config::GatewayConfig;
use crate::network::wire;
use crate::session::parser::SessionParser;
use crate::session::proxy::EncodingSessionProxy;
use crate::session::registry::SessionRegistry;
use crate::session::state::{Session, SessionState};
use fixmesh_common::agent::Agent;
use fixmesh_common::clock::EpochClock;
use fixmesh_common::transport::{Publication, Subscription};
use fixmesh_common::types::fix::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct SessionEntry {
    session: Session<EncodingSessionProxy>,
    activated: bool,
}

/// The gateway's session work unit: drains inbound frames from the
/// transport, dispatches them through the parser into the per-connection
/// sessions, then drives every session's timers. One instance owns all
/// sessions; connection tasks only move bytes.
pub struct GatewayAgent {
    config: GatewayConfig,
    clock: Arc<dyn EpochClock>,
    parser: SessionParser,
    registry: Arc<SessionRegistry>,
    inbound: Subscription,
    outbound: Arc<Publication>,
    sessions: HashMap<ConnectionId, SessionEntry>,
}

impl GatewayAgent {
    pub fn new(
        config: GatewayConfig,
        clock: Arc<dyn EpochClock>,
        parser: SessionParser,
        registry: Arc<SessionRegistry>,
        inbound: Subscription,
        outbound: Arc<Publication>,
    ) -> Self {
        Self {
            config,
            clock,
            parser,
            registry,
            inbound,
            outbound,
            sessions: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn on_connect(&mut self, connection_id: ConnectionId) {
        let proxy = EncodingSessionProxy::new(
            connection_id,
            self.config.begin_string.as_bytes(),
            self.config.encoder_buffer_size,
            Arc::clone(&self.outbound),
            Arc::clone(&self.clock),
        );
        let session = Session::new(
            connection_id,
            &self.config,
            Arc::clone(&self.clock),
            proxy,
        );
        self.sessions.insert(
            connection_id,
            SessionEntry {
                session,
                activated: false,
            },
        );
        info!(connection_id = %connection_id, "Connection registered");
    }

    fn on_data(&mut self, connection_id: ConnectionId, payload: &[u8]) {
        let logon_key = self.parser.logon_key(payload);

        let Some(entry) = self.sessions.get_mut(&connection_id) else {
            warn!(connection_id = %connection_id, "Frame for unknown connection");
            return;
        };

        let session_id = if entry.activated {
            entry.session.id()
        } else if let Some(key) = logon_key {
            match self.registry.try_activate(&key, connection_id) {
                Ok(session_id) => session_id,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Refusing duplicate logon");
                    entry.session.request_disconnect();
                    return;
                }
            }
        } else {
            entry.session.id()
        };

        self.parser
            .on_message(&mut entry.session, payload, session_id);

        if entry.session.state() == SessionState::Active {
            entry.activated = true;
        }
    }

    fn on_peer_disconnect(&mut self, connection_id: ConnectionId) {
        if let Some(mut entry) = self.sessions.remove(&connection_id) {
            if let Some(key) = entry.session.session_key().cloned() {
                self.registry.deactivate(&key);
            }
            entry.session.request_disconnect();
            debug!(connection_id = %connection_id, "Peer disconnected");
        }
    }

    fn reap_disconnected(&mut self) {
        let dead: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.session.state() == SessionState::Disconnected)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in dead {
            if let Some(entry) = self.sessions.remove(&connection_id) {
                if let Some(key) = entry.session.session_key() {
                    self.registry.deactivate(key);
                }
            }
            debug!(connection_id = %connection_id, "Session dropped");
        }
    }
}

impl Agent for GatewayAgent {
    fn poll(&mut self, now_ms: u64) -> usize {
        // Drain a bounded batch of inbound frames
        let mut frames: Vec<(ConnectionId, u8, Vec<u8>)> = Vec::new();
        let mut collect = |buffer: &[u8], _session_id: i32, _position: u64| {
            if let Some((connection_id, kind, payload)) = wire::decode_frame(buffer) {
                frames.push((connection_id, kind, payload.to_vec()));
            }
        };
        let mut work = self.inbound.poll(&mut collect, self.config.fragment_limit);

        for (connection_id, kind, payload) in frames {
            match kind {
                wire::KIND_CONNECT => self.on_connect(connection_id),
                wire::KIND_DATA => self.on_data(connection_id, &payload),
                wire::KIND_DISCONNECT => self.on_peer_disconnect(connection_id),
                other => warn!(kind = other, "Unknown inbound frame kind"),
            }
        }

        for entry in self.sessions.values_mut() {
            work += entry.session.poll(now_ms);
        }
        self.reap_disconnected();

        work
    }

    fn name(&self) -> &str {
        "gateway-sessions"
    }

    fn on_close(&mut self) {
        for entry in self.sessions.values_mut() {
            if entry.session.state() == SessionState::Active {
                entry.session.start_logout();
            }
        }
    }
}
