//! Connection hub - outbound channels for every authenticated connection
//!
//! Messages are encoded once and handed to each connection's channel.
//! A failed send is logged and skipped; it never stops delivery to the
//! remaining connections.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use warpsync_core::{ConnectionId, WarpError, WarpResult};
use warpsync_wire::WarpEvent;

/// Outbound byte channel of one connection
pub type OutboundSender = mpsc::UnboundedSender<Bytes>;

/// Outbound byte channel, receiving end (owned by the transport)
pub type OutboundReceiver = mpsc::UnboundedReceiver<Bytes>;

struct Peer {
    player_name: String,
    tx: OutboundSender,
}

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionHub {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: ConnectionId, player_name: &str, tx: OutboundSender) {
        self.peers.write().insert(
            conn,
            Peer {
                player_name: player_name.to_string(),
                tx,
            },
        );
    }

    /// Returns the player name of the removed connection
    pub fn unregister(&self, conn: ConnectionId) -> Option<String> {
        self.peers.write().remove(&conn).map(|p| p.player_name)
    }

    pub fn player_name(&self, conn: ConnectionId) -> Option<String> {
        self.peers.read().get(&conn).map(|p| p.player_name.clone())
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.peers.read().contains_key(&conn)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Send to one connection
    pub fn send(&self, conn: ConnectionId, event: &WarpEvent) -> WarpResult<()> {
        self.send_bytes(conn, event.encode())
    }

    pub fn send_bytes(&self, conn: ConnectionId, bytes: Bytes) -> WarpResult<()> {
        let tx = self
            .peers
            .read()
            .get(&conn)
            .map(|p| p.tx.clone())
            .ok_or(WarpError::UnknownConnection(conn))?;
        tx.send(bytes).map_err(|_| WarpError::ChannelClosed(conn))
    }

    /// Send to every connection except `except`; returns how many accepted it
    pub fn broadcast(&self, except: Option<ConnectionId>, event: &WarpEvent) -> usize {
        let bytes = event.encode();
        let targets: Vec<(ConnectionId, OutboundSender)> = self
            .peers
            .read()
            .iter()
            .filter(|(conn, _)| Some(**conn) != except)
            .map(|(conn, p)| (*conn, p.tx.clone()))
            .collect();

        let mut delivered = 0;
        for (conn, tx) in targets {
            match tx.send(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(conn = %conn, tag = ?event.tag(), "send failed, connection channel closed"),
            }
        }
        delivered
    }
}
