//! Per-connection subspace membership and rate consensus
//!
//! A subspace can only run as fast as its slowest occupant. Each report
//! recomputes the minimum over the reporter's subspace; drift beyond the
//! relock threshold re-rates that subspace alone.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use warpsync_core::{
    clamp_rate, ConnectionId, Subspace, SubspaceId, WarpError, WarpResult, MAX_SUBSPACE_RATE,
};

use crate::SubspaceRegistry;

/// One authenticated connection's place in time
#[derive(Clone, Debug, PartialEq)]
pub struct ClientMembership {
    pub player_name: String,
    pub subspace: SubspaceId,
    pub last_reported_rate: f32,
}

/// Membership table for all connected clients
#[derive(Debug)]
pub struct ClientSubspaceTracker {
    members: RwLock<HashMap<ConnectionId, ClientMembership>>,
    /// Subspace each player was in when they last disconnected
    remembered: Mutex<HashMap<String, SubspaceId>>,
    relock_threshold: f32,
}

impl ClientSubspaceTracker {
    pub fn new(relock_threshold: f32) -> Self {
        ClientSubspaceTracker {
            members: RwLock::new(HashMap::new()),
            remembered: Mutex::new(HashMap::new()),
            relock_threshold,
        }
    }

    /// Start tracking an authenticated connection
    pub fn join(&self, conn: ConnectionId, player_name: &str, subspace: SubspaceId) {
        self.members.write().insert(
            conn,
            ClientMembership {
                player_name: player_name.to_string(),
                subspace,
                last_reported_rate: MAX_SUBSPACE_RATE,
            },
        );
    }

    /// Stop tracking a connection, remembering where its player was
    pub fn leave(&self, conn: ConnectionId) -> Option<ClientMembership> {
        let membership = self.members.write().remove(&conn)?;
        self.remembered
            .lock()
            .insert(membership.player_name.clone(), membership.subspace);
        Some(membership)
    }

    pub fn remembered_subspace(&self, player_name: &str) -> Option<SubspaceId> {
        self.remembered.lock().get(player_name).copied()
    }

    pub fn membership(&self, conn: ConnectionId) -> Option<ClientMembership> {
        self.members.read().get(&conn).cloned()
    }

    pub fn memberships(&self) -> Vec<(ConnectionId, ClientMembership)> {
        let mut all: Vec<_> = self
            .members
            .read()
            .iter()
            .map(|(conn, m)| (*conn, m.clone()))
            .collect();
        all.sort_by_key(|(conn, _)| *conn);
        all
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Move one client to a subspace
    pub fn set_subspace(&self, conn: ConnectionId, subspace: SubspaceId) -> WarpResult<()> {
        let mut members = self.members.write();
        let member = members
            .get_mut(&conn)
            .ok_or(WarpError::UnknownConnection(conn))?;
        member.subspace = subspace;
        Ok(())
    }

    /// Move every client to a subspace
    pub fn set_all_subspaces(&self, subspace: SubspaceId) {
        for member in self.members.write().values_mut() {
            member.subspace = subspace;
        }
    }

    /// Slowest reported rate among the occupants of a subspace
    pub fn min_rate_in(&self, subspace: SubspaceId) -> Option<f32> {
        self.members
            .read()
            .values()
            .filter(|m| m.subspace == subspace)
            .map(|m| m.last_reported_rate)
            .reduce(f32::min)
    }

    /// Record a client's rate and relock its subspace if the occupants'
    /// minimum drifted past the threshold. Returns the relocked subspace.
    pub fn on_report_rate(
        &self,
        conn: ConnectionId,
        rate: f32,
        registry: &SubspaceRegistry,
    ) -> WarpResult<Option<(SubspaceId, Subspace)>> {
        let rate = clamp_rate(rate);
        let subspace = {
            let mut members = self.members.write();
            let member = members
                .get_mut(&conn)
                .ok_or(WarpError::UnknownConnection(conn))?;
            member.last_reported_rate = rate;
            member.subspace
        };

        let min_rate = self.min_rate_in(subspace).unwrap_or(rate);
        debug!(conn = %conn, subspace = %subspace, rate, min_rate, "rate reported");

        let relocked = registry.relock_if_drifted(subspace, min_rate, self.relock_threshold)?;
        Ok(relocked.map(|epoch| (subspace, epoch)))
    }
}
