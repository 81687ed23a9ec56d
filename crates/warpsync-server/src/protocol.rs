//! Warp-control message dispatch
//!
//! Decodes each inbound client message, updates the registry, tracker or
//! arbiter, and fans the resulting events out through the hub. Errors in
//! one message are logged and never end the connection.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warpsync_core::{ClockTicks, ConnectionId, SubspaceId, WarpError, WarpResult};
use warpsync_time::Clock;
use warpsync_wire::{WarpEvent, WarpRequest};

use crate::{
    ArbiterAction, ClientSubspaceTracker, ConnectionHub, ControllerArbiter, OutboundSender,
    ServerConfig, SubspaceRegistry, SubspaceStore,
};

/// Server-side warp control
pub struct WarpControl {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    registry: SubspaceRegistry,
    tracker: ClientSubspaceTracker,
    hub: ConnectionHub,
    arbiter: ControllerArbiter,
}

impl WarpControl {
    pub fn new(config: ServerConfig, store: Arc<dyn SubspaceStore>, clock: Arc<dyn Clock>) -> Self {
        let registry = SubspaceRegistry::open(store, clock.clone());
        let tracker = ClientSubspaceTracker::new(config.relock_threshold);
        let arbiter = ControllerArbiter::new(
            config.warp_mode,
            config.controller_lease,
            config.vote_window,
        );
        info!(
            mode = %config.warp_mode,
            subspaces = registry.len(),
            "warp control ready"
        );
        WarpControl {
            config,
            clock,
            registry,
            tracker,
            hub: ConnectionHub::new(),
            arbiter,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubspaceRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ClientSubspaceTracker {
        &self.tracker
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn arbiter(&self) -> &ControllerArbiter {
        &self.arbiter
    }

    fn now(&self) -> ClockTicks {
        self.clock.now()
    }

    /// Bring a freshly authenticated client up to date and place it in a
    /// subspace. Returns the subspace it was placed in.
    ///
    /// The client is registered and placed before any message goes out, so
    /// a failed send leaves a membership the disconnect path can clean up.
    pub fn on_client_authenticated(
        &self,
        conn: ConnectionId,
        player_name: &str,
        tx: OutboundSender,
    ) -> SubspaceId {
        self.hub.register(conn, player_name, tx);
        if !self.config.keep_ticking_while_offline && self.hub.len() == 1 {
            self.registry.resume_all();
        }

        let now = self.now();
        let others: Vec<_> = self
            .tracker
            .memberships()
            .into_iter()
            .filter(|(other, _)| *other != conn)
            .collect();
        let target = self.placement_for(player_name, now);
        self.tracker.join(conn, player_name, target);

        let mut handshake: Vec<WarpEvent> = self
            .registry
            .all()
            .into_iter()
            .map(|(subspace, epoch)| WarpEvent::NewSubspace { subspace, epoch })
            .collect();
        handshake.extend(others.iter().map(|(_, member)| WarpEvent::ChangeSubspace {
            from: member.player_name.clone(),
            subspace: member.subspace,
        }));
        handshake.extend(others.iter().map(|(_, member)| WarpEvent::ReportRate {
            peer: member.player_name.clone(),
            subspace: member.subspace,
            rate: member.last_reported_rate,
        }));
        self.arbiter.expire(now);
        if let Some(grant) = self.arbiter.current_grant(now) {
            handshake.push(WarpEvent::SetController {
                controller: grant.name,
                expiry: grant.expiry,
            });
        }
        handshake.push(WarpEvent::SetSubspace { subspace: target });

        for event in &handshake {
            if let Err(e) = self.hub.send(conn, event) {
                warn!(conn = %conn, player = %player_name, error = %e, "join handshake cut short");
                break;
            }
        }
        info!(conn = %conn, player = %player_name, subspace = %target, "client joined");
        target
    }

    fn placement_for(&self, player_name: &str, now: ClockTicks) -> SubspaceId {
        let latest = self.registry.latest(now);
        if self.config.send_player_to_latest_subspace {
            return latest;
        }
        match self.tracker.remembered_subspace(player_name) {
            Some(id) if self.registry.contains(id) => id,
            Some(id) => {
                warn!(player = %player_name, subspace = %id, "remembered subspace is gone, using latest");
                latest
            }
            None => latest,
        }
    }

    /// Forget a departed client
    pub fn on_client_disconnected(&self, conn: ConnectionId) {
        let name = self.hub.unregister(conn);
        self.tracker.leave(conn);
        if let ArbiterAction::Release { from } = self.arbiter.disconnect(conn) {
            self.hub.broadcast(Some(from), &WarpEvent::ReleaseController);
        }
        if self.hub.is_empty() && !self.config.keep_ticking_while_offline {
            let latest = self.registry.latest(self.now());
            self.registry.hold(latest);
        }
        info!(conn = %conn, player = ?name, "client left");
    }

    /// Handle one framed message from an authenticated client
    pub fn handle_message(&self, conn: ConnectionId, payload: &[u8]) -> WarpResult<()> {
        let request = match WarpRequest::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(conn = %conn, error = %e, "dropping undecodable warp message");
                return Err(e);
            }
        };
        let name = self
            .hub
            .player_name(conn)
            .ok_or(WarpError::UnknownConnection(conn))?;
        debug!(conn = %conn, player = %name, tag = ?request.tag(), "warp message");

        match request {
            WarpRequest::RequestController => {
                let now = self.now();
                self.arbiter.expire(now);
                let voters = self.hub.len().saturating_sub(1);
                let action = self.arbiter.request_control(conn, &name, voters, now);
                self.apply(conn, action)
            }
            WarpRequest::ReleaseController => {
                let action = self.arbiter.release(conn);
                self.apply(conn, action)
            }
            WarpRequest::ReplyVote { vote, .. } => {
                self.arbiter.expire(self.now());
                let action = self.arbiter.reply_vote(conn, &name, vote);
                self.apply(conn, action)
            }
            WarpRequest::ChangeWarp(rate) => {
                self.hub
                    .broadcast(Some(conn), &WarpEvent::ChangeWarp { from: name, rate });
                Ok(())
            }
            WarpRequest::NewSubspace {
                epoch_clock,
                epoch_time,
                rate,
            } => self.new_subspace(conn, epoch_clock, epoch_time, rate),
            WarpRequest::ChangeSubspace { subspace } => {
                if !self.registry.contains(subspace) {
                    warn!(conn = %conn, subspace = %subspace, "change to unknown subspace refused");
                    return Err(WarpError::UnknownSubspace(subspace));
                }
                self.tracker.set_subspace(conn, subspace)?;
                self.hub.broadcast(
                    Some(conn),
                    &WarpEvent::ChangeSubspace {
                        from: name,
                        subspace,
                    },
                );
                Ok(())
            }
            WarpRequest::ReportRate { rate } => {
                if let Some((subspace, epoch)) =
                    self.tracker.on_report_rate(conn, rate, &self.registry)?
                {
                    self.hub.broadcast(
                        None,
                        &WarpEvent::RelockSubspace {
                            origin: self.config.console_identifier.clone(),
                            subspace,
                            epoch,
                        },
                    );
                }
                Ok(())
            }
        }
    }

    fn new_subspace(
        &self,
        conn: ConnectionId,
        epoch_clock: ClockTicks,
        epoch_time: f64,
        rate: f32,
    ) -> WarpResult<()> {
        let subspace = self.registry.create(epoch_clock, epoch_time, rate);
        let epoch = self
            .registry
            .get(subspace)
            .ok_or(WarpError::UnknownSubspace(subspace))?;
        self.hub
            .broadcast(None, &WarpEvent::NewSubspace { subspace, epoch });

        if self.config.warp_mode.moves_everyone_to_new_subspace() {
            self.tracker.set_all_subspaces(subspace);
            self.hub.broadcast(None, &WarpEvent::SetSubspace { subspace });
        } else {
            self.tracker.set_subspace(conn, subspace)?;
            self.hub.send(conn, &WarpEvent::SetSubspace { subspace })?;
        }
        Ok(())
    }

    fn apply(&self, conn: ConnectionId, action: ArbiterAction) -> WarpResult<()> {
        match action {
            ArbiterAction::Ignore => {}
            ArbiterAction::Grant(grant) => {
                self.hub.broadcast(
                    None,
                    &WarpEvent::SetController {
                        controller: grant.name,
                        expiry: grant.expiry,
                    },
                );
            }
            ArbiterAction::Resend(grant) => {
                self.hub.send(
                    conn,
                    &WarpEvent::SetController {
                        controller: grant.name,
                        expiry: grant.expiry,
                    },
                )?;
            }
            ArbiterAction::OpenElection { candidate, expiry } => {
                self.hub
                    .broadcast(None, &WarpEvent::RequestVote { candidate, expiry });
            }
            ArbiterAction::ForwardVote {
                candidate,
                voter,
                vote,
            } => {
                self.hub
                    .send(candidate, &WarpEvent::ReplyVote { voter, vote })?;
            }
            ArbiterAction::Release { from } => {
                self.hub.broadcast(Some(from), &WarpEvent::ReleaseController);
            }
        }
        Ok(())
    }

    /// Drive one connection's inbound frames until the transport closes
    /// the channel, then clean up.
    pub async fn run_connection(
        self: Arc<Self>,
        conn: ConnectionId,
        mut inbound: mpsc::UnboundedReceiver<Bytes>,
    ) {
        while let Some(frame) = inbound.recv().await {
            if let Err(e) = self.handle_message(conn, &frame) {
                debug!(conn = %conn, error = %e, "warp message failed");
            }
        }
        self.on_client_disconnected(conn);
    }
}
