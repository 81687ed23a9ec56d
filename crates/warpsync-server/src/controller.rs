//! Controller arbitration - who may drive warp in the master modes
//!
//! MCW_FORCE grants control to the first requester. MCW_VOTE opens an
//! election first; the candidate's follow-up request is its win claim and
//! is honoured only when the relayed yes votes reach the win quorum.
//! Grants and elections carry an expiry and lapse silently.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use warpsync_core::{ClockTicks, ConnectionId, Quorum, WarpMode};

/// A live controller grant
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerGrant {
    pub conn: ConnectionId,
    pub name: String,
    pub expiry: ClockTicks,
}

/// An open election
#[derive(Clone, Debug)]
struct Election {
    candidate: ConnectionId,
    name: String,
    expiry: ClockTicks,
    voters: usize,
    yes: HashSet<String>,
    no: HashSet<String>,
}

/// What the protocol layer should send after an arbiter decision
#[derive(Clone, Debug, PartialEq)]
pub enum ArbiterAction {
    /// Nothing to send
    Ignore,
    /// Announce a new controller to everyone
    Grant(ControllerGrant),
    /// Tell only the requester who holds control
    Resend(ControllerGrant),
    /// Ask everyone to vote on a candidate
    OpenElection {
        candidate: String,
        expiry: ClockTicks,
    },
    /// Pass a vote on to the candidate
    ForwardVote {
        candidate: ConnectionId,
        voter: String,
        vote: bool,
    },
    /// Relay a release to everyone but the releaser
    Release { from: ConnectionId },
}

#[derive(Debug, Default)]
struct ArbiterState {
    controller: Option<ControllerGrant>,
    election: Option<Election>,
}

/// Server-side controller and election state
pub struct ControllerArbiter {
    mode: WarpMode,
    lease: Duration,
    vote_window: Duration,
    state: Mutex<ArbiterState>,
}

impl ControllerArbiter {
    pub fn new(mode: WarpMode, lease: Duration, vote_window: Duration) -> Self {
        ControllerArbiter {
            mode,
            lease,
            vote_window,
            state: Mutex::new(ArbiterState::default()),
        }
    }

    /// Drop grants and elections past their expiry
    pub fn expire(&self, now: ClockTicks) {
        let mut state = self.state.lock();
        if state.controller.as_ref().is_some_and(|c| now >= c.expiry) {
            if let Some(c) = state.controller.take() {
                info!(controller = %c.name, "controller lease lapsed");
            }
        }
        if state.election.as_ref().is_some_and(|e| now >= e.expiry) {
            if let Some(e) = state.election.take() {
                info!(candidate = %e.name, "election lapsed");
            }
        }
    }

    pub fn current_grant(&self, now: ClockTicks) -> Option<ControllerGrant> {
        self.state
            .lock()
            .controller
            .clone()
            .filter(|c| now < c.expiry)
    }

    pub fn candidate(&self) -> Option<ConnectionId> {
        self.state.lock().election.as_ref().map(|e| e.candidate)
    }

    fn grant(&self, state: &mut ArbiterState, conn: ConnectionId, name: &str, now: ClockTicks) -> ArbiterAction {
        let grant = ControllerGrant {
            conn,
            name: name.to_string(),
            expiry: now + self.lease,
        };
        info!(
            controller = %grant.name,
            lease = %humantime::format_duration(self.lease),
            "granted warp control"
        );
        state.election = None;
        state.controller = Some(grant.clone());
        ArbiterAction::Grant(grant)
    }

    /// A client asks for control. `voters` is the number of other
    /// authenticated clients.
    pub fn request_control(
        &self,
        conn: ConnectionId,
        name: &str,
        voters: usize,
        now: ClockTicks,
    ) -> ArbiterAction {
        if !self.mode.has_controller() {
            debug!(mode = %self.mode, "controller request ignored");
            return ArbiterAction::Ignore;
        }
        let mut state = self.state.lock();
        if let Some(current) = &state.controller {
            return ArbiterAction::Resend(current.clone());
        }

        match self.mode {
            WarpMode::McwForce => self.grant(&mut state, conn, name, now),
            WarpMode::McwVote => {
                let open = state
                    .election
                    .as_ref()
                    .map(|e| (e.candidate, Quorum::for_voters(e.voters), e.yes.len()));
                match open {
                    None if voters == 0 => self.grant(&mut state, conn, name, now),
                    None => {
                        let expiry = now + self.vote_window;
                        state.election = Some(Election {
                            candidate: conn,
                            name: name.to_string(),
                            expiry,
                            voters,
                            yes: HashSet::new(),
                            no: HashSet::new(),
                        });
                        info!(candidate = %name, voters, "opened warp election");
                        ArbiterAction::OpenElection {
                            candidate: name.to_string(),
                            expiry,
                        }
                    }
                    Some((candidate, quorum, yes)) if candidate == conn => {
                        if quorum.is_won(yes) {
                            self.grant(&mut state, conn, name, now)
                        } else {
                            debug!(candidate = %name, yes, needed = quorum.to_win, "premature win claim ignored");
                            ArbiterAction::Ignore
                        }
                    }
                    Some(_) => ArbiterAction::Ignore,
                }
            }
            _ => ArbiterAction::Ignore,
        }
    }

    /// A vote from `conn`; one vote per voter per election
    pub fn reply_vote(&self, conn: ConnectionId, voter: &str, vote: bool) -> ArbiterAction {
        let mut state = self.state.lock();
        let Some(election) = state.election.as_mut() else {
            debug!(voter = %voter, "vote without an open election ignored");
            return ArbiterAction::Ignore;
        };
        if election.candidate == conn {
            return ArbiterAction::Ignore;
        }
        if election.yes.contains(voter) || election.no.contains(voter) {
            debug!(voter = %voter, "repeat vote ignored");
            return ArbiterAction::Ignore;
        }
        if vote {
            election.yes.insert(voter.to_string());
        } else {
            election.no.insert(voter.to_string());
        }
        ArbiterAction::ForwardVote {
            candidate: election.candidate,
            voter: voter.to_string(),
            vote,
        }
    }

    /// The controller or candidate gives up control
    pub fn release(&self, conn: ConnectionId) -> ArbiterAction {
        let mut state = self.state.lock();
        let mut released = false;
        if state.controller.as_ref().is_some_and(|c| c.conn == conn) {
            state.controller = None;
            released = true;
        }
        if state.election.as_ref().is_some_and(|e| e.candidate == conn) {
            state.election = None;
            released = true;
        }
        if released {
            info!(conn = %conn, "warp control released");
            ArbiterAction::Release { from: conn }
        } else {
            ArbiterAction::Ignore
        }
    }

    /// Forget a departed connection; same effect as a release
    pub fn disconnect(&self, conn: ConnectionId) -> ArbiterAction {
        self.release(conn)
    }
}
