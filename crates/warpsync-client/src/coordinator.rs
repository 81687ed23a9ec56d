//! Client warp coordinator - the per-tick warp state machine
//!
//! One coordinator per session. Each `tick` runs these stages in order:
//! 1. drain queued server messages
//! 2. sample local progress for the skew rate and note the player's own
//!    warp choice
//! 3. reset or unlock local warp, and branch a new subspace when due
//! 4. announce a changed warp setting
//! 5. report the skew rate
//! 6. apply the warp mode (mirror a master, or the lowest rate in play)
//! 7. handle the warp input edges
//! 8. poll controller and election expiry
//! 9. refresh the status line

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warpsync_core::{ClockTicks, Quorum, SubspaceId, WarpMode};
use warpsync_time::{Clock, SubspaceClock};
use warpsync_wire::{WarpEvent, WarpRate, WarpRequest};

use crate::{CoordinatorConfig, InboxSender, Lapse, MasterElection, PeerTable, TimeWarp, VoteOutcome, WarpInbox};

/// Local rates above this count as warping
const WARP_RATE_THRESHOLD: f32 = 1.1;

pub const NOTICE_WARP_DISABLED: &str = "Cannot warp, warping is disabled on this server";
pub const NOTICE_VOTE_FAILED: &str = "Vote failed!";
pub const NOTICE_VOTE_CANCELLED: &str = "Cancelled vote!";

/// Outbound channel to the server
pub type ServerSender = mpsc::UnboundedSender<Bytes>;

/// Warp key edges seen this tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputEdges {
    pub increase: bool,
    pub decrease: bool,
}

impl InputEdges {
    pub const NONE: InputEdges = InputEdges {
        increase: false,
        decrease: false,
    };

    pub fn increase() -> Self {
        InputEdges {
            increase: true,
            decrease: false,
        }
    }

    pub fn decrease() -> Self {
        InputEdges {
            increase: false,
            decrease: true,
        }
    }

    fn any(self) -> bool {
        self.increase || self.decrease
    }
}

pub struct ClientWarpCoordinator<G: TimeWarp> {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    game: G,
    subspaces: SubspaceClock,
    peers: PeerTable,
    election: MasterElection,
    inbox: WarpInbox,
    server: ServerSender,
    /// Last announced (physics, index)
    last_sent_warp: (bool, i32),
    /// Warp the player picked, as opposed to one applied by mirroring
    chosen_warp: (bool, i32),
    /// Warp last applied by `follow_lowest`
    mirrored_warp: Option<(bool, i32)>,
    /// A peer joined since the last announcement
    announce_due: bool,
    last_warp_set: ClockTicks,
    last_report: ClockTicks,
    last_status: ClockTicks,
    /// Unlocked by local warp and no NEW_SUBSPACE sent yet
    branch_pending: bool,
    status: Option<String>,
    notices: VecDeque<String>,
}

impl<G: TimeWarp> ClientWarpCoordinator<G> {
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>, game: G, server: ServerSender) -> Self {
        let election = MasterElection::new(config.player_name.clone());
        let last_sent_warp = (game.is_physics_warp(), game.current_rate_index());
        ClientWarpCoordinator {
            config,
            clock,
            game,
            subspaces: SubspaceClock::new(),
            peers: PeerTable::new(),
            election,
            inbox: WarpInbox::new(),
            server,
            last_sent_warp,
            chosen_warp: last_sent_warp,
            mirrored_warp: None,
            announce_due: false,
            last_warp_set: ClockTicks::MIN,
            last_report: ClockTicks::MIN,
            last_status: ClockTicks::MIN,
            branch_pending: false,
            status: None,
            notices: VecDeque::new(),
        }
    }

    /// Handle for the transport to queue server frames
    pub fn inbox_sender(&self) -> InboxSender {
        self.inbox.sender()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub fn subspaces(&self) -> &SubspaceClock {
        &self.subspaces
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn election(&self) -> &MasterElection {
        &self.election
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// One-shot notices since the last call
    pub fn take_notices(&mut self) -> Vec<String> {
        self.notices.drain(..).collect()
    }

    fn mode(&self) -> WarpMode {
        self.config.warp_mode
    }

    fn send(&self, request: WarpRequest) {
        debug!(tag = ?request.tag(), "sending warp message");
        if self.server.send(request.encode()).is_err() {
            warn!(tag = ?request.tag(), "server channel closed, warp message dropped");
        }
    }

    fn notice(&mut self, text: &str) {
        info!(notice = %text, "warp notice");
        self.notices.push_back(text.to_string());
    }

    /// A peer connected. Our warp is announced again so it can mirror us.
    pub fn peer_joined(&mut self, name: &str) {
        if name == self.config.player_name || self.peers.contains(name) {
            return;
        }
        self.peers.peer_joined(name);
        if self.mode().mirrors_warp() {
            self.announce_due = true;
        }
    }

    /// A peer disconnected
    pub fn remove_player(&mut self, name: &str) {
        self.peers.remove(name);
    }

    /// Subspaces in use by this client and its peers, earliest universe
    /// time first
    pub fn active_subspaces(&self) -> Vec<SubspaceId> {
        let now = self.clock.now();
        let mut ids: Vec<SubspaceId> = self
            .subspaces
            .current_subspace()
            .into_iter()
            .chain(self.peers.subspaces().map(|(_, s)| s))
            .collect();
        ids.sort();
        ids.dedup();
        let time = |id: SubspaceId| {
            self.subspaces
                .universe_time(id, now)
                .unwrap_or(f64::NEG_INFINITY)
        };
        ids.sort_by(|a, b| time(*a).total_cmp(&time(*b)).then(a.cmp(b)));
        ids
    }

    /// Players in a subspace; this client first when present, peers by name
    pub fn players_in_subspace(&self, subspace: SubspaceId) -> Vec<String> {
        let mut players: Vec<String> = Vec::new();
        if self.subspaces.current_subspace() == Some(subspace) {
            players.push(self.config.player_name.clone());
        }
        players.extend(
            self.peers
                .subspaces()
                .filter(|(_, s)| *s == subspace)
                .map(|(name, _)| name.to_string()),
        );
        players
    }

    /// Run one tick
    pub fn tick(&mut self, input: InputEdges) {
        let now = self.clock.now();

        // Stage 1: apply server messages
        for frame in self.inbox.drain() {
            self.handle_frame(&frame, now);
        }

        // Stage 2: skew sample, own warp choice
        self.subspaces.record_progress(now, self.game.universe_time());
        self.observe_local_warp();

        // Stage 3: reset, unlock, branch
        self.check_warp(now);

        // Stage 4: edge-triggered warp announcement
        self.announce_warp(now);

        // Stage 5: rate report
        self.report_rate(now);

        // Stage 6: mode policy
        match self.mode() {
            WarpMode::McwForce | WarpMode::McwVote => self.follow_master(now),
            WarpMode::McwLowest => self.follow_lowest(),
            WarpMode::None | WarpMode::Subspace => {}
        }

        // Stage 7: input
        if input.any() {
            self.handle_input(input);
        }

        // Stage 8: expiry
        self.poll_expiry(now);

        // Stage 9: status line
        if now.secs_since(self.last_status) >= self.config.status_interval.as_secs_f64() {
            self.last_status = now;
            self.status = self.status_line(now);
        }
    }

    fn handle_frame(&mut self, frame: &[u8], now: ClockTicks) {
        let event = match WarpEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable warp message");
                return;
            }
        };
        self.handle_event(event, now);
    }

    fn handle_event(&mut self, event: WarpEvent, now: ClockTicks) {
        let mode = self.mode();
        match event {
            WarpEvent::NewSubspace { subspace, epoch } => {
                self.subspaces.add_subspace(subspace, epoch);
            }
            WarpEvent::RelockSubspace {
                origin,
                subspace,
                epoch,
            } => {
                debug!(origin = %origin, subspace = %subspace, rate = epoch.rate, "subspace relocked");
                self.subspaces.relock_subspace(subspace, epoch);
            }
            WarpEvent::SetSubspace { subspace } => self.lock_subspace(subspace, now),
            WarpEvent::ChangeSubspace { from, subspace } => {
                if from != self.config.player_name {
                    self.peers.set_subspace(&from, subspace);
                }
            }
            WarpEvent::ReportRate {
                peer,
                subspace,
                rate,
            } => {
                if peer != self.config.player_name {
                    self.peers.set_subspace(&peer, subspace);
                    self.peers.set_skew(&peer, rate);
                }
            }
            WarpEvent::ChangeWarp { from, rate } => {
                if mode != WarpMode::None && from != self.config.player_name {
                    self.peers.apply_warp(&from, rate);
                }
            }
            WarpEvent::SetController { controller, expiry } if mode.has_controller() => {
                let releasing = controller.is_empty();
                if self.election.on_set_controller(&controller, expiry, now) && releasing {
                    self.stop_warp();
                }
            }
            WarpEvent::ReleaseController if mode.has_controller() => {
                debug!("warp control released");
                self.election.reset();
                self.stop_warp();
            }
            WarpEvent::RequestVote { candidate, expiry } if mode == WarpMode::McwVote => {
                self.election.on_request_vote(&candidate, expiry, now);
            }
            WarpEvent::ReplyVote { voter, vote } if mode == WarpMode::McwVote => {
                match self.election.record_vote(&voter, vote, self.peers.len()) {
                    VoteOutcome::Failed => {
                        info!("warp vote failed");
                        self.release_control();
                        self.notice(NOTICE_VOTE_FAILED);
                    }
                    VoteOutcome::Won => {
                        info!("warp vote won, claiming control");
                        self.election.seat_self();
                        self.send(WarpRequest::RequestController);
                    }
                    VoteOutcome::Pending | VoteOutcome::Ignored => {}
                }
            }
            other => debug!(tag = ?other.tag(), mode = %mode, "warp message not handled in this mode"),
        }
    }

    fn lock_subspace(&mut self, subspace: SubspaceId, now: ClockTicks) {
        if let Err(e) = self.subspaces.lock(subspace) {
            warn!(subspace = %subspace, error = %e, "cannot lock to subspace");
            return;
        }
        if let Ok(time) = self.subspaces.universe_time(subspace, now) {
            self.game.set_universe_time(time);
        }
        self.branch_pending = false;
        info!(subspace = %subspace, "locked to subspace");
        self.send(WarpRequest::ChangeSubspace { subspace });
    }

    fn local_warp(&self) -> (bool, i32) {
        (self.game.is_physics_warp(), self.game.current_rate_index())
    }

    /// A local warp other than the one last mirrored was picked by the player
    fn observe_local_warp(&mut self) {
        let current = self.local_warp();
        if self.mirrored_warp != Some(current) {
            self.chosen_warp = current;
            self.mirrored_warp = None;
        }
    }

    /// Drop local warp back to real time
    fn stop_warp(&mut self) {
        if self.game.current_rate_index() > 0 {
            debug!("resetting warp rate back to 0");
            let physics = self.game.is_physics_warp();
            self.game.set_rate(0, physics);
        }
    }

    fn check_warp(&mut self, now: ClockTicks) {
        let reset = match self.mode() {
            WarpMode::None => true,
            WarpMode::McwForce | WarpMode::McwVote => self.election.warp_master().is_none(),
            WarpMode::Subspace | WarpMode::McwLowest => false,
        };
        let index = self.game.current_rate_index();
        let rate = self.game.current_rate();

        if index > 0 && reset {
            self.stop_warp();
        } else if index > 0 && rate > WARP_RATE_THRESHOLD && self.subspaces.is_locked() {
            debug!("unlocking from subspace");
            self.subspaces.unlock();
            self.branch_pending = true;
        }

        if self.mode() == WarpMode::Subspace
            && self.branch_pending
            && self.game.current_rate_index() == 0
            && self.game.current_rate() < WARP_RATE_THRESHOLD
            && !self.subspaces.is_locked()
        {
            self.branch_pending = false;
            self.send_new_subspace(now);
        }
    }

    fn send_new_subspace(&self, now: ClockTicks) {
        let rate = self.subspaces.requested_rate();
        info!(rate, "requesting a new subspace");
        self.send(WarpRequest::NewSubspace {
            epoch_clock: now,
            epoch_time: self.game.universe_time(),
            rate,
        });
    }

    fn announce_warp(&mut self, now: ClockTicks) {
        if self.mode() == WarpMode::None {
            return;
        }
        // Lowest mode announces the player's choice, never a mirrored warp
        let warp = if self.mode() == WarpMode::McwLowest {
            self.chosen_warp
        } else {
            self.local_warp()
        };
        if warp == self.last_sent_warp && !self.announce_due {
            return;
        }
        self.announce_due = false;
        self.last_sent_warp = warp;
        self.send(WarpRequest::ChangeWarp(WarpRate {
            is_physics_warp: warp.0,
            rate_index: warp.1,
            epoch_clock: now,
            epoch_time: self.game.universe_time(),
        }));
    }

    fn report_rate(&mut self, now: ClockTicks) {
        if !self.subspaces.is_locked() {
            return;
        }
        if now.secs_since(self.last_report) < self.config.report_rate_interval.as_secs_f64() {
            return;
        }
        self.last_report = now;
        self.send(WarpRequest::ReportRate {
            rate: self.subspaces.requested_rate(),
        });
    }

    /// Dead-reckon the master's timeline from its last announcement
    fn follow_master(&mut self, now: ClockTicks) {
        if now.secs_since(self.last_warp_set) <= self.config.warp_set_throttle.as_secs_f64() {
            return;
        }
        let Some(master) = self.election.follows_master() else {
            return;
        };
        let Some(target) = self.peers.warp_rate(master).copied() else {
            return;
        };
        if self.game.current_rate_index() == target.rate_index
            && self.game.is_physics_warp() == target.is_physics_warp
        {
            return;
        }
        let Some(multiplier) = self
            .game
            .rate_multiplier(target.is_physics_warp, target.rate_index)
        else {
            warn!(index = target.rate_index, physics = target.is_physics_warp, "master warp rate unknown locally");
            return;
        };

        self.last_warp_set = now;
        let time = target.epoch_time + f64::from(multiplier) * now.secs_since(target.epoch_clock);
        debug!(universe_time = time, index = target.rate_index, "following warp master");
        self.game.set_universe_time(time);
        self.game.set_rate(target.rate_index, target.is_physics_warp);
    }

    /// Run at the slowest warp among the player's own choice and every
    /// peer's; physics warp takes priority
    fn follow_lowest(&mut self) {
        let (mut physics, mut regular) = self.peers.lowest_rate_indices();
        let (own_physics, own_index) = self.chosen_warp;
        let bucket = if own_physics { &mut physics } else { &mut regular };
        *bucket = Some(bucket.map_or(own_index, |m| m.min(own_index)));

        let target = match physics {
            Some(index) => (true, index),
            None => (false, regular.unwrap_or(0)),
        };
        if self.local_warp() != target {
            debug!(index = target.1, physics = target.0, "following lowest warp");
            self.game.set_rate(target.1, target.0);
        }
        self.mirrored_warp = Some(self.local_warp());
    }

    fn handle_input(&mut self, input: InputEdges) {
        match self.mode() {
            WarpMode::None => self.notice(NOTICE_WARP_DISABLED),
            WarpMode::McwForce => self.force_input(input),
            WarpMode::McwVote => self.vote_input(input),
            WarpMode::Subspace | WarpMode::McwLowest => {}
        }
    }

    fn force_input(&mut self, input: InputEdges) {
        if self.election.warp_master().is_none() {
            if input.increase {
                self.send(WarpRequest::RequestController);
            }
        } else if self.election.is_master() && input.decrease && self.game.current_rate() < WARP_RATE_THRESHOLD {
            self.release_control();
        }
    }

    fn vote_input(&mut self, input: InputEdges) {
        if self.election.warp_master().is_some() {
            if self.election.is_master() && input.decrease && self.game.current_rate() < WARP_RATE_THRESHOLD {
                self.release_control();
            }
            return;
        }
        if self.election.vote_master().is_none() {
            if input.increase {
                self.send(WarpRequest::RequestController);
            }
        } else if self.election.is_candidate() {
            if input.decrease {
                self.release_control();
                self.notice(NOTICE_VOTE_CANCELLED);
            }
        } else if self.election.cast_vote() {
            debug!(vote = input.increase, "casting warp vote");
            self.send(WarpRequest::ReplyVote {
                voter: self.config.player_name.clone(),
                vote: input.increase,
            });
        }
    }

    /// Give up control or candidacy. A master first branches a fresh
    /// subspace so its timeline does not keep running under old authority.
    fn release_control(&mut self) {
        if self.election.is_master() {
            self.send_new_subspace(self.clock.now());
        }
        self.election.reset();
        self.send(WarpRequest::ReleaseController);
        self.stop_warp();
    }

    fn poll_expiry(&mut self, now: ClockTicks) {
        match self.election.poll_expiry(now) {
            Lapse::None => {}
            Lapse::Lease { ours: true } => {
                info!("our warp control lease lapsed");
                self.release_control();
            }
            Lapse::Lease { ours: false } => {
                debug!("warp control lease lapsed");
                self.election.reset();
                self.stop_warp();
            }
            Lapse::Vote { ours: true } => {
                info!("warp vote lapsed");
                self.election.reset();
                self.send(WarpRequest::ReleaseController);
            }
            Lapse::Vote { ours: false } => self.election.reset(),
        }
    }

    fn status_line(&self, now: ClockTicks) -> Option<String> {
        let remaining = |expiry: ClockTicks| {
            let secs = expiry.secs_since(now).max(0.0) as u64;
            humantime::format_duration(Duration::from_secs(secs))
        };
        if let Some(master) = self.election.warp_master() {
            return Some(if self.election.is_master() {
                format!(
                    "You have warp control, press '<' while not in warp to release (timeout {})",
                    remaining(self.election.controller_expiry())
                )
            } else {
                format!("{master} currently has warp control")
            });
        }
        let candidate = self.election.vote_master()?;
        Some(if self.election.is_candidate() {
            let needed = Quorum::for_voters(self.peers.len()).to_win;
            format!(
                "Waiting for vote replies... Yes: {}, No: {}, Needed: {} ({} left)",
                self.election.yes_votes(),
                self.election.no_votes(),
                needed,
                remaining(self.election.vote_expiry())
            )
        } else if self.election.has_voted() {
            "Voted!".to_string()
        } else {
            format!("{candidate} has started a warp vote, reply with '<' for no or '>' for yes")
        })
    }
}
