//! Controller and election state of one client session
//!
//! Tracks who holds warp control, any open election, and the tally when
//! this client is the candidate. Expiries are server clock readings and
//! are polled, never scheduled.

use std::collections::BTreeSet;

use tracing::{debug, info};

use warpsync_core::{ClockTicks, Quorum};

/// Result of counting a vote as the candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Not our election, or a repeat vote
    Ignored,
    /// Counted; neither threshold reached
    Pending,
    /// Win quorum reached
    Won,
    /// Fail quorum reached
    Failed,
}

/// What lapsed during an expiry poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lapse {
    None,
    /// Controller lease ran out; `ours` if we held it
    Lease { ours: bool },
    /// Election ran out; `ours` if we were the candidate
    Vote { ours: bool },
}

#[derive(Debug)]
pub struct MasterElection {
    player_name: String,
    warp_master: Option<String>,
    controller_expiry: ClockTicks,
    vote_master: Option<String>,
    vote_expiry: ClockTicks,
    yes: BTreeSet<String>,
    no: BTreeSet<String>,
    vote_already_cast: bool,
}

impl MasterElection {
    pub fn new(player_name: impl Into<String>) -> Self {
        MasterElection {
            player_name: player_name.into(),
            warp_master: None,
            controller_expiry: ClockTicks::MIN,
            vote_master: None,
            vote_expiry: ClockTicks::MIN,
            yes: BTreeSet::new(),
            no: BTreeSet::new(),
            vote_already_cast: false,
        }
    }

    pub fn warp_master(&self) -> Option<&str> {
        self.warp_master.as_deref()
    }

    pub fn controller_expiry(&self) -> ClockTicks {
        self.controller_expiry
    }

    pub fn is_master(&self) -> bool {
        self.warp_master.as_deref() == Some(self.player_name.as_str())
    }

    /// A master other than us is seated
    pub fn follows_master(&self) -> Option<&str> {
        self.warp_master().filter(|m| *m != self.player_name)
    }

    pub fn vote_master(&self) -> Option<&str> {
        self.vote_master.as_deref()
    }

    pub fn vote_expiry(&self) -> ClockTicks {
        self.vote_expiry
    }

    pub fn is_candidate(&self) -> bool {
        self.vote_master.as_deref() == Some(self.player_name.as_str())
    }

    pub fn has_voted(&self) -> bool {
        self.vote_already_cast
    }

    pub fn yes_votes(&self) -> usize {
        self.yes.len()
    }

    pub fn no_votes(&self) -> usize {
        self.no.len()
    }

    /// Back to "nobody controls warp, no election"
    pub fn reset(&mut self) {
        self.warp_master = None;
        self.controller_expiry = ClockTicks::MIN;
        self.vote_master = None;
        self.vote_expiry = ClockTicks::MIN;
        self.yes.clear();
        self.no.clear();
        self.vote_already_cast = false;
    }

    /// Apply a SET_CONTROLLER. An empty name releases control; a grant that
    /// has already expired is ignored. Returns whether state changed.
    pub fn on_set_controller(&mut self, controller: &str, expiry: ClockTicks, now: ClockTicks) -> bool {
        if controller.is_empty() {
            self.reset();
            return true;
        }
        if expiry <= now {
            debug!(controller = %controller, "stale controller grant ignored");
            return false;
        }
        info!(controller = %controller, "warp controller set");
        self.vote_master = None;
        self.vote_expiry = ClockTicks::MIN;
        self.yes.clear();
        self.no.clear();
        self.vote_already_cast = false;
        self.warp_master = Some(controller.to_string());
        self.controller_expiry = expiry;
        true
    }

    /// Apply a REQUEST_VOTE
    pub fn on_request_vote(&mut self, candidate: &str, expiry: ClockTicks, now: ClockTicks) -> bool {
        if expiry <= now || self.warp_master.is_some() {
            debug!(candidate = %candidate, "vote request ignored");
            return false;
        }
        info!(candidate = %candidate, "warp vote started");
        self.vote_master = Some(candidate.to_string());
        self.vote_expiry = expiry;
        self.yes.clear();
        self.no.clear();
        self.vote_already_cast = false;
        true
    }

    /// Mark our one vote as cast; false if it already was
    pub fn cast_vote(&mut self) -> bool {
        if self.vote_already_cast || self.vote_master.is_none() || self.is_candidate() {
            return false;
        }
        self.vote_already_cast = true;
        true
    }

    /// Count a vote relayed to us as candidate. `peers` is the number of
    /// other connected players.
    pub fn record_vote(&mut self, voter: &str, vote: bool, peers: usize) -> VoteOutcome {
        if !self.is_candidate() || self.warp_master.is_some() {
            return VoteOutcome::Ignored;
        }
        if self.yes.contains(voter) || self.no.contains(voter) {
            return VoteOutcome::Ignored;
        }
        if vote {
            self.yes.insert(voter.to_string());
        } else {
            self.no.insert(voter.to_string());
        }

        let quorum = Quorum::for_voters(peers);
        debug!(
            yes = self.yes.len(),
            no = self.no.len(),
            to_win = quorum.to_win,
            to_fail = quorum.to_fail,
            "vote counted"
        );
        if quorum.is_failed(self.no.len()) {
            VoteOutcome::Failed
        } else if quorum.is_won(self.yes.len()) {
            VoteOutcome::Won
        } else {
            VoteOutcome::Pending
        }
    }

    /// Take control after winning, until the server's grant replaces the
    /// provisional expiry
    pub fn seat_self(&mut self) {
        let expiry = self.vote_expiry;
        self.vote_master = None;
        self.yes.clear();
        self.no.clear();
        self.warp_master = Some(self.player_name.clone());
        self.controller_expiry = expiry;
    }

    /// Check lease and election expiry. The caller acts on the lapse;
    /// state is left untouched.
    pub fn poll_expiry(&self, now: ClockTicks) -> Lapse {
        if self.warp_master.is_some() && now >= self.controller_expiry {
            return Lapse::Lease {
                ours: self.is_master(),
            };
        }
        if self.warp_master.is_none() && self.vote_master.is_some() && now >= self.vote_expiry {
            return Lapse::Vote {
                ours: self.is_candidate(),
            };
        }
        Lapse::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: ClockTicks = ClockTicks(1_000);
    const LATER: ClockTicks = ClockTicks(5_000);

    fn candidate() -> MasterElection {
        let mut e = MasterElection::new("alice");
        assert!(e.on_request_vote("alice", LATER, NOW));
        e
    }

    #[test]
    fn test_single_peer_yes_wins() {
        let mut e = candidate();
        assert_eq!(e.record_vote("bob", true, 1), VoteOutcome::Won);
    }

    #[test]
    fn test_single_peer_no_fails() {
        let mut e = candidate();
        assert_eq!(e.record_vote("bob", false, 1), VoteOutcome::Failed);
    }

    #[test]
    fn test_votes_count_once() {
        let mut e = candidate();
        assert_eq!(e.record_vote("bob", true, 4), VoteOutcome::Pending);
        assert_eq!(e.record_vote("bob", true, 4), VoteOutcome::Ignored);
        assert_eq!(e.record_vote("bob", false, 4), VoteOutcome::Ignored);
        assert_eq!(e.yes_votes(), 1);
        assert_eq!(e.record_vote("carol", true, 4), VoteOutcome::Pending);
        assert_eq!(e.record_vote("dave", true, 4), VoteOutcome::Won);
    }

    #[test]
    fn test_voter_casts_once() {
        let mut e = MasterElection::new("bob");
        assert!(!e.cast_vote());
        e.on_request_vote("alice", LATER, NOW);
        assert!(e.cast_vote());
        assert!(!e.cast_vote());
        assert_eq!(e.record_vote("carol", true, 2), VoteOutcome::Ignored);
    }

    #[test]
    fn test_stale_grant_ignored() {
        let mut e = MasterElection::new("bob");
        assert!(!e.on_set_controller("alice", NOW, NOW));
        assert!(e.warp_master().is_none());
        assert!(e.on_set_controller("alice", LATER, NOW));
        assert_eq!(e.follows_master(), Some("alice"));
        assert!(e.on_set_controller("", ClockTicks::ZERO, NOW));
        assert!(e.warp_master().is_none());
    }

    #[test]
    fn test_expiry_polling() {
        let mut e = candidate();
        assert_eq!(e.poll_expiry(NOW), Lapse::None);
        assert_eq!(e.poll_expiry(LATER), Lapse::Vote { ours: true });

        e.record_vote("bob", true, 1);
        e.seat_self();
        assert!(e.is_master());
        assert!(e.on_set_controller("alice", ClockTicks(9_000), NOW));
        assert_eq!(e.poll_expiry(LATER), Lapse::None);
        assert_eq!(e.poll_expiry(ClockTicks(9_000)), Lapse::Lease { ours: true });
    }
}
